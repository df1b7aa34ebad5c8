use crate::artifact::ArtifactKind;
use crate::domain::DomainName;
use std::path::PathBuf;

pub type TrackerResult<T> = Result<T, Error>;

/// Everything an operator can be told about a failed action.
///
/// Database and filesystem plumbing errors are carried as [`Error::Internal`]; every other variant
/// describes a condition the operator can act on.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("The domain {0} is already tracked")]
    DuplicateDomain(DomainName),
    #[error("The domain {0} is not tracked")]
    DomainNotFound(DomainName),
    #[error("No {kind} file exists for {domain}")]
    ArtifactNotFound {
        domain: DomainName,
        kind: ArtifactKind,
    },
    #[error("No certificate found for {domain} (expected at {})", path.display())]
    MissingCertificate { domain: DomainName, path: PathBuf },
    #[error("Invalid domain name {name:?}: {reason}")]
    InvalidDomain { name: String, reason: String },
    #[error(
        "A renewal for {0} is already waiting for its challenge file. Complete or cancel it first"
    )]
    RenewalConflict(DomainName),
    #[error("There is no pending renewal for {0}")]
    NoPendingRenewal(DomainName),
    #[error("Running the ACME client failed: {0}")]
    ToolInvocation(String),
    /// The ACME client rejected the renewal after the operator confirmed the upload.
    /// Carries the client's own error text unchanged.
    #[error("{0}")]
    ToolValidation(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
