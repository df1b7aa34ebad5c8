//! Driving an external ACME client through its manual HTTP-01 flow.
//!
//! The client runs as a subprocess owned by a driver task. The task reports what the client
//! does as [`ToolEvent`]s and takes [`ToolControl`] commands, so callers never touch the
//! process' pipes themselves.

use crate::domain::DomainName;
use crate::time::ParsedDuration;
use async_trait::async_trait;
use std::fmt::{Debug, Display, Formatter};

mod certbot;
mod process;
mod prompt;

pub use certbot::Certbot;
pub use process::{ProcessSession, ToolCommand, ToolProcess};
pub use prompt::PromptParser;

/// Prefix of the URL path an HTTP-01 challenge file is fetched from
pub const CHALLENGE_PATH_PREFIX: &str = "/.well-known/acme-challenge/";

/// The file the operator has to publish for the CA to validate the domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpChallenge {
    pub file_name: String,
    pub file_content: String,
}

impl HttpChallenge {
    /// URL path below the domain's web root, e.g. `/.well-known/acme-challenge/abc`
    pub fn path(&self) -> String {
        format!("{CHALLENGE_PATH_PREFIX}{}", self.file_name)
    }
}

/// How a client process ended, with everything it printed
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExitReport {
    pub code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl Display for ExitReport {
    /// The most useful description of the outcome: stderr, otherwise stdout, otherwise the exit code
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();
        if !stderr.is_empty() {
            f.write_str(stderr)
        } else if !stdout.is_empty() {
            f.write_str(stdout)
        } else {
            match self.code {
                Some(code) => write!(f, "The ACME client exited with code {code}"),
                None => write!(f, "The ACME client was terminated by a signal"),
            }
        }
    }
}

/// Reported by a process driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolEvent {
    /// The client printed a challenge and waits for confirmation
    Challenge(HttpChallenge),
    Exited(ExitReport),
}

/// Accepted by a process driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolControl {
    /// The challenge file is in place, let the client continue
    Proceed,
    /// Kill the client
    Abort,
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Starting {program} failed: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("The ACME client exited without issuing a challenge: {0}")]
    Exited(ExitReport),
    #[error("The ACME client did not respond within {0}")]
    TimedOut(ParsedDuration),
    #[error("The ACME client asked for a second challenge, only single-domain orders are supported")]
    UnexpectedChallenge,
    #[error("Lost contact with the ACME client")]
    Disconnected,
    #[error("Talking to the ACME client failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A challenge the client waits on, and the handle to let it continue
#[derive(Debug)]
pub struct PendingIssuance {
    pub challenge: HttpChallenge,
    pub session: Box<dyn ToolSession>,
}

/// An external ACME client able to run the manual HTTP-01 flow for one domain
#[async_trait]
pub trait AcmeTool: Debug + Send + Sync {
    /// Start an issuance for `domain` and wait until the client shows its challenge
    async fn begin(&self, domain: &DomainName) -> Result<PendingIssuance, ToolError>;
}

/// A client process paused at its challenge prompt
#[async_trait]
pub trait ToolSession: Debug + Send + Sync {
    /// Let the client validate the challenge and wait for it to exit.
    ///
    /// A client that exits unsuccessfully is still reported as `Ok`, check [`ExitReport::success`].
    async fn proceed(self: Box<Self>) -> Result<ExitReport, ToolError>;

    /// Kill the client
    async fn abort(self: Box<Self>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("boom\n", "partial output", Some(1), "boom")]
    #[case("  \n", "Some challenges have failed.\n", Some(1), "Some challenges have failed.")]
    #[case("", "", Some(3), "The ACME client exited with code 3")]
    #[case("", "", None, "The ACME client was terminated by a signal")]
    fn test_exit_report_message(
        #[case] stderr: &str,
        #[case] stdout: &str,
        #[case] code: Option<i32>,
        #[case] expected: &str,
    ) {
        let report = ExitReport {
            code,
            success: false,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        };

        assert_eq!(report.to_string(), expected);
    }

    #[test]
    fn test_challenge_path() {
        let challenge = HttpChallenge {
            file_name: "abc".to_string(),
            file_content: "token.thumb".to_string(),
        };

        assert_eq!(challenge.path(), "/.well-known/acme-challenge/abc");
    }
}
