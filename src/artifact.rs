use crate::config::ToolConfiguration;
use crate::domain::DomainName;
use crate::error::{Error, TrackerResult};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use strum::{Display, EnumString, VariantArray};
use tracing::debug;

/// One of the files the ACME client leaves in a domain's certificate directory
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, VariantArray, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// The leaf certificate
    Cert,
    /// Leaf certificate followed by the intermediates
    Fullchain,
    /// Intermediates only
    #[strum(to_string = "cabundle", serialize = "chain")]
    CaBundle,
    /// The certificate's private key
    Key,
}

impl ArtifactKind {
    /// Name of the file inside the domain's certificate directory
    pub fn file_name(self) -> &'static str {
        match self {
            ArtifactKind::Cert => "cert.pem",
            ArtifactKind::Fullchain => "fullchain.pem",
            ArtifactKind::CaBundle => "chain.pem",
            ArtifactKind::Key => "privkey.pem",
        }
    }

    /// Name suggested to the operator's browser
    pub fn download_name(self, domain: &DomainName) -> String {
        let stem = domain.file_stem();
        match self {
            ArtifactKind::Cert => format!("{stem}.crt"),
            ArtifactKind::Fullchain => format!("{stem}_fullchain.crt"),
            ArtifactKind::CaBundle => format!("{stem}_cabundle.pem"),
            ArtifactKind::Key => format!("{stem}_private.key"),
        }
    }

    pub fn media_type(self) -> &'static str {
        "application/x-pem-file"
    }
}

/// Where the ACME client puts the artifacts of each domain
#[derive(Debug, Clone)]
pub struct CertificateLayout {
    live_dir: PathBuf,
    secondary_live_dir: Option<PathBuf>,
}

impl CertificateLayout {
    pub fn new(live_dir: PathBuf, secondary_live_dir: Option<PathBuf>) -> Self {
        Self {
            live_dir,
            secondary_live_dir,
        }
    }

    pub fn from_config(config: &ToolConfiguration) -> Self {
        Self::new(config.live_dir(), config.secondary_live_dir.clone())
    }

    /// The directory the ACME client writes new artifacts for `domain` to
    pub fn domain_directory(&self, domain: &DomainName) -> PathBuf {
        self.live_dir.join(domain.as_str())
    }

    /// Path where the artifact is expected if it has not been issued yet
    pub fn expected_path(&self, domain: &DomainName, kind: ArtifactKind) -> PathBuf {
        self.domain_directory(domain).join(kind.file_name())
    }

    /// Find an existing artifact, preferring our own live directory over the secondary one
    pub fn locate(&self, domain: &DomainName, kind: ArtifactKind) -> Option<PathBuf> {
        std::iter::once(&self.live_dir)
            .chain(self.secondary_live_dir.iter())
            .map(|base| base.join(domain.as_str()).join(kind.file_name()))
            // Permission problems on the system-wide directory count as "not there"
            .find(|path| path.try_exists().unwrap_or(false) && path.is_file())
    }
}

#[derive(Debug, Clone)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub modified: Option<SystemTime>,
}

impl Artifact {
    pub fn media_type(&self) -> &'static str {
        self.kind.media_type()
    }
}

/// Read-only access to certificate artifacts for download
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    layout: CertificateLayout,
}

impl ArtifactStore {
    pub fn new(layout: CertificateLayout) -> Self {
        Self { layout }
    }

    /// Artifact kinds that currently exist for `domain`
    pub fn available(&self, domain: &DomainName) -> Vec<ArtifactKind> {
        ArtifactKind::VARIANTS
            .iter()
            .copied()
            .filter(|kind| self.layout.locate(domain, *kind).is_some())
            .collect()
    }

    /// Read an artifact as-is
    pub async fn download(&self, domain: &DomainName, kind: ArtifactKind) -> TrackerResult<Artifact> {
        let not_found = || Error::ArtifactNotFound {
            domain: domain.clone(),
            kind,
        };
        let path = self.layout.locate(domain, kind).ok_or_else(not_found)?;
        debug!("Serving {kind} of {domain} from {}", path.display());
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            // Removed between locating and reading
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found()),
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("Reading {} failed", path.display()))
                    .into());
            }
        };
        Ok(Artifact {
            kind,
            file_name: kind.download_name(domain),
            bytes,
            modified: modified_time(&path).await,
        })
    }
}

async fn modified_time(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path)
        .await
        .and_then(|metadata| metadata.modified())
        .context("mtime unavailable")
        .ok()
}
