use crate::domain::DomainName;
use crate::tool::{
    AcmeTool, ExitReport, HttpChallenge, PendingIssuance, ToolError, ToolSession,
};
use async_trait::async_trait;
use rcgen::{CertificateParams, DnType, KeyPair};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use time::OffsetDateTime;

pub const TEST_ORGANIZATION: &str = "Certwatch Test CA";

/// PEM encoded self-signed certificate and its private key
pub struct TestCertificate {
    pub cert_pem: String,
    pub key_pem: String,
}

pub fn self_signed_certificate(
    domain: &str,
    not_after: OffsetDateTime,
) -> anyhow::Result<TestCertificate> {
    let mut params =
        CertificateParams::new(vec![domain.to_string(), format!("www.{domain}")])?;
    params
        .distinguished_name
        .push(DnType::OrganizationName, TEST_ORGANIZATION);
    params.distinguished_name.push(DnType::CommonName, domain);
    params.not_before = not_after - time::Duration::days(90);
    params.not_after = not_after;
    let key = KeyPair::generate()?;
    let cert = params.self_signed(&key)?;
    Ok(TestCertificate {
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
    })
}

/// Lay out a full artifact set below `live_dir/<domain>/` the way certbot does
pub fn write_artifacts(
    live_dir: &Path,
    domain: &str,
    not_after: OffsetDateTime,
) -> anyhow::Result<PathBuf> {
    let certificate = self_signed_certificate(domain, not_after)?;
    let dir = live_dir.join(domain);
    std::fs::create_dir_all(&dir)?;
    std::fs::write(dir.join("cert.pem"), &certificate.cert_pem)?;
    std::fs::write(dir.join("chain.pem"), &certificate.cert_pem)?;
    std::fs::write(
        dir.join("fullchain.pem"),
        format!("{}{}", certificate.cert_pem, certificate.cert_pem),
    )?;
    std::fs::write(dir.join("privkey.pem"), &certificate.key_pem)?;
    Ok(dir)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeBehavior {
    /// Issues the challenge, then writes a fresh artifact set
    Succeed,
    /// Issues the challenge and exits successfully without writing anything
    SucceedWithoutCertificate,
    /// Issues the challenge, then fails validation
    Reject,
    /// Exits before issuing a challenge
    FailToStart,
}

/// In-process stand-in for an ACME client
#[derive(Debug, Clone)]
pub struct FakeTool {
    behavior: FakeBehavior,
    live_dir: PathBuf,
    started: Arc<AtomicUsize>,
    aborted: Arc<AtomicUsize>,
}

impl FakeTool {
    pub const REJECTION: &'static str =
        "Certbot failed to authenticate some domains (authenticator: manual).";

    pub fn new(behavior: FakeBehavior, live_dir: &Path) -> Self {
        Self {
            behavior,
            live_dir: live_dir.to_path_buf(),
            started: Arc::default(),
            aborted: Arc::default(),
        }
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn aborted(&self) -> usize {
        self.aborted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AcmeTool for FakeTool {
    async fn begin(&self, domain: &DomainName) -> Result<PendingIssuance, ToolError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if self.behavior == FakeBehavior::FailToStart {
            return Err(ToolError::Exited(ExitReport {
                code: Some(1),
                success: false,
                stdout: String::new(),
                stderr: "The requested manual plugin does not appear to be installed".to_string(),
            }));
        }
        Ok(PendingIssuance {
            challenge: HttpChallenge {
                file_name: "abc".to_string(),
                file_content: "token.thumb".to_string(),
            },
            session: Box::new(FakeSession {
                tool: self.clone(),
                domain: domain.clone(),
            }),
        })
    }
}

#[derive(Debug)]
struct FakeSession {
    tool: FakeTool,
    domain: DomainName,
}

#[async_trait]
impl ToolSession for FakeSession {
    async fn proceed(self: Box<Self>) -> Result<ExitReport, ToolError> {
        let success = ExitReport {
            code: Some(0),
            success: true,
            stdout: "Successfully received certificate.".to_string(),
            stderr: String::new(),
        };
        match self.tool.behavior {
            FakeBehavior::Succeed => {
                let not_after = OffsetDateTime::now_utc().replace_nanosecond(0).unwrap()
                    + time::Duration::days(90);
                write_artifacts(&self.tool.live_dir, self.domain.as_str(), not_after)
                    .map_err(|e| ToolError::Io(std::io::Error::other(e.to_string())))?;
                Ok(success)
            }
            FakeBehavior::SucceedWithoutCertificate => Ok(success),
            FakeBehavior::Reject | FakeBehavior::FailToStart => Ok(ExitReport {
                code: Some(1),
                success: false,
                stdout: "Some challenges have failed.".to_string(),
                stderr: FakeTool::REJECTION.to_string(),
            }),
        }
    }

    async fn abort(self: Box<Self>) {
        self.tool.aborted.fetch_add(1, Ordering::SeqCst);
    }
}
