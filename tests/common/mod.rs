#![allow(dead_code)]

use certwatch::config::{Configuration, MonitorConfiguration, ToolConfiguration};
use rcgen::{CertificateParams, DnType, KeyPair};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use time::OffsetDateTime;

pub const ISSUER_ORGANIZATION: &str = "Integration Test CA";
pub const CHALLENGE_FILE_NAME: &str = "abc";
pub const CHALLENGE_CONTENT: &str = "token.thumb";
pub const REJECTION: &str = "Certbot failed to authenticate some domains (authenticator: manual).";

/// How the fake certbot script behaves once started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeCertbotMode {
    /// Prompt, wait for Enter, then install the prepared certificate
    Success,
    /// Prompt, wait for Enter, then fail validation
    Reject,
    /// Exit with an error before prompting
    Crash,
    /// Never print anything
    Silent,
    /// Prompt, wait for Enter, then never exit
    Hang,
    /// Prompt, wait for Enter, then exit successfully without installing anything
    NoCertificate,
}

impl FakeCertbotMode {
    fn as_str(self) -> &'static str {
        match self {
            FakeCertbotMode::Success => "success",
            FakeCertbotMode::Reject => "reject",
            FakeCertbotMode::Crash => "crash",
            FakeCertbotMode::Silent => "silent",
            FakeCertbotMode::Hang => "hang",
            FakeCertbotMode::NoCertificate => "nocert",
        }
    }
}

const FAKE_CERTBOT: &str = r#"#!/bin/sh
domain=""
config_dir=""
while [ $# -gt 0 ]; do
    case "$1" in
        -d) domain="$2"; shift 2 ;;
        --config-dir) config_dir="$2"; shift 2 ;;
        *) shift ;;
    esac
done

if [ "$MODE" = "crash" ]; then
    echo "An unexpected error occurred: the client lacks sufficient authorization" >&2
    exit 1
fi
if [ "$MODE" = "silent" ]; then
    exec sleep 30
fi

echo "Requesting a certificate for $domain"
echo
echo "- - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - -"
echo "Create a file containing just this data:"
echo
echo "$CONTENT"
echo
echo "And make it available on your web server at this URL:"
echo
echo "http://$domain/.well-known/acme-challenge/$FILE_NAME"
echo
echo "- - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - -"
printf "Press Enter to Continue"
read answer

case "$MODE" in
    hang)
        exec sleep 30
        ;;
    reject)
        echo "$REJECTION" >&2
        exit 1
        ;;
    nocert)
        echo "Successfully received certificate."
        exit 0
        ;;
esac

mkdir -p "$config_dir/live/$domain"
cp "$SOURCE"/*.pem "$config_dir/live/$domain/"
echo "Successfully received certificate."
echo "Certificate is saved at: $config_dir/live/$domain/fullchain.pem"
"#;

/// A temporary installation: data directory, certbot directories and a scripted certbot
pub struct TestEnvironment {
    pub base: TempDir,
    pub config: Configuration,
    /// The certificate the fake certbot installs on success
    pub issued: PathBuf,
}

impl TestEnvironment {
    pub fn new(mode: FakeCertbotMode) -> anyhow::Result<Self> {
        let base = tempfile::tempdir()?;
        let issued = base.path().join("issued");
        std::fs::create_dir_all(&issued)?;
        let program = base.path().join("certbot");
        write_fake_certbot(&program, mode, &issued)?;

        let monitor = MonitorConfiguration {
            check_on_add: false,
            refresh_interval: 0u64.into(),
            check_timeout: 2u64.into(),
            ..MonitorConfiguration::default()
        };
        let config = Configuration {
            listen_address: "127.0.0.1:0".parse()?,
            data_dir: base.path().join("data"),
            contact_email: "ops@example.org".to_string(),
            tool: ToolConfiguration {
                program,
                config_dir: base.path().join("certs"),
                work_dir: None,
                logs_dir: None,
                extra_args: vec![],
                challenge_timeout: 10u64.into(),
                completion_timeout: 10u64.into(),
                secondary_live_dir: None,
            },
            monitor,
        };
        Ok(Self {
            base,
            config,
            issued,
        })
    }

    /// Prepare the certificate the fake certbot hands out for `domain`
    pub fn prepare_certificate(&self, domain: &str, not_after: OffsetDateTime) -> anyhow::Result<()> {
        write_artifact_set(&self.issued, domain, not_after)
    }

    /// Place an existing certificate directly into certbot's live directory
    pub fn install_certificate(&self, domain: &str, not_after: OffsetDateTime) -> anyhow::Result<()> {
        let dir = self.config.tool.live_dir().join(domain);
        std::fs::create_dir_all(&dir)?;
        write_artifact_set(&dir, domain, not_after)
    }

    pub fn issued_file(&self, name: &str) -> PathBuf {
        self.issued.join(name)
    }
}

fn write_fake_certbot(path: &Path, mode: FakeCertbotMode, source: &Path) -> anyhow::Result<()> {
    let header = format!(
        "MODE='{}'\nSOURCE='{}'\nFILE_NAME='{CHALLENGE_FILE_NAME}'\nCONTENT='{CHALLENGE_CONTENT}'\nREJECTION='{REJECTION}'\n",
        mode.as_str(),
        source.display(),
    );
    let script = FAKE_CERTBOT.replacen("#!/bin/sh\n", &format!("#!/bin/sh\n{header}"), 1);
    std::fs::write(path, script)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

pub fn self_signed_certificate(
    domain: &str,
    not_after: OffsetDateTime,
) -> anyhow::Result<(String, String)> {
    let mut params = CertificateParams::new(vec![domain.to_string()])?;
    params
        .distinguished_name
        .push(DnType::OrganizationName, ISSUER_ORGANIZATION);
    params.distinguished_name.push(DnType::CommonName, domain);
    params.not_before = not_after - time::Duration::days(90);
    params.not_after = not_after;
    let key = KeyPair::generate()?;
    let cert = params.self_signed(&key)?;
    Ok((cert.pem(), key.serialize_pem()))
}

fn write_artifact_set(dir: &Path, domain: &str, not_after: OffsetDateTime) -> anyhow::Result<()> {
    let (cert_pem, key_pem) = self_signed_certificate(domain, not_after)?;
    std::fs::write(dir.join("cert.pem"), &cert_pem)?;
    std::fs::write(dir.join("chain.pem"), &cert_pem)?;
    std::fs::write(dir.join("fullchain.pem"), format!("{cert_pem}{cert_pem}"))?;
    std::fs::write(dir.join("privkey.pem"), &key_pem)?;
    Ok(())
}
