use crate::config::{Configuration, ToolConfiguration};
use crate::domain::DomainName;
use crate::tool::{
    AcmeTool, PendingIssuance, ProcessSession, ToolCommand, ToolError, ToolEvent,
};
use async_trait::async_trait;
use tracing::{debug, info};

/// certbot in `--manual` mode, answering HTTP-01 challenges through the operator
#[derive(Debug, Clone)]
pub struct Certbot {
    tool: ToolConfiguration,
    contact_email: String,
}

impl Certbot {
    pub fn new(tool: ToolConfiguration, contact_email: String) -> Self {
        Self {
            tool,
            contact_email,
        }
    }

    pub fn from_config(config: &Configuration) -> Self {
        Self::new(config.tool.clone(), config.contact_email.clone())
    }

    /// The certbot invocation for a new certificate for `domain`
    pub fn command(&self, domain: &DomainName) -> ToolCommand {
        let command = ToolCommand::new(&self.tool.program)
            .args([
                "certonly",
                "--manual",
                "--preferred-challenges",
                "http",
                "--agree-tos",
                "--no-eff-email",
            ]);
        let command = if self.contact_email.is_empty() {
            command.arg("--register-unsafely-without-email")
        } else {
            command.arg("--email").arg(&self.contact_email)
        };
        command
            .arg("-d")
            .arg(domain.as_str())
            .arg("--config-dir")
            .arg(&self.tool.config_dir)
            .arg("--work-dir")
            .arg(self.tool.work_dir())
            .arg("--logs-dir")
            .arg(self.tool.logs_dir())
            .args(&self.tool.extra_args)
            // certbot is a Python program, keep its prompt from sitting in a pipe buffer
            .env("PYTHONUNBUFFERED", "1")
    }
}

#[async_trait]
impl AcmeTool for Certbot {
    async fn begin(&self, domain: &DomainName) -> Result<PendingIssuance, ToolError> {
        for dir in [
            self.tool.config_dir.clone(),
            self.tool.work_dir(),
            self.tool.logs_dir(),
        ] {
            tokio::fs::create_dir_all(&dir).await?;
        }
        info!("Requesting a certificate for {domain}");
        let mut process = self.command(domain).spawn()?;
        match process.next_event(*self.tool.challenge_timeout).await {
            Ok(ToolEvent::Challenge(challenge)) => {
                debug!("certbot issued challenge {} for {domain}", challenge.file_name);
                Ok(PendingIssuance {
                    challenge,
                    session: Box::new(ProcessSession::new(
                        process,
                        self.tool.completion_timeout,
                    )),
                })
            }
            Ok(ToolEvent::Exited(report)) => Err(ToolError::Exited(report)),
            Err(e) => {
                process.abort().await;
                Err(e)
            }
        }
    }
}
