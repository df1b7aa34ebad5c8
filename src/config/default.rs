use crate::config::{ConfigBackend, Configuration, MonitorConfiguration, ToolConfiguration};
use crate::time::ParsedDuration;
use anyhow::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "certwatch.toml";
pub const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:8080";

pub(super) fn challenge_timeout() -> ParsedDuration {
    Duration::from_secs(60).into()
}

pub(super) fn completion_timeout() -> ParsedDuration {
    Duration::from_secs(120).into()
}

#[derive(Debug, Clone, Default)]
pub struct DefaultConfig {}

impl DefaultConfig {
    #[allow(clippy::missing_panics_doc)]
    pub fn get_config(&self) -> Configuration {
        Configuration {
            listen_address: DEFAULT_LISTEN_ADDRESS.parse().unwrap(/* Infallible */),
            data_dir: PathBuf::from("data"),
            contact_email: String::new(),
            tool: ToolConfiguration {
                program: PathBuf::from("certbot"),
                config_dir: PathBuf::from("certs"),
                work_dir: None,
                logs_dir: None,
                extra_args: vec![],
                challenge_timeout: challenge_timeout(),
                completion_timeout: completion_timeout(),
                secondary_live_dir: Some(PathBuf::from("/etc/letsencrypt/live")),
            },
            monitor: MonitorConfiguration::default(),
        }
    }
}

impl ConfigBackend for DefaultConfig {
    fn load<P: AsRef<Path>>(_file: P) -> Result<Configuration, Error> {
        Ok(Self::default().get_config())
    }

    fn save<P: AsRef<Path>>(_config: &Configuration, _file: P) -> Result<(), Error> {
        unimplemented!("default backend cannot save to file")
    }
}
