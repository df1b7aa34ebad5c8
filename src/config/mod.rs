use crate::config::default::DefaultConfig;
use crate::config::toml::TomlConfiguration;
use crate::time::ParsedDuration;
use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod default;
mod toml;

pub use default::{DEFAULT_CONFIG_FILE, DEFAULT_LISTEN_ADDRESS};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Address the operator web interface binds to
    pub listen_address: SocketAddr,
    /// Directory holding the domain database and the instance lock
    pub data_dir: PathBuf,
    /// Contact address registered with the ACME account
    #[serde(default)]
    pub contact_email: String,
    pub tool: ToolConfiguration,
    #[serde(default)]
    pub monitor: MonitorConfiguration,
}

/// How the external ACME client is invoked, and where it keeps its state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfiguration {
    pub program: PathBuf,
    pub config_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
    #[serde(default = "default::challenge_timeout")]
    pub challenge_timeout: ParsedDuration,
    #[serde(default = "default::completion_timeout")]
    pub completion_timeout: ParsedDuration,
    /// Certificates not found below `config_dir` are looked up here as well
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_live_dir: Option<PathBuf>,
}

impl ToolConfiguration {
    pub fn work_dir(&self) -> PathBuf {
        self.work_dir
            .clone()
            .unwrap_or_else(|| self.config_dir.join("work"))
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.logs_dir
            .clone()
            .unwrap_or_else(|| self.config_dir.join("logs"))
    }

    /// Directory containing one sub-directory of artifacts per domain
    pub fn live_dir(&self) -> PathBuf {
        self.config_dir.join("live")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfiguration {
    /// How often all domains are checked in the background. Zero disables the background refresh.
    pub refresh_interval: ParsedDuration,
    pub check_port: u16,
    pub check_timeout: ParsedDuration,
    /// Check a domain's live certificate right after it was added
    pub check_on_add: bool,
    pub warn_days: i64,
    pub critical_days: i64,
}

impl Default for MonitorConfiguration {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60 * 60).into(),
            check_port: 443,
            check_timeout: Duration::from_secs(10).into(),
            check_on_add: true,
            warn_days: 30,
            critical_days: 7,
        }
    }
}

impl Configuration {
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.monitor.critical_days < 0 || self.monitor.warn_days < self.monitor.critical_days {
            bail!(
                "monitor.warn_days ({}) must be at least monitor.critical_days ({}), and both must not be negative",
                self.monitor.warn_days,
                self.monitor.critical_days
            );
        }
        if self.tool.challenge_timeout.is_zero() || self.tool.completion_timeout.is_zero() {
            bail!("tool.challenge_timeout and tool.completion_timeout must not be zero");
        }
        if self.monitor.check_port == 0 {
            bail!("monitor.check_port must not be zero");
        }
        Ok(())
    }
}

pub trait ConfigBackend {
    fn load<P: AsRef<Path>>(file: P) -> Result<Configuration, anyhow::Error>;
    fn save<P: AsRef<Path>>(config: &Configuration, file: P) -> Result<(), anyhow::Error>;
}

/// Load the configuration file, writing the defaults to it first if it does not exist yet
pub fn load<P: AsRef<Path>>(file: P) -> Result<Configuration, anyhow::Error> {
    let config = if file.as_ref().exists() {
        TomlConfiguration::load(file)?
    } else {
        let default = DefaultConfig::load(&file)?;
        TomlConfiguration::save(&default, &file)?;
        default
    };
    config.validate()?;
    Ok(config)
}

pub fn save<P: AsRef<Path>>(config: &Configuration, file: P) -> Result<(), anyhow::Error> {
    TomlConfiguration::save(config, file)
}
