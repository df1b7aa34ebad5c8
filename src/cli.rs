use crate::artifact::ArtifactKind;
use crate::time::parse_duration;
use clap::{Args, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Args, Default)]
pub struct ServeCommand {
    /// Address to serve the web interface on, overrides `listen_address` of the configuration
    #[clap(short, long, env = "CERTWATCH_LISTEN")]
    pub listen: Option<SocketAddr>,
    /// How often to check all live certificates, e.g. `30m`. `0s` disables background checks
    #[clap(long, value_parser = parse_duration)]
    pub refresh_interval: Option<Duration>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum DomainCommand {
    /// Start tracking a domain
    Add {
        domain: String,
        /// Free-form notes shown next to the domain
        #[clap(short, long)]
        notes: Option<String>,
    },
    /// List tracked domains and their certificate status
    List {
        /// Print JSON instead of a table
        #[clap(long, action)]
        json: bool,
    },
    /// Stop tracking a domain
    Remove { domain: String },
    /// Replace the notes of a domain. Omit the notes to clear them
    Notes {
        domain: String,
        notes: Option<String>,
    },
}

#[derive(Debug, Clone, Args)]
pub struct RenewCommand {
    /// The domain to issue a new certificate for
    pub domain: String,
}

#[derive(Debug, Clone, Args)]
pub struct DownloadCommand {
    pub domain: String,
    /// One of cert, fullchain, cabundle (or chain) and key
    pub kind: ArtifactKind,
    /// Where to write the file, `-` for standard output. Defaults to the suggested file name
    #[clap(short, long)]
    pub output: Option<PathBuf>,
}
