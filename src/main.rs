use anyhow::Context;
use certwatch::artifact::ArtifactKind;
use certwatch::cli::{DomainCommand, DownloadCommand, RenewCommand, ServeCommand};
use certwatch::config::{Configuration, DEFAULT_CONFIG_FILE};
use certwatch::domain::DomainName;
use certwatch::interactive::InteractiveRenewal;
use certwatch::monitor::spawn_refresh_task;
use certwatch::time::humanize_duration;
use certwatch::{CRATE_NAME, DomainOverview, Tracker, config, web};
use clap::{Parser, Subcommand};
use crossterm::style::Stylize;
use itertools::Itertools;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const ENV_FILTER_NAME: &str = "CERTWATCH_LOG";

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct CommandLineArguments {
    /// Path to the configuration file. It is created with default settings if it does not exist
    #[arg(short, long, env = "CERTWATCH_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Directory for the domain database, overrides `data_dir` of the configuration
    #[arg(long, env = "CERTWATCH_DATA")]
    data_dir: Option<PathBuf>,
    /// Contact address for the ACME account, overrides `contact_email` of the configuration
    #[arg(long, env = "CERTWATCH_EMAIL")]
    email: Option<String>,
    #[command(subcommand)]
    command: Option<Command>,
    /// Shorthand option to enable debug logging (logging can be fine-tuned via `CERTWATCH_LOG` environment variable)
    #[clap(long, short, action)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the web interface (default)
    Serve(ServeCommand),
    /// Add, list or remove tracked domains
    #[command(subcommand)]
    Domain(DomainCommand),
    /// Show the certificate the ACME client stored for a domain
    Inspect { domain: String },
    /// Check the live certificate of one or all domains
    Refresh { domain: Option<String> },
    /// Renew a domain's certificate, answering the HTTP-01 challenge by hand
    Renew(RenewCommand),
    /// Save a certificate or key file of a domain
    Download(DownloadCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CommandLineArguments::parse();
    let filter = EnvFilter::try_from_env(ENV_FILTER_NAME).unwrap_or_else(|_| {
        EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| {
            EnvFilter::new(if cli.verbose {
                "certwatch=debug,info"
            } else {
                "info"
            })
        })
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = config::load(&cli.config).context(format!(
        "Loading configuration {} failed",
        cli.config.display()
    ))?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(email) = cli.email {
        config.contact_email = email;
    }
    config.validate()?;

    match cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeCommand::default()))
    {
        Command::Serve(serve) => run_server(config, serve).await,
        Command::Domain(command) => {
            let mut tracker = Tracker::open(config).await?;
            let result = run_domain_command(&mut tracker, command).await;
            tracker.close().await;
            result
        }
        Command::Inspect { domain } => {
            let mut tracker = Tracker::open(config).await?;
            let result = inspect(&tracker, &domain).await;
            tracker.close().await;
            result
        }
        Command::Refresh { domain } => {
            let mut tracker = Tracker::open(config).await?;
            let result = refresh(&tracker, domain.as_deref()).await;
            tracker.close().await;
            result
        }
        Command::Renew(renew) => {
            let domain: DomainName = renew.domain.parse()?;
            let mut tracker = Tracker::open(config).await?;
            let result = InteractiveRenewal::new(&mut tracker).run(&domain).await;
            tracker.close().await;
            result
        }
        Command::Download(download) => {
            let mut tracker = Tracker::open(config).await?;
            let result = save_artifact(&tracker, download).await;
            tracker.close().await;
            result
        }
    }
}

async fn run_server(mut config: Configuration, serve: ServeCommand) -> anyhow::Result<()> {
    if let Some(listen) = serve.listen {
        config.listen_address = listen;
    }
    if let Some(interval) = serve.refresh_interval {
        config.monitor.refresh_interval = interval.into();
    }
    let listener = web::bind(config.listen_address).await?;
    let refresh_interval = config.monitor.refresh_interval;
    let tracker = Arc::new(Mutex::new(Tracker::open(config).await?));
    let cancellation_token = CancellationToken::new();

    let shutdown = cancellation_token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutting down"),
            Err(e) => warn!("Listening for shutdown signal failed: {e}"),
        }
        shutdown.cancel();
    });

    let refresh_task = if refresh_interval.is_zero() {
        info!("Background certificate checks are disabled");
        None
    } else {
        info!("Checking all live certificates every {refresh_interval}");
        Some(spawn_refresh_task(
            tracker.clone(),
            *refresh_interval,
            cancellation_token.clone(),
        ))
    };

    let result = web::serve(listener, tracker.clone(), cancellation_token.clone()).await;
    cancellation_token.cancel();
    if let Some(refresh_task) = refresh_task {
        if let Err(e) = refresh_task.await {
            warn!("Background refresh task failed: {e}");
        }
    }
    tracker.lock().await.close().await;
    result
}

async fn run_domain_command(tracker: &mut Tracker, command: DomainCommand) -> anyhow::Result<()> {
    match command {
        DomainCommand::Add { domain, notes } => {
            let added = tracker.add_domain(&domain, notes.as_deref()).await?;
            println!("Now tracking {}", added.record.name.as_str().green());
            print_domains(std::slice::from_ref(&added));
        }
        DomainCommand::List { json } => {
            let domains = tracker.list_domains().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&domains)?);
            } else if domains.is_empty() {
                println!("No domains tracked yet. Add one with `{CRATE_NAME} domain add <domain>`");
            } else {
                print_domains(&domains);
            }
        }
        DomainCommand::Remove { domain } => {
            let domain: DomainName = domain.parse()?;
            tracker.remove_domain(&domain).await?;
            println!("Stopped tracking {domain}");
        }
        DomainCommand::Notes { domain, notes } => {
            let domain: DomainName = domain.parse()?;
            let updated = tracker.set_notes(&domain, notes.as_deref()).await?;
            print_domains(std::slice::from_ref(&updated));
        }
    }
    Ok(())
}

fn print_domains(domains: &[DomainOverview]) {
    let width = domains
        .iter()
        .map(|domain| domain.record.name.as_str().len())
        .max()
        .unwrap_or_default()
        .max("DOMAIN".len());
    println!(
        "{:<width$}  {:<20}  {:>5}  {:<8}  {:<24}  NOTES",
        "DOMAIN", "EXPIRES", "DAYS", "STATUS", "ISSUER"
    );
    for domain in domains {
        let record = &domain.record;
        let expires = record
            .expires_at
            .map(|expires_at| expires_at.date().to_string())
            .unwrap_or_else(|| "-".to_string());
        let days = domain
            .days_until_expiry
            .map_or_else(|| "-".to_string(), |days| days.to_string());
        println!(
            "{:<width$}  {:<20}  {:>5}  {:<8}  {:<24}  {}",
            record.name.as_str(),
            expires,
            days,
            domain.status.to_string(),
            record.issuer.as_deref().unwrap_or("-"),
            record.notes.as_deref().unwrap_or(""),
        );
        if let Some(error) = &record.last_error {
            println!("{:<width$}  {}", "", format!("last check: {error}").red());
        }
    }
}

async fn inspect(tracker: &Tracker, domain: &str) -> anyhow::Result<()> {
    let domain: DomainName = domain.parse()?;
    let inspection = tracker.inspect(&domain).await?;
    let remaining = inspection.expires_at - time::OffsetDateTime::now_utc();
    println!("Certificate of {}", domain.as_str().green());
    println!("  Expires:  {}", inspection.expires_at);
    if remaining.is_negative() {
        println!("  {}", format!("Expired {} ago", humanize_duration(remaining)).red());
    } else {
        println!("  Expires in {}", humanize_duration(remaining));
    }
    println!(
        "  Issuer:   {}",
        inspection.issuer.as_deref().unwrap_or("unknown")
    );
    println!("  Names:    {}", inspection.subject_names.iter().join(", "));
    Ok(())
}

async fn refresh(tracker: &Tracker, domain: Option<&str>) -> anyhow::Result<()> {
    let refreshed = match domain {
        Some(domain) => vec![tracker.refresh(&domain.parse()?).await?],
        None => tracker.refresh_all().await?,
    };
    print_domains(&refreshed);
    Ok(())
}

async fn save_artifact(tracker: &Tracker, download: DownloadCommand) -> anyhow::Result<()> {
    let domain: DomainName = download.domain.parse()?;
    let artifact = tracker.download(&domain, download.kind).await?;
    let output = download
        .output
        .unwrap_or_else(|| PathBuf::from(&artifact.file_name));
    if output.as_os_str() == "-" {
        std::io::stdout()
            .write_all(&artifact.bytes)
            .context("Writing to standard output failed")?;
        return Ok(());
    }
    tokio::fs::write(&output, &artifact.bytes)
        .await
        .context(format!("Writing {} failed", output.display()))?;
    if download.kind == ArtifactKind::Key {
        warn!(
            "{} contains a private key, keep it safe",
            output.display()
        );
    }
    println!("Saved {}", output.display());
    Ok(())
}
