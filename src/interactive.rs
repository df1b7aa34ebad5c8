use crate::domain::DomainName;
use crate::error::Error;
use crate::{CRATE_NAME, Tracker};
use anyhow::bail;
use crossterm::style::Stylize;
use inquire::Confirm;
use std::io::IsTerminal;

/// Walks the operator through a renewal on the terminal
pub struct InteractiveRenewal<'a> {
    tracker: &'a mut Tracker,
}

impl<'a> InteractiveRenewal<'a> {
    pub fn new(tracker: &'a mut Tracker) -> Self {
        Self { tracker }
    }

    pub async fn run(self, domain: &DomainName) -> anyhow::Result<()> {
        if !std::io::stdin().is_terminal() {
            bail!(
                "Renewing from the command line needs an interactive terminal. Use `{CRATE_NAME} serve` and the web interface instead"
            );
        }
        println!(
            "{}",
            format!("{CRATE_NAME} certificate renewal for {domain}").green()
        );
        let challenge = self.tracker.start_renewal(domain).await?;
        let url = format!("http://{domain}{}", challenge.path());
        println!();
        println!("Create a file named {}", challenge.file_name.as_str().bold());
        println!("containing exactly:");
        println!();
        println!("    {}", challenge.file_content.as_str().cyan());
        println!();
        println!("and make it available at {}", url.as_str().bold());
        println!();

        let confirmed = Confirm::new("Is the file in place?")
            .with_default(false)
            .with_help_message("Answering no cancels the renewal")
            .prompt_skippable()?
            .unwrap_or(false);
        if !confirmed {
            self.tracker.cancel_renewal(domain).await?;
            println!("{}", "Renewal cancelled".yellow());
            return Ok(());
        }

        match self.tracker.complete_renewal(domain).await {
            Ok(overview) => {
                let days = overview
                    .days_until_expiry
                    .map_or_else(|| "unknown".to_string(), |days| days.to_string());
                println!(
                    "{} The certificate of {domain} is valid for {days} more days. You can remove the challenge file now.",
                    "Success!".green().bold()
                );
                Ok(())
            }
            Err(Error::ToolValidation(text)) => {
                println!("{}", "The ACME client rejected the renewal:".red().bold());
                println!("{text}");
                bail!("Renewal of {domain} failed")
            }
            Err(e) => Err(e.into()),
        }
    }
}
