use crate::Tracker;
use crate::cert::ParsedX509Certificate;
use crate::config::MonitorConfiguration;
use crate::domain::DomainName;
use crate::state::types::{Inspection, InspectionOutcome};
use crate::time::{ParsedDuration, days_until};
use crate::CRATE_NAME;
use anyhow::{Context, anyhow};
use reqwest::redirect::Policy;
use reqwest::tls::TlsInfo;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use strum::{Display, EnumString};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How urgently a certificate needs attention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ExpiryStatus {
    Unknown,
    Expired,
    Critical,
    Warning,
    Ok,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryThresholds {
    pub warn_days: i64,
    pub critical_days: i64,
}

impl Default for ExpiryThresholds {
    fn default() -> Self {
        Self {
            warn_days: 30,
            critical_days: 7,
        }
    }
}

impl From<&MonitorConfiguration> for ExpiryThresholds {
    fn from(config: &MonitorConfiguration) -> Self {
        Self {
            warn_days: config.warn_days,
            critical_days: config.critical_days,
        }
    }
}

impl ExpiryThresholds {
    pub fn classify(&self, days_left: Option<i64>) -> ExpiryStatus {
        match days_left {
            None => ExpiryStatus::Unknown,
            Some(days) if days < 0 => ExpiryStatus::Expired,
            Some(days) if days <= self.critical_days => ExpiryStatus::Critical,
            Some(days) if days <= self.warn_days => ExpiryStatus::Warning,
            Some(_) => ExpiryStatus::Ok,
        }
    }

    /// Days left and status of a certificate expiring at `expires_at`
    pub fn evaluate(
        &self,
        expires_at: Option<OffsetDateTime>,
        now: OffsetDateTime,
    ) -> (Option<i64>, ExpiryStatus) {
        let days_left = expires_at.map(|expires_at| days_until(expires_at, now));
        (days_left, self.classify(days_left))
    }
}

/// Fetches the certificate a domain currently serves over HTTPS
#[derive(Debug, Clone)]
pub struct LiveCheck {
    client: reqwest::Client,
    port: u16,
}

impl LiveCheck {
    pub fn new(port: u16, timeout: ParsedDuration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("{CRATE_NAME}/{}", env!("CARGO_PKG_VERSION")))
            .tls_info(true)
            .redirect(Policy::none())
            .timeout(*timeout)
            .build()
            .context("Building the certificate check HTTP client failed")?;
        Ok(Self { client, port })
    }

    pub fn from_config(config: &MonitorConfiguration) -> anyhow::Result<Self> {
        Self::new(config.check_port, config.check_timeout)
    }

    /// Check `domain`. Failures are reported as an outcome, never as an error.
    pub async fn check(&self, domain: &DomainName) -> InspectionOutcome {
        match self.fetch_certificate(domain).await {
            Ok(inspection) => {
                debug!(
                    "{domain} serves a certificate valid until {}",
                    inspection.expires_at
                );
                InspectionOutcome::Success(inspection)
            }
            Err(e) => {
                let reason = format!("{e:#}");
                info!("Checking the live certificate of {domain} failed: {reason}");
                InspectionOutcome::Failure(reason)
            }
        }
    }

    async fn fetch_certificate(&self, domain: &DomainName) -> anyhow::Result<Inspection> {
        let url = format!("https://{domain}:{}/", self.port);
        let response = self
            .client
            .head(&url)
            .send()
            .await
            .context(format!("Connecting to {url} failed"))?;
        let der = response
            .extensions()
            .get::<TlsInfo>()
            .and_then(TlsInfo::peer_certificate)
            .ok_or_else(|| anyhow!("{url} did not present a certificate"))?;
        let certificate = ParsedX509Certificate::from_der_bytes(der)?;
        Ok((&certificate).into())
    }
}

/// Check every tracked domain every `interval` until `cancel` fires
pub fn spawn_refresh_task(
    tracker: Arc<Mutex<Tracker>>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately, domains were just loaded
        ticker.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let tracker = tracker.lock().await;
            match tracker.refresh_all().await {
                Ok(records) => debug!("Background refresh checked {} domains", records.len()),
                Err(e) => warn!("Background refresh failed: {e:#}"),
            }
        }
        debug!("Background refresh stopped");
    })
}
