use crate::artifact::{Artifact, ArtifactKind, ArtifactStore, CertificateLayout};
use crate::cert::CertificateInspector;
use crate::config::Configuration;
use crate::domain::DomainName;
use crate::error::TrackerResult;
use crate::monitor::{ExpiryStatus, ExpiryThresholds, LiveCheck};
use crate::renew::{RenewalOrchestrator, RenewalState};
use crate::state::types::{DomainRecord, Inspection, InspectionOutcome};
use crate::state::{DATABASE_FILE, Database, InstanceLock};
use crate::time::current_time_truncated;
use crate::tool::{AcmeTool, Certbot, HttpChallenge};
use anyhow::Context;
use serde::Serialize;
use std::sync::Arc;
use ::time::OffsetDateTime;
use tracing::{debug, info};

pub mod artifact;
pub mod cert;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod interactive;
pub mod monitor;
pub mod renew;
pub mod state;
pub mod time;
pub mod tool;
pub mod web;

#[cfg(test)]
mod test_support;

pub use error::Error;

pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");

/// A tracked domain as presented to the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainOverview {
    #[serde(flatten)]
    pub record: DomainRecord,
    pub days_until_expiry: Option<i64>,
    pub status: ExpiryStatus,
    pub renewal: RenewalState,
    /// Artifact files that can currently be downloaded
    pub artifacts: Vec<ArtifactKind>,
}

/// Everything the operator can do, over one data directory
#[derive(Debug)]
pub struct Tracker {
    config: Configuration,
    store: Database,
    inspector: CertificateInspector,
    live: LiveCheck,
    thresholds: ExpiryThresholds,
    artifacts: ArtifactStore,
    renewals: RenewalOrchestrator,
    _lock: Option<InstanceLock>,
}

impl Tracker {
    /// Take ownership of the configured data directory and open its database
    pub async fn open(config: Configuration) -> anyhow::Result<Self> {
        let data_dir = &config.data_dir;
        tokio::fs::create_dir_all(data_dir).await.context(format!(
            "Creating data directory {} failed",
            data_dir.display()
        ))?;
        let lock = InstanceLock::acquire(data_dir).await?;
        let store = Database::open(data_dir, DATABASE_FILE)
            .await
            .context("Opening the domain database failed")?;
        let tool = Arc::new(Certbot::from_config(&config));
        let mut tracker = Self::with_parts(config, store, tool)?;
        tracker._lock = Some(lock);
        Ok(tracker)
    }

    /// Assemble a tracker from an already opened store and any ACME client
    pub fn with_parts(
        config: Configuration,
        store: Database,
        tool: Arc<dyn AcmeTool>,
    ) -> anyhow::Result<Self> {
        let layout = CertificateLayout::from_config(&config.tool);
        let inspector = CertificateInspector::new(layout.clone());
        Ok(Self {
            live: LiveCheck::from_config(&config.monitor)?,
            thresholds: ExpiryThresholds::from(&config.monitor),
            artifacts: ArtifactStore::new(layout),
            renewals: RenewalOrchestrator::new(tool, inspector.clone()),
            inspector,
            store,
            config,
            _lock: None,
        })
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    fn overview(&self, record: DomainRecord, now: OffsetDateTime) -> DomainOverview {
        let (days_until_expiry, status) = self.thresholds.evaluate(record.expires_at, now);
        DomainOverview {
            days_until_expiry,
            status,
            renewal: self.renewals.state(&record.name),
            artifacts: self.artifacts.available(&record.name),
            record,
        }
    }

    /// Start tracking a domain, checking its live certificate right away if configured to
    pub async fn add_domain(&self, name: &str, notes: Option<&str>) -> TrackerResult<DomainOverview> {
        let name: DomainName = name.parse()?;
        let record = self
            .store
            .add_domain(&name, normalize_notes(notes), current_time_truncated())
            .await?;
        info!("Now tracking {name}");
        if self.config.monitor.check_on_add {
            self.refresh(&name).await
        } else {
            Ok(self.overview(record, OffsetDateTime::now_utc()))
        }
    }

    pub async fn list_domains(&self) -> TrackerResult<Vec<DomainOverview>> {
        let now = OffsetDateTime::now_utc();
        let records = self.store.list_domains().await?;
        Ok(records
            .into_iter()
            .map(|record| self.overview(record, now))
            .collect())
    }

    pub async fn get_domain(&self, name: &DomainName) -> TrackerResult<DomainOverview> {
        let record = self.store.get_domain(name).await?;
        Ok(self.overview(record, OffsetDateTime::now_utc()))
    }

    /// Stop tracking a domain. A renewal waiting for its challenge is killed.
    pub async fn remove_domain(&mut self, name: &DomainName) -> TrackerResult<()> {
        self.store.remove_domain(name).await?;
        self.renewals.forget(name).await;
        info!("Stopped tracking {name}");
        Ok(())
    }

    pub async fn set_notes(
        &self,
        name: &DomainName,
        notes: Option<&str>,
    ) -> TrackerResult<DomainOverview> {
        let record = self.store.set_notes(name, normalize_notes(notes)).await?;
        Ok(self.overview(record, OffsetDateTime::now_utc()))
    }

    /// Read the certificate the ACME client stored for a tracked domain
    pub async fn inspect(&self, name: &DomainName) -> TrackerResult<Inspection> {
        self.store.get_domain(name).await?;
        self.inspector.inspect(name).await
    }

    /// Check the certificate a domain serves right now and record the result
    pub async fn refresh(&self, name: &DomainName) -> TrackerResult<DomainOverview> {
        self.store.get_domain(name).await?;
        let outcome = self.live.check(name).await;
        let record = self
            .store
            .record_inspection(name, &outcome, current_time_truncated())
            .await?;
        Ok(self.overview(record, OffsetDateTime::now_utc()))
    }

    /// Refresh every tracked domain, one after another
    pub async fn refresh_all(&self) -> TrackerResult<Vec<DomainOverview>> {
        let records = self.store.list_domains().await?;
        let mut refreshed = Vec::with_capacity(records.len());
        for record in records {
            refreshed.push(self.refresh(&record.name).await?);
        }
        debug!("Refreshed {} domains", refreshed.len());
        Ok(refreshed)
    }

    /// Launch the ACME client for a tracked domain and return the challenge to publish
    pub async fn start_renewal(&mut self, name: &DomainName) -> TrackerResult<HttpChallenge> {
        self.store.get_domain(name).await?;
        self.renewals.start(name).await
    }

    /// Confirm the challenge file is published and finish the renewal
    pub async fn complete_renewal(&mut self, name: &DomainName) -> TrackerResult<DomainOverview> {
        let inspection = self.renewals.complete(name).await?;
        let record = self
            .store
            .record_inspection(
                name,
                &InspectionOutcome::Success(inspection),
                current_time_truncated(),
            )
            .await?;
        Ok(self.overview(record, OffsetDateTime::now_utc()))
    }

    /// Kill a renewal waiting for its challenge. Returns whether there was one.
    pub async fn cancel_renewal(&mut self, name: &DomainName) -> TrackerResult<bool> {
        self.store.get_domain(name).await?;
        Ok(self.renewals.cancel(name).await)
    }

    pub fn pending_challenge(&self, name: &DomainName) -> Option<&HttpChallenge> {
        self.renewals.pending_challenge(name)
    }

    pub fn renewal_state(&self, name: &DomainName) -> RenewalState {
        self.renewals.state(name)
    }

    /// Fetch an artifact file of a tracked domain
    pub async fn download(&self, name: &DomainName, kind: ArtifactKind) -> TrackerResult<Artifact> {
        self.store.get_domain(name).await?;
        self.artifacts.download(name, kind).await
    }

    /// Kill pending renewals and close the database
    pub async fn close(&mut self) {
        self.renewals.shutdown().await;
        self.store.close().await;
    }
}

fn normalize_notes(notes: Option<&str>) -> Option<&str> {
    notes.map(str::trim).filter(|notes| !notes.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MonitorConfiguration, ToolConfiguration};
    use crate::error::Error;
    use crate::state::open_test_db;
    use crate::test_support::{FakeBehavior, FakeTool, write_artifacts};
    use std::path::Path;
    use tempfile::TempDir;
    use test_log::test;

    fn test_config(base: &Path) -> Configuration {
        Configuration {
            listen_address: "127.0.0.1:0".parse().unwrap(),
            data_dir: base.join("data"),
            contact_email: String::new(),
            tool: ToolConfiguration {
                program: base.join("certbot"),
                config_dir: base.join("certs"),
                work_dir: None,
                logs_dir: None,
                extra_args: vec![],
                challenge_timeout: 5u64.into(),
                completion_timeout: 5u64.into(),
                secondary_live_dir: None,
            },
            monitor: MonitorConfiguration {
                check_on_add: false,
                ..MonitorConfiguration::default()
            },
        }
    }

    async fn tracker(behavior: FakeBehavior) -> (Tracker, FakeTool, TempDir) {
        let base = tempfile::tempdir().unwrap();
        let config = test_config(base.path());
        let tool = FakeTool::new(behavior, &config.tool.live_dir());
        let tracker =
            Tracker::with_parts(config, open_test_db().await.into(), Arc::new(tool.clone()))
                .unwrap();
        (tracker, tool, base)
    }

    fn name(raw: &str) -> DomainName {
        raw.parse().unwrap()
    }

    #[test(tokio::test)]
    async fn test_add_normalizes_and_rejects_duplicates() {
        let (tracker, _tool, _base) = tracker(FakeBehavior::Succeed).await;

        let added = tracker
            .add_domain("  Example.COM ", Some("  "))
            .await
            .unwrap();
        let duplicate = tracker.add_domain("example.com", None).await;

        assert_eq!(added.record.name.as_str(), "example.com");
        assert_eq!(added.record.notes, None);
        assert_eq!(added.status, ExpiryStatus::Unknown);
        assert_eq!(added.renewal, RenewalState::Idle);
        assert!(matches!(duplicate, Err(Error::DuplicateDomain(_))));
        assert_eq!(tracker.list_domains().await.unwrap().len(), 1);
    }

    #[test(tokio::test)]
    async fn test_invalid_name_is_rejected() {
        let (tracker, _tool, _base) = tracker(FakeBehavior::Succeed).await;

        let result = tracker.add_domain("exa mple.com", None).await;

        assert!(matches!(result, Err(Error::InvalidDomain { .. })));
    }

    #[test(tokio::test)]
    async fn test_remove_unknown_domain() {
        let (mut tracker, _tool, _base) = tracker(FakeBehavior::Succeed).await;

        let result = tracker.remove_domain(&name("example.com")).await;

        assert!(matches!(result, Err(Error::DomainNotFound(_))));
    }

    #[test(tokio::test)]
    async fn test_renewal_of_untracked_domain() {
        let (mut tracker, tool, _base) = tracker(FakeBehavior::Succeed).await;

        let result = tracker.start_renewal(&name("example.com")).await;

        assert!(matches!(result, Err(Error::DomainNotFound(_))));
        assert_eq!(tool.started(), 0);
    }

    #[test(tokio::test)]
    async fn test_full_renewal_refreshes_expiry() {
        let (mut tracker, _tool, _base) = tracker(FakeBehavior::Succeed).await;
        let domain = name("example.com");
        tracker.add_domain("example.com", None).await.unwrap();

        let challenge = tracker.start_renewal(&domain).await.unwrap();
        assert_eq!(challenge.file_name, "abc");
        assert_eq!(challenge.file_content, "token.thumb");
        assert!(tracker.get_domain(&domain).await.unwrap().renewal.is_pending());
        let completed = tracker.complete_renewal(&domain).await.unwrap();

        assert!(completed.record.expires_at.is_some());
        assert_eq!(completed.days_until_expiry, Some(89));
        assert_eq!(completed.status, ExpiryStatus::Ok);
        assert_eq!(completed.artifacts.len(), 4);
        let listed = tracker.list_domains().await.unwrap();
        assert_eq!(listed[0].record.expires_at, completed.record.expires_at);
        let fullchain = tracker
            .download(&domain, ArtifactKind::Fullchain)
            .await
            .unwrap();
        assert!(!fullchain.bytes.is_empty());
        assert_eq!(fullchain.file_name, "example_com_fullchain.crt");
    }

    #[test(tokio::test)]
    async fn test_remove_cancels_pending_renewal() {
        let (mut tracker, tool, _base) = tracker(FakeBehavior::Succeed).await;
        let domain = name("example.com");
        tracker.add_domain("example.com", None).await.unwrap();
        tracker.start_renewal(&domain).await.unwrap();

        tracker.remove_domain(&domain).await.unwrap();

        assert_eq!(tool.aborted(), 1);
        assert_eq!(tracker.renewal_state(&domain), RenewalState::Idle);
        assert!(tracker.pending_challenge(&domain).is_none());
    }

    #[test(tokio::test)]
    async fn test_download_requires_tracked_domain_and_file() {
        let (tracker, _tool, _base) = tracker(FakeBehavior::Succeed).await;
        let domain = name("example.com");
        write_artifacts(
            &tracker.config().tool.live_dir(),
            "example.com",
            OffsetDateTime::now_utc(),
        )
        .unwrap();

        let untracked = tracker.download(&domain, ArtifactKind::Cert).await;
        assert!(matches!(untracked, Err(Error::DomainNotFound(_))));

        tracker.add_domain("example.com", None).await.unwrap();
        std::fs::remove_file(tracker.config().tool.live_dir().join("example.com/chain.pem"))
            .unwrap();
        let missing = tracker.download(&domain, ArtifactKind::CaBundle).await;
        assert!(matches!(missing, Err(Error::ArtifactNotFound { .. })));
        assert!(tracker.download(&domain, ArtifactKind::Key).await.is_ok());
    }

    #[test(tokio::test)]
    async fn test_notes() {
        let (tracker, _tool, _base) = tracker(FakeBehavior::Succeed).await;
        let domain = name("example.com");
        tracker.add_domain("example.com", Some("first")).await.unwrap();

        let updated = tracker.set_notes(&domain, Some(" second ")).await.unwrap();

        assert_eq!(updated.record.notes.as_deref(), Some("second"));
    }
}
