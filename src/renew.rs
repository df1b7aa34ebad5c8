use crate::cert::CertificateInspector;
use crate::domain::DomainName;
use crate::error::{Error, TrackerResult};
use crate::state::types::Inspection;
use crate::time::current_time_truncated;
use crate::tool::{AcmeTool, HttpChallenge, ToolSession};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{info, warn};

/// Where a domain stands in its renewal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RenewalState {
    Idle,
    ChallengeIssued {
        file_name: String,
        file_content: String,
        #[serde(with = "time::serde::rfc3339")]
        since: OffsetDateTime,
    },
    Completed {
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
    },
    Failed {
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
        reason: String,
    },
}

impl RenewalState {
    pub fn is_pending(&self) -> bool {
        matches!(self, RenewalState::ChallengeIssued { .. })
    }
}

#[derive(Debug)]
enum Entry {
    Pending {
        challenge: HttpChallenge,
        session: Box<dyn ToolSession>,
        since: OffsetDateTime,
    },
    Completed {
        at: OffsetDateTime,
    },
    Failed {
        at: OffsetDateTime,
        reason: String,
    },
}

impl From<&Entry> for RenewalState {
    fn from(entry: &Entry) -> Self {
        match entry {
            Entry::Pending {
                challenge, since, ..
            } => RenewalState::ChallengeIssued {
                file_name: challenge.file_name.clone(),
                file_content: challenge.file_content.clone(),
                since: *since,
            },
            Entry::Completed { at } => RenewalState::Completed { at: *at },
            Entry::Failed { at, reason } => RenewalState::Failed {
                at: *at,
                reason: reason.clone(),
            },
        }
    }
}

/// Runs renewals one domain at a time, keeping each domain's waiting client until the operator
/// confirms the challenge file is published.
#[derive(Debug)]
pub struct RenewalOrchestrator {
    tool: Arc<dyn AcmeTool>,
    inspector: CertificateInspector,
    entries: HashMap<DomainName, Entry>,
}

impl RenewalOrchestrator {
    pub fn new(tool: Arc<dyn AcmeTool>, inspector: CertificateInspector) -> Self {
        Self {
            tool,
            inspector,
            entries: HashMap::new(),
        }
    }

    pub fn state(&self, domain: &DomainName) -> RenewalState {
        self.entries
            .get(domain)
            .map_or(RenewalState::Idle, RenewalState::from)
    }

    pub fn pending_challenge(&self, domain: &DomainName) -> Option<&HttpChallenge> {
        match self.entries.get(domain) {
            Some(Entry::Pending { challenge, .. }) => Some(challenge),
            _ => None,
        }
    }

    /// Launch the ACME client for `domain` and return the challenge it wants published
    pub async fn start(&mut self, domain: &DomainName) -> TrackerResult<HttpChallenge> {
        if let Some(Entry::Pending { .. }) = self.entries.get(domain) {
            return Err(Error::RenewalConflict(domain.clone()));
        }
        match self.tool.begin(domain).await {
            Ok(pending) => {
                info!(
                    "Publish {} for {domain}, then confirm the renewal",
                    pending.challenge.path()
                );
                let challenge = pending.challenge.clone();
                self.entries.insert(
                    domain.clone(),
                    Entry::Pending {
                        challenge: pending.challenge,
                        session: pending.session,
                        since: current_time_truncated(),
                    },
                );
                Ok(challenge)
            }
            Err(e) => {
                let reason = e.to_string();
                warn!("Starting the renewal of {domain} failed: {reason}");
                self.fail(domain, reason.clone());
                Err(Error::ToolInvocation(reason))
            }
        }
    }

    /// Let the waiting client validate the challenge, then read the new certificate
    pub async fn complete(&mut self, domain: &DomainName) -> TrackerResult<Inspection> {
        let session = match self.entries.remove(domain) {
            Some(Entry::Pending { session, .. }) => session,
            other => {
                if let Some(entry) = other {
                    self.entries.insert(domain.clone(), entry);
                }
                return Err(Error::NoPendingRenewal(domain.clone()));
            }
        };
        let report = match session.proceed().await {
            Ok(report) => report,
            Err(e) => {
                let reason = e.to_string();
                self.fail(domain, reason.clone());
                return Err(Error::ToolInvocation(reason));
            }
        };
        if !report.success {
            let reason = report.to_string();
            self.fail(domain, reason.clone());
            return Err(Error::ToolValidation(reason));
        }
        match self.inspector.inspect(domain).await {
            Ok(inspection) => {
                info!(
                    "Renewed certificate of {domain}, valid until {}",
                    inspection.expires_at
                );
                self.entries.insert(
                    domain.clone(),
                    Entry::Completed {
                        at: current_time_truncated(),
                    },
                );
                Ok(inspection)
            }
            Err(e) => {
                self.fail(domain, e.to_string());
                Err(e)
            }
        }
    }

    /// Kill a waiting client. Returns whether there was one.
    pub async fn cancel(&mut self, domain: &DomainName) -> bool {
        match self.entries.remove(domain) {
            Some(Entry::Pending { session, .. }) => {
                info!("Cancelling the pending renewal of {domain}");
                session.abort().await;
                true
            }
            Some(other) => {
                self.entries.insert(domain.clone(), other);
                false
            }
            None => false,
        }
    }

    /// Drop everything known about `domain`, killing a waiting client
    pub async fn forget(&mut self, domain: &DomainName) {
        self.cancel(domain).await;
        self.entries.remove(domain);
    }

    /// Kill every waiting client
    pub async fn shutdown(&mut self) {
        for (domain, entry) in self.entries.drain() {
            if let Entry::Pending { session, .. } = entry {
                info!("Aborting the pending renewal of {domain}");
                session.abort().await;
            }
        }
    }

    fn fail(&mut self, domain: &DomainName, reason: String) {
        self.entries.insert(
            domain.clone(),
            Entry::Failed {
                at: current_time_truncated(),
                reason,
            },
        );
    }
}
