#![cfg(unix)]

use crate::common::{
    CHALLENGE_CONTENT, CHALLENGE_FILE_NAME, FakeCertbotMode, ISSUER_ORGANIZATION, REJECTION,
    TestEnvironment,
};
use certwatch::artifact::ArtifactKind;
use certwatch::domain::DomainName;
use certwatch::monitor::ExpiryStatus;
use certwatch::renew::RenewalState;
use certwatch::{Error, Tracker};
use test_log::test;
use time::{Duration, OffsetDateTime};

mod common;

const DOMAIN: &str = "example.com";

fn domain() -> DomainName {
    DOMAIN.parse().unwrap()
}

async fn tracker_with_domain(env: &TestEnvironment) -> anyhow::Result<Tracker> {
    let tracker = Tracker::open(env.config.clone()).await?;
    tracker.add_domain(DOMAIN, Some("web frontend")).await?;
    Ok(tracker)
}

#[test(tokio::test)]
async fn test_renewal_installs_new_certificate() -> anyhow::Result<()> {
    let env = TestEnvironment::new(FakeCertbotMode::Success)?;
    let not_after = OffsetDateTime::now_utc() + Duration::days(90);
    env.prepare_certificate(DOMAIN, not_after)?;
    let mut tracker = tracker_with_domain(&env).await?;

    let challenge = tracker.start_renewal(&domain()).await?;
    assert_eq!(challenge.file_name, CHALLENGE_FILE_NAME);
    assert_eq!(challenge.file_content, CHALLENGE_CONTENT);
    assert_eq!(
        challenge.path(),
        format!("/.well-known/acme-challenge/{CHALLENGE_FILE_NAME}")
    );
    assert!(tracker.renewal_state(&domain()).is_pending());
    assert_eq!(tracker.pending_challenge(&domain()), Some(&challenge));

    let renewed = tracker.complete_renewal(&domain()).await?;

    assert_eq!(renewed.days_until_expiry, Some(89));
    assert_eq!(renewed.status, ExpiryStatus::Ok);
    assert_eq!(renewed.record.issuer.as_deref(), Some(ISSUER_ORGANIZATION));
    assert_eq!(renewed.record.subject_names, vec![DOMAIN.to_string()]);
    assert_eq!(renewed.record.notes.as_deref(), Some("web frontend"));
    assert!(renewed.record.last_error.is_none());
    assert!(matches!(renewed.renewal, RenewalState::Completed { .. }));
    assert_eq!(renewed.artifacts.len(), 4);
    assert!(tracker.pending_challenge(&domain()).is_none());

    let listed = tracker.list_domains().await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].record.expires_at, renewed.record.expires_at);
    assert!(listed[0].record.last_checked_at.is_some());

    let fullchain = tracker.download(&domain(), ArtifactKind::Fullchain).await?;
    assert_eq!(fullchain.bytes, std::fs::read(env.issued_file("fullchain.pem"))?);
    assert_eq!(fullchain.file_name, "example_com_fullchain.crt");

    let inspection = tracker.inspect(&domain()).await?;
    assert_eq!(inspection.expires_at.unix_timestamp(), not_after.unix_timestamp());

    tracker.close().await;
    Ok(())
}

#[test(tokio::test)]
async fn test_rejected_validation_reports_tool_output() -> anyhow::Result<()> {
    let env = TestEnvironment::new(FakeCertbotMode::Reject)?;
    let mut tracker = tracker_with_domain(&env).await?;

    tracker.start_renewal(&domain()).await?;
    let result = tracker.complete_renewal(&domain()).await;

    match result {
        Err(Error::ToolValidation(message)) => assert_eq!(message, REJECTION),
        other => panic!("Expected a validation failure, got {other:?}"),
    }
    match tracker.renewal_state(&domain()) {
        RenewalState::Failed { reason, .. } => assert_eq!(reason, REJECTION),
        other => panic!("Expected the renewal to be marked failed, got {other:?}"),
    }
    let record = tracker.get_domain(&domain()).await?;
    assert!(record.record.expires_at.is_none());
    assert!(record.artifacts.is_empty());

    let retry = tracker.start_renewal(&domain()).await?;
    assert_eq!(retry.file_name, CHALLENGE_FILE_NAME);

    tracker.close().await;
    Ok(())
}

#[test(tokio::test)]
async fn test_client_crash_before_challenge() -> anyhow::Result<()> {
    let env = TestEnvironment::new(FakeCertbotMode::Crash)?;
    let mut tracker = tracker_with_domain(&env).await?;

    let result = tracker.start_renewal(&domain()).await;

    match result {
        Err(Error::ToolInvocation(message)) => {
            assert!(message.contains("lacks sufficient authorization"), "{message}");
        }
        other => panic!("Expected an invocation failure, got {other:?}"),
    }
    assert!(matches!(
        tracker.renewal_state(&domain()),
        RenewalState::Failed { .. }
    ));
    // A failed attempt does not block the next one
    assert!(matches!(
        tracker.start_renewal(&domain()).await,
        Err(Error::ToolInvocation(_))
    ));

    tracker.close().await;
    Ok(())
}

#[test(tokio::test)]
async fn test_silent_client_times_out() -> anyhow::Result<()> {
    let mut env = TestEnvironment::new(FakeCertbotMode::Silent)?;
    env.config.tool.challenge_timeout = 1u64.into();
    let mut tracker = tracker_with_domain(&env).await?;

    let started = std::time::Instant::now();
    let result = tracker.start_renewal(&domain()).await;

    assert!(matches!(result, Err(Error::ToolInvocation(_))), "{result:?}");
    assert!(started.elapsed() < std::time::Duration::from_secs(10));
    assert!(!tracker.renewal_state(&domain()).is_pending());

    tracker.close().await;
    Ok(())
}

#[test(tokio::test)]
async fn test_client_hanging_after_confirmation_times_out() -> anyhow::Result<()> {
    let mut env = TestEnvironment::new(FakeCertbotMode::Hang)?;
    env.config.tool.completion_timeout = 1u64.into();
    let mut tracker = tracker_with_domain(&env).await?;
    tracker.start_renewal(&domain()).await?;

    let started = std::time::Instant::now();
    let result = tracker.complete_renewal(&domain()).await;

    assert!(matches!(result, Err(Error::ToolInvocation(_))), "{result:?}");
    assert!(started.elapsed() < std::time::Duration::from_secs(10));
    assert!(matches!(
        tracker.renewal_state(&domain()),
        RenewalState::Failed { .. }
    ));
    assert!(tracker.get_domain(&domain()).await?.record.expires_at.is_none());

    tracker.close().await;
    Ok(())
}

#[test(tokio::test)]
async fn test_second_renewal_conflicts_until_cancelled() -> anyhow::Result<()> {
    let env = TestEnvironment::new(FakeCertbotMode::Success)?;
    let mut tracker = tracker_with_domain(&env).await?;

    let first = tracker.start_renewal(&domain()).await?;
    let second = tracker.start_renewal(&domain()).await;

    assert!(matches!(second, Err(Error::RenewalConflict(_))));
    assert_eq!(tracker.pending_challenge(&domain()), Some(&first));

    assert!(tracker.cancel_renewal(&domain()).await?);
    assert!(!tracker.cancel_renewal(&domain()).await?);
    assert!(matches!(
        tracker.complete_renewal(&domain()).await,
        Err(Error::NoPendingRenewal(_))
    ));

    tracker.close().await;
    Ok(())
}

#[test(tokio::test)]
async fn test_success_without_certificate_is_a_failure() -> anyhow::Result<()> {
    let env = TestEnvironment::new(FakeCertbotMode::NoCertificate)?;
    let mut tracker = tracker_with_domain(&env).await?;

    tracker.start_renewal(&domain()).await?;
    let result = tracker.complete_renewal(&domain()).await;

    assert!(
        matches!(result, Err(Error::MissingCertificate { .. })),
        "{result:?}"
    );
    assert!(matches!(
        tracker.renewal_state(&domain()),
        RenewalState::Failed { .. }
    ));

    tracker.close().await;
    Ok(())
}

#[test(tokio::test)]
async fn test_untracked_domain_cannot_be_renewed() -> anyhow::Result<()> {
    let env = TestEnvironment::new(FakeCertbotMode::Success)?;
    let mut tracker = Tracker::open(env.config.clone()).await?;

    let result = tracker.start_renewal(&domain()).await;

    assert!(matches!(result, Err(Error::DomainNotFound(_))));
    tracker.close().await;
    Ok(())
}

#[test(tokio::test)]
async fn test_removing_domain_kills_pending_renewal() -> anyhow::Result<()> {
    let env = TestEnvironment::new(FakeCertbotMode::Success)?;
    let mut tracker = tracker_with_domain(&env).await?;

    tracker.start_renewal(&domain()).await?;
    tracker.remove_domain(&domain()).await?;

    assert!(tracker.pending_challenge(&domain()).is_none());
    assert!(matches!(
        tracker.renewal_state(&domain()),
        RenewalState::Idle
    ));
    assert!(tracker.list_domains().await?.is_empty());
    tracker.close().await;
    Ok(())
}

#[test(tokio::test)]
async fn test_second_instance_is_refused() -> anyhow::Result<()> {
    let env = TestEnvironment::new(FakeCertbotMode::Success)?;
    let mut tracker = Tracker::open(env.config.clone()).await?;

    let second = Tracker::open(env.config.clone()).await;

    assert!(second.is_err());
    tracker.close().await;
    Ok(())
}

#[test(tokio::test)]
async fn test_existing_certificate_is_inspected() -> anyhow::Result<()> {
    let env = TestEnvironment::new(FakeCertbotMode::Success)?;
    let not_after = OffsetDateTime::now_utc() + Duration::days(5) + Duration::hours(1);
    env.install_certificate(DOMAIN, not_after)?;
    let mut tracker = tracker_with_domain(&env).await?;

    let inspection = tracker.inspect(&domain()).await?;
    let overview = tracker.get_domain(&domain()).await?;

    assert_eq!(inspection.issuer.as_deref(), Some(ISSUER_ORGANIZATION));
    assert_eq!(inspection.subject_names, vec![DOMAIN.to_string()]);
    assert_eq!(overview.artifacts.len(), 4);
    // Inspecting does not change what the live check recorded
    assert_eq!(overview.status, ExpiryStatus::Unknown);
    tracker.close().await;
    Ok(())
}
