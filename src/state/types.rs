use crate::domain::DomainName;
use serde::Serialize;
use time::OffsetDateTime;

/// Row layout of the `domains` table
#[derive(Debug, sqlx::FromRow)]
pub(super) struct DomainRow {
    #[allow(dead_code)]
    pub id: i64,
    pub name: String,
    pub notes: Option<String>,
    pub created_at: OffsetDateTime,
    pub last_checked_at: Option<OffsetDateTime>,
    pub expires_at: Option<OffsetDateTime>,
    pub issuer: Option<String>,
    pub subject_names: Option<String>,
    pub last_error: Option<String>,
}

/// A tracked domain together with what we last learned about its certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainRecord {
    pub name: DomainName,
    pub notes: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_checked_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    pub issuer: Option<String>,
    pub subject_names: Vec<String>,
    pub last_error: Option<String>,
}

impl TryFrom<DomainRow> for DomainRecord {
    type Error = anyhow::Error;

    fn try_from(row: DomainRow) -> Result<Self, Self::Error> {
        Ok(Self {
            name: row.name.parse()?,
            notes: row.notes,
            created_at: row.created_at,
            last_checked_at: row.last_checked_at,
            expires_at: row.expires_at,
            issuer: row.issuer,
            subject_names: row
                .subject_names
                .map(|names| names.lines().map(str::to_string).collect())
                .unwrap_or_default(),
            last_error: row.last_error,
        })
    }
}

/// Certificate details obtained from a file or a live endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    pub expires_at: OffsetDateTime,
    pub issuer: Option<String>,
    pub subject_names: Vec<String>,
}

/// Result of checking a domain's certificate, as recorded in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InspectionOutcome {
    Success(Inspection),
    /// The check failed; previously recorded certificate details are kept
    Failure(String),
}

impl From<Inspection> for InspectionOutcome {
    fn from(inspection: Inspection) -> Self {
        InspectionOutcome::Success(inspection)
    }
}
