use crate::domain::DomainName;
use crate::error::{Error, TrackerResult};
use crate::state::types::{DomainRecord, DomainRow, InspectionOutcome};
use anyhow::{Context, anyhow};
use sqlx::sqlite::SqliteAutoVacuum;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

const DATABASE_TIMEOUT: Duration = Duration::from_secs(60);

/// Persistent set of tracked domains
#[derive(Debug, Clone)]
pub struct Database {
    pool: sqlx::SqlitePool,
}

impl Database {
    pub async fn open<P: AsRef<Path>>(
        base_directory: P,
        database_file_name: &str,
    ) -> anyhow::Result<Database> {
        let mut file = base_directory.as_ref().canonicalize().context(format!(
            "Normalizing database directory path {} failed",
            base_directory.as_ref().display()
        ))?;
        file.push(database_file_name);
        let file_uri = url::Url::from_file_path(&file)
            .map_err(|()| anyhow!("Failed to parse database URI {}", file.display()))?;
        let url = &file_uri.to_string().replacen("file", "sqlite", 1);
        Self::open_url(url).await
    }

    async fn open_url(url: &str) -> anyhow::Result<Database> {
        let connect_options = sqlx::sqlite::SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .auto_vacuum(SqliteAutoVacuum::Incremental)
            .busy_timeout(DATABASE_TIMEOUT)
            .optimize_on_close(true, None);
        let pool_options = sqlx::sqlite::SqlitePoolOptions::new();

        #[cfg(debug_assertions)]
        let connect_options = sqlx::ConnectOptions::log_slow_statements(
            connect_options,
            tracing::log::LevelFilter::Debug,
            Duration::from_millis(500),
        );

        let pool = pool_options.connect_with(connect_options).await?;
        let db = Database { pool };
        super::migration::migrate(&db.pool).await?;
        Ok(db)
    }

    /// Start tracking `name`. Fails without touching the store if it is already tracked.
    pub async fn add_domain(
        &self,
        name: &DomainName,
        notes: Option<&str>,
        created_at: OffsetDateTime,
    ) -> TrackerResult<DomainRecord> {
        let row = sqlx::query_as::<_, DomainRow>(
            "INSERT INTO domains (name, notes, created_at) VALUES ($1, $2, $3) \
            ON CONFLICT(name) DO NOTHING RETURNING *;",
        )
        .bind(name.as_str())
        .bind(notes)
        .bind(created_at)
        .fetch_optional(&self.pool)
        .await
        .context(format!("Inserting domain {name} failed"))?;
        match row {
            Some(row) => Ok(row.try_into()?),
            None => Err(Error::DuplicateDomain(name.clone())),
        }
    }

    pub async fn get_domain(&self, name: &DomainName) -> TrackerResult<DomainRecord> {
        let row = sqlx::query_as::<_, DomainRow>("SELECT * FROM domains WHERE name = $1;")
            .bind(name.as_str())
            .fetch_optional(&self.pool)
            .await
            .context(format!("Loading domain {name} failed"))?
            .ok_or_else(|| Error::DomainNotFound(name.clone()))?;
        Ok(row.try_into()?)
    }

    /// All tracked domains, ordered by name
    pub async fn list_domains(&self) -> TrackerResult<Vec<DomainRecord>> {
        let rows = sqlx::query_as::<_, DomainRow>("SELECT * FROM domains ORDER BY name;")
            .fetch_all(&self.pool)
            .await
            .context("Listing domains failed")?;
        let records = rows
            .into_iter()
            .map(DomainRecord::try_from)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub async fn remove_domain(&self, name: &DomainName) -> TrackerResult<()> {
        let result = sqlx::query("DELETE FROM domains WHERE name = $1;")
            .bind(name.as_str())
            .execute(&self.pool)
            .await
            .context(format!("Removing domain {name} failed"))?;
        if result.rows_affected() == 0 {
            return Err(Error::DomainNotFound(name.clone()));
        }
        Ok(())
    }

    /// Store the result of a certificate check
    pub async fn record_inspection(
        &self,
        name: &DomainName,
        outcome: &InspectionOutcome,
        checked_at: OffsetDateTime,
    ) -> TrackerResult<DomainRecord> {
        let query = match outcome {
            InspectionOutcome::Success(inspection) => sqlx::query_as::<_, DomainRow>(
                "UPDATE domains SET last_checked_at = $2, expires_at = $3, issuer = $4, \
                subject_names = $5, last_error = NULL WHERE name = $1 RETURNING *;",
            )
            .bind(name.as_str())
            .bind(checked_at)
            .bind(inspection.expires_at)
            .bind(inspection.issuer.as_deref())
            .bind(inspection.subject_names.join("\n")),
            InspectionOutcome::Failure(reason) => sqlx::query_as::<_, DomainRow>(
                "UPDATE domains SET last_checked_at = $2, last_error = $3 WHERE name = $1 RETURNING *;",
            )
            .bind(name.as_str())
            .bind(checked_at)
            .bind(reason.as_str()),
        };
        let row = query
            .fetch_optional(&self.pool)
            .await
            .context(format!("Recording certificate check of {name} failed"))?
            .ok_or_else(|| Error::DomainNotFound(name.clone()))?;
        Ok(row.try_into()?)
    }

    pub async fn set_notes(
        &self,
        name: &DomainName,
        notes: Option<&str>,
    ) -> TrackerResult<DomainRecord> {
        let row = sqlx::query_as::<_, DomainRow>(
            "UPDATE domains SET notes = $2 WHERE name = $1 RETURNING *;",
        )
        .bind(name.as_str())
        .bind(notes)
        .fetch_optional(&self.pool)
        .await
        .context(format!("Updating notes of {name} failed"))?
        .ok_or_else(|| Error::DomainNotFound(name.clone()))?;
        Ok(row.try_into()?)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub mod test_helper {
    use crate::state::db::Database;
    use std::ops::{Deref, DerefMut};
    use std::sync::atomic::AtomicUsize;

    pub struct TemporaryDatabase {
        db: Database,
    }

    impl From<TemporaryDatabase> for Database {
        fn from(value: TemporaryDatabase) -> Self {
            value.db
        }
    }

    impl Deref for TemporaryDatabase {
        type Target = Database;

        fn deref(&self) -> &Self::Target {
            &self.db
        }
    }

    impl DerefMut for TemporaryDatabase {
        fn deref_mut(&mut self) -> &mut Self::Target {
            &mut self.db
        }
    }

    impl TemporaryDatabase {
        pub async fn new() -> Self {
            static COUNTER: AtomicUsize = AtomicUsize::new(0);
            let instance = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            // memdb VFS databases are shared between the pool's connections (SQLite 3.36+)
            let file_name = format!(
                "sqlite:///certwatch-inmem-{}-{instance}.db?vfs=memdb",
                std::process::id()
            );
            Self {
                db: Database::open_url(&file_name)
                    .await
                    .expect("Failed to create new in-memory database"),
            }
        }
    }

    pub async fn open_db() -> TemporaryDatabase {
        TemporaryDatabase::new().await
    }
}
