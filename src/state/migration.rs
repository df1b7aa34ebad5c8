use crate::CRATE_NAME;
use sqlx::SqlitePool;
use sqlx::migrate::MigrateError;
use tracing::{debug, warn};

// Kept apart from db.rs, the sqlx::migrate! macro confuses IDE analyzers
pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    let migrator = sqlx::migrate!("db/migrations");
    debug!(
        "Bringing the domain database up to schema version {}",
        migrator.iter().count()
    );
    match migrator.run(pool).await {
        Ok(()) => Ok(()),
        Err(MigrateError::VersionMissing(version)) => {
            warn!(
                "The domain database was written by a newer {CRATE_NAME} (unknown migration {version}). Continuing with the current schema."
            );
            Ok(())
        }
        Err(e) => Err(anyhow::Error::new(e).context("Migrating the domain database failed")),
    }
}
