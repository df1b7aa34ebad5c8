use crate::state::db::test_helper::TemporaryDatabase;

mod db;
mod lock;
mod migration;
pub mod types;

pub type Database = db::Database;
pub type InstanceLock = lock::InstanceLock;

/// Name of the SQLite file inside the data directory
pub const DATABASE_FILE: &str = "certwatch.sqlite";

pub async fn open_test_db() -> TemporaryDatabase {
    db::test_helper::open_db().await
}
