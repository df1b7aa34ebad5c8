use crate::CRATE_NAME;
use anyhow::{Context, bail};
use fs4::tokio::AsyncFileExt;
use std::path::Path;
use tokio::fs::File;
use tracing::{debug, error};

const LOCK_FILE: &str = "certwatch.lock";

/// Exclusive ownership of a data directory, released on drop
#[must_use]
#[clippy::has_significant_drop]
#[derive(Debug)]
pub struct InstanceLock {
    lock_file: File,
}

impl InstanceLock {
    /// Take the lock or fail immediately if another process holds it
    pub async fn acquire(data_directory: &Path) -> anyhow::Result<Self> {
        let path = data_directory.join(LOCK_FILE);
        let lock_file = File::create(&path)
            .await
            .context(format!("Creating lock file {} failed", path.display()))?;
        if !lock_file
            .try_lock_exclusive()
            .context(format!("Locking {} failed", path.display()))?
        {
            bail!(
                "Another {CRATE_NAME} process is already using {}",
                data_directory.display()
            );
        }
        debug!("Acquired instance lock {}", path.display());
        Ok(Self { lock_file })
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = self.lock_file.unlock() {
            error!("Failed to release instance lock: {e}");
        }
    }
}
