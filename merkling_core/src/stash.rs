//! Staging-pool deduplication and lifecycle.

use crate::config::Config;
use crate::error::Result;
use crate::hash::Hash;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Stages file content into the temporary pool during tree construction
/// and finalizes objects into the raw or compressed pool during the
/// selection pass.
#[derive(Debug)]
pub struct Stasher {
    config: Config,
}

impl Stasher {
    /// Create a Stasher for one run's configuration.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// The run configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Staging is active only when a final pool is configured; without
    /// one the run computes identifiers only.
    pub fn staging_enabled(&self) -> bool {
        self.config.pool.is_some()
    }

    /// Per-file callback for tree construction: hash the file and ensure
    /// exactly one staged copy of its content exists in the staging pool.
    ///
    /// A hashing failure is fatal and propagates. Staging failures are
    /// best-effort: the object is simply absent from the staging pool
    /// and selection later falls back accordingly.
    pub fn stash(&self, path: &Path) -> Result<Hash> {
        let id = Hash::hash_file(path)?;

        if self.staging_enabled() {
            let tpath = self.tpath(&id.to_hex());
            // Link first and treat an existing entry as success: the
            // identifier names the content, so whoever staged it first
            // staged the same bytes.
            if let Err(err) = link_or_copy(path, &tpath) {
                debug!(path = %path.display(), id = %id, error = %err, "staging skipped");
            }
        }

        Ok(id)
    }

    /// Create the staging pool and the final pools before ingestion.
    /// Idempotent. A no-op when staging is disabled.
    pub fn begin(&self) -> Result<()> {
        if !self.staging_enabled() {
            return Ok(());
        }
        fs::create_dir_all(&self.config.tpool)?;
        if let Some(pool) = &self.config.pool {
            fs::create_dir_all(pool)?;
        }
        if let Some(zpool) = &self.config.zpool {
            fs::create_dir_all(zpool)?;
        }
        Ok(())
    }

    /// Remove the staging pool after the selection pass. An already
    /// absent staging pool is success.
    pub fn end(&self) -> Result<()> {
        if !self.staging_enabled() {
            return Ok(());
        }
        match fs::remove_dir_all(&self.config.tpool) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Path of an identifier's staged entry.
    pub(crate) fn tpath(&self, hex: &str) -> PathBuf {
        self.config.tpool.join(hex)
    }
}

/// Hard-link `src` to `dst`, treating an existing `dst` as success and
/// falling back to a byte copy when the filesystem refuses the link
/// (e.g. a cross-device pool). Preserves "at most one byte-copy per
/// distinct identifier".
pub(crate) fn link_or_copy(src: &Path, dst: &Path) -> std::io::Result<()> {
    match fs::hard_link(src, dst) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(_) => fs::copy(src, dst).map(|_| ()),
    }
}
