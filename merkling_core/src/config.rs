//! Run configuration: pool locations and the compression policy.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Well-known staging pool used when no tpool is configured.
pub const DEFAULT_TPOOL: &str = "/tmp/merkling";

fn default_tpool() -> PathBuf {
    PathBuf::from(DEFAULT_TPOOL)
}

fn default_zsize() -> u64 {
    4096
}

fn default_zrate() -> f64 {
    0.9
}

fn default_zlevel() -> i32 {
    3
}

fn default_asize() -> u64 {
    1024 * 1024
}

/// Configuration for one ingestion run.
///
/// Constructed once, from a JSON file and/or CLI flags, and immutable
/// for the rest of the run.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Final pool for uncompressed objects. Unset disables staging
    /// entirely: the run computes identifiers only (manifest mode).
    #[serde(default)]
    pub pool: Option<PathBuf>,

    /// Final pool for compressed objects. Unset disables compression;
    /// every staged object finalizes raw.
    #[serde(default)]
    pub zpool: Option<PathBuf>,

    /// Staging pool, created before ingestion and removed after the
    /// selection pass.
    #[serde(default = "default_tpool")]
    pub tpool: PathBuf,

    /// Minimum original size in bytes before compression is attempted.
    /// The per-object overhead of compression makes smaller objects not
    /// worth it.
    #[serde(default = "default_zsize")]
    pub zsize: u64,

    /// Compression is kept only if compressed size < original * zrate.
    #[serde(default = "default_zrate")]
    pub zrate: f64,

    /// zstd compression level.
    #[serde(default = "default_zlevel")]
    pub zlevel: i32,

    /// Files whose staged object is smaller than this are folded into
    /// bundles. 0 disables bundling.
    #[serde(default)]
    pub bsize: u64,

    /// Maximum aggregate size of one bundle.
    #[serde(default = "default_asize")]
    pub asize: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool: None,
            zpool: None,
            tpool: default_tpool(),
            zsize: default_zsize(),
            zrate: default_zrate(),
            zlevel: default_zlevel(),
            bsize: 0,
            asize: default_asize(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file. Absent keys take their
    /// defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| Error::invalid_config(path, e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| Error::invalid_config(path, e.to_string()))
    }

    /// Resolve the default configuration: the file named by the
    /// MERKLING_CONFIG environment variable, then ./merkling.json if
    /// present, else built-in defaults.
    pub fn load_default() -> Result<Self> {
        if let Some(path) = std::env::var_os("MERKLING_CONFIG") {
            return Self::from_file(PathBuf::from(path));
        }

        let local = Path::new("merkling.json");
        if local.exists() {
            return Self::from_file(local);
        }

        Ok(Self::default())
    }
}
