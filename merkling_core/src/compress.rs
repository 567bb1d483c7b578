//! Compression selection: finalize staged objects as raw or compressed.

use crate::hash::Hash;
use crate::stash::{Stasher, link_or_copy};
use crate::tree::Node;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tracing::{debug, warn};

/// How selection finalized a node's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Stored as a zstd frame in the compressed pool.
    Compressed,
    /// Stored raw in the uncompressed pool.
    Raw,
    /// Not a content node, staging disabled, or no staged copy to
    /// finalize.
    Skipped,
}

impl Stasher {
    /// Per-node callback for the second pass: decide the final storage
    /// form of the node's content and record it on the node.
    ///
    /// Objects below the configured `zsize` finalize raw; larger ones
    /// are compressed and kept compressed only if the result is smaller
    /// than `zrate` times the original. Every failure along the way
    /// falls back to raw finalization: compression is an optimization,
    /// never a correctness requirement.
    ///
    /// Idempotent per identifier: repeated invocations (duplicate nodes,
    /// reruns over an existing store) never compress twice and always
    /// yield the same `zstd` flag.
    pub fn select(&self, node: &mut Node) -> Outcome {
        // Only content nodes carry a well-formed identifier; directory
        // and symlink values never parse.
        let Ok(id) = Hash::from_hex(&node.value) else {
            return Outcome::Skipped;
        };
        let Some(pool) = self.config().pool.as_deref() else {
            return Outcome::Skipped; // manifest-only run
        };

        let hex = id.to_hex();
        let path = pool.join(&hex);
        let zpath = self.config().zpool.as_deref().map(|z| z.join(&hex));

        // Short-circuits keep selection idempotent: a prior run, or an
        // earlier node with the same identifier, already decided this
        // object.
        if let Some(zpath) = &zpath {
            if zpath.exists() {
                node.zstd = true;
                return Outcome::Compressed;
            }
        }
        if path.exists() {
            return Outcome::Raw;
        }

        let tpath = self.tpath(&hex);
        let original = match fs::metadata(&tpath) {
            Ok(meta) => meta.len(),
            Err(err) => {
                warn!(id = %hex, error = %err, "no staged copy for identifier");
                return Outcome::Skipped;
            }
        };

        if let Some(zpath) = &zpath {
            if original >= self.config().zsize {
                match compress_file(&tpath, zpath, self.config().zlevel) {
                    Ok(compressed)
                        if (compressed as f64) < original as f64 * self.config().zrate =>
                    {
                        node.zstd = true;
                        return Outcome::Compressed;
                    }
                    Ok(_) => {
                        // Ratio not met: the compressed form is wasted.
                        if let Err(err) = fs::remove_file(zpath) {
                            warn!(id = %hex, error = %err, "failed to remove rejected object");
                        }
                    }
                    Err(err) => {
                        debug!(id = %hex, error = %err, "compression failed, falling back to raw");
                    }
                }
            }
        }

        self.finalize_raw(&hex, &tpath, &path)
    }

    /// Link the staged copy into the raw pool. Failures are logged and
    /// reported as skipped; the run continues.
    fn finalize_raw(&self, hex: &str, tpath: &Path, path: &Path) -> Outcome {
        if let Err(err) = link_or_copy(tpath, path) {
            warn!(id = %hex, error = %err, "failed to finalize object");
            return Outcome::Skipped;
        }
        Outcome::Raw
    }
}

/// Encode `src` as a zstd frame at `dst`, written atomically. Returns
/// the compressed size in bytes.
fn compress_file(src: &Path, dst: &Path, level: i32) -> io::Result<u64> {
    let mut input = fs::File::open(src)?;
    let dir = dst.parent().unwrap_or(Path::new("."));
    let mut temp_file = tempfile::NamedTempFile::new_in(dir)?;

    zstd::stream::copy_encode(&mut input, &mut temp_file, level)?;
    temp_file.flush()?;

    let len = temp_file.as_file().metadata()?.len();
    temp_file.persist(dst).map_err(|e| e.error)?;
    Ok(len)
}
