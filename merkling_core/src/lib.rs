//! # Merkling Core
//!
//! Content-addressed staging and adaptive compression for ingesting a
//! directory tree into a CAS.
//!
//! Every regular file under the ingestion root is hashed with BLAKE3 and
//! deduplicated into a temporary staging pool by hard link. Once the
//! whole tree is known, a second pass decides per distinct object
//! whether it is stored zstd-compressed or raw, driven by a size
//! threshold and a measured compression ratio. The resulting hierarchy
//! is written to a JSON metadata file.
//!
//! ## Features
//!
//! - Content-addressed pools: objects named by their BLAKE3 hash
//! - Hard-link staging: identical content staged once, no bytes copied
//! - Ratio-gated zstd compression with raw fallback
//! - Optional bundling of small files into aggregate objects
//! - Metadata tree describing names, links, and storage form
//!
//! ## Example
//!
//! ```no_run
//! use merkling_core::{Config, Stasher, Tree};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = Config::default();
//! config.pool = Some("pool".into());
//! config.zpool = Some("zpool".into());
//! let stasher = Stasher::new(config);
//!
//! // Stage every file while building the tree.
//! stasher.begin()?;
//! let mut tree = Tree::build(Path::new("./my-data"), |path| stasher.stash(path))?;
//!
//! // Then finalize each object as compressed or raw.
//! tree.walk(|node| {
//!     stasher.select(node);
//! });
//! stasher.end()?;
//!
//! tree.save(Path::new("my-data.json"))?;
//! # Ok(())
//! # }
//! ```

mod compress;
mod config;
mod error;
mod hash;
mod stash;
mod tree;

pub use compress::Outcome;
pub use config::{Config, DEFAULT_TPOOL};
pub use error::{Error, Result};
pub use hash::Hash;
pub use stash::Stasher;
pub use tree::{Node, NodeKind, Tree};
