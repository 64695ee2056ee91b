//! # Pool Manifest
//!
//! The manifest is the serialized state of a brick pool manager: everything
//! needed to re-attach to the buffer files of a previous run. It is a plain
//! key/value document, persisted as JSON:
//!
//! ```text
//! {
//!   "max_single_buffer_size_bytes": 67108864,
//!   "single_buffer_size_bytes": 67104768,
//!   "num_brick_slots_per_buffer": 5461,
//!   "buffer_files": [
//!     "brickbuffer0000000000.raw",
//!     "brickbuffer0000000001.raw"
//!   ],
//!   "brick_pool_path": "/data/octree/pool",
//!   "buffer_file_prefix": "brickbuffer",
//!   "next_virtual_memory_address": 134209536
//! }
//! ```
//!
//! Buffer files are recorded by name, relative to `brick_pool_path`. The
//! brick size is not stored separately; it is implied by
//! `single_buffer_size_bytes / num_brick_slots_per_buffer`.
//!
//! Deliberately NOT persisted:
//!
//! - the RAM limit (a runtime decision, re-supplied on restore)
//! - the deleted-brick free list (deleted addresses are forgotten across
//!   restarts)
//! - residency state (which buffers were in RAM)

use std::fs;
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use serde::{Deserialize, Serialize};

/// Serialized brick pool state.
///
/// Produced by an initialized pool manager, consumed to restore one. The
/// manifest only checks its own internal consistency; file existence is
/// verified when a store re-attaches to the pool directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolManifest {
    /// Configured upper bound for the buffer size, before rounding.
    pub max_single_buffer_size_bytes: usize,
    /// Effective buffer size, a whole multiple of the brick size.
    pub single_buffer_size_bytes: usize,
    /// Bricks per buffer.
    pub num_brick_slots_per_buffer: usize,
    /// Buffer file names in index order, relative to `brick_pool_path`.
    pub buffer_files: Vec<String>,
    /// Directory holding the buffer files.
    pub brick_pool_path: PathBuf,
    /// File name prefix of the buffer files.
    pub buffer_file_prefix: String,
    /// Allocation cursor: the virtual address the next monotonic
    /// allocation will return.
    pub next_virtual_memory_address: u64,
}

impl PoolManifest {
    /// Checks internal consistency of the manifest fields.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.num_brick_slots_per_buffer > 0,
            "manifest has zero brick slots per buffer"
        );
        ensure!(
            self.single_buffer_size_bytes > 0
                && self.single_buffer_size_bytes <= self.max_single_buffer_size_bytes,
            "manifest buffer size {} is outside (0, {}]",
            self.single_buffer_size_bytes,
            self.max_single_buffer_size_bytes
        );
        ensure!(
            self.single_buffer_size_bytes % self.num_brick_slots_per_buffer == 0,
            "manifest buffer size {} is not a multiple of its {} brick slots",
            self.single_buffer_size_bytes,
            self.num_brick_slots_per_buffer
        );
        ensure!(
            !self.buffer_files.is_empty(),
            "manifest lists no buffer files"
        );

        // The cursor may sit at the start of the next, not yet allocated
        // buffer, but never beyond it.
        let cursor_buffer = self.next_virtual_memory_address / self.single_buffer_size_bytes as u64;
        ensure!(
            cursor_buffer <= self.buffer_files.len() as u64,
            "manifest allocation cursor {} points past the {} recorded buffers",
            self.next_virtual_memory_address,
            self.buffer_files.len()
        );
        Ok(())
    }

    /// Brick size implied by the buffer size and slot count.
    pub fn brick_memory_size(&self) -> usize {
        self.single_buffer_size_bytes / self.num_brick_slots_per_buffer
    }

    /// Writes the manifest as pretty-printed JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)
            .wrap_err("cannot serialize brick pool manifest")?;
        fs::write(path, json)
            .wrap_err_with(|| format!("cannot write manifest '{}'", path.display()))?;
        Ok(())
    }

    /// Reads and validates a manifest written by [`PoolManifest::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .wrap_err_with(|| format!("cannot read manifest '{}'", path.display()))?;
        let manifest: PoolManifest = serde_json::from_str(&json)
            .wrap_err_with(|| format!("cannot parse manifest '{}'", path.display()))?;
        manifest.validate()?;
        Ok(manifest)
    }
}
