//! # Brick Buffer Files
//!
//! This module implements the durable side of the brick pool: one file per
//! buffer, all living in a single pool directory.
//!
//! ## Directory Structure
//!
//! ```text
//! pool_dir/
//! ├── brickpool.manifest         # Pool metadata (separate component)
//! ├── brickbuffer0000000000.raw  # Buffer 0
//! ├── brickbuffer0000000001.raw  # Buffer 1
//! └── brickbuffer0000000002.raw  # Buffer 2
//! ```
//!
//! File names are `<prefix><index>.raw` with the index zero-padded to a
//! fixed width, so a plain lexicographic directory listing yields buffers
//! in allocation order.
//!
//! ## I/O Discipline
//!
//! Buffers are read and written whole, with a plain open/write/close (or
//! open/read/close) per operation. No file handle stays open between
//! operations and no memory mapping is involved; the RAM layer above this
//! one decides which buffers are worth keeping in memory. Buffer files
//! carry no header or checksum, byte `i` of the file is byte `i` of the
//! buffer.
//!
//! ## Durability
//!
//! New and rewritten buffer files are synced before close. A buffer file
//! listed by the pool manifest is therefore guaranteed to exist with its
//! full length on disk.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use log::debug;

use crate::config::{BUFFER_FILE_EXTENSION, BUFFER_FILE_INDEX_WIDTH};

/// Owns the pool directory and the ordered list of buffer files.
///
/// One buffer equals one file. The store hands out whole buffers as owned
/// byte boxes and accepts whole buffers for writing; it knows nothing about
/// bricks, addresses, or residency.
#[derive(Debug)]
pub struct BufferFileStore {
    pool_dir: PathBuf,
    prefix: String,
    buffer_size: usize,
    files: Vec<PathBuf>,
}

impl BufferFileStore {
    /// Creates a store over an existing, writable pool directory, starting
    /// with zero buffer files.
    pub fn create<P: AsRef<Path>>(pool_dir: P, prefix: &str, buffer_size: usize) -> Result<Self> {
        let pool_dir = pool_dir.as_ref().to_path_buf();
        Self::validate_prefix(prefix)?;
        ensure!(buffer_size > 0, "buffer size must be non-zero");
        ensure!(
            pool_dir.is_dir(),
            "brick pool directory '{}' does not exist",
            pool_dir.display()
        );

        Ok(Self {
            pool_dir,
            prefix: prefix.to_string(),
            buffer_size,
            files: Vec::new(),
        })
    }

    /// Re-attaches a store to buffer files recorded in a pool manifest.
    ///
    /// Every listed file must exist with exactly `buffer_size` bytes; a
    /// missing or truncated file means the manifest and the directory have
    /// diverged and the pool cannot be trusted.
    pub fn attach<P: AsRef<Path>>(
        pool_dir: P,
        prefix: &str,
        buffer_size: usize,
        file_names: &[String],
    ) -> Result<Self> {
        let mut store = Self::create(pool_dir, prefix, buffer_size)?;
        ensure!(
            !file_names.is_empty(),
            "brick pool manifest lists no buffer files"
        );

        for name in file_names {
            let path = store.pool_dir.join(name);
            let meta = fs::metadata(&path)
                .wrap_err_with(|| format!("missing buffer file '{}'", path.display()))?;
            ensure!(
                meta.len() == buffer_size as u64,
                "buffer file '{}' has {} bytes, expected {}",
                path.display(),
                meta.len(),
                buffer_size
            );
            store.files.push(path);
        }

        Ok(store)
    }

    /// Scans the pool directory for buffer files left by a previous run and
    /// attaches to them, without consulting a manifest.
    ///
    /// Buffer indices parsed from the file names must form a contiguous
    /// range starting at zero.
    pub fn scan_existing<P: AsRef<Path>>(
        pool_dir: P,
        prefix: &str,
        buffer_size: usize,
    ) -> Result<Self> {
        let mut store = Self::create(pool_dir, prefix, buffer_size)?;
        let suffix = format!(".{}", BUFFER_FILE_EXTENSION);

        let mut indices = Vec::new();
        let entries = fs::read_dir(&store.pool_dir).wrap_err_with(|| {
            format!(
                "cannot scan brick pool directory '{}'",
                store.pool_dir.display()
            )
        })?;
        for entry in entries.flatten() {
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(prefix) && name.ends_with(&suffix) {
                    let digits = &name[prefix.len()..name.len() - suffix.len()];
                    if let Ok(index) = digits.parse::<usize>() {
                        indices.push(index);
                    }
                }
            }
        }
        indices.sort_unstable();

        for (expected, index) in indices.iter().enumerate() {
            ensure!(
                *index == expected,
                "buffer file {} is missing from '{}'",
                expected,
                store.pool_dir.display()
            );
        }

        for index in 0..indices.len() {
            let path = store.buffer_file_path(index);
            let meta = fs::metadata(&path)
                .wrap_err_with(|| format!("cannot stat buffer file '{}'", path.display()))?;
            ensure!(
                meta.len() == buffer_size as u64,
                "buffer file '{}' has {} bytes, expected {}",
                path.display(),
                meta.len(),
                buffer_size
            );
            store.files.push(path);
        }

        Ok(store)
    }

    /// Creates the next buffer file, zero-filled and synced, and returns the
    /// matching in-memory buffer.
    pub fn allocate_next_buffer(&mut self) -> Result<Box<[u8]>> {
        let index = self.files.len();
        let path = self.buffer_file_path(index);
        let buffer = vec![0u8; self.buffer_size].into_boxed_slice();

        let mut file = File::create(&path)
            .wrap_err_with(|| format!("cannot create buffer file '{}'", path.display()))?;
        file.write_all(&buffer)
            .wrap_err_with(|| format!("cannot write buffer file '{}'", path.display()))?;
        file.sync_all()
            .wrap_err_with(|| format!("cannot sync buffer file '{}'", path.display()))?;

        debug!(
            "allocated buffer {} ({} bytes) at '{}'",
            index,
            self.buffer_size,
            path.display()
        );
        self.files.push(path);
        Ok(buffer)
    }

    /// Overwrites buffer file `index` with the full buffer contents.
    pub fn save_buffer(&self, index: usize, bytes: &[u8]) -> Result<()> {
        ensure!(
            index < self.files.len(),
            "buffer {} has not been allocated ({} buffers exist)",
            index,
            self.files.len()
        );
        ensure!(
            bytes.len() == self.buffer_size,
            "buffer {} write of {} bytes, expected {}",
            index,
            bytes.len(),
            self.buffer_size
        );

        let path = &self.files[index];
        let mut file = File::create(path)
            .wrap_err_with(|| format!("cannot open buffer file '{}'", path.display()))?;
        file.write_all(bytes)
            .wrap_err_with(|| format!("cannot write buffer file '{}'", path.display()))?;
        file.sync_all()
            .wrap_err_with(|| format!("cannot sync buffer file '{}'", path.display()))?;

        debug!("saved buffer {} to '{}'", index, path.display());
        Ok(())
    }

    /// Reads buffer file `index` fully into a fresh heap buffer.
    pub fn load_buffer(&self, index: usize) -> Result<Box<[u8]>> {
        ensure!(
            index < self.files.len(),
            "buffer {} has not been allocated ({} buffers exist)",
            index,
            self.files.len()
        );

        let path = &self.files[index];
        let mut file = File::open(path)
            .wrap_err_with(|| format!("cannot open buffer file '{}'", path.display()))?;
        let meta = file
            .metadata()
            .wrap_err_with(|| format!("cannot stat buffer file '{}'", path.display()))?;
        ensure!(
            meta.len() == self.buffer_size as u64,
            "buffer file '{}' has {} bytes, expected {}",
            path.display(),
            meta.len(),
            self.buffer_size
        );

        let mut buffer = vec![0u8; self.buffer_size];
        file.read_exact(&mut buffer)
            .wrap_err_with(|| format!("cannot read buffer file '{}'", path.display()))?;

        debug!("loaded buffer {} from '{}'", index, path.display());
        Ok(buffer.into_boxed_slice())
    }

    /// Removes every buffer file from disk and forgets them.
    pub fn delete_files(&mut self) -> Result<()> {
        for path in self.files.drain(..) {
            fs::remove_file(&path)
                .wrap_err_with(|| format!("cannot remove buffer file '{}'", path.display()))?;
        }
        Ok(())
    }

    pub fn num_buffers(&self) -> usize {
        self.files.len()
    }

    pub fn buffer_files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn pool_dir(&self) -> &Path {
        &self.pool_dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn buffer_file_path(&self, index: usize) -> PathBuf {
        self.pool_dir.join(format!(
            "{}{:0width$}.{}",
            self.prefix,
            index,
            BUFFER_FILE_EXTENSION,
            width = BUFFER_FILE_INDEX_WIDTH
        ))
    }

    fn validate_prefix(prefix: &str) -> Result<()> {
        ensure!(!prefix.is_empty(), "buffer file prefix cannot be empty");
        ensure!(
            prefix
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-'),
            "buffer file prefix can only contain alphanumeric characters, underscores, and hyphens"
        );
        Ok(())
    }
}
