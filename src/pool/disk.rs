//! # Disk Brick-Pool Manager
//!
//! [`DiskBrickPool`] is the durable half of a brick pool manager: it owns
//! the [`BufferFileStore`] and adds brick-aware sizing on top of it. It
//! holds no brick payloads and makes no residency decisions; the cache
//! variants wrap it for that.
//!
//! ## Sizing
//!
//! The pool is constructed with an upper bound for the buffer size. At
//! `initialize(brick_memory_size)` the effective buffer size is fixed:
//!
//! ```text
//! buffer_size = max_buffer_size - (max_buffer_size % brick_memory_size)
//! ```
//!
//! so every buffer holds a whole number of bricks and no address ever
//! straddles a buffer boundary. A 250-byte bound with 64-byte bricks
//! yields 192-byte buffers with 3 brick slots each.
//!
//! ## Lifecycle
//!
//! Construct with configuration, then `initialize` fixes the brick size
//! and creates the file store. `deinitialize` drops the sizing state;
//! buffer files stay on disk. A pool can be re-initialized afterwards,
//! possibly with a different brick size against a fresh directory.
//!
//! Restoring from a [`PoolManifest`] re-attaches to the files of a
//! previous run and re-validates that all of them still exist with the
//! recorded size.

use std::path::{Path, PathBuf};

use eyre::{ensure, eyre, Result};

use crate::storage::{BufferFileStore, PoolManifest};

/// Brick-size-aware manager of the buffer files on disk.
#[derive(Debug)]
pub struct DiskBrickPool {
    pool_dir: PathBuf,
    prefix: String,
    max_buffer_size: usize,
    state: Option<DiskPoolState>,
}

#[derive(Debug)]
struct DiskPoolState {
    brick_size: usize,
    slots_per_buffer: usize,
    store: BufferFileStore,
}

impl DiskBrickPool {
    /// Captures configuration; nothing touches the disk until
    /// [`DiskBrickPool::initialize`].
    pub fn new<P: AsRef<Path>>(pool_dir: P, prefix: &str, max_buffer_size: usize) -> Self {
        Self {
            pool_dir: pool_dir.as_ref().to_path_buf(),
            prefix: prefix.to_string(),
            max_buffer_size,
            state: None,
        }
    }

    /// Fixes the brick size, derives the effective buffer size, and opens
    /// an empty file store over the pool directory.
    pub fn initialize(&mut self, brick_memory_size: usize) -> Result<()> {
        let buffer_size = self.sizing_checks(brick_memory_size)?;
        let store = BufferFileStore::create(&self.pool_dir, &self.prefix, buffer_size)?;
        self.install(brick_memory_size, buffer_size, store);
        Ok(())
    }

    /// Like [`DiskBrickPool::initialize`], but attaches to buffer files a
    /// previous run left in the pool directory instead of starting empty.
    pub fn initialize_existing(&mut self, brick_memory_size: usize) -> Result<()> {
        let buffer_size = self.sizing_checks(brick_memory_size)?;
        let store = BufferFileStore::scan_existing(&self.pool_dir, &self.prefix, buffer_size)?;
        self.install(brick_memory_size, buffer_size, store);
        Ok(())
    }

    /// Drops the sizing state. Buffer files stay on disk.
    pub fn deinitialize(&mut self) {
        self.state = None;
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    pub fn brick_memory_size(&self) -> Result<usize> {
        Ok(self.state()?.brick_size)
    }

    pub fn buffer_size_bytes(&self) -> Result<usize> {
        Ok(self.state()?.store.buffer_size())
    }

    pub fn slots_per_buffer(&self) -> Result<usize> {
        Ok(self.state()?.slots_per_buffer)
    }

    pub fn max_buffer_size_bytes(&self) -> usize {
        self.max_buffer_size
    }

    pub fn pool_dir(&self) -> &Path {
        &self.pool_dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn num_buffers(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.store.num_buffers())
    }

    pub fn buffer_files(&self) -> &[PathBuf] {
        self.state.as_ref().map_or(&[], |s| s.store.buffer_files())
    }

    /// Creates the next buffer on disk and returns its zeroed contents.
    pub fn allocate_next_buffer(&mut self) -> Result<Box<[u8]>> {
        self.state_mut()?.store.allocate_next_buffer()
    }

    pub fn save_buffer(&self, index: usize, bytes: &[u8]) -> Result<()> {
        self.state()?.store.save_buffer(index, bytes)
    }

    pub fn load_buffer(&self, index: usize) -> Result<Box<[u8]>> {
        self.state()?.store.load_buffer(index)
    }

    /// Serializes the manager state; the allocation cursor belongs to the
    /// cache variant and is passed in.
    pub fn manifest(&self, next_virtual_memory_address: u64) -> Result<PoolManifest> {
        let state = self.state()?;

        let buffer_files = state
            .store
            .buffer_files()
            .iter()
            .map(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(str::to_string)
                    .ok_or_else(|| eyre!("buffer file path '{}' has no valid name", path.display()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(PoolManifest {
            max_single_buffer_size_bytes: self.max_buffer_size,
            single_buffer_size_bytes: state.store.buffer_size(),
            num_brick_slots_per_buffer: state.slots_per_buffer,
            buffer_files,
            brick_pool_path: self.pool_dir.clone(),
            buffer_file_prefix: self.prefix.clone(),
            next_virtual_memory_address,
        })
    }

    /// Re-attaches to the pool a manifest describes, re-validating the
    /// directory and every listed buffer file.
    pub fn restore(manifest: &PoolManifest) -> Result<Self> {
        manifest.validate()?;

        let store = BufferFileStore::attach(
            &manifest.brick_pool_path,
            &manifest.buffer_file_prefix,
            manifest.single_buffer_size_bytes,
            &manifest.buffer_files,
        )?;

        Ok(Self {
            pool_dir: manifest.brick_pool_path.clone(),
            prefix: manifest.buffer_file_prefix.clone(),
            max_buffer_size: manifest.max_single_buffer_size_bytes,
            state: Some(DiskPoolState {
                brick_size: manifest.brick_memory_size(),
                slots_per_buffer: manifest.num_brick_slots_per_buffer,
                store,
            }),
        })
    }

    fn sizing_checks(&self, brick_memory_size: usize) -> Result<usize> {
        ensure!(self.state.is_none(), "brick pool is already initialized");
        ensure!(brick_memory_size > 0, "brick size must be non-zero");
        ensure!(
            self.max_buffer_size >= brick_memory_size,
            "maximum buffer size {} cannot hold a single {} byte brick",
            self.max_buffer_size,
            brick_memory_size
        );
        Ok(self.max_buffer_size - (self.max_buffer_size % brick_memory_size))
    }

    fn install(&mut self, brick_size: usize, buffer_size: usize, store: BufferFileStore) {
        self.state = Some(DiskPoolState {
            brick_size,
            slots_per_buffer: buffer_size / brick_size,
            store,
        });
    }

    fn state(&self) -> Result<&DiskPoolState> {
        self.state
            .as_ref()
            .ok_or_else(|| eyre!("brick pool has not been initialized"))
    }

    fn state_mut(&mut self) -> Result<&mut DiskPoolState> {
        self.state
            .as_mut()
            .ok_or_else(|| eyre!("brick pool has not been initialized"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn buffer_size_rounds_down_to_brick_multiple() {
        let dir = tempdir().unwrap();
        let mut pool = DiskBrickPool::new(dir.path(), "brickbuffer", 250);
        pool.initialize(64).unwrap();

        assert_eq!(pool.buffer_size_bytes().unwrap(), 192);
        assert_eq!(pool.slots_per_buffer().unwrap(), 3);
        assert_eq!(pool.brick_memory_size().unwrap(), 64);
    }

    #[test]
    fn initialize_rejects_oversized_brick() {
        let dir = tempdir().unwrap();
        let mut pool = DiskBrickPool::new(dir.path(), "brickbuffer", 32);
        let err = pool.initialize(64).unwrap_err();
        assert!(err.to_string().contains("cannot hold a single"));
    }

    #[test]
    fn double_initialize_is_an_error() {
        let dir = tempdir().unwrap();
        let mut pool = DiskBrickPool::new(dir.path(), "brickbuffer", 256);
        pool.initialize(64).unwrap();
        let err = pool.initialize(64).unwrap_err();
        assert!(err.to_string().contains("already initialized"));
    }

    #[test]
    fn operations_require_initialize() {
        let dir = tempdir().unwrap();
        let pool = DiskBrickPool::new(dir.path(), "brickbuffer", 256);
        let err = pool.load_buffer(0).unwrap_err();
        assert!(err.to_string().contains("has not been initialized"));
        assert_eq!(pool.num_buffers(), 0);
    }

    #[test]
    fn reinitialize_after_deinitialize() {
        let dir = tempdir().unwrap();
        let mut pool = DiskBrickPool::new(dir.path(), "brickbuffer", 256);
        pool.initialize(64).unwrap();
        pool.deinitialize();
        assert!(!pool.is_initialized());
        pool.initialize(32).unwrap();
        assert_eq!(pool.slots_per_buffer().unwrap(), 8);
    }

    #[test]
    fn manifest_restore_round_trip() {
        let dir = tempdir().unwrap();
        let mut pool = DiskBrickPool::new(dir.path(), "brickbuffer", 256);
        pool.initialize(64).unwrap();
        pool.allocate_next_buffer().unwrap();
        let mut second = pool.allocate_next_buffer().unwrap();
        second[0] = 9;
        pool.save_buffer(1, &second).unwrap();

        let manifest = pool.manifest(320).unwrap();
        assert_eq!(manifest.next_virtual_memory_address, 320);
        assert_eq!(manifest.buffer_files.len(), 2);

        let restored = DiskBrickPool::restore(&manifest).unwrap();
        assert_eq!(restored.num_buffers(), 2);
        assert_eq!(restored.buffer_size_bytes().unwrap(), 256);
        assert_eq!(restored.brick_memory_size().unwrap(), 64);
        assert_eq!(restored.load_buffer(1).unwrap()[0], 9);
    }

    #[test]
    fn restore_rejects_missing_file() {
        let dir = tempdir().unwrap();
        let mut pool = DiskBrickPool::new(dir.path(), "brickbuffer", 256);
        pool.initialize(64).unwrap();
        pool.allocate_next_buffer().unwrap();
        let manifest = pool.manifest(0).unwrap();

        std::fs::remove_file(&pool.buffer_files()[0]).unwrap();
        let err = DiskBrickPool::restore(&manifest).unwrap_err();
        assert!(err.to_string().contains("missing buffer file"));
    }

    #[test]
    fn initialize_existing_attaches_to_prior_files() {
        let dir = tempdir().unwrap();
        let mut pool = DiskBrickPool::new(dir.path(), "brickbuffer", 256);
        pool.initialize(64).unwrap();
        pool.allocate_next_buffer().unwrap();
        pool.allocate_next_buffer().unwrap();
        pool.deinitialize();

        let mut reopened = DiskBrickPool::new(dir.path(), "brickbuffer", 256);
        reopened.initialize_existing(64).unwrap();
        assert_eq!(reopened.num_buffers(), 2);
    }
}
