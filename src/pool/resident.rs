//! # Fully Resident Brick Pool
//!
//! [`ResidentBrickPool`] keeps every buffer it ever touches in RAM: buffers
//! load on first access and are only written back by an explicit flush or
//! at teardown. No RAM limit, no eviction, no [`AllSlotsInUse`] failures.
//! Suited to pools known to fit in memory, where the RAM-limited variant's
//! bookkeeping buys nothing.
//!
//! [`AllSlotsInUse`]: super::AllSlotsInUse

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use eyre::{ensure, Result};
use log::{debug, error};

use crate::config::{DEFAULT_BUFFER_FILE_PREFIX, MANIFEST_FILE_NAME};
use crate::storage::PoolManifest;

use super::buffer::RamBuffer;
use super::checkout::CheckoutTable;
use super::disk::DiskBrickPool;
use super::{
    format_bytes, AllocatePolicy, BrickAddress, BrickGuard, BrickGuardMut, BrickPoolManager,
};

/// Brick pool manager without a RAM bound; touched buffers stay resident.
pub struct ResidentBrickPool {
    policy: AllocatePolicy,
    inner: RefCell<ResidentInner>,
}

struct ResidentInner {
    disk: DiskBrickPool,
    /// Indexed by buffer index; `None` until first touched.
    buffers: Vec<Option<RamBuffer>>,
    checkouts: CheckoutTable,
    free_bricks: Vec<BrickAddress>,
    next_address: u64,
}

impl ResidentBrickPool {
    pub fn new<P: AsRef<Path>>(pool_dir: P, max_buffer_size: usize) -> Self {
        Self::with_policy(pool_dir, max_buffer_size, AllocatePolicy::default())
    }

    pub fn with_policy<P: AsRef<Path>>(
        pool_dir: P,
        max_buffer_size: usize,
        policy: AllocatePolicy,
    ) -> Self {
        let disk = DiskBrickPool::new(pool_dir, DEFAULT_BUFFER_FILE_PREFIX, max_buffer_size);
        Self {
            policy,
            inner: RefCell::new(ResidentInner::new(disk)),
        }
    }

    /// Reopens a previously saved pool from the manifest in the directory.
    pub fn open<P: AsRef<Path>>(pool_dir: P, policy: AllocatePolicy) -> Result<Self> {
        let manifest = PoolManifest::load(pool_dir.as_ref().join(MANIFEST_FILE_NAME))?;
        Self::restore(&manifest, policy)
    }

    /// Re-attaches to the pool a manifest describes, picking up its
    /// allocation cursor. The pool comes back initialized.
    pub fn restore(manifest: &PoolManifest, policy: AllocatePolicy) -> Result<Self> {
        let disk = DiskBrickPool::restore(manifest)?;
        let mut inner = ResidentInner::new(disk);
        inner.buffers = (0..inner.disk.num_buffers()).map(|_| None).collect();
        inner.next_address = manifest.next_virtual_memory_address;
        Ok(Self {
            policy,
            inner: RefCell::new(inner),
        })
    }

    /// Snapshot of the pool state for serialization.
    pub fn manifest(&self) -> Result<PoolManifest> {
        let inner = self.inner.borrow();
        inner.disk.manifest(inner.next_address)
    }

    /// Writes the manifest into the pool directory and returns its path.
    pub fn save_manifest(&self) -> Result<PathBuf> {
        let inner = self.inner.borrow();
        let manifest = inner.disk.manifest(inner.next_address)?;
        let path = inner.disk.pool_dir().join(MANIFEST_FILE_NAME);
        manifest.save(&path)?;
        Ok(path)
    }

    pub fn allocate_policy(&self) -> AllocatePolicy {
        self.policy
    }

    pub fn is_brick_in_ram(&self, addr: BrickAddress) -> bool {
        if addr.is_no_brick() {
            return false;
        }
        let inner = self.inner.borrow();
        match inner.disk.buffer_size_bytes() {
            Ok(buffer_size) => {
                let index = addr.buffer_index(buffer_size);
                inner.buffers.get(index).map_or(false, Option::is_some)
            }
            Err(_) => false,
        }
    }
}

impl BrickPoolManager for ResidentBrickPool {
    fn initialize(&mut self, brick_memory_size: usize) -> Result<()> {
        let inner = self.inner.get_mut();
        inner.disk.initialize(brick_memory_size)?;
        inner.buffers.clear();
        inner.checkouts.clear();
        inner.free_bricks.clear();
        inner.next_address = 0;
        Ok(())
    }

    fn deinitialize(&mut self) -> Result<()> {
        if !self.is_initialized() {
            return Ok(());
        }
        let inner = self.inner.get_mut();
        inner.flush()?;
        inner.buffers.clear();
        inner.checkouts.clear();
        inner.free_bricks.clear();
        inner.next_address = 0;
        inner.disk.deinitialize();
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.inner.borrow().disk.is_initialized()
    }

    fn brick_memory_size(&self) -> Result<usize> {
        self.inner.borrow().disk.brick_memory_size()
    }

    fn allocate_brick(&self) -> Result<BrickAddress> {
        let mut inner = self.inner.borrow_mut();
        match self.policy {
            AllocatePolicy::IgnoreDeletedBricks => inner.allocate_ignore_free(),
            AllocatePolicy::UseDeletedBricks => inner.allocate_use_free(),
        }
    }

    fn delete_brick(&self, addr: BrickAddress) -> Result<()> {
        if addr.is_no_brick() {
            return Ok(());
        }
        self.inner.borrow_mut().delete_brick(addr)
    }

    fn get_brick(&self, addr: BrickAddress) -> Result<Option<BrickGuard<'_>>> {
        if addr.is_no_brick() {
            return Ok(None);
        }
        let (data, len) = self.inner.borrow_mut().checkout(addr, false)?;
        Ok(Some(BrickGuard::new(self, addr, data, len)))
    }

    fn get_writable_brick(&self, addr: BrickAddress) -> Result<Option<BrickGuardMut<'_>>> {
        if addr.is_no_brick() {
            return Ok(None);
        }
        let (data, len) = self.inner.borrow_mut().checkout(addr, true)?;
        Ok(Some(BrickGuardMut::new(self, addr, data, len)))
    }

    fn release_brick(&self, addr: BrickAddress) {
        if addr.is_no_brick() {
            return;
        }
        self.inner.borrow_mut().release(addr);
    }

    fn flush_pool_to_disk(&mut self) -> Result<()> {
        self.inner.get_mut().flush()
    }

    fn memory_allocated(&self) -> u64 {
        let inner = self.inner.borrow();
        match inner.disk.buffer_size_bytes() {
            Ok(buffer_size) => (inner.disk.num_buffers() * buffer_size) as u64,
            Err(_) => 0,
        }
    }

    fn memory_used(&self) -> u64 {
        let inner = self.inner.borrow();
        match inner.disk.buffer_size_bytes() {
            Ok(buffer_size) => (inner.num_resident() * buffer_size) as u64,
            Err(_) => 0,
        }
    }

    fn num_buffers_in_ram(&self) -> usize {
        self.inner.borrow().num_resident()
    }

    fn description(&self) -> String {
        let inner = self.inner.borrow();
        let buffer_size = match inner.disk.buffer_size_bytes() {
            Ok(size) => size,
            Err(_) => return "uninitialized brick pool".to_string(),
        };
        format!(
            "Single Buffer Size: {}, Memory Allocated: {}, Brick Buffers in RAM: {}, RAM Used: {}",
            format_bytes(buffer_size as u64),
            format_bytes((inner.disk.num_buffers() * buffer_size) as u64),
            inner.num_resident(),
            format_bytes((inner.num_resident() * buffer_size) as u64),
        )
    }
}

impl Drop for ResidentBrickPool {
    fn drop(&mut self) {
        if self.is_initialized() {
            if let Err(err) = self.flush_pool_to_disk() {
                error!("failed to flush brick pool during drop: {err:#}");
            }
        }
    }
}

impl ResidentInner {
    fn new(disk: DiskBrickPool) -> Self {
        Self {
            disk,
            buffers: Vec::new(),
            checkouts: CheckoutTable::new(),
            free_bricks: Vec::new(),
            next_address: 0,
        }
    }

    fn num_resident(&self) -> usize {
        self.buffers.iter().filter(|b| b.is_some()).count()
    }

    /// Loads the buffer on first touch. Nothing is ever evicted.
    fn ensure_resident(&mut self, buffer_index: usize) -> Result<()> {
        ensure!(
            buffer_index < self.disk.num_buffers(),
            "buffer {} has not been allocated ({} buffers exist)",
            buffer_index,
            self.disk.num_buffers()
        );
        if self.buffers[buffer_index].is_none() {
            let bytes = self.disk.load_buffer(buffer_index)?;
            self.buffers[buffer_index] = Some(RamBuffer::new(buffer_index, bytes));
            debug!("loaded buffer {} into RAM", buffer_index);
        }
        Ok(())
    }

    fn allocate_new_disk_buffer(&mut self) -> Result<()> {
        let bytes = self.disk.allocate_next_buffer()?;
        let buffer_index = self.disk.num_buffers() - 1;
        self.buffers.push(Some(RamBuffer::new(buffer_index, bytes)));
        Ok(())
    }

    fn allocate_ignore_free(&mut self) -> Result<BrickAddress> {
        let brick_size = self.disk.brick_memory_size()?;
        let buffer_size = self.disk.buffer_size_bytes()?;
        let addr = BrickAddress::from_raw(self.next_address);
        while addr.buffer_index(buffer_size) >= self.disk.num_buffers() {
            self.allocate_new_disk_buffer()?;
        }
        self.next_address += brick_size as u64;
        Ok(addr)
    }

    fn allocate_use_free(&mut self) -> Result<BrickAddress> {
        let buffer_size = self.disk.buffer_size_bytes()? as u64;
        // keep filling the newest buffer before reaching for deleted bricks
        if self.next_address % buffer_size != 0 {
            return self.allocate_ignore_free();
        }
        if let Some(addr) = self.free_bricks.pop() {
            return Ok(addr);
        }
        self.allocate_ignore_free()
    }

    fn delete_brick(&mut self, addr: BrickAddress) -> Result<()> {
        ensure!(
            !self.checkouts.is_checked_out(addr),
            "brick {} is checked out and cannot be deleted",
            addr
        );
        let buffer_size = self.disk.buffer_size_bytes()?;
        let buffer_index = addr.buffer_index(buffer_size);
        ensure!(
            buffer_index < self.disk.num_buffers(),
            "buffer {} has not been allocated ({} buffers exist)",
            buffer_index,
            self.disk.num_buffers()
        );
        self.free_bricks.push(addr);
        Ok(())
    }

    fn checkout(&mut self, addr: BrickAddress, writable: bool) -> Result<(NonNull<u8>, usize)> {
        let brick_size = self.disk.brick_memory_size()?;
        let buffer_size = self.disk.buffer_size_bytes()?;
        let byte_offset = addr.byte_offset(buffer_size);
        ensure!(
            byte_offset % brick_size == 0,
            "address {} is not aligned to the {} byte brick size",
            addr,
            brick_size
        );

        if writable {
            ensure!(
                !self.checkouts.is_checked_out(addr),
                "brick {} is already checked out",
                addr
            );
        } else {
            ensure!(
                !self.checkouts.has_writer(addr),
                "brick {} is checked out for writing",
                addr
            );
        }

        let buffer_index = addr.buffer_index(buffer_size);
        self.ensure_resident(buffer_index)?;

        let newly_tracked = if writable {
            self.checkouts.begin_write(addr);
            true
        } else {
            self.checkouts.begin_read(addr)
        };

        let resident = self.buffers[buffer_index]
            .as_mut()
            .expect("buffer not resident"); // INVARIANT: ensure_resident loaded it
        debug_assert!(byte_offset + brick_size <= resident.len());
        if newly_tracked {
            resident.add_brick_in_use();
        }
        if writable {
            resident.mark_dirty();
        }
        Ok((resident.brick_ptr(byte_offset), brick_size))
    }

    fn release(&mut self, addr: BrickAddress) {
        if !self.checkouts.release(addr) {
            return;
        }
        let buffer_size = match self.disk.buffer_size_bytes() {
            Ok(size) => size,
            Err(_) => return,
        };
        let buffer_index = addr.buffer_index(buffer_size);
        if let Some(buffer) = self.buffers.get_mut(buffer_index).and_then(Option::as_mut) {
            buffer.remove_brick_in_use();
        } else {
            debug_assert!(false, "released brick in a non-resident buffer");
        }
    }

    fn flush(&mut self) -> Result<()> {
        debug_assert!(
            self.checkouts.is_empty(),
            "flush with {} outstanding checkouts",
            self.checkouts.len()
        );
        for buffer in self.buffers.iter_mut().flatten() {
            if buffer.is_dirty() {
                self.disk
                    .save_buffer(buffer.buffer_index(), buffer.payload())?;
                buffer.clear_dirty();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn touched_buffers_stay_resident() {
        let dir = tempdir().unwrap();
        let mut pool = ResidentBrickPool::new(dir.path(), 128);
        pool.initialize(64).unwrap(); // 2 bricks per buffer

        let addrs: Vec<_> = (0..6).map(|_| pool.allocate_brick().unwrap()).collect();
        assert_eq!(pool.num_buffers_in_ram(), 3);

        let guards: Vec<_> = addrs
            .iter()
            .map(|&addr| pool.get_brick(addr).unwrap().unwrap())
            .collect();
        assert_eq!(pool.num_buffers_in_ram(), 3);
        drop(guards);
        assert_eq!(pool.num_buffers_in_ram(), 3);
    }

    #[test]
    fn reopen_loads_buffers_lazily() {
        let dir = tempdir().unwrap();
        let addr;
        {
            let mut pool = ResidentBrickPool::new(dir.path(), 128);
            pool.initialize(64).unwrap();
            addr = pool.allocate_brick().unwrap();
            pool.allocate_brick().unwrap();
            pool.allocate_brick().unwrap();
            pool.get_writable_brick(addr).unwrap().unwrap().fill(0x5c);
            pool.flush_pool_to_disk().unwrap();
            pool.save_manifest().unwrap();
        }

        let pool = ResidentBrickPool::open(dir.path(), AllocatePolicy::default()).unwrap();
        assert!(pool.is_initialized());
        assert_eq!(pool.num_buffers_in_ram(), 0);

        let brick = pool.get_brick(addr).unwrap().unwrap();
        assert!(brick.iter().all(|&b| b == 0x5c));
        assert_eq!(pool.num_buffers_in_ram(), 1);
    }

    #[test]
    fn description_omits_ram_limit() {
        let dir = tempdir().unwrap();
        let mut pool = ResidentBrickPool::new(dir.path(), 128);
        pool.initialize(64).unwrap();
        pool.allocate_brick().unwrap();

        let description = pool.description();
        assert!(description.starts_with("Single Buffer Size: 128 B"));
        assert!(!description.contains("Max RAM Usage"));
    }
}
