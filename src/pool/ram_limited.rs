//! # RAM-Limited Brick Pool
//!
//! The bounded cache variant of [`BrickPoolManager`]. A fixed number of
//! slots (`ram_limit / buffer_size`) hold disk buffers in RAM; every brick
//! access goes through its buffer's slot, loading and evicting on demand.
//!
//! ## Eviction
//!
//! Slots carry a monotonically increasing `last_used` timestamp. A miss
//! fills an empty slot if one exists, otherwise it picks the resident
//! buffer with the smallest timestamp among those with no checked-out
//! bricks, writes it back if dirty, and reuses the slot. When every slot
//! is pinned the access fails with [`AllSlotsInUse`].
//!
//! Timestamps renormalize when the counter would overflow: all resident
//! stamps shift down by the smallest one, preserving their order.
//!
//! ## Allocation
//!
//! `allocate_brick` advances a byte cursor brick by brick and grows the
//! pool by one zeroed buffer file whenever the cursor crosses a buffer
//! boundary. Under [`AllocatePolicy::UseDeletedBricks`] a deleted brick is
//! reused instead, but only once the newest buffer is completely filled.
//! Reused bricks keep their stale payload; callers overwrite them through
//! a writable checkout.

use std::cell::RefCell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::OnceLock;

use eyre::{bail, ensure, Result};
use log::{debug, error};
use sysinfo::System;

use crate::config::{
    DEFAULT_BUFFER_FILE_PREFIX, DEFAULT_MAX_BUFFER_SIZE_BYTES, DEFAULT_RAM_LIMIT_PERCENT,
    MANIFEST_FILE_NAME, MIN_RESIDENT_BUFFERS, RAM_LIMIT_FLOOR,
};
use crate::storage::PoolManifest;

use super::buffer::RamBuffer;
use super::checkout::CheckoutTable;
use super::disk::DiskBrickPool;
use super::{
    format_bytes, AllSlotsInUse, AllocatePolicy, BrickAddress, BrickGuard, BrickGuardMut,
    BrickPoolManager,
};

static SYSTEM_TOTAL_MEMORY: OnceLock<usize> = OnceLock::new();

/// Default RAM limit: a fraction of physical memory, never below the floor.
fn auto_ram_limit() -> usize {
    let total_memory = *SYSTEM_TOTAL_MEMORY.get_or_init(|| {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.total_memory() as usize
    });

    let limit = (total_memory * DEFAULT_RAM_LIMIT_PERCENT) / 100;
    limit.max(RAM_LIMIT_FLOOR)
}

/// Configures and constructs a [`RamLimitedBrickPool`].
///
/// `build` produces a fresh, uninitialized pool; `open` reopens the pool a
/// manifest in the directory describes. When no RAM limit is given, a
/// default is derived from the machine's physical memory.
#[derive(Debug, Clone)]
pub struct RamLimitedBrickPoolBuilder {
    pool_dir: PathBuf,
    max_buffer_size: usize,
    ram_limit: Option<usize>,
    prefix: String,
    policy: AllocatePolicy,
}

impl RamLimitedBrickPoolBuilder {
    pub fn new<P: AsRef<Path>>(pool_dir: P) -> Self {
        Self {
            pool_dir: pool_dir.as_ref().to_path_buf(),
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE_BYTES,
            ram_limit: None,
            prefix: DEFAULT_BUFFER_FILE_PREFIX.to_string(),
            policy: AllocatePolicy::default(),
        }
    }

    /// Upper bound for the buffer size; the effective size is rounded down
    /// to a brick multiple at `initialize`.
    pub fn max_buffer_size(mut self, bytes: usize) -> Self {
        self.max_buffer_size = bytes;
        self
    }

    /// Bound for buffer memory held in RAM. Must hold at least
    /// [`MIN_RESIDENT_BUFFERS`] buffers once the buffer size is known.
    pub fn ram_limit(mut self, bytes: usize) -> Self {
        self.ram_limit = Some(bytes);
        self
    }

    pub fn buffer_file_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    pub fn allocate_policy(mut self, policy: AllocatePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Builds an uninitialized pool over an empty or new directory. Call
    /// [`BrickPoolManager::initialize`] before any brick operation.
    pub fn build(self) -> RamLimitedBrickPool {
        let ram_limit = self.ram_limit.unwrap_or_else(auto_ram_limit);
        let disk = DiskBrickPool::new(&self.pool_dir, &self.prefix, self.max_buffer_size);
        RamLimitedBrickPool {
            ram_limit,
            policy: self.policy,
            inner: RefCell::new(PoolInner::new(disk)),
        }
    }

    /// Reopens a previously saved pool from the manifest in the directory.
    /// Sizing and file naming come from the manifest; the builder's buffer
    /// settings are ignored.
    pub fn open(self) -> Result<RamLimitedBrickPool> {
        let manifest = PoolManifest::load(self.pool_dir.join(MANIFEST_FILE_NAME))?;
        let ram_limit = self.ram_limit.unwrap_or_else(auto_ram_limit);
        RamLimitedBrickPool::restore(&manifest, ram_limit, self.policy)
    }
}

/// Brick pool manager that keeps at most `ram_limit / buffer_size` disk
/// buffers resident, evicting by least recent use.
pub struct RamLimitedBrickPool {
    ram_limit: usize,
    policy: AllocatePolicy,
    inner: RefCell<PoolInner>,
}

impl RamLimitedBrickPool {
    /// Starts configuring a pool over `pool_dir`.
    pub fn builder<P: AsRef<Path>>(pool_dir: P) -> RamLimitedBrickPoolBuilder {
        RamLimitedBrickPoolBuilder::new(pool_dir)
    }

    /// Re-attaches to the pool a manifest describes, picking up its
    /// allocation cursor. The pool comes back initialized.
    pub fn restore(
        manifest: &PoolManifest,
        ram_limit: usize,
        policy: AllocatePolicy,
    ) -> Result<Self> {
        let disk = DiskBrickPool::restore(manifest)?;
        let num_slots = Self::check_ram_limit(ram_limit, &disk)?;

        let mut inner = PoolInner::new(disk);
        inner.slots = (0..num_slots).map(|_| BufferSlot::default()).collect();
        inner.next_address = manifest.next_virtual_memory_address;

        Ok(Self {
            ram_limit,
            policy,
            inner: RefCell::new(inner),
        })
    }

    /// Changes the RAM limit of an initialized pool. All resident buffers
    /// are flushed and dropped, then the slot table is rebuilt for the new
    /// limit. Usage tracking and the deleted-brick free list start over,
    /// so addresses deleted before the change are never reused. On an
    /// uninitialized pool the limit is stored for the coming `initialize`.
    pub fn set_ram_limit(&mut self, ram_limit: usize) -> Result<()> {
        if ram_limit == self.ram_limit {
            return Ok(());
        }
        if !self.is_initialized() {
            self.ram_limit = ram_limit;
            return Ok(());
        }

        let inner = self.inner.get_mut();
        let num_slots = Self::check_ram_limit(ram_limit, &inner.disk)?;
        inner.flush()?;
        inner.slots = (0..num_slots).map(|_| BufferSlot::default()).collect();
        inner.free_bricks.clear();
        inner.next_timestamp = 1;
        self.ram_limit = ram_limit;
        Ok(())
    }

    /// Snapshot of the pool state for serialization.
    pub fn manifest(&self) -> Result<PoolManifest> {
        let inner = self.inner.borrow();
        inner.disk.manifest(inner.next_address)
    }

    /// Writes the manifest into the pool directory and returns its path.
    /// Buffer payloads are not flushed here; pair with
    /// [`BrickPoolManager::flush_pool_to_disk`] for a durable snapshot.
    pub fn save_manifest(&self) -> Result<PathBuf> {
        let inner = self.inner.borrow();
        let manifest = inner.disk.manifest(inner.next_address)?;
        let path = inner.disk.pool_dir().join(MANIFEST_FILE_NAME);
        manifest.save(&path)?;
        Ok(path)
    }

    pub fn ram_limit(&self) -> usize {
        self.ram_limit
    }

    pub fn allocate_policy(&self) -> AllocatePolicy {
        self.policy
    }

    /// Number of buffer slots; zero before `initialize`.
    pub fn num_slots(&self) -> usize {
        self.inner.borrow().slots.len()
    }

    pub fn buffer_size_bytes(&self) -> Result<usize> {
        self.inner.borrow().disk.buffer_size_bytes()
    }

    /// Whether the buffer holding `addr` is currently resident.
    pub fn is_brick_in_ram(&self, addr: BrickAddress) -> bool {
        if addr.is_no_brick() {
            return false;
        }
        let inner = self.inner.borrow();
        match inner.disk.buffer_size_bytes() {
            Ok(buffer_size) => inner
                .find_resident_slot(addr.buffer_index(buffer_size))
                .is_some(),
            Err(_) => false,
        }
    }

    fn check_ram_limit(ram_limit: usize, disk: &DiskBrickPool) -> Result<usize> {
        let buffer_size = disk.buffer_size_bytes()?;
        let num_slots = ram_limit / buffer_size;
        ensure!(
            num_slots >= MIN_RESIDENT_BUFFERS,
            "RAM limit of {} holds {} buffers of {} bytes, need at least {}",
            format_bytes(ram_limit as u64),
            num_slots,
            buffer_size,
            MIN_RESIDENT_BUFFERS
        );
        Ok(num_slots)
    }
}

impl BrickPoolManager for RamLimitedBrickPool {
    fn initialize(&mut self, brick_memory_size: usize) -> Result<()> {
        let ram_limit = self.ram_limit;
        let inner = self.inner.get_mut();
        inner.disk.initialize(brick_memory_size)?;

        let num_slots = match Self::check_ram_limit(ram_limit, &inner.disk) {
            Ok(num_slots) => num_slots,
            Err(err) => {
                inner.disk.deinitialize();
                return Err(err);
            }
        };

        inner.slots = (0..num_slots).map(|_| BufferSlot::default()).collect();
        inner.checkouts.clear();
        inner.free_bricks.clear();
        inner.next_address = 0;
        inner.next_timestamp = 1;
        debug!(
            "initialized brick pool: {} byte bricks, {} byte buffers, {} resident slots",
            brick_memory_size,
            inner.disk.buffer_size_bytes()?,
            num_slots
        );
        Ok(())
    }

    fn deinitialize(&mut self) -> Result<()> {
        if !self.is_initialized() {
            return Ok(());
        }
        let inner = self.inner.get_mut();
        inner.flush()?;
        inner.slots.clear();
        inner.checkouts.clear();
        inner.free_bricks.clear();
        inner.next_address = 0;
        inner.next_timestamp = 1;
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
            "Single Buffer Size: {}, Max RAM Usage: {}, Memory Allocated: {}, Brick Buffers in RAM: {}, RAM Used: {}",
            format_bytes(buffer_size as u64),
            format_bytes(self.ram_limit as u64),
            format_bytes((inner.disk.num_buffers() * buffer_size) as u64),
            inner.num_resident(),
            format_bytes((inner.num_resident() * buffer_size) as u64),
        )
    }
}

impl fmt::Debug for RamLimitedBrickPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RamLimitedBrickPool")
            .field("ram_limit", &self.ram_limit)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Drop for RamLimitedBrickPool {
    fn drop(&mut self) {
        if self.is_initialized() {
            if let Err(err) = self.flush_pool_to_disk() {
                error!("failed to flush brick pool during drop: {err:#}");
            }
        }
    }
}

#[derive(Default)]
struct BufferSlot {
    resident: Option<RamBuffer>,
    last_used: u64,
}

struct PoolInner {
    disk: DiskBrickPool,
    slots: Vec<BufferSlot>,
    checkouts: CheckoutTable,
    free_bricks: Vec<BrickAddress>,
    next_address: u64,
    next_timestamp: u64,
}

impl PoolInner {
    fn new(disk: DiskBrickPool) -> Self {
        Self {
            disk,
            slots: Vec::new(),
            checkouts: CheckoutTable::new(),
            free_bricks: Vec::new(),
            next_address: 0,
            next_timestamp: 1,
        }
    }

    /// Hands out the next LRU timestamp, renormalizing all slots when the
    /// counter would overflow.
    fn tick(&mut self) -> u64 {
        if self.next_timestamp == u64::MAX {
            let min = self
                .slots
                .iter()
                .filter(|slot| slot.resident.is_some())
                .map(|slot| slot.last_used)
                .min()
                .unwrap_or(0);
            let mut max = 0;
            for slot in &mut self.slots {
                if slot.resident.is_some() {
                    slot.last_used -= min;
                    max = max.max(slot.last_used);
                } else {
                    slot.last_used = 0;
                }
            }
            self.next_timestamp = max + 1;
        }
        let stamp = self.next_timestamp;
        self.next_timestamp += 1;
        stamp
    }

    fn touch(&mut self, slot_index: usize) {
        let stamp = self.tick();
        self.slots[slot_index].last_used = stamp;
    }

    fn num_resident(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.resident.is_some())
            .count()
    }

    fn find_resident_slot(&self, buffer_index: usize) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.resident
                .as_ref()
                .map_or(false, |resident| resident.buffer_index() == buffer_index)
        })
    }

    /// Empty slots first, then the least recently used among buffers with
    /// no checked-out bricks. `None` when everything is pinned.
    fn find_victim_slot(&self) -> Option<usize> {
        if let Some(index) = self.slots.iter().position(|slot| slot.resident.is_none()) {
            return Some(index);
        }
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| {
                slot.resident
                    .as_ref()
                    .map_or(false, |resident| resident.bricks_in_use() == 0)
            })
            .min_by_key(|(_, slot)| slot.last_used)
            .map(|(index, _)| index)
    }

    /// Writes back whatever occupies `slot_index` and empties the slot. On
    /// a write-back error the buffer stays resident and dirty.
    fn evict_slot(&mut self, slot_index: usize) -> Result<()> {
        if let Some(buffer) = self.slots[slot_index].resident.as_ref() {
            debug_assert_eq!(buffer.bricks_in_use(), 0, "evicting a pinned buffer");
            if buffer.is_dirty() {
                self.disk
                    .save_buffer(buffer.buffer_index(), buffer.payload())?;
            }
            debug!(
                "evicted buffer {} from slot {}",
                buffer.buffer_index(),
                slot_index
            );
        }
        let slot = &mut self.slots[slot_index];
        slot.resident = None;
        slot.last_used = 0;
        Ok(())
    }

    fn free_up_slot(&mut self) -> Result<usize> {
        let slot_index = match self.find_victim_slot() {
            Some(index) => index,
            None => bail!(AllSlotsInUse {
                slots: self.slots.len()
            }),
        };
        self.evict_slot(slot_index)?;
        Ok(slot_index)
    }

    fn install(&mut self, slot_index: usize, buffer: RamBuffer) {
        self.slots[slot_index].resident = Some(buffer);
        self.touch(slot_index);
    }

    /// Makes the buffer resident (loading and evicting as needed) and
    /// returns its slot.
    fn ensure_resident(&mut self, buffer_index: usize) -> Result<usize> {
        ensure!(
            buffer_index < self.disk.num_buffers(),
            "buffer {} has not been allocated ({} buffers exist)",
            buffer_index,
            self.disk.num_buffers()
        );

        if let Some(slot_index) = self.find_resident_slot(buffer_index) {
            self.touch(slot_index);
            return Ok(slot_index);
        }

        let slot_index = self.free_up_slot()?;
        let bytes = self.disk.load_buffer(buffer_index)?;
        self.install(slot_index, RamBuffer::new(buffer_index, bytes));
        debug!("loaded buffer {} into slot {}", buffer_index, slot_index);
        Ok(slot_index)
    }

    /// Grows the pool by one zeroed buffer file and makes it resident.
    fn allocate_new_disk_buffer(&mut self) -> Result<()> {
        let slot_index = self.free_up_slot()?;
        let bytes = self.disk.allocate_next_buffer()?;
        let buffer_index = self.disk.num_buffers() - 1;
        self.install(slot_index, RamBuffer::new(buffer_index, bytes));
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

    /// Registers a checkout for `addr` and returns the payload pointer.
    /// Conflicting checkouts fail before any load or eviction happens.
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

        let slot_index = self.ensure_resident(addr.buffer_index(buffer_size))?;

        let newly_tracked = if writable {
            self.checkouts.begin_write(addr);
            true
        } else {
            self.checkouts.begin_read(addr)
        };

        let resident = self.slots[slot_index]
            .resident
            .as_mut()
            .expect("buffer not resident"); // INVARIANT: ensure_resident installed it
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
        match self.find_resident_slot(addr.buffer_index(buffer_size)) {
            Some(slot_index) => {
                if let Some(buffer) = self.slots[slot_index].resident.as_mut() {
                    buffer.remove_brick_in_use();
                }
            }
            None => debug_assert!(false, "released brick in a non-resident buffer"),
        }
    }

    /// Writes every dirty resident buffer back to its file.
    fn flush(&mut self) -> Result<()> {
        debug_assert!(
            self.checkouts.is_empty(),
            "flush with {} outstanding checkouts",
            self.checkouts.len()
        );
        for slot in &mut self.slots {
            if let Some(buffer) = slot.resident.as_mut() {
                if buffer.is_dirty() {
                    self.disk
                        .save_buffer(buffer.buffer_index(), buffer.payload())?;
                    buffer.clear_dirty();
                }
            }
        }
        Ok(())
    }
}
