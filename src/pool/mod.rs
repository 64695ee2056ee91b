//! # Brick Pools
//!
//! Out-of-core storage for the equally sized bricks of a sparse voxel
//! octree. Brick payloads live in fixed-size buffer files on disk; a set
//! of those buffers is held in RAM and bricks are reached through stable
//! virtual addresses, so the octree can be far larger than memory.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         BrickPoolManager (trait)        │
//! ├────────────────────┬────────────────────┤
//! │ RamLimitedBrickPool│ ResidentBrickPool  │
//! ├────────────────────┴────────────────────┤
//! │              DiskBrickPool              │
//! ├─────────────────────────────────────────┤
//! │    BufferFileStore (file per buffer)    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Virtual Addresses
//!
//! A [`BrickAddress`] is the byte position of a brick in the concatenation
//! of all buffers: `buffer_index * buffer_size + byte_offset`. The buffer
//! size is fixed at `initialize` as the largest brick multiple within the
//! configured maximum, so addresses never straddle buffer boundaries and
//! stay valid for the lifetime of the pool, including across save and
//! reopen. [`BrickAddress::NO_BRICK`] marks "no brick": octree nodes for
//! homogeneous regions carry it instead of a payload.
//!
//! ## Checkout Protocol
//!
//! 1. `get_brick(addr)` / `get_writable_brick(addr)` return a guard
//! 2. The guard derefs to the brick payload
//! 3. Dropping the guard releases the checkout
//! 4. Buffers with checked-out bricks are never evicted
//!
//! Any number of read guards may coexist per address; a writable guard is
//! exclusive for its address. A conflicting checkout is an error right
//! away. The manager is single-threaded, so waiting for the conflicting
//! guard to drop could never make progress.
//!
//! ## Usage Example
//!
//! ```ignore
//! use brickpool::{BrickPoolManager, RamLimitedBrickPool};
//!
//! let mut pool = RamLimitedBrickPool::builder("./brickpool")
//!     .max_buffer_size(64 * 1024 * 1024)
//!     .ram_limit(512 * 1024 * 1024)
//!     .build();
//! pool.initialize(16 * 16 * 16 * 2)?; // two bytes per voxel
//!
//! let addr = pool.allocate_brick()?;
//! {
//!     let mut brick = pool.get_writable_brick(addr)?.unwrap();
//!     brick[0] = 0x2a;
//! } // guard dropped, checkout released
//!
//! pool.flush_pool_to_disk()?;
//! ```

use std::fmt;

use eyre::Result;

mod address;
mod buffer;
mod checkout;
mod disk;
mod guard;
mod ram_limited;
mod resident;

pub use address::BrickAddress;
pub use disk::DiskBrickPool;
pub use guard::{BrickGuard, BrickGuardMut};
pub use ram_limited::{RamLimitedBrickPool, RamLimitedBrickPoolBuilder};
pub use resident::ResidentBrickPool;

/// Contract shared by the brick pool variants.
///
/// A brick pool hands out stable virtual addresses for fixed-size bricks
/// and keeps the payloads in fixed-size buffer files on disk. Reading or
/// writing a brick checks it out; the returned guard pins the owning
/// buffer in RAM until dropped.
pub trait BrickPoolManager {
    /// Fixes the brick size in bytes and prepares the pool directory.
    /// Must be called once before any brick operation.
    fn initialize(&mut self, brick_memory_size: usize) -> Result<()>;

    /// Flushes dirty buffers and drops all in-RAM state. A no-op on an
    /// uninitialized pool.
    fn deinitialize(&mut self) -> Result<()>;

    fn is_initialized(&self) -> bool;

    /// The fixed brick payload size in bytes.
    fn brick_memory_size(&self) -> Result<usize>;

    /// Reserves one brick and returns its virtual address, growing the
    /// pool by a zeroed buffer file when needed. A reused brick keeps the
    /// payload the deleted one left behind.
    fn allocate_brick(&self) -> Result<BrickAddress>;

    /// Marks the brick as deleted so its address can be handed out again
    /// under [`AllocatePolicy::UseDeletedBricks`]. Deleting
    /// [`BrickAddress::NO_BRICK`] is a no-op; deleting the same address
    /// twice is not detected. Fails while the brick is checked out.
    fn delete_brick(&self, addr: BrickAddress) -> Result<()>;

    /// Checks the brick out for reading; any number of read checkouts may
    /// coexist. Returns `None` for [`BrickAddress::NO_BRICK`]. Fails if
    /// the brick is checked out for writing, if its buffer was never
    /// allocated, or if no slot can be freed for it (see
    /// [`AllSlotsInUse`]).
    fn get_brick(&self, addr: BrickAddress) -> Result<Option<BrickGuard<'_>>>;

    /// Checks the brick out for writing and marks the owning buffer
    /// dirty. Exclusive: fails if anything is outstanding for `addr`.
    fn get_writable_brick(&self, addr: BrickAddress) -> Result<Option<BrickGuardMut<'_>>>;

    /// Returns one checkout for `addr`. Guards call this on drop. Calling
    /// it by hand while a guard for `addr` is alive drops the pin that
    /// keeps the guard's buffer resident; once the buffer is evicted the
    /// guard dereferences freed memory.
    fn release_brick(&self, addr: BrickAddress);

    /// Writes every dirty resident buffer back to its file.
    fn flush_pool_to_disk(&mut self) -> Result<()>;

    /// Bytes of buffer storage allocated on disk.
    fn memory_allocated(&self) -> u64;

    /// Bytes of buffer storage currently resident in RAM.
    fn memory_used(&self) -> u64;

    fn num_buffers_in_ram(&self) -> usize;

    /// One-line summary of the pool configuration and usage.
    fn description(&self) -> String;
}

/// How `allocate_brick` treats addresses freed by `delete_brick`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocatePolicy {
    /// Deleted bricks are never reused; the pool only grows.
    IgnoreDeletedBricks,
    /// Deleted bricks are handed out again once the newest buffer is
    /// full. Keeps the pool dense under delete churn.
    #[default]
    UseDeletedBricks,
}

/// Every buffer slot holds checked-out bricks, so nothing can be evicted
/// to make room for the requested buffer.
///
/// Recoverable: dropping any guard unpins its buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllSlotsInUse {
    /// Total number of buffer slots.
    pub slots: usize,
}

impl fmt::Display for AllSlotsInUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot evict: all {} resident buffer slots are in use",
            self.slots
        )
    }
}

impl std::error::Error for AllSlotsInUse {}

/// Formats a byte count with a binary-scaled unit, e.g. `1.5 MB`.
pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "kB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_scales_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 kB");
        assert_eq!(format_bytes(64 * 1024 * 1024), "64.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024 / 2), "1.5 GB");
    }

    #[test]
    fn all_slots_in_use_formats_slot_count() {
        let err = AllSlotsInUse { slots: 8 };
        assert_eq!(
            err.to_string(),
            "cannot evict: all 8 resident buffer slots are in use"
        );
    }
}
