//! # Brick Checkout Guards
//!
//! A guard is a live checkout of one brick: it derefs to the brick payload
//! and returns the checkout to the pool when dropped. While any guard for
//! an address exists, the buffer holding that brick is pinned in RAM; the
//! pool will evict other buffers around it but never this one.
//!
//! [`BrickGuard`] is a shared view; any number may coexist for the same
//! brick. [`BrickGuardMut`] is exclusive for its address and marks the
//! owning buffer dirty, so the payload reaches disk on the next flush or
//! eviction.
//!
//! Pointer-invalidating operations (`deinitialize`, `set_ram_limit`,
//! `flush_pool_to_disk`) take `&mut self` on the pool, so they cannot be
//! called while a guard is alive. Releasing is tied to guard drop:
//! calling [`BrickPoolManager::release_brick`] by hand while a guard for
//! that address is alive drops the pin early, and the guard dangles once
//! its buffer is evicted.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use super::{BrickAddress, BrickPoolManager};

/// Shared checkout of one brick payload.
pub struct BrickGuard<'a> {
    pool: &'a dyn BrickPoolManager,
    addr: BrickAddress,
    data: NonNull<u8>,
    len: usize,
}

impl<'a> BrickGuard<'a> {
    /// Wraps a payload pointer the pool just checked out for reading.
    ///
    /// `data` must point at `len` readable bytes that stay valid and
    /// unaliased by writers until the checkout for `addr` is released.
    pub(crate) fn new(
        pool: &'a dyn BrickPoolManager,
        addr: BrickAddress,
        data: NonNull<u8>,
        len: usize,
    ) -> Self {
        Self {
            pool,
            addr,
            data,
            len,
        }
    }

    /// The virtual address this guard is checked out for.
    pub fn address(&self) -> BrickAddress {
        self.addr
    }
}

impl fmt::Debug for BrickGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrickGuard")
            .field("addr", &self.addr)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl Deref for BrickGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: data points into the slot buffer of a resident buffer and
        // was captured while registering a read checkout for addr. Checked-
        // out bricks pin their slot, so the buffer is neither evicted nor
        // overwritten while this guard lives, and the Box allocation does
        // not move. Writable checkouts are exclusive per address, so no
        // &mut [u8] to these bytes can coexist. Relies on the release_brick
        // contract: no manual release for addr while this guard is alive,
        // or the pin ends early and this pointer dangles after eviction.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.len) }
    }
}

impl Drop for BrickGuard<'_> {
    fn drop(&mut self) {
        self.pool.release_brick(self.addr);
    }
}

/// Exclusive writable checkout of one brick payload.
pub struct BrickGuardMut<'a> {
    pool: &'a dyn BrickPoolManager,
    addr: BrickAddress,
    data: NonNull<u8>,
    len: usize,
}

impl<'a> BrickGuardMut<'a> {
    /// Wraps a payload pointer the pool just checked out for writing.
    ///
    /// `data` must point at `len` writable bytes that stay valid until the
    /// checkout for `addr` is released, with no other checkout outstanding
    /// for the same address.
    pub(crate) fn new(
        pool: &'a dyn BrickPoolManager,
        addr: BrickAddress,
        data: NonNull<u8>,
        len: usize,
    ) -> Self {
        Self {
            pool,
            addr,
            data,
            len,
        }
    }

    /// The virtual address this guard is checked out for.
    pub fn address(&self) -> BrickAddress {
        self.addr
    }
}

impl fmt::Debug for BrickGuardMut<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrickGuardMut")
            .field("addr", &self.addr)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl Deref for BrickGuardMut<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: same validity argument as BrickGuard, and this checkout
        // is exclusive for addr, so the pool hands out no other view of
        // these bytes.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.len) }
    }
}

impl DerefMut for BrickGuardMut<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: the checkout is exclusive for addr and the pointer was
        // derived from a &mut borrow of the slot buffer at checkout time.
        // The slot is pinned while the guard lives, bricks within a buffer
        // do not overlap, and the pool reads the buffer back (flush,
        // eviction) only once no checkout is outstanding for it. Relies on
        // the same release_brick contract as BrickGuard: no manual release
        // for addr while this guard is alive.
        unsafe { std::slice::from_raw_parts_mut(self.data.as_ptr(), self.len) }
    }
}

impl Drop for BrickGuardMut<'_> {
    fn drop(&mut self) {
        self.pool.release_brick(self.addr);
    }
}
