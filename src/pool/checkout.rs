//! # Brick Checkout Tracking
//!
//! Tracks which virtual addresses are currently handed out to callers. The
//! table answers the two questions the pool layers need:
//!
//! - Is this address checked out at all? (gates eviction and deletion; a
//!   buffer with checked-out bricks is never evicted)
//! - Is the requested access compatible with outstanding checkouts?
//!
//! Any number of shared (read) checkouts may coexist per address. A
//! writable checkout is exclusive: nothing else may be outstanding for that
//! address while it lives. The pool turns a conflict into an error before
//! calling `begin_read`/`begin_write`; this table only keeps the counts.
//!
//! Single-threaded by design; callers serialize access through the pool's
//! interior mutability.

use std::collections::HashMap;

use super::BrickAddress;

#[derive(Debug, Clone, Copy)]
struct CheckoutState {
    readers: u32,
    writer: bool,
}

/// Per-address reader counts and writer flags for checked-out bricks.
#[derive(Debug, Default)]
pub(crate) struct CheckoutTable {
    states: HashMap<BrickAddress, CheckoutState>,
}

impl CheckoutTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Whether any checkout (read or write) is outstanding for `addr`.
    pub(crate) fn is_checked_out(&self, addr: BrickAddress) -> bool {
        self.states.contains_key(&addr)
    }

    /// Whether a writable checkout is outstanding for `addr`.
    pub(crate) fn has_writer(&self, addr: BrickAddress) -> bool {
        self.states.get(&addr).is_some_and(|s| s.writer)
    }

    /// Registers a shared checkout. Returns true when `addr` was not
    /// checked out before, i.e. the owning slot gains an in-use brick.
    ///
    /// The caller must have rejected the request if a writer is
    /// outstanding.
    pub(crate) fn begin_read(&mut self, addr: BrickAddress) -> bool {
        debug_assert!(!self.has_writer(addr), "read checkout while being written");
        match self.states.get_mut(&addr) {
            Some(state) => {
                state.readers += 1;
                false
            }
            None => {
                self.states.insert(
                    addr,
                    CheckoutState {
                        readers: 1,
                        writer: false,
                    },
                );
                true
            }
        }
    }

    /// Registers an exclusive writable checkout.
    ///
    /// The caller must have rejected the request if anything is
    /// outstanding for `addr`.
    pub(crate) fn begin_write(&mut self, addr: BrickAddress) {
        debug_assert!(!self.is_checked_out(addr), "write checkout while in use");
        self.states.insert(
            addr,
            CheckoutState {
                readers: 0,
                writer: true,
            },
        );
    }

    /// Drops one checkout for `addr`. Returns true when the address left
    /// the table entirely, i.e. the owning slot loses an in-use brick.
    /// Releasing an address that is not checked out is a no-op.
    pub(crate) fn release(&mut self, addr: BrickAddress) -> bool {
        match self.states.get_mut(&addr) {
            Some(state) if state.writer => {
                self.states.remove(&addr);
                true
            }
            Some(state) => {
                state.readers -= 1;
                if state.readers == 0 {
                    self.states.remove(&addr);
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    /// Number of distinct checked-out addresses.
    pub(crate) fn len(&self) -> usize {
        self.states.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.states.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_reads_count_one_address() {
        let mut table = CheckoutTable::new();
        let addr = BrickAddress::from_raw(64);

        assert!(table.begin_read(addr));
        assert!(!table.begin_read(addr));
        assert_eq!(table.len(), 1);

        assert!(!table.release(addr));
        assert!(table.release(addr));
        assert!(table.is_empty());
    }

    #[test]
    fn writer_is_tracked_exclusively() {
        let mut table = CheckoutTable::new();
        let addr = BrickAddress::from_raw(0);

        table.begin_write(addr);
        assert!(table.has_writer(addr));
        assert!(table.is_checked_out(addr));

        assert!(table.release(addr));
        assert!(!table.has_writer(addr));
        assert!(!table.is_checked_out(addr));
    }

    #[test]
    fn release_of_untracked_address_is_a_no_op() {
        let mut table = CheckoutTable::new();
        assert!(!table.release(BrickAddress::from_raw(128)));
        assert!(table.is_empty());
    }

    #[test]
    fn addresses_are_independent() {
        let mut table = CheckoutTable::new();
        let a = BrickAddress::from_raw(0);
        let b = BrickAddress::from_raw(64);

        table.begin_read(a);
        table.begin_write(b);

        assert!(!table.has_writer(a));
        assert!(table.has_writer(b));
        assert_eq!(table.len(), 2);

        table.clear();
        assert!(table.is_empty());
    }
}
