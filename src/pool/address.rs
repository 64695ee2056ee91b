//! # Virtual Brick Addresses
//!
//! Bricks are identified by stable 64-bit virtual addresses. An address
//! encodes which buffer holds the brick and where inside that buffer its
//! payload starts:
//!
//! ```text
//! address = buffer_index * buffer_size_bytes + byte_offset
//!
//! buffer 0                    buffer 1                    buffer 2
//! ┌─────┬─────┬─────┬─────┐  ┌─────┬─────┬─────┬─────┐  ┌─────┬─ ...
//! │  0  │ 64  │ 128 │ 192 │  │ 256 │ 320 │ 384 │ 448 │  │ 512 │
//! └─────┴─────┴─────┴─────┘  └─────┴─────┴─────┴─────┘  └─────┴─ ...
//!   (64-byte bricks, 256-byte buffers)
//! ```
//!
//! Addresses are handed out by `allocate_brick` and stay valid across
//! eviction, reload, and process restarts; only the buffer size used for
//! encoding must not change. Callers never do this arithmetic themselves,
//! they go through [`BrickAddress::from_parts`] and the decode accessors.
//!
//! The all-bits-set value is reserved as the [`BrickAddress::NO_BRICK`]
//! sentinel. Octree nodes without payload store it in place of a real
//! address, and `get_brick`/`delete_brick` short-circuit on it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable virtual address of a brick inside the pool.
///
/// Opaque to callers; construct with [`BrickAddress::from_parts`] or receive
/// one from `allocate_brick`, decode with [`BrickAddress::buffer_index`] and
/// [`BrickAddress::byte_offset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BrickAddress(u64);

impl BrickAddress {
    /// Sentinel meaning "no brick here". Rejected or short-circuited by
    /// every pool operation that takes an address.
    pub const NO_BRICK: BrickAddress = BrickAddress(u64::MAX);

    /// Wraps a raw address value, e.g. one read back from an octree node.
    pub const fn from_raw(raw: u64) -> Self {
        BrickAddress(raw)
    }

    /// The raw 64-bit value, for embedding in caller data structures.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Whether this is the [`BrickAddress::NO_BRICK`] sentinel.
    pub const fn is_no_brick(self) -> bool {
        self.0 == u64::MAX
    }

    /// Encodes a buffer index and a byte offset within that buffer.
    pub fn from_parts(buffer_index: usize, byte_offset: usize, buffer_size: usize) -> Self {
        debug_assert!(buffer_size > 0);
        debug_assert!(byte_offset < buffer_size);
        BrickAddress(buffer_index as u64 * buffer_size as u64 + byte_offset as u64)
    }

    /// Index of the buffer holding this brick.
    pub fn buffer_index(self, buffer_size: usize) -> usize {
        debug_assert!(!self.is_no_brick());
        debug_assert!(buffer_size > 0);
        (self.0 / buffer_size as u64) as usize
    }

    /// Byte offset of the brick payload within its buffer.
    pub fn byte_offset(self, buffer_size: usize) -> usize {
        debug_assert!(!self.is_no_brick());
        debug_assert!(buffer_size > 0);
        (self.0 % buffer_size as u64) as usize
    }
}

impl fmt::Display for BrickAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_no_brick() {
            write!(f, "<no brick>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let buffer_size = 256;
        for buffer_index in [0usize, 1, 7, 1000] {
            for byte_offset in [0usize, 64, 128, 192] {
                let addr = BrickAddress::from_parts(buffer_index, byte_offset, buffer_size);
                assert_eq!(addr.buffer_index(buffer_size), buffer_index);
                assert_eq!(addr.byte_offset(buffer_size), byte_offset);
            }
        }
    }

    #[test]
    fn addresses_are_contiguous_within_a_buffer() {
        // 3 bricks of 64 bytes in a 192-byte buffer
        let a0 = BrickAddress::from_parts(0, 0, 192);
        let a1 = BrickAddress::from_parts(0, 64, 192);
        let a2 = BrickAddress::from_parts(0, 128, 192);
        let b0 = BrickAddress::from_parts(1, 0, 192);
        assert_eq!(a1.raw() - a0.raw(), 64);
        assert_eq!(a2.raw() - a1.raw(), 64);
        assert_eq!(b0.raw(), 192);
    }

    #[test]
    fn sentinel_is_all_bits_set() {
        assert_eq!(BrickAddress::NO_BRICK.raw(), u64::MAX);
        assert!(BrickAddress::NO_BRICK.is_no_brick());
        assert!(!BrickAddress::from_raw(0).is_no_brick());
    }

    #[test]
    fn display_formats() {
        assert_eq!(BrickAddress::from_raw(320).to_string(), "320");
        assert_eq!(BrickAddress::NO_BRICK.to_string(), "<no brick>");
    }
}
