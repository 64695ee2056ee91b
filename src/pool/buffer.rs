//! # Resident Buffers
//!
//! A [`RamBuffer`] is one disk buffer held in RAM: the owned allocation,
//! its buffer index, the dirty flag, and the count of bricks currently
//! checked out of it.
//!
//! The payload is reached exclusively through a base pointer captured when
//! the buffer is installed, never by re-borrowing the owning `Box`. Brick
//! guards hold pointers derived from that base across later pool calls;
//! re-borrowing the allocation to serve an unrelated checkout would
//! invalidate them. The base stays valid until the `RamBuffer` is dropped,
//! because a `Box` allocation never moves.

use std::ptr::NonNull;

/// One buffer resident in RAM.
pub(crate) struct RamBuffer {
    buffer_index: usize,
    data: Box<[u8]>,
    base: NonNull<u8>,
    dirty: bool,
    bricks_in_use: usize,
}

impl RamBuffer {
    /// Takes ownership of a loaded or freshly allocated buffer.
    pub(crate) fn new(buffer_index: usize, mut data: Box<[u8]>) -> Self {
        debug_assert!(!data.is_empty());
        let base = NonNull::new(data.as_mut_ptr()).expect("buffer allocation is non-null");
        Self {
            buffer_index,
            data,
            base,
            dirty: false,
            bricks_in_use: 0,
        }
    }

    pub(crate) fn buffer_index(&self) -> usize {
        self.buffer_index
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub(crate) fn bricks_in_use(&self) -> usize {
        self.bricks_in_use
    }

    pub(crate) fn add_brick_in_use(&mut self) {
        self.bricks_in_use += 1;
    }

    pub(crate) fn remove_brick_in_use(&mut self) {
        debug_assert!(self.bricks_in_use > 0, "in-use count underflow");
        self.bricks_in_use -= 1;
    }

    /// Pointer to the brick payload starting at `offset`.
    pub(crate) fn brick_ptr(&self, offset: usize) -> NonNull<u8> {
        debug_assert!(offset < self.data.len());
        // SAFETY: offset is within the allocation, so base + offset is
        // in bounds and non-null.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) }
    }

    /// The whole buffer, for writing to disk.
    ///
    /// Callers must not hold a writable checkout into this buffer: the
    /// pool flushes either unpinned eviction victims or, under `&mut self`,
    /// a pool with no outstanding guards at all.
    pub(crate) fn payload(&self) -> &[u8] {
        // SAFETY: base points at the start of the owned allocation of
        // data.len() bytes, and callers guarantee no exclusive checkout
        // aliases any of it.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr(), self.data.len()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_survives_struct_moves() {
        let data = vec![7u8; 64].into_boxed_slice();
        let buffer = RamBuffer::new(0, data);
        let before = buffer.payload().as_ptr();

        // move the struct; the heap allocation must not move with it
        let moved = buffer;
        assert_eq!(moved.payload().as_ptr(), before);
        assert_eq!(moved.payload(), &[7u8; 64][..]);
    }

    #[test]
    fn brick_ptr_addresses_the_right_bytes() {
        let mut data = vec![0u8; 256].into_boxed_slice();
        data[64] = 0xAB;
        let buffer = RamBuffer::new(3, data);

        let ptr = buffer.brick_ptr(64);
        // SAFETY: ptr is within the 256-byte buffer and nothing else
        // accesses it during this test.
        let byte = unsafe { *ptr.as_ptr() };
        assert_eq!(byte, 0xAB);
        assert_eq!(buffer.buffer_index(), 3);
        assert_eq!(buffer.len(), 256);
    }

    #[test]
    fn dirty_and_in_use_tracking() {
        let mut buffer = RamBuffer::new(0, vec![0u8; 16].into_boxed_slice());
        assert!(!buffer.is_dirty());
        buffer.mark_dirty();
        assert!(buffer.is_dirty());
        buffer.clear_dirty();
        assert!(!buffer.is_dirty());

        assert_eq!(buffer.bricks_in_use(), 0);
        buffer.add_brick_in_use();
        buffer.add_brick_in_use();
        assert_eq!(buffer.bricks_in_use(), 2);
        buffer.remove_brick_in_use();
        assert_eq!(buffer.bricks_in_use(), 1);
    }
}
