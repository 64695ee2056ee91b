//! # Storage Module
//!
//! The durable side of the brick pool: buffer files on disk plus the
//! manifest that describes them. Everything above this layer (residency,
//! eviction, addressing) lives in [`crate::pool`].
//!
//! ## One Buffer, One File
//!
//! Brick payloads are packed into fixed-size buffers, and every buffer is
//! stored as its own file in the pool directory:
//!
//! ```text
//! pool_dir/
//! ├── brickpool.manifest         # Serialized pool state
//! ├── brickbuffer0000000000.raw  # Buffer 0 (raw payload, no header)
//! ├── brickbuffer0000000001.raw  # Buffer 1
//! └── brickbuffer0000000002.raw  # Buffer 2
//! ```
//!
//! The buffer is the unit of disk I/O: files are always read and written
//! whole, synchronously, with no handle kept open between operations. This
//! keeps the durable layer trivial to reason about; deciding which buffers
//! deserve to sit in RAM is entirely the cache layer's problem.
//!
//! ## Safety Model
//!
//! Nothing in this module hands out long-lived views into shared state.
//! `load_buffer` returns an owned heap buffer; `save_buffer` takes a plain
//! byte slice. The delicate lifetime questions (how long a caller may hold
//! a brick payload) are answered by the pool layer's checkout guards, not
//! here.
//!
//! ## Module Organization
//!
//! - `buffer_file`: Buffer file lifecycle (`BufferFileStore`)
//! - `manifest`: Serialized pool state (`PoolManifest`)

mod buffer_file;
mod manifest;

pub use buffer_file::BufferFileStore;
pub use manifest::PoolManifest;
