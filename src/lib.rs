//! # brickpool - Out-of-Core Brick Storage for Sparse Voxel Octrees
//!
//! A sparse voxel octree stores its payload in equally sized bricks, and
//! for large volumes those bricks do not fit in memory. `brickpool` packs
//! them into fixed-size buffer files on disk, keeps a bounded set of those
//! buffers resident in RAM, and hands out stable 64-bit virtual addresses
//! that survive eviction, flushes, and reopening the pool:
//!
//! - **Stable addresses**: a brick's address never changes, no matter
//!   where its buffer currently lives
//! - **Bounded memory**: at most `ram_limit / buffer_size` buffers are
//!   resident; least recently used buffers are written back and dropped
//! - **Pinned access**: checked-out bricks pin their buffer in RAM, so
//!   payload references stay valid for as long as the caller holds them
//!
//! ## Quick Start
//!
//! ```ignore
//! use brickpool::{BrickPoolManager, RamLimitedBrickPool};
//!
//! let mut pool = RamLimitedBrickPool::builder("./bricks")
//!     .max_buffer_size(64 * 1024 * 1024)
//!     .ram_limit(512 * 1024 * 1024)
//!     .build();
//! pool.initialize(16 * 16 * 16 * 2)?; // brick edge 16, two bytes per voxel
//!
//! let addr = pool.allocate_brick()?;
//! {
//!     let mut brick = pool.get_writable_brick(addr)?.unwrap();
//!     brick.fill(0x2a);
//! } // dropping the guard releases the checkout
//!
//! pool.flush_pool_to_disk()?;
//! pool.save_manifest()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              octree (caller)             │
//! ├──────────────────────────────────────────┤
//! │   BrickPoolManager: allocate / delete /  │
//! │   get bricks, guards pin their buffers   │
//! ├────────────────────┬─────────────────────┤
//! │ RamLimitedBrickPool│  ResidentBrickPool  │
//! │   (LRU, bounded)   │   (load and keep)   │
//! ├────────────────────┴─────────────────────┤
//! │     DiskBrickPool (sizing, manifest)     │
//! ├──────────────────────────────────────────┤
//! │   BufferFileStore (one file per buffer)  │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! ```text
//! pool_dir/
//! ├── brickpool.manifest          # pool metadata (JSON)
//! ├── brickbuffer0000000000.raw   # buffer 0
//! ├── brickbuffer0000000001.raw   # buffer 1
//! └── ...
//! ```
//!
//! Buffer files are raw brick payloads, headerless and exactly one buffer
//! long; everything needed to reopen the pool lives in the manifest.
//!
//! ## Module Overview
//!
//! - [`pool`]: the pool managers, virtual addresses, checkout guards
//! - [`storage`]: buffer files and the pool manifest
//! - [`config`]: defaults and compile-time invariants

pub mod config;
pub mod pool;
pub mod storage;

pub use pool::{
    AllSlotsInUse, AllocatePolicy, BrickAddress, BrickGuard, BrickGuardMut, BrickPoolManager,
    DiskBrickPool, RamLimitedBrickPool, RamLimitedBrickPoolBuilder, ResidentBrickPool,
};
pub use storage::PoolManifest;
