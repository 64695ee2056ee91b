//! # Brick Pool Configuration Constants
//!
//! This module centralizes all configuration constants, grouping
//! interdependent values together and documenting their relationships.
//!
//! ## Dependency Graph
//!
//! ```text
//! DEFAULT_MAX_BUFFER_SIZE_BYTES (64 MiB)
//!       │
//!       ├─> DEFAULT_RAM_LIMIT_BYTES (512 MiB)
//!       │     Must hold at least MIN_RESIDENT_BUFFERS buffers, otherwise
//!       │     a single get_brick could require evicting the buffer the
//!       │     caller is about to read from.
//!       │
//!       └─> RAM_LIMIT_FLOOR (128 MiB)
//!             Lower bound applied to the auto-detected RAM limit so that
//!             default-sized pools always initialize.
//!
//! BUFFER_FILE_INDEX_WIDTH (10)
//!       │
//!       └─> Buffer file names sort lexicographically in allocation order,
//!           which scan_existing relies on.
//! ```
//!
//! ## Critical Invariants
//!
//! Enforced by compile-time assertions below:
//!
//! 1. `MIN_RESIDENT_BUFFERS >= 2` (one buffer being filled, one being read)
//! 2. `DEFAULT_RAM_LIMIT_BYTES` holds at least `MIN_RESIDENT_BUFFERS`
//!    default-sized buffers
//! 3. `RAM_LIMIT_FLOOR` holds at least `MIN_RESIDENT_BUFFERS` default-sized
//!    buffers

// ============================================================================
// POOL SIZING
// These constants are coupled - changing one may require changing others
// ============================================================================

/// Default upper bound for a single brick buffer in bytes (64 MiB).
/// The effective buffer size is this value rounded down to a whole multiple
/// of the brick size at initialize time.
pub const DEFAULT_MAX_BUFFER_SIZE_BYTES: usize = 64 * 1024 * 1024;

/// Default RAM limit for the bounded pool variant in bytes (512 MiB).
/// Determines the number of resident buffer slots:
/// `ram_limit / buffer_size`.
pub const DEFAULT_RAM_LIMIT_BYTES: usize = 512 * 1024 * 1024;

/// Minimum number of buffers the RAM limit must accommodate.
/// With fewer than two slots, composing one brick from another would have
/// to evict the source buffer to load the destination.
pub const MIN_RESIDENT_BUFFERS: usize = 2;

const _: () = assert!(MIN_RESIDENT_BUFFERS >= 2);

const _: () = assert!(
    DEFAULT_RAM_LIMIT_BYTES >= MIN_RESIDENT_BUFFERS * DEFAULT_MAX_BUFFER_SIZE_BYTES,
    "default RAM limit cannot hold the minimum number of default-sized buffers"
);

// ============================================================================
// AUTO-DETECTED RAM LIMIT
// Used when the builder is not given an explicit limit
// ============================================================================

/// Share of total system memory granted to the pool when the RAM limit is
/// auto-detected.
pub const DEFAULT_RAM_LIMIT_PERCENT: usize = 25;

/// Floor for the auto-detected RAM limit in bytes (128 MiB).
/// Even on low-memory systems the pool must hold MIN_RESIDENT_BUFFERS
/// default-sized buffers.
pub const RAM_LIMIT_FLOOR: usize = 128 * 1024 * 1024;

const _: () = assert!(
    RAM_LIMIT_FLOOR >= MIN_RESIDENT_BUFFERS * DEFAULT_MAX_BUFFER_SIZE_BYTES,
    "RAM limit floor cannot hold the minimum number of default-sized buffers"
);

// ============================================================================
// FILE LAYOUT
// Naming scheme for buffer files and the pool manifest
// ============================================================================

/// File name prefix for brick buffer files.
pub const DEFAULT_BUFFER_FILE_PREFIX: &str = "brickbuffer";

/// File extension for brick buffer files.
pub const BUFFER_FILE_EXTENSION: &str = "raw";

/// Zero-padded decimal width of the buffer index in file names.
/// `brickbuffer0000000003.raw` is buffer 3.
pub const BUFFER_FILE_INDEX_WIDTH: usize = 10;

/// Name of the pool manifest file inside the pool directory.
pub const MANIFEST_FILE_NAME: &str = "brickpool.manifest";
