//! # Brick Pool Configuration Module
//!
//! Centralizes the pool's configuration constants. Constants are grouped by
//! functional area and their interdependencies are documented and enforced
//! through compile-time assertions.
//!
//! ## Module Organization
//!
//! - [`constants`]: All configuration values with dependency documentation

pub mod constants;
pub use constants::*;
