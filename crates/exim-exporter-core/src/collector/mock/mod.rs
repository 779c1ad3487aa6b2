//! Mock filesystem implementations for testing.
//!
//! This module provides `MockFs` and pre-built scenarios for testing
//! collectors without a live Exim installation.

mod filesystem;
mod scenarios;

pub use filesystem::MockFs;
pub use scenarios::{SPOOL_ROOT, TYPICAL_SPOOL_FROZEN, TYPICAL_SPOOL_TOTAL};
