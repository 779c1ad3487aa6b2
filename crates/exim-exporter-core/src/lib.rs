//! exim-exporter-core - telemetry collection engine for Exim.
//!
//! Provides:
//! - `collector`: log classification, spool scanning, process roles and
//!   the `Collector` engine that composes them
//! - `metrics`: the owned counter registry updated by the tail loops
//! - `exporter`: Prometheus collector rendering snapshots as gauges

pub mod collector;
pub mod exporter;
pub mod metrics;

/// Version string with git SHA, e.g. "0.1.0 (abc1234)".
pub const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_SHA"), ")");
