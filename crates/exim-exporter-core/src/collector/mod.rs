//! Exim telemetry collector.
//!
//! Counters come from the main, reject and panic logs; gauges come from the
//! spool input directory and the process table, recomputed on every call to
//! [`Collector::snapshot`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Collector                           │
//! │  ┌──────────────────┐ ┌──────────────┐ ┌──────────────────┐  │
//! │  │  log_collector   │ │ SpoolScanner │ │ ProcessCollector │  │
//! │  │  - FileTailer    │ │ - input/*-H  │ │ - /proc/[pid]/*  │  │
//! │  │  - parser        │ │ - hysteresis │ │ - role           │  │
//! │  └────────┬─────────┘ └──────┬───────┘ └────────┬─────────┘  │
//! │           │                  └─────────┬────────┘            │
//! │   ┌───────▼──────┐              ┌──────▼──────┐              │
//! │   │   Metrics    │              │  FileSystem │ (trait)      │
//! │   └──────────────┘              └──────┬──────┘              │
//! └────────────────────────────────────────┼─────────────────────┘
//!                                          │
//!                          ┌───────────────┼───────────────┐
//!                   ┌──────▼──────┐ ┌──────▼──────┐ ┌──────▼──────┐
//!                   │   RealFs    │ │   MockFs    │ │  Scenarios  │
//!                   └─────────────┘ └─────────────┘ └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! use exim_exporter_core::collector::{Collector, CollectorConfig, MockFs, SPOOL_ROOT};
//! use exim_exporter_core::metrics::Metrics;
//!
//! let config = CollectorConfig {
//!     queue_path: PathBuf::from(SPOOL_ROOT),
//!     ..CollectorConfig::default()
//! };
//! let metrics = Arc::new(Metrics::new().unwrap());
//! let collector = Collector::new(MockFs::typical_spool(), config, metrics);
//! let snapshot = collector.snapshot();
//! assert_eq!(snapshot.queue.total, 6);
//! ```

#[allow(clippy::module_inception)]
mod collector;
pub mod log_collector;
pub mod mock;
pub mod procfs;
pub mod spool;
pub mod traits;

pub use collector::{Collector, CollectorConfig, Snapshot};
pub use log_collector::{LogLine, LogSources, LogStream, TailError};
pub use mock::{MockFs, SPOOL_ROOT};
pub use procfs::{CollectError, ProcessCollector, ProcessRole, ProcessTable};
pub use spool::{SpoolScanner, SpoolSnapshot};
pub use traits::{FileSystem, RealFs};
