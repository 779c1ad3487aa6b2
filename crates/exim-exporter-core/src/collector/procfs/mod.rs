//! Process table access through the Linux `/proc` filesystem.
//!
//! `process` enumerates `/proc/[pid]/` into `ProcessRecord`s and `role`
//! turns those records into Exim role counts.

pub mod parser;
pub mod process;
pub mod role;

pub use process::{CollectError, ProcessCollector, ProcessTable};
pub use role::{ProcessRecord, ProcessRole};
