//! Process table reader for `/proc/[pid]/`.

use std::path::Path;

use tracing::{debug, trace};

use crate::collector::procfs::parser::{parse_cmdline, parse_proc_stat};
use crate::collector::procfs::role::ProcessRecord;
use crate::collector::traits::FileSystem;

/// Error type for collection failures.
#[derive(Debug)]
pub enum CollectError {
    /// Process disappeared during collection.
    ProcessGone(u32),
    /// I/O error reading process files.
    Io(std::io::Error),
    /// Parse error in process files.
    Parse(String),
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectError::ProcessGone(pid) => write!(f, "process {} disappeared", pid),
            CollectError::Io(e) => write!(f, "I/O error: {}", e),
            CollectError::Parse(msg) => write!(f, "parse error: {}", msg),
        }
    }
}

impl std::error::Error for CollectError {}

impl From<std::io::Error> for CollectError {
    fn from(e: std::io::Error) -> Self {
        CollectError::Io(e)
    }
}

/// Source of process records for role classification.
pub trait ProcessTable: Send + Sync {
    fn processes(&self) -> Result<Vec<ProcessRecord>, CollectError>;
}

/// Reads command lines and process groups from `/proc/[pid]/`.
pub struct ProcessCollector<F: FileSystem> {
    fs: F,
    proc_path: String,
}

impl<F: FileSystem> ProcessCollector<F> {
    /// Creates a new process collector.
    ///
    /// # Arguments
    /// * `fs` - Filesystem implementation (real or mock)
    /// * `proc_path` - Base path to proc filesystem (usually "/proc")
    pub fn new(fs: F, proc_path: impl Into<String>) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
        }
    }

    /// Reads a single process.
    ///
    /// Returns `Ok(None)` for kernel threads, which have no cmdline.
    pub fn collect_process(&self, pid: u32) -> Result<Option<ProcessRecord>, CollectError> {
        let proc_dir = format!("{}/{}", self.proc_path, pid);

        let stat_content = self
            .fs
            .read_to_string(Path::new(&format!("{}/stat", proc_dir)))
            .map_err(|_| CollectError::ProcessGone(pid))?;
        let stat = parse_proc_stat(&stat_content).map_err(|e| CollectError::Parse(e.message))?;

        let cmdline_content = self
            .fs
            .read_to_string(Path::new(&format!("{}/cmdline", proc_dir)))
            .map_err(|_| CollectError::ProcessGone(pid))?;
        let cmdline = parse_cmdline(&cmdline_content);
        if cmdline.is_empty() {
            return Ok(None);
        }

        Ok(Some(ProcessRecord {
            cmdline,
            is_group_leader: i64::from(stat.pgrp) == i64::from(stat.pid),
        }))
    }
}

impl<F: FileSystem> ProcessTable for ProcessCollector<F> {
    /// Collects all user-space processes.
    ///
    /// Processes that disappear during collection are silently skipped.
    fn processes(&self) -> Result<Vec<ProcessRecord>, CollectError> {
        let entries = self.fs.read_dir(Path::new(&self.proc_path))?;

        let mut records = Vec::new();

        for entry in entries {
            // Check if entry is a PID directory (numeric name)
            if let Some(name) = entry.file_name().and_then(|n| n.to_str())
                && let Ok(pid) = name.parse::<u32>()
            {
                match self.collect_process(pid) {
                    Ok(Some(record)) => records.push(record),
                    Ok(None) => {}
                    Err(CollectError::ProcessGone(_)) => {
                        trace!(pid, "process disappeared during collection");
                    }
                    Err(e) => {
                        debug!(pid, error = %e, "failed to read process");
                    }
                }
            }
        }

        Ok(records)
    }
}
