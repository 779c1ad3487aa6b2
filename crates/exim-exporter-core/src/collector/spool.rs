//! Exim spool (queue) scanner.
//!
//! Counts `-H` header files under the input directory and its 62
//! `split_spool_directory` shards, and detects frozen messages by reading
//! the header's variable section. Listing is cheap; opening headers is
//! not, so frozen detection runs under a soft deadline. After an overrun
//! frozen detection stays off until the queue shrinks below 90% of the
//! size that overran.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::collector::traits::FileSystem;

/// Shard subdirectories in Exim's order.
const SHARDS: &[u8; 62] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// `-H` file name lengths: legacy 16-char ids and current 23-char ids.
const LEGACY_HEADER_NAME_LEN: usize = 18;
const CURRENT_HEADER_NAME_LEN: usize = 25;

/// Fixed-position header lines before the variable section.
const FIXED_HEADER_LINES: usize = 4;

const FROZEN_MARKER: &str = "-frozen";

/// Queue size below which a prior overrun stops suppressing frozen detection.
const HYSTERESIS_RATIO: f64 = 0.9;

/// Queue gauges from one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SpoolSnapshot {
    pub total: u64,
    /// Always 0 when `timed_out` is set.
    pub frozen: u64,
    pub timed_out: bool,
}

/// Scans the spool input directory.
///
/// Holds the timeout hysteresis across calls. Scans are serialized: the
/// hysteresis lock is held from listing until the result is returned, so
/// a caller never acts on a value another scan has since replaced.
pub struct SpoolScanner<F: FileSystem> {
    fs: F,
    root: PathBuf,
    /// Total seen at the last overrun; 0 when clear.
    last_timed_out_total: Mutex<f64>,
}

impl<F: FileSystem> SpoolScanner<F> {
    pub fn new(fs: F, root: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            root: root.into(),
            last_timed_out_total: Mutex::new(0.0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scans the queue. A zero `budget` disables the deadline.
    ///
    /// The budget starts once any concurrent scan has finished.
    pub fn scan(&self, budget: Duration) -> SpoolSnapshot {
        let mut last_timed_out = self.lock_hysteresis();
        let deadline = if budget.is_zero() {
            None
        } else {
            Instant::now().checked_add(budget)
        };
        self.scan_locked(&mut last_timed_out, deadline)
    }

    /// Scans the queue, abandoning frozen detection once `deadline` passes.
    pub fn scan_until(&self, deadline: Option<Instant>) -> SpoolSnapshot {
        let mut last_timed_out = self.lock_hysteresis();
        self.scan_locked(&mut last_timed_out, deadline)
    }

    fn lock_hysteresis(&self) -> MutexGuard<'_, f64> {
        self.last_timed_out_total
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn scan_locked(&self, last_timed_out: &mut f64, deadline: Option<Instant>) -> SpoolSnapshot {
        let headers = self.list_headers();
        let total = headers.len() as u64;

        let last = *last_timed_out;
        if last > 0.0 {
            if (total as f64) >= last * HYSTERESIS_RATIO {
                debug!(total, last_timed_out_total = last, "skipping frozen detection");
                return SpoolSnapshot {
                    total,
                    frozen: 0,
                    timed_out: true,
                };
            }
            debug!(
                total,
                last_timed_out_total = last,
                "queue shrank, resuming frozen detection"
            );
            *last_timed_out = 0.0;
        }

        let mut frozen = 0;
        for (idx, header) in headers.iter().enumerate() {
            if idx > 0 && deadline.is_some_and(|d| Instant::now() > d) {
                warn!(
                    total,
                    checked = idx,
                    "spool scan exceeded time budget, frozen count unavailable"
                );
                *last_timed_out = total as f64;
                return SpoolSnapshot {
                    total,
                    frozen: 0,
                    timed_out: true,
                };
            }
            if self.is_frozen(header) {
                frozen += 1;
            }
        }

        SpoolSnapshot {
            total,
            frozen,
            timed_out: false,
        }
    }

    /// Lists candidate header files in the root and every shard.
    /// Missing or unreadable directories contribute nothing.
    fn list_headers(&self) -> Vec<PathBuf> {
        let mut headers = Vec::new();
        self.list_dir(&self.root, &mut headers);
        for &shard in SHARDS {
            let dir = self.root.join(char::from(shard).to_string());
            self.list_dir(&dir, &mut headers);
        }
        headers
    }

    fn list_dir(&self, dir: &Path, headers: &mut Vec<PathBuf>) {
        let entries = match self.fs.read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        headers.extend(entries.into_iter().filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(is_header_name)
        }));
    }

    /// Reads the header's variable section looking for `-frozen`.
    /// A header that vanished or cannot be read counts as not frozen.
    fn is_frozen(&self, path: &Path) -> bool {
        let reader = match self.fs.open_buffered(path) {
            Ok(reader) => reader,
            Err(_) => return false,
        };
        for line in reader.lines().skip(FIXED_HEADER_LINES) {
            let Ok(line) = line else {
                return false;
            };
            if !line.starts_with('-') {
                return false;
            }
            if line.starts_with(FROZEN_MARKER) {
                return true;
            }
        }
        false
    }
}

/// Header files are `<id>-H` with a legacy or current length id.
fn is_header_name(name: &str) -> bool {
    name.ends_with("-H")
        && (name.len() == LEGACY_HEADER_NAME_LEN || name.len() == CURRENT_HEADER_NAME_LEN)
}
