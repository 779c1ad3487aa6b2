//! File tailer for reading new lines from a growing log file.
//!
//! Supports log rotation detection via inode tracking (Linux)
//! and file size comparison.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{LINE_CHANNEL_CAPACITY, LogLine};

/// Maximum number of lines to read in a single `read_new_lines()` call.
/// Prevents unbounded memory usage if the log file has a huge backlog.
const MAX_LINES_PER_READ: usize = 10_000;

/// Error returned when a line source cannot be started.
#[derive(Debug)]
pub enum TailError {
    /// The configured file does not exist or cannot be stat'd.
    Open { path: PathBuf, source: io::Error },
    /// The journal could not be opened or filtered.
    Journal(io::Error),
    /// The reader thread could not be spawned.
    Spawn(io::Error),
}

impl fmt::Display for TailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TailError::Open { path, source } => {
                write!(f, "cannot open {}: {}", path.display(), source)
            }
            TailError::Journal(e) => write!(f, "cannot open journal: {}", e),
            TailError::Spawn(e) => write!(f, "cannot spawn tailer thread: {}", e),
        }
    }
}

impl std::error::Error for TailError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TailError::Open { source, .. } => Some(source),
            TailError::Journal(e) | TailError::Spawn(e) => Some(e),
        }
    }
}

/// Reads new lines appended to a file since the last read position.
///
/// On creation, seeks to the end of the file (does not read old content).
/// On each `read_new_lines()` call, reads complete lines from the last
/// position. A trailing line without `\n` is left for the next call.
/// Detects log rotation via inode change or file truncation.
pub struct FileTailer {
    path: PathBuf,
    offset: u64,
    inode: u64,
    /// Read failure held back because lines preceding it were returned.
    pending_error: Option<io::Error>,
}

impl FileTailer {
    /// Create a new tailer, starting from the end of the file.
    ///
    /// Returns `Err` if the file does not exist or cannot be stat'd.
    pub fn new(path: PathBuf) -> io::Result<Self> {
        let metadata = fs::metadata(&path)?;
        let inode = get_inode(&metadata);
        let offset = metadata.len();

        Ok(Self {
            path,
            offset,
            inode,
            pending_error: None,
        })
    }

    /// Read new lines appended since the last call.
    ///
    /// If the file was rotated (inode changed or size decreased),
    /// re-opens from the beginning of the new file. Invalid UTF-8 is
    /// replaced rather than reported.
    ///
    /// Returns at most `MAX_LINES_PER_READ` lines per call. A read error
    /// after some lines were read is returned by the following call.
    pub fn read_new_lines(&mut self) -> io::Result<Vec<String>> {
        if let Some(e) = self.pending_error.take() {
            return Err(e);
        }

        let metadata = match fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // File gone (rotation in progress); return empty and retry next time
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let current_inode = get_inode(&metadata);
        let current_size = metadata.len();

        // Detect rotation: inode changed or file truncated
        if current_inode != self.inode || current_size < self.offset {
            info!(path = %self.path.display(), "log file rotated, reading from start");
            self.inode = current_inode;
            self.offset = 0;
        }

        // Nothing new to read
        if current_size <= self.offset {
            return Ok(Vec::new());
        }

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.offset))?;

        self.read_lines_from(BufReader::new(file))
    }

    /// Reads complete lines from `reader`, which must be positioned at
    /// `offset`. The offset only advances past lines that are returned.
    fn read_lines_from<R: BufRead>(&mut self, mut reader: R) -> io::Result<Vec<String>> {
        let mut lines = Vec::new();
        let mut buf = Vec::new();

        while lines.len() < MAX_LINES_PER_READ {
            buf.clear();
            let n = match reader.read_until(b'\n', &mut buf) {
                Ok(n) => n,
                Err(e) if lines.is_empty() => return Err(e),
                Err(e) => {
                    self.pending_error = Some(e);
                    break;
                }
            };
            if n == 0 || buf.last() != Some(&b'\n') {
                // EOF or partial line still being written
                break;
            }
            self.offset += n as u64;
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
            lines.push(String::from_utf8_lossy(&buf).into_owned());
        }

        Ok(lines)
    }

    /// Returns the current file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Starts following `path` on a dedicated thread.
///
/// The file must exist at startup. Each complete line is forwarded as a
/// `LogLine`; read failures are forwarded as error lines and the thread
/// keeps polling every `poll_interval`. The thread exits once the
/// receiver is dropped.
pub fn follow(
    path: PathBuf,
    poll_interval: Duration,
) -> Result<mpsc::Receiver<LogLine>, TailError> {
    let mut tailer = FileTailer::new(path.clone()).map_err(|source| TailError::Open {
        path: path.clone(),
        source,
    })?;
    let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);

    let name = path
        .file_name()
        .map(|n| format!("tail-{}", n.to_string_lossy()))
        .unwrap_or_else(|| "tail".to_string());

    thread::Builder::new()
        .name(name)
        .spawn(move || {
            info!(path = %tailer.path().display(), "tailing log file");
            loop {
                let idle = match tailer.read_new_lines() {
                    Ok(lines) => {
                        let idle = lines.is_empty();
                        for line in lines {
                            if tx.blocking_send(LogLine::text(line)).is_err() {
                                return;
                            }
                        }
                        idle
                    }
                    Err(e) => {
                        if tx.blocking_send(LogLine::error(e)).is_err() {
                            return;
                        }
                        true
                    }
                };
                if tx.is_closed() {
                    debug!(path = %tailer.path().display(), "line receiver dropped");
                    return;
                }
                if idle {
                    thread::sleep(poll_interval);
                }
            }
        })
        .map_err(TailError::Spawn)?;

    Ok(rx)
}

/// Extract inode from file metadata (Linux-specific).
#[cfg(unix)]
fn get_inode(metadata: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ino()
}

/// Fallback for non-Unix: always returns 0, relying on size-based rotation detection.
#[cfg(not(unix))]
fn get_inode(_metadata: &std::fs::Metadata) -> u64 {
    0
}
