//! Exim log collection.
//!
//! The main, reject and panic logs are each followed by a `FileTailer`
//! thread, or a journal reader when built with the `systemd` feature,
//! that hands raw lines to the engine over a channel. Lines are
//! classified by `parser` and applied to the counters by the engine.

pub mod journal;
pub mod parser;
pub mod tailer;

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;

pub use parser::{LogEvent, MessageFlag, RejectReason};
pub use tailer::{FileTailer, TailError};

/// Capacity of the channel between a reader thread and its consumer.
const LINE_CHANNEL_CAPACITY: usize = 1024;

/// Which Exim log a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Main,
    Reject,
    Panic,
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogStream::Main => "mainlog",
            LogStream::Reject => "rejectlog",
            LogStream::Panic => "paniclog",
        })
    }
}

/// One raw line from a line source. `err` is set when the source hit an
/// I/O error instead of producing a line.
#[derive(Debug)]
pub struct LogLine {
    pub text: String,
    pub err: Option<io::Error>,
}

impl LogLine {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            err: None,
        }
    }

    pub fn error(err: io::Error) -> Self {
        Self {
            text: String::new(),
            err: Some(err),
        }
    }
}

/// The three line streams consumed by the engine.
pub struct LogSources {
    pub main: mpsc::Receiver<LogLine>,
    pub reject: mpsc::Receiver<LogLine>,
    pub panic: mpsc::Receiver<LogLine>,
}

impl LogSources {
    /// Starts file tailers for the three configured log paths.
    ///
    /// Fails if any of the files cannot be opened.
    pub fn follow_files(
        main: PathBuf,
        reject: PathBuf,
        panic: PathBuf,
        poll_interval: Duration,
    ) -> Result<Self, TailError> {
        Ok(Self {
            main: tailer::follow(main, poll_interval)?,
            reject: tailer::follow(reject, poll_interval)?,
            panic: tailer::follow(panic, poll_interval)?,
        })
    }

    /// Starts journal readers for entries logged under `identifier`.
    ///
    /// Fails if the journal cannot be opened.
    #[cfg(feature = "systemd")]
    pub fn follow_journal(identifier: &str, poll_interval: Duration) -> Result<Self, TailError> {
        Ok(Self {
            main: journal::follow(identifier, LogStream::Main, poll_interval)?,
            reject: journal::follow(identifier, LogStream::Reject, poll_interval)?,
            panic: journal::follow(identifier, LogStream::Panic, poll_interval)?,
        })
    }
}
