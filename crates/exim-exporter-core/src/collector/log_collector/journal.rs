//! systemd journal line source.
//!
//! When Exim logs through syslog the three logs share one identifier and
//! are told apart by priority. Each stream gets its own filtered journal
//! cursor on a dedicated thread, feeding the same channel a file tailer
//! would.

use std::collections::BTreeMap;
use std::io;
use std::thread;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use super::{LogLine, LogStream};

const MESSAGE_FIELD: &str = "MESSAGE";

/// One journal entry: field name to value.
pub type JournalEntry = BTreeMap<String, String>;

/// Syslog priority Exim logs each stream at.
pub fn stream_priority(stream: LogStream) -> u8 {
    match stream {
        LogStream::Main => 6,   // LOG_INFO
        LogStream::Reject => 5, // LOG_NOTICE
        LogStream::Panic => 1,  // LOG_ALERT
    }
}

/// A journal cursor restricted to one stream's entries.
pub trait JournalReader {
    /// Advances to the next entry. `Ok(None)` means caught up.
    fn next_entry(&mut self) -> io::Result<Option<JournalEntry>>;

    /// Blocks until the journal changes or `timeout` passes.
    fn wait(&mut self, timeout: Duration) -> io::Result<()>;
}

enum Step {
    Forwarded,
    Idle,
    Closed,
}

/// Reads at most one entry and forwards it as a line.
fn step<R: JournalReader>(reader: &mut R, tx: &mpsc::Sender<LogLine>) -> Step {
    let line = match reader.next_entry() {
        Ok(Some(mut entry)) => match entry.remove(MESSAGE_FIELD) {
            Some(text) => LogLine::text(text),
            None => LogLine::error(io::Error::new(
                io::ErrorKind::InvalidData,
                "journal entry without MESSAGE",
            )),
        },
        Ok(None) => return Step::Idle,
        Err(e) => {
            if tx.blocking_send(LogLine::error(e)).is_err() {
                return Step::Closed;
            }
            return Step::Idle;
        }
    };
    if tx.blocking_send(line).is_err() {
        return Step::Closed;
    }
    Step::Forwarded
}

/// Forwards entries from `reader` until the receiver is dropped.
///
/// Read failures are forwarded as error lines and reading continues.
pub fn pump<R: JournalReader>(
    reader: &mut R,
    stream: LogStream,
    tx: &mpsc::Sender<LogLine>,
    poll_interval: Duration,
) {
    loop {
        match step(reader, tx) {
            Step::Closed => return,
            Step::Forwarded => continue,
            Step::Idle => {}
        }
        if tx.is_closed() {
            debug!(%stream, "line receiver dropped");
            return;
        }
        if let Err(e) = reader.wait(poll_interval) {
            if tx.blocking_send(LogLine::error(e)).is_err() {
                return;
            }
            thread::sleep(poll_interval);
        }
    }
}

#[cfg(feature = "systemd")]
pub use self::systemd_journal::{SystemdJournal, follow};

#[cfg(feature = "systemd")]
mod systemd_journal {
    use std::io;
    use std::sync::mpsc as sync_mpsc;
    use std::thread;
    use std::time::Duration;

    use systemd::journal::{self, Journal};
    use tokio::sync::mpsc;
    use tracing::info;

    use super::{JournalEntry, JournalReader, pump, stream_priority};
    use crate::collector::log_collector::{LINE_CHANNEL_CAPACITY, LogLine, LogStream, TailError};

    /// Starts following `stream`'s journal entries on a dedicated thread.
    ///
    /// Returns once the journal is open and positioned. The thread exits
    /// once the receiver is dropped.
    pub fn follow(
        identifier: &str,
        stream: LogStream,
        poll_interval: Duration,
    ) -> Result<mpsc::Receiver<LogLine>, TailError> {
        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = sync_mpsc::channel();
        let identifier = identifier.to_string();

        // The journal handle is opened on the reader thread and stays there.
        thread::Builder::new()
            .name(format!("journal-{stream}"))
            .spawn(move || {
                let mut reader = match SystemdJournal::open(&identifier, stream) {
                    Ok(reader) => reader,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                info!(%stream, identifier = %identifier, "following journal");
                pump(&mut reader, stream, &tx, poll_interval);
            })
            .map_err(TailError::Spawn)?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(rx),
            Ok(Err(e)) => Err(TailError::Journal(e)),
            Err(_) => Err(TailError::Journal(io::Error::other(
                "journal reader exited during startup",
            ))),
        }
    }

    /// Local journal filtered to one Exim stream, positioned at its tail.
    pub struct SystemdJournal {
        journal: Journal,
    }

    impl SystemdJournal {
        pub fn open(identifier: &str, stream: LogStream) -> io::Result<Self> {
            let mut journal = journal::OpenOptions::default()
                .open()
                .map_err(io::Error::other)?;
            journal
                .match_add("PRIORITY", stream_priority(stream).to_string())
                .map_err(io::Error::other)?;
            journal
                .match_add("SYSLOG_IDENTIFIER", identifier)
                .map_err(io::Error::other)?;
            journal.seek_tail().map_err(io::Error::other)?;
            // Step back onto the last entry so the next read only returns
            // entries written after startup.
            journal.previous().map_err(io::Error::other)?;
            Ok(Self { journal })
        }
    }

    impl JournalReader for SystemdJournal {
        fn next_entry(&mut self) -> io::Result<Option<JournalEntry>> {
            self.journal.next_entry().map_err(io::Error::other)
        }

        fn wait(&mut self, timeout: Duration) -> io::Result<()> {
            self.journal
                .wait(Some(timeout))
                .map(|_| ())
                .map_err(io::Error::other)
        }
    }
}
