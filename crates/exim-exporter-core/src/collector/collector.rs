//! Collection engine composing the log counters, spool scanner and
//! process classifier.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::collector::log_collector::{LogLine, LogSources, LogStream};
use crate::collector::procfs::role::{self, ProcessRole};
use crate::collector::procfs::{ProcessCollector, ProcessTable};
use crate::collector::spool::{SpoolScanner, SpoolSnapshot};
use crate::collector::traits::FileSystem;
use crate::metrics::Metrics;

/// Runtime settings for the engine, built from the parsed flags.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Executable basename of the Exim processes to classify.
    pub binary_name: String,
    /// Spool input directory.
    pub queue_path: PathBuf,
    /// Soft budget for frozen detection. `Duration::ZERO` disables it.
    pub scan_timeout: Duration,
    pub proc_path: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            binary_name: "exim4".to_string(),
            queue_path: PathBuf::from("/var/spool/exim4/input"),
            scan_timeout: Duration::from_secs(10),
            proc_path: "/proc".to_string(),
        }
    }
}

/// Point-in-time gauges computed on each scrape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub up: bool,
    pub queue: SpoolSnapshot,
    pub process_roles: BTreeMap<ProcessRole, u64>,
}

/// Main engine behind the exporter.
///
/// Counters are updated by the tail loops started with [`Collector::start`];
/// gauges are recomputed from scratch by [`Collector::snapshot`].
pub struct Collector<F: FileSystem + Clone> {
    metrics: Arc<Metrics>,
    spool: SpoolScanner<F>,
    processes: Box<dyn ProcessTable>,
    binary_name: String,
    scan_timeout: Duration,
}

impl<F: FileSystem + Clone + 'static> Collector<F> {
    /// Creates an engine reading the spool and `/proc` through `fs`.
    ///
    /// A missing spool directory is not an error; the queue gauges read 0
    /// until it appears.
    pub fn new(fs: F, config: CollectorConfig, metrics: Arc<Metrics>) -> Self {
        let spool = SpoolScanner::new(fs.clone(), config.queue_path);
        if !fs.exists(spool.root()) {
            warn!(path = %spool.root().display(), "spool input directory not found");
        }
        Self {
            metrics,
            spool,
            processes: Box::new(ProcessCollector::new(fs, config.proc_path)),
            binary_name: config.binary_name,
            scan_timeout: config.scan_timeout,
        }
    }

    /// Replaces the process table source.
    pub fn with_process_table(mut self, table: impl ProcessTable + 'static) -> Self {
        self.processes = Box::new(table);
        self
    }
}

impl<F: FileSystem + Clone> Collector<F> {
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Spawns one consumption loop per log stream.
    ///
    /// Each loop ends when its channel closes. Must be called from within
    /// a tokio runtime.
    pub fn start(&self, sources: LogSources) -> JoinSet<()> {
        let mut tasks = JoinSet::new();
        tasks.spawn(consume(self.metrics.clone(), LogStream::Main, sources.main));
        tasks.spawn(consume(
            self.metrics.clone(),
            LogStream::Reject,
            sources.reject,
        ));
        tasks.spawn(consume(self.metrics.clone(), LogStream::Panic, sources.panic));
        tasks
    }

    /// Classifies one line and applies it to the counters.
    pub fn on_line(&self, stream: LogStream, line: &LogLine) {
        self.metrics.record_line(stream, line);
    }

    /// Classifies the process table and scans the spool.
    ///
    /// Never fails: an unreadable process table yields no roles and an
    /// unreadable spool yields zero counts. Counters are not touched.
    pub fn snapshot(&self) -> Snapshot {
        let start = Instant::now();

        let process_roles = match self.processes.processes() {
            Ok(records) => role::classify(&records, &self.binary_name),
            Err(e) => {
                warn!(error = %e, "failed to read process table");
                BTreeMap::new()
            }
        };
        let up = role::is_up(&process_roles);
        let queue = self.spool.scan(self.scan_timeout);

        debug!(
            up,
            queue = queue.total,
            frozen = queue.frozen,
            timed_out = queue.timed_out,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "snapshot collected"
        );

        Snapshot {
            up,
            queue,
            process_roles,
        }
    }
}

async fn consume(metrics: Arc<Metrics>, stream: LogStream, mut rx: mpsc::Receiver<LogLine>) {
    while let Some(line) = rx.recv().await {
        if let Some(e) = &line.err {
            debug!(%stream, error = %e, "log read error");
        }
        metrics.record_line(stream, &line);
    }
    debug!(%stream, "log stream closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::{MockFs, SPOOL_ROOT, TYPICAL_SPOOL_FROZEN, TYPICAL_SPOOL_TOTAL};
    use crate::collector::log_collector::{MessageFlag, RejectReason};
    use crate::collector::procfs::{CollectError, ProcessRecord};
    use std::io;

    fn typical_fs() -> MockFs {
        let mut fs = MockFs::typical_spool();
        fs.merge(MockFs::exim_processes());
        fs
    }

    fn collector(fs: MockFs) -> Collector<MockFs> {
        let config = CollectorConfig {
            queue_path: PathBuf::from(SPOOL_ROOT),
            ..CollectorConfig::default()
        };
        Collector::new(fs, config, Arc::new(Metrics::new().unwrap()))
    }

    struct FailingTable;

    impl ProcessTable for FailingTable {
        fn processes(&self) -> Result<Vec<ProcessRecord>, CollectError> {
            Err(CollectError::Io(io::Error::from(io::ErrorKind::PermissionDenied)))
        }
    }

    struct FixedTable(Vec<ProcessRecord>);

    impl ProcessTable for FixedTable {
        fn processes(&self) -> Result<Vec<ProcessRecord>, CollectError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_snapshot_typical_system() {
        let snap = collector(typical_fs()).snapshot();
        assert!(snap.up);
        assert_eq!(snap.queue.total, TYPICAL_SPOOL_TOTAL);
        assert_eq!(snap.queue.frozen, TYPICAL_SPOOL_FROZEN);
        assert!(!snap.queue.timed_out);
        assert_eq!(snap.process_roles[&ProcessRole::Daemon], 1);
        assert_eq!(snap.process_roles[&ProcessRole::Handling], 2);
        assert_eq!(snap.process_roles[&ProcessRole::Running], 1);
        assert_eq!(snap.process_roles[&ProcessRole::Delivering], 1);
        assert!(!snap.process_roles.contains_key(&ProcessRole::Other));
    }

    #[test]
    fn test_snapshot_is_repeatable() {
        let collector = collector(typical_fs());
        let first = collector.snapshot();
        assert_eq!(first, collector.snapshot());
        assert_eq!(collector.metrics().read_error_count(), 0);
    }

    #[test]
    fn test_snapshot_json() {
        let snap = collector(typical_fs()).snapshot();
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["up"], true);
        assert_eq!(json["queue"]["total"], 6);
        assert_eq!(json["queue"]["timed_out"], false);
        assert_eq!(json["process_roles"]["daemon"], 1);
        assert_eq!(json["process_roles"]["handling"], 2);
    }

    #[test]
    fn test_snapshot_without_exim() {
        let snap = collector(MockFs::new()).snapshot();
        assert_eq!(snap, Snapshot::default());
    }

    #[test]
    fn test_snapshot_process_table_failure() {
        let collector = collector(MockFs::typical_spool()).with_process_table(FailingTable);
        let snap = collector.snapshot();
        assert!(!snap.up);
        assert!(snap.process_roles.is_empty());
        assert_eq!(snap.queue.total, TYPICAL_SPOOL_TOTAL);
    }

    #[test]
    fn test_snapshot_respects_binary_name() {
        let config = CollectorConfig {
            binary_name: "exim".to_string(),
            queue_path: PathBuf::from(SPOOL_ROOT),
            ..CollectorConfig::default()
        };
        let collector = Collector::new(MockFs::new(), config, Arc::new(Metrics::new().unwrap()))
            .with_process_table(FixedTable(vec![
                ProcessRecord::new(["/usr/sbin/exim", "-bd", "-q1h"], true),
                ProcessRecord::new(["/usr/sbin/exim4", "-bd", "-q1h"], true),
            ]));
        let snap = collector.snapshot();
        assert!(snap.up);
        assert_eq!(snap.process_roles[&ProcessRole::Daemon], 1);
    }

    #[test]
    fn test_on_line() {
        let collector = collector(MockFs::new());
        collector.on_line(
            LogStream::Main,
            &LogLine::text("2024-01-01 00:00:00 1a2B3c-000000-aB <= a@b.com H=mx [192.0.2.1]"),
        );
        collector.on_line(LogStream::Main, &LogLine::error(io::Error::other("boom")));
        let metrics = collector.metrics();
        assert_eq!(metrics.message_count(MessageFlag::Arrived, "", ""), 1);
        assert_eq!(metrics.read_error_count(), 1);
    }

    #[tokio::test]
    async fn test_start_consumes_until_closed() {
        let collector = collector(MockFs::new());
        let (main_tx, main) = mpsc::channel(8);
        let (reject_tx, reject) = mpsc::channel(8);
        let (panic_tx, panic) = mpsc::channel(8);
        let mut tasks = collector.start(LogSources {
            main,
            reject,
            panic,
        });

        main_tx
            .send(LogLine::text(
                "2024-01-01 00:00:00 1a2B3c-000000-aB => a@b.com R=dnslookup T=remote_smtp H=mx",
            ))
            .await
            .unwrap();
        main_tx
            .send(LogLine::text("2024-01-01 00:00:01 1a2B3c-000000-aB Completed"))
            .await
            .unwrap();
        reject_tx
            .send(LogLine::text(
                "2024-01-01 00:00:02 H=(x) [192.0.2.1] F=<a@b.com> rejected RCPT <c@d.com>: SPF check failed",
            ))
            .await
            .unwrap();
        panic_tx
            .send(LogLine::text("2024-01-01 00:00:03 failed to expand"))
            .await
            .unwrap();
        panic_tx
            .send(LogLine::error(io::Error::other("read failed")))
            .await
            .unwrap();
        panic_tx
            .send(LogLine::text("2024-01-01 00:00:04 failed to open DB"))
            .await
            .unwrap();
        drop(main_tx);
        drop(reject_tx);
        drop(panic_tx);

        while let Some(res) = tasks.join_next().await {
            res.unwrap();
        }

        let metrics = collector.metrics();
        assert_eq!(
            metrics.message_count(MessageFlag::Delivered, "dnslookup", "remote_smtp"),
            1
        );
        assert_eq!(metrics.message_count(MessageFlag::Completed, "", ""), 1);
        assert_eq!(metrics.reject_count(RejectReason::SpfCheckFailed), 1);
        // an error line does not end the stream
        assert_eq!(metrics.panic_count(), 2);
        assert_eq!(metrics.read_error_count(), 1);
    }
}
