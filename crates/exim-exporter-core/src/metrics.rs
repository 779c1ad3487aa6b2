//! Counter registry fed by the log tail loops.
//!
//! Counters only ever increase and are reset by a process restart. The
//! registry is created once at startup and shared by `Arc` between the
//! tail loops and the scrape path; increments are atomic.

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use tracing::trace;

use crate::collector::log_collector::parser::{classify_main, classify_reject};
use crate::collector::log_collector::{LogEvent, LogLine, LogStream, MessageFlag, RejectReason};

/// Namespace prefix for every exported metric.
pub const NAMESPACE: &str = "exim";

/// Owned counter state of the exporter.
pub struct Metrics {
    registry: Registry,
    messages: IntCounterVec,
    errors: IntCounterVec,
    rejects: IntCounterVec,
    panics: IntCounter,
    read_errors: IntCounter,
}

impl Metrics {
    /// Creates the counters and registers them in a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let messages = IntCounterVec::new(
            Opts::new("messages_total", "Total number of logged messages by flag")
                .namespace(NAMESPACE),
            &["flag", "router", "transport"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new(
                "errors_total",
                "Total number of failed or deferred deliveries by SMTP status",
            )
            .namespace(NAMESPACE),
            &["status", "enhanced"],
        )?;
        let rejects = IntCounterVec::new(
            Opts::new("reject_total", "Total number of logged reject messages")
                .namespace(NAMESPACE),
            &["reason"],
        )?;
        let panics = IntCounter::with_opts(
            Opts::new("panic_total", "Total number of logged panics").namespace(NAMESPACE),
        )?;
        let read_errors = IntCounter::with_opts(
            Opts::new("log_read_errors_total", "Total number of errors reading log lines")
                .namespace(NAMESPACE),
        )?;

        let registry = Registry::new();
        registry.register(Box::new(messages.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(rejects.clone()))?;
        registry.register(Box::new(panics.clone()))?;
        registry.register(Box::new(read_errors.clone()))?;

        Ok(Self {
            registry,
            messages,
            errors,
            rejects,
            panics,
            read_errors,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Applies one classified event to the counters.
    pub fn record(&self, event: &LogEvent) {
        match event {
            LogEvent::Message {
                flag,
                router,
                transport,
            } => self
                .messages
                .with_label_values(&[flag.as_str(), router.as_str(), transport.as_str()])
                .inc(),
            LogEvent::ErrorCode { status, enhanced } => {
                self.errors
                    .with_label_values(&[status.as_str(), enhanced.as_str()])
                    .inc()
            }
            LogEvent::Reject { reason } => {
                self.rejects.with_label_values(&[reason.as_str()]).inc()
            }
            LogEvent::Panic => self.panics.inc(),
            LogEvent::ReadError => self.read_errors.inc(),
        }
    }

    /// Classifies a raw line from `stream` and records the result.
    ///
    /// Never fails: read errors are counted and unclassifiable lines are
    /// dropped.
    pub fn record_line(&self, stream: LogStream, line: &LogLine) {
        if line.err.is_some() {
            self.record(&LogEvent::ReadError);
            return;
        }
        let text = line.text.as_str();
        match stream {
            LogStream::Main => {
                if let Some(classified) = classify_main(text) {
                    trace!(event = ?classified.event, "mainlog event");
                    self.record(&classified.event);
                    if let Some(error_code) = &classified.error_code {
                        self.record(error_code);
                    }
                }
            }
            LogStream::Reject => self.record(&classify_reject(text)),
            LogStream::Panic => self.record(&LogEvent::Panic),
        }
    }

    pub fn message_count(&self, flag: MessageFlag, router: &str, transport: &str) -> u64 {
        self.messages
            .with_label_values(&[flag.as_str(), router, transport])
            .get()
    }

    pub fn error_count(&self, status: &str, enhanced: &str) -> u64 {
        self.errors.with_label_values(&[status, enhanced]).get()
    }

    pub fn reject_count(&self, reason: RejectReason) -> u64 {
        self.rejects.with_label_values(&[reason.as_str()]).get()
    }

    pub fn panic_count(&self) -> u64 {
        self.panics.get()
    }

    pub fn read_error_count(&self) -> u64 {
        self.read_errors.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_record_main_line() {
        let metrics = Metrics::new().unwrap();
        metrics.record_line(
            LogStream::Main,
            &LogLine::text(
                "2024-01-01 00:00:00 1a2B3c-000000-aB ** a@b.com R=dnslookup T=remote_smtp \
                 H=mx.b.com [192.0.2.1]: SMTP error from remote mail server after RCPT TO:<a@b.com>: \
                 550 5.1.1 User unknown",
            ),
        );
        assert_eq!(
            metrics.message_count(MessageFlag::Failed, "dnslookup", "remote_smtp"),
            1
        );
        assert_eq!(metrics.error_count("550", "5.1.1"), 1);
    }

    #[test]
    fn test_record_completed() {
        let metrics = Metrics::new().unwrap();
        metrics.record_line(
            LogStream::Main,
            &LogLine::text("2024-01-01 00:00:00 1a2B3c-000000-aB Completed"),
        );
        assert_eq!(metrics.message_count(MessageFlag::Completed, "", ""), 1);
    }

    #[test]
    fn test_unclassifiable_line_records_nothing() {
        let metrics = Metrics::new().unwrap();
        metrics.record_line(
            LogStream::Main,
            &LogLine::text("2024-01-01 00:00:00 Start queue run: pid=1"),
        );
        assert_eq!(metrics.read_error_count(), 0);
        let families = metrics.registry().gather();
        assert!(
            families
                .iter()
                .all(|f| f.get_name() != "exim_messages_total" || f.get_metric().is_empty())
        );
    }

    #[test]
    fn test_read_error_is_counted_for_any_stream() {
        let metrics = Metrics::new().unwrap();
        metrics.record_line(LogStream::Main, &LogLine::error(io::Error::other("read failed")));
        metrics.record_line(LogStream::Reject, &LogLine::error(io::Error::other("read failed")));
        metrics.record_line(LogStream::Panic, &LogLine::error(io::Error::other("read failed")));
        assert_eq!(metrics.read_error_count(), 3);
        assert_eq!(metrics.panic_count(), 0);
        assert_eq!(metrics.reject_count(RejectReason::Other), 0);
    }

    #[test]
    fn test_panic_lines_always_count() {
        let metrics = Metrics::new().unwrap();
        metrics.record_line(
            LogStream::Panic,
            &LogLine::text("2024-01-01 00:00:00 failed to open DB"),
        );
        metrics.record_line(LogStream::Panic, &LogLine::text(""));
        assert_eq!(metrics.panic_count(), 2);
    }

    #[test]
    fn test_reject_lines() {
        let metrics = Metrics::new().unwrap();
        metrics.record_line(
            LogStream::Reject,
            &LogLine::text(
                "2024-01-01 00:00:00 H=(x) [192.0.2.1] rejected RCPT <c@d.com>: relay not permitted",
            ),
        );
        metrics.record_line(LogStream::Reject, &LogLine::text("Envelope-from: <a@b.com>"));
        assert_eq!(metrics.reject_count(RejectReason::RelayNotPermitted), 1);
        assert_eq!(metrics.reject_count(RejectReason::Other), 1);
    }
}
