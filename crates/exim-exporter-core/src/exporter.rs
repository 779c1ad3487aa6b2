//! Prometheus collector exposing the engine.
//!
//! Gauges are recomputed by [`Collector::snapshot`] on every gather and
//! emitted alongside the counter families owned by [`Metrics`].
//!
//! [`Metrics`]: crate::metrics::Metrics

use std::sync::{Arc, Mutex, PoisonError};

use prometheus::core::{Collector as PromCollector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Gauge, GaugeVec, Opts, Registry, TextEncoder};

use crate::collector::{Collector, FileSystem};
use crate::metrics::NAMESPACE;

/// Adapts a [`Collector`] to the `prometheus` collector interface.
pub struct Exporter<F: FileSystem + Clone> {
    collector: Arc<Collector<F>>,
    up: Gauge,
    queue: Gauge,
    queue_frozen: Gauge,
    queue_scan_timeout: Gauge,
    processes: GaugeVec,
    /// Serializes gathers so the gauges collected belong to one snapshot.
    scrape: Mutex<()>,
}

impl<F: FileSystem + Clone> Exporter<F> {
    pub fn new(collector: Arc<Collector<F>>) -> Result<Self, prometheus::Error> {
        let gauge =
            |name: &str, help: &str| Gauge::with_opts(Opts::new(name, help).namespace(NAMESPACE));
        Ok(Self {
            collector,
            up: gauge("up", "Whether or not the main exim daemon is running")?,
            queue: gauge("queue", "Number of messages currently in queue")?,
            queue_frozen: gauge(
                "queue_frozen",
                "Number of frozen messages currently in queue",
            )?,
            queue_scan_timeout: gauge(
                "queue_scan_timeout",
                "Whether the last queue scan exceeded its time budget",
            )?,
            processes: GaugeVec::new(
                Opts::new("processes", "Number of running exim process broken down by state")
                    .namespace(NAMESPACE),
                &["state"],
            )?,
            scrape: Mutex::new(()),
        })
    }

    pub fn collector(&self) -> &Arc<Collector<F>> {
        &self.collector
    }
}

impl<F: FileSystem + Clone> PromCollector for Exporter<F> {
    fn desc(&self) -> Vec<&Desc> {
        let mut descs = Vec::new();
        descs.extend(self.up.desc());
        descs.extend(self.queue.desc());
        descs.extend(self.queue_frozen.desc());
        descs.extend(self.queue_scan_timeout.desc());
        descs.extend(self.processes.desc());
        descs
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let _guard = self.scrape.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = self.collector.snapshot();

        self.up.set(if snapshot.up { 1.0 } else { 0.0 });
        self.queue.set(snapshot.queue.total as f64);
        self.queue_frozen.set(snapshot.queue.frozen as f64);
        self.queue_scan_timeout
            .set(if snapshot.queue.timed_out { 1.0 } else { 0.0 });
        self.processes.reset();
        for (role, count) in &snapshot.process_roles {
            self.processes
                .with_label_values(&[role.as_str()])
                .set(*count as f64);
        }

        let mut families = Vec::new();
        families.extend(self.up.collect());
        families.extend(self.queue.collect());
        families.extend(self.queue_frozen.collect());
        families.extend(self.queue_scan_timeout.collect());
        if !snapshot.process_roles.is_empty() {
            families.extend(self.processes.collect());
        }
        families.extend(self.collector.metrics().registry().gather());
        families
    }
}

/// Renders everything registered in `registry` in the text exposition format.
pub fn render(registry: &Registry) -> Result<String, prometheus::Error> {
    let mut buffer = String::new();
    TextEncoder::new().encode_utf8(&registry.gather(), &mut buffer)?;
    Ok(buffer)
}
