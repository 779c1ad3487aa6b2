//! Shared application state.

use std::sync::Arc;

use axum::extract::State;
use prometheus::Registry;

use exim_exporter_core::collector::{Collector, RealFs};

pub(crate) struct AppInner {
    /// Holds the `Exporter` wrapping `collector`.
    pub(crate) registry: Registry,
    pub(crate) collector: Arc<Collector<RealFs>>,
    pub(crate) telemetry_path: String,
}

pub(crate) type SharedState = Arc<AppInner>;

pub(crate) type AppState = State<SharedState>;
