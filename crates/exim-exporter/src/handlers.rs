use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{Html, IntoResponse, Json, Response};
use tracing::error;

use exim_exporter_core::collector::Snapshot;
use exim_exporter_core::exporter;

use crate::state::AppState;

// ============================================================
// Metrics
// ============================================================

/// Gathers and renders the registry. Gathering scans the spool and
/// `/proc`, so it runs on the blocking pool.
pub(crate) async fn handle_metrics(State(state): AppState) -> Response {
    let rendered = tokio::task::spawn_blocking(move || exporter::render(&state.registry)).await;
    match rendered {
        Ok(Ok(body)) => ([(CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(e) => {
            error!(error = %e, "metrics task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// ============================================================
// API
// ============================================================

pub(crate) async fn handle_health() -> &'static str {
    "ok"
}

/// Computes a snapshot outside the registry. Spool scans are serialized by
/// the scanner, so this may run alongside a scrape.
pub(crate) async fn handle_snapshot(State(state): AppState) -> Result<Json<Snapshot>, StatusCode> {
    let collector = state.collector.clone();
    match tokio::task::spawn_blocking(move || collector.snapshot()).await {
        Ok(snapshot) => Ok(Json(snapshot)),
        Err(e) => {
            error!(error = %e, "snapshot task failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

// ============================================================
// Landing page
// ============================================================

pub(crate) async fn handle_landing(State(state): AppState) -> Html<String> {
    Html(landing_page(&state.telemetry_path))
}

fn landing_page(telemetry_path: &str) -> String {
    format!(
        "<html>\n<head><title>Exim Exporter</title></head>\n<body>\n\
         <h1>Exim Exporter</h1>\n\
         <p>Version {}</p>\n\
         <p><a href=\"{path}\">Metrics</a></p>\n\
         <p><a href=\"/api/v1/snapshot\">Snapshot</a></p>\n\
         </body>\n</html>\n",
        exim_exporter_core::VERSION,
        path = telemetry_path,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landing_page_links_telemetry_path() {
        let page = landing_page("/exim/metrics");
        assert!(page.contains("<a href=\"/exim/metrics\">Metrics</a>"));
        assert!(page.contains(exim_exporter_core::VERSION));
    }
}
