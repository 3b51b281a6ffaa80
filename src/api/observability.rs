use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{Instrument, info, info_span};

use super::AppState;

pub async fn get_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.shared.prometheus_handle.as_ref().map_or_else(
        || "metrics not enabled".to_string(),
        metrics_exporter_prometheus::PrometheusHandle::render,
    )
}

pub async fn healthz() -> impl IntoResponse {
    "ok"
}

/// Records a request span, an `http_requests_total`/`http_request_duration_seconds`
/// metric pair keyed by the matched route (never the raw path, to bound
/// cardinality), and a single structured completion log line.
pub async fn track_metrics(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let uri = req.uri().path().to_string();
    let matched_path = req
        .extensions()
        .get::<axum::extract::MatchedPath>()
        .map(|mp| mp.as_str().to_string());

    let span = info_span!("request", method = %method, path = %uri, route = matched_path.clone());

    async move {
        let response = next.run(req).await;
        let status = response.status().as_u16();
        let metrics_path = matched_path.as_deref().unwrap_or(&uri);

        let labels = [
            ("method", method.clone()),
            ("path", metrics_path.to_string()),
            ("status", status.to_string()),
        ];
        metrics::counter!("http_requests_total", &labels).increment(1);
        metrics::histogram!("http_request_duration_seconds", &labels).record(start.elapsed().as_secs_f64());

        info!(
            status_code = status,
            duration_ms = start.elapsed().as_millis() as u64,
            "request finished"
        );
        response
    }
    .instrument(span)
    .await
}
