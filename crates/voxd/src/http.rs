//! HTTP surface: telemetry exposition and liveness.

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use serde_json::json;

use voxgrid_metrics::{ScalerTelemetry, render_prometheus};

/// Shared state for the handlers.
#[derive(Clone)]
pub struct AppState {
    pub telemetry: ScalerTelemetry,
    /// Whether the control loop is running at all.
    pub autoscaling: bool,
    pub dry_run: bool,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(prometheus_metrics))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = render_prometheus(&state.telemetry.snapshot().await);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// GET /healthz
pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "autoscaling": state.autoscaling,
        "dry_run": state.dry_run,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> AppState {
        AppState {
            telemetry: ScalerTelemetry::new(),
            autoscaling: true,
            dry_run: false,
        }
    }

    #[tokio::test]
    async fn prometheus_endpoint_returns_text() {
        let state = test_state();
        state.telemetry.set_instances("asr", 2).await;

        let resp = prometheus_metrics(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let resp = healthz(State(test_state())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
