use super::handler::{Handler, HandlerRequest, HandlerResult};
use crate::metrics::SharedMetrics;
use axum::{
    Json,
    http::header,
    response::IntoResponse,
};
use serde_json::json;

const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// GET /api/ping - liveness acknowledgement
pub async fn ping(_request: HandlerRequest) -> HandlerResult {
    Ok(Json(json!({ "message": "ok" })).into_response())
}

/// GET /metrics - Prometheus exposition
pub fn metrics_handler(metrics: SharedMetrics) -> impl Handler {
    move |_request: HandlerRequest| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, crate::errors::AppError>(
                ([(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)], metrics.encode())
                    .into_response(),
            )
        }
    }
}
