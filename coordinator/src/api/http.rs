use axum::{
    extract::{Path, State as AxumState},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use drawcast_types::DrawId;
use serde::Serialize;
use std::sync::Arc;

use crate::{Coordinator, PrizeStore};

#[derive(Serialize)]
struct HealthzResponse {
    ok: bool,
}

#[derive(Serialize)]
struct UpstreamErrorResponse {
    error: &'static str,
    detail: String,
}

/// Liveness check for load balancers and venue run-of-show scripts.
pub(super) async fn healthz() -> Response {
    Json(HealthzResponse { ok: true }).into_response()
}

pub(super) async fn config<S: PrizeStore>(
    AxumState(coordinator): AxumState<Arc<Coordinator<S>>>,
) -> Response {
    Json(coordinator.config().clone()).into_response()
}

pub(super) async fn ws_metrics<S: PrizeStore>(
    AxumState(coordinator): AxumState<Arc<Coordinator<S>>>,
) -> Response {
    Json(coordinator.ws_metrics_snapshot()).into_response()
}

pub(super) async fn session_metrics<S: PrizeStore>(
    AxumState(coordinator): AxumState<Arc<Coordinator<S>>>,
) -> Response {
    Json(coordinator.session_metrics_snapshot()).into_response()
}

/// Prize inventory for the controller's pick list, straight from the store.
pub(super) async fn list_prizes<S: PrizeStore>(
    AxumState(coordinator): AxumState<Arc<Coordinator<S>>>,
    Path(draw_id): Path<String>,
) -> Response {
    let draw = DrawId::from(draw_id.as_str());
    match coordinator.store().list_prizes(&draw).await {
        Ok(prizes) => Json(prizes).into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(UpstreamErrorResponse {
                error: "upstream_unavailable",
                detail: err.to_string(),
            }),
        )
            .into_response(),
    }
}

/// Point-in-time session snapshot. The WebSocket is the live feed; this
/// exists for dashboards and debugging.
pub(super) async fn session_snapshot<S: PrizeStore>(
    AxumState(coordinator): AxumState<Arc<Coordinator<S>>>,
    Path(draw_id): Path<String>,
) -> Response {
    let draw = DrawId::from(draw_id.as_str());
    let session = coordinator.session(&draw).await;
    match session.snapshot().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(UpstreamErrorResponse {
                error: "session_unavailable",
                detail: err.to_string(),
            }),
        )
            .into_response(),
    }
}
