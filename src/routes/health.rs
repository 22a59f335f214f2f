use crate::{readiness::ReadinessStatus, server::SharedState};
use axum::{extract::State, response::IntoResponse, response::Json};
use serde::Serialize;
use tracing::instrument;

pub const ENGINE: &str = "DECIMER";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Serialize)]
pub struct Banner {
    ok: bool,
    message: &'static str,
    version: &'static str,
}

#[instrument]
pub async fn root() -> impl IntoResponse {
    Json(Banner {
        ok: true,
        message: "CloudSmiles up",
        version: VERSION,
    })
}

#[derive(Serialize)]
pub struct Health {
    ok: bool,
    engine: &'static str,
    version: &'static str,
    status: ReadinessStatus,
    ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Reports readiness without ever starting a resolution.
#[instrument(skip(state))]
pub async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    state.metrics.record_request("health");
    let view = state.warmup.status();
    Json(Health {
        ok: view.ok,
        engine: ENGINE,
        version: VERSION,
        status: view.status,
        ready: view.ready,
        error: view.error,
    })
}
