use crate::{diagnostics::ProbeReport, server::SharedState};
use axum::{extract::State, response::Json};
use tracing::instrument;

#[instrument(skip(state))]
pub async fn diagnostics(State(state): State<SharedState>) -> Json<ProbeReport> {
    state.metrics.record_request("diagnostics");
    Json(state.diagnostics.run().await)
}
