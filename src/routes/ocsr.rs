use crate::{executor::OcsrError, server::SharedState};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::instrument;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcsrBody {
    image_data_url: String,
    /// Absent means hand-drawn; an explicit `null` means not.
    #[serde(default = "default_hand_drawn")]
    hand_drawn: Option<bool>,
}

fn default_hand_drawn() -> Option<bool> {
    Some(true)
}

#[derive(Serialize)]
pub struct OcsrResponse {
    smiles: String,
}

#[derive(Serialize)]
struct ErrorDetail {
    detail: String,
}

impl IntoResponse for OcsrError {
    fn into_response(self) -> Response {
        let status = match self {
            OcsrError::BadInput(_) => StatusCode::BAD_REQUEST,
            OcsrError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            OcsrError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorDetail {
                detail: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[instrument(skip(state, body), fields(hand_drawn = ?body.hand_drawn))]
pub async fn ocsr(
    State(state): State<SharedState>,
    Json(body): Json<OcsrBody>,
) -> Result<Json<OcsrResponse>, OcsrError> {
    state.metrics.record_request("ocsr");
    let hand_drawn = body.hand_drawn.unwrap_or(false);

    let started = Instant::now();
    let result = state
        .executor
        .handle_request(&body.image_data_url, hand_drawn)
        .await;

    match result {
        Ok(smiles) => {
            state.metrics.record_prediction_duration(started.elapsed());
            state.metrics.record_outcome("success");
            Ok(Json(OcsrResponse { smiles }))
        }
        Err(e) => {
            if matches!(e, OcsrError::Inference(_)) {
                state.metrics.record_prediction_duration(started.elapsed());
            }
            tracing::warn!(error = %e, "Recognition request failed");
            state.metrics.record_outcome(e.outcome());
            Err(e)
        }
    }
}
