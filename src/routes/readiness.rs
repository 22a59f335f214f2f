use crate::{readiness::StatusView, server::SharedState};
use axum::{extract::State, response::Json};
use tracing::instrument;

#[instrument(skip(state))]
pub async fn status(State(state): State<SharedState>) -> Json<StatusView> {
    state.metrics.record_request("status");
    Json(state.warmup.status())
}

/// Dispatches a background resolution and answers immediately.
#[instrument(skip(state))]
pub async fn warmup(State(state): State<SharedState>) -> Json<StatusView> {
    state.metrics.record_request("warmup");
    Json(state.warmup.start_warmup())
}

#[cfg(test)]
mod tests {
    use crate::{
        predictor::{BoundCall, Predictor},
        routes::testing::{app, get, send, state_with},
        test_support::{FakeCallable, FnResolver, Gate, Shape, HAND_DRAWN},
    };
    use axum::{body::Body, http::Request, http::StatusCode};
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    fn post(uri: &str) -> Request<Body> {
        Request::post(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_warmup_is_idempotent_over_http() {
        let gate = Gate::new();
        let release = gate.clone();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let state = state_with(Arc::new(FnResolver::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            release.wait();
            Ok(Predictor::Direct(BoundCall::new(
                FakeCallable::new("DECIMER.predict_SMILES", Shape::KeywordAware, "C"),
                HAND_DRAWN,
            )))
        })));
        let router = app(state);

        for _ in 0..3 {
            let (response, json) = send(router.clone(), post("/api/warmup")).await;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(json["status"], "loading");
            assert_eq!(json["ready"], false);
        }

        gate.open();
        let mut json = serde_json::Value::Null;
        for _ in 0..500 {
            json = send(router.clone(), get("/api/status")).await.1;
            if json["status"] == "ready" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            json,
            serde_json::json!({ "ok": true, "status": "ready", "ready": true })
        );
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_status_starts_idle() {
        let state = state_with(Arc::new(FnResolver::new(|| {
            Err(crate::resolver::ResolutionError::NothingToImport)
        })));
        let (_, json) = send(app(state), get("/api/status")).await;
        assert_eq!(
            json,
            serde_json::json!({ "ok": true, "status": "idle", "ready": false })
        );
    }
}
