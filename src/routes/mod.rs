use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

mod diagnostics;
mod health;
mod metrics;
mod ocsr;
mod readiness;

pub use diagnostics::diagnostics;
pub use health::{health, root};
pub use metrics::metrics_handler;
pub use ocsr::ocsr;
pub use readiness::{status, warmup};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(root))
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/api/warmup", post(warmup))
        .route("/api/ocsr", post(ocsr))
        .route("/api/diagnostics", get(diagnostics))
        .route("/metrics", get(metrics_handler))
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::{
        bridge::ModuleLoader,
        diagnostics::DiagnosticsProbe,
        executor::RequestExecutor,
        readiness::ReadinessState,
        resolver::Resolve,
        server::SharedState,
        telemetry::Metrics,
        test_support::FakeLoader,
        warmup::WarmupOrchestrator,
    };
    use axum::{body::Body, http::Request, response::Response, Router};
    use std::{sync::Arc, time::Duration};
    use tower::ServiceExt;

    pub fn state_with(resolver: Arc<dyn Resolve>) -> SharedState {
        let warmup = WarmupOrchestrator::new(
            Arc::new(ReadinessState::new()),
            resolver,
            Duration::from_secs(900),
        );
        SharedState {
            executor: RequestExecutor::new(warmup.clone()),
            warmup,
            diagnostics: DiagnosticsProbe::new(
                Arc::new(|| Arc::new(FakeLoader::new()) as Arc<dyn ModuleLoader>),
                vec!["DECIMER".into()],
            ),
            metrics: Arc::new(Metrics::new().expect("metrics")),
        }
    }

    pub fn app(state: SharedState) -> Router {
        super::api_routes().with_state(state)
    }

    pub async fn send(app: Router, request: Request<Body>) -> (Response, serde_json::Value) {
        let response = app.oneshot(request).await.expect("infallible");
        let (parts, body) = response.into_parts();
        let bytes = axum::body::to_bytes(body, usize::MAX).await.expect("body");
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (Response::from_parts(parts, Body::empty()), json)
    }

    pub fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).expect("request")
    }

    pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }
}
