use crate::{predictor::Predictor, resolver::ResolutionError};
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessStatus {
    Idle,
    Loading,
    Ready,
    Error,
}

impl ReadinessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadinessStatus::Idle => "idle",
            ReadinessStatus::Loading => "loading",
            ReadinessStatus::Ready => "ready",
            ReadinessStatus::Error => "error",
        }
    }
}

/// What started a resolution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A warmup call. May re-attempt after a failure.
    Explicit,
    /// A request that found nothing resolved. Only ever acts from `Idle`.
    Implicit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusView {
    pub ok: bool,
    pub status: ReadinessStatus,
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when `status` is `Error` only because loading overran the timeout.
    #[serde(skip)]
    pub timed_out: bool,
}

/// Shared readiness of the prediction capability.
///
/// All transitions happen under one mutex. The loading flag is the guard
/// that keeps a second resolution from starting while one is in flight.
#[derive(Debug)]
pub struct ReadinessState {
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    status: ReadinessStatus,
    loading: bool,
    started_at: Option<Instant>,
    predictor: Option<Arc<Predictor>>,
    last_error: Option<String>,
}

impl Default for ReadinessState {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                status: ReadinessStatus::Idle,
                loading: false,
                started_at: None,
                predictor: None,
                last_error: None,
            }),
        }
    }

    /// Current status. A `Loading` phase older than `timeout` is reported as
    /// an error; the stored state is left alone.
    pub fn get_status(&self, timeout: Duration) -> StatusView {
        let inner = self.inner.lock();

        let overran = inner.status == ReadinessStatus::Loading
            && inner
                .started_at
                .is_some_and(|started| started.elapsed() > timeout);

        if overran {
            return StatusView {
                ok: true,
                status: ReadinessStatus::Error,
                ready: false,
                error: Some(format!(
                    "WarmupTimeout: model loading exceeded {}s",
                    timeout.as_secs()
                )),
                timed_out: true,
            };
        }

        StatusView {
            ok: true,
            status: inner.status,
            ready: inner.status == ReadinessStatus::Ready,
            error: inner.last_error.clone(),
            timed_out: false,
        }
    }

    pub fn predictor(&self) -> Option<Arc<Predictor>> {
        self.inner.lock().predictor.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.lock().loading
    }

    /// Checks and sets the loading guard. Returns a ticket when the caller
    /// has won the right to run a resolution.
    pub fn begin(self: &Arc<Self>, trigger: Trigger) -> Option<LoadingTicket> {
        let mut inner = self.inner.lock();

        if inner.loading || inner.predictor.is_some() {
            return None;
        }
        match (inner.status, trigger) {
            (ReadinessStatus::Idle, _) | (ReadinessStatus::Error, Trigger::Explicit) => {}
            _ => return None,
        }

        let started_at = Instant::now();
        inner.loading = true;
        inner.status = ReadinessStatus::Loading;
        inner.started_at = Some(started_at);
        tracing::info!(?trigger, "Model loading started");

        Some(LoadingTicket {
            state: self.clone(),
            started_at,
            finished: false,
        })
    }
}

/// Proof of holding the loading guard. The guard is released when the
/// ticket is completed or dropped, so a panicking resolution cannot leave
/// the state stuck in `Loading`.
#[derive(Debug)]
pub struct LoadingTicket {
    state: Arc<ReadinessState>,
    started_at: Instant,
    finished: bool,
}

impl LoadingTicket {
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn complete(mut self, result: Result<Predictor, ResolutionError>) -> ReadinessStatus {
        self.finished = true;
        let elapsed = self.elapsed();
        let mut inner = self.state.inner.lock();
        inner.loading = false;

        match result {
            Ok(predictor) => {
                tracing::info!(
                    predictor = %predictor.describe(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Model ready"
                );
                if inner.predictor.is_none() {
                    inner.predictor = Some(Arc::new(predictor));
                }
                inner.status = ReadinessStatus::Ready;
            }
            Err(e) => {
                let description = e.describe();
                tracing::error!(
                    error = %description,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Model loading failed"
                );
                inner.last_error = Some(description);
                inner.status = ReadinessStatus::Error;
            }
        }
        inner.status
    }
}

impl Drop for LoadingTicket {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut inner = self.state.inner.lock();
        inner.loading = false;
        if inner.status == ReadinessStatus::Loading {
            inner.status = ReadinessStatus::Error;
            inner.last_error = Some(ResolutionError::Panicked.describe());
        }
        tracing::error!("Model loading ended without completing");
    }
}
