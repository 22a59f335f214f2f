use crate::{
    predictor::Predictor,
    readiness::{LoadingTicket, ReadinessState, ReadinessStatus, StatusView, Trigger},
    resolver::Resolve,
};
use std::{sync::Arc, time::Duration};

/// Called once per finished resolution attempt with its outcome and duration.
pub type CompletionHook = Arc<dyn Fn(ReadinessStatus, Duration) + Send + Sync>;

/// Drives resolution attempts against the shared [`ReadinessState`].
#[derive(Clone)]
pub struct WarmupOrchestrator {
    state: Arc<ReadinessState>,
    resolver: Arc<dyn Resolve>,
    timeout: Duration,
    on_complete: Option<CompletionHook>,
}

impl WarmupOrchestrator {
    pub fn new(state: Arc<ReadinessState>, resolver: Arc<dyn Resolve>, timeout: Duration) -> Self {
        Self {
            state,
            resolver,
            timeout,
            on_complete: None,
        }
    }

    pub fn with_completion_hook(mut self, hook: CompletionHook) -> Self {
        self.on_complete = Some(hook);
        self
    }

    pub fn status(&self) -> StatusView {
        self.state.get_status(self.timeout)
    }

    pub fn predictor(&self) -> Option<Arc<Predictor>> {
        self.state.predictor()
    }

    /// Starts a background resolution unless one is running or the
    /// predictor is already there. Never waits for the resolution itself.
    /// Must be called from within a tokio runtime.
    pub fn start_warmup(&self) -> StatusView {
        match self.state.begin(Trigger::Explicit) {
            Some(ticket) => {
                let resolver = self.resolver.clone();
                let hook = self.on_complete.clone();
                tokio::task::spawn_blocking(move || run_resolution(ticket, resolver, hook));
                tracing::info!("Warmup dispatched");
            }
            None if self.state.is_loading() => tracing::debug!("Warmup already in progress"),
            None => tracing::debug!("Nothing to warm up"),
        }
        self.status()
    }

    /// Resolves inline if nothing was ever attempted, waiting for the result.
    /// Otherwise returns the current status straight away.
    pub async fn ensure_attempted(&self) -> StatusView {
        if let Some(ticket) = self.state.begin(Trigger::Implicit) {
            tracing::info!("No warmup yet, resolving inline");
            let resolver = self.resolver.clone();
            let hook = self.on_complete.clone();
            if let Err(e) =
                tokio::task::spawn_blocking(move || run_resolution(ticket, resolver, hook)).await
            {
                tracing::error!(error = %e, "Inline resolution task failed");
            }
        }
        self.status()
    }
}

fn run_resolution(ticket: LoadingTicket, resolver: Arc<dyn Resolve>, hook: Option<CompletionHook>) {
    let result = resolver.resolve();
    let elapsed = ticket.elapsed();
    let status = ticket.complete(result);
    if let Some(hook) = hook {
        hook(status, elapsed);
    }
}
