use crate::bridge::{ModuleLoader, PythonBridge, PythonBridgeConfig};
use crate::config::{Config, EngineConfig};
use crate::diagnostics::DiagnosticsProbe;
use crate::executor::RequestExecutor;
use crate::readiness::{ReadinessState, ReadinessStatus};
use crate::resolver::{Resolver, ResolverSettings};
use crate::server::{HttpServer, SharedState};
use crate::telemetry::Metrics;
use crate::warmup::WarmupOrchestrator;

use std::{sync::Arc, time::Duration};
use tokio::{signal, sync::broadcast};

pub fn bridge_config(engine: &EngineConfig) -> PythonBridgeConfig {
    PythonBridgeConfig {
        program: engine.python.clone(),
        env: engine.worker_env(),
    }
}

pub async fn start_app(config: Config) -> anyhow::Result<()> {
    let metrics = Arc::new(Metrics::new()?);

    let bridge = PythonBridge::new(bridge_config(&config.engine));
    let resolver = Resolver::new(
        Arc::new(bridge.clone()),
        ResolverSettings::from(&config.engine),
    );

    let warmup = WarmupOrchestrator::new(
        Arc::new(ReadinessState::new()),
        Arc::new(resolver),
        config.readiness.get_warmup_timeout(),
    )
    .with_completion_hook({
        let metrics = metrics.clone();
        Arc::new(move |status: ReadinessStatus, elapsed: Duration| {
            metrics.record_warmup(status, elapsed)
        })
    });

    let diagnostics = DiagnosticsProbe::new(
        {
            let probe_config = bridge_config(&config.engine);
            Arc::new(move || {
                Arc::new(PythonBridge::new(probe_config.clone())) as Arc<dyn ModuleLoader>
            })
        },
        config.diagnostics.modules.clone(),
    );

    let state = SharedState {
        executor: RequestExecutor::new(warmup.clone()),
        warmup: warmup.clone(),
        diagnostics,
        metrics,
    };

    let server = HttpServer::new(state, &config.server).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_shutdown_rx = shutdown_tx.subscribe();

    if config.readiness.warmup_on_start {
        let view = warmup.start_warmup();
        tracing::info!(status = view.status.as_str(), "Warmup requested at startup");
    }

    let server_handle = server.run(server_shutdown_rx).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    if let Err(e) = server_handle.await? {
        tracing::error!(error = %e, "Server stopped with an error");
    }
    bridge.shutdown();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
