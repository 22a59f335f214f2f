//! Resolves the recognition package once and runs it on a blank image, so
//! model weights land in the configured cache before the service starts.

use ocsr_service::{
    bridge_config, config,
    resolver::{Resolve, Resolver, ResolverSettings},
    PythonBridge,
};
use std::{sync::Arc, time::Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    let config = config::get_configuration()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().json().with_level(true))
        .init();

    let worker_config = bridge_config(&config.engine);
    for (var, value) in &worker_config.env {
        tracing::info!(var = var.as_str(), value = value.as_str(), "Model cache");
    }

    let bridge = PythonBridge::new(worker_config);
    let resolver = Resolver::new(
        Arc::new(bridge.clone()),
        ResolverSettings::from(&config.engine),
    );

    let started = Instant::now();
    let predictor = resolver.resolve().map_err(|e| {
        tracing::error!(error = %e.describe(), "Could not resolve the recognition package");
        anyhow::anyhow!(e.describe())
    })?;
    tracing::info!(
        predictor = %predictor.describe(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Resolved"
    );

    // a blank image is not a molecule, failing here is fine
    match predictor.warm() {
        Ok(smiles) => tracing::info!(smiles = smiles.as_str(), "Warm prediction finished"),
        Err(e) => tracing::warn!(error = %e, "Warm prediction raised"),
    }

    bridge.shutdown();
    tracing::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Prewarm done"
    );
    Ok(())
}
