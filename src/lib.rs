mod bridge;
mod diagnostics;
mod executor;
mod predictor;
mod readiness;
mod routes;
mod server;
mod telemetry;
mod warmup;

#[cfg(test)]
mod test_support;

pub mod app;
pub mod config;
pub mod resolver;

pub use app::{bridge_config, start_app};
pub use bridge::PythonBridge;
pub use predictor::Predictor;
