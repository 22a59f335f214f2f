//! Turns whatever recognition package is installed into a [`Predictor`].

use crate::{
    bridge::{BridgeError, CallError, ForeignObject, ModuleLoader},
    config::EngineConfig,
    predictor::{BoundCall, Predictor},
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ResolutionError {
    #[error("{}", .failures.join(" | "))]
    Import { failures: Vec<String> },
    #[error("module `{module}` has no usable prediction entry point")]
    NoEntryPoint { module: String },
    #[error("`{factory}` failed to build a model: {source}")]
    Factory {
        factory: String,
        #[source]
        source: CallError,
    },
    #[error("model built by `{factory}` exposes none of {methods:?}")]
    NoModelMethod {
        factory: String,
        methods: Vec<String>,
    },
    #[error("resolution worker panicked")]
    Panicked,
    #[error("no module names configured")]
    NothingToImport,
}

impl ResolutionError {
    /// Failure category, recorded alongside the message in readiness state.
    pub fn kind(&self) -> &'static str {
        match self {
            ResolutionError::Import { .. } | ResolutionError::NothingToImport => "ImportError",
            ResolutionError::NoEntryPoint { .. } | ResolutionError::NoModelMethod { .. } => {
                "MissingEntryPoint"
            }
            ResolutionError::Factory { .. } => "ModelLoadError",
            ResolutionError::Panicked => "WorkerPanic",
        }
    }

    pub fn describe(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}

/// Something that can produce a predictor. Blocking.
pub trait Resolve: Send + Sync + 'static {
    fn resolve(&self) -> Result<Predictor, ResolutionError>;
}

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Import names, canonical first.
    pub module_names: Vec<String>,
    pub entry_points: Vec<String>,
    pub factories: Vec<String>,
    /// Prediction methods looked up on a factory-built model, in priority order.
    pub model_methods: Vec<String>,
    pub hand_drawn_keyword: String,
}

impl From<&EngineConfig> for ResolverSettings {
    fn from(engine: &EngineConfig) -> Self {
        Self {
            module_names: engine.module_names.clone(),
            entry_points: engine.entry_points.clone(),
            factories: engine.factories.clone(),
            model_methods: engine.model_methods.clone(),
            hand_drawn_keyword: engine.hand_drawn_keyword.clone(),
        }
    }
}

pub struct Resolver {
    loader: Arc<dyn ModuleLoader>,
    settings: ResolverSettings,
}

impl Resolver {
    pub fn new(loader: Arc<dyn ModuleLoader>, settings: ResolverSettings) -> Self {
        Self { loader, settings }
    }

    fn import_package(&self) -> Result<Arc<dyn ForeignObject>, ResolutionError> {
        if self.settings.module_names.is_empty() {
            return Err(ResolutionError::NothingToImport);
        }

        let mut failures = Vec::new();
        for name in &self.settings.module_names {
            match self.loader.import(name) {
                Ok(module) => {
                    tracing::info!(module = name.as_str(), "Imported recognition package");
                    return Ok(module);
                }
                Err(BridgeError::Import(reason)) => {
                    tracing::warn!(module = name.as_str(), %reason, "Import failed");
                    failures.push(reason);
                }
                Err(e) => {
                    tracing::warn!(module = name.as_str(), error = %e, "Import failed");
                    failures.push(e.to_string());
                }
            }
        }
        Err(ResolutionError::Import { failures })
    }
}

impl Resolve for Resolver {
    fn resolve(&self) -> Result<Predictor, ResolutionError> {
        let package = self.import_package()?;
        let keyword = &self.settings.hand_drawn_keyword;

        if let Some(entry) = self
            .settings
            .entry_points
            .iter()
            .find_map(|name| package.callable(name))
        {
            tracing::info!(entry_point = entry.qualname(), "Using direct prediction entry point");
            return Ok(Predictor::Direct(BoundCall::new(entry, keyword)));
        }

        let Some((factory_name, factory)) = self
            .settings
            .factories
            .iter()
            .find_map(|name| package.callable(name).map(|f| (name, f)))
        else {
            return Err(ResolutionError::NoEntryPoint {
                module: package.name().to_string(),
            });
        };

        tracing::info!(factory = factory.qualname(), "Building model through factory");
        let model = factory
            .instantiate()
            .map_err(|source| ResolutionError::Factory {
                factory: factory.qualname().to_string(),
                source,
            })?;

        let method = self
            .settings
            .model_methods
            .iter()
            .find_map(|name| model.callable(name))
            .ok_or_else(|| ResolutionError::NoModelMethod {
                factory: factory_name.clone(),
                methods: self.settings.model_methods.clone(),
            })?;

        tracing::info!(method = method.qualname(), "Using model prediction method");
        Ok(Predictor::Factory {
            model,
            method: BoundCall::new(method, keyword),
        })
    }
}
