use crate::bridge::ModuleLoader;
use serde::Serialize;
use std::{collections::BTreeMap, panic::AssertUnwindSafe, sync::Arc};

/// Builds a fresh loader for each probe run.
pub type LoaderFactory = Arc<dyn Fn() -> Arc<dyn ModuleLoader> + Send + Sync>;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ModuleReport {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub ok: bool,
    pub modules: BTreeMap<String, ModuleReport>,
    pub errors: Vec<String>,
}

/// Tries to import each module and reports what it finds. Never fails:
/// a module that cannot be imported is just reported as such.
pub fn probe(loader: &dyn ModuleLoader, modules: &[String]) -> ProbeReport {
    let mut report = ProbeReport {
        ok: true,
        modules: BTreeMap::new(),
        errors: Vec::new(),
    };

    for name in modules {
        let imported = std::panic::catch_unwind(AssertUnwindSafe(|| loader.import(name)));
        let entry = match imported {
            Ok(Ok(module)) => ModuleReport {
                ok: true,
                version: module.version(),
                location: module.location(),
            },
            Ok(Err(e)) => {
                report.errors.push(format!("{}: {}", name, e));
                ModuleReport {
                    ok: false,
                    version: None,
                    location: None,
                }
            }
            Err(_) => {
                report.errors.push(format!("{}: probe panicked", name));
                ModuleReport {
                    ok: false,
                    version: None,
                    location: None,
                }
            }
        };
        tracing::debug!(module = name.as_str(), ok = entry.ok, "Probed module");
        report.modules.insert(name.clone(), entry);
    }

    report
}

/// Runs [`probe`] off the async workers with a loader of its own, so a
/// probe never queues behind a model load in progress.
#[derive(Clone)]
pub struct DiagnosticsProbe {
    make_loader: LoaderFactory,
    modules: Vec<String>,
}

impl DiagnosticsProbe {
    pub fn new(make_loader: LoaderFactory, modules: Vec<String>) -> Self {
        Self {
            make_loader,
            modules,
        }
    }

    pub async fn run(&self) -> ProbeReport {
        let make_loader = self.make_loader.clone();
        let modules = self.modules.clone();
        let result = tokio::task::spawn_blocking(move || {
            let loader = make_loader();
            probe(loader.as_ref(), &modules)
        })
        .await;

        result.unwrap_or_else(|e| ProbeReport {
            ok: true,
            modules: BTreeMap::new(),
            errors: vec![format!("probe task failed: {}", e)],
        })
    }
}
