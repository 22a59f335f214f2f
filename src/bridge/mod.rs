//! Seam onto the external recognition package.
//!
//! The package lives outside this process (a Python distribution in
//! production). Everything the resolver needs from it is expressed through
//! three traits: a [`ModuleLoader`] that imports modules by name, the
//! [`ForeignObject`]s it hands back (modules and model handles), and the
//! [`ForeignCallable`] attributes found on them.

mod python;

pub use python::{PythonBridge, PythonBridgeConfig};

use serde_json::{Map, Value};
use std::{fmt, sync::Arc};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    #[error("failed to start worker `{program}`: {reason}")]
    Spawn { program: String, reason: String },
    #[error("worker exited unexpectedly")]
    WorkerExited,
    /// The handle belongs to a worker that is gone. Rebuildable.
    #[error("handle belongs to a worker that has exited")]
    StaleHandle,
    #[error("could not rebuild `{what}` in a new worker: {reason}")]
    Rebind { what: String, reason: String },
    #[error("worker I/O failed: {0}")]
    Io(String),
    #[error("malformed worker message: {0}")]
    Protocol(String),
    #[error("{0}")]
    Import(String),
}

#[derive(Error, Debug, Clone)]
pub enum CallError {
    /// The callee does not take the keyword argument it was given.
    #[error("{0}")]
    UnexpectedKeyword(String),
    #[error("{0}")]
    Raised(String),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Whether a callable takes a given keyword argument, as far as its
/// signature tells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordSupport {
    Accepted,
    Rejected,
    Unknown,
}

pub trait ModuleLoader: Send + Sync {
    fn import(&self, name: &str) -> Result<Arc<dyn ForeignObject>, BridgeError>;
}

pub trait ForeignObject: Send + Sync {
    fn name(&self) -> &str;

    /// Looks up a callable attribute. The name must match exactly.
    fn callable(&self, attr: &str) -> Option<Arc<dyn ForeignCallable>>;

    fn version(&self) -> Option<String>;

    fn location(&self) -> Option<String>;
}

pub trait ForeignCallable: Send + Sync {
    fn qualname(&self) -> &str;

    fn keyword_support(&self, keyword: &str) -> KeywordSupport;

    fn call(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> Result<Value, CallError>;

    /// Calls with no arguments and keeps the result as an object handle.
    fn instantiate(&self) -> Result<Arc<dyn ForeignObject>, CallError>;
}

impl fmt::Debug for dyn ForeignObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignObject")
            .field("name", &self.name())
            .finish()
    }
}

impl fmt::Debug for dyn ForeignCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignCallable")
            .field("qualname", &self.qualname())
            .finish()
    }
}
