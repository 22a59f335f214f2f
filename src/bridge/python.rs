use super::{BridgeError, CallError, ForeignCallable, ForeignObject, KeywordSupport, ModuleLoader};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::{
    collections::HashMap,
    io::{BufRead, BufReader, Write},
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
    sync::Arc,
};

const WORKER_SCRIPT: &str = include_str!("worker.py");

#[derive(Debug, Clone)]
pub struct PythonBridgeConfig {
    pub program: String,
    pub env: HashMap<String, String>,
}

/// Imports modules inside a long-lived Python worker process.
///
/// The worker is started on first use and restarted on the next import
/// after it dies. Objects handed out by a previous worker stay bound to it
/// and fail with [`BridgeError::WorkerExited`] once it is gone.
#[derive(Clone)]
pub struct PythonBridge {
    worker: Arc<Worker>,
}

impl PythonBridge {
    pub fn new(config: PythonBridgeConfig) -> Self {
        Self {
            worker: Arc::new(Worker {
                config,
                state: Mutex::new(WorkerState {
                    process: None,
                    generation: 0,
                    next_id: 0,
                }),
            }),
        }
    }

    pub fn shutdown(&self) {
        let mut state = self.worker.state.lock();
        if state.process.take().is_some() {
            tracing::debug!("Python worker stopped");
        }
    }
}

impl ModuleLoader for PythonBridge {
    fn import(&self, name: &str) -> Result<Arc<dyn ForeignObject>, BridgeError> {
        let (generation, resp) = self
            .worker
            .request(None, json!({ "op": "import", "module": name }))?;
        if !resp.ok {
            return Err(BridgeError::Import(resp.error_message()));
        }
        let object = PythonObject::from_response(
            self.worker.clone(),
            Origin::Module(name.to_string()),
            generation,
            resp,
            name,
        )?;
        Ok(Arc::new(object))
    }
}

struct Worker {
    config: PythonBridgeConfig,
    state: Mutex<WorkerState>,
}

struct WorkerState {
    process: Option<Process>,
    generation: u64,
    next_id: u64,
}

struct Process {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Drop for Process {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Worker {
    fn spawn(&self) -> Result<Process, BridgeError> {
        let program = &self.config.program;
        let mut child = Command::new(program)
            .args(["-u", "-c", WORKER_SCRIPT])
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| BridgeError::Spawn {
                program: program.clone(),
                reason: e.to_string(),
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        match (stdin, stdout) {
            (Some(stdin), Some(stdout)) => {
                tracing::info!(program = %program, pid = child.id(), "Started Python worker");
                Ok(Process {
                    child,
                    stdin,
                    stdout: BufReader::new(stdout),
                })
            }
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                Err(BridgeError::Spawn {
                    program: program.clone(),
                    reason: "worker pipes unavailable".into(),
                })
            }
        }
    }

    /// Sends one request and waits for its reply. `bound_to` pins the
    /// request to the worker generation that owns the referenced handle;
    /// `None` allows starting a fresh worker.
    fn request(
        &self,
        bound_to: Option<u64>,
        mut body: Value,
    ) -> Result<(u64, WireResponse), BridgeError> {
        let mut state = self.state.lock();

        if let Some(generation) = bound_to {
            if state.process.is_none() || generation != state.generation {
                return Err(BridgeError::StaleHandle);
            }
        }
        if state.process.is_none() {
            let process = self.spawn()?;
            state.generation += 1;
            state.process = Some(process);
        }

        state.next_id += 1;
        let id = state.next_id;
        body["id"] = json!(id);
        let generation = state.generation;

        let result = match state.process.as_mut() {
            Some(process) => exchange(process, &body),
            None => Err(BridgeError::WorkerExited),
        };

        match result {
            Ok(resp) if resp.id == Some(id) => Ok((generation, resp)),
            Ok(resp) => {
                state.process = None;
                Err(BridgeError::Protocol(format!(
                    "expected reply {}, got {:?}",
                    id, resp.id
                )))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Python worker failed, discarding it");
                state.process = None;
                Err(e)
            }
        }
    }
}

impl Worker {
    /// Sends a request against `binding`. If the worker that owned the
    /// handle is gone, rebuilds the handle in a fresh worker and retries once.
    fn request_bound(
        &self,
        binding: &Binding,
        body: impl Fn(u64) -> Value,
    ) -> Result<(u64, WireResponse), BridgeError> {
        let (generation, handle) = binding.current();
        match self.request(Some(generation), body(handle)) {
            Err(BridgeError::StaleHandle) => {
                tracing::info!(
                    object = %binding.origin.describe(),
                    "Worker was restarted, rebuilding handle"
                );
                let (generation, handle) = self.rebind(binding)?;
                self.request(Some(generation), body(handle))
            }
            other => other,
        }
    }

    /// Replays how `binding` was obtained: re-imports the module, and for a
    /// model handle calls its factory again on the rebuilt parent.
    fn rebind(&self, binding: &Binding) -> Result<(u64, u64), BridgeError> {
        let rebuilt = match &binding.origin {
            Origin::Module(name) => self.request(None, json!({ "op": "import", "module": name })),
            Origin::Instance { parent, attr } => {
                let (generation, handle) = self.rebind(parent)?;
                self.request(
                    Some(generation),
                    json!({ "op": "instantiate", "handle": handle, "attr": attr }),
                )
            }
        };

        let fail = |reason: String| BridgeError::Rebind {
            what: binding.origin.describe(),
            reason,
        };
        let (generation, resp) = rebuilt.map_err(|e| fail(e.to_string()))?;
        if !resp.ok {
            return Err(fail(resp.error_message()));
        }
        let handle = resp
            .handle
            .ok_or_else(|| fail("reply without handle".into()))?;

        *binding.current.lock() = (generation, handle);
        Ok((generation, handle))
    }
}

fn exchange(process: &mut Process, body: &Value) -> Result<WireResponse, BridgeError> {
    let mut line =
        serde_json::to_string(body).map_err(|e| BridgeError::Protocol(e.to_string()))?;
    line.push('\n');
    process
        .stdin
        .write_all(line.as_bytes())
        .and_then(|_| process.stdin.flush())
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::BrokenPipe => BridgeError::WorkerExited,
            _ => BridgeError::Io(e.to_string()),
        })?;

    let mut reply = String::new();
    let read = process
        .stdout
        .read_line(&mut reply)
        .map_err(|e| BridgeError::Io(e.to_string()))?;
    if read == 0 {
        return Err(BridgeError::WorkerExited);
    }
    serde_json::from_str(&reply).map_err(|e| BridgeError::Protocol(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    id: Option<u64>,
    ok: bool,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    handle: Option<u64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    callables: HashMap<String, WireSignature>,
}

impl WireResponse {
    fn error_message(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| "unknown worker error".to_string())
    }

    fn into_call_error(self) -> CallError {
        let message = self.error_message();
        match self.kind.as_deref() {
            Some("unexpected_keyword") => CallError::UnexpectedKeyword(message),
            _ => CallError::Raised(message),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct WireSignature {
    params: Option<Vec<String>>,
    #[serde(default)]
    var_keyword: bool,
}

/// How a handle was obtained, so it can be obtained again.
enum Origin {
    Module(String),
    /// Result of calling the no-argument factory `attr` on `parent`.
    Instance { parent: Arc<Binding>, attr: String },
}

impl Origin {
    fn describe(&self) -> String {
        match self {
            Origin::Module(name) => name.clone(),
            Origin::Instance { parent, attr } => {
                format!("{}.{}()", parent.origin.describe(), attr)
            }
        }
    }
}

/// An object handle and the worker generation it lives in. Shared by an
/// object and every callable taken from it, so a rebuild is seen by all.
struct Binding {
    origin: Origin,
    current: Mutex<(u64, u64)>,
}

impl Binding {
    fn new(origin: Origin, generation: u64, handle: u64) -> Arc<Self> {
        Arc::new(Self {
            origin,
            current: Mutex::new((generation, handle)),
        })
    }

    fn current(&self) -> (u64, u64) {
        *self.current.lock()
    }
}

struct PythonObject {
    worker: Arc<Worker>,
    binding: Arc<Binding>,
    name: String,
    version: Option<String>,
    location: Option<String>,
    callables: HashMap<String, WireSignature>,
}

impl PythonObject {
    fn from_response(
        worker: Arc<Worker>,
        origin: Origin,
        generation: u64,
        resp: WireResponse,
        fallback_name: &str,
    ) -> Result<Self, BridgeError> {
        let handle = resp
            .handle
            .ok_or_else(|| BridgeError::Protocol("object reply without handle".into()))?;
        Ok(Self {
            worker,
            binding: Binding::new(origin, generation, handle),
            name: resp.name.unwrap_or_else(|| fallback_name.to_string()),
            version: resp.version,
            location: resp.location,
            callables: resp.callables,
        })
    }
}

impl ForeignObject for PythonObject {
    fn name(&self) -> &str {
        &self.name
    }

    fn callable(&self, attr: &str) -> Option<Arc<dyn ForeignCallable>> {
        let signature = self.callables.get(attr)?.clone();
        Some(Arc::new(PythonCallable {
            worker: self.worker.clone(),
            binding: self.binding.clone(),
            attr: attr.to_string(),
            qualname: format!("{}.{}", self.name, attr),
            signature,
        }))
    }

    fn version(&self) -> Option<String> {
        self.version.clone()
    }

    fn location(&self) -> Option<String> {
        self.location.clone()
    }
}

struct PythonCallable {
    worker: Arc<Worker>,
    binding: Arc<Binding>,
    attr: String,
    qualname: String,
    signature: WireSignature,
}

impl ForeignCallable for PythonCallable {
    fn qualname(&self) -> &str {
        &self.qualname
    }

    fn keyword_support(&self, keyword: &str) -> KeywordSupport {
        match &self.signature.params {
            None => KeywordSupport::Unknown,
            Some(params) if self.signature.var_keyword || params.iter().any(|p| p == keyword) => {
                KeywordSupport::Accepted
            }
            Some(_) => KeywordSupport::Rejected,
        }
    }

    fn call(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> Result<Value, CallError> {
        let (_, resp) = self.worker.request_bound(&self.binding, |handle| {
            json!({
                "op": "call",
                "handle": handle,
                "attr": self.attr,
                "args": args,
                "kwargs": kwargs,
            })
        })?;
        if !resp.ok {
            return Err(resp.into_call_error());
        }
        Ok(resp.value)
    }

    fn instantiate(&self) -> Result<Arc<dyn ForeignObject>, CallError> {
        let (generation, resp) = self.worker.request_bound(&self.binding, |handle| {
            json!({ "op": "instantiate", "handle": handle, "attr": self.attr })
        })?;
        if !resp.ok {
            return Err(resp.into_call_error());
        }
        let origin = Origin::Instance {
            parent: self.binding.clone(),
            attr: self.attr.clone(),
        };
        let object = PythonObject::from_response(
            self.worker.clone(),
            origin,
            generation,
            resp,
            &self.qualname,
        )?;
        Ok(Arc::new(object))
    }
}
