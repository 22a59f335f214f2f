//! In-process stand-ins for the external package, shared by unit tests.

use crate::{
    bridge::{BridgeError, CallError, ForeignCallable, ForeignObject, KeywordSupport, ModuleLoader},
    predictor::Predictor,
    resolver::{Resolve, ResolutionError},
};
use parking_lot::{Condvar, Mutex};
use serde_json::{Map, Value};
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

pub const HAND_DRAWN: &str = "hand_drawn";

/// A tiny white PNG encoded with the `image` crate.
pub fn blank_png() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(16, 16, image::Rgb([255, 255, 255]));
    let mut buf = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png)
        .expect("encode png");
    buf.into_inner()
}

#[derive(Clone, Copy, Debug)]
pub enum Shape {
    KeywordAware,
    PositionalOnly,
}

#[derive(Default)]
struct CallLog {
    keyword_values: Vec<Option<bool>>,
    paths: Vec<PathBuf>,
    existed: Vec<bool>,
}

pub struct FakeCallable {
    qualname: String,
    shape: Shape,
    support: KeywordSupport,
    result: Value,
    failure: Option<String>,
    product: Option<Arc<dyn ForeignObject>>,
    instantiations: AtomicUsize,
    log: Mutex<CallLog>,
}

impl FakeCallable {
    pub fn new(qualname: &str, shape: Shape, smiles: &str) -> Arc<Self> {
        Self::returning(qualname, shape, Value::String(smiles.to_string()))
    }

    pub fn returning(qualname: &str, shape: Shape, result: Value) -> Arc<Self> {
        let support = match shape {
            Shape::KeywordAware => KeywordSupport::Accepted,
            Shape::PositionalOnly => KeywordSupport::Rejected,
        };
        Arc::new(Self {
            qualname: qualname.to_string(),
            shape,
            support,
            result,
            failure: None,
            product: None,
            instantiations: AtomicUsize::new(0),
            log: Mutex::new(CallLog::default()),
        })
    }

    pub fn factory(qualname: &str, product: Arc<dyn ForeignObject>) -> Arc<Self> {
        let mut fake =
            Self::into_inner(Self::returning(qualname, Shape::PositionalOnly, Value::Null));
        fake.product = Some(product);
        Arc::new(fake)
    }

    pub fn with_support(self: Arc<Self>, support: KeywordSupport) -> Arc<Self> {
        let mut fake = Self::into_inner(self);
        fake.support = support;
        Arc::new(fake)
    }

    pub fn failing(self: Arc<Self>, message: &str) -> Arc<Self> {
        let mut fake = Self::into_inner(self);
        fake.failure = Some(message.to_string());
        Arc::new(fake)
    }

    fn into_inner(this: Arc<Self>) -> Self {
        Arc::try_unwrap(this).unwrap_or_else(|_| panic!("fake already shared"))
    }

    /// For each call, whether the keyword form was attempted.
    pub fn calls(&self) -> Vec<bool> {
        self.log
            .lock()
            .keyword_values
            .iter()
            .map(Option::is_some)
            .collect()
    }

    pub fn keyword_values(&self) -> Vec<Option<bool>> {
        self.log.lock().keyword_values.clone()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.log.lock().paths.clone()
    }

    /// Whether the image file existed while each call was running.
    pub fn files_existed(&self) -> Vec<bool> {
        self.log.lock().existed.clone()
    }

    pub fn instantiations(&self) -> usize {
        self.instantiations.load(Ordering::SeqCst)
    }
}

impl ForeignCallable for FakeCallable {
    fn qualname(&self) -> &str {
        &self.qualname
    }

    fn keyword_support(&self, _keyword: &str) -> KeywordSupport {
        self.support
    }

    fn call(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> Result<Value, CallError> {
        let keyword = kwargs.get(HAND_DRAWN).and_then(Value::as_bool);
        {
            let mut log = self.log.lock();
            log.keyword_values.push(keyword);
            if let Some(path) = args.first().and_then(Value::as_str) {
                let path = PathBuf::from(path);
                log.existed.push(path.exists());
                log.paths.push(path);
            }
        }

        if keyword.is_some() && matches!(self.shape, Shape::PositionalOnly) {
            return Err(CallError::UnexpectedKeyword(format!(
                "TypeError: {}() got an unexpected keyword argument '{}'",
                self.qualname, HAND_DRAWN
            )));
        }
        if let Some(message) = &self.failure {
            return Err(CallError::Raised(message.clone()));
        }
        Ok(self.result.clone())
    }

    fn instantiate(&self) -> Result<Arc<dyn ForeignObject>, CallError> {
        self.instantiations.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(CallError::Raised(message.clone()));
        }
        self.product
            .clone()
            .ok_or_else(|| CallError::Raised(format!("{} is not a factory", self.qualname)))
    }
}

pub struct FakeObject {
    name: String,
    version: Option<String>,
    callables: HashMap<String, Arc<dyn ForeignCallable>>,
}

impl FakeObject {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: None,
            callables: HashMap::new(),
        }
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }

    pub fn with_callable(mut self, attr: &str, callable: Arc<dyn ForeignCallable>) -> Self {
        self.callables.insert(attr.to_string(), callable);
        self
    }

    pub fn into_arc(self) -> Arc<dyn ForeignObject> {
        Arc::new(self)
    }
}

impl ForeignObject for FakeObject {
    fn name(&self) -> &str {
        &self.name
    }

    fn callable(&self, attr: &str) -> Option<Arc<dyn ForeignCallable>> {
        self.callables.get(attr).cloned()
    }

    fn version(&self) -> Option<String> {
        self.version.clone()
    }

    fn location(&self) -> Option<String> {
        Some(format!("/site-packages/{}/__init__.py", self.name))
    }
}

/// Module loader over a fixed table of importable modules.
#[derive(Default)]
pub struct FakeLoader {
    modules: HashMap<String, Arc<dyn ForeignObject>>,
    attempts: Mutex<Vec<String>>,
}

impl FakeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, module: Arc<dyn ForeignObject>) -> Self {
        self.modules.insert(module.name().to_string(), module);
        self
    }

    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().clone()
    }
}

impl ModuleLoader for FakeLoader {
    fn import(&self, name: &str) -> Result<Arc<dyn ForeignObject>, BridgeError> {
        self.attempts.lock().push(name.to_string());
        self.modules
            .get(name)
            .cloned()
            .ok_or_else(|| BridgeError::Import(format!("No module named '{}'", name)))
    }
}

/// One-shot latch for holding a blocking task until the test lets it go.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.cv.wait(&mut open);
        }
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.cv.notify_all();
    }
}

/// Resolver backed by a closure.
pub struct FnResolver<F>(F);

impl<F> FnResolver<F>
where
    F: Fn() -> Result<Predictor, ResolutionError> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Resolve for FnResolver<F>
where
    F: Fn() -> Result<Predictor, ResolutionError> + Send + Sync + 'static,
{
    fn resolve(&self) -> Result<Predictor, ResolutionError> {
        (self.0)()
    }
}
