use crate::bridge::{CallError, ForeignCallable, ForeignObject, KeywordSupport};
use serde_json::{Map, Value};
use std::{
    path::Path,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("{qualname} failed: {source}")]
pub struct InferenceError {
    pub qualname: String,
    #[source]
    pub source: CallError,
}

const SUPPORT_UNKNOWN: u8 = 0;
const SUPPORT_ACCEPTED: u8 = 1;
const SUPPORT_REJECTED: u8 = 2;

/// A foreign callable plus what we know about its hand-drawn keyword.
///
/// When the signature was conclusive the calling convention is fixed at bind
/// time. Otherwise the first call settles it: keyword form first, positional
/// form if the keyword is rejected, and the answer is remembered.
pub struct BoundCall {
    callable: Arc<dyn ForeignCallable>,
    keyword: String,
    support: AtomicU8,
}

impl BoundCall {
    pub fn new(callable: Arc<dyn ForeignCallable>, keyword: &str) -> Self {
        let support = match callable.keyword_support(keyword) {
            KeywordSupport::Accepted => SUPPORT_ACCEPTED,
            KeywordSupport::Rejected => SUPPORT_REJECTED,
            KeywordSupport::Unknown => SUPPORT_UNKNOWN,
        };
        Self {
            callable,
            keyword: keyword.to_string(),
            support: AtomicU8::new(support),
        }
    }

    pub fn qualname(&self) -> &str {
        self.callable.qualname()
    }

    pub fn keyword_support(&self) -> KeywordSupport {
        match self.support.load(Ordering::Acquire) {
            SUPPORT_ACCEPTED => KeywordSupport::Accepted,
            SUPPORT_REJECTED => KeywordSupport::Rejected,
            _ => KeywordSupport::Unknown,
        }
    }

    fn invoke(&self, image_path: &Path, hand_drawn: bool) -> Result<Value, CallError> {
        let args = vec![Value::String(image_path.to_string_lossy().into_owned())];

        if self.keyword_support() == KeywordSupport::Rejected {
            return self.callable.call(args, Map::new());
        }

        let mut kwargs = Map::new();
        kwargs.insert(self.keyword.clone(), Value::Bool(hand_drawn));
        match self.callable.call(args.clone(), kwargs) {
            Err(CallError::UnexpectedKeyword(reason)) => {
                tracing::info!(
                    callable = self.qualname(),
                    %reason,
                    "Keyword `{}` rejected, falling back to positional call",
                    self.keyword
                );
                self.support.store(SUPPORT_REJECTED, Ordering::Release);
                self.callable.call(args, Map::new())
            }
            Ok(value) => {
                let _ = self.support.compare_exchange(
                    SUPPORT_UNKNOWN,
                    SUPPORT_ACCEPTED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                Ok(value)
            }
            Err(e) => Err(e),
        }
    }
}

/// The resolved prediction capability.
pub enum Predictor {
    /// A module-level prediction function.
    Direct(BoundCall),
    /// A method on a model handle built by the package's factory.
    Factory {
        model: Arc<dyn ForeignObject>,
        method: BoundCall,
    },
}

impl Predictor {
    pub fn describe(&self) -> String {
        match self {
            Predictor::Direct(call) => call.qualname().to_string(),
            Predictor::Factory { model, method } => {
                format!("{} via {}", method.qualname(), model.name())
            }
        }
    }

    fn bound(&self) -> &BoundCall {
        match self {
            Predictor::Direct(call) => call,
            Predictor::Factory { method, .. } => method,
        }
    }

    /// Runs recognition on an image file. Blocks until the callee returns.
    pub fn predict(&self, image_path: &Path, hand_drawn: bool) -> Result<String, InferenceError> {
        let call = self.bound();
        let value = call
            .invoke(image_path, hand_drawn)
            .map_err(|source| InferenceError {
                qualname: call.qualname().to_string(),
                source,
            })?;

        Ok(match value {
            Value::Null => String::new(),
            Value::String(smiles) => smiles,
            other => other.to_string(),
        })
    }
}

impl Predictor {
    /// Runs one recognition on a blank 16x16 PNG with the same flag a request
    /// without `handDrawn` gets. Used to pull lazily downloaded weights.
    pub fn warm(&self) -> anyhow::Result<String> {
        let blank = tempfile::Builder::new()
            .prefix("prewarm-")
            .suffix(".png")
            .tempfile()?;
        image::RgbImage::from_pixel(16, 16, image::Rgb([255, 255, 255]))
            .save_with_format(blank.path(), image::ImageFormat::Png)?;
        Ok(self.predict(blank.path(), true)?)
    }
}

impl std::fmt::Debug for Predictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Predictor").field(&self.describe()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeCallable, FakeObject, Shape};

    #[test]
    fn test_keyword_first_then_positional_fallback() {
        let fake = FakeCallable::new("DECIMER.predict_SMILES", Shape::PositionalOnly, "CCO")
            .with_support(KeywordSupport::Unknown);
        let predictor = Predictor::Direct(BoundCall::new(fake.clone(), "hand_drawn"));

        let smiles = predictor.predict(Path::new("/tmp/x.png"), true).unwrap();
        assert_eq!(smiles, "CCO");
        assert_eq!(fake.calls(), vec![true, false]);

        predictor.predict(Path::new("/tmp/x.png"), true).unwrap();
        assert_eq!(fake.calls(), vec![true, false, false]);
    }

    #[test]
    fn test_signature_rejection_skips_keyword_attempt() {
        let fake = FakeCallable::new("decimer.predict_SMILES", Shape::PositionalOnly, "C")
            .with_support(KeywordSupport::Rejected);
        let predictor = Predictor::Direct(BoundCall::new(fake.clone(), "hand_drawn"));

        predictor.predict(Path::new("/tmp/x.png"), false).unwrap();
        assert_eq!(fake.calls(), vec![false]);
    }

    #[test]
    fn test_hand_drawn_flag_is_passed_through() {
        let fake = FakeCallable::new("DECIMER.predict_SMILES", Shape::KeywordAware, "c1ccccc1");
        let call = BoundCall::new(fake.clone(), "hand_drawn");
        assert_eq!(call.keyword_support(), KeywordSupport::Accepted);

        let predictor = Predictor::Direct(call);
        predictor.predict(Path::new("/tmp/x.png"), false).unwrap();
        assert_eq!(fake.keyword_values(), vec![Some(false)]);
    }

    #[test]
    fn test_null_result_is_empty_smiles() {
        let fake = FakeCallable::returning("model.predict", Shape::KeywordAware, Value::Null);
        let predictor = Predictor::Factory {
            model: FakeObject::new("load_model()").into_arc(),
            method: BoundCall::new(fake, "hand_drawn"),
        };

        assert_eq!(predictor.predict(Path::new("/tmp/x.png"), true).unwrap(), "");
        assert_eq!(predictor.describe(), "model.predict via load_model()");
    }

    #[test]
    fn test_warm_runs_on_a_real_png_as_hand_drawn() {
        let fake = FakeCallable::new("DECIMER.predict_SMILES", Shape::KeywordAware, "");
        let predictor = Predictor::Direct(BoundCall::new(fake.clone(), "hand_drawn"));

        assert_eq!(predictor.warm().unwrap(), "");
        assert_eq!(fake.keyword_values(), vec![Some(true)]);
        assert_eq!(fake.files_existed(), vec![true]);

        let staged = &fake.paths()[0];
        assert_eq!(staged.extension().unwrap(), "png");
        assert!(!staged.exists());
    }

    #[test]
    fn test_raised_error_carries_message() {
        let fake = FakeCallable::new("DECIMER.predict_SMILES", Shape::KeywordAware, "")
            .failing("ValueError: cannot read image");
        let predictor = Predictor::Direct(BoundCall::new(fake, "hand_drawn"));

        let err = predictor
            .predict(Path::new("/tmp/x.png"), true)
            .unwrap_err();
        assert!(err.to_string().contains("cannot read image"));
        assert!(matches!(err.source, CallError::Raised(_)));
    }
}
