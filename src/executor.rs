use crate::warmup::WarmupOrchestrator;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use regex::Regex;
use std::{io::Write, sync::LazyLock};
use tempfile::NamedTempFile;
use thiserror::Error;

static DATA_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^data:image/(png|jpeg|jpg);base64,([A-Za-z0-9+/=]+)$")
        .expect("data URL pattern is valid")
});

#[derive(Error, Debug)]
pub enum OcsrError {
    #[error("Bad image: {0}")]
    BadInput(String),
    #[error("DECIMER not ready: {0}")]
    Unavailable(String),
    #[error("DECIMER error: {0}")]
    Inference(String),
}

impl OcsrError {
    pub fn outcome(&self) -> &'static str {
        match self {
            OcsrError::BadInput(_) => "bad_input",
            OcsrError::Unavailable(_) => "unavailable",
            OcsrError::Inference(_) => "inference_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
        }
    }
}

/// A decoded image waiting to be handed to the predictor.
#[derive(Debug)]
pub struct InboundImage {
    pub format: ImageFormat,
    pub bytes: Vec<u8>,
}

impl InboundImage {
    pub fn from_data_url(data_url: &str) -> Result<Self, OcsrError> {
        let captures = DATA_URL_RE.captures(data_url).ok_or_else(|| {
            OcsrError::BadInput(
                "Invalid image data URL (expected data:image/(png|jpeg|jpg);base64,...)".into(),
            )
        })?;

        let format = match &captures[1] {
            "png" => ImageFormat::Png,
            _ => ImageFormat::Jpeg,
        };
        let bytes = STANDARD
            .decode(&captures[2])
            .map_err(|e| OcsrError::BadInput(format!("invalid base64 payload: {}", e)))?;

        Ok(Self { format, bytes })
    }

    /// Writes the image to a temporary file that is removed when dropped.
    fn materialize(&self) -> std::io::Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("ocsr-")
            .suffix(&format!(".{}", self.format.extension()))
            .tempfile()?;
        file.write_all(&self.bytes)?;
        file.flush()?;
        Ok(file)
    }
}

fn discard(file: NamedTempFile) {
    let path = file.path().to_path_buf();
    if let Err(e) = file.close() {
        tracing::debug!(path = %path.display(), error = %e, "Could not remove temporary image");
    }
}

/// Serves recognition requests against the shared readiness state.
#[derive(Clone)]
pub struct RequestExecutor {
    warmup: WarmupOrchestrator,
}

impl RequestExecutor {
    pub fn new(warmup: WarmupOrchestrator) -> Self {
        Self { warmup }
    }

    pub async fn handle_request(
        &self,
        image_data_url: &str,
        hand_drawn: bool,
    ) -> Result<String, OcsrError> {
        let image = InboundImage::from_data_url(image_data_url)?;

        let view = self.warmup.ensure_attempted().await;
        let Some(predictor) = self.warmup.predictor() else {
            if view.timed_out {
                tracing::warn!("Model loading has overrun its timeout");
            }
            let reason = view.error.unwrap_or_else(|| "warming up".to_string());
            return Err(OcsrError::Unavailable(reason));
        };

        let file = image
            .materialize()
            .map_err(|e| OcsrError::Inference(format!("could not stage image: {}", e)))?;

        tracing::debug!(
            path = %file.path().display(),
            size = image.bytes.len(),
            hand_drawn,
            "Running prediction"
        );

        let outcome = tokio::task::spawn_blocking(move || {
            let result = predictor.predict(file.path(), hand_drawn);
            discard(file);
            result
        })
        .await;

        match outcome {
            Ok(Ok(smiles)) => Ok(smiles),
            Ok(Err(e)) => Err(OcsrError::Inference(e.to_string())),
            Err(e) => Err(OcsrError::Inference(format!("prediction task failed: {}", e))),
        }
    }
}
