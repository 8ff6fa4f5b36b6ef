use std::path::PathBuf;
use thiserror::Error;

/// Error taxonomy for the promo image pipeline.
///
/// Each variant carries the context of its failure domain (configuration,
/// filesystem, image processing, model inference, input validation) so
/// callers never have to parse error strings. Display impls come from
/// thiserror's format strings.
#[derive(Error, Debug)]
pub enum PromoGenError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Image processing error: {operation} failed (file: {path})")]
    ImageProcessing {
        path: String,
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, PromoGenError>;

impl PromoGenError {
    /// Model-stage error with a named operation, for wrapping library errors
    /// that carry no context of their own.
    pub fn model(
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Model {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Fallback for I/O errors that surface without path context. Code that has
/// the path should construct `FileSystem` directly.
impl From<std::io::Error> for PromoGenError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

impl From<image::ImageError> for PromoGenError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            path: "unknown".to_string(),
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<ort::Error> for PromoGenError {
    fn from(err: ort::Error) -> Self {
        Self::Model {
            operation: "ort operation".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<candle_core::Error> for PromoGenError {
    fn from(err: candle_core::Error) -> Self {
        Self::Model {
            operation: "diffusion operation".to_string(),
            source: Box::new(err),
        }
    }
}

/// Shape errors only occur while wiring tensors for inference, so they fall
/// under the model domain rather than a dedicated tensor variant.
impl From<ndarray::ShapeError> for PromoGenError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Model {
            operation: "tensor shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<serde_json::Error> for PromoGenError {
    fn from(err: serde_json::Error) -> Self {
        Self::Configuration {
            message: err.to_string(),
        }
    }
}
