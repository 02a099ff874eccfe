use std::path::PathBuf;
use thiserror::Error;

/// Structured error types for the clothes segmentation service.
///
/// Each variant carries the context of its domain (filesystem, image decoding,
/// model inference, catalog lookup) so callers and HTTP handlers can classify
/// failures without parsing strings.
#[derive(Error, Debug)]
pub enum SegError {
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

    #[error("Encoding error: writing {format} failed")]
    Encoding {
        format: String,
        #[source]
        source: image::ImageError,
    },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },

    #[error("Catalog error: {message}")]
    Catalog { message: String },
}

pub type Result<T> = std::result::Result<T, SegError>;

impl SegError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn model(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        let reason: String = reason.into();
        Self::Model {
            operation: operation.into(),
            source: reason.into(),
        }
    }

    /// True for errors caused by the caller's input rather than the service.
    ///
    /// Decoding a bad upload is the caller's fault; encoding a result is not,
    /// which is why `Encoding` stays out of this set.
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::ImageProcessing { .. })
    }
}

/// Convert I/O errors to filesystem errors.
///
/// Code that knows the path and operation should build `SegError::FileSystem`
/// directly; this is the fallback for `?` on bare I/O calls.
impl From<std::io::Error> for SegError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

impl From<image::ImageError> for SegError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            path: "unknown".to_string(),
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<ort::Error> for SegError {
    fn from(err: ort::Error) -> Self {
        Self::Model {
            operation: "ort operation".to_string(),
            source: Box::new(err),
        }
    }
}

/// Shape errors come out of tensor reshaping around inference, so they are
/// reported as model errors.
impl From<ndarray::ShapeError> for SegError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Model {
            operation: "tensor shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<serde_json::Error> for SegError {
    fn from(err: serde_json::Error) -> Self {
        Self::Configuration {
            message: err.to_string(),
        }
    }
}
