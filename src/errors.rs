use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::polygon::PolygonId;
use crate::ClassId;

/// Structured error types for the segmentation pipeline.
///
/// Per-run failures (I/O, configuration) abort the run. Per-polygon and per-class failures
/// are collected into [`crate::SegmentationOutput`] instead, so one bad seed or one
/// pathological network never takes the whole mask down with it.
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

    #[error("Malformed polygon {polygon} (class {class_id}): {reason}")]
    MalformedPolygon {
        polygon: PolygonId,
        class_id: ClassId,
        reason: String,
    },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },

    #[error("Capacity overflow while building the network for class {class_id}")]
    CapacityOverflow { class_id: ClassId },

    #[error("Solver error for class {class_id}: {reason}")]
    Solver { class_id: ClassId, reason: String },

    #[error("Solver for class {class_id} exceeded its time budget after {elapsed:?}")]
    SolverTimeout { class_id: ClassId, elapsed: Duration },
}

pub type Result<T> = std::result::Result<T, SegError>;

impl SegError {
    /// Class the error is scoped to, if it only affects one class's cut.
    pub const fn class_id(&self) -> Option<ClassId> {
        match self {
            Self::MalformedPolygon { class_id, .. }
            | Self::CapacityOverflow { class_id }
            | Self::Solver { class_id, .. }
            | Self::SolverTimeout { class_id, .. } => Some(*class_id),
            _ => None,
        }
    }
}

/// Convert anyhow errors to configuration errors.
impl From<anyhow::Error> for SegError {
    fn from(err: anyhow::Error) -> Self {
        SegError::Configuration {
            message: err.to_string(),
        }
    }
}

/// Convert I/O errors to filesystem errors.
///
/// Code that knows the path and operation should construct [`SegError::FileSystem`]
/// directly; this is only the fallback for `?` on bare I/O calls.
impl From<std::io::Error> for SegError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

/// Convert image crate errors to image processing errors.
impl From<image::ImageError> for SegError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            path: "unknown".to_string(),
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}
