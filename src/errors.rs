//! Centralized error handling for sxdm-reduce
//!
//! Every failure in the reduction engine is reported through [`ReduceError`].
//! Configuration problems are raised before any work is dispatched; failures
//! inside a worker are wrapped with the work unit (range or index) they came from.

use crate::partition::WorkUnit;
use std::fmt;

/// Main error type for reduction operations
#[derive(Debug)]
pub enum ReduceError {
    /// NetCDF / HDF5 storage errors
    NetCDFError(netcdf::Error),

    /// Variable missing from the file at the requested key
    ArrayNotFound { path: String, key: String },

    /// Array shape or dimension error
    ArrayError(ndarray::ShapeError),

    /// The on-disk array does not have a supported layout
    InvalidShape { message: String },

    /// Invalid caller-supplied parameter
    InvalidConfig { message: String },

    /// Mask does not match the axis it is applied to
    MaskShapeMismatch {
        mask: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// ROI axis outside the array bounds
    RoiOutOfBounds {
        axis: usize,
        start: usize,
        stop: usize,
        len: usize,
    },

    /// A work unit failed inside a worker
    Worker {
        unit: WorkUnit,
        source: Box<ReduceError>,
    },

    /// A worker died (panicked) while processing a unit
    PoolBroken { unit: WorkUnit, message: String },

    /// Thread pool configuration error
    ThreadPoolError(String),

    /// Centroid requested at a position carrying no intensity
    ZeroIntensity { index: usize },

    /// Job or task record (de)serialization failure
    SerializationError(serde_json::Error),
}

impl fmt::Display for ReduceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReduceError::NetCDFError(e) => write!(f, "NetCDF error: {}", e),
            ReduceError::ArrayNotFound { path, key } => {
                write!(f, "Array '{}' not found in file '{}'", key, path)
            }
            ReduceError::ArrayError(e) => write!(f, "Array error: {}", e),
            ReduceError::InvalidShape { message } => write!(f, "Invalid array shape: {}", message),
            ReduceError::InvalidConfig { message } => write!(f, "Invalid configuration: {}", message),
            ReduceError::MaskShapeMismatch {
                mask,
                expected,
                found,
            } => write!(
                f,
                "{} mask has shape {:?}, expected {:?}",
                mask, found, expected
            ),
            ReduceError::RoiOutOfBounds {
                axis,
                start,
                stop,
                len,
            } => write!(
                f,
                "ROI {}..{} on inner axis {} is out of bounds (axis length: {})",
                start, stop, axis, len
            ),
            ReduceError::Worker { unit, source } => write!(f, "Worker failed on {}: {}", unit, source),
            ReduceError::PoolBroken { unit, message } => write!(
                f,
                "Worker pool broken while processing {}: {}. \
                 If a worker ran out of memory, retry with more, smaller work items \
                 (ReductionConfig::with_work_items) or a smaller ROI to lower per-worker memory; \
                 this does not make reads faster",
                unit, message
            ),
            ReduceError::ThreadPoolError(msg) => write!(f, "Thread pool error: {}", msg),
            ReduceError::ZeroIntensity { index } => write!(
                f,
                "Total intensity at position {} is zero, centroid is undefined",
                index
            ),
            ReduceError::SerializationError(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl std::error::Error for ReduceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReduceError::NetCDFError(e) => Some(e),
            ReduceError::ArrayError(e) => Some(e),
            ReduceError::SerializationError(e) => Some(e),
            ReduceError::Worker { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl ReduceError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        ReduceError::InvalidConfig {
            message: message.into(),
        }
    }

    pub(crate) fn shape(message: impl Into<String>) -> Self {
        ReduceError::InvalidShape {
            message: message.into(),
        }
    }
}

impl From<netcdf::Error> for ReduceError {
    fn from(error: netcdf::Error) -> Self {
        ReduceError::NetCDFError(error)
    }
}

impl From<ndarray::ShapeError> for ReduceError {
    fn from(error: ndarray::ShapeError) -> Self {
        ReduceError::ArrayError(error)
    }
}

impl From<serde_json::Error> for ReduceError {
    fn from(error: serde_json::Error) -> Self {
        ReduceError::SerializationError(error)
    }
}

/// Result type alias for reduction operations
pub type Result<T> = std::result::Result<T, ReduceError>;
