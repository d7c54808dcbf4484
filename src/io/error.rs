//! Error types for stylization operations

use std::fmt;
use std::path::PathBuf;

/// Main error type for all stylization operations
#[derive(Debug)]
pub enum StyleError {
    /// Failed to load a content or style source from the filesystem
    ImageLoad {
        /// Path to the image file
        path: PathBuf,
        /// Underlying image decoding error
        source: image::ImageError,
    },

    /// Failed to save a stylized frame to disk
    ImageExport {
        /// Path where export was attempted
        path: PathBuf,
        /// Underlying image encoding error
        source: image::ImageError,
    },

    /// General file system operation failure
    FileSystem {
        /// Path involved in the operation
        path: PathBuf,
        /// Description of the operation that failed
        operation: &'static str,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Configuration parameter validation failed
    InvalidParameter {
        /// Name of the invalid parameter
        parameter: &'static str,
        /// Provided value that failed validation
        value: String,
        /// Explanation of why the value is invalid
        reason: String,
    },

    /// Incompatible tensor shapes between a target and a candidate
    ///
    /// Indicates a misconfiguration: the feature extractor produced layer
    /// outputs whose shapes do not line up between the source image and the
    /// canvas being optimized.
    ShapeMismatch {
        /// Computation where the mismatch was detected
        context: &'static str,
        /// Shape expected from the target side
        expected: Vec<usize>,
        /// Shape actually produced by the candidate side
        actual: Vec<usize>,
    },

    /// Loss or gradient became non-finite during optimization
    ///
    /// Aborts the current frame rather than emitting a corrupted canvas.
    NumericDivergence {
        /// Optimization iteration when divergence was detected
        iteration: usize,
        /// Which quantity diverged and how
        reason: String,
    },

    /// Temporal consistency was requested without the frames it needs
    ///
    /// Recoverable: the caller may retry with the temporal term disabled.
    MissingTemporalContext {
        /// Index of the frame that lacks temporal context
        frame_index: usize,
    },

    /// Numerical computation produced an invalid result
    Computation {
        /// Name of the computation that failed
        operation: &'static str,
        /// Description of the failure
        reason: String,
    },
}

impl fmt::Display for StyleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ImageLoad { path, source } => {
                write!(f, "Failed to load image '{}': {source}", path.display())
            }
            Self::ImageExport { path, source } => {
                write!(
                    f,
                    "Failed to export image to '{}': {source}",
                    path.display()
                )
            }
            Self::FileSystem {
                path,
                operation,
                source,
            } => {
                write!(
                    f,
                    "File system error during {operation} on '{}': {source}",
                    path.display()
                )
            }
            Self::InvalidParameter {
                parameter,
                value,
                reason,
            } => {
                write!(f, "Invalid parameter '{parameter}' = '{value}': {reason}")
            }
            Self::ShapeMismatch {
                context,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Shape mismatch in {context}: expected {expected:?}, got {actual:?}"
                )
            }
            Self::NumericDivergence { iteration, reason } => {
                write!(f, "Numeric divergence at iteration {iteration}: {reason}")
            }
            Self::MissingTemporalContext { frame_index } => {
                write!(
                    f,
                    "Temporal consistency requested for frame {frame_index} but no \
                     adjacent frame context is available"
                )
            }
            Self::Computation { operation, reason } => {
                write!(f, "Computation error in {operation}: {reason}")
            }
        }
    }
}

impl std::error::Error for StyleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ImageLoad { source, .. } | Self::ImageExport { source, .. } => Some(source),
            Self::FileSystem { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Convenience type alias for stylization results
pub type Result<T> = std::result::Result<T, StyleError>;

impl From<image::ImageError> for StyleError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageLoad {
            path: PathBuf::from("<unknown>"),
            source: err,
        }
    }
}

impl From<std::io::Error> for StyleError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("<unknown>"),
            operation: "unknown",
            source: err,
        }
    }
}

/// Create an invalid parameter error
pub fn invalid_parameter(
    parameter: &'static str,
    value: &impl ToString,
    reason: &impl ToString,
) -> StyleError {
    StyleError::InvalidParameter {
        parameter,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Create a shape mismatch error from two tensor shapes
pub fn shape_mismatch(context: &'static str, expected: &[usize], actual: &[usize]) -> StyleError {
    StyleError::ShapeMismatch {
        context,
        expected: expected.to_vec(),
        actual: actual.to_vec(),
    }
}

/// Create a numeric divergence error
pub fn numeric_divergence(iteration: usize, reason: &impl ToString) -> StyleError {
    StyleError::NumericDivergence {
        iteration,
        reason: reason.to_string(),
    }
}

/// Create a computation error
pub fn computation_error(operation: &'static str, reason: &impl ToString) -> StyleError {
    StyleError::Computation {
        operation,
        reason: reason.to_string(),
    }
}
