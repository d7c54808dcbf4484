//! Neural style transfer through iterative Gram-matrix optimization
//!
//! The system extracts feature maps from a convolutional backbone, matches
//! their Gram statistics against a style image while holding deep features
//! close to the content image, and descends on the pixels themselves with
//! Adam. Frame sequences additionally carry a temporal consistency loss that
//! warps the previous stylized frame along optical flow.

#![deny(unsafe_code)]

/// Input/output operations, configuration, and error handling
pub mod io;
/// Feature extraction networks and the extraction trait
pub mod network;
/// Loss terms, the optimizer, and per-frame orchestration
pub mod optimize;
/// Optical flow, warping, and disocclusion masking for video
pub mod temporal;

pub use io::error::{Result, StyleError};
