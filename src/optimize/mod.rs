//! Iterative optimization: losses, the optimizer, and frame orchestration

/// Adam optimizer with bias-corrected moment estimates
pub mod adam;
/// Gram matrix computation and its chain rule
pub mod gram;
/// Content, style, and temporal loss terms with gradients
pub mod loss;
/// Video frame sequencing over the stylizer
pub mod sequencer;
/// The per-frame stylization loop
pub mod stylize;
