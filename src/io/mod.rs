//! Input/output: CLI, configuration, image handling, and progress display

/// Command-line interface and batch orchestration
pub mod cli;
/// Central constants and default hyperparameters
pub mod configuration;
/// Error types shared across the crate
pub mod error;
/// Image loading, tensor conversion, and export
pub mod image;
/// Progress bars for frames and iterations
pub mod progress;
