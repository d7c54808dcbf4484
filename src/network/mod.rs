//! Feature extraction networks

/// Fixed convolutional backbone with a hand-rolled reverse pass
pub mod backbone;
/// Extraction trait shared by backbones and test doubles
pub mod extractor;
