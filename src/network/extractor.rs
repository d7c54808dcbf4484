//! Feature extractor contract shared by every backbone implementation
//!
//! The optimization loop never touches network internals. It asks an extractor
//! for the activations of a fixed set of layers (one forward pass, shared
//! prefixes computed once) and later hands back per-layer loss gradients to be
//! pulled through the network to the input image. Reverse-mode gradient
//! propagation is a required capability of the extractor, not of the loop.

use crate::io::error::{Result, invalid_parameter, shape_mismatch};
use ndarray::Array4;

/// Index of a layer in an extractor's layer stack
///
/// Which layers represent content versus style is configuration, never
/// hard-coded in the optimization core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LayerId(pub usize);

impl LayerId {
    /// Raw layer index
    pub const fn index(self) -> usize {
        self.0
    }
}

/// A fixed, pretrained convolutional backbone exposing intermediate activations
///
/// Implementations must be side-effect-free and deterministic for fixed
/// weights; weights are read-only and safely shared across concurrent runs.
pub trait FeatureExtractor: Sync {
    /// Cached state of one forward pass, consumed by [`Self::backward`]
    type Pass;

    /// Number of addressable layers
    fn layer_count(&self) -> usize;

    /// Run one forward pass and record the activations of `layers`
    ///
    /// Shared prefix layers are computed exactly once regardless of how many
    /// of their successors are requested.
    ///
    /// # Errors
    ///
    /// Returns an error if any requested layer index is out of range or the
    /// input is not a `[1, h, w, 3]` image tensor.
    fn forward(&self, image: &Array4<f32>, layers: &[LayerId]) -> Result<Self::Pass>;

    /// Activations recorded by `forward`, in request order
    fn maps<'a>(&self, pass: &'a Self::Pass) -> &'a [Array4<f32>];

    /// Vector-Jacobian product: pull per-layer cotangents back to the input
    ///
    /// `cotangents` holds one gradient tensor per requested layer, in request
    /// order; the result is the gradient of the loss with respect to the image
    /// that produced `pass`.
    ///
    /// # Errors
    ///
    /// Returns an error if a cotangent's shape disagrees with the recorded
    /// activation it corresponds to.
    fn backward(&self, pass: &Self::Pass, cotangents: &[Array4<f32>]) -> Result<Array4<f32>>;
}

/// Validate a list of requested layer indices against an extractor
///
/// # Errors
///
/// Returns an error if `layers` is empty or any index is out of range.
pub fn validate_layers(layers: &[LayerId], layer_count: usize) -> Result<()> {
    if layers.is_empty() {
        return Err(invalid_parameter(
            "layers",
            &"[]",
            &"at least one layer must be requested",
        ));
    }
    for layer in layers {
        if layer.index() >= layer_count {
            return Err(invalid_parameter(
                "layers",
                &layer.index(),
                &format!("backbone has {layer_count} layers"),
            ));
        }
    }
    Ok(())
}

/// Trivial extractor whose single layer is the input image itself
///
/// Exists so the optimization loop can be exercised without a convolutional
/// backbone: descent direction, clamping, and identity laws are all observable
/// through it.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityExtractor;

/// Forward-pass record for [`IdentityExtractor`]
#[derive(Debug)]
pub struct IdentityPass {
    maps: Vec<Array4<f32>>,
}

impl FeatureExtractor for IdentityExtractor {
    type Pass = IdentityPass;

    fn layer_count(&self) -> usize {
        1
    }

    fn forward(&self, image: &Array4<f32>, layers: &[LayerId]) -> Result<Self::Pass> {
        validate_layers(layers, self.layer_count())?;
        let maps = layers.iter().map(|_| image.clone()).collect();
        Ok(IdentityPass { maps })
    }

    fn maps<'a>(&self, pass: &'a Self::Pass) -> &'a [Array4<f32>] {
        &pass.maps
    }

    fn backward(&self, pass: &Self::Pass, cotangents: &[Array4<f32>]) -> Result<Array4<f32>> {
        let Some(first) = pass.maps.first() else {
            return Err(invalid_parameter(
                "pass",
                &"empty",
                &"forward pass recorded no activations",
            ));
        };
        let mut grad = Array4::<f32>::zeros(first.dim());
        for cotangent in cotangents {
            if cotangent.shape() != grad.shape() {
                return Err(shape_mismatch(
                    "identity backward",
                    grad.shape(),
                    cotangent.shape(),
                ));
            }
            grad += cotangent;
        }
        Ok(grad)
    }
}
