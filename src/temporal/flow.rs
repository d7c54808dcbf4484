//! Dense optical flow estimation contract
//!
//! Flow estimation itself is an injectable collaborator: the optimization
//! loop only needs the contract, and any coarse-to-fine or Farneback-style
//! estimator can be plugged in. The bundled [`ZeroFlow`] assumes a static
//! scene, which makes warping the identity and every correspondence valid.

use crate::io::error::{Result, shape_mismatch};
use ndarray::{Array3, Array4};

/// Estimates per-pixel motion between two frames
///
/// The returned field has shape `[h, w, 2]` holding `(du, dv)` in pixels:
/// a pixel at `(x, y)` in `from` corresponds to `(x + du, y + dv)` in `to`.
pub trait FlowEstimator: Sync {
    /// Estimate the dense motion field from `from` to `to`
    ///
    /// # Errors
    ///
    /// Returns an error if the two frames disagree in shape or the estimator
    /// cannot produce a field.
    fn estimate(&self, from: &Array4<f32>, to: &Array4<f32>) -> Result<Array3<f32>>;
}

/// Zero-motion estimator for static scenes and tests
#[derive(Debug, Default, Clone, Copy)]
pub struct ZeroFlow;

impl FlowEstimator for ZeroFlow {
    fn estimate(&self, from: &Array4<f32>, to: &Array4<f32>) -> Result<Array3<f32>> {
        if from.dim() != to.dim() {
            return Err(shape_mismatch("flow estimation", from.shape(), to.shape()));
        }
        let (_, h, w, _) = from.dim();
        Ok(Array3::zeros((h, w, 2)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_flow_has_frame_extent() {
        let a = Array4::<f32>::zeros((1, 4, 6, 3));
        let b = Array4::<f32>::ones((1, 4, 6, 3));
        let flow = ZeroFlow
            .estimate(&a, &b)
            .unwrap_or_else(|e| unreachable!("estimate failed: {e}"));
        assert_eq!(flow.dim(), (4, 6, 2));
        assert!(flow.iter().all(|&v| v.abs() < f32::EPSILON));
    }

    #[test]
    fn test_zero_flow_rejects_mismatched_frames() {
        let a = Array4::<f32>::zeros((1, 4, 6, 3));
        let b = Array4::<f32>::zeros((1, 2, 2, 3));
        assert!(ZeroFlow.estimate(&a, &b).is_err());
    }
}
