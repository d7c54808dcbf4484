//! Gram matrix computation for style representations
//!
//! A feature map's style statistics are summarized by flattening its spatial
//! axes into `[N, depth]` and taking the channel inner product `Aᵀ·A`. The
//! result is always symmetric and positive semi-definite. Grams here are NOT
//! normalized by the pixel count `N`: the default loss weights were tuned
//! against that convention, and `style_layer_weights` is the knob for
//! compensating when resolutions change.

use crate::io::error::{Result, computation_error};
use ndarray::{Array2, Array4};

/// Compute the Gram matrix of a `[1, h, w, depth]` feature map
///
/// # Errors
///
/// Returns an error if the feature map's storage is not contiguous in
/// standard layout, so the spatial axes cannot be flattened to `[N, depth]`
/// without copying.
pub fn gram_matrix(feature_map: &Array4<f32>) -> Result<Array2<f32>> {
    let (batch, h, w, depth) = feature_map.dim();
    let flat = feature_map
        .view()
        .into_shape_with_order((batch * h * w, depth))
        .map_err(|err| computation_error("gram matrix", &err))?;
    Ok(flat.t().dot(&flat))
}

/// Compute Gram matrices for a list of feature maps
///
/// # Errors
///
/// Propagates the first [`gram_matrix`] failure.
pub fn grams_of(feature_maps: &[Array4<f32>]) -> Result<Vec<Array2<f32>>> {
    feature_maps.iter().map(gram_matrix).collect()
}

/// Chain-rule step from a Gram-space gradient back to feature space
///
/// Given `D = dL/dG` for `G = Aᵀ·A`, the feature-space gradient is
/// `A·(D + Dᵀ)`, reshaped back to the feature map's layout.
///
/// # Errors
///
/// Returns an error if the shapes of `feature_map` and `d_gram` disagree.
pub fn gram_backward(feature_map: &Array4<f32>, d_gram: &Array2<f32>) -> Result<Array4<f32>> {
    let (batch, h, w, depth) = feature_map.dim();
    if d_gram.dim() != (depth, depth) {
        return Err(computation_error(
            "gram backward",
            &format!(
                "gram gradient is {:?} but feature depth is {depth}",
                d_gram.dim()
            ),
        ));
    }
    let flat = feature_map
        .view()
        .into_shape_with_order((batch * h * w, depth))
        .map_err(|err| computation_error("gram backward", &err))?;
    let symmetrized = d_gram + &d_gram.t();
    flat.dot(&symmetrized)
        .into_shape_with_order((batch, h, w, depth))
        .map_err(|err| computation_error("gram backward", &err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    fn ramp_features(h: usize, w: usize, depth: usize) -> Array4<f32> {
        let mut value = 0.0_f32;
        Array4::from_shape_simple_fn((1, h, w, depth), move || {
            value += 0.31;
            (value * 1.7).sin()
        })
    }

    #[test]
    fn test_gram_is_square_in_depth() {
        let features = ramp_features(5, 7, 4);
        let gram = gram_matrix(&features).unwrap_or_else(|e| unreachable!("gram failed: {e}"));
        assert_eq!(gram.dim(), (4, 4));
    }

    #[test]
    fn test_gram_is_symmetric() {
        let features = ramp_features(6, 3, 5);
        let gram = gram_matrix(&features).unwrap_or_else(|e| unreachable!("gram failed: {e}"));
        for ((row, col), &value) in gram.indexed_iter() {
            let mirrored = gram.get([col, row]).copied().unwrap_or(f32::NAN);
            assert!(
                (value - mirrored).abs() < 1e-4,
                "asymmetry at ({row}, {col}): {value} vs {mirrored}"
            );
        }
    }

    // G = AᵀA is PSD, so xᵀGx >= 0 for any x; probe with a few vectors
    #[test]
    fn test_gram_is_positive_semidefinite() {
        let features = ramp_features(4, 4, 3);
        let gram = gram_matrix(&features).unwrap_or_else(|e| unreachable!("gram failed: {e}"));
        let probes = [
            ndarray::arr1(&[1.0_f32, 0.0, 0.0]),
            ndarray::arr1(&[0.3_f32, -0.7, 0.64]),
            ndarray::arr1(&[-1.0_f32, 1.0, -1.0]),
        ];
        for probe in probes {
            let quadratic = probe.dot(&gram.dot(&probe));
            assert!(quadratic >= -1e-4, "negative quadratic form: {quadratic}");
        }
    }

    // Finite-difference check of the Gram chain rule under L = sum(G)
    #[test]
    fn test_gram_backward_matches_finite_differences() {
        let features = ramp_features(3, 3, 2);
        let ones = ndarray::Array2::<f32>::ones((2, 2));
        let grad = gram_backward(&features, &ones)
            .unwrap_or_else(|e| unreachable!("gram backward failed: {e}"));

        let loss_of = |f: &Array4<f32>| -> f32 {
            gram_matrix(f)
                .map(|g| g.sum())
                .unwrap_or_else(|e| unreachable!("gram failed: {e}"))
        };

        let epsilon = 1e-3;
        let mut bumped = features.clone();
        if let Some(cell) = bumped.get_mut([0, 1, 2, 1]) {
            *cell += epsilon;
        }
        let numeric = (loss_of(&bumped) - loss_of(&features)) / epsilon;
        let analytic = grad.get([0, 1, 2, 1]).copied().unwrap_or(f32::NAN);
        assert!(
            (numeric - analytic).abs() < 1e-2 * analytic.abs().max(1.0),
            "finite difference {numeric} vs analytic {analytic}"
        );
    }

    #[test]
    fn test_gram_rejects_nonstandard_layout() {
        use ndarray::ShapeBuilder;
        // Column-major storage cannot be flattened without copying
        let column_major = Array4::from_shape_vec((1, 2, 2, 3).f(), vec![0.5_f32; 12])
            .unwrap_or_else(|e| unreachable!("construction failed: {e}"));
        assert!(gram_matrix(&column_major).is_err());
    }

    #[test]
    fn test_gram_backward_rejects_wrong_depth() {
        let features = ramp_features(3, 3, 2);
        let wrong = ndarray::Array2::<f32>::ones((3, 3));
        assert!(gram_backward(&features, &wrong).is_err());
    }
}
