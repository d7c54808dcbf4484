//! Temporal consistency support for video stylization

/// Dense optical flow estimation contract and the static-scene default
pub mod flow;
/// Disocclusion detection from forward/backward flow consistency
pub mod mask;
/// Motion compensation by backward warping
pub mod warp;

use crate::io::error::{Result, StyleError};
use ndarray::{Array2, Array4};

/// Everything the temporal loss term needs for one frame
#[derive(Debug, Clone)]
pub struct TemporalContext {
    /// Previous stylized frame, motion-compensated into the current frame
    pub warped_prev: Array4<f32>,
    /// Per-pixel correspondence confidence, `[h, w]` in `[0, 1]`
    pub mask: Array2<f32>,
}

/// Build the temporal context for one frame of a sequence
///
/// `previous_stylized` and `previous_frame` must both be present; the next
/// raw frame refines the disocclusion mask when available.
///
/// # Errors
///
/// Returns [`StyleError::MissingTemporalContext`] when the previous frame
/// context is unavailable (recoverable: stylize without the temporal term),
/// or propagates flow estimation and warping failures.
pub fn build_context(
    estimator: &dyn flow::FlowEstimator,
    frame_index: usize,
    previous_stylized: Option<&Array4<f32>>,
    previous_frame: Option<&Array4<f32>>,
    current_frame: &Array4<f32>,
    next_frame: Option<&Array4<f32>>,
) -> Result<TemporalContext> {
    let (Some(stylized), Some(raw_prev)) = (previous_stylized, previous_frame) else {
        return Err(StyleError::MissingTemporalContext { frame_index });
    };
    let backward = estimator.estimate(current_frame, raw_prev)?;
    let warped_prev = warp::warp_frame(stylized, &backward)?;
    let mask = mask::disocclusion_mask(estimator, raw_prev, current_frame, next_frame)?;
    Ok(TemporalContext { warped_prev, mask })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::temporal::flow::ZeroFlow;

    #[test]
    fn test_first_frame_has_no_context() {
        let current = Array4::<f32>::zeros((1, 3, 3, 3));
        let result = build_context(&ZeroFlow, 0, None, None, &current, None);
        assert!(matches!(
            result,
            Err(StyleError::MissingTemporalContext { frame_index: 0 })
        ));
    }

    #[test]
    fn test_static_scene_context_is_identity_with_full_mask() {
        let current = Array4::<f32>::from_elem((1, 3, 3, 3), 0.25);
        let stylized = Array4::<f32>::from_elem((1, 3, 3, 3), 0.75);
        let context = build_context(
            &ZeroFlow,
            1,
            Some(&stylized),
            Some(&current),
            &current,
            Some(&current),
        )
        .unwrap_or_else(|e| unreachable!("context failed: {e}"));
        assert_eq!(context.warped_prev, stylized);
        assert!(context.mask.iter().all(|&v| (v - 1.0).abs() < f32::EPSILON));
    }
}
