//! Motion compensation by backward warping
//!
//! Each output pixel samples from its motion-displaced location in the source
//! frame with bilinear interpolation, so the result has no holes. Samples
//! outside the frame clamp to the nearest edge pixel.

use crate::io::error::{Result, shape_mismatch};
use ndarray::{Array3, Array4};

// Bilinear sample of one channel at a fractional position, edge-clamped
fn sample(frame: &Array4<f32>, y: f32, x: f32, channel: usize) -> f32 {
    let (_, h, w, _) = frame.dim();
    let max_y = (h - 1) as f32;
    let max_x = (w - 1) as f32;
    let cy = y.clamp(0.0, max_y);
    let cx = x.clamp(0.0, max_x);
    let y0 = cy.floor() as usize;
    let x0 = cx.floor() as usize;
    let y1 = (y0 + 1).min(h - 1);
    let x1 = (x0 + 1).min(w - 1);
    let fy = cy - y0 as f32;
    let fx = cx - x0 as f32;

    let at = |py: usize, px: usize| -> f32 {
        frame.get([0, py, px, channel]).copied().unwrap_or(0.0)
    };
    let top = at(y0, x0).mul_add(1.0 - fx, at(y0, x1) * fx);
    let bottom = at(y1, x0).mul_add(1.0 - fx, at(y1, x1) * fx);
    top.mul_add(1.0 - fy, bottom * fy)
}

/// Remap a `[1, h, w, 3]` frame by a dense `[h, w, 2]` motion field
///
/// Backward warp: output pixel `(x, y)` is sampled from
/// `(x + du, y + dv)` in `frame`.
///
/// # Errors
///
/// Returns an error if the motion field's spatial extent does not match the
/// frame.
pub fn warp_frame(frame: &Array4<f32>, flow: &Array3<f32>) -> Result<Array4<f32>> {
    let (_, h, w, _) = frame.dim();
    if flow.dim() != (h, w, 2) {
        return Err(shape_mismatch("frame warp", &[h, w, 2], flow.shape()));
    }
    let mut warped = Array4::<f32>::zeros(frame.dim());
    for ((_, y, x, channel), value) in warped.indexed_iter_mut() {
        let du = flow.get([y, x, 0]).copied().unwrap_or(0.0);
        let dv = flow.get([y, x, 1]).copied().unwrap_or(0.0);
        *value = sample(frame, y as f32 + dv, x as f32 + du, channel);
    }
    Ok(warped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn gradient_frame(h: usize, w: usize) -> Array4<f32> {
        let mut frame = Array4::<f32>::zeros((1, h, w, 3));
        for ((_, y, x, _), value) in frame.indexed_iter_mut() {
            *value = (y * w + x) as f32;
        }
        frame
    }

    #[test]
    fn test_zero_flow_is_identity() {
        let frame = gradient_frame(4, 5);
        let flow = Array3::<f32>::zeros((4, 5, 2));
        let warped = warp_frame(&frame, &flow)
            .unwrap_or_else(|e| unreachable!("warp failed: {e}"));
        assert_eq!(warped, frame);
    }

    #[test]
    fn test_unit_shift_resamples_neighbor() {
        let frame = gradient_frame(3, 4);
        // du = 1 everywhere: each pixel reads its right neighbor
        let mut flow = Array3::<f32>::zeros((3, 4, 2));
        for ((_, _, c), value) in flow.indexed_iter_mut() {
            if c == 0 {
                *value = 1.0;
            }
        }
        let warped = warp_frame(&frame, &flow)
            .unwrap_or_else(|e| unreachable!("warp failed: {e}"));
        let inner = warped.get([0, 1, 1, 0]).copied().unwrap_or(f32::NAN);
        let neighbor = frame.get([0, 1, 2, 0]).copied().unwrap_or(f32::NAN);
        assert!((inner - neighbor).abs() < 1e-6);
        // Edge column clamps instead of wrapping
        let edge = warped.get([0, 1, 3, 0]).copied().unwrap_or(f32::NAN);
        let clamped = frame.get([0, 1, 3, 0]).copied().unwrap_or(f32::NAN);
        assert!((edge - clamped).abs() < 1e-6);
    }

    #[test]
    fn test_fractional_shift_interpolates() {
        let frame = gradient_frame(2, 3);
        let mut flow = Array3::<f32>::zeros((2, 3, 2));
        for ((_, _, c), value) in flow.indexed_iter_mut() {
            if c == 0 {
                *value = 0.5;
            }
        }
        let warped = warp_frame(&frame, &flow)
            .unwrap_or_else(|e| unreachable!("warp failed: {e}"));
        let left = frame.get([0, 0, 0, 0]).copied().unwrap_or(f32::NAN);
        let right = frame.get([0, 0, 1, 0]).copied().unwrap_or(f32::NAN);
        let mid = warped.get([0, 0, 0, 0]).copied().unwrap_or(f32::NAN);
        assert!((mid - (left + right) / 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_wrong_flow_extent_is_an_error() {
        let frame = gradient_frame(4, 4);
        let flow = Array3::<f32>::zeros((2, 2, 2));
        assert!(warp_frame(&frame, &flow).is_err());
    }
}
