//! Disocclusion detection from flow consistency
//!
//! A pixel's temporal correspondence is trusted only when the backward flow
//! into the previous frame and the forward flow back out of it roughly cancel.
//! Pixels failing the round-trip check, and pixels sitting on strong motion
//! boundaries toward the next frame, receive zero weight so the temporal loss
//! never drags them toward stale colors.

use crate::io::configuration::{
    FLOW_BOUNDARY_ABSOLUTE, FLOW_BOUNDARY_RELATIVE, FLOW_CONSISTENCY_ABSOLUTE,
    FLOW_CONSISTENCY_RELATIVE,
};
use crate::io::error::Result;
use crate::temporal::flow::FlowEstimator;
use ndarray::{Array2, Array3, Array4};

// Nearest-neighbor lookup of a flow vector, edge-clamped
fn flow_at(flow: &Array3<f32>, y: f32, x: f32) -> (f32, f32) {
    let (h, w, _) = flow.dim();
    let py = (y.round().max(0.0) as usize).min(h - 1);
    let px = (x.round().max(0.0) as usize).min(w - 1);
    let du = flow.get([py, px, 0]).copied().unwrap_or(0.0);
    let dv = flow.get([py, px, 1]).copied().unwrap_or(0.0);
    (du, dv)
}

// Squared forward-difference gradient magnitude of both flow components
fn boundary_energy(flow: &Array3<f32>, y: usize, x: usize) -> f32 {
    let here = flow_at(flow, y as f32, x as f32);
    let right = flow_at(flow, y as f32, x as f32 + 1.0);
    let below = flow_at(flow, y as f32 + 1.0, x as f32);
    let du_dx = right.0 - here.0;
    let du_dy = below.0 - here.0;
    let dv_dx = right.1 - here.1;
    let dv_dy = below.1 - here.1;
    du_dx.mul_add(
        du_dx,
        du_dy.mul_add(du_dy, dv_dx.mul_add(dv_dx, dv_dy * dv_dy)),
    )
}

/// Estimate a per-pixel confidence mask for temporal correspondences
///
/// Returns a `[h, w]` tensor of weights in `[0, 1]`: 0 marks a pixel with no
/// reliable correspondence between `prev` and `curr` (disocclusion or motion
/// boundary toward `next`), 1 marks full confidence. The boundary check is
/// skipped when `next` is unavailable (last frame of a sequence).
///
/// # Errors
///
/// Propagates flow estimation failures and frame shape mismatches.
pub fn disocclusion_mask(
    estimator: &dyn FlowEstimator,
    prev: &Array4<f32>,
    curr: &Array4<f32>,
    next: Option<&Array4<f32>>,
) -> Result<Array2<f32>> {
    let backward = estimator.estimate(curr, prev)?;
    let forward = estimator.estimate(prev, curr)?;
    let toward_next = next.map(|frame| estimator.estimate(curr, frame)).transpose()?;

    let (_, h, w, _) = curr.dim();
    let mut mask = Array2::<f32>::zeros((h, w));
    for ((y, x), weight) in mask.indexed_iter_mut() {
        let (bu, bv) = flow_at(&backward, y as f32, x as f32);
        // Where this pixel claims to come from in the previous frame
        let (fu, fv) = flow_at(&forward, y as f32 + bv, x as f32 + bu);
        let round_u = bu + fu;
        let round_v = bv + fv;
        let round_trip = round_u.mul_add(round_u, round_v * round_v);
        let magnitudes = bu.mul_add(bu, bv.mul_add(bv, fu.mul_add(fu, fv * fv)));
        if round_trip > FLOW_CONSISTENCY_RELATIVE.mul_add(magnitudes, FLOW_CONSISTENCY_ABSOLUTE) {
            continue;
        }
        if let Some(flow) = &toward_next {
            let (nu, nv) = flow_at(flow, y as f32, x as f32);
            let energy = boundary_energy(flow, y, x);
            let threshold =
                FLOW_BOUNDARY_RELATIVE.mul_add(nu.mul_add(nu, nv * nv), FLOW_BOUNDARY_ABSOLUTE);
            if energy > threshold {
                continue;
            }
        }
        *weight = 1.0;
    }
    Ok(mask)
}
