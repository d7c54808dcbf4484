//! Multi-term loss engine: content, style, and temporal distances
//!
//! Every term also produces the gradient with respect to its candidate input,
//! so one evaluation yields both the scalar loss and the cotangents the
//! feature extractor needs for its reverse pass. The three weights operate at
//! vastly different natural magnitudes (content ~1e4, style ~1e-2, temporal
//! ~1e9) and stay independently tunable.

use crate::io::error::{Result, invalid_parameter, shape_mismatch};
use crate::optimize::gram::{gram_backward, gram_matrix};
use crate::temporal::TemporalContext;
use ndarray::{Array2, Array4, Zip};

/// Scalar values of each loss term for one evaluation
#[derive(Debug, Clone, Copy, Default)]
pub struct LossBreakdown {
    /// Unweighted content distance
    pub content: f32,
    /// Unweighted (but per-layer weighted) style distance
    pub style: f32,
    /// Unweighted temporal distance
    pub temporal: f32,
    /// Weighted sum of all terms
    pub total: f32,
}

// Mean-squared error of a feature map pair and its gradient wrt the candidate
fn feature_mse(target: &Array4<f32>, candidate: &Array4<f32>) -> (f32, Array4<f32>) {
    let count = target.len() as f32;
    let diff = candidate - target;
    let loss = diff.iter().map(|d| d * d).sum::<f32>() / count;
    let grad = diff * (2.0 / count);
    (loss, grad)
}

// Mean-squared error of a Gram matrix pair and its gradient wrt the candidate
fn gram_mse(target: &Array2<f32>, candidate: &Array2<f32>) -> (f32, Array2<f32>) {
    let count = target.len() as f32;
    let diff = candidate - target;
    let loss = diff.iter().map(|d| d * d).sum::<f32>() / count;
    let grad = diff * (2.0 / count);
    (loss, grad)
}

/// Combines content-feature distance, style-Gram distance, and an optional
/// temporal distance into one scalar loss with per-term gradients
#[derive(Debug, Clone)]
pub struct LossEngine {
    content_weight: f32,
    style_weight: f32,
    temporal_weight: f32,
    style_layer_weights: Vec<f32>,
}

impl LossEngine {
    /// Create a loss engine from term weights and per-style-layer weights
    pub const fn new(
        content_weight: f32,
        style_weight: f32,
        temporal_weight: f32,
        style_layer_weights: Vec<f32>,
    ) -> Self {
        Self {
            content_weight,
            style_weight,
            temporal_weight,
            style_layer_weights,
        }
    }

    /// Weight applied to the content term
    pub const fn content_weight(&self) -> f32 {
        self.content_weight
    }

    /// Weight applied to the style term
    pub const fn style_weight(&self) -> f32 {
        self.style_weight
    }

    /// Weight applied to the temporal term
    pub const fn temporal_weight(&self) -> f32 {
        self.temporal_weight
    }

    /// Content loss across layers plus the per-layer candidate gradients
    ///
    /// Gradients are unweighted; the caller scales them by
    /// [`Self::content_weight`] when assembling cotangents.
    ///
    /// # Errors
    ///
    /// Returns an error if the layer counts differ or any layer's shapes
    /// disagree between target and candidate.
    pub fn content_term(
        &self,
        targets: &[Array4<f32>],
        candidates: &[&Array4<f32>],
    ) -> Result<(f32, Vec<Array4<f32>>)> {
        if targets.len() != candidates.len() {
            return Err(invalid_parameter(
                "content_layers",
                &candidates.len(),
                &format!("expected {} candidate layers", targets.len()),
            ));
        }
        let mut loss = 0.0;
        let mut grads = Vec::with_capacity(targets.len());
        for (target, candidate) in targets.iter().zip(candidates) {
            if target.shape() != candidate.shape() {
                return Err(shape_mismatch(
                    "content loss",
                    target.shape(),
                    candidate.shape(),
                ));
            }
            let (layer_loss, grad) = feature_mse(target, candidate);
            loss += layer_loss;
            grads.push(grad);
        }
        Ok((loss, grads))
    }

    /// Style loss across layers plus the per-layer candidate gradients
    ///
    /// Candidate Grams are computed here from the candidate feature maps so
    /// the Gram chain rule can reuse the same flattened features. Gradients
    /// include the per-layer style weights but not [`Self::style_weight`].
    ///
    /// # Errors
    ///
    /// Returns an error if the layer counts differ, a Gram pair's dimensions
    /// disagree, or the per-layer weight list has the wrong length.
    pub fn style_term(
        &self,
        target_grams: &[Array2<f32>],
        candidates: &[&Array4<f32>],
    ) -> Result<(f32, Vec<Array4<f32>>)> {
        if target_grams.len() != candidates.len() {
            return Err(invalid_parameter(
                "style_layers",
                &candidates.len(),
                &format!("expected {} candidate layers", target_grams.len()),
            ));
        }
        if self.style_layer_weights.len() != target_grams.len() {
            return Err(invalid_parameter(
                "style_layer_weights",
                &self.style_layer_weights.len(),
                &format!("expected one weight per style layer ({})", target_grams.len()),
            ));
        }
        let mut loss = 0.0;
        let mut grads = Vec::with_capacity(target_grams.len());
        for ((target, candidate), &layer_weight) in target_grams
            .iter()
            .zip(candidates)
            .zip(&self.style_layer_weights)
        {
            let candidate_gram = gram_matrix(candidate)?;
            if target.dim() != candidate_gram.dim() {
                return Err(shape_mismatch(
                    "style loss",
                    target.shape(),
                    candidate_gram.shape(),
                ));
            }
            let (layer_loss, d_gram) = gram_mse(target, &candidate_gram);
            loss += layer_weight * layer_loss;
            let scaled = d_gram.mapv(|g| layer_weight * g);
            grads.push(gram_backward(candidate, &scaled)?);
        }
        Ok((loss, grads))
    }

    /// Masked temporal distance between the canvas and a warped previous frame
    ///
    /// Defined as zero with no gradient when `context` is absent (first frame
    /// of a sequence, or temporal mode disabled).
    ///
    /// # Errors
    ///
    /// Returns an error if the warped frame or mask shapes disagree with the
    /// canvas.
    pub fn temporal_term(
        &self,
        canvas: &Array4<f32>,
        context: Option<&TemporalContext>,
    ) -> Result<(f32, Option<Array4<f32>>)> {
        let Some(context) = context else {
            return Ok((0.0, None));
        };
        let (batch, h, w, channels) = canvas.dim();
        if context.warped_prev.dim() != canvas.dim() {
            return Err(shape_mismatch(
                "temporal loss",
                canvas.shape(),
                context.warped_prev.shape(),
            ));
        }
        if context.mask.dim() != (h, w) {
            return Err(shape_mismatch("temporal mask", &[h, w], context.mask.shape()));
        }
        let count = (batch * h * w * channels) as f32;
        let mut loss = 0.0;
        let mut grad = Array4::<f32>::zeros(canvas.dim());
        Zip::indexed(&mut grad).for_each(|(_, y, x, _), g| {
            let weight = context.mask.get([y, x]).copied().unwrap_or(0.0);
            *g = weight;
        });
        // grad currently holds the broadcast mask; fold in the residual
        Zip::from(&mut grad)
            .and(canvas)
            .and(&context.warped_prev)
            .for_each(|g, &current, &previous| {
                let residual = current - previous;
                loss += *g * residual * residual;
                *g *= 2.0 * residual / count;
            });
        Ok((loss / count, Some(grad)))
    }

    /// Weighted sum of the three loss terms
    pub fn total(&self, content: f32, style: f32, temporal: f32) -> f32 {
        self.content_weight.mul_add(
            content,
            self.style_weight
                .mul_add(style, self.temporal_weight * temporal),
        )
    }
}
