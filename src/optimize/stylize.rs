//! The per-frame stylization loop
//!
//! Owns the mutable canvas tensor and drives iterative descent: one forward
//! pass over the union of content and style layers, a weighted multi-term
//! loss, a reverse pass through the extractor, one Adam step, and a clamp
//! back into `[0, 1]`. Target features and style Grams are computed once per
//! frame and reused across every iteration.

use crate::io::configuration::{
    DEFAULT_CONTENT_LAYERS, DEFAULT_CONTENT_WEIGHT, DEFAULT_ITERATIONS, DEFAULT_LEARNING_RATE,
    DEFAULT_STYLE_LAYERS, DEFAULT_STYLE_LAYER_WEIGHTS, DEFAULT_STYLE_WEIGHT,
    DEFAULT_TEMPORAL_WEIGHT,
};
use crate::io::error::{Result, invalid_parameter, numeric_divergence};
use crate::network::extractor::{FeatureExtractor, LayerId, validate_layers};
use crate::optimize::adam::Adam;
use crate::optimize::gram::grams_of;
use crate::optimize::loss::{LossBreakdown, LossEngine};
use crate::temporal::TemporalContext;
use ndarray::{Array2, Array4};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Hyperparameters controlling one stylization run
///
/// Passed explicitly into [`Stylizer::new`]; nothing here lives in global
/// state. Target resolution is an I/O concern and is fixed by the loaded
/// tensors themselves.
#[derive(Clone, Debug)]
pub struct StyleConfig {
    /// Weight of the content loss term
    pub content_weight: f32,
    /// Weight of the style loss term
    pub style_weight: f32,
    /// Weight of the temporal consistency loss term
    pub temporal_weight: f32,
    /// Adam learning rate
    pub learning_rate: f32,
    /// Iteration budget per frame
    pub iterations: usize,
    /// Extractor layers whose feature maps define content structure
    pub content_layers: Vec<LayerId>,
    /// Extractor layers whose Gram matrices define style statistics
    pub style_layers: Vec<LayerId>,
    /// Per-layer weighting for the style loss, one entry per style layer
    pub style_layer_weights: Vec<f32>,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            content_weight: DEFAULT_CONTENT_WEIGHT,
            style_weight: DEFAULT_STYLE_WEIGHT,
            temporal_weight: DEFAULT_TEMPORAL_WEIGHT,
            learning_rate: DEFAULT_LEARNING_RATE,
            iterations: DEFAULT_ITERATIONS,
            content_layers: DEFAULT_CONTENT_LAYERS.into_iter().map(LayerId).collect(),
            style_layers: DEFAULT_STYLE_LAYERS.into_iter().map(LayerId).collect(),
            style_layer_weights: DEFAULT_STYLE_LAYER_WEIGHTS.to_vec(),
        }
    }
}

impl StyleConfig {
    /// Check every parameter before any optimization begins
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid parameter.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("content_weight", self.content_weight),
            ("style_weight", self.style_weight),
            ("temporal_weight", self.temporal_weight),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid_parameter(
                    name,
                    &value,
                    &"must be finite and non-negative",
                ));
            }
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(invalid_parameter(
                "learning_rate",
                &self.learning_rate,
                &"must be finite and positive",
            ));
        }
        if self.content_layers.is_empty() {
            return Err(invalid_parameter(
                "content_layers",
                &"[]",
                &"at least one content layer is required",
            ));
        }
        if self.style_layers.is_empty() {
            return Err(invalid_parameter(
                "style_layers",
                &"[]",
                &"at least one style layer is required",
            ));
        }
        if self.style_layer_weights.len() != self.style_layers.len() {
            return Err(invalid_parameter(
                "style_layer_weights",
                &self.style_layer_weights.len(),
                &format!("expected one weight per style layer ({})", self.style_layers.len()),
            ));
        }
        Ok(())
    }
}

/// Outcome of one stylized frame
#[derive(Debug, Clone)]
pub struct FrameResult {
    /// Final canvas, every element in `[0, 1]`
    pub canvas: Array4<f32>,
    /// Total loss recorded after each iteration
    pub losses: Vec<f32>,
    /// Whether the full iteration budget ran (false after cancellation)
    pub completed: bool,
}

/// Drives iterative stylization against an injected feature extractor
pub struct Stylizer<E: FeatureExtractor> {
    extractor: E,
    config: StyleConfig,
    engine: LossEngine,
    // Sorted union of content and style layers: one forward pass serves both
    layers: Vec<LayerId>,
    content_slots: Vec<usize>,
    style_slots: Vec<usize>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<E: FeatureExtractor> Stylizer<E> {
    /// Create a stylizer, validating the configuration against the extractor
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is invalid or a configured layer is
    /// out of range for the extractor.
    pub fn new(extractor: E, config: StyleConfig) -> Result<Self> {
        config.validate()?;
        validate_layers(&config.content_layers, extractor.layer_count())?;
        validate_layers(&config.style_layers, extractor.layer_count())?;

        let mut layers: Vec<LayerId> = config
            .content_layers
            .iter()
            .chain(&config.style_layers)
            .copied()
            .collect();
        layers.sort_unstable();
        layers.dedup();
        let slot_of =
            |id: &LayerId| layers.iter().position(|candidate| candidate == id).unwrap_or(0);
        let content_slots = config.content_layers.iter().map(slot_of).collect();
        let style_slots = config.style_layers.iter().map(slot_of).collect();

        let engine = LossEngine::new(
            config.content_weight,
            config.style_weight,
            config.temporal_weight,
            config.style_layer_weights.clone(),
        );
        Ok(Self {
            extractor,
            config,
            engine,
            layers,
            content_slots,
            style_slots,
            cancel: None,
        })
    }

    /// Attach a cancellation flag checked at iteration boundaries
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// The active configuration
    pub const fn config(&self) -> &StyleConfig {
        &self.config
    }

    /// Whether the attached cancellation flag has been raised
    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Compute the style target Grams for a style image
    ///
    /// For video, call once and pass the result to every frame as
    /// `precomputed_style_grams`; the style target never changes between
    /// frames and must not be recomputed per frame.
    ///
    /// # Errors
    ///
    /// Propagates extractor and Gram computation failures.
    pub fn style_grams(&self, style: &Array4<f32>) -> Result<Vec<Array2<f32>>> {
        let pass = self.extractor.forward(style, &self.config.style_layers)?;
        grams_of(self.extractor.maps(&pass))
    }

    /// Prepare one frame: compute targets once and zero the optimizer state
    ///
    /// The canvas starts from `initial_canvas` (noise for a lone image or the
    /// first video frame, the previous stylized frame afterwards). Style
    /// Grams come from `precomputed_style_grams` when supplied, otherwise
    /// they are computed fresh from `style`.
    ///
    /// # Errors
    ///
    /// Returns an error if target computation fails or the precomputed Gram
    /// count disagrees with the configured style layers.
    pub fn begin_frame(
        &self,
        content: &Array4<f32>,
        style: &Array4<f32>,
        initial_canvas: Array4<f32>,
        precomputed_style_grams: Option<&[Array2<f32>]>,
        temporal: Option<TemporalContext>,
    ) -> Result<FrameRun<'_, E>> {
        let content_pass = self.extractor.forward(content, &self.config.content_layers)?;
        let content_targets = self.extractor.maps(&content_pass).to_vec();
        let style_targets = match precomputed_style_grams {
            Some(grams) => {
                if grams.len() != self.config.style_layers.len() {
                    return Err(invalid_parameter(
                        "precomputed_style_grams",
                        &grams.len(),
                        &format!("expected {} style layers", self.config.style_layers.len()),
                    ));
                }
                grams.to_vec()
            }
            None => self.style_grams(style)?,
        };
        let optimizer = Adam::new(self.config.learning_rate, initial_canvas.dim());
        Ok(FrameRun {
            stylizer: self,
            canvas: initial_canvas,
            optimizer,
            content_targets,
            style_targets,
            temporal,
            losses: Vec::with_capacity(self.config.iterations),
            iteration: 0,
        })
    }

    /// Stylize one frame for the full iteration budget
    ///
    /// Checks the cancellation flag between iterations; a cancelled run
    /// returns its partial canvas with `completed = false`.
    ///
    /// # Errors
    ///
    /// Returns an error if preparation fails or the loss or gradient turns
    /// non-finite mid-run.
    pub fn stylize_frame(
        &self,
        content: &Array4<f32>,
        style: &Array4<f32>,
        initial_canvas: Array4<f32>,
        precomputed_style_grams: Option<&[Array2<f32>]>,
        temporal: Option<TemporalContext>,
    ) -> Result<FrameResult> {
        let mut run =
            self.begin_frame(content, style, initial_canvas, precomputed_style_grams, temporal)?;
        for _ in 0..self.config.iterations {
            if self.is_cancelled() {
                break;
            }
            run.step()?;
        }
        Ok(run.finish())
    }
}

/// In-flight stylization of a single frame
///
/// Created by [`Stylizer::begin_frame`]; callers drive it one iteration at a
/// time, which keeps progress reporting outside the optimization core.
pub struct FrameRun<'a, E: FeatureExtractor> {
    stylizer: &'a Stylizer<E>,
    canvas: Array4<f32>,
    optimizer: Adam,
    content_targets: Vec<Array4<f32>>,
    style_targets: Vec<Array2<f32>>,
    temporal: Option<TemporalContext>,
    losses: Vec<f32>,
    iteration: usize,
}

impl<E: FeatureExtractor> FrameRun<'_, E> {
    /// Iterations completed so far
    pub const fn iteration(&self) -> usize {
        self.iteration
    }

    /// Total loss after the most recent iteration
    pub fn latest_loss(&self) -> Option<f32> {
        self.losses.last().copied()
    }

    /// Current canvas state
    pub const fn canvas(&self) -> &Array4<f32> {
        &self.canvas
    }

    /// Run one iteration: forward, loss, reverse, Adam step, clamp
    ///
    /// The whole body is one atomic logical unit; cancellation is only
    /// observed between calls. Returns the per-term loss values for this
    /// iteration.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StyleError::NumericDivergence`] if the loss or the
    /// gradient turns non-finite, leaving the canvas at its last valid state.
    pub fn step(&mut self) -> Result<LossBreakdown> {
        let stylizer = self.stylizer;
        let pass = stylizer.extractor.forward(&self.canvas, &stylizer.layers)?;
        let maps = stylizer.extractor.maps(&pass);
        let content_candidates: Vec<&Array4<f32>> = stylizer
            .content_slots
            .iter()
            .filter_map(|&slot| maps.get(slot))
            .collect();
        let style_candidates: Vec<&Array4<f32>> = stylizer
            .style_slots
            .iter()
            .filter_map(|&slot| maps.get(slot))
            .collect();

        let (content, content_grads) = stylizer
            .engine
            .content_term(&self.content_targets, &content_candidates)?;
        let (style, style_grads) = stylizer
            .engine
            .style_term(&self.style_targets, &style_candidates)?;
        let (temporal, temporal_grad) = stylizer
            .engine
            .temporal_term(&self.canvas, self.temporal.as_ref())?;
        let total = stylizer.engine.total(content, style, temporal);
        if !total.is_finite() {
            return Err(numeric_divergence(
                self.iteration,
                &format!("total loss is {total}"),
            ));
        }

        // Assemble per-layer cotangents over the union forward pass
        let mut cotangents: Vec<Array4<f32>> =
            maps.iter().map(|map| Array4::zeros(map.dim())).collect();
        for (&slot, grad) in stylizer.content_slots.iter().zip(&content_grads) {
            if let Some(cotangent) = cotangents.get_mut(slot) {
                cotangent.scaled_add(stylizer.engine.content_weight(), grad);
            }
        }
        for (&slot, grad) in stylizer.style_slots.iter().zip(&style_grads) {
            if let Some(cotangent) = cotangents.get_mut(slot) {
                cotangent.scaled_add(stylizer.engine.style_weight(), grad);
            }
        }
        let mut gradient = stylizer.extractor.backward(&pass, &cotangents)?;
        if let Some(grad) = &temporal_grad {
            gradient.scaled_add(stylizer.engine.temporal_weight(), grad);
        }
        if gradient.iter().any(|g| !g.is_finite()) {
            return Err(numeric_divergence(self.iteration, &"gradient is non-finite"));
        }

        self.optimizer.step(&mut self.canvas, &gradient);
        // The optimizer can push values outside the representable pixel range
        self.canvas.mapv_inplace(|v| v.clamp(0.0, 1.0));
        self.losses.push(total);
        self.iteration += 1;
        Ok(LossBreakdown {
            content,
            style,
            temporal,
            total,
        })
    }

    /// Consume the run and return the canvas with its loss history
    pub fn finish(self) -> FrameResult {
        let completed = self.iteration >= self.stylizer.config.iterations;
        FrameResult {
            canvas: self.canvas,
            losses: self.losses,
            completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::extractor::IdentityExtractor;
    use ndarray::Array4;

    fn identity_config(iterations: usize) -> StyleConfig {
        StyleConfig {
            iterations,
            content_layers: vec![LayerId(0)],
            style_layers: vec![LayerId(0)],
            style_layer_weights: vec![1.0],
            content_weight: 1.0,
            style_weight: 1e-4,
            temporal_weight: 0.0,
            learning_rate: 0.04,
        }
    }

    fn stylizer(iterations: usize) -> Stylizer<IdentityExtractor> {
        Stylizer::new(IdentityExtractor, identity_config(iterations))
            .unwrap_or_else(|e| unreachable!("stylizer construction failed: {e}"))
    }

    fn wavy(phase: f32) -> Array4<f32> {
        let mut t = phase;
        Array4::from_shape_simple_fn((1, 4, 4, 3), move || {
            t += 0.61;
            t.sin().mul_add(0.5, 0.5)
        })
    }

    #[test]
    fn test_zero_iterations_returns_initial_canvas_unchanged() {
        let subject = stylizer(0);
        let initial = wavy(0.3);
        let result = subject
            .stylize_frame(&wavy(0.0), &wavy(1.0), initial.clone(), None, None)
            .unwrap_or_else(|e| unreachable!("stylize failed: {e}"));
        assert_eq!(result.canvas, initial);
        assert!(result.completed);
        assert!(result.losses.is_empty());
    }

    #[test]
    fn test_canvas_stays_in_bounds_from_out_of_range_start() {
        let subject = stylizer(3);
        // Deliberately out of range on both sides
        let initial = Array4::from_shape_simple_fn((1, 4, 4, 3), {
            let mut flip = 1.0_f32;
            move || {
                flip = -flip;
                1.8 * flip
            }
        });
        let mut run = subject
            .begin_frame(&wavy(0.0), &wavy(1.0), initial, None, None)
            .unwrap_or_else(|e| unreachable!("begin failed: {e}"));
        for _ in 0..3 {
            run.step().unwrap_or_else(|e| unreachable!("step failed: {e}"));
            assert!(
                run.canvas().iter().all(|&v| (0.0..=1.0).contains(&v)),
                "canvas escaped [0, 1] at iteration {}",
                run.iteration()
            );
        }
    }

    #[test]
    fn test_loss_trends_down_with_identity_extractor() {
        let subject = stylizer(60);
        let content = wavy(0.0);
        let result = subject
            .stylize_frame(&content, &content.clone(), wavy(2.5), None, None)
            .unwrap_or_else(|e| unreachable!("stylize failed: {e}"));
        let first = result.losses.first().copied().unwrap_or(f32::NAN);
        let last = result.losses.last().copied().unwrap_or(f32::NAN);
        assert!(
            last < first,
            "loss did not decrease over the run: {first} -> {last}"
        );
    }

    #[test]
    fn test_precomputed_grams_match_internal_computation() {
        let subject = stylizer(5);
        let content = wavy(0.0);
        let style = wavy(1.2);
        let initial = wavy(0.7);

        let internal = subject
            .stylize_frame(&content, &style, initial.clone(), None, None)
            .unwrap_or_else(|e| unreachable!("stylize failed: {e}"));
        let grams = subject
            .style_grams(&style)
            .unwrap_or_else(|e| unreachable!("grams failed: {e}"));
        let precomputed = subject
            .stylize_frame(&content, &style, initial, Some(&grams), None)
            .unwrap_or_else(|e| unreachable!("stylize failed: {e}"));

        assert_eq!(internal.canvas, precomputed.canvas);
        assert_eq!(internal.losses, precomputed.losses);
    }

    #[test]
    fn test_cancellation_stops_between_iterations() {
        use std::sync::atomic::AtomicBool;

        let flag = Arc::new(AtomicBool::new(true));
        let subject = stylizer(50).with_cancel_flag(Arc::clone(&flag));
        let initial = wavy(0.7);
        let result = subject
            .stylize_frame(&wavy(0.0), &wavy(1.0), initial.clone(), None, None)
            .unwrap_or_else(|e| unreachable!("stylize failed: {e}"));
        assert!(!result.completed);
        assert!(result.losses.is_empty());
        assert_eq!(result.canvas, initial);
    }

    #[test]
    fn test_invalid_configurations_are_rejected() {
        let negative_weight = StyleConfig {
            content_weight: -1.0,
            ..identity_config(1)
        };
        assert!(negative_weight.validate().is_err());

        let nan_learning_rate = StyleConfig {
            learning_rate: f32::NAN,
            ..identity_config(1)
        };
        assert!(nan_learning_rate.validate().is_err());

        let empty_layers = StyleConfig {
            style_layers: Vec::new(),
            style_layer_weights: Vec::new(),
            ..identity_config(1)
        };
        assert!(empty_layers.validate().is_err());

        let mismatched_weights = StyleConfig {
            style_layer_weights: vec![1.0, 2.0],
            ..identity_config(1)
        };
        assert!(mismatched_weights.validate().is_err());

        let out_of_range_layer = StyleConfig {
            content_layers: vec![LayerId(9)],
            ..identity_config(1)
        };
        assert!(Stylizer::new(IdentityExtractor, out_of_range_layer).is_err());
    }

    #[test]
    fn test_mismatched_precomputed_gram_count_is_rejected() {
        let subject = stylizer(1);
        let result = subject.stylize_frame(&wavy(0.0), &wavy(1.0), wavy(0.5), Some(&[]), None);
        assert!(matches!(
            result,
            Err(crate::StyleError::InvalidParameter { .. })
        ));
    }
}
