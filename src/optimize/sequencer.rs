//! Frame sequencing for video stylization
//!
//! Runs the stylizer over an ordered frame sequence: style Grams are computed
//! once up front, each frame after the first starts from the previous
//! stylized canvas, and a temporal consistency context ties consecutive
//! frames together when a flow estimator is supplied. A frame whose
//! optimization diverges is skipped rather than aborting the batch.
//!
//! Outcomes stream to a [`SequenceObserver`] one frame at a time, so callers
//! can persist each canvas as soon as it is ready; the sequencer itself only
//! retains the previous frame's canvas for warm starts.

use crate::io::error::{Result, StyleError, invalid_parameter};
use crate::network::extractor::FeatureExtractor;
use crate::optimize::stylize::{FrameResult, Stylizer};
use crate::temporal::flow::FlowEstimator;
use crate::temporal::{TemporalContext, build_context};
use ndarray::Array4;

/// What happened to one frame of a sequence
#[derive(Debug)]
pub enum FrameOutcome {
    /// The frame finished (or was cancelled partway with a usable canvas)
    Stylized(FrameResult),
    /// Optimization diverged; the frame produced no output
    Skipped(StyleError),
}

impl FrameOutcome {
    /// The stylized canvas, if this frame produced one
    pub const fn canvas(&self) -> Option<&Array4<f32>> {
        match self {
            Self::Stylized(result) => Some(&result.canvas),
            Self::Skipped(_) => None,
        }
    }
}

/// Receives sequencing events as each frame is processed
///
/// Frames are handed over one at a time rather than collected, so a sequence
/// never holds more than one finished canvas beyond the warm-start copy.
pub trait SequenceObserver {
    /// Frame `index` is about to start optimizing
    fn frame_started(&mut self, _index: usize) {}

    /// One iteration of frame `index` finished with the given total loss
    fn iteration_finished(&mut self, _index: usize, _iteration: usize, _loss: f32) {}

    /// Frame `index` produced its outcome
    ///
    /// # Errors
    ///
    /// Returning an error aborts the remainder of the sequence.
    fn frame_finished(&mut self, index: usize, outcome: FrameOutcome) -> Result<()>;
}

/// Orchestrates per-frame stylization across an ordered sequence
pub struct FrameSequencer<'a, E: FeatureExtractor> {
    stylizer: &'a Stylizer<E>,
    flow: Option<&'a dyn FlowEstimator>,
}

impl<'a, E: FeatureExtractor> FrameSequencer<'a, E> {
    /// Create a sequencer; pass a flow estimator to enable temporal coupling
    pub const fn new(stylizer: &'a Stylizer<E>, flow: Option<&'a dyn FlowEstimator>) -> Self {
        Self { stylizer, flow }
    }

    /// Stylize every frame in order
    ///
    /// `first_canvas` seeds the first frame and any frame whose predecessor
    /// was skipped; all other frames warm-start from the previous stylized
    /// canvas. The observer is told when each frame starts, after every
    /// iteration, and is handed each [`FrameOutcome`] as soon as it is
    /// ready, before the next frame begins. Cancellation (via the
    /// stylizer's flag) stops the batch at the next iteration boundary;
    /// outcomes already delivered stand.
    ///
    /// # Errors
    ///
    /// Returns an error if `frames` is empty, style Gram computation fails,
    /// a non-divergence failure occurs mid-sequence, or the observer's
    /// [`SequenceObserver::frame_finished`] fails. Divergence on an
    /// individual frame is reported as [`FrameOutcome::Skipped`], not an
    /// error.
    pub fn run(
        &self,
        frames: &[Array4<f32>],
        style: &Array4<f32>,
        first_canvas: &Array4<f32>,
        observer: &mut dyn SequenceObserver,
    ) -> Result<()> {
        if frames.is_empty() {
            return Err(invalid_parameter(
                "frames",
                &0,
                &"at least one frame is required",
            ));
        }
        let style_grams = self.stylizer.style_grams(style)?;
        let mut previous_canvas: Option<Array4<f32>> = None;

        for (index, frame) in frames.iter().enumerate() {
            observer.frame_started(index);
            let temporal = self.context_for(index, frames, previous_canvas.as_ref())?;
            let initial = previous_canvas
                .take()
                .unwrap_or_else(|| first_canvas.clone());
            let mut run =
                self.stylizer
                    .begin_frame(frame, style, initial, Some(&style_grams), temporal)?;

            let mut divergence = None;
            for _ in 0..self.stylizer.config().iterations {
                if self.stylizer.is_cancelled() {
                    break;
                }
                match run.step() {
                    Ok(losses) => observer.iteration_finished(index, run.iteration(), losses.total),
                    Err(err @ StyleError::NumericDivergence { .. }) => {
                        divergence = Some(err);
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }

            let outcome = match divergence {
                Some(err) => FrameOutcome::Skipped(err),
                None => {
                    let result = run.finish();
                    // Skipped frames leave previous_canvas empty so the next
                    // frame restarts from the seed canvas
                    previous_canvas = Some(result.canvas.clone());
                    FrameOutcome::Stylized(result)
                }
            };
            observer.frame_finished(index, outcome)?;
            if self.stylizer.is_cancelled() {
                break;
            }
        }
        Ok(())
    }

    /// Temporal context for frame `index`, or `None` when unavailable
    ///
    /// The first frame has no predecessor; that case is expected and maps to
    /// `None` rather than an error, as does running without a flow estimator.
    fn context_for(
        &self,
        index: usize,
        frames: &[Array4<f32>],
        previous_stylized: Option<&Array4<f32>>,
    ) -> Result<Option<TemporalContext>> {
        let Some(flow) = self.flow else {
            return Ok(None);
        };
        let Some(current) = frames.get(index) else {
            return Ok(None);
        };
        let previous = index.checked_sub(1).and_then(|i| frames.get(i));
        match build_context(
            flow,
            index,
            previous_stylized,
            previous,
            current,
            frames.get(index + 1),
        ) {
            Ok(context) => Ok(Some(context)),
            Err(StyleError::MissingTemporalContext { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
