//! Progress display for single images and frame sequences
//!
//! Small batches get one bar per frame; long sequences collapse into a
//! single batch bar so the terminal is not flooded. The most recent total
//! loss rides along in the bar message.

use crate::io::configuration::{MAX_INDIVIDUAL_PROGRESS_BARS, PROGRESS_LOSS_INTERVAL};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::LazyLock;

/// Per-frame display state: name, current iteration, budget, latest loss
#[derive(Clone, Default)]
struct FrameState {
    name: String,
    iteration: usize,
    budget: usize,
    loss: Option<f32>,
}

/// Coordinates progress display across a stylization run
///
/// Switches between individual frame bars (short sequences) and a single
/// batch bar (long sequences) based on frame count.
pub struct ProgressManager {
    multi_progress: MultiProgress,
    batch_bar: Option<ProgressBar>,
    frame_bars: Vec<ProgressBar>,
    frame_states: Vec<FrameState>,
}

impl Default for ProgressManager {
    fn default() -> Self {
        Self::new()
    }
}

static ITERATION_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("{msg} [{bar:30.cyan/blue}] {prefix}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏ ")
});

static BATCH_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("[{elapsed_precise}] Frames: [{bar:40.cyan/blue}] {pos}/{len}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
});

impl ProgressManager {
    /// Create a new progress manager
    pub fn new() -> Self {
        Self {
            multi_progress: MultiProgress::new(),
            batch_bar: None,
            frame_bars: Vec::new(),
            frame_states: Vec::new(),
        }
    }

    /// Set up bars for a run over `frame_count` frames
    pub fn initialize(&mut self, frame_count: usize) {
        if frame_count > MAX_INDIVIDUAL_PROGRESS_BARS + 1 {
            let batch_bar = ProgressBar::new(frame_count as u64);
            batch_bar.set_style(BATCH_STYLE.clone());
            self.batch_bar = Some(self.multi_progress.add(batch_bar));
        }

        let bars_to_create = frame_count.min(MAX_INDIVIDUAL_PROGRESS_BARS);
        for _ in 0..bars_to_create {
            let bar = ProgressBar::new(0);
            bar.set_style(ITERATION_STYLE.clone());
            self.frame_bars.push(self.multi_progress.add(bar));
        }
    }

    /// Register a frame about to start optimizing
    pub fn start_frame(&mut self, index: usize, path: &Path, iterations: usize) {
        let name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        if index >= self.frame_states.len() {
            self.frame_states.resize(index + 1, FrameState::default());
        }
        if let Some(state) = self.frame_states.get_mut(index) {
            *state = FrameState {
                name,
                iteration: 0,
                budget: iterations,
                loss: None,
            };
        }
        self.update_bars();
    }

    /// Report an iteration and its total loss
    ///
    /// The loss readout refreshes on an interval rather than every iteration
    /// so a fast inner loop does not thrash the terminal.
    pub fn update_iteration(&mut self, frame_index: usize, iteration: usize, loss: f32) {
        if let Some(state) = self.frame_states.get_mut(frame_index) {
            state.iteration = iteration;
            if iteration % PROGRESS_LOSS_INTERVAL == 0 || iteration == state.budget {
                state.loss = Some(loss);
            }
        }
        self.update_bars();
    }

    /// Mark a frame as finished
    pub fn complete_frame(&mut self, index: usize) {
        if let Some(ref batch_bar) = self.batch_bar {
            batch_bar.inc(1);
        }
        if let Some(state) = self.frame_states.get_mut(index) {
            state.name = format!("✓ {}", state.name);
            state.iteration = state.budget;
        }
        self.update_bars();
    }

    /// Mark a frame as skipped after a divergence
    pub fn skip_frame(&mut self, index: usize) {
        if let Some(ref batch_bar) = self.batch_bar {
            batch_bar.inc(1);
        }
        if let Some(state) = self.frame_states.get_mut(index) {
            state.name = format!("✗ {}", state.name);
        }
        self.update_bars();
    }

    /// Tear down all progress displays
    pub fn finish(&self) {
        if let Some(ref batch_bar) = self.batch_bar {
            batch_bar.finish_with_message("All frames processed");
        }
        let _ = self.multi_progress.clear();
    }

    /// Show the most recent active frames in the available bars
    fn update_bars(&self) {
        let active: Vec<&FrameState> = self
            .frame_states
            .iter()
            .filter(|state| !state.name.is_empty())
            .collect();
        let start = active.len().saturating_sub(MAX_INDIVIDUAL_PROGRESS_BARS);
        let visible = active.get(start..).unwrap_or(&[]);

        for (bar_index, state) in visible.iter().enumerate() {
            if let Some(bar) = self.frame_bars.get(bar_index) {
                bar.set_length(state.budget as u64);
                bar.set_position(state.iteration as u64);
                let width = state.budget.to_string().len();
                let counter = format!("{:>width$}/{}", state.iteration, state.budget);
                match state.loss {
                    Some(loss) => bar.set_message(format!("{counter} loss {loss:.3e}")),
                    None => bar.set_message(counter),
                }
                bar.set_prefix(state.name.clone());
            }
        }

        for bar_index in visible.len()..self.frame_bars.len() {
            if let Some(bar) = self.frame_bars.get(bar_index) {
                bar.set_length(0);
                bar.set_position(0);
                bar.set_message(String::new());
                bar.set_prefix(String::new());
            }
        }
    }
}
