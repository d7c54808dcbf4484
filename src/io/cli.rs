//! Command-line interface for stylizing images and frame sequences

use crate::io::configuration::{
    BACKBONE_SEED, DEFAULT_CONTENT_WEIGHT, DEFAULT_IMG_HEIGHT, DEFAULT_IMG_WIDTH,
    DEFAULT_ITERATIONS, DEFAULT_LEARNING_RATE, DEFAULT_SEED, DEFAULT_STYLE_WEIGHT,
    DEFAULT_TEMPORAL_WEIGHT, OUTPUT_SUFFIX,
};
use crate::io::error::{Result, invalid_parameter};
use crate::io::image::{export_image_tensor, load_image_tensor, noise_canvas};
use crate::io::progress::ProgressManager;
use crate::network::backbone::ConvNet;
use crate::optimize::sequencer::{FrameOutcome, FrameSequencer, SequenceObserver};
use crate::optimize::stylize::{StyleConfig, Stylizer};
use crate::temporal::flow::{FlowEstimator, ZeroFlow};
use clap::Parser;
use std::path::{Path, PathBuf};

const SUPPORTED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Parser)]
#[command(name = "neuralstyle")]
#[command(
    author,
    version,
    about = "Transfer the style of one image onto another through iterative optimization"
)]
/// Command-line arguments for the stylization tool
pub struct Cli {
    /// Content image, or a directory of ordered video frames
    #[arg(value_name = "CONTENT")]
    pub content: PathBuf,

    /// Style image whose texture statistics are transferred
    #[arg(short, long)]
    pub style: PathBuf,

    /// Output file or directory (defaults to alongside the input)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Couple consecutive frames with a temporal consistency loss
    #[arg(short, long)]
    pub temporal: bool,

    /// Weight of the content loss term
    #[arg(long, default_value_t = DEFAULT_CONTENT_WEIGHT)]
    pub content_weight: f32,

    /// Weight of the style loss term
    #[arg(long, default_value_t = DEFAULT_STYLE_WEIGHT)]
    pub style_weight: f32,

    /// Weight of the temporal consistency loss term
    #[arg(long, default_value_t = DEFAULT_TEMPORAL_WEIGHT)]
    pub temporal_weight: f32,

    /// Adam learning rate
    #[arg(short, long, default_value_t = DEFAULT_LEARNING_RATE)]
    pub learning_rate: f32,

    /// Optimization iterations per frame
    #[arg(short, long, default_value_t = DEFAULT_ITERATIONS)]
    pub iterations: usize,

    /// Working height both inputs are resized to
    #[arg(short = 'H', long, default_value_t = DEFAULT_IMG_HEIGHT)]
    pub height: usize,

    /// Working width both inputs are resized to
    #[arg(short = 'w', long, default_value_t = DEFAULT_IMG_WIDTH)]
    pub width: usize,

    /// Random seed for the initial noise canvas
    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    /// Suppress progress output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Cli {
    /// Check if progress should be displayed
    pub const fn should_show_progress(&self) -> bool {
        !self.quiet
    }

    fn style_config(&self) -> StyleConfig {
        StyleConfig {
            content_weight: self.content_weight,
            style_weight: self.style_weight,
            temporal_weight: self.temporal_weight,
            learning_rate: self.learning_rate,
            iterations: self.iterations,
            ..StyleConfig::default()
        }
    }
}

/// Orchestrates stylization of a single image or a frame sequence
pub struct StyleProcessor {
    cli: Cli,
    progress: Option<ProgressManager>,
}

impl StyleProcessor {
    /// Create a processor from parsed CLI arguments
    pub fn new(cli: Cli) -> Self {
        let progress = cli.should_show_progress().then(ProgressManager::new);
        Self { cli, progress }
    }

    /// Run the full stylization, writing each output image as its frame
    /// finishes
    ///
    /// A single-image input is treated as a one-frame sequence, so both
    /// paths share the sequencer. Outputs are exported per frame rather than
    /// after the batch, so a long sequence never accumulates canvases in
    /// memory and frames already written survive a later failure. Frames
    /// skipped after a numeric divergence are reported but do not fail the
    /// batch.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid inputs, image I/O failures, or a
    /// non-divergence optimization failure.
    pub fn process(&mut self) -> Result<()> {
        let frame_paths = self.collect_frames()?;
        if frame_paths.is_empty() {
            return Ok(());
        }

        let (height, width) = (self.cli.height, self.cli.width);
        let style = load_image_tensor(&self.cli.style, height, width)?;
        let frames = frame_paths
            .iter()
            .map(|path| load_image_tensor(path, height, width))
            .collect::<Result<Vec<_>>>()?;
        let output_paths = frame_paths
            .iter()
            .map(|path| self.output_path(path))
            .collect::<Vec<_>>();

        let stylizer = Stylizer::new(ConvNet::seeded(BACKBONE_SEED), self.cli.style_config())?;
        let estimator = ZeroFlow;
        let flow: Option<&dyn FlowEstimator> = self.cli.temporal.then_some(&estimator);
        let sequencer = FrameSequencer::new(&stylizer, flow);
        let seed_canvas = noise_canvas(height, width, self.cli.seed);

        if let Some(ref mut pm) = self.progress {
            pm.initialize(frame_paths.len());
        }

        let mut exporter = FrameExporter {
            frame_paths: &frame_paths,
            output_paths: &output_paths,
            iterations: self.cli.iterations,
            quiet: self.cli.quiet,
            progress: self.progress.take(),
        };
        let run = sequencer.run(&frames, &style, &seed_canvas, &mut exporter);
        self.progress = exporter.progress.take();
        run?;

        if let Some(ref pm) = self.progress {
            pm.finish();
        }
        Ok(())
    }

    fn collect_frames(&self) -> Result<Vec<PathBuf>> {
        if self.cli.content.is_file() {
            if Self::is_supported(&self.cli.content) {
                Ok(vec![self.cli.content.clone()])
            } else {
                Err(invalid_parameter(
                    "content",
                    &self.cli.content.display(),
                    &"content file must be a PNG or JPEG image",
                ))
            }
        } else if self.cli.content.is_dir() {
            let mut frames = Vec::new();
            for entry in std::fs::read_dir(&self.cli.content)? {
                let path = entry?.path();
                if path.is_file() && Self::is_supported(&path) && !Self::is_output(&path) {
                    frames.push(path);
                }
            }
            // Frame order is the lexicographic file order
            frames.sort();
            Ok(frames)
        } else {
            Err(invalid_parameter(
                "content",
                &self.cli.content.display(),
                &"content must be an existing image file or directory of frames",
            ))
        }
    }

    fn is_supported(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                SUPPORTED_EXTENSIONS
                    .iter()
                    .any(|supported| ext.eq_ignore_ascii_case(supported))
            })
    }

    // Re-running over a directory must not pick up earlier outputs as frames
    fn is_output(path: &Path) -> bool {
        path.file_stem()
            .and_then(|stem| stem.to_str())
            .is_some_and(|stem| stem.ends_with(OUTPUT_SUFFIX))
    }

    fn output_path(&self, input_path: &Path) -> PathBuf {
        match &self.cli.output {
            Some(output) if self.cli.content.is_dir() || output.is_dir() => {
                output.join(Self::styled_name(input_path))
            }
            Some(output) => output.clone(),
            None => {
                let name = Self::styled_name(input_path);
                input_path
                    .parent()
                    .map_or_else(|| PathBuf::from(&name), |parent| parent.join(&name))
            }
        }
    }

    fn styled_name(input_path: &Path) -> String {
        let stem = input_path.file_stem().unwrap_or_default();
        format!("{}{OUTPUT_SUFFIX}.png", stem.to_string_lossy())
    }
}

// Streams each finished frame straight to disk, so the sequence never
// buffers more than the frame currently optimizing
struct FrameExporter<'a> {
    frame_paths: &'a [PathBuf],
    output_paths: &'a [PathBuf],
    iterations: usize,
    quiet: bool,
    progress: Option<ProgressManager>,
}

impl SequenceObserver for FrameExporter<'_> {
    fn frame_started(&mut self, index: usize) {
        if let Some(pm) = self.progress.as_mut() {
            let path = self
                .frame_paths
                .get(index)
                .map_or(Path::new(""), PathBuf::as_path);
            pm.start_frame(index, path, self.iterations);
        }
    }

    fn iteration_finished(&mut self, index: usize, iteration: usize, loss: f32) {
        if let Some(pm) = self.progress.as_mut() {
            pm.update_iteration(index, iteration, loss);
        }
    }

    // Allow print for user feedback on skipped frames
    #[allow(clippy::print_stderr)]
    fn frame_finished(&mut self, index: usize, outcome: FrameOutcome) -> Result<()> {
        match outcome {
            FrameOutcome::Stylized(result) => {
                let output = self
                    .output_paths
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| PathBuf::from(format!("frame{index}{OUTPUT_SUFFIX}.png")));
                export_image_tensor(&result.canvas, &output)?;
                if let Some(pm) = self.progress.as_mut() {
                    pm.complete_frame(index);
                }
            }
            FrameOutcome::Skipped(err) => {
                if let Some(pm) = self.progress.as_mut() {
                    pm.skip_frame(index);
                }
                if !self.quiet {
                    eprintln!(
                        "Skipping frame {}: {err}",
                        self.frame_paths
                            .get(index)
                            .map_or_else(|| index.to_string(), |p| p.display().to_string())
                    );
                }
            }
        }
        Ok(())
    }
}
