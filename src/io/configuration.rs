//! Hyperparameter defaults and runtime constants

// Loss term weights operate at vastly different natural magnitudes; each is
// independently tunable and the defaults below were tuned against
// unnormalized Gram matrices.
/// Default weight for the content loss term
pub const DEFAULT_CONTENT_WEIGHT: f32 = 10_000.0;
/// Default weight for the style loss term
pub const DEFAULT_STYLE_WEIGHT: f32 = 0.03;
/// Default weight for the temporal consistency loss term
pub const DEFAULT_TEMPORAL_WEIGHT: f32 = 4.0e9;

/// Default Adam learning rate
pub const DEFAULT_LEARNING_RATE: f32 = 0.04;

/// Default iteration budget per stylized frame
pub const DEFAULT_ITERATIONS: usize = 100;

// Both inputs are resized to these dimensions before optimization
/// Default output image height in pixels
pub const DEFAULT_IMG_HEIGHT: usize = 400;
/// Default output image width in pixels
pub const DEFAULT_IMG_WIDTH: usize = 600;

/// Default layer indices whose feature maps define content structure
pub const DEFAULT_CONTENT_LAYERS: [usize; 1] = [14];
/// Default layer indices whose Gram matrices define style statistics
pub const DEFAULT_STYLE_LAYERS: [usize; 5] = [2, 5, 8, 13, 18];
/// Default per-layer weighting for the style loss, one per style layer
pub const DEFAULT_STYLE_LAYER_WEIGHTS: [f32; 5] = [1.0, 1.0, 1.0, 1.0, 1.0];

// Adam moment decay rates and denominator guard
/// First-moment exponential decay rate
pub const ADAM_BETA1: f32 = 0.9;
/// Second-moment exponential decay rate
pub const ADAM_BETA2: f32 = 0.999;
/// Denominator epsilon guarding against division by zero
pub const ADAM_EPSILON: f32 = 1e-8;

/// Fixed seed for reproducible noise initialization
pub const DEFAULT_SEED: u64 = 42;
/// Fixed seed for the bundled backbone's deterministic weights
pub const BACKBONE_SEED: u64 = 7;

// Forward/backward flow consistency thresholds for disocclusion detection,
// following Ruder et al.'s linear tolerance in flow magnitude
/// Relative tolerance on round-trip flow displacement
pub const FLOW_CONSISTENCY_RELATIVE: f32 = 0.01;
/// Absolute tolerance on round-trip flow displacement (pixels squared)
pub const FLOW_CONSISTENCY_ABSOLUTE: f32 = 0.5;
/// Relative tolerance on flow gradient magnitude at motion boundaries
pub const FLOW_BOUNDARY_RELATIVE: f32 = 0.01;
/// Absolute tolerance on flow gradient magnitude at motion boundaries
pub const FLOW_BOUNDARY_ABSOLUTE: f32 = 0.002;

// Progress bar display settings
/// Threshold for switching to batch progress mode
pub const MAX_INDIVIDUAL_PROGRESS_BARS: usize = 5;
/// How many iterations between loss readout refreshes
pub const PROGRESS_LOSS_INTERVAL: usize = 10;

// Output settings
/// Suffix added to output filenames
pub const OUTPUT_SUFFIX: &str = "_styled";
