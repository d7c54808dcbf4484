//! Bundled convolutional backbone with cached forward and reverse passes
//!
//! A fixed stack of 3x3 same-padded convolutions, ReLU activations, and 2x2
//! average pooling. Weights are deterministic for a given seed and never
//! change; a pretrained backbone can replace this one through the
//! [`FeatureExtractor`] trait without touching the optimization core. Average
//! pooling is used instead of max pooling so the backward pass needs no argmax
//! cache.

use crate::io::error::{Result, computation_error, invalid_parameter, shape_mismatch};
use crate::network::extractor::{FeatureExtractor, LayerId, validate_layers};
use ndarray::{Array1, Array4, s};
use rand::{Rng, SeedableRng, rngs::StdRng};

/// One operation in the backbone's layer stack
#[derive(Debug, Clone)]
pub enum LayerOp {
    /// 3x3 convolution with same padding, fixed weights `[kh, kw, cin, cout]`
    Conv {
        /// Kernel weights, shape `[kh, kw, cin, cout]`
        weights: Array4<f32>,
        /// Per-output-channel bias
        bias: Array1<f32>,
    },
    /// Rectified linear activation
    Relu,
    /// 2x2 average pooling with stride 2
    Pool,
}

impl LayerOp {
    /// Apply the operation to an input activation
    fn forward(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        match self {
            Self::Conv { weights, bias } => conv_forward(input, weights, bias),
            Self::Relu => Ok(input.mapv(|x| x.max(0.0))),
            Self::Pool => pool_forward(input),
        }
    }

    /// Pull a cotangent back through the operation
    ///
    /// `input` is the activation the operation consumed on the forward pass.
    fn backward(&self, input: &Array4<f32>, cotangent: &Array4<f32>) -> Result<Array4<f32>> {
        match self {
            Self::Conv { weights, .. } => conv_backward(input, weights, cotangent),
            Self::Relu => {
                let mut grad = cotangent.clone();
                ndarray::Zip::from(&mut grad).and(input).for_each(|g, &x| {
                    if x <= 0.0 {
                        *g = 0.0;
                    }
                });
                Ok(grad)
            }
            Self::Pool => pool_backward(input, cotangent),
        }
    }
}

// Zero-pad the spatial axes by (pad_h, pad_w) on each side
fn pad_spatial(input: &Array4<f32>, pad_h: usize, pad_w: usize) -> Array4<f32> {
    let (b, h, w, c) = input.dim();
    let mut padded = Array4::<f32>::zeros((b, h + 2 * pad_h, w + 2 * pad_w, c));
    padded
        .slice_mut(s![.., pad_h..pad_h + h, pad_w..pad_w + w, ..])
        .assign(input);
    padded
}

// Same-padded cross-correlation expressed as shifted-window matrix products:
// each kernel offset contributes window[N, cin] x kernel[cin, cout]
fn conv_forward(input: &Array4<f32>, weights: &Array4<f32>, bias: &Array1<f32>) -> Result<Array4<f32>> {
    let (b, h, w, cin) = input.dim();
    let (kh, kw, wcin, cout) = weights.dim();
    if wcin != cin {
        return Err(shape_mismatch("convolution input", weights.shape(), input.shape()));
    }
    let padded = pad_spatial(input, kh / 2, kw / 2);
    let mut output = Array4::<f32>::zeros((b, h, w, cout));
    output += bias;
    for ky in 0..kh {
        for kx in 0..kw {
            let window = padded.slice(s![.., ky..ky + h, kx..kx + w, ..]).to_owned();
            let flat = window
                .into_shape_with_order((b * h * w, cin))
                .map_err(|err| computation_error("convolution", &err))?;
            let contribution = flat.dot(&weights.slice(s![ky, kx, .., ..]));
            output += &contribution
                .into_shape_with_order((b, h, w, cout))
                .map_err(|err| computation_error("convolution", &err))?;
        }
    }
    Ok(output)
}

// Gradient with respect to the convolution input: transposed correlation,
// accumulated into a padded buffer then cropped back to the input extent
fn conv_backward(
    input: &Array4<f32>,
    weights: &Array4<f32>,
    cotangent: &Array4<f32>,
) -> Result<Array4<f32>> {
    let (b, h, w, cin) = input.dim();
    let (kh, kw, _, cout) = weights.dim();
    let expected = [b, h, w, cout];
    if cotangent.shape() != expected {
        return Err(shape_mismatch("convolution backward", &expected, cotangent.shape()));
    }
    let flat_cotangent = cotangent
        .view()
        .into_shape_with_order((b * h * w, cout))
        .map_err(|err| computation_error("convolution backward", &err))?;
    let (pad_h, pad_w) = (kh / 2, kw / 2);
    let mut padded_grad = Array4::<f32>::zeros((b, h + 2 * pad_h, w + 2 * pad_w, cin));
    for ky in 0..kh {
        for kx in 0..kw {
            let contribution = flat_cotangent
                .dot(&weights.slice(s![ky, kx, .., ..]).t())
                .into_shape_with_order((b, h, w, cin))
                .map_err(|err| computation_error("convolution backward", &err))?;
            let mut region = padded_grad.slice_mut(s![.., ky..ky + h, kx..kx + w, ..]);
            region += &contribution;
        }
    }
    Ok(padded_grad
        .slice(s![.., pad_h..pad_h + h, pad_w..pad_w + w, ..])
        .to_owned())
}

fn pool_forward(input: &Array4<f32>) -> Result<Array4<f32>> {
    let (b, h, w, c) = input.dim();
    let (ho, wo) = (h / 2, w / 2);
    if ho == 0 || wo == 0 {
        return Err(computation_error(
            "average pool",
            &format!("spatial extent {h}x{w} is too small to pool"),
        ));
    }
    let mut output = Array4::<f32>::zeros((b, ho, wo, c));
    for oy in 0..2 {
        for ox in 0..2 {
            output.scaled_add(
                0.25,
                &input.slice(s![.., oy..oy + 2 * ho - 1;2, ox..ox + 2 * wo - 1;2, ..]),
            );
        }
    }
    Ok(output)
}

// Each pooled cell redistributes a quarter of its gradient to the four
// source cells; rows/columns dropped by flooring receive zero
fn pool_backward(input: &Array4<f32>, cotangent: &Array4<f32>) -> Result<Array4<f32>> {
    let (b, h, w, c) = input.dim();
    let (ho, wo) = (h / 2, w / 2);
    let expected = [b, ho, wo, c];
    if cotangent.shape() != expected {
        return Err(shape_mismatch("pool backward", &expected, cotangent.shape()));
    }
    let mut grad = Array4::<f32>::zeros((b, h, w, c));
    for oy in 0..2 {
        for ox in 0..2 {
            grad.slice_mut(s![.., oy..oy + 2 * ho - 1;2, ox..ox + 2 * wo - 1;2, ..])
                .scaled_add(0.25, cotangent);
        }
    }
    Ok(grad)
}

/// Fixed convolutional feature extractor
///
/// Layer indices address the output of each operation in the stack, so
/// configuration can pick activations at any depth.
#[derive(Debug, Clone)]
pub struct ConvNet {
    ops: Vec<LayerOp>,
}

/// Forward-pass record for [`ConvNet`]: the input plus every computed
/// activation, kept so the backward pass can replay the stack in reverse
#[derive(Debug)]
pub struct ConvPass {
    input: Array4<f32>,
    activations: Vec<Array4<f32>>,
    requested: Vec<LayerId>,
    maps: Vec<Array4<f32>>,
}

impl ConvNet {
    /// Build the backbone with deterministic seeded weights
    ///
    /// The stack follows a slim VGG-style plan: two convolution blocks per
    /// resolution, average pooling between resolutions, 19 addressable layers.
    pub fn seeded(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut ops = Vec::with_capacity(19);
        for (cin, cout, pool_after) in [
            (3, 8, false),
            (8, 8, true),
            (8, 16, false),
            (16, 16, true),
            (16, 32, false),
            (32, 32, false),
            (32, 32, true),
            (32, 64, false),
        ] {
            ops.push(LayerOp::Conv {
                weights: seeded_kernel(&mut rng, 3, 3, cin, cout),
                bias: Array1::zeros(cout),
            });
            ops.push(LayerOp::Relu);
            if pool_after {
                ops.push(LayerOp::Pool);
            }
        }
        Self { ops }
    }

    /// Build a backbone from an explicit operation stack
    ///
    /// The injection point for externally supplied (pretrained) weights.
    pub fn from_ops(ops: Vec<LayerOp>) -> Self {
        Self { ops }
    }
}

fn seeded_kernel(rng: &mut StdRng, kh: usize, kw: usize, cin: usize, cout: usize) -> Array4<f32> {
    // He-style uniform bound keeps activation magnitudes stable with depth
    let bound = (2.0 / (kh * kw * cin) as f32).sqrt();
    Array4::from_shape_simple_fn((kh, kw, cin, cout), || rng.random_range(-bound..bound))
}

impl FeatureExtractor for ConvNet {
    type Pass = ConvPass;

    fn layer_count(&self) -> usize {
        self.ops.len()
    }

    fn forward(&self, image: &Array4<f32>, layers: &[LayerId]) -> Result<Self::Pass> {
        validate_layers(layers, self.layer_count())?;
        let deepest = layers.iter().map(|l| l.index()).max().unwrap_or(0);
        let mut activations: Vec<Array4<f32>> = Vec::with_capacity(deepest + 1);
        for op in self.ops.iter().take(deepest + 1) {
            let output = {
                let previous = activations.last().unwrap_or(image);
                op.forward(previous)?
            };
            activations.push(output);
        }
        let maps: Vec<Array4<f32>> = layers
            .iter()
            .filter_map(|l| activations.get(l.index()).cloned())
            .collect();
        Ok(ConvPass {
            input: image.clone(),
            activations,
            requested: layers.to_vec(),
            maps,
        })
    }

    fn maps<'a>(&self, pass: &'a Self::Pass) -> &'a [Array4<f32>] {
        &pass.maps
    }

    fn backward(&self, pass: &Self::Pass, cotangents: &[Array4<f32>]) -> Result<Array4<f32>> {
        if cotangents.len() != pass.requested.len() {
            return Err(invalid_parameter(
                "cotangents",
                &cotangents.len(),
                &format!("forward pass recorded {} layers", pass.requested.len()),
            ));
        }
        let Some(deepest_activation) = pass.activations.last() else {
            return Err(invalid_parameter(
                "pass",
                &"empty",
                &"forward pass recorded no activations",
            ));
        };
        let mut grad = Array4::<f32>::zeros(deepest_activation.dim());
        for index in (0..pass.activations.len()).rev() {
            for (requested, cotangent) in pass.requested.iter().zip(cotangents) {
                if requested.index() == index {
                    if cotangent.shape() != grad.shape() {
                        return Err(shape_mismatch(
                            "backward cotangent",
                            grad.shape(),
                            cotangent.shape(),
                        ));
                    }
                    grad += cotangent;
                }
            }
            let consumed = if index == 0 {
                &pass.input
            } else {
                pass.activations.get(index - 1).ok_or_else(|| {
                    computation_error("backbone backward", &"activation cache out of range")
                })?
            };
            let op = self
                .ops
                .get(index)
                .ok_or_else(|| computation_error("backbone backward", &"operation out of range"))?;
            grad = op.backward(consumed, &grad)?;
        }
        Ok(grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_image(h: usize, w: usize) -> Array4<f32> {
        Array4::from_shape_simple_fn((1, h, w, 3), {
            let mut counter = 0.0_f32;
            move || {
                counter += 0.37;
                counter.sin().abs()
            }
        })
    }

    #[test]
    fn test_forward_shapes_follow_the_plan() {
        let net = ConvNet::seeded(7);
        let image = toy_image(16, 12);
        let pass = net
            .forward(&image, &[LayerId(2), LayerId(5), LayerId(18)])
            .unwrap_or_else(|e| unreachable!("forward failed: {e}"));
        let maps = net.maps(&pass);
        // Layer 2: pre-pool 8-channel conv at full resolution
        assert_eq!(maps.first().map(|m| m.dim()), Some((1, 16, 12, 8)));
        // Layer 5: first conv after one pool
        assert_eq!(maps.get(1).map(|m| m.dim()), Some((1, 8, 6, 16)));
        // Layer 18: deepest relu after three pools
        assert_eq!(maps.get(2).map(|m| m.dim()), Some((1, 2, 1, 64)));
    }

    #[test]
    fn test_forward_is_deterministic_for_fixed_seed() {
        let image = toy_image(8, 8);
        let a = ConvNet::seeded(123);
        let b = ConvNet::seeded(123);
        let pass_a = a
            .forward(&image, &[LayerId(4)])
            .unwrap_or_else(|e| unreachable!("forward failed: {e}"));
        let pass_b = b
            .forward(&image, &[LayerId(4)])
            .unwrap_or_else(|e| unreachable!("forward failed: {e}"));
        assert_eq!(a.maps(&pass_a), b.maps(&pass_b));
    }

    // Finite-difference check of the backward pass through conv/relu/pool
    #[test]
    fn test_backward_matches_finite_differences() {
        let net = ConvNet::seeded(99);
        let image = toy_image(6, 6);
        let layers = [LayerId(4)];

        // Loss = sum of the requested activation, so the cotangent is ones
        let pass = net
            .forward(&image, &layers)
            .unwrap_or_else(|e| unreachable!("forward failed: {e}"));
        let shape = net
            .maps(&pass)
            .first()
            .map(|m| m.dim())
            .unwrap_or((0, 0, 0, 0));
        let grad = net
            .backward(&pass, &[Array4::ones(shape)])
            .unwrap_or_else(|e| unreachable!("backward failed: {e}"));

        let loss_of = |img: &Array4<f32>| -> f32 {
            let p = net
                .forward(img, &layers)
                .unwrap_or_else(|e| unreachable!("forward failed: {e}"));
            net.maps(&p).iter().map(|m| m.sum()).sum()
        };

        let epsilon = 1e-3;
        for probe in [(0, 1, 1, 0), (0, 3, 2, 1), (0, 5, 0, 2)] {
            let mut bumped = image.clone();
            if let Some(cell) = bumped.get_mut([probe.0, probe.1, probe.2, probe.3]) {
                *cell += epsilon;
            }
            let numeric = (loss_of(&bumped) - loss_of(&image)) / epsilon;
            let analytic = grad
                .get([probe.0, probe.1, probe.2, probe.3])
                .copied()
                .unwrap_or(f32::NAN);
            assert!(
                (numeric - analytic).abs() < 0.05 * analytic.abs().max(1.0),
                "finite difference {numeric} vs analytic {analytic} at {probe:?}"
            );
        }
    }

    #[test]
    fn test_pool_too_small_is_an_error() {
        let net = ConvNet::seeded(1);
        let image = toy_image(1, 1);
        // Layer 4 is the first pool; a 1x1 image cannot reach it
        assert!(net.forward(&image, &[LayerId(4)]).is_err());
    }
}
