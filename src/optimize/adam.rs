//! Adaptive gradient descent on the canvas tensor
//!
//! Adam with bias correction and a fixed learning rate. The moment
//! accumulators are owned by exactly one optimization run and zeroed when it
//! starts; they are never shared between frames.

use crate::io::configuration::{ADAM_BETA1, ADAM_BETA2, ADAM_EPSILON};
use ndarray::{Array4, Zip};

/// Adam optimizer state for a single canvas
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    first_moment: Array4<f32>,
    second_moment: Array4<f32>,
    timestep: u32,
}

impl Adam {
    /// Create zeroed optimizer state for a canvas of the given shape
    pub fn new(learning_rate: f32, shape: (usize, usize, usize, usize)) -> Self {
        Self {
            learning_rate,
            beta1: ADAM_BETA1,
            beta2: ADAM_BETA2,
            epsilon: ADAM_EPSILON,
            first_moment: Array4::zeros(shape),
            second_moment: Array4::zeros(shape),
            timestep: 0,
        }
    }

    /// Number of steps taken so far
    pub const fn timestep(&self) -> u32 {
        self.timestep
    }

    /// Apply one descent step to the canvas in place
    ///
    /// Updates the exponential moving averages of the gradient and its
    /// square, then moves the canvas along the bias-corrected direction.
    pub fn step(&mut self, canvas: &mut Array4<f32>, gradient: &Array4<f32>) {
        self.timestep += 1;
        let correction1 = 1.0 - self.beta1.powi(self.timestep as i32);
        let correction2 = 1.0 - self.beta2.powi(self.timestep as i32);
        let step_size = self.learning_rate * correction2.sqrt() / correction1;
        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);
        Zip::from(canvas)
            .and(&mut self.first_moment)
            .and(&mut self.second_moment)
            .and(gradient)
            .for_each(|value, first, second, &grad| {
                *first = beta1.mul_add(*first, (1.0 - beta1) * grad);
                *second = beta2.mul_add(*second, (1.0 - beta2) * grad * grad);
                *value -= step_size * *first / (second.sqrt() + epsilon);
            });
    }
}
