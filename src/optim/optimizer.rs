//! Optimizer trait

use ndarray::Array1;

/// Trait for optimization algorithms over flat parameter vectors
pub trait Optimizer {
    /// Perform a single optimization step.
    ///
    /// `grads[i]` is the gradient of `params[i]`; both slices have the same
    /// length and element shapes.
    fn step(&mut self, params: &mut [Array1<f32>], grads: &[Array1<f32>]);

    /// Get learning rate
    fn lr(&self) -> f32;

    /// Set learning rate
    fn set_lr(&mut self, lr: f32);

    /// Display name used when reporting learning rates
    fn name(&self) -> &'static str;
}
