use serde::Deserialize;

/// The hyperparameters a training loop hands to every backward and update call.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainOptions {
    /// The global learning rate, scaled per layer by its `learn_rate_coef`.
    pub learn_rate: f32,
    /// The momentum used when blending a new gradient into the accumulator.
    pub momentum: f32,
}

impl TrainOptions {
    /// Creates a new `TrainOptions`.
    ///
    /// # Arguments
    /// * `learn_rate` - The global learning rate.
    /// * `momentum` - The gradient momentum.
    pub fn new(learn_rate: f32, momentum: f32) -> Self {
        Self {
            learn_rate,
            momentum,
        }
    }
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self::new(0.008, 0.0)
    }
}
