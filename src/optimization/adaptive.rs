use ndarray::{Array1, Array2, Zip};

use super::UpdateRule;

/// Added to the squared-gradient accumulator before taking its square root.
///
/// Changing it between two runs that share a checkpoint changes the resumed
/// trajectory.
pub const ADAPTIVE_EPSILON: f32 = 1e-10;

/// Decay of the squared-gradient average used by `UpdateRule::RmsProp`.
pub const RMSPROP_DECAY: f32 = 0.9;

/// Squared-gradient accumulators and their derived scale buffers for a weight
/// matrix and its bias vector.
///
/// An affine layer holds this as `Option<AdaptiveState>`: `None` until the
/// first adaptive update (or until a checkpoint carrying accumulators is read),
/// `Some` for the rest of the layer's life.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveState {
    weight_accu: Array2<f32>,
    bias_accu: Array1<f32>,
    weight_scale: Array2<f32>,
    bias_scale: Array1<f32>,
}

impl AdaptiveState {
    /// Creates a new zeroed `AdaptiveState`.
    ///
    /// # Arguments
    /// * `output_dim` - Rows of the weight matrix and length of the bias.
    /// * `input_dim` - Columns of the weight matrix.
    pub fn zeros(output_dim: usize, input_dim: usize) -> Self {
        Self {
            weight_accu: Array2::zeros((output_dim, input_dim)),
            bias_accu: Array1::zeros(output_dim),
            weight_scale: Array2::zeros((output_dim, input_dim)),
            bias_scale: Array1::zeros(output_dim),
        }
    }

    /// Creates an `AdaptiveState` from previously persisted accumulators, the
    /// scale buffers start zeroed and are recomputed on the next step.
    pub fn from_accumulators(weight_accu: Array2<f32>, bias_accu: Array1<f32>) -> Self {
        let weight_scale = Array2::zeros(weight_accu.raw_dim());
        let bias_scale = Array1::zeros(bias_accu.raw_dim());

        Self {
            weight_accu,
            bias_accu,
            weight_scale,
            bias_scale,
        }
    }

    pub fn weight_accu(&self) -> &Array2<f32> {
        &self.weight_accu
    }

    pub fn bias_accu(&self) -> &Array1<f32> {
        &self.bias_accu
    }

    pub fn weight_scale(&self) -> &Array2<f32> {
        &self.weight_scale
    }

    pub fn bias_scale(&self) -> &Array1<f32> {
        &self.bias_scale
    }

    /// Makes one adaptive step over the given parameters.
    ///
    /// For every element: the accumulator absorbs the squared gradient
    /// according to `rule`, the scale is recomputed from the updated
    /// accumulator as `1 / sqrt(accu + ADAPTIVE_EPSILON)` and the parameter
    /// moves by `-learn_rate * scale * grad`.
    ///
    /// # Arguments
    /// * `rule` - An adaptive update rule, `UpdateRule::Sgd` leaves everything untouched.
    /// * `learn_rate` - The effective learning rate.
    /// * `weight` - The weight matrix to update.
    /// * `bias` - The bias vector to update.
    /// * `weight_grad` - The accumulated weight gradient.
    /// * `bias_grad` - The accumulated bias gradient.
    pub fn step(
        &mut self,
        rule: UpdateRule,
        learn_rate: f32,
        weight: &mut Array2<f32>,
        bias: &mut Array1<f32>,
        weight_grad: &Array2<f32>,
        bias_grad: &Array1<f32>,
    ) {
        if !rule.is_adaptive() {
            return;
        }

        Zip::from(&mut self.weight_accu)
            .and(&mut self.weight_scale)
            .and(weight)
            .and(weight_grad)
            .par_for_each(|accu, scale, w, &g| {
                *accu = accumulate(rule, *accu, g);
                *scale = inv_sqrt(*accu);
                *w -= learn_rate * *scale * g;
            });

        Zip::from(&mut self.bias_accu)
            .and(&mut self.bias_scale)
            .and(bias)
            .and(bias_grad)
            .for_each(|accu, scale, b, &g| {
                *accu = accumulate(rule, *accu, g);
                *scale = inv_sqrt(*accu);
                *b -= learn_rate * *scale * g;
            });
    }
}

fn accumulate(rule: UpdateRule, accu: f32, grad: f32) -> f32 {
    match rule {
        UpdateRule::Sgd => accu,
        UpdateRule::AdaGrad => accu + grad * grad,
        UpdateRule::RmsProp => RMSPROP_DECAY * accu + (1. - RMSPROP_DECAY) * grad * grad,
    }
}

fn inv_sqrt(accu: f32) -> f32 {
    1. / (accu + ADAPTIVE_EPSILON).sqrt()
}
