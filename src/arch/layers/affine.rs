use std::io::{BufRead, Write};

use log::{debug, trace};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, linalg};
use ndarray_rand::RandomExt;
use rand::Rng;
use rand_distr::Uniform;

use crate::{
    LayerErr, Result,
    codec::{TokenReader, TokenWriter},
    config::AffineConfig,
    diagnostics::Moments,
    error::check_dim,
    optimization::{AdaptiveState, TrainOptions, UpdateRule},
};

const LEARN_RATE_COEF_TAG: &str = "<LearnRateCoef>";
const MAX_GRAD_TAG: &str = "<MaxGrad>";
const ACCUMULATORS_TAG: &str = "<AffineAccus>";

/// A fully connected layer computing `y = x · Wᵗ + b` over a batch of rows.
///
/// The weight matrix has shape `(output_dim, input_dim)` and the bias has
/// `output_dim` entries. Besides the parameters, the layer owns:
/// * the momentum blended gradient of the last backward pass,
/// * the adaptive optimizer state, created lazily by the first adaptive update.
#[derive(Debug, Clone)]
pub struct AffineTransform {
    input_dim: usize,
    output_dim: usize,

    weight: Array2<f32>,
    bias: Array1<f32>,

    // Backward metadata
    weight_grad: Array2<f32>,
    bias_grad: Array1<f32>,

    adaptive: Option<AdaptiveState>,

    learn_rate_coef: f32,
    max_grad: f32,
}

impl AffineTransform {
    /// Creates a new `AffineTransform` with zeroed parameters.
    ///
    /// # Arguments
    /// * `input_dim` - The size of each input row.
    /// * `output_dim` - The size of each output row.
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        let dim = (output_dim, input_dim);

        Self {
            input_dim,
            output_dim,
            weight: Array2::zeros(dim),
            bias: Array1::zeros(output_dim),
            weight_grad: Array2::zeros(dim),
            bias_grad: Array1::zeros(output_dim),
            adaptive: None,
            learn_rate_coef: 1.0,
            max_grad: 0.0,
        }
    }

    /// Applies `config` and draws the parameters from `[-param_range, param_range]`.
    ///
    /// # Arguments
    /// * `config` - The initialization options.
    /// * `rng` - A random number generator.
    pub fn init<R: Rng>(&mut self, config: &AffineConfig, rng: &mut R) -> Result<()> {
        self.initialize(config.param_range, rng)?;
        self.learn_rate_coef = config.learn_rate_coef;
        self.max_grad = config.max_grad;

        debug!(
            "initialized affine transform {}x{}: param_range={} learn_rate_coef={} max_grad={}",
            self.output_dim,
            self.input_dim,
            config.param_range,
            config.learn_rate_coef,
            config.max_grad
        );
        Ok(())
    }

    /// Fills the weight and bias uniformly from `[-param_range, param_range]`.
    pub fn initialize<R: Rng>(&mut self, param_range: f32, rng: &mut R) -> Result<()> {
        let distribution = Uniform::new_inclusive(-param_range, param_range).map_err(|e| {
            LayerErr::InvalidConfig(format!("invalid parameter range {param_range}: {e}"))
        })?;

        self.weight = Array2::random_using(self.weight.raw_dim(), &distribution, rng);
        self.bias = Array1::random_using(self.output_dim, &distribution, rng);
        Ok(())
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    /// Returns the amount of trainable parameters, `output_dim * input_dim + output_dim`.
    pub fn num_params(&self) -> usize {
        self.weight.len() + self.bias.len()
    }

    /// Returns every parameter in a single vector, the row-major weight first
    /// and the bias after it.
    pub fn params(&self) -> Vec<f32> {
        let mut params = Vec::with_capacity(self.num_params());
        params.extend(self.weight.iter().copied());
        params.extend(self.bias.iter().copied());
        params
    }

    /// Overwrites every parameter from a vector laid out as in `params`.
    pub fn set_params(&mut self, params: &[f32]) -> Result<()> {
        if params.len() != self.num_params() {
            return Err(LayerErr::ShapeMismatch {
                what: "params",
                got: (params.len(), 1),
                expected: (self.num_params(), 1),
            });
        }

        let (w, b) = params.split_at(self.weight.len());
        self.weight.iter_mut().zip(w).for_each(|(dst, &src)| *dst = src);
        self.bias.iter_mut().zip(b).for_each(|(dst, &src)| *dst = src);
        Ok(())
    }

    pub fn weight(&self) -> ArrayView2<'_, f32> {
        self.weight.view()
    }

    pub fn bias(&self) -> ArrayView1<'_, f32> {
        self.bias.view()
    }

    pub fn weight_grad(&self) -> ArrayView2<'_, f32> {
        self.weight_grad.view()
    }

    pub fn bias_grad(&self) -> ArrayView1<'_, f32> {
        self.bias_grad.view()
    }

    pub fn set_weight(&mut self, weight: ArrayView2<f32>) -> Result<()> {
        check_dim("weight", weight.dim(), self.weight.dim())?;
        self.weight.assign(&weight);
        Ok(())
    }

    pub fn set_bias(&mut self, bias: ArrayView1<f32>) -> Result<()> {
        check_dim("bias", (bias.len(), 1), (self.output_dim, 1))?;
        self.bias.assign(&bias);
        Ok(())
    }

    pub fn learn_rate_coef(&self) -> f32 {
        self.learn_rate_coef
    }

    pub fn set_learn_rate_coef(&mut self, learn_rate_coef: f32) {
        self.learn_rate_coef = learn_rate_coef;
    }

    pub fn max_grad(&self) -> f32 {
        self.max_grad
    }

    pub fn set_max_grad(&mut self, max_grad: f32) {
        self.max_grad = max_grad;
    }

    /// Returns the adaptive optimizer state if it was already created.
    pub fn adaptive(&self) -> Option<&AdaptiveState> {
        self.adaptive.as_ref()
    }

    pub fn is_adaptive_initialized(&self) -> bool {
        self.adaptive.is_some()
    }

    /// Adds `scale` times the parameters of `other` to this layer's parameters.
    ///
    /// # Arguments
    /// * `other` - A layer with the same dimensions.
    /// * `scale` - The factor applied to `other`'s parameters.
    pub fn merge_from(&mut self, other: &AffineTransform, scale: f32) -> Result<()> {
        check_dim("merged weight", other.weight.dim(), self.weight.dim())?;
        self.weight.scaled_add(scale, &other.weight);
        self.bias.scaled_add(scale, &other.bias);
        Ok(())
    }

    /// Multiplies the weight and bias by `scale` in place.
    pub fn scale(&mut self, scale: f32) {
        self.weight *= scale;
        self.bias *= scale;
    }

    /// Computes `bias + x · weightᵗ` for every row of `x`.
    ///
    /// # Arguments
    /// * `x` - The input batch, one sample per row.
    ///
    /// # Returns
    /// The output batch with `output_dim` columns.
    pub fn forward(&self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        check_dim("input", x.dim(), (x.nrows(), self.input_dim))?;

        let mut y = Array2::zeros((x.nrows(), self.output_dim));
        y += &self.bias;
        linalg::general_mat_mul(1.0, &x, &self.weight.t(), 1.0, &mut y);

        ensure_finite("forward output", y.iter())?;
        Ok(y)
    }

    /// Propagates `d` back through the layer and accumulates the parameter gradient.
    ///
    /// The gradient accumulators become `momentum * previous + dᵗ · x` (and the
    /// column sums of `d` for the bias), then they are clipped into
    /// `[-max_grad, max_grad]` when `max_grad > 0`.
    ///
    /// # Arguments
    /// * `x` - The input batch given to `forward`.
    /// * `_y` - The output of `forward`, unused by this layer.
    /// * `d` - The error derivative with respect to the output.
    /// * `opts` - The training options providing the momentum.
    ///
    /// # Returns
    /// The error derivative with respect to the input, `d · weight`.
    pub fn backward(
        &mut self,
        x: ArrayView2<f32>,
        _y: ArrayView2<f32>,
        d: ArrayView2<f32>,
        opts: &TrainOptions,
    ) -> Result<Array2<f32>> {
        check_dim("input", x.dim(), (x.nrows(), self.input_dim))?;
        check_dim("output derivative", d.dim(), (x.nrows(), self.output_dim))?;

        let dx = d.dot(&self.weight);

        let mmt = opts.momentum;
        linalg::general_mat_mul(1.0, &d.t(), &x, mmt, &mut self.weight_grad);
        self.bias_grad *= mmt;
        self.bias_grad += &d.sum_axis(Axis(0));

        if self.max_grad > 0. {
            let g = self.max_grad;
            self.weight_grad.mapv_inplace(|v| v.clamp(-g, g));
            self.bias_grad.mapv_inplace(|v| v.clamp(-g, g));
        }

        Ok(dx)
    }

    /// Applies the accumulated gradient to the parameters.
    ///
    /// The step is computed on copies and committed only if every new
    /// parameter is finite, a `LayerErr::NonFinite` error leaves the layer
    /// (adaptive state included) as it was.
    ///
    /// # Arguments
    /// * `opts` - The training options providing the global learning rate.
    /// * `rule` - The update policy, adaptive policies create the adaptive
    ///            state on their first use.
    pub fn update(&mut self, opts: &TrainOptions, rule: UpdateRule) -> Result<()> {
        let lr = opts.learn_rate * self.learn_rate_coef;
        let mut weight = self.weight.clone();
        let mut bias = self.bias.clone();

        let adaptive = match rule {
            UpdateRule::Sgd => {
                weight.scaled_add(-lr, &self.weight_grad);
                bias.scaled_add(-lr, &self.bias_grad);
                None
            }
            UpdateRule::AdaGrad | UpdateRule::RmsProp => {
                let mut state = match &self.adaptive {
                    Some(state) => state.clone(),
                    None => {
                        debug!(
                            "allocating adaptive accumulators for {rule} ({}x{})",
                            self.output_dim, self.input_dim
                        );
                        AdaptiveState::zeros(self.output_dim, self.input_dim)
                    }
                };

                state.step(
                    rule,
                    lr,
                    &mut weight,
                    &mut bias,
                    &self.weight_grad,
                    &self.bias_grad,
                );
                Some(state)
            }
        };

        ensure_finite("weight", weight.iter())?;
        ensure_finite("bias", bias.iter())?;

        self.weight = weight;
        self.bias = bias;
        if adaptive.is_some() {
            self.adaptive = adaptive;
        }

        trace!("applied {rule} update with learn rate {lr}");
        Ok(())
    }

    /// Writes the layer's hyperparameters, optional accumulators and parameters.
    pub fn write_data<W: Write>(&self, w: &mut TokenWriter<W>) -> Result<()> {
        w.write_token(LEARN_RATE_COEF_TAG)?;
        w.write_f32(self.learn_rate_coef)?;
        w.write_token(MAX_GRAD_TAG)?;
        w.write_f32(self.max_grad)?;

        if let Some(state) = &self.adaptive {
            w.write_token(ACCUMULATORS_TAG)?;
            w.write_matrix(state.weight_accu().view())?;
            w.write_vector(state.bias_accu().view())?;
        }

        w.write_matrix(self.weight.view())?;
        w.write_vector(self.bias.view())
    }

    /// Reads a layer of the given dimensions from what `write_data` produced.
    ///
    /// Nothing is allocated for the layer until its tensors were read and
    /// matched the dimensions.
    pub fn read<R: BufRead>(
        r: &mut TokenReader<R>,
        input_dim: usize,
        output_dim: usize,
    ) -> Result<Self> {
        let stored = StoredState::read(r, (output_dim, input_dim))?;
        let mut layer = Self::new(input_dim, output_dim);
        layer.restore(stored);
        Ok(layer)
    }

    /// Reads what `write_data` produced.
    ///
    /// Every tagged field is optional: missing coefficients keep their default
    /// values and the adaptive state only exists if the stream carries it. The
    /// layer is left untouched if the stream is invalid or its tensors don't
    /// match the layer's dimensions.
    pub fn read_data<R: BufRead>(&mut self, r: &mut TokenReader<R>) -> Result<()> {
        let stored = StoredState::read(r, self.weight.dim())?;
        self.restore(stored);
        Ok(())
    }

    fn restore(&mut self, stored: StoredState) {
        self.learn_rate_coef = stored.learn_rate_coef;
        self.max_grad = stored.max_grad;
        self.adaptive = stored.adaptive;
        self.weight = stored.weight;
        self.bias = stored.bias;

        debug!(
            "read affine transform {}x{}: adaptive state {}",
            self.output_dim,
            self.input_dim,
            if self.adaptive.is_some() { "restored" } else { "absent" }
        );
    }

    /// Summarizes the parameters.
    pub fn info(&self) -> String {
        format!(
            "\n  weight{}\n  bias{}",
            Moments::of(&self.weight),
            Moments::of(&self.bias)
        )
    }

    /// Summarizes the gradient accumulators and, if present, the adaptive accumulators.
    pub fn info_gradient(&self) -> String {
        let mut info = format!(
            "\n  weight_grad{}\n  bias_grad{}",
            Moments::of(&self.weight_grad),
            Moments::of(&self.bias_grad)
        );

        if let Some(state) = &self.adaptive {
            info += &format!(
                "\n  weight_grad_accu{}\n  bias_grad_accu{}",
                Moments::of(state.weight_accu()),
                Moments::of(state.bias_accu())
            );
        }

        info
    }
}

/// Everything `write_data` persists, read ahead of committing it to a layer.
struct StoredState {
    learn_rate_coef: f32,
    max_grad: f32,
    adaptive: Option<AdaptiveState>,
    weight: Array2<f32>,
    bias: Array1<f32>,
}

impl StoredState {
    fn read<R: BufRead>(r: &mut TokenReader<R>, dim: (usize, usize)) -> Result<Self> {
        let mut learn_rate_coef = 1.0;
        let mut max_grad = 0.0;
        let mut adaptive = None;

        while r.next_is_tag()? {
            let tag = r.read_token()?;
            match tag.as_str() {
                LEARN_RATE_COEF_TAG => learn_rate_coef = r.read_f32()?,
                MAX_GRAD_TAG => max_grad = r.read_f32()?,
                ACCUMULATORS_TAG => {
                    let weight_accu = r.read_matrix_with_dim("weight accumulator", dim)?;
                    let bias_accu = r.read_vector_with_dim("bias accumulator", dim.0)?;
                    adaptive = Some(AdaptiveState::from_accumulators(weight_accu, bias_accu));
                }
                _ => {
                    return Err(LayerErr::UnexpectedToken {
                        expected: format!("{LEARN_RATE_COEF_TAG}|{MAX_GRAD_TAG}|{ACCUMULATORS_TAG}"),
                        got: tag,
                    });
                }
            }
        }

        Ok(Self {
            learn_rate_coef,
            max_grad,
            adaptive,
            weight: r.read_matrix_with_dim("weight", dim)?,
            bias: r.read_vector_with_dim("bias", dim.0)?,
        })
    }
}

fn ensure_finite<'a>(what: &'static str, mut values: impl Iterator<Item = &'a f32>) -> Result<()> {
    if values.all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(LayerErr::NonFinite { what })
    }
}
