use std::io::{BufRead, Write};

use log::debug;
use ndarray::{Array2, ArrayView2};
use rand::Rng;

use super::{AffineTransform, Sigmoid};
use crate::{
    LayerErr, Result,
    codec::{TokenReader, TokenWriter},
    config::{AffineConfig, next_value},
    optimization::{TrainOptions, UpdateRule},
};

const INPUT_DIM_TAG: &str = "<InputDim>";
const OUTPUT_DIM_TAG: &str = "<OutputDim>";

/// The tag identifying each layer variant, both in streams and in errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    AffineTransform,
    Sigmoid,
}

impl LayerKind {
    /// Every known layer kind.
    pub const ALL: [LayerKind; 2] = [LayerKind::AffineTransform, LayerKind::Sigmoid];

    /// Returns the stream tag of this kind.
    pub fn token(&self) -> &'static str {
        match self {
            LayerKind::AffineTransform => "<AffineTransform>",
            LayerKind::Sigmoid => "<Sigmoid>",
        }
    }

    /// Maps a stream tag back to its kind.
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.token() == token)
    }

    pub fn is_trainable(&self) -> bool {
        matches!(self, LayerKind::AffineTransform)
    }
}

/// The closed set of layers, all of them share the same capabilities.
#[derive(Debug, Clone)]
pub enum Layer {
    Affine(AffineTransform),
    Sigmoid(Sigmoid),
}

impl Layer {
    pub fn affine(input_dim: usize, output_dim: usize) -> Self {
        Self::Affine(AffineTransform::new(input_dim, output_dim))
    }

    pub fn sigmoid(dim: usize) -> Self {
        Self::Sigmoid(Sigmoid::new(dim))
    }

    /// Creates a new layer of the given kind with default state.
    ///
    /// # Arguments
    /// * `kind` - The layer variant.
    /// * `input_dim` - The size of each input row.
    /// * `output_dim` - The size of each output row.
    ///
    /// # Returns
    /// An error if the dimensions are invalid for the kind.
    pub fn new(kind: LayerKind, input_dim: usize, output_dim: usize) -> Result<Self> {
        match kind {
            LayerKind::AffineTransform => Ok(Self::affine(input_dim, output_dim)),
            LayerKind::Sigmoid if input_dim == output_dim => Ok(Self::sigmoid(input_dim)),
            LayerKind::Sigmoid => Err(LayerErr::ShapeMismatch {
                what: "sigmoid dims",
                got: (output_dim, input_dim),
                expected: (input_dim, input_dim),
            }),
        }
    }

    /// Builds and initializes a layer from a prototype line.
    ///
    /// The line starts with the layer tag, carries `<InputDim>` and
    /// `<OutputDim>` and any option of the layer kind, e.g.
    /// `<AffineTransform> <InputDim> 3 <OutputDim> 2 <ParamRange> 0.1`.
    ///
    /// # Arguments
    /// * `proto` - The prototype line.
    /// * `rng` - A random number generator used for the initial parameters.
    pub fn init<R: Rng>(proto: &str, rng: &mut R) -> Result<Self> {
        let mut words = proto.split_whitespace();
        let Some(token) = words.next() else {
            return Err(LayerErr::InvalidConfig("empty layer prototype".to_string()));
        };

        let kind = LayerKind::from_token(token)
            .ok_or_else(|| LayerErr::UnknownLayer(token.to_string()))?;

        let mut input_dim = None;
        let mut output_dim = None;
        let mut options = Vec::new();
        while let Some(word) = words.next() {
            match word {
                INPUT_DIM_TAG => input_dim = Some(next_value(&mut words, word)?),
                OUTPUT_DIM_TAG => output_dim = Some(next_value(&mut words, word)?),
                _ => options.push(word),
            }
        }

        let (Some(input_dim), Some(output_dim)) = (input_dim, output_dim) else {
            return Err(LayerErr::InvalidConfig(format!(
                "{token} prototype needs both {INPUT_DIM_TAG} and {OUTPUT_DIM_TAG}"
            )));
        };

        let mut layer = Self::new(kind, input_dim, output_dim)?;
        match &mut layer {
            Layer::Affine(l) => l.init(&AffineConfig::parse(&options.join(" "))?, rng)?,
            Layer::Sigmoid(_) => {
                if let Some(token) = options.first() {
                    return Err(LayerErr::Config {
                        token: token.to_string(),
                        accepted: "InputDim|OutputDim",
                    });
                }
            }
        }

        Ok(layer)
    }

    pub fn kind(&self) -> LayerKind {
        match self {
            Layer::Affine(_) => LayerKind::AffineTransform,
            Layer::Sigmoid(_) => LayerKind::Sigmoid,
        }
    }

    pub fn input_dim(&self) -> usize {
        match self {
            Layer::Affine(l) => l.input_dim(),
            Layer::Sigmoid(l) => l.dim(),
        }
    }

    pub fn output_dim(&self) -> usize {
        match self {
            Layer::Affine(l) => l.output_dim(),
            Layer::Sigmoid(l) => l.dim(),
        }
    }

    pub fn num_params(&self) -> usize {
        match self {
            Layer::Affine(l) => l.num_params(),
            Layer::Sigmoid(_) => 0,
        }
    }

    pub fn as_affine(&self) -> Option<&AffineTransform> {
        match self {
            Layer::Affine(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_affine_mut(&mut self) -> Option<&mut AffineTransform> {
        match self {
            Layer::Affine(l) => Some(l),
            _ => None,
        }
    }

    pub fn forward(&self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        match self {
            Layer::Affine(l) => l.forward(x),
            Layer::Sigmoid(l) => l.forward(x),
        }
    }

    /// Propagates the output derivative `d` back to the input, trainable
    /// layers also accumulate their parameter gradient.
    pub fn backward(
        &mut self,
        x: ArrayView2<f32>,
        y: ArrayView2<f32>,
        d: ArrayView2<f32>,
        opts: &TrainOptions,
    ) -> Result<Array2<f32>> {
        match self {
            Layer::Affine(l) => l.backward(x, y, d, opts),
            Layer::Sigmoid(l) => l.backward(y, d),
        }
    }

    /// Applies the accumulated gradient, a no-op for layers without parameters.
    pub fn update(&mut self, opts: &TrainOptions, rule: UpdateRule) -> Result<()> {
        match self {
            Layer::Affine(l) => l.update(opts, rule),
            Layer::Sigmoid(_) => Ok(()),
        }
    }

    /// Adds `scale` times the parameters of `other` to this layer.
    ///
    /// # Returns
    /// A `LayerErr::TypeMismatch` error if `other` is a different kind of layer.
    pub fn merge_from(&mut self, other: &Layer, scale: f32) -> Result<()> {
        match (self, other) {
            (Layer::Affine(l), Layer::Affine(o)) => l.merge_from(o, scale),
            (Layer::Sigmoid(_), Layer::Sigmoid(_)) => Ok(()),
            (this, other) => Err(LayerErr::TypeMismatch {
                expected: this.kind(),
                got: other.kind(),
            }),
        }
    }

    pub fn scale(&mut self, scale: f32) {
        if let Layer::Affine(l) = self {
            l.scale(scale);
        }
    }

    /// Writes the layer tag, its dimensions and its data.
    pub fn write<W: Write>(&self, w: &mut TokenWriter<W>) -> Result<()> {
        w.write_token(self.kind().token())?;
        w.write_dim(self.output_dim())?;
        w.write_dim(self.input_dim())?;
        w.write_newline()?;

        if let Layer::Affine(l) = self {
            l.write_data(w)?;
        }

        debug!(
            "wrote {} layer {}x{} (binary={})",
            self.kind().token(),
            self.output_dim(),
            self.input_dim(),
            w.is_binary()
        );
        Ok(())
    }

    /// Reads a layer written by `write`, the tag decides which variant is built.
    ///
    /// The dimensions in the stream are only trusted once the layer's tensors
    /// were read and agree with them.
    pub fn read<R: BufRead>(r: &mut TokenReader<R>) -> Result<Self> {
        let token = r.read_token()?;
        let kind = LayerKind::from_token(&token).ok_or(LayerErr::UnknownLayer(token))?;
        let output_dim = r.read_dim()?;
        let input_dim = r.read_dim()?;

        let layer = match kind {
            LayerKind::AffineTransform => {
                Layer::Affine(AffineTransform::read(r, input_dim, output_dim)?)
            }
            LayerKind::Sigmoid => Self::new(kind, input_dim, output_dim)?,
        };

        debug!(
            "read {} layer {}x{}",
            kind.token(),
            output_dim,
            input_dim
        );
        Ok(layer)
    }

    /// Summarizes the layer's parameters.
    pub fn info(&self) -> String {
        match self {
            Layer::Affine(l) => l.info(),
            Layer::Sigmoid(_) => String::new(),
        }
    }

    /// Summarizes the layer's gradients.
    pub fn info_gradient(&self) -> String {
        match self {
            Layer::Affine(l) => l.info_gradient(),
            Layer::Sigmoid(_) => String::new(),
        }
    }
}
