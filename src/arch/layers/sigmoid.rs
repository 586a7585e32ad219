use ndarray::{Array2, ArrayView2};

use crate::{LayerErr, Result};

/// Elementwise logistic activation, it has no trainable parameters.
#[derive(Debug, Clone)]
pub struct Sigmoid {
    dim: usize,
}

impl Sigmoid {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn forward(&self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_width("input", x.dim())?;
        Ok(x.mapv(|z| 1. / (1. + (-z).exp())))
    }

    /// Returns `d * y * (1 - y)`, where `y` is this layer's forward output.
    pub fn backward(&self, y: ArrayView2<f32>, d: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_width("output derivative", d.dim())?;
        if y.dim() != d.dim() {
            return Err(LayerErr::ShapeMismatch {
                what: "output",
                got: y.dim(),
                expected: d.dim(),
            });
        }

        let mut dx = d.to_owned();
        dx.zip_mut_with(&y, |d, &a| *d *= a * (1. - a));
        Ok(dx)
    }

    fn check_width(&self, what: &'static str, got: (usize, usize)) -> Result<()> {
        if got.1 != self.dim {
            return Err(LayerErr::ShapeMismatch {
                what,
                got,
                expected: (got.0, self.dim),
            });
        }

        Ok(())
    }
}
