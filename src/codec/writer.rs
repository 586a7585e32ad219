use std::io::Write;

use ndarray::{ArrayView1, ArrayView2};

use super::{BINARY_HEADER, MATRIX_TOKEN, VALUE_SIZE, VECTOR_TOKEN};
use crate::{LayerErr, Result};

/// The writing end of a token stream.
pub struct TokenWriter<W: Write> {
    inner: W,
    binary: bool,
}

impl<W: Write> TokenWriter<W> {
    /// Creates a new `TokenWriter`.
    ///
    /// # Arguments
    /// * `inner` - The underlying writer.
    /// * `binary` - Whether to use the binary encoding instead of text.
    pub fn new(inner: W, binary: bool) -> Self {
        Self { inner, binary }
    }

    pub fn is_binary(&self) -> bool {
        self.binary
    }

    /// Writes the stream header, only binary streams have one.
    pub fn write_header(&mut self) -> Result<()> {
        if self.binary {
            self.inner.write_all(BINARY_HEADER)?;
        }

        Ok(())
    }

    pub fn write_token(&mut self, token: &str) -> Result<()> {
        self.inner.write_all(token.as_bytes())?;
        self.inner.write_all(b" ")?;
        Ok(())
    }

    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        if self.binary {
            self.inner.write_all(&[VALUE_SIZE])?;
            self.inner.write_all(&value.to_ne_bytes())?;
        } else {
            write!(self.inner, "{value} ")?;
        }

        Ok(())
    }

    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        if self.binary {
            self.inner.write_all(&[VALUE_SIZE])?;
            self.inner.write_all(&value.to_ne_bytes())?;
        } else {
            write!(self.inner, "{value} ")?;
        }

        Ok(())
    }

    /// Writes a dimension, which must fit in an `i32`.
    pub fn write_dim(&mut self, dim: usize) -> Result<()> {
        let dim = i32::try_from(dim)
            .map_err(|_| LayerErr::Parse(format!("dimension {dim} does not fit in i32")))?;
        self.write_i32(dim)
    }

    /// Ends the current line of a text stream, binary streams are left as is.
    pub fn write_newline(&mut self) -> Result<()> {
        if !self.binary {
            self.inner.write_all(b"\n")?;
        }

        Ok(())
    }

    /// Writes a row-major matrix.
    ///
    /// # Arguments
    /// * `m` - The matrix to write.
    ///
    /// # Returns
    /// An error if the matrix dimensions don't fit in an `i32` or on io failure.
    pub fn write_matrix(&mut self, m: ArrayView2<f32>) -> Result<()> {
        let (rows, cols) = m.dim();

        if self.binary {
            self.write_token(MATRIX_TOKEN)?;
            self.write_dim(rows)?;
            self.write_dim(cols)?;
            return self.write_payload(m.iter().copied(), m.as_slice());
        }

        if m.is_empty() {
            self.inner.write_all(b" [ ]\n")?;
            return Ok(());
        }

        self.inner.write_all(b" [\n")?;
        for (i, row) in m.rows().into_iter().enumerate() {
            self.inner.write_all(b" ")?;
            for v in row {
                write!(self.inner, " {v}")?;
            }

            let end: &[u8] = if i + 1 == rows { b" ]\n" } else { b"\n" };
            self.inner.write_all(end)?;
        }

        Ok(())
    }

    pub fn write_vector(&mut self, v: ArrayView1<f32>) -> Result<()> {
        if self.binary {
            self.write_token(VECTOR_TOKEN)?;
            self.write_dim(v.len())?;
            return self.write_payload(v.iter().copied(), v.as_slice());
        }

        self.inner.write_all(b" [")?;
        for x in v {
            write!(self.inner, " {x}")?;
        }
        self.inner.write_all(b" ]\n")?;

        Ok(())
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Writes the payload in one go when it's contiguous, otherwise value by value.
    fn write_payload(
        &mut self,
        values: impl Iterator<Item = f32>,
        contiguous: Option<&[f32]>,
    ) -> Result<()> {
        match contiguous {
            Some(slice) => self.inner.write_all(bytemuck::cast_slice(slice))?,
            None => {
                for v in values {
                    self.inner.write_all(&v.to_ne_bytes())?;
                }
            }
        }

        Ok(())
    }
}
