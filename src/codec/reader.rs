use std::io::{self, BufRead};

use ndarray::{Array1, Array2};

use super::{BINARY_HEADER, MATRIX_TOKEN, VALUE_SIZE, VECTOR_TOKEN};
use crate::{LayerErr, Result, error::check_dim};

/// Values read per chunk of a binary payload, a truncated stream fails before
/// its declared size is ever allocated.
const PAYLOAD_CHUNK: usize = 1 << 16;

/// The reading end of a token stream.
pub struct TokenReader<R: BufRead> {
    inner: R,
    binary: bool,
}

impl<R: BufRead> TokenReader<R> {
    /// Creates a new `TokenReader` with a known encoding.
    ///
    /// # Arguments
    /// * `inner` - The underlying reader.
    /// * `binary` - Whether the stream uses the binary encoding.
    pub fn new(inner: R, binary: bool) -> Self {
        Self { inner, binary }
    }

    /// Creates a new `TokenReader` deciding the encoding from the stream header.
    ///
    /// # Arguments
    /// * `inner` - The underlying reader, positioned at the start of the stream.
    ///
    /// # Returns
    /// A binary reader if the stream starts with `\0B`, a text reader otherwise.
    pub fn detect(mut inner: R) -> Result<Self> {
        if inner.fill_buf()?.first() != Some(&BINARY_HEADER[0]) {
            return Ok(Self::new(inner, false));
        }

        let mut header = [0; 2];
        inner.read_exact(&mut header)?;
        if &header != BINARY_HEADER {
            return Err(LayerErr::Parse(format!(
                "invalid binary stream header {header:?}"
            )));
        }

        Ok(Self::new(inner, true))
    }

    pub fn is_binary(&self) -> bool {
        self.binary
    }

    /// Looks at the next meaningful byte without consuming it.
    ///
    /// Text streams skip whitespace first.
    ///
    /// # Returns
    /// The next byte or `None` at the end of the stream.
    pub fn peek(&mut self) -> Result<Option<u8>> {
        if !self.binary {
            self.skip_whitespace()?;
        }

        Ok(self.inner.fill_buf()?.first().copied())
    }

    /// Whether the next element of the stream is a `<...>` tag.
    pub fn next_is_tag(&mut self) -> Result<bool> {
        Ok(self.peek()? == Some(b'<'))
    }

    pub fn read_token(&mut self) -> Result<String> {
        if !self.binary {
            return self.read_word();
        }

        let mut raw = Vec::new();
        self.inner.read_until(b' ', &mut raw)?;
        if raw.pop() != Some(b' ') {
            return Err(unexpected_eof("token"));
        }

        String::from_utf8(raw).map_err(|e| LayerErr::Parse(format!("token is not utf8: {e}")))
    }

    /// Reads a token and checks it matches `expected`.
    pub fn expect_token(&mut self, expected: &str) -> Result<()> {
        let got = self.read_token()?;
        if got != expected {
            return Err(LayerErr::UnexpectedToken {
                expected: expected.to_string(),
                got,
            });
        }

        Ok(())
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        if !self.binary {
            return self.parse_word("f32");
        }

        match self.read_size()? {
            4 => Ok(f32::from_ne_bytes(self.read_bytes()?)),
            8 => Ok(f64::from_ne_bytes(self.read_bytes()?) as f32),
            size => Err(LayerErr::Parse(format!(
                "unsupported floating point size {size}"
            ))),
        }
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        if !self.binary {
            return self.parse_word("i32");
        }

        match self.read_size()? {
            VALUE_SIZE => Ok(i32::from_ne_bytes(self.read_bytes()?)),
            size => Err(LayerErr::Parse(format!("unsupported integer size {size}"))),
        }
    }

    /// Reads a dimension, which must be a non-negative `i32`.
    pub fn read_dim(&mut self) -> Result<usize> {
        let dim = self.read_i32()?;
        usize::try_from(dim).map_err(|_| LayerErr::Parse(format!("negative dimension {dim}")))
    }

    /// Reads a matrix of any shape.
    ///
    /// An empty text matrix reads back as `0x0`.
    pub fn read_matrix(&mut self) -> Result<Array2<f32>> {
        self.read_matrix_checked(None)
    }

    /// Reads a matrix that must have the `expected` shape.
    ///
    /// Binary streams are checked against their header before the payload is
    /// read. An empty text matrix takes the expected shape when that shape
    /// holds no values.
    ///
    /// # Arguments
    /// * `what` - The name reported in a `LayerErr::ShapeMismatch`.
    /// * `expected` - The required `(rows, cols)`.
    pub fn read_matrix_with_dim(
        &mut self,
        what: &'static str,
        expected: (usize, usize),
    ) -> Result<Array2<f32>> {
        self.read_matrix_checked(Some((what, expected)))
    }

    pub fn read_vector(&mut self) -> Result<Array1<f32>> {
        self.read_vector_checked(None)
    }

    /// Reads a vector that must have `expected` entries, see `read_matrix_with_dim`.
    pub fn read_vector_with_dim(&mut self, what: &'static str, expected: usize) -> Result<Array1<f32>> {
        self.read_vector_checked(Some((what, expected)))
    }

    fn read_matrix_checked(
        &mut self,
        expected: Option<(&'static str, (usize, usize))>,
    ) -> Result<Array2<f32>> {
        if self.binary {
            self.expect_token(MATRIX_TOKEN)?;
            let rows = self.read_dim()?;
            let cols = self.read_dim()?;
            if let Some((what, dim)) = expected {
                check_dim(what, (rows, cols), dim)?;
            }

            let len = rows
                .checked_mul(cols)
                .ok_or_else(|| LayerErr::Parse(format!("matrix {rows}x{cols} is too large")))?;

            let data = self.read_payload(len)?;
            return Array2::from_shape_vec((rows, cols), data)
                .map_err(|e| LayerErr::Parse(e.to_string()));
        }

        self.expect_token("[")?;

        let mut data = Vec::new();
        let mut row_lens = Vec::new();
        let mut row_len = 0;
        loop {
            if self.skip_whitespace()? && row_len > 0 {
                row_lens.push(row_len);
                row_len = 0;
            }

            let word = self.read_word()?;
            if word == "]" {
                break;
            }

            data.push(parse_value(&word)?);
            row_len += 1;
        }

        if row_len > 0 {
            row_lens.push(row_len);
        }

        let cols = row_lens.first().copied().unwrap_or(0);
        if let Some(bad) = row_lens.iter().find(|&&len| len != cols) {
            return Err(LayerErr::Parse(format!(
                "ragged matrix row of length {bad}, expected {cols}"
            )));
        }

        let mut dim = (row_lens.len(), cols);
        if let Some((what, expected)) = expected {
            if data.is_empty() && (expected.0 == 0 || expected.1 == 0) {
                dim = expected;
            }
            check_dim(what, dim, expected)?;
        }

        Array2::from_shape_vec(dim, data).map_err(|e| LayerErr::Parse(e.to_string()))
    }

    fn read_vector_checked(&mut self, expected: Option<(&'static str, usize)>) -> Result<Array1<f32>> {
        if self.binary {
            self.expect_token(VECTOR_TOKEN)?;
            let dim = self.read_dim()?;
            if let Some((what, len)) = expected {
                check_dim(what, (dim, 1), (len, 1))?;
            }

            return Ok(Array1::from_vec(self.read_payload(dim)?));
        }

        self.expect_token("[")?;

        let mut values = Vec::new();
        loop {
            let word = self.read_word()?;
            if word == "]" {
                break;
            }

            values.push(parse_value(&word)?);
        }

        if let Some((what, len)) = expected {
            check_dim(what, (values.len(), 1), (len, 1))?;
        }

        Ok(Array1::from_vec(values))
    }

    fn read_size(&mut self) -> Result<u8> {
        let [size] = self.read_bytes::<1>()?;
        Ok(size)
    }

    fn read_bytes<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0; N];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_payload(&mut self, len: usize) -> Result<Vec<f32>> {
        let mut data = Vec::new();
        while data.len() < len {
            let start = data.len();
            data.resize(len.min(start + PAYLOAD_CHUNK), 0f32);
            self.inner
                .read_exact(bytemuck::cast_slice_mut(&mut data[start..]))?;
        }

        Ok(data)
    }

    fn parse_word<T: std::str::FromStr>(&mut self, what: &str) -> Result<T> {
        let word = self.read_word()?;
        word.parse()
            .map_err(|_| LayerErr::Parse(format!("invalid {what} value {word}")))
    }

    /// Skips whitespace and reports whether a line break was crossed.
    fn skip_whitespace(&mut self) -> Result<bool> {
        let mut newline = false;
        loop {
            let buf = self.inner.fill_buf()?;
            let len = buf.len();
            if len == 0 {
                return Ok(newline);
            }

            let n = buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
            newline |= buf[..n].contains(&b'\n');
            self.inner.consume(n);
            if n < len {
                return Ok(newline);
            }
        }
    }

    fn read_word(&mut self) -> Result<String> {
        self.skip_whitespace()?;

        let mut word = Vec::new();
        loop {
            let buf = self.inner.fill_buf()?;
            let len = buf.len();
            if len == 0 {
                break;
            }

            let n = buf.iter().take_while(|b| !b.is_ascii_whitespace()).count();
            word.extend_from_slice(&buf[..n]);
            self.inner.consume(n);
            if n < len {
                break;
            }
        }

        if word.is_empty() {
            return Err(unexpected_eof("word"));
        }

        String::from_utf8(word).map_err(|e| LayerErr::Parse(format!("word is not utf8: {e}")))
    }
}

fn parse_value(word: &str) -> Result<f32> {
    word.parse()
        .map_err(|_| LayerErr::Parse(format!("invalid f32 value {word}")))
}

fn unexpected_eof(what: &str) -> LayerErr {
    LayerErr::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("stream ended while reading a {what}"),
    ))
}
