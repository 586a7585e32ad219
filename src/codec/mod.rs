//! Token-tagged streams used to persist layers.
//!
//! A stream is either binary or text. Binary streams begin with the two byte
//! header `\0B`, text streams begin directly with their first token. In both
//! modes a tag such as `<MaxGrad>` starts with `<`, which lets a reader probe
//! for optional fields before the mandatory tensors.
//!
//! Binary layout of the primitives:
//! * token: the ascii token followed by a single space.
//! * `f32`/`i32`: a size byte (`4`) followed by the value in host byte order.
//! * matrix: token `FM`, rows, cols, then the row-major payload.
//! * vector: token `FV`, dim, then the payload.
//!
//! Text layout: whitespace separated words, matrices as
//! `[\n  a b\n  c d ]` and vectors as `[ a b ]`.

mod reader;
mod writer;

pub use reader::TokenReader;
pub use writer::TokenWriter;

/// Marks the beginning of a binary stream.
pub const BINARY_HEADER: &[u8; 2] = b"\0B";

const MATRIX_TOKEN: &str = "FM";
const VECTOR_TOKEN: &str = "FV";
const VALUE_SIZE: u8 = 4;
