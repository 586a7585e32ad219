use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use crate::arch::layers::LayerKind;

/// The result type used in the entire crate.
pub type Result<T> = std::result::Result<T, LayerErr>;

/// The layer module's error type.
///
/// Every variant is fatal for the caller, the layer never patches its state
/// after one of these is produced.
#[derive(Debug)]
pub enum LayerErr {
    /// An unknown token was found while parsing initialization options.
    Config {
        token: String,
        accepted: &'static str,
    },
    /// A known option had a missing or invalid value.
    InvalidConfig(String),
    ShapeMismatch {
        what: &'static str,
        got: (usize, usize),
        expected: (usize, usize),
    },
    /// Two layers of different kinds were combined.
    TypeMismatch {
        expected: LayerKind,
        got: LayerKind,
    },
    UnknownLayer(String),
    UnexpectedToken {
        expected: String,
        got: String,
    },
    Parse(String),
    /// The numeric backend produced NaN or infinite values.
    NonFinite {
        what: &'static str,
    },
    Io(io::Error),
}

impl Display for LayerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerErr::Config { token, accepted } => write!(
                f,
                "unknown token {token}, a typo in config? accepted tokens are ({accepted})"
            ),
            LayerErr::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            LayerErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "shape mismatch for {what}: got {}x{}, expected {}x{}",
                got.0, got.1, expected.0, expected.1
            ),
            LayerErr::TypeMismatch { expected, got } => write!(
                f,
                "layer type mismatch: expected {}, got {}",
                expected.token(),
                got.token()
            ),
            LayerErr::UnknownLayer(token) => write!(f, "unknown layer type {token}"),
            LayerErr::UnexpectedToken { expected, got } => {
                write!(f, "expected token {expected}, got {got}")
            }
            LayerErr::Parse(msg) => write!(f, "parse error: {msg}"),
            LayerErr::NonFinite { what } => write!(f, "non-finite values found in {what}"),
            LayerErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for LayerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LayerErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for LayerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for LayerErr {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidConfig(value.to_string())
    }
}

/// Fails with a `LayerErr::ShapeMismatch` naming `what` unless both shapes agree.
pub(crate) fn check_dim(what: &'static str, got: (usize, usize), expected: (usize, usize)) -> Result<()> {
    if got != expected {
        return Err(LayerErr::ShapeMismatch {
            what,
            got,
            expected,
        });
    }

    Ok(())
}
