pub mod arch;
pub mod codec;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod optimization;

pub use arch::layers::{AffineTransform, Layer, LayerKind};
pub use error::{LayerErr, Result};
