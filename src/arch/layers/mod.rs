mod affine;
mod layer;
mod sigmoid;

pub use affine::AffineTransform;
pub use layer::{Layer, LayerKind};
pub use sigmoid::Sigmoid;
