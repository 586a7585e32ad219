mod adaptive;
mod options;
mod update_rule;

pub use adaptive::{ADAPTIVE_EPSILON, AdaptiveState, RMSPROP_DECAY};
pub use options::TrainOptions;
pub use update_rule::UpdateRule;
