use std::{fmt, str::FromStr};

use serde::Deserialize;

use crate::LayerErr;

/// The policy used to turn the accumulated gradient into a parameter step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateRule {
    /// Plain stochastic gradient descent.
    #[default]
    Sgd,
    /// Per-parameter step scaled by the running sum of squared gradients.
    AdaGrad,
    /// Per-parameter step scaled by a decayed average of squared gradients.
    RmsProp,
}

impl UpdateRule {
    /// Whether this rule needs the adaptive accumulators.
    pub fn is_adaptive(&self) -> bool {
        !matches!(self, UpdateRule::Sgd)
    }
}

impl FromStr for UpdateRule {
    type Err = LayerErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sgd" => Ok(UpdateRule::Sgd),
            "adagrad" => Ok(UpdateRule::AdaGrad),
            "rmsprop" => Ok(UpdateRule::RmsProp),
            _ => Err(LayerErr::InvalidConfig(format!(
                "unknown update rule {s}, expected one of (sgd|adagrad|rmsprop)"
            ))),
        }
    }
}

impl fmt::Display for UpdateRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpdateRule::Sgd => "sgd",
            UpdateRule::AdaGrad => "adagrad",
            UpdateRule::RmsProp => "rmsprop",
        };

        f.write_str(s)
    }
}
