use std::str::{FromStr, SplitWhitespace};

use serde::Deserialize;

use crate::{LayerErr, Result};

/// The option tokens understood by `AffineConfig::parse`.
pub const AFFINE_TOKENS: &str = "ParamRange|LearnRateCoef|MaxGrad";

/// Initialization options of an affine layer.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AffineConfig {
    /// Half-width of the uniform distribution the parameters are drawn from.
    pub param_range: f32,
    /// Multiplier applied to the global learning rate.
    pub learn_rate_coef: f32,
    /// Symmetric gradient clipping bound, `0` disables clipping.
    pub max_grad: f32,
}

impl Default for AffineConfig {
    fn default() -> Self {
        Self {
            param_range: 0.02,
            learn_rate_coef: 1.0,
            max_grad: 0.0,
        }
    }
}

impl AffineConfig {
    /// Parses a whitespace separated option string such as
    /// `<ParamRange> 0.1 <MaxGrad> 5`.
    ///
    /// # Arguments
    /// * `options` - The option tokens, each one followed by its value.
    ///
    /// # Returns
    /// The parsed configuration or a `LayerErr::Config` error naming the
    /// accepted tokens if an unknown one shows up.
    pub fn parse(options: &str) -> Result<Self> {
        let mut config = Self::default();
        let mut words = options.split_whitespace();

        while let Some(token) = words.next() {
            match token {
                "<ParamRange>" => config.param_range = next_value(&mut words, token)?,
                "<LearnRateCoef>" => config.learn_rate_coef = next_value(&mut words, token)?,
                "<MaxGrad>" => config.max_grad = next_value(&mut words, token)?,
                _ => {
                    return Err(LayerErr::Config {
                        token: token.to_string(),
                        accepted: AFFINE_TOKENS,
                    });
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Parses the configuration from its json representation.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.param_range.is_finite() || self.param_range < 0.0 {
            return Err(LayerErr::InvalidConfig(format!(
                "ParamRange must be a non-negative number, got {}",
                self.param_range
            )));
        }

        if !self.max_grad.is_finite() || self.max_grad < 0.0 {
            return Err(LayerErr::InvalidConfig(format!(
                "MaxGrad must be a non-negative number, got {}",
                self.max_grad
            )));
        }

        Ok(())
    }
}

/// Consumes the value that follows `token`.
pub(crate) fn next_value<T: FromStr>(words: &mut SplitWhitespace<'_>, token: &str) -> Result<T> {
    let Some(raw) = words.next() else {
        return Err(LayerErr::InvalidConfig(format!("missing value after {token}")));
    };

    raw.parse()
        .map_err(|_| LayerErr::InvalidConfig(format!("invalid value {raw} for {token}")))
}
