use std::fmt;

/// Count, mean and standard deviation of a set of values.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Moments {
    count: usize,
    mean: f64,
    std_dev: f64,
}

impl Moments {
    /// Computes the moments of `values`, accumulating in f64.
    ///
    /// # Arguments
    /// * `values` - The values to summarize.
    ///
    /// # Returns
    /// The moments, all zero for an empty input.
    pub fn of<'a, I>(values: I) -> Self
    where
        I: IntoIterator<Item = &'a f32>,
    {
        let (count, sum, sum_sq) = values
            .into_iter()
            .fold((0usize, 0f64, 0f64), |(n, s, s2), &v| {
                let v = v as f64;
                (n + 1, s + v, s2 + v * v)
            });

        if count == 0 {
            return Self::default();
        }

        let mean = sum / count as f64;
        let variance = (sum_sq / count as f64 - mean * mean).max(0.);

        Self {
            count,
            mean,
            std_dev: variance.sqrt(),
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn std_dev(&self) -> f64 {
        self.std_dev
    }
}

impl fmt::Display for Moments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            " (count {}, mean {:.6e}, stddev {:.6e})",
            self.count, self.mean, self.std_dev
        )
    }
}
