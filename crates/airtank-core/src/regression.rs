//! Least-squares line fit over `(x, y)` samples.
//!
//! Samples are accumulated as running sums. x values are shifted by the first
//! sample's x before squaring, since raw Unix timestamps squared lose most of
//! their precision in an `f64`.

use crate::error::RegressionError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LineFit {
    pub fn at(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

#[derive(Debug, Clone, Default)]
pub struct LinearRegression {
    origin: Option<f64>,
    n: usize,
    sum_x: f64,
    sum_y: f64,
    sum_xx: f64,
    sum_xy: f64,
    distinct_x: bool,
}

impl LinearRegression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, x: f64, y: f64) {
        let origin = *self.origin.get_or_insert(x);
        let dx = x - origin;
        if dx != 0.0 {
            self.distinct_x = true;
        }
        self.n += 1;
        self.sum_x += dx;
        self.sum_y += y;
        self.sum_xx += dx * dx;
        self.sum_xy += dx * y;
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn fit(&self) -> Result<LineFit, RegressionError> {
        let degenerate = RegressionError::Degenerate { samples: self.n };
        if !self.distinct_x {
            return Err(degenerate);
        }
        let n = self.n as f64;
        let denominator = n * self.sum_xx - self.sum_x * self.sum_x;
        if denominator == 0.0 {
            return Err(degenerate);
        }
        let slope = (n * self.sum_xy - self.sum_x * self.sum_y) / denominator;
        let shifted_intercept = (self.sum_y - slope * self.sum_x) / n;
        let origin = self.origin.unwrap_or(0.0);
        Ok(LineFit {
            slope,
            intercept: shifted_intercept - slope * origin,
        })
    }
}

impl FromIterator<(f64, f64)> for LinearRegression {
    fn from_iter<I: IntoIterator<Item = (f64, f64)>>(iter: I) -> Self {
        let mut regression = Self::new();
        for (x, y) in iter {
            regression.add(x, y);
        }
        regression
    }
}

/// Fit a line through `points`.
pub fn fit_line(points: &[(f64, f64)]) -> Result<LineFit, RegressionError> {
    points.iter().copied().collect::<LinearRegression>().fit()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn textbook_four_point_fit() {
        let fit = fit_line(&[(1.0, 6.0), (2.0, 5.0), (3.0, 7.0), (4.0, 10.0)]).unwrap();
        assert!(close(fit.slope, 1.4), "slope {}", fit.slope);
        assert!(close(fit.intercept, 3.5), "intercept {}", fit.intercept);
    }

    #[test]
    fn large_timestamps_keep_precision() {
        let fit = fit_line(&[
            (1_671_024_238.0, 90.2),
            (1_671_024_240.0, 90.1),
            (1_671_024_242.0, 90.0),
        ])
        .unwrap();
        assert!(close(fit.slope, -0.05), "slope {}", fit.slope);
        assert!((fit.at(1_671_024_240.0) - 90.1).abs() < 1e-6);
    }

    #[test]
    fn single_sample_is_degenerate() {
        assert_eq!(
            fit_line(&[(3.0, 1.0)]),
            Err(RegressionError::Degenerate { samples: 1 })
        );
    }

    #[test]
    fn repeated_x_is_degenerate() {
        assert_eq!(
            fit_line(&[(5.0, 1.0), (5.0, 2.0), (5.0, 3.0)]),
            Err(RegressionError::Degenerate { samples: 3 })
        );
        assert!(fit_line(&[]).is_err());
    }

    #[test]
    fn flat_series_has_zero_slope() {
        let fit = fit_line(&[(0.0, 4.0), (1.0, 4.0), (2.0, 4.0)]).unwrap();
        assert!(close(fit.slope, 0.0));
        assert!(close(fit.intercept, 4.0));
    }
}
