//! Piecewise-linear interpolation of complex values over frequency.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{CalibrationError, ReadoutResult};

/// Linear interpolant through complex knots, extrapolating past either end
/// with the slope of the outermost segment.
///
/// Real and imaginary parts are interpolated independently. A single knot
/// gives a constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexInterpolant {
    frequencies: Vec<f64>,
    values: Vec<Complex64>,
}

impl ComplexInterpolant {
    /// Builds an interpolant from knots sorted by frequency.
    pub fn new(frequencies: Vec<f64>, values: Vec<Complex64>) -> ReadoutResult<Self> {
        if frequencies.is_empty() || frequencies.len() != values.len() {
            return Err(CalibrationError::InsufficientPoints {
                needed: 1,
                got: frequencies.len().min(values.len()),
            }
            .into());
        }
        Ok(Self { frequencies, values })
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn values(&self) -> &[Complex64] {
        &self.values
    }

    /// Frequency span covered by the knots.
    pub fn span(&self) -> (f64, f64) {
        (self.frequencies[0], self.frequencies[self.frequencies.len() - 1])
    }

    /// Evaluates the interpolant at `frequency`.
    pub fn eval(&self, frequency: f64) -> Complex64 {
        let n = self.frequencies.len();
        if n == 1 {
            return self.values[0];
        }

        // Segment whose right knot is the first one >= frequency, clamped to
        // the end segments for extrapolation.
        let hi = self
            .frequencies
            .partition_point(|&f| f < frequency)
            .clamp(1, n - 1);
        let lo = hi - 1;

        let (f0, f1) = (self.frequencies[lo], self.frequencies[hi]);
        let (x0, x1) = (self.values[lo], self.values[hi]);
        if f1 == f0 {
            return x0;
        }
        let t = (frequency - f0) / (f1 - f0);
        x0 + (x1 - x0) * t
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    #[test]
    fn test_hits_knots_and_midpoints() {
        let interp = ComplexInterpolant::new(vec![1.0, 2.0, 4.0], vec![c(0.0, 0.0), c(2.0, -2.0), c(2.0, 2.0)]).unwrap();
        assert_eq!(interp.eval(2.0), c(2.0, -2.0));
        let mid = interp.eval(3.0);
        assert_abs_diff_eq!(mid.re, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(mid.im, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_extrapolates_linearly() {
        let interp = ComplexInterpolant::new(vec![1.0, 2.0], vec![c(1.0, 0.0), c(2.0, 1.0)]).unwrap();
        let below = interp.eval(0.0);
        let above = interp.eval(4.0);
        assert_abs_diff_eq!(below.re, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(below.im, -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(above.re, 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(above.im, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_single_knot_is_constant() {
        let interp = ComplexInterpolant::new(vec![5.0], vec![c(3.0, 4.0)]).unwrap();
        assert_eq!(interp.eval(-100.0), c(3.0, 4.0));
        assert_eq!(interp.span(), (5.0, 5.0));
    }

    #[test]
    fn test_rejects_empty() {
        assert!(ComplexInterpolant::new(vec![], vec![]).is_err());
        assert!(ComplexInterpolant::new(vec![1.0, 2.0], vec![c(0.0, 0.0)]).is_err());
    }
}
