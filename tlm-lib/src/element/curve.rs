use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Piecewise-linear calibration curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<(f64, f64)>", into = "Vec<(f64, f64)>")]
pub struct Curve {
    points: Vec<(f64, f64)>,
}

impl Curve {
    /// Create from `(input, output)` pairs.
    ///
    /// # Errors
    /// [Error::Curve] if there are fewer than 2 points or inputs are not strictly ascending.
    pub fn new(points: Vec<(f64, f64)>) -> Result<Self> {
        if points.len() < 2 {
            return Err(Error::Curve(format!(
                "need at least 2 points, got {}",
                points.len()
            )));
        }
        if let Some(w) = points
            .windows(2)
            .find(|w| w[1].0.partial_cmp(&w[0].0) != Some(Ordering::Greater))
        {
            return Err(Error::Curve(format!(
                "inputs must be ascending, found {} then {}",
                w[0].0, w[1].0
            )));
        }
        Ok(Curve { points })
    }

    /// Input range covered by the curve.
    #[must_use]
    pub fn domain(&self) -> (f64, f64) {
        (self.points[0].0, self.points[self.points.len() - 1].0)
    }

    #[must_use]
    pub fn contains(&self, x: f64) -> bool {
        let (lo, hi) = self.domain();
        x >= lo && x <= hi
    }

    /// Interpolated output for `x`, or `None` if `x` is outside the domain.
    #[must_use]
    pub fn interpolate(&self, x: f64) -> Option<f64> {
        if !self.contains(x) {
            return None;
        }
        let idx = self.points.partition_point(|(input, _)| *input < x);
        if idx == 0 {
            return Some(self.points[0].1);
        }
        let (x0, y0) = self.points[idx - 1];
        let (x1, y1) = self.points[idx];
        Some(y0 + (y1 - y0) * (x - x0) / (x1 - x0))
    }
}

impl TryFrom<Vec<(f64, f64)>> for Curve {
    type Error = Error;

    fn try_from(value: Vec<(f64, f64)>) -> Result<Self> {
        Curve::new(value)
    }
}

impl From<Curve> for Vec<(f64, f64)> {
    fn from(value: Curve) -> Self {
        value.points
    }
}
