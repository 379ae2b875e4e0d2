use std::fmt::Debug;
use std::sync::Arc;

use super::{Curve, Value};

/// Decides whether a parsed value is plausible.
pub trait Validator: Debug + Send + Sync {
    /// `Some(valid)`, or `None` when validity cannot be determined.
    fn validate(&self, value: &Value) -> Option<bool>;
}

/// Validity is always indeterminate.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoValidator;

impl Validator for NoValidator {
    fn validate(&self, _value: &Value) -> Option<bool> {
        None
    }
}

/// Valid when `min <= value <= max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeValidator {
    pub min: f64,
    pub max: f64,
}

impl Validator for RangeValidator {
    fn validate(&self, value: &Value) -> Option<bool> {
        let v = value.as_f64();
        Some(v >= self.min && v <= self.max)
    }
}

/// Valid when the value lies in the domain of a calibration curve.
#[derive(Debug, Clone)]
pub struct CurveValidator {
    pub curve: Arc<Curve>,
}

impl Validator for CurveValidator {
    fn validate(&self, value: &Value) -> Option<bool> {
        Some(self.curve.contains(value.as_f64()))
    }
}
