use std::fmt::Debug;
use std::sync::Arc;

use super::{Curve, Value};

/// Renders a parsed value for display.
pub trait Formatter: Debug + Send + Sync {
    fn format(&self, value: &Value) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlainFormatter;

impl Formatter for PlainFormatter {
    fn format(&self, value: &Value) -> String {
        value.to_string()
    }
}

/// Zero-filled hexadecimal, e.g., `0a`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HexFormatter {
    pub fill: usize,
}

impl Default for HexFormatter {
    fn default() -> Self {
        HexFormatter { fill: 2 }
    }
}

impl Formatter for HexFormatter {
    fn format(&self, value: &Value) -> String {
        match value.as_u64() {
            Some(v) => format!("{v:0fill$x}", fill = self.fill),
            None => value.to_string(),
        }
    }
}

/// Zero-filled binary, e.g., `00001010`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryFormatter {
    pub fill: usize,
}

impl Default for BinaryFormatter {
    fn default() -> Self {
        BinaryFormatter { fill: 8 }
    }
}

impl Formatter for BinaryFormatter {
    fn format(&self, value: &Value) -> String {
        match value.as_u64() {
            Some(v) => format!("{v:0fill$b}", fill = self.fill),
            None => value.to_string(),
        }
    }
}

/// Labels indexed by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionFormatter {
    pub labels: Vec<String>,
}

impl OptionFormatter {
    pub fn new<S: AsRef<str>>(labels: &[S]) -> Self {
        OptionFormatter {
            labels: labels.iter().map(|s| s.as_ref().to_string()).collect(),
        }
    }
}

impl Formatter for OptionFormatter {
    fn format(&self, value: &Value) -> String {
        value
            .as_u64()
            .and_then(|v| usize::try_from(v).ok())
            .and_then(|v| self.labels.get(v))
            .cloned()
            .unwrap_or_else(|| format!("<index out-of-range: {value}>"))
    }
}

/// Calibrated value from a curve.
#[derive(Debug, Clone)]
pub struct CurveFormatter {
    pub curve: Arc<Curve>,
    pub precision: usize,
}

impl CurveFormatter {
    pub const DEFAULT_PRECISION: usize = 6;

    pub fn new(curve: Arc<Curve>) -> Self {
        CurveFormatter {
            curve,
            precision: Self::DEFAULT_PRECISION,
        }
    }
}

impl Formatter for CurveFormatter {
    fn format(&self, value: &Value) -> String {
        match self.curve.interpolate(value.as_f64()) {
            Some(v) => format!("{v:.prec$}", prec = self.precision),
            None => format!("<out-of-range: {value}>"),
        }
    }
}
