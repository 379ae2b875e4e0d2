//! Telemetry elements.
//!
//! An [Element] is a named telemetry point. Its [Positions] say which trigger(s) it fires on
//! and where its raw value lives, and its [Parser], [Validator] and [Formatter] turn that raw
//! value into something displayable. Decoded values are kept in an [ElementState].
mod curve;
mod format;
pub mod fss;
mod parse;
pub mod spin;
mod state;
mod validate;

use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;
use typed_builder::TypedBuilder;

pub use curve::Curve;
pub use format::{
    BinaryFormatter, CurveFormatter, Formatter, HexFormatter, OptionFormatter, PlainFormatter,
};
pub use parse::{
    FixedWordParser, FssAngleParser, GroupByte, GroupLookup, ParseContext, Parser,
    PulseCountParser, ShiftParser, SpinParser, SpinQuantity,
};
pub use state::{ElementState, ElementUpdate};
pub use validate::{CurveValidator, NoValidator, RangeValidator, Validator};

use crate::config::Mode;
use crate::position::{Granularity, Positions};
use crate::trigger::Trigger;
use crate::Result;

/// A parsed element value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(u64),
    Float(f64),
}

impl Value {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Int(v) => *v as f64,
            Value::Float(v) => *v,
        }
    }

    /// Integer value, if this is an integer or a float with no fractional part.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 && *v >= 0.0 && *v <= u64::MAX as f64 => {
                Some(*v as u64)
            }
            Value::Float(_) => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, TypedBuilder)]
pub struct Element {
    #[builder(setter(into))]
    pub id: String,
    #[builder(default, setter(strip_option, into))]
    pub name: Option<String>,
    #[builder(default, setter(strip_option, into))]
    pub description: Option<String>,
    #[builder(default, setter(strip_option, into))]
    pub category: Option<String>,
    pub positions: Positions,
    /// Defaults to folding bytes into an integer.
    #[builder(default = Box::new(ShiftParser::BYTES) as Box<dyn Parser>)]
    pub parser: Box<dyn Parser>,
    #[builder(default = Box::new(NoValidator) as Box<dyn Validator>)]
    pub validator: Box<dyn Validator>,
    #[builder(default = Box::new(PlainFormatter) as Box<dyn Formatter>)]
    pub formatter: Box<dyn Formatter>,
    #[builder(default, setter(strip_option, into))]
    pub unit: Option<String>,
}

/// Everything an element needs to decode one firing.
pub struct DecodeContext<'a> {
    pub trigger: &'a Trigger,
    /// Frame of the trigger's namespace, at least up to the triggering byte.
    pub data: &'a [u8],
    pub minor_frame_idx: Option<usize>,
    pub mode: Option<Mode>,
    pub groups: &'a dyn GroupLookup,
    pub time: DateTime<Utc>,
}

impl Element {
    /// Parser matching the granularity of `positions`: bits fold one bit at a time, bytes
    /// one byte at a time.
    ///
    /// # Errors
    /// If positions are mode-filtered and `mode` does not select one.
    pub fn default_parser(positions: &Positions, mode: Option<Mode>) -> Result<Box<dyn Parser>> {
        Ok(match positions.select(mode)?.granularity() {
            Granularity::Byte => Box::new(ShiftParser::BYTES),
            Granularity::Bit => Box::new(ShiftParser::BITS),
        })
    }

    /// Collect, parse, validate and record one firing. Returns whether `state` was updated.
    ///
    /// # Errors
    /// Extraction faults from the position specification. A parser declining the firing is
    /// not an error.
    pub fn decode(&self, state: &mut ElementState, ctx: &DecodeContext<'_>) -> Result<bool> {
        let raw = self.positions.collect(ctx.trigger, ctx.data, ctx.mode)?;
        let parse_ctx = ParseContext {
            minor_frame_idx: ctx.minor_frame_idx,
            groups: ctx.groups,
        };
        let Some(value) = self.parser.parse(&raw, &parse_ctx) else {
            trace!(id = %self.id, trigger = %ctx.trigger, "not applicable");
            return Ok(false);
        };
        let valid = self.validator.validate(&value);
        state.update(ctx.time, ctx.trigger.clone(), value, valid);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::OffsetSpec;
    use crate::Error;

    fn decode(element: &Element, trigger: Trigger, data: &[u8]) -> Result<(bool, ElementState)> {
        let mut state = ElementState::default();
        let ctx = DecodeContext {
            trigger: &trigger,
            data,
            minor_frame_idx: Some(1),
            mode: None,
            groups: &(),
            time: Utc::now(),
        };
        let updated = element.decode(&mut state, &ctx)?;
        Ok((updated, state))
    }

    #[test]
    fn decode_bytes_and_validate() {
        let element = Element::builder()
            .id("spin_word")
            .positions(OffsetSpec::subcom_bytes("DS", &[vec![2, 3].into()]).unwrap().into())
            .validator(Box::new(RangeValidator { min: 0.0, max: 0x100 as f64 }))
            .build();

        let (updated, state) =
            decode(&element, Trigger::subcom("DS", 3), &[0, 0, 0x01, 0x02]).unwrap();

        assert!(updated);
        assert_eq!(state.value, Some(Value::Int(0x102)));
        assert_eq!(state.valid, Some(false));
        assert_eq!(state.trigger, Some(Trigger::subcom("DS", 3)));
    }

    #[test]
    fn declined_parse_leaves_state() {
        let element = Element::builder()
            .id("fixed")
            .positions(OffsetSpec::bytes(&[0.into()]).unwrap().into())
            .parser(Box::new(FixedWordParser::new(0)))
            .build();

        let (updated, state) = decode(&element, Trigger::minor_frame(1, 0), &[9]).unwrap();

        assert!(!updated);
        assert_eq!(state, ElementState::default());
    }

    #[test]
    fn extraction_fault_propagates() {
        let element = Element::builder()
            .id("far")
            .positions(OffsetSpec::bytes(&[vec![0, 9].into()]).unwrap().into())
            .build();

        let zult = decode(&element, Trigger::minor_frame(1, 9), &[0; 4]);

        assert!(matches!(zult, Err(Error::Extraction(_))));
    }

    #[test]
    fn float_as_integer() {
        assert_eq!(Value::Float(2.0).as_u64(), Some(2));
        assert_eq!(Value::Float(2.5).as_u64(), None);
        assert_eq!(Value::Float(-1.0).as_u64(), None);
        assert_eq!(Value::Int(3).as_f64(), 3.0);
    }
}
