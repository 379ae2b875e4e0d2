use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{fss, spin, Value};

/// Read access to the sub-commutated frames being assembled, for parsers that need a byte
/// their own trigger does not carry.
pub trait GroupLookup {
    /// Byte `index` of `group`'s logical frame, from the frame being assembled if it has
    /// reached `index`, otherwise from the last complete frame.
    fn group_byte(&self, group: &str, index: usize) -> Option<u8>;
}

impl GroupLookup for () {
    fn group_byte(&self, _group: &str, _index: usize) -> Option<u8> {
        None
    }
}

pub struct ParseContext<'a> {
    /// Index of the minor frame carrying the triggering byte.
    pub minor_frame_idx: Option<usize>,
    pub groups: &'a dyn GroupLookup,
}

/// Converts a collected raw value into a [Value].
pub trait Parser: Debug + Send + Sync {
    /// Parse `raw`, one entry per collected byte or bit. `None` means the element does not
    /// apply to this firing and its state is left alone.
    fn parse(&self, raw: &[u8], ctx: &ParseContext<'_>) -> Option<Value>;
}

/// Folds raw entries into an integer, shifting `shift` bits per entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftParser {
    shift: u32,
}

impl ShiftParser {
    pub const BYTES: ShiftParser = ShiftParser { shift: 8 };
    pub const BITS: ShiftParser = ShiftParser { shift: 1 };

    fn fold(&self, raw: &[u8]) -> Option<u64> {
        if raw.len() as u64 * u64::from(self.shift) > u64::from(u64::BITS) {
            trace!(len = raw.len(), "raw value too wide for integer");
            return None;
        }
        Some(
            raw.iter()
                .fold(0u64, |acc, x| (acc << self.shift) | u64::from(*x)),
        )
    }
}

impl Parser for ShiftParser {
    fn parse(&self, raw: &[u8], _ctx: &ParseContext<'_>) -> Option<Value> {
        self.fold(raw).map(Value::Int)
    }
}

/// Bytes that only carry this element every `interval` minor frames, starting at `word`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedWordParser {
    pub word: usize,
    #[serde(default = "FixedWordParser::default_interval")]
    pub interval: usize,
    /// Bits to pick from the word, 0 being the most significant bit of the first byte.
    #[serde(default)]
    pub bits: Option<Vec<u8>>,
}

impl FixedWordParser {
    fn default_interval() -> usize {
        4
    }

    #[must_use]
    pub fn new(word: usize) -> Self {
        FixedWordParser {
            word,
            interval: Self::default_interval(),
            bits: None,
        }
    }

    #[must_use]
    pub fn with_bits(mut self, bits: &[u8]) -> Self {
        self.bits = Some(bits.to_vec());
        self
    }
}

impl Parser for FixedWordParser {
    fn parse(&self, raw: &[u8], ctx: &ParseContext<'_>) -> Option<Value> {
        let idx = ctx.minor_frame_idx?;
        if self.interval == 0 || idx % self.interval != self.word {
            return None;
        }
        let val = ShiftParser::BYTES.fold(raw)?;
        let Some(bits) = &self.bits else {
            return Some(Value::Int(val));
        };
        let width = raw.len() * 8;
        let picked = bits.iter().fold(0u64, |acc, b| {
            let b = usize::from(*b);
            let bit = if b < width { (val >> (width - 1 - b)) & 1 } else { 0 };
            (acc << 1) | bit
        });
        Some(Value::Int(picked))
    }
}

/// Thruster pulse count, where the first bit is worth 8 times its position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PulseCountParser;

impl Parser for PulseCountParser {
    fn parse(&self, raw: &[u8], _ctx: &ParseContext<'_>) -> Option<Value> {
        let mut val = 0u64;
        for (i, bit) in raw.iter().enumerate() {
            val = (val << 1) | u64::from(*bit);
            if i == 0 {
                val <<= 3;
            }
        }
        Some(Value::Int(val))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpinQuantity {
    /// RPM from a 2 byte period word.
    Rate,
    /// Seconds from a 2 byte period word.
    Period,
    /// Degrees from 2 byte elapsed and period words.
    Angle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpinParser {
    pub quantity: SpinQuantity,
}

impl Parser for SpinParser {
    fn parse(&self, raw: &[u8], _ctx: &ParseContext<'_>) -> Option<Value> {
        let val = match (self.quantity, raw) {
            (SpinQuantity::Rate, [hi, lo]) => spin::rate(*hi, *lo)?,
            (SpinQuantity::Period, [hi, lo]) => spin::period(*hi, *lo),
            (SpinQuantity::Angle, [a, b, c, d]) => spin::angle([*a, *b], [*c, *d])?,
            _ => {
                trace!(quantity = ?self.quantity, len = raw.len(), "wrong raw length for spin word");
                return None;
            }
        };
        Some(Value::Float(val))
    }
}

/// A byte of some sub-commutated group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupByte {
    pub group: String,
    pub index: usize,
}

/// Fine sun sensor angle from six channel counts.
///
/// Without `bias` the raw value must carry all six channels. With `bias` it carries the first
/// five and the bias channel is looked up in another group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FssAngleParser {
    pub bias: Option<GroupByte>,
}

impl Parser for FssAngleParser {
    fn parse(&self, raw: &[u8], ctx: &ParseContext<'_>) -> Option<Value> {
        let mut channels: Vec<u8> = raw.to_vec();
        if let Some(bias) = &self.bias {
            let Some(byte) = ctx.groups.group_byte(&bias.group, bias.index) else {
                trace!(group = %bias.group, index = bias.index, "bias channel not yet received");
                return None;
            };
            channels.push(byte);
        }
        let &[v01, v02, v03, vs, vc, vb] = channels.as_slice() else {
            trace!(len = channels.len(), "fss angle needs 6 channels");
            return None;
        };
        fss::fss_angle(v01, v02, v03, vs, vc, vb).map(Value::Float)
    }
}
