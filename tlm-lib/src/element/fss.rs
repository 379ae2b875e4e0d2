//! Fine sun sensor angle.
//!
//! The sensor reports a 7 bit Gray-coded coarse angle as three analog levels (one carrying 3
//! bits, two carrying 2 bits each) plus sine, cosine and bias channels for the fine angle.
use std::f64::consts::PI;

/// Volts per count of the analog channels.
const VOLTS_PER_COUNT: f64 = 0.02;
/// Angle reported when coarse and fine angles are both zero.
const BORESIGHT_OFFSET: f64 = 154.0;

/// Voltage bands of the 3 bit coarse channel.
const THREE_BIT_BANDS: [(f64, f64); 7] = [
    (0.52, 0.92),
    (1.23, 1.63),
    (1.95, 2.35),
    (2.66, 3.06),
    (3.38, 3.78),
    (4.09, 4.59),
    (4.8, 5.2),
];

/// Voltage bands of the 2 bit coarse channels.
const TWO_BIT_BANDS: [(f64, f64); 3] = [(1.23, 1.63), (2.66, 3.06), (4.09, 4.59)];

/// Upper bound of the zero band shared by all coarse channels.
const ZERO_BAND: f64 = 0.2;

/// Convert a Gray-coded bit sequence, most significant first, to binary.
#[must_use]
pub fn gray_to_binary(bits: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bits.len());
    for &bit in bits {
        let prev = out.last().copied().unwrap_or(0);
        out.push(prev ^ bit);
    }
    out
}

fn bits_to_int(bits: &[u8]) -> i64 {
    bits.iter().fold(0, |acc, b| (acc << 1) | i64::from(*b))
}

/// Level of `volts` within `bands`, where level 0 is the zero band.
fn level(volts: f64, bands: &[(f64, f64)]) -> Option<u8> {
    if volts <= ZERO_BAND {
        return Some(0);
    }
    bands
        .iter()
        .position(|(lo, hi)| volts >= *lo && volts <= *hi)
        .and_then(|p| u8::try_from(p + 1).ok())
}

fn push_bits(bits: &mut Vec<u8>, value: u8, width: usize) {
    for shift in (0..width).rev() {
        bits.push((value >> shift) & 1);
    }
}

/// Sun angle in degrees from raw channel counts, or `None` if a coarse channel is between
/// bands or the cosine channel equals the bias.
#[must_use]
pub fn fss_angle(v01: u8, v02: u8, v03: u8, vs: u8, vc: u8, vb: u8) -> Option<f64> {
    let volts = |count: u8| f64::from(count) * VOLTS_PER_COUNT;

    let mut coarse = Vec::with_capacity(7);
    push_bits(&mut coarse, level(volts(v01), &THREE_BIT_BANDS)?, 3);
    push_bits(&mut coarse, level(volts(v02), &TWO_BIT_BANDS)?, 2);
    push_bits(&mut coarse, level(volts(v03), &TWO_BIT_BANDS)?, 2);
    let coarse = gray_to_binary(&coarse);

    if vc == vb {
        return None;
    }
    let fine = (((volts(vs) - volts(vb)) / (volts(vc) - volts(vb))).atan() / PI).abs();

    // successive halving from 1
    let mut fine_bits = [0u8; 8];
    let mut remainder = fine;
    let mut step = 1.0;
    for bit in &mut fine_bits {
        if step <= remainder {
            *bit = 1;
            remainder -= step;
        }
        step /= 2.0;
    }

    let mut coarse_angle = bits_to_int(&coarse);
    if coarse[6] != fine_bits[0] {
        if fine_bits[1] == 1 {
            coarse_angle -= 1;
        } else {
            coarse_angle += 1;
        }
    }

    Some(BORESIGHT_OFFSET - (coarse_angle as f64 + fine))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gray_decoding() {
        assert_eq!(gray_to_binary(&[1, 0, 1]), vec![1, 1, 0]);
        assert_eq!(gray_to_binary(&[0, 0, 1, 0, 0, 0, 0]), vec![0, 0, 1, 1, 1, 1, 1]);
        assert!(gray_to_binary(&[]).is_empty());
    }

    #[test]
    fn zero_angle_is_boresight() {
        assert_eq!(fss_angle(0, 0, 0, 50, 100, 50), Some(154.0));
    }

    #[test]
    fn coarse_adjusted_by_fine() {
        // 36 counts is 0.72V, the first 3 bit band
        let angle = fss_angle(36, 0, 0, 100, 100, 0).unwrap();
        // coarse 0b0011111 adjusted up by one, fine a quarter turn
        assert!((angle - (154.0 - 32.25)).abs() < 1e-9, "got {angle}");
    }

    #[test]
    fn coarse_between_bands() {
        // 0.4V is in no band
        assert_eq!(fss_angle(20, 0, 0, 1, 2, 0), None);
        assert_eq!(fss_angle(0, 255, 0, 1, 2, 0), None);
    }

    #[test]
    fn degenerate_fine_channels() {
        assert_eq!(fss_angle(0, 0, 0, 7, 7, 7), None);
    }
}
