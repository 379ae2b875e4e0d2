//! Spin and magnetometer timing words.

/// Counts per second of the spin timer.
const TIMER_HZ: f64 = 8192.0;
/// Revolutions per minute of a one count period.
const RATE_NUMERATOR: f64 = 491_520.0;

fn word(hi: u8, lo: u8) -> u16 {
    u16::from_be_bytes([hi, lo])
}

/// Rotation rate in RPM from a 16 bit period word. `None` for a zero period.
#[must_use]
pub fn rate(hi: u8, lo: u8) -> Option<f64> {
    match word(hi, lo) {
        0 => None,
        w => Some(RATE_NUMERATOR / f64::from(w)),
    }
}

/// Rotation period in seconds from a 16 bit period word.
#[must_use]
pub fn period(hi: u8, lo: u8) -> f64 {
    f64::from(word(hi, lo)) / TIMER_HZ
}

/// Degrees of rotation since the last sun pulse, from the elapsed and period words.
#[must_use]
pub fn angle(elapsed: [u8; 2], period: [u8; 2]) -> Option<f64> {
    match word(period[0], period[1]) {
        0 => None,
        p => Some(f64::from(word(elapsed[0], elapsed[1])) / f64::from(p) * 360.0),
    }
}
