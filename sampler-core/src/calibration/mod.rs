//! Linear conversion from raw ADC counts to a moisture percentage.
//!
//! The probe reads lower when wet, so the transform is inverted: `zero_point`
//! is the count that maps to 100 % and `zero_point + span` maps to 0 %.

use core::fmt::{self, Write as _};

use heapless::String;

/// Count reported by the probe in saturated soil on the reference board.
pub const DEFAULT_ZERO_POINT: i32 = 2300;

/// Count delta between saturated and dry soil on the reference board.
pub const DEFAULT_SPAN: i32 = 1795;

/// Longest payload produced by [`format_payload`] (`"100.00%"` plus headroom).
pub const MAX_PAYLOAD_LEN: usize = 16;

/// Payload buffer published for a single reading.
pub type Payload = String<MAX_PAYLOAD_LEN>;

/// Raw converter sample.
pub type RawSample = i32;

/// Calibrated reading, always within `0.0..=100.0`.
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd)]
pub struct Percent(f64);

impl Percent {
    pub const MIN: Self = Self(0.0);
    pub const MAX: Self = Self(100.0);

    /// Clamps an arbitrary value into the percentage range.
    #[must_use]
    pub fn clamped(value: f64) -> Self {
        if value.is_nan() {
            return Self::MIN;
        }
        Self(value.clamp(Self::MIN.0, Self::MAX.0))
    }

    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}%", self.0)
    }
}

/// Rejected calibration constants.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CalibrationError {
    ZeroSpan,
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationError::ZeroSpan => f.write_str("calibration span must be non-zero"),
        }
    }
}

/// Sensor-specific calibration constants.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Calibration {
    zero_point: i32,
    span: i32,
}

impl Calibration {
    /// Builds a calibration.
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationError::ZeroSpan`] when `span` is zero.
    pub const fn new(zero_point: i32, span: i32) -> Result<Self, CalibrationError> {
        if span == 0 {
            return Err(CalibrationError::ZeroSpan);
        }
        Ok(Self { zero_point, span })
    }

    #[must_use]
    pub const fn zero_point(&self) -> i32 {
        self.zero_point
    }

    #[must_use]
    pub const fn span(&self) -> i32 {
        self.span
    }

    /// Converts a raw sample to a clamped percentage.
    #[must_use]
    pub fn calibrate(&self, raw: RawSample) -> Percent {
        calibrate(raw, self.zero_point, self.span)
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            zero_point: DEFAULT_ZERO_POINT,
            span: DEFAULT_SPAN,
        }
    }
}

/// Computes `100 - (raw - zero_point) * 100 / span` clamped to `0..=100`.
///
/// Total over every input; a zero `span` never panics and still lands in range.
#[must_use]
pub fn calibrate(raw: RawSample, zero_point: i32, span: i32) -> Percent {
    let offset = f64::from(raw) - f64::from(zero_point);
    Percent::clamped(100.0 - offset * 100.0 / f64::from(span))
}

/// Formats a reading as the published payload, e.g. `"42.17%"`.
#[must_use]
pub fn format_payload(value: Percent) -> Payload {
    let mut payload = Payload::new();
    // `100.00%` is the widest rendering and always fits.
    let _ = write!(payload, "{value}");
    payload
}
