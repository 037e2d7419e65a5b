//! # Frame Decoder
//!
//! Turns one received line into a [`Frame`]. Stateless.

use thiserror::Error;

use super::types::*;

/// Frame decoding errors
///
/// Never fatal to the link: the caller drops the line and reads the next one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("Malformed frame: {0:?}")]
    Malformed(String),
}

/// Decode one line of the wire protocol
///
/// Leading and trailing whitespace (including `\r\n`) is ignored, as are
/// fields after the potentiometer.
///
/// # Arguments
///
/// * `line` - One received line
///
/// # Returns
///
/// * `Ok(Frame::PeerAlive)` - for `"?"` or a blank line
/// * `Ok(Frame::Sample(_))` - for a valid telemetry frame
///
/// # Errors
///
/// Returns `FrameError::Malformed` if:
/// - The frame has fewer than 4 fields
/// - The state id is not a non-negative integer
/// - An axis is not a finite number
/// - The potentiometer field is not an integer
///
/// # Examples
///
/// ```
/// use grove_link::protocol::{parse_frame, Frame, LinkMode};
///
/// let frame = parse_frame("2;0.10;-0.20;9.81;512").unwrap();
/// match frame {
///     Frame::Sample(sample) => {
///         assert_eq!(sample.mode, LinkMode::Drawing);
///         assert_eq!(sample.pot, 512);
///     }
///     Frame::PeerAlive => unreachable!(),
/// }
/// ```
pub fn parse_frame(line: &str) -> Result<Frame, FrameError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed == UNCONFIRMED_LINE {
        return Ok(Frame::PeerAlive);
    }

    let malformed = || FrameError::Malformed(trimmed.to_string());

    let fields: Vec<&str> = trimmed.split(FIELD_SEPARATOR).map(str::trim).collect();
    if fields.len() < MIN_FIELDS {
        return Err(malformed());
    }

    let state_id: u32 = fields[0].parse().map_err(|_| malformed())?;
    let ax = parse_axis(fields[1]).ok_or_else(malformed)?;
    let ay = parse_axis(fields[2]).ok_or_else(malformed)?;
    let az = parse_axis(fields[3]).ok_or_else(malformed)?;

    let pot = match fields.get(POT_FIELD) {
        Some(raw) => parse_pot(raw).ok_or_else(malformed)?,
        None => POT_MIN,
    };

    Ok(Frame::Sample(TelemetrySample {
        mode: LinkMode::from_id(state_id),
        accel: (ax, ay, az),
        pot,
    }))
}

/// Parse one accelerometer axis, rejecting NaN and infinities
fn parse_axis(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse the potentiometer field, clamping into the 10-bit ADC range
fn parse_pot(raw: &str) -> Option<u16> {
    let value: i64 = raw.parse().ok()?;
    Some(value.clamp(POT_MIN as i64, POT_MAX as i64) as u16)
}
