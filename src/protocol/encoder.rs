//! # Frame Encoder
//!
//! Produces the lines a controller board writes, as used by the simulated peer.

use super::types::*;

/// Line terminator written by the board (`Serial.println`)
pub const LINE_TERMINATOR: &str = "\r\n";

/// Heartbeat written by the host
pub const HEARTBEAT: &[u8] = &[HEARTBEAT_BYTE];

/// Encode a telemetry sample as a terminated line
///
/// Axes are written with two decimals, matching the board firmware.
///
/// # Examples
///
/// ```
/// use grove_link::protocol::{encode_sample, LinkMode, TelemetrySample};
///
/// let sample = TelemetrySample::new(LinkMode::Neutral, (0.0, -0.25, 9.8), 100);
/// assert_eq!(encode_sample(&sample), "1;0.00;-0.25;9.80;100\r\n");
/// ```
pub fn encode_sample(sample: &TelemetrySample) -> String {
    let (ax, ay, az) = sample.accel;
    format!(
        "{}{sep}{:.2}{sep}{:.2}{sep}{:.2}{sep}{}{}",
        sample.mode.id(),
        ax,
        ay,
        az,
        sample.pot,
        LINE_TERMINATOR,
        sep = FIELD_SEPARATOR,
    )
}

/// Encode the "alive, host not confirmed" line
pub fn encode_unconfirmed() -> String {
    format!("{}{}", UNCONFIRMED_LINE, LINE_TERMINATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decoder::parse_frame;

    #[test]
    fn test_heartbeat_is_single_byte() {
        assert_eq!(HEARTBEAT, b"!");
    }

    #[test]
    fn test_encode_sample_format() {
        let sample = TelemetrySample::new(LinkMode::Erasing, (1.234, -0.006, 9.8), 1023);
        assert_eq!(encode_sample(&sample), "3;1.23;-0.01;9.80;1023\r\n");
    }

    #[test]
    fn test_encoded_sample_decodes() {
        let sample = TelemetrySample::new(LinkMode::Drawing, (0.1, -0.2, 9.81), 512);
        let decoded = parse_frame(&encode_sample(&sample)).unwrap();
        assert_eq!(decoded, Frame::Sample(sample));
    }

    #[test]
    fn test_encode_unconfirmed() {
        assert_eq!(encode_unconfirmed(), "?\r\n");
        assert_eq!(parse_frame(&encode_unconfirmed()), Ok(Frame::PeerAlive));
    }
}
