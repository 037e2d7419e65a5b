//! # Wire Protocol Constants and Types
//!
//! Core definitions for the line-oriented telemetry protocol spoken by the
//! controller board.
//!
//! ```text
//! Host -> Peer:  "!"                               (heartbeat, at most once per second)
//! Peer -> Host:  "?"                               (alive, host not confirmed yet)
//!                "{state};{ax};{ay};{az}[;{pot}]"   (telemetry frame)
//! ```

use serde::Serialize;

/// Heartbeat byte sent by the host
pub const HEARTBEAT_BYTE: u8 = b'!';

/// Line sent by the peer while it has not seen a heartbeat
pub const UNCONFIRMED_LINE: &str = "?";

/// Field separator inside a telemetry frame
pub const FIELD_SEPARATOR: char = ';';

/// Minimum number of fields in a telemetry frame (state + 3 axes)
pub const MIN_FIELDS: usize = 4;

/// Index of the optional potentiometer field; later fields are ignored
pub const POT_FIELD: usize = 4;

/// Potentiometer range (10-bit ADC: 0-1023)
pub const POT_MIN: u16 = 0;
pub const POT_MAX: u16 = 1023;

/// Peer-reported operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LinkMode {
    /// State 0: peer has no confirmed link to the host
    Connecting,
    /// State 1: cursor moves, nothing is drawn
    Neutral,
    /// State 2: cursor draws
    Drawing,
    /// State 3: cursor erases
    Erasing,
    /// Any other state id, kept for forward compatibility
    Unknown(u32),
}

impl LinkMode {
    /// Map a wire state id to a mode
    ///
    /// Ids outside `0..=3` map to [`LinkMode::Unknown`] instead of being rejected.
    ///
    /// # Examples
    ///
    /// ```
    /// use grove_link::protocol::LinkMode;
    ///
    /// assert_eq!(LinkMode::from_id(2), LinkMode::Drawing);
    /// assert_eq!(LinkMode::from_id(9), LinkMode::Unknown(9));
    /// ```
    pub fn from_id(id: u32) -> Self {
        match id {
            0 => Self::Connecting,
            1 => Self::Neutral,
            2 => Self::Drawing,
            3 => Self::Erasing,
            other => Self::Unknown(other),
        }
    }

    /// Wire state id of this mode
    pub fn id(&self) -> u32 {
        match self {
            Self::Connecting => 0,
            Self::Neutral => 1,
            Self::Drawing => 2,
            Self::Erasing => 3,
            Self::Unknown(id) => *id,
        }
    }

    /// Human-readable name shown by consumers
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Connecting => "CONNECTING...",
            Self::Neutral => "NEUTRAL (Moving)",
            Self::Drawing => "DRAWING (Active)",
            Self::Erasing => "ERASING (Active)",
            Self::Unknown(_) => "UNKNOWN",
        }
    }

    /// True for every mode except [`LinkMode::Connecting`]
    pub fn is_linked(&self) -> bool {
        !matches!(self, Self::Connecting)
    }
}

impl std::fmt::Display for LinkMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// One decoded telemetry frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TelemetrySample {
    /// Peer-reported mode
    pub mode: LinkMode,

    /// Accelerometer reading (x, y, z) in g
    pub accel: (f64, f64, f64),

    /// Potentiometer reading (0-1023)
    pub pot: u16,
}

impl TelemetrySample {
    pub fn new(mode: LinkMode, accel: (f64, f64, f64), pot: u16) -> Self {
        Self {
            mode,
            accel,
            pot: pot.min(POT_MAX),
        }
    }
}

/// Result of decoding one line
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Frame {
    /// `"?"` or a blank line: peer is alive but has no data for us
    PeerAlive,
    /// A telemetry frame
    Sample(TelemetrySample),
}
