//! # Telemetry Protocol Module
//!
//! Line-oriented ASCII protocol between the host and the controller board.
//!
//! This module handles:
//! - Telemetry frame decoding (`state;ax;ay;az[;pot]`)
//! - Mode mapping and display names
//! - Frame encoding for the simulated peer
//! - Heartbeat and "unconfirmed" markers

pub mod types;
pub mod encoder;
pub mod decoder;

pub use decoder::{parse_frame, FrameError};
pub use encoder::{encode_sample, encode_unconfirmed, HEARTBEAT};
pub use types::{Frame, LinkMode, TelemetrySample};
