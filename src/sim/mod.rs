//! # Simulated Peer Module
//!
//! In-process stand-in for the controller board, used to run the link without
//! hardware and as the conformance fixture for the link tests.
//!
//! The simulated board behaves like the firmware:
//! - Sends `"?"` until it receives a heartbeat byte
//! - Sends a data frame every 50ms once confirmed
//! - Falls back to `"?"` after 3s without a heartbeat
//! - Cycles its mode 1 -> 2 -> 3 -> 1 on each button press

pub mod controls;
pub mod peer;

pub use controls::PeerControls;
pub use peer::{PeerSettings, PeerState, SimulatedPeer};
