//! # Grove Link Library
//!
//! Serial link to a Grove accelerometer/potentiometer cursor controller.
//!
//! This library provides the host side of the link: the line protocol, the
//! heartbeat and reconnect state machine, a thread-safe telemetry snapshot for
//! consumers, and a simulated board for running everything without hardware.

pub mod config;
pub mod error;
pub mod protocol;
pub mod serial;
pub mod link;
pub mod store;
pub mod sim;
pub mod session;
