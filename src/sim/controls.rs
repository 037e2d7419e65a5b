//! Shared driver handle for the simulated peer
//!
//! Stands in for the board's physical inputs (button, accelerometer,
//! potentiometer) plus a few faults a real board can produce.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::time::Instant;

use crate::protocol::types::{POT_MAX, POT_MIN};

/// Accelerometer step of one key press in the desktop simulation
pub const ACCEL_STEP: f64 = 0.1;

/// Potentiometer step of one key press in the desktop simulation
pub const POT_STEP: i32 = 10;

/// Resting accelerometer reading (board lying flat)
pub const RESTING_ACCEL: (f64, f64, f64) = (0.0, 0.0, 9.8);

/// Heartbeat receive times kept for inspection
pub const HEARTBEAT_LOG_LEN: usize = 64;

#[derive(Debug)]
pub(crate) struct ControlState {
    pub(crate) state_id: u32,
    pub(crate) accel: (f64, f64, f64),
    pub(crate) pot: u16,
    pub(crate) button_pressed: bool,
    pub(crate) forced_state: Option<u32>,
    pub(crate) injected: VecDeque<String>,
    pub(crate) unplugged: bool,
    pub(crate) closed: bool,
    pub(crate) heartbeats: VecDeque<Instant>,
    pub(crate) heartbeat_count: u64,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            state_id: 1,
            accel: RESTING_ACCEL,
            pot: POT_MIN,
            button_pressed: false,
            forced_state: None,
            injected: VecDeque::new(),
            unplugged: false,
            closed: false,
            heartbeats: VecDeque::with_capacity(HEARTBEAT_LOG_LEN),
            heartbeat_count: 0,
        }
    }
}

impl ControlState {
    /// Apply a pending button press: 1 -> 2 -> 3 -> 1
    pub(crate) fn apply_button(&mut self) {
        if self.button_pressed {
            self.state_id = match self.state_id {
                1 => 2,
                2 => 3,
                _ => 1,
            };
            self.button_pressed = false;
        }
    }

    /// Log a received heartbeat, dropping the oldest entry once full
    pub(crate) fn record_heartbeat(&mut self, at: Instant) {
        if self.heartbeats.len() == HEARTBEAT_LOG_LEN {
            self.heartbeats.pop_front();
        }
        self.heartbeats.push_back(at);
        self.heartbeat_count += 1;
    }
}

/// Cloneable handle driving a [`super::SimulatedPeer`]
#[derive(Debug, Clone, Default)]
pub struct PeerControls {
    inner: Arc<Mutex<ControlState>>,
}

impl PeerControls {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut ControlState) -> R) -> R {
        let mut state = self.inner.lock();
        f(&mut *state)
    }

    /// Press the mode button once. Applied with the next data frame.
    pub fn press_button(&self) {
        self.with(|c| c.button_pressed = true);
    }

    /// Current state id of the board (1-3)
    pub fn state_id(&self) -> u32 {
        self.with(|c| c.state_id)
    }

    pub fn set_accel(&self, accel: (f64, f64, f64)) {
        self.with(|c| c.accel = accel);
    }

    /// Tilt the board by the given deltas
    pub fn nudge_accel(&self, dx: f64, dy: f64, dz: f64) {
        self.with(|c| {
            c.accel.0 += dx;
            c.accel.1 += dy;
            c.accel.2 += dz;
        });
    }

    pub fn accel(&self) -> (f64, f64, f64) {
        self.with(|c| c.accel)
    }

    /// Set the potentiometer, clamped to 0-1023
    pub fn set_pot(&self, pot: u16) {
        self.with(|c| c.pot = pot.min(POT_MAX));
    }

    /// Turn the potentiometer by `delta`, clamped to 0-1023
    pub fn adjust_pot(&self, delta: i32) {
        self.with(|c| {
            let value = (c.pot as i32 + delta).clamp(POT_MIN as i32, POT_MAX as i32);
            c.pot = value as u16;
        });
    }

    pub fn pot(&self) -> u16 {
        self.with(|c| c.pot)
    }

    /// Report `state` in data frames instead of the board state (`None` clears)
    pub fn force_state(&self, state: Option<u32>) {
        self.with(|c| c.forced_state = state);
    }

    /// Queue a raw line, delivered before the next generated frame
    pub fn inject_line(&self, line: impl Into<String>) {
        self.with(|c| c.injected.push_back(line.into()));
    }

    /// Make every further read and write fail, as after a cable pull
    pub fn unplug(&self) {
        self.with(|c| c.unplugged = true);
    }

    /// True once the transport was shut down or dropped
    pub fn is_closed(&self) -> bool {
        self.with(|c| c.closed)
    }

    /// When the most recent heartbeat bytes were received, oldest first
    pub fn heartbeat_times(&self) -> Vec<Instant> {
        self.with(|c| c.heartbeats.iter().copied().collect())
    }

    /// Heartbeat bytes received since power-on
    pub fn heartbeat_count(&self) -> u64 {
        self.with(|c| c.heartbeat_count)
    }
}
