//! Simulated controller board
//!
//! [`PeerState`] is the deterministic core: it is told the current time and
//! answers with the next line, if one is due. [`SimulatedPeer`] wraps it into
//! a [`Transport`] running on the tokio clock.

use async_trait::async_trait;
use std::io;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, info};

use super::controls::PeerControls;
use crate::config::SimulatorConfig;
use crate::protocol::types::HEARTBEAT_BYTE;
use crate::protocol::{encode_sample, encode_unconfirmed, LinkMode, TelemetrySample};
use crate::serial::Transport;

/// Default spacing between emitted lines
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(50);

/// Default time without heartbeat before the peer stops trusting the host
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(3);

/// Timing of the simulated board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerSettings {
    pub frame_interval: Duration,
    pub heartbeat_timeout: Duration,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            frame_interval: DEFAULT_FRAME_INTERVAL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
        }
    }
}

impl From<&SimulatorConfig> for PeerSettings {
    fn from(config: &SimulatorConfig) -> Self {
        Self {
            frame_interval: Duration::from_millis(config.frame_interval_ms),
            heartbeat_timeout: Duration::from_millis(config.heartbeat_timeout_ms),
        }
    }
}

/// Deterministic board logic
#[derive(Debug, Clone)]
pub struct PeerState {
    settings: PeerSettings,
    confirmed: bool,
    last_heartbeat: Instant,
    last_frame: Option<Instant>,
}

impl PeerState {
    /// New board, powered on at `now` and not yet confirmed by a heartbeat
    pub fn new(settings: PeerSettings, now: Instant) -> Self {
        Self {
            settings,
            confirmed: false,
            last_heartbeat: now,
            last_frame: None,
        }
    }

    /// True while the host is considered alive
    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    /// Record a heartbeat byte
    ///
    /// The first heartbeat after an unconfirmed period makes the next line a
    /// data frame, without waiting for the frame interval.
    pub fn on_heartbeat(&mut self, now: Instant) {
        self.last_heartbeat = now;
        if !self.confirmed {
            self.confirmed = true;
            self.last_frame = None;
        }
    }

    /// When the next line is due
    pub fn next_frame_at(&self, now: Instant) -> Instant {
        match self.last_frame {
            None => now,
            Some(sent) => sent + self.settings.frame_interval,
        }
    }

    /// Produce the line due at `now`, if any
    pub fn poll(&mut self, now: Instant, controls: &PeerControls) -> Option<String> {
        if self.confirmed
            && now.saturating_duration_since(self.last_heartbeat) > self.settings.heartbeat_timeout
        {
            info!("Simulated peer lost host heartbeat");
            self.confirmed = false;
        }

        if now < self.next_frame_at(now) {
            return None;
        }
        self.last_frame = Some(now);

        if !self.confirmed {
            return Some(encode_unconfirmed());
        }

        let sample = controls.with(|c| {
            c.apply_button();
            let state_id = c.forced_state.unwrap_or(c.state_id);
            TelemetrySample::new(LinkMode::from_id(state_id), c.accel, c.pot)
        });
        Some(encode_sample(&sample))
    }
}

/// In-process stand-in for the controller board
///
/// # Examples
///
/// ```
/// use grove_link::serial::Transport;
/// use grove_link::sim::{PeerSettings, SimulatedPeer};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> std::io::Result<()> {
///     let mut peer = SimulatedPeer::new(PeerSettings::default());
///     let controls = peer.controls();
///
///     peer.write_all(b"!").await?;
///     let line = peer.read_line(Duration::from_millis(100)).await?;
///     assert_eq!(line.as_deref(), Some("1;0.00;0.00;9.80;0\r\n"));
///
///     controls.press_button();
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct SimulatedPeer {
    state: PeerState,
    controls: PeerControls,
}

impl SimulatedPeer {
    pub fn new(settings: PeerSettings) -> Self {
        Self::with_controls(settings, PeerControls::new())
    }

    pub fn with_controls(settings: PeerSettings, controls: PeerControls) -> Self {
        info!("Simulated peer started");
        Self {
            state: PeerState::new(settings, Instant::now()),
            controls,
        }
    }

    /// Driver handle for this peer
    pub fn controls(&self) -> PeerControls {
        self.controls.clone()
    }

    fn check_plugged(&self) -> io::Result<()> {
        if self.controls.with(|c| c.unplugged) {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "simulated device unplugged"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for SimulatedPeer {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.check_plugged()?;
        let now = Instant::now();
        for _ in data.iter().filter(|&&b| b == HEARTBEAT_BYTE) {
            if !self.state.is_confirmed() {
                info!("Simulated peer confirmed host");
            }
            self.state.on_heartbeat(now);
            self.controls.with(|c| c.record_heartbeat(now));
        }
        Ok(())
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.check_plugged()
    }

    async fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        let deadline = Instant::now() + timeout;

        loop {
            self.check_plugged()?;

            if let Some(line) = self.controls.with(|c| c.injected.pop_front()) {
                debug!("Simulated peer sending injected line {:?}", line);
                return Ok(Some(line));
            }

            let now = Instant::now();
            if let Some(line) = self.state.poll(now, &self.controls) {
                return Ok(Some(line));
            }
            if now >= deadline {
                return Ok(None);
            }

            sleep_until(self.state.next_frame_at(now).min(deadline)).await;
        }
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.controls.with(|c| c.closed = true);
        Ok(())
    }
}

impl Drop for SimulatedPeer {
    fn drop(&mut self) {
        self.controls.with(|c| c.closed = true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{parse_frame, Frame};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn state_of(line: &str) -> u32 {
        match parse_frame(line) {
            Ok(Frame::Sample(sample)) => sample.mode.id(),
            other => panic!("Expected data line, got {:?} for {:?}", other, line),
        }
    }

    #[test]
    fn test_unconfirmed_peer_sends_question_marks() {
        let t0 = Instant::now();
        let controls = PeerControls::new();
        let mut peer = PeerState::new(PeerSettings::default(), t0);

        let mut lines = Vec::new();
        let mut t = t0;
        while t <= t0 + ms(2100) {
            if let Some(line) = peer.poll(t, &controls) {
                lines.push(line);
            }
            t += ms(10);
        }

        assert!(lines.len() >= 40);
        assert!(lines.iter().all(|line| line == "?\r\n"));
    }

    #[test]
    fn test_frame_cadence() {
        let t0 = Instant::now();
        let controls = PeerControls::new();
        let mut peer = PeerState::new(PeerSettings::default(), t0);

        assert!(peer.poll(t0, &controls).is_some());
        assert!(peer.poll(t0 + ms(49), &controls).is_none());
        assert!(peer.poll(t0 + ms(50), &controls).is_some());
        assert_eq!(peer.next_frame_at(t0 + ms(60)), t0 + ms(100));
    }

    #[test]
    fn test_heartbeat_resumes_data_immediately() {
        let t0 = Instant::now();
        let controls = PeerControls::new();
        let mut peer = PeerState::new(PeerSettings::default(), t0);

        assert_eq!(peer.poll(t0 + ms(2100), &controls).as_deref(), Some("?\r\n"));

        let t_hb = t0 + ms(2110);
        peer.on_heartbeat(t_hb);
        let line = peer.poll(t_hb, &controls).expect("data line right after heartbeat");
        assert_eq!(state_of(&line), 1);
        assert_eq!(line, "1;0.00;0.00;9.80;0\r\n");
    }

    #[test]
    fn test_heartbeat_timeout_reverts_to_unconfirmed() {
        let t0 = Instant::now();
        let controls = PeerControls::new();
        let mut peer = PeerState::new(PeerSettings::default(), t0);
        peer.on_heartbeat(t0);

        let line = peer.poll(t0 + ms(3000), &controls).unwrap();
        assert_eq!(state_of(&line), 1);
        assert!(peer.is_confirmed());

        assert_eq!(peer.poll(t0 + ms(3060), &controls).as_deref(), Some("?\r\n"));
        assert!(!peer.is_confirmed());
    }

    #[test]
    fn test_button_presses_cycle_state() {
        let t0 = Instant::now();
        let controls = PeerControls::new();
        let mut peer = PeerState::new(PeerSettings::default(), t0);
        peer.on_heartbeat(t0);

        let mut t = t0;
        let mut states = vec![state_of(&peer.poll(t, &controls).unwrap())];
        for _ in 0..3 {
            controls.press_button();
            t += ms(50);
            states.push(state_of(&peer.poll(t, &controls).unwrap()));
        }
        assert_eq!(states, vec![1, 2, 3, 1]);
    }

    #[test]
    fn test_button_not_applied_while_unconfirmed() {
        let t0 = Instant::now();
        let controls = PeerControls::new();
        let mut peer = PeerState::new(PeerSettings::default(), t0);

        controls.press_button();
        assert_eq!(peer.poll(t0, &controls).as_deref(), Some("?\r\n"));
        assert_eq!(controls.state_id(), 1);

        peer.on_heartbeat(t0 + ms(10));
        let line = peer.poll(t0 + ms(10), &controls).unwrap();
        assert_eq!(state_of(&line), 2);
    }

    #[test]
    fn test_forced_state_overrides_reported_state() {
        let t0 = Instant::now();
        let controls = PeerControls::new();
        let mut peer = PeerState::new(PeerSettings::default(), t0);
        peer.on_heartbeat(t0);

        controls.force_state(Some(0));
        assert_eq!(state_of(&peer.poll(t0, &controls).unwrap()), 0);
        controls.force_state(None);
        assert_eq!(state_of(&peer.poll(t0 + ms(50), &controls).unwrap()), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_heartbeat_handshake() {
        let mut peer = SimulatedPeer::new(PeerSettings::default());
        let started = Instant::now();

        // No heartbeat for 2.1s: only "?" lines
        while started.elapsed() < ms(2100) {
            let line = peer.read_line(ms(100)).await.unwrap();
            if let Some(line) = line {
                assert_eq!(line, "?\r\n");
            }
        }

        peer.write_all(b"!").await.unwrap();
        let sent = Instant::now();
        let line = peer.read_line(ms(50)).await.unwrap().expect("data within 50ms");
        assert!(sent.elapsed() <= ms(50));
        assert_eq!(state_of(&line), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_times_out_between_frames() {
        let mut peer = SimulatedPeer::new(PeerSettings::default());
        assert!(peer.read_line(ms(10)).await.unwrap().is_some());

        let started = Instant::now();
        assert_eq!(peer.read_line(ms(20)).await.unwrap(), None);
        assert_eq!(started.elapsed(), ms(20));
    }

    #[tokio::test]
    async fn test_injected_lines_come_first() {
        let mut peer = SimulatedPeer::new(PeerSettings::default());
        let controls = peer.controls();
        controls.inject_line("garbage\r\n");

        let line = peer.read_line(ms(100)).await.unwrap();
        assert_eq!(line.as_deref(), Some("garbage\r\n"));
    }

    #[tokio::test]
    async fn test_unplugged_peer_fails_io() {
        let mut peer = SimulatedPeer::new(PeerSettings::default());
        let controls = peer.controls();
        controls.unplug();

        let err = peer.read_line(ms(100)).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(peer.write_all(b"!").await.is_err());
    }

    #[tokio::test]
    async fn test_heartbeats_recorded_and_close_flag() {
        let mut peer = SimulatedPeer::new(PeerSettings::default());
        let controls = peer.controls();

        peer.write_all(b"!").await.unwrap();
        assert_eq!(controls.heartbeat_times().len(), 1);
        assert_eq!(controls.heartbeat_count(), 1);

        drop(peer);
        assert!(controls.is_closed());
    }
}
