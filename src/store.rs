//! # Telemetry Store
//!
//! Single-writer, multi-reader snapshot of the link state.
//!
//! The link task owns the [`TelemetryStore`] and publishes whole [`LinkStatus`]
//! values; consumers hold cheap [`TelemetryReader`] clones and read the latest
//! snapshot once per rendered frame. Readers never see a half-applied update,
//! and there is no history: a reader only ever sees the newest value.

use tokio::sync::watch;
use tokio::time::{Duration, Instant};

use crate::link::machine::LinkPhase;
use crate::protocol::{LinkMode, TelemetrySample};

/// Link state as seen by consumers
#[derive(Debug, Clone, PartialEq)]
pub struct LinkStatus {
    /// Lifecycle phase of the link
    pub phase: LinkPhase,

    /// Mode reported by the most recent sample
    pub mode: LinkMode,

    /// True while the peer reports a non-zero state
    pub connected: bool,

    /// Last transport error, if any
    pub last_error: Option<String>,

    /// Most recent telemetry sample
    pub last_sample: Option<TelemetrySample>,

    /// When the disconnect grace period runs out
    pub grace_deadline: Option<Instant>,

    /// Heartbeats written to the peer
    pub heartbeats_sent: u64,

    /// Lines received, including `"?"` and malformed ones
    pub lines_received: u64,

    /// Lines that failed to decode
    pub malformed_frames: u64,
}

impl LinkStatus {
    /// Status of a link that is not running
    pub fn idle() -> Self {
        Self {
            phase: LinkPhase::Idle,
            mode: LinkMode::Connecting,
            connected: false,
            last_error: None,
            last_sample: None,
            grace_deadline: None,
            heartbeats_sent: 0,
            lines_received: 0,
            malformed_frames: 0,
        }
    }

    /// Status of a freshly started link
    pub fn connecting() -> Self {
        Self {
            phase: LinkPhase::Connecting,
            ..Self::idle()
        }
    }

    /// Status of a link whose transport failed to open
    pub fn open_failed(error: impl Into<String>) -> Self {
        Self {
            last_error: Some(error.into()),
            ..Self::connecting()
        }
    }

    /// Time left in the disconnect grace period
    pub fn grace_remaining(&self, now: Instant) -> Option<Duration> {
        self.grace_deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// One-line status text for display
    ///
    /// # Examples
    ///
    /// ```
    /// use grove_link::store::LinkStatus;
    /// use tokio::time::Instant;
    ///
    /// assert_eq!(LinkStatus::connecting().describe(Instant::now()), "Connecting");
    /// ```
    pub fn describe(&self, now: Instant) -> String {
        match self.phase {
            LinkPhase::Idle => "Idle".to_string(),
            LinkPhase::Connecting => "Connecting".to_string(),
            LinkPhase::Linked => format!("Linked ({})", self.mode.display_name()),
            LinkPhase::DisconnectedGrace { .. } => {
                let remaining = self.grace_remaining(now).unwrap_or_default();
                format!("Disconnected ({:.1}s remaining)", remaining.as_secs_f64())
            }
        }
    }
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self::idle()
    }
}

/// Write side of the store, owned by the link task
#[derive(Debug)]
pub struct TelemetryStore {
    tx: watch::Sender<LinkStatus>,
}

impl TelemetryStore {
    pub fn new(initial: LinkStatus) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Apply `update` to the current status and publish the result atomically
    pub fn publish<F>(&self, update: F)
    where
        F: FnOnce(&mut LinkStatus),
    {
        self.tx.send_modify(update);
    }

    /// Copy of the current status
    pub fn snapshot(&self) -> LinkStatus {
        self.tx.borrow().clone()
    }

    /// New read handle
    pub fn reader(&self) -> TelemetryReader {
        TelemetryReader {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read side of the store
#[derive(Debug, Clone)]
pub struct TelemetryReader {
    rx: watch::Receiver<LinkStatus>,
}

impl TelemetryReader {
    /// Copy of the latest status. Never blocks on I/O.
    pub fn snapshot(&self) -> LinkStatus {
        self.rx.borrow().clone()
    }

    /// Latest telemetry sample, if any has arrived
    pub fn latest_sample(&self) -> Option<TelemetrySample> {
        self.rx.borrow().last_sample
    }

    /// Wait until the writer publishes a new status
    ///
    /// Returns `false` once the writer is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_and_connecting() {
        let idle = LinkStatus::idle();
        assert_eq!(idle.phase, LinkPhase::Idle);
        assert!(!idle.connected);
        assert!(idle.last_sample.is_none());

        let connecting = LinkStatus::connecting();
        assert_eq!(connecting.phase, LinkPhase::Connecting);
        assert_eq!(connecting.mode, LinkMode::Connecting);
    }

    #[test]
    fn test_open_failed_stays_connecting() {
        let status = LinkStatus::open_failed("no such device");
        assert_eq!(status.phase, LinkPhase::Connecting);
        assert_eq!(status.last_error.as_deref(), Some("no such device"));
        assert!(!status.connected);
    }

    #[test]
    fn test_publish_is_visible_to_readers() {
        let store = TelemetryStore::new(LinkStatus::connecting());
        let reader = store.reader();
        let sample = TelemetrySample::new(LinkMode::Drawing, (0.1, 0.2, 0.3), 42);

        store.publish(|status| {
            status.phase = LinkPhase::Linked;
            status.mode = sample.mode;
            status.connected = true;
            status.last_sample = Some(sample);
        });

        let snapshot = reader.snapshot();
        assert!(snapshot.connected);
        assert_eq!(snapshot.last_sample, Some(sample));
        assert_eq!(reader.latest_sample(), Some(sample));
        assert_eq!(store.snapshot(), snapshot);
    }

    #[test]
    fn test_describe() {
        let now = Instant::now();
        let mut status = LinkStatus::connecting();
        assert_eq!(status.describe(now), "Connecting");

        status.phase = LinkPhase::Linked;
        status.mode = LinkMode::Erasing;
        assert_eq!(status.describe(now), "Linked (ERASING (Active))");

        status.phase = LinkPhase::DisconnectedGrace { since: now };
        status.grace_deadline = Some(now + Duration::from_millis(3400));
        assert_eq!(status.describe(now), "Disconnected (3.4s remaining)");
        assert_eq!(
            status.describe(now + Duration::from_secs(10)),
            "Disconnected (0.0s remaining)"
        );

        assert_eq!(LinkStatus::idle().describe(now), "Idle");
    }

    #[tokio::test]
    async fn test_reader_sees_changes_and_writer_drop() {
        let store = TelemetryStore::new(LinkStatus::connecting());
        let mut reader = store.reader();

        store.publish(|status| status.heartbeats_sent += 1);
        assert!(reader.changed().await);
        assert_eq!(reader.snapshot().heartbeats_sent, 1);

        drop(store);
        assert!(!reader.changed().await);
    }

    #[test]
    fn test_reader_outlives_writer() {
        let store = TelemetryStore::new(LinkStatus::connecting());
        let reader = store.reader();
        store.publish(|status| status.lines_received = 7);
        drop(store);

        assert_eq!(reader.snapshot().lines_received, 7);
    }
}
