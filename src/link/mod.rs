//! # Link Module
//!
//! Connection lifecycle between the host and the controller board.
//!
//! This module handles:
//! - Heartbeat keep-alive (one `!` byte per second)
//! - Bounded-timeout line reads and frame decoding
//! - Connecting / Linked / disconnect-grace state machine
//! - Publishing every change into the telemetry store
//! - Cancellable background task with guaranteed transport release

pub mod machine;
mod task;

pub use machine::{HeartbeatClock, LinkMachine, LinkPhase, Transition};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::warn;

use crate::config::LinkConfig;
use crate::serial::{Endpoint, Transport};
use crate::store::{LinkStatus, TelemetryReader, TelemetryStore};

/// Default pause between loop iterations
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Default wait after opening the port before the first heartbeat
pub const DEFAULT_OPEN_SETTLE: Duration = Duration::from_secs(2);

/// Timing of the link loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSettings {
    /// Minimum spacing between heartbeats
    pub heartbeat_interval: Duration,

    /// Pause between loop iterations
    pub poll_interval: Duration,

    /// How long a disconnected peer may take to come back
    pub grace_period: Duration,

    /// Wait after opening the transport before the loop starts
    pub open_settle: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: machine::DEFAULT_HEARTBEAT_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            grace_period: machine::DEFAULT_GRACE_PERIOD,
            open_settle: DEFAULT_OPEN_SETTLE,
        }
    }
}

impl From<&LinkConfig> for LinkSettings {
    fn from(config: &LinkConfig) -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(config.heartbeat_interval_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            grace_period: Duration::from_millis(config.grace_period_ms),
            open_settle: Duration::from_millis(config.open_settle_ms),
        }
    }
}

/// Why a link task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkExit {
    /// A stop was requested
    Stopped,
    /// The peer stayed disconnected for the whole grace period
    GraceExpired {
        disconnected_at: Instant,
        expired_at: Instant,
    },
    /// The link task panicked
    Aborted(String),
}

impl std::fmt::Display for LinkExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::GraceExpired {
                disconnected_at,
                expired_at,
            } => write!(
                f,
                "grace expired after {:.1}s",
                expired_at.saturating_duration_since(*disconnected_at).as_secs_f64()
            ),
            Self::Aborted(reason) => write!(f, "aborted: {}", reason),
        }
    }
}

/// Handle to a running link task
///
/// Dropping the handle also stops the task.
#[derive(Debug)]
pub struct LinkHandle {
    endpoint: Endpoint,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<LinkExit>,
    reader: TelemetryReader,
}

impl LinkHandle {
    /// Start a link over an already opened transport
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use grove_link::link::{LinkHandle, LinkSettings};
    /// use grove_link::serial::{open_serial, Endpoint};
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let endpoint = Endpoint::new("/dev/ttyACM0", 9600);
    ///     let transport = open_serial(&endpoint)?;
    ///     let link = LinkHandle::spawn(transport, endpoint, LinkSettings::default());
    ///
    ///     println!("{:?}", link.status().mode);
    ///     link.stop().await;
    ///     Ok(())
    /// }
    /// ```
    pub fn spawn<T>(transport: T, endpoint: Endpoint, settings: LinkSettings) -> Self
    where
        T: Transport + 'static,
    {
        let store = TelemetryStore::new(LinkStatus::connecting());
        let reader = store.reader();
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(task::run_link(
            transport,
            endpoint.clone(),
            settings,
            store,
            stop_rx,
        ));

        Self {
            endpoint,
            stop_tx,
            task,
            reader,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Snapshot of the current link status
    pub fn status(&self) -> LinkStatus {
        self.reader.snapshot()
    }

    /// Read handle for consumers
    pub fn reader(&self) -> TelemetryReader {
        self.reader.clone()
    }

    /// True once the task has ended on its own or after a stop
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Ask the task to stop and wait for it to release the transport
    pub async fn stop(self) -> LinkExit {
        // The receiver is gone if the task already ended
        let _ = self.stop_tx.send(true);
        self.join().await
    }

    /// Wait for the task to end without stopping it
    pub async fn join(self) -> LinkExit {
        match self.task.await {
            Ok(exit) => exit,
            Err(e) => {
                warn!("Link task on {} failed: {}", self.endpoint.name(), e);
                LinkExit::Aborted(e.to_string())
            }
        }
    }
}
