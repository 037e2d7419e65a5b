//! # Link State Machine
//!
//! Pure connection lifecycle logic. Every method takes the current time, so the
//! transitions can be driven deterministically from tests.
//!
//! ```text
//!            start                 state != 0
//!   Idle ───────────► Connecting ──────────────► Linked
//!    ▲                    │                       │  ▲
//!    │        I/O error   │      state == 0 or    │  │ state != 0
//!    │                    ▼      I/O error        ▼  │
//!    └──── grace expired ─── DisconnectedGrace ◄─────┘
//! ```
//!
//! A stop request returns to `Idle` from any phase.

use tokio::time::{Duration, Instant};

use crate::protocol::TelemetrySample;

/// Default heartbeat interval
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Default disconnect grace period
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Lifecycle phase of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    /// No link running
    Idle,
    /// Transport open, waiting for a non-zero state from the peer
    Connecting,
    /// Peer reports a non-zero state
    Linked,
    /// Peer dropped out; reconnection is accepted until the grace period ends
    DisconnectedGrace { since: Instant },
}

impl LinkPhase {
    pub fn is_linked(&self) -> bool {
        matches!(self, Self::Linked)
    }
}

/// Transition reported by [`LinkMachine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Entered `Linked`
    Linked,
    /// Entered `DisconnectedGrace`
    Disconnected { since: Instant },
    /// Grace period ran out; the link is `Idle`
    GraceExpired { since: Instant, at: Instant },
}

/// Heartbeat timer, owned by the link task
#[derive(Debug, Clone)]
pub struct HeartbeatClock {
    interval: Duration,
    last_sent: Option<Instant>,
}

impl HeartbeatClock {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
        }
    }

    /// True if no heartbeat was sent yet, or more than one interval ago
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_sent {
            None => true,
            Some(sent) => now.saturating_duration_since(sent) > self.interval,
        }
    }

    pub fn mark_sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
    }

    /// Time until a full interval has passed since the last heartbeat
    pub fn until_due(&self, now: Instant) -> Duration {
        match self.last_sent {
            None => Duration::ZERO,
            Some(sent) => (sent + self.interval).saturating_duration_since(now),
        }
    }
}

/// Connection lifecycle state machine
#[derive(Debug, Clone)]
pub struct LinkMachine {
    phase: LinkPhase,
    grace_period: Duration,
}

impl LinkMachine {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            phase: LinkPhase::Idle,
            grace_period,
        }
    }

    pub fn phase(&self) -> LinkPhase {
        self.phase
    }

    /// Idle -> Connecting. Also resets any other phase to a fresh Connecting.
    pub fn start(&mut self) {
        self.phase = LinkPhase::Connecting;
    }

    /// Any phase -> Idle
    pub fn stop(&mut self) {
        self.phase = LinkPhase::Idle;
    }

    /// Feed a decoded sample
    pub fn on_sample(&mut self, sample: &TelemetrySample, now: Instant) -> Option<Transition> {
        match (self.phase, sample.mode.is_linked()) {
            (LinkPhase::Connecting | LinkPhase::DisconnectedGrace { .. }, true) => {
                self.phase = LinkPhase::Linked;
                Some(Transition::Linked)
            }
            (LinkPhase::Linked, false) => Some(self.enter_grace(now)),
            _ => None,
        }
    }

    /// Feed a transport failure
    ///
    /// Treated exactly like the peer reporting state 0, except that it also
    /// ends a `Connecting` phase. A running grace clock is not restarted.
    pub fn on_io_error(&mut self, now: Instant) -> Option<Transition> {
        match self.phase {
            LinkPhase::Connecting | LinkPhase::Linked => Some(self.enter_grace(now)),
            LinkPhase::DisconnectedGrace { .. } | LinkPhase::Idle => None,
        }
    }

    /// Check the grace clock
    pub fn poll_grace(&mut self, now: Instant) -> Option<Transition> {
        match self.phase {
            LinkPhase::DisconnectedGrace { since }
                if now.saturating_duration_since(since) >= self.grace_period =>
            {
                self.phase = LinkPhase::Idle;
                Some(Transition::GraceExpired { since, at: now })
            }
            _ => None,
        }
    }

    /// When the running grace period ends
    pub fn grace_deadline(&self) -> Option<Instant> {
        match self.phase {
            LinkPhase::DisconnectedGrace { since } => Some(since + self.grace_period),
            _ => None,
        }
    }

    fn enter_grace(&mut self, now: Instant) -> Transition {
        self.phase = LinkPhase::DisconnectedGrace { since: now };
        Transition::Disconnected { since: now }
    }
}
