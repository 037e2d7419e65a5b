//! Read/heartbeat loop driving the link state machine
//!
//! The loop owns the transport for its whole lifetime and shuts it down on
//! every exit path.

use std::io;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Duration, Instant};
use tracing::{debug, info, warn};

use super::machine::{HeartbeatClock, LinkMachine, Transition};
use super::{LinkExit, LinkSettings};
use crate::error::LinkError;
use crate::protocol::{parse_frame, Frame, FrameError, LinkMode, HEARTBEAT};
use crate::serial::{Endpoint, Transport};
use crate::store::{LinkStatus, TelemetryStore};

/// Shortest read we will ask the transport for
const MIN_READ_BUDGET: Duration = Duration::from_millis(1);

/// Run the link until stopped or until the grace period expires
pub(crate) async fn run_link<T: Transport>(
    mut transport: T,
    endpoint: Endpoint,
    settings: LinkSettings,
    store: TelemetryStore,
    mut stop: watch::Receiver<bool>,
) -> LinkExit {
    let mut link = LinkLoop {
        machine: LinkMachine::new(settings.grace_period),
        heartbeat: HeartbeatClock::new(settings.heartbeat_interval),
        endpoint,
        settings,
        store,
        io_failed: false,
    };

    let exit = link.drive(&mut transport, &mut stop).await;

    if let Err(e) = transport.shutdown().await {
        debug!("Failed to shut down {}: {}", link.endpoint.name(), e);
    }
    drop(transport);

    link.machine.stop();
    link.store.publish(|status| {
        status.phase = link.machine.phase();
        status.connected = false;
        status.grace_deadline = None;
    });

    info!("Link on {} ended: {}", link.endpoint.name(), exit);
    exit
}

/// Resolves once a stop has been requested or the handle is gone
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

struct LinkLoop {
    machine: LinkMachine,
    heartbeat: HeartbeatClock,
    endpoint: Endpoint,
    settings: LinkSettings,
    store: TelemetryStore,
    io_failed: bool,
}

impl LinkLoop {
    async fn drive<T: Transport>(
        &mut self,
        transport: &mut T,
        stop: &mut watch::Receiver<bool>,
    ) -> LinkExit {
        self.machine.start();
        self.store.publish(|status| *status = LinkStatus::connecting());
        info!("Link started on {}", self.endpoint);

        // The board resets when the port opens
        if !self.settings.open_settle.is_zero() {
            tokio::select! {
                biased;
                _ = stop_requested(stop) => return LinkExit::Stopped,
                _ = sleep(self.settings.open_settle) => {}
            }
        }

        loop {
            if let Some(exit) = self.check_grace() {
                return exit;
            }

            let now = Instant::now();
            if self.heartbeat.is_due(now) {
                self.heartbeat.mark_sent(now);
                match self.send_heartbeat(transport).await {
                    Ok(()) => {
                        debug!("Sent heartbeat to {}", self.endpoint.name());
                        self.store.publish(|status| status.heartbeats_sent += 1);
                    }
                    Err(e) => self.on_io_error(e),
                }
            }

            let budget = self.read_budget(Instant::now());
            let read = tokio::select! {
                biased;
                _ = stop_requested(stop) => return LinkExit::Stopped,
                read = transport.read_line(budget) => read,
            };

            match read {
                Ok(Some(line)) => self.on_line(&line),
                Ok(None) => {}
                Err(e) => self.on_io_error(e),
            }

            if let Some(exit) = self.check_grace() {
                return exit;
            }

            tokio::select! {
                biased;
                _ = stop_requested(stop) => return LinkExit::Stopped,
                _ = sleep(self.settings.poll_interval) => {}
            }
        }
    }

    /// Longest read that neither delays the next heartbeat nor the grace check
    fn read_budget(&self, now: Instant) -> Duration {
        let mut budget = self
            .endpoint
            .read_timeout()
            .min(self.heartbeat.until_due(now));
        if let Some(deadline) = self.machine.grace_deadline() {
            budget = budget.min(deadline.saturating_duration_since(now));
        }
        budget.max(MIN_READ_BUDGET)
    }

    async fn send_heartbeat<T: Transport>(&self, transport: &mut T) -> io::Result<()> {
        let write = async {
            transport.write_all(HEARTBEAT).await?;
            transport.flush().await
        };

        match timeout(self.endpoint.read_timeout(), write).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "heartbeat write timed out",
            )),
        }
    }

    fn on_line(&mut self, line: &str) {
        self.store.publish(|status| status.lines_received += 1);

        match parse_frame(line.trim_end()) {
            Ok(Frame::PeerAlive) => debug!("Peer alive, no data"),
            Ok(Frame::Sample(sample)) => {
                let transition = self.machine.on_sample(&sample, Instant::now());
                if let Some(transition) = transition {
                    self.log_transition(transition);
                }
                if matches!(transition, Some(Transition::Linked)) {
                    self.io_failed = false;
                }

                let phase = self.machine.phase();
                let deadline = self.machine.grace_deadline();
                self.store.publish(|status| {
                    status.phase = phase;
                    status.mode = sample.mode;
                    status.connected = phase.is_linked();
                    status.last_sample = Some(sample);
                    status.grace_deadline = deadline;
                    if phase.is_linked() {
                        status.last_error = None;
                    }
                });
            }
            Err(FrameError::Malformed(raw)) => {
                debug!("Discarding malformed frame {:?}", raw);
                self.store.publish(|status| status.malformed_frames += 1);
            }
        }
    }

    fn on_io_error(&mut self, error: io::Error) {
        if self.io_failed {
            debug!("Transport error on {}: {}", self.endpoint.name(), error);
        } else {
            warn!("Transport error on {}: {}", self.endpoint.name(), error);
            self.io_failed = true;
        }

        let transition = self.machine.on_io_error(Instant::now());
        if let Some(transition) = transition {
            self.log_transition(transition);
        }

        let phase = self.machine.phase();
        let deadline = self.machine.grace_deadline();
        let message = LinkError::TransportIo(error.to_string()).to_string();
        self.store.publish(|status| {
            status.phase = phase;
            status.mode = LinkMode::Connecting;
            status.connected = false;
            status.grace_deadline = deadline;
            status.last_error = Some(message);
        });
    }

    fn check_grace(&mut self) -> Option<LinkExit> {
        match self.machine.poll_grace(Instant::now()) {
            Some(Transition::GraceExpired { since, at }) => {
                self.log_transition(Transition::GraceExpired { since, at });
                Some(LinkExit::GraceExpired {
                    disconnected_at: since,
                    expired_at: at,
                })
            }
            _ => None,
        }
    }

    fn log_transition(&self, transition: Transition) {
        match transition {
            Transition::Linked => info!("Linked to peer on {}", self.endpoint.name()),
            Transition::Disconnected { .. } => info!(
                "Peer on {} disconnected, waiting {:.1}s for it to return",
                self.endpoint.name(),
                self.settings.grace_period.as_secs_f64()
            ),
            Transition::GraceExpired { .. } => {
                warn!("Grace period expired on {}", self.endpoint.name())
            }
        }
    }
}
