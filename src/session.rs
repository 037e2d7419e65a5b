//! # Session Controller
//!
//! Picks the endpoint, starts and stops the link, and sends the session back
//! to endpoint selection when the disconnect grace period runs out.

use tracing::{info, warn};

use crate::config::Config;
use crate::error::{LinkError, Result};
use crate::link::{LinkExit, LinkHandle, LinkSettings};
use crate::serial::{self, Endpoint, Transport};
use crate::sim::{PeerControls, PeerSettings, SimulatedPeer};
use crate::store::{LinkStatus, TelemetryReader};

/// One host-side session: at most one link at a time
#[derive(Debug)]
pub struct Session {
    config: Config,
    link: Option<LinkHandle>,
    peer: Option<PeerControls>,
    open_failure: Option<LinkStatus>,
}

impl Session {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            link: None,
            peer: None,
            open_failure: None,
        }
    }

    /// Endpoint described by the configuration file
    pub fn configured_endpoint(&self) -> Endpoint {
        Endpoint::from_config(&self.config.serial)
    }

    /// Select an endpoint, or `None` to go back to idle
    ///
    /// # Errors
    ///
    /// - `AlreadyRunning` if a link is active; stop it first
    /// - `TransportOpen` if the port cannot be opened. The failure is kept in
    ///   [`Session::status`] and the caller decides whether to retry.
    pub async fn select(&mut self, endpoint: Option<Endpoint>) -> Result<()> {
        let endpoint = match endpoint {
            Some(endpoint) => endpoint,
            None => {
                self.stop().await;
                self.open_failure = None;
                return Ok(());
            }
        };

        if let Some(link) = &self.link {
            return Err(LinkError::AlreadyRunning(link.endpoint().name().to_string()));
        }

        let settings = LinkSettings::from(&self.config.link);
        let transport: Box<dyn Transport> = if endpoint.is_simulated() {
            let peer = SimulatedPeer::new(PeerSettings::from(&self.config.simulator));
            self.peer = Some(peer.controls());
            Box::new(peer)
        } else {
            match serial::open_serial(&endpoint) {
                Ok(port) => Box::new(port),
                Err(e) => {
                    warn!("{}", e);
                    self.open_failure = Some(LinkStatus::open_failed(e.to_string()));
                    return Err(e);
                }
            }
        };

        info!("Starting link on {}", endpoint);
        self.open_failure = None;
        self.link = Some(LinkHandle::spawn(transport, endpoint, settings));
        Ok(())
    }

    /// Reap a link that ended on its own
    ///
    /// Returns the exit reason once; the session is back in endpoint selection
    /// afterwards.
    pub async fn poll(&mut self) -> Option<LinkExit> {
        if !self.link.as_ref()?.is_finished() {
            return None;
        }

        let link = self.link.take()?;
        let exit = link.join().await;
        self.peer = None;
        if matches!(exit, LinkExit::GraceExpired { .. }) {
            info!("Peer did not come back, returning to endpoint selection");
        }
        Some(exit)
    }

    /// Stop the running link, if any
    pub async fn stop(&mut self) -> Option<LinkExit> {
        let link = self.link.take()?;
        self.peer = None;
        Some(link.stop().await)
    }

    /// True while a link task is running
    pub fn is_active(&self) -> bool {
        self.link.is_some()
    }

    /// Current link status
    pub fn status(&self) -> LinkStatus {
        match (&self.link, &self.open_failure) {
            (Some(link), _) => link.status(),
            (None, Some(failure)) => failure.clone(),
            (None, None) => LinkStatus::idle(),
        }
    }

    /// Read handle for the running link
    pub fn reader(&self) -> Option<TelemetryReader> {
        self.link.as_ref().map(LinkHandle::reader)
    }

    /// Driver handle when the simulated peer is selected
    pub fn peer_controls(&self) -> Option<&PeerControls> {
        self.peer.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkPhase;
    use tokio::time::{sleep, Duration};

    #[tokio::test(start_paused = true)]
    async fn test_starts_idle() {
        let session = Session::new(Config::default());
        assert!(!session.is_active());
        assert_eq!(session.status().phase, LinkPhase::Idle);
        assert!(session.peer_controls().is_none());
        assert!(session.reader().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_failure_stays_connecting() {
        let mut session = Session::new(Config::default());
        let endpoint = Endpoint::new("/dev/nonexistent_serial_device_12345", 9600);

        let result = session.select(Some(endpoint)).await;
        assert!(matches!(result, Err(LinkError::TransportOpen { .. })));
        assert!(!session.is_active());

        let status = session.status();
        assert_eq!(status.phase, LinkPhase::Connecting);
        assert!(status.last_error.is_some());

        session.select(None).await.unwrap();
        assert_eq!(session.status().phase, LinkPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_session_links() {
        let mut session = Session::new(Config::default());
        session.select(Some(Endpoint::simulated())).await.unwrap();
        assert!(session.peer_controls().is_some());

        sleep(Duration::from_millis(2500)).await;
        let status = session.status();
        assert!(status.connected);
        assert_eq!(status.phase, LinkPhase::Linked);

        assert_eq!(session.stop().await, Some(LinkExit::Stopped));
        assert!(!session.is_active());
        assert_eq!(session.status().phase, LinkPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_rejected() {
        let mut session = Session::new(Config::default());
        session.select(Some(Endpoint::simulated())).await.unwrap();

        let result = session.select(Some(Endpoint::simulated())).await;
        assert!(matches!(result, Err(LinkError::AlreadyRunning(_))));

        session.select(None).await.unwrap();
        assert!(!session.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_expiry_returns_to_selection() {
        let mut session = Session::new(Config::default());
        session.select(Some(Endpoint::simulated())).await.unwrap();
        sleep(Duration::from_millis(2500)).await;

        let controls = session.peer_controls().cloned().unwrap();
        controls.force_state(Some(0));
        assert_eq!(session.poll().await, None);

        sleep(Duration::from_secs(6)).await;
        let exit = session.poll().await;
        assert!(matches!(exit, Some(LinkExit::GraceExpired { .. })));
        assert!(!session.is_active());
        assert!(session.peer_controls().is_none());
        assert!(controls.is_closed());
    }
}
