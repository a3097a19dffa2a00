//! Connection monitor
//!
//! Owns the connection-health state machine and the adaptive poll cadence:
//! a fast interval while the hub answers, a slow one while it times out or
//! errors, so a failing device is not hammered. Polls are strictly
//! sequential; the next round starts only after the previous outcome has
//! been processed.

use crate::{
    hub_client::{ClientError, HubClient},
    stations::SharedRegistry,
};
use log::{info, warn};
use serde::Serialize;
use std::time::Duration;
use tokio::{sync::watch, time::sleep};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Timeout,
    Disconnected,
}

/// Collapsed result of one status poll, as seen by the state machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PollOutcome {
    Success,
    TimedOut,
    Failed,
}

impl From<&ClientError> for PollOutcome {
    fn from(e: &ClientError) -> Self {
        match e {
            ClientError::TimedOut => PollOutcome::TimedOut,
            _ => PollOutcome::Failed,
        }
    }
}

pub struct ConnectionMonitor {
    state: ConnectionState,
    interval: Duration,
    fast: Duration,
    slow: Duration,
    tx: watch::Sender<ConnectionState>,
}

impl ConnectionMonitor {
    pub fn new(fast: Duration, slow: Duration) -> Self {
        let (tx, _) = watch::channel(ConnectionState::Connecting);

        Self {
            state: ConnectionState::Connecting,
            interval: fast,
            fast,
            slow,
            tx,
        }
    }

    /// Observe state changes; the receiver always holds the current state.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        self.state
    }

    pub fn poll_interval(&self) -> Duration {
        self.interval
    }

    /// Report `Connecting` while a poll round is about to start and the hub
    /// is not known to be reachable. The cadence is left untouched.
    pub fn poll_starting(&mut self) {
        if self.state != ConnectionState::Connected {
            self.transition(ConnectionState::Connecting);
        }
    }

    /// Apply one poll outcome. Every outcome maps to exactly one resulting
    /// state; a timeout only degrades a healthy or connecting link, any
    /// other failure means the hub is unreachable.
    pub fn on_poll_outcome(&mut self, outcome: PollOutcome) -> ConnectionState {
        let next = match outcome {
            PollOutcome::Success => ConnectionState::Connected,
            PollOutcome::TimedOut => match self.state {
                ConnectionState::Connecting | ConnectionState::Connected => {
                    ConnectionState::Timeout
                }
                unchanged => unchanged,
            },
            PollOutcome::Failed => ConnectionState::Disconnected,
        };

        self.transition(next);
        self.state
    }

    // Only a real state change reschedules the cadence; identical outcomes
    // leave the timer alone.
    fn transition(&mut self, next: ConnectionState) {
        if next == self.state {
            return;
        }

        info!("connection state: {:?} -> {next:?}", self.state);
        self.state = next;

        self.interval = match next {
            ConnectionState::Connected => self.fast,
            ConnectionState::Timeout | ConnectionState::Disconnected => self.slow,
            ConnectionState::Connecting => self.interval,
        };

        let _ = self.tx.send(next);
    }

    /// Run one poll round: fetch station status, update the state machine
    /// and merge the report into the registry on success.
    pub async fn poll_once<Client: HubClient>(
        &mut self,
        hub: &Client,
        registry: &SharedRegistry,
    ) -> ConnectionState {
        self.poll_starting();

        match hub.station_status().await {
            Ok(report) => {
                self.on_poll_outcome(PollOutcome::Success);
                registry.lock().unwrap().apply_poll(&report);
            }
            Err(e) => {
                warn!("status poll failed: {e}");
                self.on_poll_outcome(PollOutcome::from(&e));
            }
        }

        self.state
    }

    /// Poll forever. The first round fires immediately, then each round
    /// waits out the interval the last transition selected. There is no
    /// terminal state; a dead hub only slows the loop down.
    pub async fn run<Client: HubClient>(mut self, hub: Client, registry: SharedRegistry) {
        loop {
            self.poll_once(&hub, &registry).await;
            sleep(self.interval).await;
        }
    }
}
