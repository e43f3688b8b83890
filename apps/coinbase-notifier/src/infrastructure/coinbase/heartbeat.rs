//! Keepalive
//!
//! Two independent mechanisms keep a user connection honest:
//!
//! - [`HeartbeatManager`] asks the read loop to send a WebSocket ping on a
//!   fixed interval, from its own task.
//! - [`ReadDeadline`] fires when no frame of any kind (pongs included) has
//!   arrived within the read timeout. The read loop extends it on every frame.

use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, Sleep};
use tokio_util::sync::CancellationToken;

/// Configuration for keepalive behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between ping messages.
    pub ping_interval: Duration,
    /// Silence tolerated before the connection is considered dead.
    pub read_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(45),
            read_timeout: Duration::from_secs(60),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new heartbeat configuration.
    #[must_use]
    pub const fn new(ping_interval: Duration, read_timeout: Duration) -> Self {
        Self {
            ping_interval,
            read_timeout,
        }
    }
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Time to send a ping.
    SendPing,
}

// =============================================================================
// Heartbeat Manager
// =============================================================================

/// Emits [`HeartbeatEvent::SendPing`] every `ping_interval` until cancelled.
///
/// The first ping is due one full interval after the manager starts.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            event_tx,
            cancel,
        }
    }

    /// Run the ping loop until cancelled or the event channel closes.
    pub async fn run(self) {
        let period = self.config.ping_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if self.event_tx.send(HeartbeatEvent::SendPing).await.is_err() {
                        tracing::debug!("Event channel closed, stopping heartbeat");
                        break;
                    }
                }
            }
        }
    }
}

// =============================================================================
// Read Deadline
// =============================================================================

/// Resettable deadline for inbound traffic.
#[derive(Debug)]
pub struct ReadDeadline {
    timeout: Duration,
    sleep: Pin<Box<Sleep>>,
}

impl ReadDeadline {
    /// Start a deadline `timeout` from now.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            sleep: Box::pin(tokio::time::sleep(timeout)),
        }
    }

    /// Push the deadline `timeout` past now.
    pub fn extend(&mut self) {
        let deadline = Instant::now() + self.timeout;
        self.sleep.as_mut().reset(deadline);
    }

    /// Configured timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolves once the deadline passes. Cancel-safe.
    pub async fn expired(&mut self) {
        self.sleep.as_mut().await;
    }
}
