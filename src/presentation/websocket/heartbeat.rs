//! Heartbeat Monitor
//!
//! One shared sweeper checks every registered session's deadline, so deadline
//! checks never queue behind a slow socket write.

use std::sync::Arc;

use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

use super::registry::SessionRegistry;
use super::session::{CloseReason, Outbound, SessionId};
use crate::infrastructure::metrics;

/// Per-session liveness contract
#[derive(Debug, Clone)]
pub struct HeartbeatRecord {
    interval: Duration,
    grace: Duration,
    deadline: Instant,
}

impl HeartbeatRecord {
    /// Start the clock at `now` (the moment Hello was sent).
    pub fn new(interval: Duration, grace: Duration, now: Instant) -> Self {
        Self {
            interval,
            grace,
            deadline: now + interval + grace,
        }
    }

    /// deadline = now + interval + grace
    pub fn acknowledge(&mut self, now: Instant) {
        self.deadline = now + self.interval + self.grace;
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.deadline
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Per-connection heartbeat interval: the base interval minus a uniform random
/// jitter, so reconnect storms do not heartbeat in lockstep.
pub fn jittered_interval(base: Duration, jitter: Duration) -> Duration {
    let jitter_ms = jitter.as_millis().min(base.as_millis().saturating_sub(1)) as u64;
    if jitter_ms == 0 {
        return base;
    }
    let offset = rand::rng().random_range(0..=jitter_ms);
    base - Duration::from_millis(offset)
}

/// Closes sessions whose heartbeat deadline passed
#[derive(Clone)]
pub struct HeartbeatMonitor {
    registry: Arc<SessionRegistry>,
    sweep_interval: Duration,
}

impl HeartbeatMonitor {
    pub fn new(registry: Arc<SessionRegistry>, sweep_interval: Duration) -> Self {
        Self {
            registry,
            sweep_interval,
        }
    }

    /// Check every session once. Expired sessions are closed exactly once and
    /// their ids returned; the connection task unregisters them.
    pub fn sweep(&self, now: Instant) -> Vec<SessionId> {
        let mut expired = Vec::new();
        for session in self.registry.sessions() {
            if !session.heartbeat_expired(now) {
                continue;
            }
            if session.close(CloseReason::HeartbeatTimeout) {
                metrics::record_heartbeat_timeout();
                metrics::record_session_closed(CloseReason::HeartbeatTimeout.as_str());
                tracing::info!(
                    session_id = %session.id(),
                    user_id = %session.user_id(),
                    "Heartbeat deadline missed, closing session"
                );
                expired.push(session.id().to_string());
            }
        }
        expired
    }

    /// Ask a client to heartbeat now. The existing deadline still applies.
    pub fn request_heartbeat(&self, session_id: &str) -> bool {
        match self.registry.get(session_id) {
            Some(session) => session.enqueue_or_close(Outbound::HeartbeatRequest),
            None => false,
        }
    }

    /// Run the sweep loop until `shutdown` flips to true.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::debug!(
                sweep_interval_ms = self.sweep_interval.as_millis() as u64,
                "Heartbeat monitor started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep(Instant::now());
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::debug!("Heartbeat monitor stopped");
        })
    }
}
