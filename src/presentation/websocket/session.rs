//! WebSocket Session Management
//!
//! A `Session` exists only for identified connections. It owns the bounded
//! outbound queue drained by the connection's write task, the heartbeat
//! record, and the close signal observed by both connection tasks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, Instant};

use super::close_code::CloseCode;
use super::heartbeat::HeartbeatRecord;
use crate::domain::{EventKind, Snowflake};

pub type SessionId = String;

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Identified,
    Closing,
    Closed,
}

/// Why a session is being closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client closed the socket or the network dropped
    ClientDisconnected,
    HeartbeatTimeout,
    QueueOverflow,
    Invalidated,
    ServerReconnect,
    Protocol(CloseCode),
}

impl CloseReason {
    /// Close code sent to the client, if we still get to send one.
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            CloseReason::ClientDisconnected => None,
            CloseReason::HeartbeatTimeout => Some(CloseCode::SessionTimedOut),
            CloseReason::QueueOverflow => Some(CloseCode::QueueOverflow),
            CloseReason::Invalidated => Some(CloseCode::SessionInvalidated),
            CloseReason::ServerReconnect => Some(CloseCode::Reconnect),
            CloseReason::Protocol(code) => Some(*code),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::ClientDisconnected => "client_disconnected",
            CloseReason::HeartbeatTimeout => "heartbeat_timeout",
            CloseReason::QueueOverflow => "queue_overflow",
            CloseReason::Invalidated => "invalidated",
            CloseReason::ServerReconnect => "server_reconnect",
            CloseReason::Protocol(_) => "protocol_violation",
        }
    }

    /// Whether queued frames should still be flushed before the close frame.
    pub fn flushes_queue(&self) -> bool {
        matches!(self, CloseReason::Invalidated | CloseReason::ServerReconnect)
    }
}

/// A routed event shared by every session it fans out to
#[derive(Debug)]
pub struct Dispatch {
    pub kind: EventKind,
    pub data: Value,
}

/// Items drained by the write task
#[derive(Debug, Clone)]
pub enum Outbound {
    Dispatch(Arc<Dispatch>),
    HeartbeatAck,
    /// Server-initiated heartbeat request
    HeartbeatRequest,
    InvalidSession,
    Reconnect,
}

/// Why an enqueue was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// Queue is at capacity; the caller must close the session
    Full,
    /// Session is no longer accepting frames
    Closed,
}

/// Receiving halves handed to the connection tasks
pub struct SessionHandle {
    pub outbound: mpsc::Receiver<Outbound>,
    pub close_signal: watch::Receiver<Option<CloseReason>>,
}

/// Server-side state for one authenticated connection
pub struct Session {
    id: SessionId,
    user_id: Snowflake,
    state: Mutex<SessionState>,
    heartbeat: Mutex<HeartbeatRecord>,
    sequence: AtomicU64,
    outbound: mpsc::Sender<Outbound>,
    close_tx: watch::Sender<Option<CloseReason>>,
    connected_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        user_id: Snowflake,
        heartbeat: HeartbeatRecord,
        queue_capacity: usize,
    ) -> (Arc<Self>, SessionHandle) {
        let (outbound, outbound_rx) = mpsc::channel(queue_capacity.max(1));
        let (close_tx, close_rx) = watch::channel(None);

        let session = Arc::new(Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            user_id,
            state: Mutex::new(SessionState::Connecting),
            heartbeat: Mutex::new(heartbeat),
            sequence: AtomicU64::new(0),
            outbound,
            close_tx,
            connected_at: Utc::now(),
        });

        let handle = SessionHandle {
            outbound: outbound_rx,
            close_signal: close_rx,
        };
        (session, handle)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user_id(&self) -> Snowflake {
        self.user_id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_identified(&self) -> bool {
        self.state() == SessionState::Identified
    }

    /// Connecting -> Identified. Returns false if the session was closed first.
    pub fn mark_identified(&self) -> bool {
        let mut state = self.state.lock();
        if *state == SessionState::Connecting {
            *state = SessionState::Identified;
            true
        } else {
            false
        }
    }

    /// Begin closing. Only the first call wins and signals the connection
    /// tasks; later calls return false.
    pub fn close(&self, reason: CloseReason) -> bool {
        let mut state = self.state.lock();
        match *state {
            SessionState::Connecting | SessionState::Identified => {
                *state = SessionState::Closing;
                self.close_tx.send_replace(Some(reason));
                true
            }
            SessionState::Closing | SessionState::Closed => false,
        }
    }

    pub fn mark_closed(&self) {
        *self.state.lock() = SessionState::Closed;
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_tx.borrow()
    }

    /// Append to the outbound queue without waiting.
    ///
    /// Frames are accepted while connecting (Ready is queued before the
    /// session is indexed) and while identified.
    pub fn enqueue(&self, item: Outbound) -> Result<(), EnqueueError> {
        let state = self.state.lock();
        if !matches!(*state, SessionState::Connecting | SessionState::Identified) {
            return Err(EnqueueError::Closed);
        }
        self.outbound.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Enqueue, closing the session on overflow.
    pub fn enqueue_or_close(&self, item: Outbound) -> bool {
        match self.enqueue(item) {
            Ok(()) => true,
            Err(EnqueueError::Full) => {
                if self.close(CloseReason::QueueOverflow) {
                    crate::infrastructure::metrics::record_session_closed(
                        CloseReason::QueueOverflow.as_str(),
                    );
                    tracing::warn!(
                        session_id = %self.id,
                        user_id = %self.user_id,
                        "Outbound queue full, closing session"
                    );
                }
                false
            }
            Err(EnqueueError::Closed) => false,
        }
    }

    /// Next dispatch sequence number; called by the write task only, so
    /// sequence order equals delivery order.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    pub fn acknowledge_heartbeat(&self, now: Instant) {
        self.heartbeat.lock().acknowledge(now);
    }

    pub fn heartbeat_expired(&self, now: Instant) -> bool {
        self.heartbeat.lock().is_expired(now)
    }

    pub fn heartbeat_deadline(&self) -> Instant {
        self.heartbeat.lock().deadline()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat.lock().interval()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("state", &self.state())
            .field("sequence", &self.sequence())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(capacity: usize) -> (Arc<Session>, SessionHandle) {
        let record = HeartbeatRecord::new(
            Duration::from_secs(40),
            Duration::from_secs(5),
            Instant::now(),
        );
        Session::new(Snowflake(1), record, capacity)
    }

    #[tokio::test]
    async fn test_close_is_signalled_once() {
        let (session, mut handle) = session(4);
        assert!(session.mark_identified());

        assert!(session.close(CloseReason::HeartbeatTimeout));
        assert!(!session.close(CloseReason::QueueOverflow));

        handle.close_signal.changed().await.unwrap();
        assert_eq!(
            *handle.close_signal.borrow(),
            Some(CloseReason::HeartbeatTimeout)
        );
        assert_eq!(session.state(), SessionState::Closing);
    }

    #[tokio::test]
    async fn test_enqueue_overflow_closes_session() {
        let (session, _handle) = session(2);
        session.mark_identified();

        assert!(session.enqueue_or_close(Outbound::HeartbeatAck));
        assert!(session.enqueue_or_close(Outbound::HeartbeatAck));
        assert!(!session.enqueue_or_close(Outbound::HeartbeatAck));

        assert_eq!(session.close_reason(), Some(CloseReason::QueueOverflow));
        assert_eq!(session.enqueue(Outbound::HeartbeatAck), Err(EnqueueError::Closed));
    }

    #[tokio::test]
    async fn test_identify_after_close_fails() {
        let (session, _handle) = session(1);
        session.close(CloseReason::ClientDisconnected);
        assert!(!session.mark_identified());
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let (session, _handle) = session(1);
        assert_eq!(session.next_sequence(), 1);
        assert_eq!(session.next_sequence(), 2);
        assert_eq!(session.sequence(), 2);
    }

    #[test]
    fn test_close_reason_codes() {
        assert_eq!(
            CloseReason::HeartbeatTimeout.close_code(),
            Some(CloseCode::SessionTimedOut)
        );
        assert_eq!(CloseReason::ClientDisconnected.close_code(), None);
        assert!(CloseReason::Invalidated.flushes_queue());
        assert!(!CloseReason::QueueOverflow.flushes_queue());
    }
}
