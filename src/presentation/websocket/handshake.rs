//! Connection handshake: Hello, Identify, Ready.
//!
//! ```text
//! AwaitingHello -> AwaitingIdentify -> Identified
//!        \               \
//!         +---------------+--> Closed
//! ```
//!
//! A session is created only once the credential checks out and the ready
//! snapshot is loaded. Ready is queued before the session is indexed, so it is
//! always the first dispatch (sequence 1) the client sees. A snapshot that a
//! membership change overtook while loading is discarded and loaded again.

use std::sync::Arc;

use tokio::time::{Duration, Instant};

use super::close_code::CloseCode;
use super::heartbeat::HeartbeatRecord;
use super::messages::{
    GatewayFrame, HelloPayload, IdentifyPayload, OpCode, ReadyPayload, GATEWAY_VERSION,
};
use super::presence::PresenceTracker;
use super::registry::SessionRegistry;
use super::session::{CloseReason, Dispatch, Outbound, Session, SessionHandle};
use crate::domain::{
    Authenticator, EventKind, Presence, ReadyState, ReadyStateRepository, Snowflake,
};
use crate::shared::error::GatewayError;

/// Ready snapshots loaded per Identify before giving up on a user whose
/// memberships keep changing
const MAX_SNAPSHOT_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitingHello,
    AwaitingIdentify,
    Identified,
    Closed,
}

/// A successfully identified connection
pub struct Admission {
    pub session: Arc<Session>,
    pub handle: SessionHandle,
    /// Initial presence from Identify, if the client sent one
    pub presence: Option<Presence>,
}

/// Per-connection handshake driver
pub struct Handshake {
    state: HandshakeState,
    registry: Arc<SessionRegistry>,
    authenticator: Arc<dyn Authenticator>,
    ready_state: Arc<dyn ReadyStateRepository>,
    presence: Arc<PresenceTracker>,
    heartbeat_interval: Duration,
    heartbeat_grace: Duration,
    queue_capacity: usize,
    hello_at: Option<Instant>,
}

impl Handshake {
    pub fn new(
        registry: Arc<SessionRegistry>,
        authenticator: Arc<dyn Authenticator>,
        ready_state: Arc<dyn ReadyStateRepository>,
        presence: Arc<PresenceTracker>,
        heartbeat_interval: Duration,
        heartbeat_grace: Duration,
        queue_capacity: usize,
    ) -> Self {
        Self {
            state: HandshakeState::AwaitingHello,
            registry,
            authenticator,
            ready_state,
            presence,
            heartbeat_interval,
            heartbeat_grace,
            queue_capacity,
            hello_at: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Build the Hello frame. The heartbeat clock starts now.
    pub fn hello(&mut self) -> GatewayFrame {
        self.state = HandshakeState::AwaitingIdentify;
        self.hello_at = Some(Instant::now());
        GatewayFrame::new(
            OpCode::Hello,
            serde_json::to_value(HelloPayload {
                heartbeat_interval: self.heartbeat_interval.as_millis() as u64,
            })
            .ok(),
        )
    }

    /// Validate the first client frame. Anything other than a well-formed
    /// Identify ends the handshake.
    pub fn accept_identify(&mut self, frame: &GatewayFrame) -> Result<IdentifyPayload, CloseCode> {
        if self.state != HandshakeState::AwaitingIdentify {
            return Err(self.fail(CloseCode::UnknownError));
        }
        match frame.opcode() {
            Ok(OpCode::Identify) => frame
                .payload::<IdentifyPayload>()
                .map_err(|_| self.fail(CloseCode::DecodeError)),
            Ok(_) => Err(self.fail(CloseCode::NotAuthenticated)),
            Err(_) => Err(self.fail(CloseCode::UnknownOpcode)),
        }
    }

    /// Authenticate, load the ready snapshot, queue Ready and index the
    /// session. On failure nothing stays registered.
    pub async fn admit(&mut self, identify: IdentifyPayload) -> Result<Admission, CloseCode> {
        if self.state != HandshakeState::AwaitingIdentify {
            return Err(self.fail(CloseCode::UnknownError));
        }

        let user_id = match self.authenticator.authenticate(&identify.token).await {
            Ok(user_id) => user_id,
            Err(e) => {
                tracing::debug!(error = %e, "Identify rejected");
                return Err(self.fail(CloseCode::AuthenticationFailed));
            }
        };

        let registry = self.registry.clone();
        let mut attempt = 1;
        let (session, handle) = loop {
            let watch = registry.watch_membership(user_id);
            let state = match self.ready_state.load(user_id).await {
                Ok(state) => state,
                Err(e) => {
                    tracing::error!(user_id = %user_id, error = %e, "Failed to load ready state");
                    return Err(self.fail(CloseCode::UnknownError));
                }
            };
            let (session, handle, guild_ids) = self.ready_session(user_id, state)?;

            match registry.register_watched(session.clone(), guild_ids, watch) {
                Ok(()) => break (session, handle),
                Err(GatewayError::MembershipChanged(_)) if attempt < MAX_SNAPSHOT_ATTEMPTS => {
                    tracing::debug!(
                        user_id = %user_id,
                        attempt,
                        "Memberships changed during identify, reloading ready state"
                    );
                    attempt += 1;
                }
                Err(e) => {
                    let code = match e {
                        GatewayError::SessionLimitReached(_) => CloseCode::SessionLimit,
                        _ => CloseCode::UnknownError,
                    };
                    session.close(CloseReason::Protocol(code));
                    tracing::info!(user_id = %user_id, error = %e, "Session not registered");
                    return Err(self.fail(code));
                }
            }
        };

        self.state = HandshakeState::Identified;
        tracing::info!(
            user_id = %user_id,
            session_id = %session.id(),
            os = %identify.properties.os,
            browser = %identify.properties.browser,
            "User connected and identified"
        );

        Ok(Admission {
            session,
            handle,
            presence: identify.presence,
        })
    }

    /// Create the session for a loaded snapshot with Ready already queued
    fn ready_session(
        &mut self,
        user_id: Snowflake,
        state: ReadyState,
    ) -> Result<(Arc<Session>, SessionHandle, Vec<Snowflake>), CloseCode> {
        let started = self.hello_at.unwrap_or_else(Instant::now);
        let (session, handle) = Session::new(
            user_id,
            HeartbeatRecord::new(self.heartbeat_interval, self.heartbeat_grace, started),
            self.queue_capacity,
        );

        let guild_ids = state.guild_ids();
        let ready = ReadyPayload {
            v: GATEWAY_VERSION,
            session_id: session.id().to_string(),
            presences: self.presence.snapshot(&state.contact_ids()),
            user: state.user,
            guilds: state.guilds,
            private_channels: state.private_channels,
            relationships: state.relationships,
        };
        let data = serde_json::to_value(&ready).map_err(|e| {
            tracing::error!(user_id = %user_id, error = %e, "Failed to encode ready payload");
            self.fail(CloseCode::UnknownError)
        })?;
        if session
            .enqueue(Outbound::Dispatch(Arc::new(Dispatch {
                kind: EventKind::Ready,
                data,
            })))
            .is_err()
        {
            return Err(self.fail(CloseCode::UnknownError));
        }
        Ok((session, handle, guild_ids))
    }

    fn fail(&mut self, code: CloseCode) -> CloseCode {
        self.state = HandshakeState::Closed;
        code
    }
}
