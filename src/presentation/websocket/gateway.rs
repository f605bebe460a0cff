//! WebSocket Gateway
//!
//! Wires the registry, router, presence tracker and heartbeat monitor
//! together, and is the single entry point collaborators publish through.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::handshake::Handshake;
use super::heartbeat::{jittered_interval, HeartbeatMonitor};
use super::messages::VoiceStateRequest;
use super::presence::PresenceTracker;
use super::registry::{SessionRegistry, Unregistered};
use super::router::{EventRouter, PublishOutcome};
use super::session::{CloseReason, Outbound, Session};
use crate::config::GatewaySettings;
use crate::domain::{
    Authenticator, EventEnvelope, EventKind, Presence, PublishRequest, ReadyStateRepository,
    Snowflake, Status,
};
use crate::infrastructure::metrics;
use crate::shared::error::GatewayError;

/// WebSocket gateway managing all connections
pub struct Gateway {
    registry: Arc<SessionRegistry>,
    router: EventRouter,
    presence: Arc<PresenceTracker>,
    authenticator: Arc<dyn Authenticator>,
    ready_state: Arc<dyn ReadyStateRepository>,
    settings: GatewaySettings,
    /// Set once shutdown has asked every client to reconnect elsewhere
    draining: AtomicBool,
}

impl Gateway {
    pub fn new(
        settings: GatewaySettings,
        authenticator: Arc<dyn Authenticator>,
        ready_state: Arc<dyn ReadyStateRepository>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new(settings.max_sessions_per_user));
        Self {
            router: EventRouter::new(registry.clone()),
            registry,
            presence: Arc::new(PresenceTracker::new()),
            authenticator,
            ready_state,
            settings,
            draining: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn presence(&self) -> &Arc<PresenceTracker> {
        &self.presence
    }

    /// Start a handshake for a new connection, with its own jittered
    /// heartbeat interval.
    pub fn handshake(&self) -> Handshake {
        Handshake::new(
            self.registry.clone(),
            self.authenticator.clone(),
            self.ready_state.clone(),
            self.presence.clone(),
            jittered_interval(
                self.settings.heartbeat_interval(),
                self.settings.heartbeat_jitter(),
            ),
            self.settings.heartbeat_grace(),
            self.settings.send_queue_capacity,
        )
    }

    /// Publish a committed mutation to every connected session in scope.
    pub fn publish(&self, envelope: EventEnvelope) -> PublishOutcome {
        self.router.publish(envelope)
    }

    /// Validate a collaborator request and publish it.
    pub fn publish_request(&self, request: PublishRequest) -> Result<PublishOutcome, GatewayError> {
        let envelope = EventEnvelope::try_from(request)?;
        Ok(self.publish(envelope))
    }

    /// Bookkeeping once a session is registered: record the initial presence
    /// and announce it to the user's guilds.
    pub fn session_started(&self, session: &Session, presence: Option<Presence>) {
        metrics::set_active_sessions(self.registry.session_count());
        self.apply_presence(session, presence.unwrap_or_default());
    }

    /// Handle a client op 3.
    pub fn update_presence(&self, session: &Session, presence: Presence) {
        if !session.is_identified() {
            return;
        }
        self.apply_presence(session, presence);
    }

    fn apply_presence(&self, session: &Session, presence: Presence) {
        let user_id = session.user_id();
        if !self.presence.update(user_id, presence.clone()) {
            return;
        }
        for guild_id in self.registry.guilds_of(session.id()) {
            self.publish(EventEnvelope::guild(
                EventKind::PresenceUpdate,
                guild_id,
                presence.to_event_payload(user_id, Some(guild_id)),
            ));
        }
    }

    /// Handle a client op 4. Ignored unless the session is subscribed to the
    /// named guild.
    pub fn update_voice_state(&self, session: &Session, request: VoiceStateRequest) -> bool {
        if !session.is_identified() || !self.registry.is_subscribed(session.id(), request.guild_id)
        {
            tracing::debug!(
                session_id = %session.id(),
                guild_id = %request.guild_id,
                "Voice state update for unsubscribed guild ignored"
            );
            return false;
        }
        self.publish(EventEnvelope::guild(
            EventKind::VoiceStateUpdate,
            request.guild_id,
            json!({
                "guild_id": request.guild_id,
                "channel_id": request.channel_id,
                "user_id": session.user_id(),
                "session_id": session.id(),
                "self_mute": request.self_mute,
                "self_deaf": request.self_deaf,
            }),
        ));
        true
    }

    /// Remove a closed session from every index. Publishes an offline
    /// presence when it was the user's last session.
    pub fn end_session(&self, session_id: &str) -> Option<Unregistered> {
        let removed = self.registry.unregister(session_id)?;
        removed.session.mark_closed();
        metrics::set_active_sessions(self.registry.session_count());

        let user_id = removed.session.user_id();
        if removed.last_for_user {
            let was_visible = self
                .presence
                .remove(user_id)
                .map(|p| p.status.visible() != Status::Offline)
                .unwrap_or(false);
            if was_visible {
                let offline = Presence::offline();
                for guild_id in &removed.guilds {
                    self.publish(EventEnvelope::guild(
                        EventKind::PresenceUpdate,
                        *guild_id,
                        offline.to_event_payload(user_id, Some(*guild_id)),
                    ));
                }
            }
        }

        tracing::info!(
            user_id = %user_id,
            session_id = %session_id,
            reason = removed.session.close_reason().map(|r| r.as_str()).unwrap_or("unknown"),
            "User disconnected"
        );
        Some(removed)
    }

    /// Send InvalidSession to every session of a user and close them. The
    /// client is expected to identify again.
    pub fn invalidate_user(&self, user_id: Snowflake) -> usize {
        let sessions = self.registry.user_sessions(user_id);
        let closed = sessions
            .iter()
            .filter(|session| {
                let _ = session.enqueue(Outbound::InvalidSession);
                session.close(CloseReason::Invalidated)
            })
            .count();
        for _ in 0..closed {
            metrics::record_session_closed(CloseReason::Invalidated.as_str());
        }
        tracing::info!(user_id = %user_id, sessions = closed, "User sessions invalidated");
        closed
    }

    /// Ask every connected client to reconnect. Used on graceful shutdown.
    pub fn request_reconnect_all(&self) -> usize {
        self.draining.store(true, Ordering::SeqCst);
        let closed = self
            .registry
            .sessions()
            .iter()
            .filter(|session| {
                let _ = session.enqueue(Outbound::Reconnect);
                session.close(CloseReason::ServerReconnect)
            })
            .count();
        for _ in 0..closed {
            metrics::record_session_closed(CloseReason::ServerReconnect.as_str());
        }
        tracing::info!(sessions = closed, "Reconnect requested from all sessions");
        closed
    }

    /// Ask one client to heartbeat immediately.
    pub fn request_heartbeat(&self, session_id: &str) -> bool {
        self.monitor().request_heartbeat(session_id)
    }

    pub fn spawn_heartbeat_monitor(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        self.monitor().spawn(shutdown)
    }

    fn monitor(&self) -> HeartbeatMonitor {
        HeartbeatMonitor::new(self.registry.clone(), self.settings.sweep_interval())
    }

    pub fn session_count(&self) -> usize {
        self.registry.session_count()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    pub fn is_user_online(&self, user_id: Snowflake) -> bool {
        self.registry.is_user_online(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MockAuthenticator, MockReadyStateRepository, ReadyState};
    use crate::presentation::websocket::heartbeat::HeartbeatRecord;
    use crate::presentation::websocket::session::SessionHandle;
    use pretty_assertions::assert_eq;
    use tokio::time::{Duration, Instant};

    fn gateway() -> Gateway {
        let mut ready = MockReadyStateRepository::new();
        ready
            .expect_load()
            .returning(|user_id| Ok(ReadyState::empty(user_id)));
        Gateway::new(
            GatewaySettings::default(),
            Arc::new(MockAuthenticator::new()),
            Arc::new(ready),
        )
    }

    fn connect(gateway: &Gateway, user: i64, guilds: Vec<i64>) -> (Arc<Session>, SessionHandle) {
        let (session, handle) = Session::new(
            Snowflake(user),
            HeartbeatRecord::new(Duration::from_secs(40), Duration::from_secs(5), Instant::now()),
            32,
        );
        gateway
            .registry()
            .register(session.clone(), guilds.into_iter().map(Snowflake).collect())
            .unwrap();
        (session, handle)
    }

    fn drain(handle: &mut SessionHandle) -> Vec<Outbound> {
        let mut items = Vec::new();
        while let Ok(item) = handle.outbound.try_recv() {
            items.push(item);
        }
        items
    }

    fn dispatch_kinds(items: &[Outbound]) -> Vec<EventKind> {
        items
            .iter()
            .filter_map(|item| match item {
                Outbound::Dispatch(d) => Some(d.kind),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_session_start_announces_presence_to_guild() {
        let gateway = gateway();
        let (_watcher, mut watcher_handle) = connect(&gateway, 2, vec![10]);
        let (session, _handle) = connect(&gateway, 1, vec![10]);

        gateway.session_started(&session, None);

        let items = drain(&mut watcher_handle);
        assert_eq!(dispatch_kinds(&items), vec![EventKind::PresenceUpdate]);
        match &items[0] {
            Outbound::Dispatch(d) => {
                assert_eq!(d.data["user"]["id"], json!("1"));
                assert_eq!(d.data["status"], json!("online"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_last_session_publishes_offline() {
        let gateway = gateway();
        let (_watcher, mut watcher_handle) = connect(&gateway, 2, vec![10]);
        let (first, _h1) = connect(&gateway, 1, vec![10]);
        let (second, _h2) = connect(&gateway, 1, vec![10]);
        gateway.session_started(&first, None);
        gateway.session_started(&second, None);
        drain(&mut watcher_handle);

        first.close(CloseReason::ClientDisconnected);
        let removed = gateway.end_session(first.id()).unwrap();
        assert!(!removed.last_for_user);
        assert!(drain(&mut watcher_handle).is_empty());

        second.close(CloseReason::ClientDisconnected);
        let removed = gateway.end_session(second.id()).unwrap();
        assert!(removed.last_for_user);

        let items = drain(&mut watcher_handle);
        assert_eq!(dispatch_kinds(&items), vec![EventKind::PresenceUpdate]);
        if let Outbound::Dispatch(d) = &items[0] {
            assert_eq!(d.data["status"], json!("offline"));
        }
        assert!(!gateway.is_user_online(Snowflake(1)));
    }

    #[tokio::test]
    async fn test_invisible_user_never_announced() {
        let gateway = gateway();
        let (_watcher, mut watcher_handle) = connect(&gateway, 2, vec![10]);
        let (session, _h) = connect(&gateway, 1, vec![10]);
        gateway.session_started(
            &session,
            Some(Presence {
                status: Status::Invisible,
                ..Presence::default()
            }),
        );
        assert!(drain(&mut watcher_handle).is_empty());

        session.close(CloseReason::ClientDisconnected);
        gateway.end_session(session.id());
        assert!(drain(&mut watcher_handle).is_empty());
    }

    #[tokio::test]
    async fn test_voice_state_requires_subscription() {
        let gateway = gateway();
        let (watcher, mut watcher_handle) = connect(&gateway, 2, vec![10]);
        let (session, _h) = connect(&gateway, 1, vec![10]);

        let joined = gateway.update_voice_state(
            &session,
            VoiceStateRequest {
                guild_id: Snowflake(10),
                channel_id: Some(Snowflake(55)),
                self_mute: true,
                self_deaf: false,
            },
        );
        assert!(joined);
        let items = drain(&mut watcher_handle);
        assert_eq!(dispatch_kinds(&items), vec![EventKind::VoiceStateUpdate]);
        if let Outbound::Dispatch(d) = &items[0] {
            assert_eq!(d.data["channel_id"], json!("55"));
            assert_eq!(d.data["user_id"], json!("1"));
        }

        let ignored = gateway.update_voice_state(
            &watcher,
            VoiceStateRequest {
                guild_id: Snowflake(99),
                channel_id: None,
                self_mute: false,
                self_deaf: false,
            },
        );
        assert!(!ignored);
    }

    #[tokio::test]
    async fn test_invalidate_user_queues_invalid_session_then_closes() {
        let gateway = gateway();
        let (a, mut ha) = connect(&gateway, 1, vec![]);
        let (b, mut hb) = connect(&gateway, 1, vec![]);
        let (other, _ho) = connect(&gateway, 2, vec![]);

        assert_eq!(gateway.invalidate_user(Snowflake(1)), 2);
        for (session, handle) in [(&a, &mut ha), (&b, &mut hb)] {
            assert_eq!(session.close_reason(), Some(CloseReason::Invalidated));
            assert!(matches!(
                handle.outbound.try_recv(),
                Ok(Outbound::InvalidSession)
            ));
        }
        assert!(other.is_identified());
    }

    #[tokio::test]
    async fn test_reconnect_all() {
        let gateway = gateway();
        let (a, mut ha) = connect(&gateway, 1, vec![]);
        let (b, _hb) = connect(&gateway, 2, vec![]);

        assert_eq!(gateway.request_reconnect_all(), 2);
        assert_eq!(a.close_reason(), Some(CloseReason::ServerReconnect));
        assert_eq!(b.close_reason(), Some(CloseReason::ServerReconnect));
        assert!(matches!(ha.outbound.try_recv(), Ok(Outbound::Reconnect)));
        assert!(gateway.is_draining());
    }

    #[test]
    fn test_publish_request_rejects_missing_scope() {
        let gateway = gateway();
        let request: PublishRequest =
            serde_json::from_value(json!({"type": "MESSAGE_CREATE", "data": {}})).unwrap();
        assert!(gateway.publish_request(request).is_err());
    }
}
