//! Gateway client controller.
//!
//! ```text
//! Disconnected -> Connecting -> Identified
//!       ^              |             |
//!       +--- backoff --+-------------+
//! ```
//!
//! One background task owns the connection. It heartbeats at the interval
//! from Hello, treats a missed acknowledgement as a dead connection, and
//! reconnects with exponential backoff until the caller disconnects, the
//! credential is rejected, or the attempt limit runs out. A server that
//! accepts the socket but never says Hello counts as a dropped connection
//! once `hello_timeout` passes. There is no resume:
//! every reconnect identifies from scratch and runs the resynchronizer.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Duration, Instant, MissedTickBehavior};

use super::backoff::ReconnectPolicy;
use super::events::ClientEvent;
use super::transport::{Connector, Transport, TransportEvent};
use crate::domain::{EventKind, Presence};
use crate::presentation::websocket::close_code::CloseCode;
use crate::presentation::websocket::messages::{
    ConnectionProperties, GatewayFrame, HelloPayload, IdentifyPayload, OpCode, ReadyPayload,
};

/// Refetches application state after every Ready, before it is surfaced.
#[async_trait]
pub trait Resynchronizer: Send + Sync {
    async fn resynchronize(&self, ready: &ReadyPayload);
}

/// Resynchronizer that does nothing
pub struct NoopResynchronizer;

#[async_trait]
impl Resynchronizer for NoopResynchronizer {
    async fn resynchronize(&self, _ready: &ReadyPayload) {}
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub token: String,
    pub properties: ConnectionProperties,
    pub presence: Option<Presence>,
    pub policy: ReconnectPolicy,
    /// Deadline for opening the socket and again for receiving Hello
    pub hello_timeout: Duration,
}

impl ClientConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            properties: ConnectionProperties {
                os: std::env::consts::OS.to_string(),
                browser: "chat-gateway".to_string(),
                device: "chat-gateway".to_string(),
            },
            presence: None,
            policy: ReconnectPolicy::default(),
            hello_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_hello_timeout(mut self, hello_timeout: Duration) -> Self {
        self.hello_timeout = hello_timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Identified,
}

struct Shared {
    state: Mutex<ClientState>,
    intentional: AtomicBool,
    attempt: AtomicU32,
    stop: Notify,
}

impl Shared {
    fn set_state(&self, state: ClientState) {
        *self.state.lock() = state;
    }

    fn stopping(&self) -> bool {
        self.intentional.load(Ordering::SeqCst)
    }
}

/// How one connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// `disconnect()` was called
    Intentional,
    AuthenticationFailed,
    /// Could not reach the server
    ConnectFailed,
    Dropped { code: Option<u16> },
}

enum Step {
    Event(TransportEvent),
    Heartbeat,
    Stop,
}

/// Handle to a running client
pub struct GatewayClient {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl GatewayClient {
    /// Spawn the connection task. Events arrive on the returned receiver.
    pub fn start(
        connector: Arc<dyn Connector>,
        config: ClientConfig,
        resync: Arc<dyn Resynchronizer>,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(ClientState::Disconnected),
            intentional: AtomicBool::new(false),
            attempt: AtomicU32::new(0),
            stop: Notify::new(),
        });

        let worker = Worker {
            connector,
            config,
            resync,
            shared: shared.clone(),
            events: events_tx,
        };
        let task = tokio::spawn(worker.run());

        (Self { shared, task }, events_rx)
    }

    pub fn state(&self) -> ClientState {
        *self.shared.state.lock()
    }

    /// Reconnect attempts since the last Ready
    pub fn attempt(&self) -> u32 {
        self.shared.attempt.load(Ordering::SeqCst)
    }

    /// Close the connection and stop reconnecting.
    pub fn disconnect(&self) {
        self.shared.intentional.store(true, Ordering::SeqCst);
        self.shared.stop.notify_one();
    }

    /// Wait for the connection task to stop.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

struct Worker {
    connector: Arc<dyn Connector>,
    config: ClientConfig,
    resync: Arc<dyn Resynchronizer>,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl Worker {
    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    async fn run(self) {
        loop {
            if self.shared.stopping() {
                break;
            }

            self.shared.set_state(ClientState::Connecting);
            self.emit(ClientEvent::Connecting {
                attempt: self.shared.attempt.load(Ordering::SeqCst),
            });

            let end = self.connect_once().await;
            self.shared.set_state(ClientState::Disconnected);

            match end {
                SessionEnd::Intentional => break,
                SessionEnd::AuthenticationFailed => {
                    tracing::warn!("Gateway rejected credentials, not reconnecting");
                    self.emit(ClientEvent::AuthenticationFailed);
                    break;
                }
                SessionEnd::ConnectFailed => {}
                SessionEnd::Dropped { code } => self.emit(ClientEvent::Disconnected { code }),
            }

            if self.shared.stopping() {
                break;
            }

            let attempt = self.shared.attempt.load(Ordering::SeqCst);
            if self.config.policy.is_exhausted(attempt) {
                tracing::warn!(attempts = attempt, "Reconnect attempts exhausted");
                self.emit(ClientEvent::ReconnectExhausted { attempts: attempt });
                break;
            }

            let delay = self.config.policy.delay_for(attempt);
            self.shared.attempt.store(attempt + 1, Ordering::SeqCst);
            tracing::info!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Scheduling gateway reconnect"
            );
            self.emit(ClientEvent::ReconnectScheduled {
                attempt: attempt + 1,
                delay,
            });

            tokio::select! {
                _ = sleep(delay) => {}
                _ = self.shared.stop.notified() => break,
            }
        }

        self.shared.set_state(ClientState::Disconnected);
        tracing::debug!("Gateway client stopped");
    }

    async fn connect_once(&self) -> SessionEnd {
        let mut transport = match timeout(self.config.hello_timeout, self.connector.connect()).await
        {
            Ok(Ok(transport)) => transport,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Gateway connection failed");
                return SessionEnd::ConnectFailed;
            }
            Err(_) => {
                tracing::debug!("Gateway connection timed out");
                return SessionEnd::ConnectFailed;
            }
        };

        let interval = match self.await_hello(transport.as_mut()).await {
            Ok(interval) => interval,
            Err(end) => return end,
        };

        let identify = IdentifyPayload {
            token: self.config.token.clone(),
            properties: self.config.properties.clone(),
            presence: self.config.presence.clone(),
        };
        let identify = match serde_json::to_value(&identify) {
            Ok(value) => GatewayFrame::new(OpCode::Identify, Some(value)),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode Identify");
                transport.close().await;
                return SessionEnd::Dropped { code: None };
            }
        };
        if transport.send(&identify).await.is_err() {
            return SessionEnd::Dropped { code: None };
        }

        self.run_session(transport, interval).await
    }

    async fn await_hello(&self, transport: &mut dyn Transport) -> Result<Duration, SessionEnd> {
        let step = tokio::select! {
            event = timeout(self.config.hello_timeout, transport.next_event()) => {
                event.ok().map(Step::Event)
            }
            _ = self.shared.stop.notified() => Some(Step::Stop),
        };
        let Some(step) = step else {
            tracing::warn!(
                timeout_ms = self.config.hello_timeout.as_millis() as u64,
                "Gateway sent no Hello"
            );
            transport.close().await;
            return Err(SessionEnd::Dropped { code: None });
        };
        match step {
            Step::Event(TransportEvent::Frame(frame)) if frame.opcode() == Ok(OpCode::Hello) => {
                match frame.payload::<HelloPayload>() {
                    Ok(hello) if hello.heartbeat_interval > 0 => {
                        Ok(Duration::from_millis(hello.heartbeat_interval))
                    }
                    _ => {
                        transport.close().await;
                        Err(SessionEnd::Dropped { code: None })
                    }
                }
            }
            Step::Event(TransportEvent::Closed { code }) => Err(classify_close(code)),
            Step::Stop => {
                transport.close().await;
                Err(SessionEnd::Intentional)
            }
            _ => {
                tracing::warn!("Expected Hello as the first gateway frame");
                transport.close().await;
                Err(SessionEnd::Dropped { code: None })
            }
        }
    }

    async fn run_session(&self, mut transport: Box<dyn Transport>, interval: Duration) -> SessionEnd {
        let mut heartbeat = interval_at(Instant::now() + interval, interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut awaiting_ack = false;
        let mut last_sequence: Option<u64> = None;

        loop {
            let step = tokio::select! {
                event = transport.next_event() => Step::Event(event),
                _ = heartbeat.tick() => Step::Heartbeat,
                _ = self.shared.stop.notified() => Step::Stop,
            };

            match step {
                Step::Stop => {
                    transport.close().await;
                    return SessionEnd::Intentional;
                }
                Step::Heartbeat => {
                    if awaiting_ack {
                        tracing::warn!("Heartbeat not acknowledged, treating connection as dead");
                        transport.close().await;
                        return SessionEnd::Dropped { code: None };
                    }
                    if transport.send(&heartbeat_frame(last_sequence)).await.is_err() {
                        return SessionEnd::Dropped { code: None };
                    }
                    awaiting_ack = true;
                }
                Step::Event(TransportEvent::Closed { code }) => return classify_close(code),
                Step::Event(TransportEvent::Frame(frame)) => match frame.opcode() {
                    Ok(OpCode::Dispatch) => {
                        if let Some(sequence) = frame.s {
                            if let Some(previous) = last_sequence {
                                if sequence != previous + 1 {
                                    tracing::warn!(
                                        expected = previous + 1,
                                        received = sequence,
                                        "Dispatch sequence gap"
                                    );
                                    self.emit(ClientEvent::SequenceGap {
                                        expected: previous + 1,
                                        received: sequence,
                                    });
                                }
                            }
                            last_sequence = Some(sequence);
                        }
                        if let Err(end) = self.handle_dispatch(frame).await {
                            transport.close().await;
                            return end;
                        }
                    }
                    Ok(OpCode::HeartbeatAck) => awaiting_ack = false,
                    Ok(OpCode::Heartbeat) => {
                        if transport.send(&heartbeat_frame(last_sequence)).await.is_err() {
                            return SessionEnd::Dropped { code: None };
                        }
                        awaiting_ack = true;
                    }
                    Ok(op @ (OpCode::InvalidSession | OpCode::Reconnect)) => {
                        tracing::info!(op = op as u16, "Server asked the client to reconnect");
                        transport.close().await;
                        return SessionEnd::Dropped { code: None };
                    }
                    other => {
                        tracing::debug!(op = ?other, "Ignoring gateway frame");
                    }
                },
            }
        }
    }

    async fn handle_dispatch(&self, frame: GatewayFrame) -> Result<(), SessionEnd> {
        let Some(name) = frame.t.as_deref() else {
            return Ok(());
        };
        let kind = match name.parse::<EventKind>() {
            Ok(kind) => kind,
            Err(_) => {
                tracing::debug!(event = name, "Ignoring unknown dispatch");
                return Ok(());
            }
        };

        if kind == EventKind::Ready {
            let ready: ReadyPayload = frame.payload().map_err(|e| {
                tracing::warn!(error = %e, "Malformed Ready payload");
                SessionEnd::Dropped { code: None }
            })?;
            self.shared.attempt.store(0, Ordering::SeqCst);
            self.shared.set_state(ClientState::Identified);
            tracing::info!(session_id = %ready.session_id, "Gateway session ready");
            self.resync.resynchronize(&ready).await;
            self.emit(ClientEvent::Ready(Box::new(ready)));
            return Ok(());
        }

        self.emit(ClientEvent::Dispatch {
            kind,
            sequence: frame.s.unwrap_or_default(),
            data: frame.d.unwrap_or(Value::Null),
        });
        Ok(())
    }
}

fn heartbeat_frame(last_sequence: Option<u64>) -> GatewayFrame {
    GatewayFrame::new(OpCode::Heartbeat, Some(json!(last_sequence)))
}

/// Only a rejected credential stops the client; every other close retries.
fn classify_close(code: Option<u16>) -> SessionEnd {
    match code.and_then(CloseCode::from_u16) {
        Some(close) if !close.should_reconnect() => SessionEnd::AuthenticationFailed,
        _ => SessionEnd::Dropped { code },
    }
}
