//! WebSocket Connection Handler
//!
//! Drives one connection: handshake, then a read loop on this task and a
//! write loop on a spawned task that owns the socket sink and drains the
//! session queue. Either side ending closes the session; the gateway then
//! unregisters it.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::time::{timeout, Duration, Instant};

use super::close_code::CloseCode;
use super::gateway::Gateway;
use super::messages::{GatewayFrame, OpCode, VoiceStateRequest};
use super::session::{CloseReason, Outbound, Session, SessionHandle};
use crate::domain::Presence;
use crate::infrastructure::metrics;
use crate::startup::AppState;

/// Upper bound on flushing queued frames before a server-initiated close
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// How long to wait for the write task after the read loop ends
const WRITER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let max_message_size = state.settings.gateway.max_message_size;
    let max_frame_size = state.settings.gateway.max_frame_size;
    let gateway = state.gateway.clone();
    ws.max_message_size(max_message_size)
        .max_frame_size(max_frame_size)
        .on_upgrade(move |socket| handle_socket(socket, gateway))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, gateway: Arc<Gateway>) {
    let (mut sender, mut receiver) = socket.split();
    let mut handshake = gateway.handshake();

    let hello = handshake.hello();
    if let Err(e) = send_frame(&mut sender, &hello).await {
        tracing::debug!(error = %e, "Failed to send Hello");
        return;
    }

    let identify_timeout = gateway.settings().identify_timeout();
    let frame = match timeout(identify_timeout, next_frame(&mut receiver)).await {
        Ok(Ok(Some(frame))) => frame,
        Ok(Ok(None)) => {
            tracing::debug!("Connection closed before Identify");
            return;
        }
        Ok(Err(code)) => {
            send_close(&mut sender, code).await;
            return;
        }
        Err(_) => {
            tracing::debug!("Identify timeout");
            send_close(&mut sender, CloseCode::SessionTimedOut).await;
            return;
        }
    };

    let identify = match handshake.accept_identify(&frame) {
        Ok(identify) => identify,
        Err(code) => {
            send_close(&mut sender, code).await;
            return;
        }
    };

    let admission = match handshake.admit(identify).await {
        Ok(admission) => admission,
        Err(code) => {
            send_close(&mut sender, code).await;
            return;
        }
    };

    let session = admission.session;
    let mut close_rx = admission.handle.close_signal.clone();
    gateway.session_started(&session, admission.presence);

    let writer = tokio::spawn(write_loop(sender, session.clone(), admission.handle));

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(code) = handle_frame(&gateway, &session, text.as_str()) {
                            close_for_protocol(&session, code);
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        close_for_protocol(&session, CloseCode::DecodeError);
                        break;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(session_id = %session.id(), "Connection closed");
                        if session.close(CloseReason::ClientDisconnected) {
                            metrics::record_session_closed(CloseReason::ClientDisconnected.as_str());
                        }
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::debug!(session_id = %session.id(), error = %e, "WebSocket error");
                        if session.close(CloseReason::ClientDisconnected) {
                            metrics::record_session_closed(CloseReason::ClientDisconnected.as_str());
                        }
                        break;
                    }
                    // Pong is handled automatically by axum
                    Some(Ok(_)) => {}
                }
            }
            _ = close_rx.changed() => break,
        }
    }

    // Unregister first so no new dispatch is routed here while the writer
    // flushes.
    gateway.end_session(session.id());
    if timeout(WRITER_SHUTDOWN_TIMEOUT, writer).await.is_err() {
        tracing::debug!(session_id = %session.id(), "Write task did not finish in time");
    }
}

/// Handle one client frame from an identified session.
fn handle_frame(gateway: &Gateway, session: &Session, text: &str) -> Result<(), CloseCode> {
    let frame: GatewayFrame = serde_json::from_str(text).map_err(|_| CloseCode::DecodeError)?;

    match frame.opcode() {
        Ok(OpCode::Heartbeat) => {
            session.acknowledge_heartbeat(Instant::now());
            session.enqueue_or_close(Outbound::HeartbeatAck);
            tracing::trace!(session_id = %session.id(), "Heartbeat received");
        }
        Ok(OpCode::PresenceUpdate) => {
            let presence: Presence = frame.payload().map_err(|_| CloseCode::DecodeError)?;
            gateway.update_presence(session, presence);
        }
        Ok(OpCode::VoiceStateUpdate) => {
            let request: VoiceStateRequest =
                frame.payload().map_err(|_| CloseCode::DecodeError)?;
            gateway.update_voice_state(session, request);
        }
        Ok(OpCode::Identify) => return Err(CloseCode::AlreadyAuthenticated),
        Ok(op) => {
            tracing::debug!(session_id = %session.id(), op = op as u16, "Opcode not accepted from clients");
            return Err(CloseCode::UnknownOpcode);
        }
        Err(op) => {
            tracing::debug!(session_id = %session.id(), op, "Unknown opcode");
            return Err(CloseCode::UnknownOpcode);
        }
    }
    Ok(())
}

fn close_for_protocol(session: &Session, code: CloseCode) {
    let reason = CloseReason::Protocol(code);
    if session.close(reason) {
        metrics::record_session_closed(reason.as_str());
        tracing::info!(
            session_id = %session.id(),
            code = code.as_u16(),
            "Closing session for protocol violation"
        );
    }
}

/// Drain the session queue into the socket until the session closes.
async fn write_loop(mut sender: WsSink, session: Arc<Session>, mut handle: SessionHandle) {
    loop {
        tokio::select! {
            item = handle.outbound.recv() => {
                let Some(item) = item else { break };
                if let Err(e) = send_frame(&mut sender, &outbound_frame(&session, item)).await {
                    tracing::debug!(session_id = %session.id(), error = %e, "Socket write failed");
                    if session.close(CloseReason::ClientDisconnected) {
                        metrics::record_session_closed(CloseReason::ClientDisconnected.as_str());
                    }
                    return;
                }
            }
            _ = handle.close_signal.changed() => break,
        }
    }

    let reason = session.close_reason();
    if reason.is_some_and(|r| r.flushes_queue()) {
        let flush = async {
            while let Ok(item) = handle.outbound.try_recv() {
                if send_frame(&mut sender, &outbound_frame(&session, item)).await.is_err() {
                    break;
                }
            }
        };
        let _ = timeout(FLUSH_TIMEOUT, flush).await;
    }

    if let Some(code) = reason.and_then(|r| r.close_code()) {
        send_close(&mut sender, code).await;
    }
    let _ = sender.close().await;
}

fn outbound_frame(session: &Session, item: Outbound) -> GatewayFrame {
    match item {
        Outbound::Dispatch(dispatch) => GatewayFrame::dispatch(
            dispatch.kind.as_str(),
            session.next_sequence(),
            dispatch.data.clone(),
        ),
        Outbound::HeartbeatAck => GatewayFrame::new(OpCode::HeartbeatAck, None),
        Outbound::HeartbeatRequest => GatewayFrame::new(OpCode::Heartbeat, None),
        Outbound::InvalidSession => GatewayFrame::new(OpCode::InvalidSession, Some(json!(false))),
        Outbound::Reconnect => GatewayFrame::new(OpCode::Reconnect, None),
    }
}

/// Read until the next text frame. `Ok(None)` means the peer went away.
async fn next_frame(receiver: &mut WsStream) -> Result<Option<GatewayFrame>, CloseCode> {
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                return serde_json::from_str(text.as_str())
                    .map(Some)
                    .map_err(|_| CloseCode::DecodeError);
            }
            Ok(Message::Binary(_)) => return Err(CloseCode::DecodeError),
            Ok(Message::Close(_)) | Err(_) => return Ok(None),
            Ok(_) => continue,
        }
    }
    Ok(None)
}

async fn send_frame(sender: &mut WsSink, frame: &GatewayFrame) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize frame");
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}

async fn send_close(sender: &mut WsSink, code: CloseCode) {
    tracing::debug!(code = code.as_u16(), reason = code.reason(), "Closing connection");
    let frame = CloseFrame {
        code: code.as_u16(),
        reason: Utf8Bytes::from_static(code.reason()),
    };
    let _ = sender.send(Message::Close(Some(frame))).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventKind, Snowflake};
    use crate::presentation::websocket::heartbeat::HeartbeatRecord;
    use crate::presentation::websocket::session::Dispatch;

    #[test]
    fn test_dispatch_frames_take_increasing_sequence() {
        let (session, _handle) = Session::new(
            Snowflake(1),
            HeartbeatRecord::new(Duration::from_secs(40), Duration::from_secs(5), Instant::now()),
            4,
        );
        let dispatch = Arc::new(Dispatch {
            kind: EventKind::MessageCreate,
            data: json!({"id": "1"}),
        });

        let first = outbound_frame(&session, Outbound::Dispatch(dispatch.clone()));
        let ack = outbound_frame(&session, Outbound::HeartbeatAck);
        let second = outbound_frame(&session, Outbound::Dispatch(dispatch));

        assert_eq!(first.s, Some(1));
        assert_eq!(first.t.as_deref(), Some("MESSAGE_CREATE"));
        assert_eq!(ack.s, None);
        assert_eq!(ack.op, OpCode::HeartbeatAck as u16);
        assert_eq!(second.s, Some(2));
    }

    #[test]
    fn test_invalid_session_frame_is_not_resumable() {
        let (session, _handle) = Session::new(
            Snowflake(1),
            HeartbeatRecord::new(Duration::from_secs(40), Duration::from_secs(5), Instant::now()),
            4,
        );
        let frame = outbound_frame(&session, Outbound::InvalidSession);
        assert_eq!(frame.op, 9);
        assert_eq!(frame.d, Some(json!(false)));
    }
}
