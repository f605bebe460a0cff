//! Common Test Utilities
//!
//! Spawns the gateway on an ephemeral port with an in-memory ready-state store
//! and provides a small websocket client for driving the protocol.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chat_gateway::config::{
    GatewaySettings, InternalSettings, JwtSettings, ReadyStateSettings, ServerSettings, Settings,
};
use chat_gateway::domain::{GuildSummary, ReadyState, Snowflake};
use chat_gateway::infrastructure::auth::{Claims, JwtAuthenticator};
use chat_gateway::infrastructure::state::InMemoryReadyStateRepository;
use chat_gateway::presentation::websocket::{Gateway, GatewayFrame};
use chat_gateway::startup::Application;
use futures::{SinkExt, StreamExt};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Map, Value};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub const JWT_SECRET: &str = "integration-test-secret-at-least-32-bytes";
pub const INTERNAL_TOKEN: &str = "internal-test-token";

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub fn test_settings() -> Settings {
    Settings {
        server: ServerSettings {
            host: "127.0.0.1".into(),
            port: 0,
        },
        jwt: JwtSettings {
            secret: JWT_SECRET.into(),
        },
        gateway: GatewaySettings::default(),
        internal: InternalSettings {
            token: INTERNAL_TOKEN.into(),
        },
        ready_state: ReadyStateSettings {
            url: None,
            timeout_secs: 5,
        },
        environment: "test".into(),
    }
}

/// Running gateway instance
pub struct TestApp {
    pub addr: SocketAddr,
    pub gateway: Arc<Gateway>,
    pub ready_state: Arc<InMemoryReadyStateRepository>,
    pub http: reqwest::Client,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(test_settings()).await
    }

    pub async fn spawn_with(settings: Settings) -> Self {
        let ready_state = Arc::new(InMemoryReadyStateRepository::new());
        let authenticator = Arc::new(JwtAuthenticator::new(&settings.jwt.secret));

        let app = Application::build_with(settings, authenticator, ready_state.clone())
            .await
            .expect("Failed to build application");
        let addr = app.local_addr().expect("Failed to read local address");
        let gateway = app.gateway();

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(app.run_with_shutdown(async move {
            let _ = shutdown_rx.await;
        }));

        Self {
            addr,
            gateway,
            ready_state,
            http: reqwest::Client::new(),
            shutdown: Some(shutdown),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Seed the ready snapshot for a user with the given guild memberships.
    pub fn add_user(&self, user_id: i64, guilds: &[i64]) {
        let state = ReadyState {
            guilds: guilds
                .iter()
                .map(|id| GuildSummary {
                    id: Snowflake(*id),
                    extra: Map::new(),
                })
                .collect(),
            ..ReadyState::empty(Snowflake(user_id))
        };
        self.ready_state.insert(Snowflake(user_id), state);
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.http
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// POST with the internal bearer token
    pub async fn post_internal(&self, path: &str, body: &Value) -> reqwest::Response {
        self.http
            .post(self.url(path))
            .bearer_auth(INTERNAL_TOKEN)
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn publish(&self, body: Value) -> reqwest::Response {
        self.post_internal("/internal/events", &body).await
    }

    pub async fn connect(&self) -> GatewayConnection {
        let (stream, _) = connect_async(format!("ws://{}/gateway", self.addr))
            .await
            .expect("Failed to connect to gateway");
        GatewayConnection { stream }
    }

    /// Connect, read Hello, identify, and return the connection positioned
    /// after READY.
    pub async fn identify(&self, user_id: i64) -> (GatewayConnection, GatewayFrame) {
        let mut conn = self.connect().await;
        let hello = conn.recv().await;
        assert_eq!(hello.op, 10);
        conn.send_identify(&token_for(user_id)).await;
        let ready = conn.recv_dispatch("READY").await;
        (conn, ready)
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub fn token_for(user_id: i64) -> String {
    token_with_expiry(user_id, chrono::Utc::now().timestamp() + 3600)
}

pub fn token_with_expiry(user_id: i64, exp: i64) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        exp,
        iat: chrono::Utc::now().timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("Failed to encode token")
}

/// Test websocket client
pub struct GatewayConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl GatewayConnection {
    pub async fn send_json(&mut self, value: Value) {
        self.send_text(value.to_string()).await;
    }

    pub async fn send_text(&mut self, text: String) {
        self.stream
            .send(Message::text(text))
            .await
            .expect("Failed to send frame");
    }

    pub async fn send_identify(&mut self, token: &str) {
        self.send_json(json!({
            "op": 2,
            "d": {
                "token": token,
                "properties": {"os": "linux", "browser": "test", "device": "test"}
            }
        }))
        .await;
    }

    /// Next text frame. Panics on close or timeout.
    pub async fn recv(&mut self) -> GatewayFrame {
        loop {
            let msg = tokio::time::timeout(RECV_TIMEOUT, self.stream.next())
                .await
                .expect("Timed out waiting for a frame")
                .expect("Connection ended")
                .expect("WebSocket error");
            match msg {
                Message::Text(text) => {
                    return serde_json::from_str(text.as_str()).expect("Invalid frame")
                }
                Message::Close(frame) => panic!("Unexpected close: {:?}", frame),
                _ => continue,
            }
        }
    }

    /// Next dispatch named `event`, skipping any other frames.
    pub async fn recv_dispatch(&mut self, event: &str) -> GatewayFrame {
        loop {
            let frame = self.recv().await;
            if frame.op == 0 && frame.t.as_deref() == Some(event) {
                return frame;
            }
        }
    }

    /// Read until the server closes. Returns the close code, if any.
    pub async fn recv_close(&mut self) -> Option<u16> {
        loop {
            let msg = tokio::time::timeout(RECV_TIMEOUT, self.stream.next())
                .await
                .expect("Timed out waiting for close");
            match msg {
                Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return None,
            }
        }
    }
}
