//! Transport abstraction for the conversation socket.
//!
//! [`Connector`] performs the handshake and yields a [`Transport`] that moves
//! JSON text frames. The session channel only ever talks to these traits, so
//! tests swap in an in-memory pair.

use crate::config::AgentEndpoint;
use crate::error::{Result, VoiceError};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::Message};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures::stream::SplitSink<WsStream, Message>;
type WsSource = futures::stream::SplitStream<WsStream>;

/// An established, bidirectional text-frame connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one text frame.
    async fn send_text(&self, text: String) -> Result<()>;

    /// Wait for the next inbound text frame.
    ///
    /// Returns `None` once the remote side has closed the connection.
    async fn next_message(&self) -> Option<Result<String>>;

    /// Close the connection. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

/// Shared handle to a transport.
pub type SharedTransport = Arc<dyn Transport>;

/// Opens transports to an agent endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Perform the handshake.
    async fn connect(&self, endpoint: &AgentEndpoint) -> Result<SharedTransport>;
}

/// Connector for the agent's WebSocket endpoint.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a new connector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &AgentEndpoint) -> Result<SharedTransport> {
        let transport = WebSocketTransport::connect(endpoint).await?;
        Ok(Arc::new(transport))
    }
}

/// WebSocket connection to the agent.
pub struct WebSocketTransport {
    connection_id: String,
    connected: Arc<AtomicBool>,
    sender: Arc<Mutex<WsSink>>,
    receiver: Arc<Mutex<WsSource>>,
}

impl WebSocketTransport {
    /// Connect to the endpoint, authenticating with `xi-api-key` when a credential is set.
    pub async fn connect(endpoint: &AgentEndpoint) -> Result<Self> {
        let url = endpoint.connect_url()?;

        let mut request = url.as_str().into_client_request().map_err(|e| {
            VoiceError::connection(format!("Failed to create client request: {}", e))
        })?;

        if let Some(key) = endpoint.api_key() {
            let mut value = HeaderValue::from_str(key)
                .map_err(|e| VoiceError::config(format!("Invalid API key header: {}", e)))?;
            value.set_sensitive(true);
            request.headers_mut().insert("xi-api-key", value);
        }

        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| VoiceError::connection(format!("WebSocket connect error: {}", e)))?;

        let (sink, source) = stream.split();
        let connection_id = uuid::Uuid::new_v4().to_string();

        tracing::debug!(connection_id = %connection_id, agent_id = %endpoint.agent_id, "WebSocket connected");

        Ok(Self {
            connection_id,
            connected: Arc::new(AtomicBool::new(true)),
            sender: Arc::new(Mutex::new(sink)),
            receiver: Arc::new(Mutex::new(source)),
        })
    }

    /// Client-side id for log correlation.
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Whether the connection is still up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send_text(&self, text: String) -> Result<()> {
        if !self.is_connected() {
            return Err(VoiceError::NotConnected);
        }

        let mut sender = self.sender.lock().await;
        sender.send(Message::Text(text.into())).await.map_err(|e| {
            self.connected.store(false, Ordering::SeqCst);
            VoiceError::connection(format!("Send error: {}", e))
        })
    }

    async fn next_message(&self) -> Option<Result<String>> {
        let mut receiver = self.receiver.lock().await;

        loop {
            match receiver.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text.to_string())),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(e) => {
                        tracing::warn!(
                            connection_id = %self.connection_id,
                            error = %e,
                            "skipping binary frame with invalid UTF-8"
                        );
                        continue;
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(connection_id = %self.connection_id, ?frame, "remote closed");
                    self.connected.store(false, Ordering::SeqCst);
                    return None;
                }
                // Ping/pong frames are answered by tungstenite itself.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Some(Err(VoiceError::connection(format!("Receive error: {}", e))));
                }
                None => {
                    self.connected.store(false, Ordering::SeqCst);
                    return None;
                }
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let mut sender = self.sender.lock().await;
        sender
            .send(Message::Close(None))
            .await
            .map_err(|e| VoiceError::connection(format!("Close error: {}", e)))?;

        Ok(())
    }
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("connection_id", &self.connection_id)
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish()
    }
}
