//! Session channel: the persistent connection to the remote agent.
//!
//! Lifecycle is `Idle → Connecting → Open → Closed`, with `Error` reachable from
//! `Connecting` or `Open`. Frames captured while the handshake is in flight are
//! held in a pending queue and moved into the outbound queue under the same lock
//! that flips the phase to `Open`, so a direct send can never overtake them.

use crate::config::AgentEndpoint;
use crate::error::{ErrorKind, Result, VoiceError};
use crate::protocol::{ClientMessage, InboundEvent, InboundParser, ProtocolConfig};
use crate::transport::{Connector, SharedTransport};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Connection phase of a session channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelPhase {
    /// Not yet opened.
    Idle,
    /// Handshake in progress.
    Connecting,
    /// Connected; frames flow both ways.
    Open,
    /// Closed deliberately or by the remote side.
    Closed,
    /// Transport failure. Terminal.
    Error,
}

impl ChannelPhase {
    /// Whether the channel can no longer carry frames.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Error)
    }
}

/// Notifications delivered to the channel's owner.
#[derive(Debug)]
pub enum ChannelEvent {
    /// Handshake completed and pending frames were flushed.
    Opened,
    /// Agent speech (base64 PCM16).
    Audio {
        /// Encoded payload.
        payload: String,
        /// Agent-side event id, when present.
        event_id: Option<u64>,
    },
    /// The caller interrupted the agent.
    Interruption,
    /// Conversation metadata arrived.
    Metadata {
        /// Conversation id assigned by the agent.
        conversation_id: Option<String>,
        /// Agent output format tag.
        output_format: Option<String>,
    },
    /// Channel closed.
    Closed,
    /// Channel failed.
    Failed(VoiceError),
}

struct ChannelState {
    phase: ChannelPhase,
    pending: VecDeque<String>,
    outbound: Option<mpsc::UnboundedSender<ClientMessage>>,
    transport: Option<SharedTransport>,
    events: Option<mpsc::UnboundedSender<ChannelEvent>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ChannelState {
    fn emit(&self, event: ChannelEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

struct ChannelInner {
    endpoint: AgentEndpoint,
    connector: Arc<dyn Connector>,
    parser: InboundParser,
    connect_timeout: Duration,
    state: Mutex<ChannelState>,
}

/// Persistent bidirectional connection to the agent.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct SessionChannel {
    inner: Arc<ChannelInner>,
}

impl std::fmt::Debug for SessionChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SessionChannel")
            .field("agent_id", &self.inner.endpoint.agent_id)
            .field("phase", &state.phase)
            .field("pending", &state.pending.len())
            .finish()
    }
}

impl SessionChannel {
    /// Create an idle channel.
    pub fn new(
        endpoint: AgentEndpoint,
        connector: Arc<dyn Connector>,
        protocol: ProtocolConfig,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                endpoint,
                connector,
                parser: InboundParser::new(protocol),
                connect_timeout,
                state: Mutex::new(ChannelState {
                    phase: ChannelPhase::Idle,
                    pending: VecDeque::new(),
                    outbound: None,
                    transport: None,
                    events: None,
                    tasks: Vec::new(),
                }),
            }),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> ChannelPhase {
        self.inner.state.lock().phase
    }

    /// Number of frames waiting for the handshake.
    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Start the handshake. Only valid from `Idle`.
    ///
    /// Returns the stream of channel notifications. Must be called inside a tokio runtime.
    pub fn open(&self) -> Result<mpsc::UnboundedReceiver<ChannelEvent>> {
        let mut state = self.inner.state.lock();
        if state.phase != ChannelPhase::Idle {
            return Err(VoiceError::state(format!(
                "channel can only be opened once (phase: {:?})",
                state.phase
            )));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        state.events = Some(events_tx);
        state.phase = ChannelPhase::Connecting;

        tracing::info!(agent_id = %self.inner.endpoint.agent_id, "opening session channel");

        let inner = Arc::clone(&self.inner);
        state.tasks.push(tokio::spawn(async move { inner.connect().await }));

        Ok(events_rx)
    }

    /// Send one encoded audio chunk.
    ///
    /// Transmitted when open, queued while connecting, dropped otherwise.
    pub fn send(&self, chunk: String) {
        let mut state = self.inner.state.lock();
        match state.phase {
            ChannelPhase::Open => {
                if let Some(outbound) = &state.outbound {
                    let _ = outbound.send(ClientMessage::audio(chunk));
                }
            }
            ChannelPhase::Connecting => state.pending.push_back(chunk),
            phase => tracing::trace!(?phase, "dropping audio chunk, channel not connected"),
        }
    }

    /// Close the channel and wait for its tasks to finish.
    ///
    /// Safe from any phase and safe to call repeatedly. Once this returns no
    /// further frames are sent.
    pub async fn close(&self) {
        let (tasks, transport) = {
            let mut state = self.inner.state.lock();
            let was_live = matches!(state.phase, ChannelPhase::Connecting | ChannelPhase::Open);
            if state.phase != ChannelPhase::Error {
                state.phase = ChannelPhase::Closed;
            }
            state.pending.clear();
            state.outbound = None;
            if was_live {
                state.emit(ChannelEvent::Closed);
            }
            state.events = None;
            (std::mem::take(&mut state.tasks), state.transport.take())
        };

        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }

        if let Some(transport) = transport {
            if let Err(e) = transport.close().await {
                tracing::debug!(error = %e, "transport close failed");
            }
        }
    }
}

impl ChannelInner {
    async fn connect(self: Arc<Self>) {
        let result = tokio::time::timeout(self.connect_timeout, self.connector.connect(&self.endpoint))
            .await;

        let transport = match result {
            Ok(Ok(transport)) => transport,
            Ok(Err(e)) => {
                self.fail(e);
                return;
            }
            Err(_) => {
                self.fail(VoiceError::Timeout(format!(
                    "handshake did not complete within {}ms",
                    self.connect_timeout.as_millis()
                )));
                return;
            }
        };

        let opened = {
            let mut state = self.state.lock();
            if state.phase == ChannelPhase::Connecting {
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                let flushed = state.pending.len();
                for chunk in state.pending.drain(..) {
                    let _ = outbound_tx.send(ClientMessage::audio(chunk));
                }

                state.outbound = Some(outbound_tx);
                state.transport = Some(Arc::clone(&transport));
                state.phase = ChannelPhase::Open;

                let writer =
                    tokio::spawn(Arc::clone(&self).write_loop(Arc::clone(&transport), outbound_rx));
                let reader = tokio::spawn(Arc::clone(&self).read_loop(Arc::clone(&transport)));
                state.tasks.retain(|task| !task.is_finished());
                state.tasks.push(writer);
                state.tasks.push(reader);

                tracing::info!(flushed, "session channel open");
                state.emit(ChannelEvent::Opened);
                true
            } else {
                false
            }
        };

        if !opened {
            tracing::debug!("channel closed during handshake, discarding connection");
            let _ = transport.close().await;
        }
    }

    async fn write_loop(
        self: Arc<Self>,
        transport: SharedTransport,
        mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    ) {
        while let Some(message) = outbound.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to serialize outbound message");
                    continue;
                }
            };
            if let Err(e) = transport.send_text(text).await {
                self.fail(e);
                return;
            }
        }
    }

    async fn read_loop(self: Arc<Self>, transport: SharedTransport) {
        while let Some(message) = transport.next_message().await {
            match message {
                Ok(text) => self.dispatch(&text),
                Err(e) if e.kind() == ErrorKind::Connection => {
                    self.fail(e);
                    return;
                }
                Err(e) => tracing::warn!(error = %e, "skipping unreadable inbound frame"),
            }
        }
        self.remote_closed();
    }

    fn dispatch(self: &Arc<Self>, text: &str) {
        let event = match self.parser.parse(text) {
            Ok(event) => event,
            Err(VoiceError::DecodeError(reason)) => {
                tracing::warn!(%reason, "dropping undecodable audio message");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "ignoring malformed inbound message");
                return;
            }
        };

        match event {
            InboundEvent::Audio { payload, event_id } => {
                self.state.lock().emit(ChannelEvent::Audio { payload, event_id });
            }
            InboundEvent::Interruption => {
                tracing::debug!("agent interrupted");
                self.state.lock().emit(ChannelEvent::Interruption);
            }
            InboundEvent::Ping { event_id, ping_ms } => self.schedule_pong(event_id, ping_ms),
            InboundEvent::Metadata { conversation_id, output_format } => {
                tracing::info!(
                    conversation_id = conversation_id.as_deref().unwrap_or("-"),
                    output_format = output_format.as_deref().unwrap_or("-"),
                    "conversation started"
                );
                self.state.lock().emit(ChannelEvent::Metadata { conversation_id, output_format });
            }
            InboundEvent::Status { kind, body } => {
                tracing::debug!(%kind, %body, "agent status");
            }
            InboundEvent::Unrecognized { kind } => {
                tracing::warn!(%kind, "ignoring unrecognized message type");
            }
        }
    }

    fn schedule_pong(self: &Arc<Self>, event_id: u64, ping_ms: Option<u64>) {
        let mut state = self.state.lock();
        if state.phase != ChannelPhase::Open {
            return;
        }

        let delay = Duration::from_millis(ping_ms.unwrap_or(0));
        if delay.is_zero() {
            if let Some(outbound) = &state.outbound {
                let _ = outbound.send(ClientMessage::pong(event_id));
            }
            return;
        }

        let inner = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let state = inner.state.lock();
            if state.phase == ChannelPhase::Open {
                if let Some(outbound) = &state.outbound {
                    let _ = outbound.send(ClientMessage::pong(event_id));
                }
            }
        });
        state.tasks.retain(|task| !task.is_finished());
        state.tasks.push(task);
    }

    fn fail(&self, error: VoiceError) {
        let mut state = self.state.lock();
        if !matches!(state.phase, ChannelPhase::Connecting | ChannelPhase::Open) {
            return;
        }
        tracing::error!(error = %error, phase = ?state.phase, "session channel failed");
        state.phase = ChannelPhase::Error;
        state.pending.clear();
        state.outbound = None;
        state.emit(ChannelEvent::Failed(error));
    }

    fn remote_closed(&self) {
        let mut state = self.state.lock();
        if state.phase != ChannelPhase::Open {
            return;
        }
        tracing::info!("session channel closed by remote");
        state.phase = ChannelPhase::Closed;
        state.outbound = None;
        state.emit(ChannelEvent::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Refusing;

    #[async_trait]
    impl Connector for Refusing {
        async fn connect(&self, _endpoint: &AgentEndpoint) -> Result<SharedTransport> {
            Err(VoiceError::connection("refused"))
        }
    }

    struct Hanging;

    #[async_trait]
    impl Connector for Hanging {
        async fn connect(&self, _endpoint: &AgentEndpoint) -> Result<SharedTransport> {
            futures::future::pending().await
        }
    }

    fn channel(connector: Arc<dyn Connector>, timeout: Duration) -> SessionChannel {
        SessionChannel::new(AgentEndpoint::new("agent"), connector, ProtocolConfig::default(), timeout)
    }

    #[tokio::test]
    async fn test_send_before_open_is_dropped() {
        let channel = channel(Arc::new(Refusing), Duration::from_secs(1));
        channel.send("AAAA".into());
        assert_eq!(channel.pending_len(), 0);
        assert_eq!(channel.phase(), ChannelPhase::Idle);
    }

    #[tokio::test]
    async fn test_connect_failure_is_terminal_error() {
        let channel = channel(Arc::new(Refusing), Duration::from_secs(1));
        let mut events = channel.open().unwrap();

        match events.recv().await {
            Some(ChannelEvent::Failed(e)) => assert!(matches!(e, VoiceError::ConnectionError(_))),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(channel.phase(), ChannelPhase::Error);

        channel.send("AAAA".into());
        assert_eq!(channel.pending_len(), 0);
        channel.close().await;
        assert_eq!(channel.phase(), ChannelPhase::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout() {
        let channel = channel(Arc::new(Hanging), Duration::from_millis(500));
        let mut events = channel.open().unwrap();

        match events.recv().await {
            Some(ChannelEvent::Failed(e)) => assert!(matches!(e, VoiceError::Timeout(_))),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_open_twice_rejected() {
        let channel = channel(Arc::new(Hanging), Duration::from_secs(5));
        let _events = channel.open().unwrap();
        assert!(matches!(channel.open(), Err(VoiceError::InvalidState(_))));
        channel.close().await;
        assert_eq!(channel.phase(), ChannelPhase::Closed);
    }

    #[tokio::test]
    async fn test_close_while_connecting_discards_pending() {
        let channel = channel(Arc::new(Hanging), Duration::from_secs(5));
        let mut events = channel.open().unwrap();
        channel.send("AAAA".into());
        channel.send("BBBB".into());
        assert_eq!(channel.pending_len(), 2);

        channel.close().await;
        assert_eq!(channel.pending_len(), 0);
        assert!(matches!(events.recv().await, Some(ChannelEvent::Closed)));
        assert!(events.recv().await.is_none());
    }
}
