//! Call session state machine.
//!
//! `Idle → Connecting → Listening ⇄ Speaking → Ended`. A session runs exactly one
//! call; `Ended` is terminal. All observable state is published as a
//! [`CallSnapshot`] on a watch channel.

use crate::audio::AudioFormat;
use crate::capture::{AudioBackend, CapturePipeline};
use crate::channel::{ChannelEvent, ChannelPhase, SessionChannel};
use crate::codec;
use crate::config::VoiceConfig;
use crate::error::{ErrorKind, Result, VoiceError};
use crate::playback::{AudioOutput, PlaybackQueue};
use crate::transport::Connector;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Lifecycle phase of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    /// Not started.
    Idle,
    /// Acquiring the microphone or waiting for the handshake.
    Connecting,
    /// Connected; the agent is silent.
    Listening,
    /// Connected; agent speech is playing.
    Speaking,
    /// Finished. Terminal.
    Ended,
}

impl CallPhase {
    /// Whether the call is connected.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Listening | Self::Speaking)
    }
}

/// Connection phase as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    /// No connection attempted.
    Idle,
    /// Handshake in flight.
    Connecting,
    /// Connected.
    Open,
    /// Teardown in progress.
    Closing,
    /// Closed.
    Closed,
}

/// Error recorded on a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallError {
    /// Error category.
    pub kind: ErrorKind,
    /// Message safe to show the caller.
    pub message: String,
}

impl From<&VoiceError> for CallError {
    fn from(error: &VoiceError) -> Self {
        Self { kind: error.kind(), message: error.user_message() }
    }
}

/// Point-in-time view of a call for the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSnapshot {
    /// Call phase.
    pub phase: CallPhase,
    /// Connection phase.
    pub connection: ConnectionPhase,
    /// Whether the microphone is muted.
    pub muted: bool,
    /// Whether agent speech is playing.
    pub agent_speaking: bool,
    /// Last error, if the call ended because of one.
    pub error: Option<CallError>,
    /// Conversation id reported by the agent.
    pub conversation_id: Option<String>,
}

impl Default for CallSnapshot {
    fn default() -> Self {
        Self {
            phase: CallPhase::Idle,
            connection: ConnectionPhase::Idle,
            muted: false,
            agent_speaking: false,
            error: None,
            conversation_id: None,
        }
    }
}

#[derive(Default)]
struct Resources {
    capture: Option<CapturePipeline>,
    playback: Option<PlaybackQueue>,
    channel: Option<SessionChannel>,
    output: Option<Arc<dyn AudioOutput>>,
}

struct SessionState {
    phase: CallPhase,
    resources: Resources,
    tasks: Vec<JoinHandle<()>>,
}

struct SessionInner {
    call_id: String,
    config: VoiceConfig,
    backend: Arc<dyn AudioBackend>,
    connector: Arc<dyn Connector>,
    muted: Arc<AtomicBool>,
    state: Mutex<SessionState>,
    snapshot: watch::Sender<CallSnapshot>,
    teardown: tokio::sync::Mutex<()>,
}

/// One voice call with the remote agent.
#[derive(Clone)]
pub struct CallSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("call_id", &self.inner.call_id)
            .field("phase", &self.inner.state.lock().phase)
            .finish()
    }
}

impl CallSession {
    /// Create an idle session.
    pub fn new(
        config: VoiceConfig,
        backend: Arc<dyn AudioBackend>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (snapshot, _) = watch::channel(CallSnapshot::default());
        Self {
            inner: Arc::new(SessionInner {
                call_id: uuid::Uuid::new_v4().to_string(),
                config,
                backend,
                connector,
                muted: Arc::new(AtomicBool::new(false)),
                state: Mutex::new(SessionState {
                    phase: CallPhase::Idle,
                    resources: Resources::default(),
                    tasks: Vec::new(),
                }),
                snapshot,
                teardown: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Client-side id used in logs.
    pub fn call_id(&self) -> &str {
        &self.inner.call_id
    }

    /// Current state.
    pub fn snapshot(&self) -> CallSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Current phase.
    pub fn phase(&self) -> CallPhase {
        self.inner.state.lock().phase
    }

    /// Start the call. Only valid from `Idle`.
    ///
    /// Acquires the microphone, opens the speaker and the session channel, and
    /// starts streaming. Failures end the call with the error recorded on the
    /// snapshot and are also returned.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        {
            let mut state = inner.state.lock();
            if state.phase != CallPhase::Idle {
                return Err(VoiceError::state(format!(
                    "call can only be started once (phase: {:?})",
                    state.phase
                )));
            }
            state.phase = CallPhase::Connecting;
        }
        inner.publish(|s| s.phase = CallPhase::Connecting);
        tracing::info!(call_id = %inner.call_id, agent_id = %inner.config.endpoint.agent_id, "starting call");

        let mut microphone = match inner.backend.acquire_microphone().await {
            Ok(microphone) => microphone,
            Err(e) => {
                tracing::warn!(call_id = %inner.call_id, error = %e, "microphone unavailable");
                inner.end(Some(&e)).await;
                return Err(e);
            }
        };

        if inner.is_ended() {
            microphone.stop();
            return Err(VoiceError::state("call stopped during start"));
        }

        let output = match inner.backend.open_output(inner.config.playback.agent_sample_rate).await {
            Ok(output) => output,
            Err(e) => {
                microphone.stop();
                inner.end(Some(&e)).await;
                return Err(e);
            }
        };

        let channel = SessionChannel::new(
            inner.config.endpoint.clone(),
            Arc::clone(&inner.connector),
            inner.config.protocol.clone(),
            inner.config.connect_timeout(),
        );
        let playback = PlaybackQueue::new(Arc::clone(&output));
        let mut capture =
            CapturePipeline::new(microphone, inner.config.capture.clone(), Arc::clone(&inner.muted));

        let wired = {
            let mut state = inner.state.lock();
            if state.phase != CallPhase::Connecting {
                Err((capture, output))
            } else {
                // The microphone must be live before anything is dialled.
                let started = capture.start().and_then(|()| {
                    let events = channel.open()?;
                    let sink_channel = channel.clone();
                    capture.forward(Box::new(move |chunk| sink_channel.send(chunk)))?;
                    Ok(events)
                });
                let dialled = channel.phase() != ChannelPhase::Idle;

                let result = match started {
                    Ok(events) => {
                        inner.publish(|s| s.connection = ConnectionPhase::Connecting);
                        let dispatcher =
                            tokio::spawn(Arc::clone(inner).dispatch(events, playback.clone()));
                        let watcher =
                            tokio::spawn(Arc::clone(inner).watch_speaking(playback.subscribe()));
                        state.tasks.push(dispatcher);
                        state.tasks.push(watcher);
                        Ok(())
                    }
                    Err(e) => Err(e),
                };

                state.resources = Resources {
                    capture: Some(capture),
                    playback: Some(playback),
                    channel: dialled.then_some(channel),
                    output: Some(output),
                };
                Ok(result)
            }
        };

        match wired {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::error!(call_id = %inner.call_id, error = %e, "failed to start call");
                inner.end(Some(&e)).await;
                Err(e)
            }
            Err((mut capture, output)) => {
                capture.stop().await;
                output.close();
                Err(VoiceError::state("call stopped during start"))
            }
        }
    }

    /// End the call, releasing every device and connection. Idempotent.
    ///
    /// Once this returns nothing is captured, played or sent.
    pub async fn stop(&self) {
        self.inner.end(None).await;

        let tasks = std::mem::take(&mut self.inner.state.lock().tasks);
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Mute or unmute the microphone. Muted frames are discarded at the source.
    pub fn set_muted(&self, muted: bool) {
        self.inner.muted.store(muted, Ordering::Relaxed);
        self.inner.publish(|s| s.muted = muted);
        tracing::debug!(call_id = %self.inner.call_id, muted, "mute changed");
    }

    /// Whether the microphone is muted.
    pub fn is_muted(&self) -> bool {
        self.inner.muted.load(Ordering::Relaxed)
    }
}

impl SessionInner {
    fn publish(&self, update: impl FnOnce(&mut CallSnapshot)) {
        self.snapshot.send_modify(update);
    }

    fn is_ended(&self) -> bool {
        self.state.lock().phase == CallPhase::Ended
    }

    /// Release resources in order and move to `Ended`.
    async fn end(&self, error: Option<&VoiceError>) {
        let _guard = self.teardown.lock().await;

        let resources = {
            let mut state = self.state.lock();
            if state.phase == CallPhase::Ended {
                return;
            }
            state.phase = CallPhase::Ended;
            std::mem::take(&mut state.resources)
        };

        if resources.channel.is_some() {
            self.publish(|s| s.connection = ConnectionPhase::Closing);
        }

        if let Some(mut capture) = resources.capture {
            capture.stop().await;
        }
        if let Some(playback) = resources.playback {
            playback.stop();
        }
        if let Some(channel) = resources.channel {
            channel.close().await;
        }
        if let Some(output) = resources.output {
            output.close();
        }

        let recorded = error.map(CallError::from);
        self.publish(|s| {
            s.phase = CallPhase::Ended;
            if s.connection != ConnectionPhase::Idle {
                s.connection = ConnectionPhase::Closed;
            }
            s.agent_speaking = false;
            if recorded.is_some() {
                s.error = recorded;
            }
        });

        match error {
            Some(e) => tracing::warn!(call_id = %self.call_id, error = %e, "call ended with error"),
            None => tracing::info!(call_id = %self.call_id, "call ended"),
        }
    }

    async fn dispatch(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<ChannelEvent>,
        playback: PlaybackQueue,
    ) {
        let mut agent_rate = self.config.playback.agent_sample_rate;

        while let Some(event) = events.recv().await {
            match event {
                ChannelEvent::Opened => {
                    let phase = {
                        let mut state = self.state.lock();
                        if state.phase == CallPhase::Connecting {
                            state.phase = if playback.is_speaking() {
                                CallPhase::Speaking
                            } else {
                                CallPhase::Listening
                            };
                        }
                        state.phase
                    };
                    if phase.is_active() {
                        self.publish(|s| {
                            s.connection = ConnectionPhase::Open;
                            s.phase = phase;
                        });
                        tracing::info!(call_id = %self.call_id, "call connected");
                    }
                }
                ChannelEvent::Audio { payload, event_id } => match codec::decode(&payload, agent_rate) {
                    Ok(item) => playback.enqueue(item),
                    Err(e) => {
                        tracing::warn!(call_id = %self.call_id, ?event_id, error = %e, "dropping agent audio chunk");
                    }
                },
                ChannelEvent::Interruption => playback.interrupt(),
                ChannelEvent::Metadata { conversation_id, output_format } => {
                    if let Some(format) = output_format.as_deref().and_then(AudioFormat::from_tag) {
                        if format.sample_rate != agent_rate {
                            tracing::info!(
                                call_id = %self.call_id,
                                configured = agent_rate,
                                reported = format.sample_rate,
                                "agent reported a different output rate"
                            );
                            agent_rate = format.sample_rate;
                        }
                    }
                    self.publish(|s| s.conversation_id = conversation_id);
                }
                ChannelEvent::Closed => {
                    self.end(None).await;
                    break;
                }
                ChannelEvent::Failed(e) => {
                    self.end(Some(&e)).await;
                    break;
                }
            }
        }
    }

    async fn watch_speaking(self: Arc<Self>, mut speaking: watch::Receiver<bool>) {
        while speaking.changed().await.is_ok() {
            let is_speaking = *speaking.borrow_and_update();
            let phase = {
                let mut state = self.state.lock();
                if state.phase.is_active() {
                    state.phase = if is_speaking { CallPhase::Speaking } else { CallPhase::Listening };
                }
                state.phase
            };
            self.publish(|s| {
                s.agent_speaking = is_speaking && phase != CallPhase::Ended;
                if s.phase.is_active() && phase.is_active() {
                    s.phase = phase;
                }
            });
        }
    }
}
