//! # aria-voice
//!
//! Live voice-call pipeline for the ARIA receptionist.
//!
//! A call is a duplex audio session with a remote conversational agent: microphone
//! audio is captured, encoded as base64 PCM16 and streamed over a WebSocket, and
//! the agent's synthesized speech comes back over the same socket to be played
//! without gaps, overlaps or stale audio after an interruption.
//!
//! ## Architecture
//!
//! ```text
//!   ┌────────────┐  frames   ┌──────────────┐  JSON text  ┌───────────────┐
//!   │ Microphone ├──────────►│   Capture    ├────────────►│               │
//!   └────────────┘           │ mute · gain  │             │    Session    │
//!                            │ resample ·   │             │    Channel    │◄──► agent
//!   ┌────────────┐  renders  │ encode       │   audio /   │               │
//!   │  Speaker   │◄──────────┤  Playback    │◄────────────┤               │
//!   └────────────┘           │  Queue       │ interruption└───────────────┘
//!                            └──────────────┘
//!                 └──────────── CallSession (state machine) ────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use aria_voice::{CallController, VoiceConfig, WebSocketConnector};
//! use aria_voice::device::CpalBackend;
//! use std::sync::Arc;
//!
//! let config = VoiceConfig::from_env()?;
//! let controller = CallController::new(
//!     config,
//!     Arc::new(CpalBackend::new()),
//!     Arc::new(WebSocketConnector::new()),
//! );
//!
//! controller.open().await;
//! // ... render controller.snapshot() ...
//! controller.toggle_mute();
//! controller.close().await;
//! ```

#![warn(missing_docs)]

pub mod audio;
pub mod capture;
pub mod channel;
pub mod codec;
pub mod config;
pub mod controller;
pub mod error;
pub mod lead;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod transport;

// Desktop audio devices
#[cfg(feature = "desktop-audio")]
pub mod device;

// Re-exports
pub use audio::{AudioFormat, AudioFrame, PlaybackItem};
pub use capture::{AudioBackend, CapturePipeline, CaptureStrategy, FrameCallback, InputDevice};
pub use channel::{ChannelEvent, ChannelPhase, SessionChannel};
pub use config::{AgentEndpoint, CaptureConfig, PlaybackConfig, StrategyPreference, VoiceConfig, VoiceConfigBuilder};
pub use controller::CallController;
pub use error::{ErrorKind, Result, VoiceError};
pub use lead::{LeadPayload, LeadWebhook};
pub use playback::{AudioOutput, CompletionHandle, PlaybackQueue, RenderRequest};
pub use protocol::{AudioExtractor, ClientMessage, InboundEvent, InboundParser, PayloadShape, ProtocolConfig};
pub use session::{CallError, CallPhase, CallSession, CallSnapshot, ConnectionPhase};
pub use transport::{Connector, SharedTransport, Transport, WebSocketConnector, WebSocketTransport};
