//! Wire protocol for the conversation socket.
//!
//! Messages are JSON text frames. Outbound audio frames carry no discriminator
//! (`{"user_audio_chunk": "<base64>"}`); everything inbound carries one, `type`
//! by default. Where the base64 payload of an inbound audio message lives differs
//! between agent deployments, so extraction goes through [`AudioExtractor`].

use crate::error::{Result, VoiceError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

// ── Outbound ────────────────────────────────────────────────────────────

/// Messages sent from the client to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ClientMessage {
    /// One encoded microphone frame.
    UserAudioChunk {
        /// Base64 PCM16.
        user_audio_chunk: String,
    },
    /// Keep-alive answer to an inbound ping.
    Pong {
        /// Always `"pong"`.
        #[serde(rename = "type")]
        kind: String,
        /// Id of the ping being answered.
        event_id: u64,
    },
}

impl ClientMessage {
    /// Wrap an encoded chunk.
    pub fn audio(chunk: impl Into<String>) -> Self {
        Self::UserAudioChunk { user_audio_chunk: chunk.into() }
    }

    /// Answer a ping.
    pub fn pong(event_id: u64) -> Self {
        Self::Pong { kind: "pong".to_string(), event_id }
    }

    /// Serialize to a text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ── Inbound ─────────────────────────────────────────────────────────────

/// A parsed inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Synthesized speech.
    Audio {
        /// Base64 PCM16 payload.
        payload: String,
        /// Agent-side event id, when present.
        event_id: Option<u64>,
    },
    /// The caller talked over the agent; queued speech must be discarded.
    Interruption,
    /// Keep-alive probe.
    Ping {
        /// Id to echo in the pong.
        event_id: u64,
        /// Delay the agent asks for before answering.
        ping_ms: Option<u64>,
    },
    /// Conversation start metadata.
    Metadata {
        /// Conversation id assigned by the agent.
        conversation_id: Option<String>,
        /// Output format tag, e.g. `pcm_16000`.
        output_format: Option<String>,
    },
    /// Known informational message (transcripts, agent text, VAD scores).
    Status {
        /// Discriminator value.
        kind: String,
        /// Full message body.
        body: Value,
    },
    /// Discriminator not recognized.
    Unrecognized {
        /// Discriminator value, or empty when the field is missing.
        kind: String,
    },
}

/// Location of the base64 audio payload inside an inbound audio message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PayloadShape {
    /// `audio_event.audio_base_64`
    #[default]
    Nested,
    /// Top-level `audio`.
    TopLevel,
    /// Any JSON pointer, e.g. `/data/pcm`.
    Pointer(String),
}

impl PayloadShape {
    /// JSON pointer for this shape.
    pub fn pointer(&self) -> &str {
        match self {
            Self::Nested => "/audio_event/audio_base_64",
            Self::TopLevel => "/audio",
            Self::Pointer(path) => path,
        }
    }
}

impl fmt::Display for PayloadShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nested => write!(f, "nested"),
            Self::TopLevel => write!(f, "top_level"),
            Self::Pointer(path) => write!(f, "{}", path),
        }
    }
}

impl FromStr for PayloadShape {
    type Err = VoiceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "nested" => Ok(Self::Nested),
            "top_level" | "top-level" => Ok(Self::TopLevel),
            path if path.starts_with('/') => Ok(Self::Pointer(path.to_string())),
            other => Err(VoiceError::config(format!(
                "unknown payload shape '{}' (expected nested, top_level or a JSON pointer)",
                other
            ))),
        }
    }
}

/// Pulls the base64 audio payload out of an inbound audio message.
pub trait AudioExtractor: Send + Sync {
    /// Return the payload, or `None` when this message does not carry one.
    fn extract<'a>(&self, message: &'a Value) -> Option<&'a str>;
}

impl AudioExtractor for PayloadShape {
    fn extract<'a>(&self, message: &'a Value) -> Option<&'a str> {
        message.pointer(self.pointer()).and_then(Value::as_str)
    }
}

/// Message vocabulary of the agent endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Field holding the message type.
    pub discriminator: String,
    /// Type of audio messages.
    pub audio_type: String,
    /// Type of interruption messages.
    pub interruption_type: String,
    /// Type of keep-alive pings.
    pub ping_type: String,
    /// Type of the conversation start message.
    pub metadata_type: String,
    /// Informational types that are logged at debug level.
    pub status_types: Vec<String>,
    /// Where audio payloads live.
    pub payload_shape: PayloadShape,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            discriminator: "type".to_string(),
            audio_type: "audio".to_string(),
            interruption_type: "interruption".to_string(),
            ping_type: "ping".to_string(),
            metadata_type: "conversation_initiation_metadata".to_string(),
            status_types: [
                "agent_response",
                "agent_response_correction",
                "user_transcript",
                "internal_tentative_agent_response",
                "vad_score",
                "client_tool_call",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            payload_shape: PayloadShape::Nested,
        }
    }
}

impl ProtocolConfig {
    /// Set the payload shape.
    pub fn with_payload_shape(mut self, shape: PayloadShape) -> Self {
        self.payload_shape = shape;
        self
    }
}

/// Turns inbound text frames into [`InboundEvent`]s.
pub struct InboundParser {
    config: ProtocolConfig,
    extractor: Box<dyn AudioExtractor>,
}

impl fmt::Debug for InboundParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundParser").field("config", &self.config).finish_non_exhaustive()
    }
}

impl InboundParser {
    /// Create a parser using the configured payload shape.
    pub fn new(config: ProtocolConfig) -> Self {
        let extractor = Box::new(config.payload_shape.clone());
        Self { config, extractor }
    }

    /// Replace the audio extractor.
    pub fn with_extractor(mut self, extractor: Box<dyn AudioExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Parse one text frame.
    ///
    /// Malformed JSON is a serialization error; an audio message whose payload
    /// cannot be found is a decode error.
    pub fn parse(&self, text: &str) -> Result<InboundEvent> {
        let message: Value = serde_json::from_str(text)?;

        let kind = match message.get(&self.config.discriminator).and_then(Value::as_str) {
            Some(kind) => kind,
            None => return Ok(InboundEvent::Unrecognized { kind: String::new() }),
        };

        let config = &self.config;
        if kind == config.audio_type {
            let payload = self
                .extractor
                .extract(&message)
                .ok_or_else(|| VoiceError::decode("audio message without payload"))?;
            let event_id = message
                .pointer("/audio_event/event_id")
                .or_else(|| message.get("event_id"))
                .and_then(Value::as_u64);
            Ok(InboundEvent::Audio { payload: payload.to_string(), event_id })
        } else if kind == config.interruption_type {
            Ok(InboundEvent::Interruption)
        } else if kind == config.ping_type {
            let event_id = message
                .pointer("/ping_event/event_id")
                .and_then(Value::as_u64)
                .ok_or_else(|| VoiceError::UnrecognizedMessage("ping without event_id".into()))?;
            let ping_ms = message.pointer("/ping_event/ping_ms").and_then(Value::as_u64);
            Ok(InboundEvent::Ping { event_id, ping_ms })
        } else if kind == config.metadata_type {
            let event = message.get("conversation_initiation_metadata_event");
            let field = |name: &str| {
                event.and_then(|e| e.get(name)).and_then(Value::as_str).map(String::from)
            };
            Ok(InboundEvent::Metadata {
                conversation_id: field("conversation_id"),
                output_format: field("agent_output_audio_format"),
            })
        } else if config.status_types.iter().any(|t| t == kind) {
            Ok(InboundEvent::Status { kind: kind.to_string(), body: message.clone() })
        } else {
            Ok(InboundEvent::Unrecognized { kind: kind.to_string() })
        }
    }
}
