//! Error types for the voice-call pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for voice-call operations.
pub type Result<T> = std::result::Result<T, VoiceError>;

/// Errors that can occur while running a call.
#[derive(Error, Debug)]
pub enum VoiceError {
    /// Microphone access was refused or no input device is available.
    #[error("Microphone access denied: {0}")]
    PermissionDenied(String),

    /// Handshake or transport failure on the session channel.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Inbound audio payload could not be decoded.
    #[error("Audio decode error: {0}")]
    DecodeError(String),

    /// Inbound message with a discriminator this client does not know.
    #[error("Unrecognized message type: {0}")]
    UnrecognizedMessage(String),

    /// Channel is not open.
    #[error("Session channel not connected")]
    NotConnected,

    /// Operation is not valid in the current call phase.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Audio device failure after access was granted.
    #[error("Audio device error: {0}")]
    DeviceError(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Timeout waiting for the remote endpoint.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Lead webhook delivery failed.
    #[error("Webhook error: {0}")]
    WebhookError(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl VoiceError {
    /// Create a new permission error.
    pub fn permission<S: Into<String>>(msg: S) -> Self {
        Self::PermissionDenied(msg.into())
    }

    /// Create a new connection error.
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Create a new decode error.
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::DecodeError(msg.into())
    }

    /// Create a new invalid-state error.
    pub fn state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a new device error.
    pub fn device<S: Into<String>>(msg: S) -> Self {
        Self::DeviceError(msg.into())
    }

    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Create a new webhook error.
    pub fn webhook<S: Into<String>>(msg: S) -> Self {
        Self::WebhookError(msg.into())
    }

    /// The category of this error, as reported on call snapshots.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::ConnectionError(_) | Self::NotConnected | Self::Timeout(_) => {
                ErrorKind::Connection
            }
            Self::DecodeError(_) => ErrorKind::Decode,
            Self::UnrecognizedMessage(_) => ErrorKind::UnrecognizedMessage,
            Self::DeviceError(_) => ErrorKind::Device,
            Self::InvalidState(_)
            | Self::ConfigError(_)
            | Self::WebhookError(_)
            | Self::SerializationError(_) => ErrorKind::Internal,
        }
    }

    /// Short message suitable for showing to the caller.
    ///
    /// Connection failures get a generic diagnostic; the detailed cause stays in the logs.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::PermissionDenied => {
                "Could not access microphone. Allow microphone access and try again.".to_string()
            }
            ErrorKind::Connection => "Connection failed. Please try again.".to_string(),
            ErrorKind::Device => "Audio device stopped working. Please try again.".to_string(),
            _ => "Something went wrong. Please try again.".to_string(),
        }
    }
}

/// Copyable error category carried by call snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Microphone access refused.
    PermissionDenied,
    /// Handshake or transport failure.
    Connection,
    /// Malformed inbound audio.
    Decode,
    /// Unknown inbound discriminator.
    UnrecognizedMessage,
    /// Audio device failure.
    Device,
    /// Anything else.
    Internal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(VoiceError::permission("denied").kind(), ErrorKind::PermissionDenied);
        assert_eq!(VoiceError::connection("reset").kind(), ErrorKind::Connection);
        assert_eq!(VoiceError::NotConnected.kind(), ErrorKind::Connection);
        assert_eq!(VoiceError::Timeout("handshake".into()).kind(), ErrorKind::Connection);
        assert_eq!(VoiceError::decode("odd length").kind(), ErrorKind::Decode);
        assert_eq!(VoiceError::state("ended").kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_user_message_hides_transport_detail() {
        let err = VoiceError::connection("tls handshake eof at 10.0.0.3:443");
        assert!(!err.user_message().contains("10.0.0.3"));
        assert!(err.to_string().contains("10.0.0.3"));
    }
}
