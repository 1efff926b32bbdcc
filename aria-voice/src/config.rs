//! Configuration types for voice calls.

use crate::error::{Result, VoiceError};
use crate::protocol::ProtocolConfig;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Default conversational-agent endpoint.
pub const DEFAULT_AGENT_URL: &str = "wss://api.elevenlabs.io/v1/convai/conversation";

/// Default capture block size in samples.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Default sample rate for audio sent to and received from the agent.
pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

/// Lowest accepted input gain.
pub const MIN_GAIN: f32 = 1.0;

/// Highest accepted input gain.
pub const MAX_GAIN: f32 = 8.0;

/// Remote agent identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEndpoint {
    /// Base WebSocket URL of the conversation endpoint.
    pub url: String,
    /// Agent identifier, appended as the `agent_id` query parameter.
    pub agent_id: String,
    /// Optional credential, sent as the `xi-api-key` header.
    #[serde(skip)]
    pub api_key: Option<SecretString>,
}

impl Default for AgentEndpoint {
    fn default() -> Self {
        Self { url: DEFAULT_AGENT_URL.to_string(), agent_id: String::new(), api_key: None }
    }
}

impl AgentEndpoint {
    /// Create an endpoint for the given agent at the default URL.
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self { agent_id: agent_id.into(), ..Default::default() }
    }

    /// Override the base URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Attach a credential.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(key.into()));
        self
    }

    /// Full connection URL including the agent id.
    pub fn connect_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| VoiceError::config(format!("invalid agent url '{}': {}", self.url, e)))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(VoiceError::config(format!("agent url must be ws or wss, got {}", other)));
            }
        }
        url.query_pairs_mut().append_pair("agent_id", &self.agent_id);
        Ok(url)
    }

    /// The credential, if any.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_ref().map(|k| k.expose_secret())
    }
}

/// Which capture strategy to prefer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyPreference {
    /// Use the real-time tap when the device supports it, else re-block.
    #[default]
    Auto,
    /// Forward each device block as delivered.
    RealtimeTap,
    /// Re-block to a fixed size before forwarding.
    BlockProcessor,
}

/// Microphone capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Block size used by the fixed-block strategy.
    pub block_size: usize,
    /// Input gain, applied before encoding.
    pub gain: f32,
    /// Rate to resample to before sending. `None` sends at the device's native rate.
    pub wire_sample_rate: Option<u32>,
    /// Capture strategy preference.
    pub strategy: StrategyPreference,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            gain: MIN_GAIN,
            wire_sample_rate: Some(DEFAULT_SAMPLE_RATE),
            strategy: StrategyPreference::Auto,
        }
    }
}

/// Agent speech playback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Sample rate of the agent's PCM output.
    pub agent_sample_rate: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self { agent_sample_rate: DEFAULT_SAMPLE_RATE }
    }
}

/// Full configuration for a call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Remote agent identity.
    pub endpoint: AgentEndpoint,
    /// Microphone capture settings.
    pub capture: CaptureConfig,
    /// Playback settings.
    pub playback: PlaybackConfig,
    /// Wire message vocabulary.
    pub protocol: ProtocolConfig,
    /// Handshake timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            endpoint: AgentEndpoint::default(),
            capture: CaptureConfig::default(),
            playback: PlaybackConfig::default(),
            protocol: ProtocolConfig::default(),
            connect_timeout_ms: 10_000,
        }
    }
}

impl VoiceConfig {
    /// Create a configuration for the given agent with defaults elsewhere.
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self { endpoint: AgentEndpoint::new(agent_id), ..Default::default() }
    }

    /// Create a builder for VoiceConfig.
    pub fn builder() -> VoiceConfigBuilder {
        VoiceConfigBuilder::new()
    }

    /// Set the endpoint URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint.url = url.into();
        self
    }

    /// Set the agent credential.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.endpoint = self.endpoint.with_api_key(key);
        self
    }

    /// Set the input gain.
    pub fn with_gain(mut self, gain: f32) -> Self {
        self.capture.gain = gain;
        self
    }

    /// Set the wire sample rate (`None` sends at the device rate).
    pub fn with_wire_sample_rate(mut self, rate: Option<u32>) -> Self {
        self.capture.wire_sample_rate = rate;
        self
    }

    /// Set the capture strategy preference.
    pub fn with_strategy(mut self, strategy: StrategyPreference) -> Self {
        self.capture.strategy = strategy;
        self
    }

    /// Set the block size for the fixed-block strategy.
    pub fn with_block_size(mut self, size: usize) -> Self {
        self.capture.block_size = size;
        self
    }

    /// Set the agent output sample rate.
    pub fn with_agent_sample_rate(mut self, rate: u32) -> Self {
        self.playback.agent_sample_rate = rate;
        self
    }

    /// Set the wire protocol vocabulary.
    pub fn with_protocol(mut self, protocol: ProtocolConfig) -> Self {
        self.protocol = protocol;
        self
    }

    /// Set the handshake timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Handshake timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Check the configuration for values that would fail at call time.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.agent_id.trim().is_empty() {
            return Err(VoiceError::config("agent id is required"));
        }
        self.endpoint.connect_url()?;

        let gain = self.capture.gain;
        if !(MIN_GAIN..=MAX_GAIN).contains(&gain) {
            return Err(VoiceError::config(format!(
                "gain must be between {} and {}, got {}",
                MIN_GAIN, MAX_GAIN, gain
            )));
        }
        if self.capture.block_size == 0 {
            return Err(VoiceError::config("block size must be positive"));
        }
        if self.capture.wire_sample_rate == Some(0) || self.playback.agent_sample_rate == 0 {
            return Err(VoiceError::config("sample rates must be positive"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(VoiceError::config("connect timeout must be positive"));
        }
        Ok(())
    }

    /// Load configuration from `ARIA_*` environment variables.
    ///
    /// `ARIA_AGENT_ID` is required. `ARIA_WIRE_SAMPLE_RATE=native` sends at the device rate.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`VoiceConfig::from_env`], reading values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let agent_id = lookup("ARIA_AGENT_ID")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| VoiceError::config("ARIA_AGENT_ID is not set"))?;

        let mut config = Self::new(agent_id);

        if let Some(url) = lookup("ARIA_AGENT_URL") {
            config = config.with_url(url);
        }
        if let Some(key) = lookup("ARIA_API_KEY").filter(|v| !v.is_empty()) {
            config = config.with_api_key(key);
        }
        if let Some(gain) = lookup("ARIA_INPUT_GAIN") {
            config.capture.gain = parse_var("ARIA_INPUT_GAIN", &gain)?;
        }
        if let Some(rate) = lookup("ARIA_WIRE_SAMPLE_RATE") {
            config.capture.wire_sample_rate = if rate.eq_ignore_ascii_case("native") {
                None
            } else {
                Some(parse_var("ARIA_WIRE_SAMPLE_RATE", &rate)?)
            };
        }
        if let Some(rate) = lookup("ARIA_AGENT_SAMPLE_RATE") {
            config.playback.agent_sample_rate = parse_var("ARIA_AGENT_SAMPLE_RATE", &rate)?;
        }
        if let Some(shape) = lookup("ARIA_PAYLOAD_SHAPE") {
            config.protocol.payload_shape = shape.parse()?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| VoiceError::config(format!("{} has invalid value '{}'", name, value)))
}

/// Builder for VoiceConfig.
#[derive(Debug, Clone, Default)]
pub struct VoiceConfigBuilder {
    config: VoiceConfig,
}

impl VoiceConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the agent id.
    pub fn agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.config.endpoint.agent_id = agent_id.into();
        self
    }

    /// Set the endpoint URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint.url = url.into();
        self
    }

    /// Set the credential.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config = self.config.with_api_key(key);
        self
    }

    /// Set the input gain.
    pub fn gain(mut self, gain: f32) -> Self {
        self.config.capture.gain = gain;
        self
    }

    /// Set the wire sample rate.
    pub fn wire_sample_rate(mut self, rate: Option<u32>) -> Self {
        self.config.capture.wire_sample_rate = rate;
        self
    }

    /// Set the agent output sample rate.
    pub fn agent_sample_rate(mut self, rate: u32) -> Self {
        self.config.playback.agent_sample_rate = rate;
        self
    }

    /// Set the capture strategy preference.
    pub fn strategy(mut self, strategy: StrategyPreference) -> Self {
        self.config.capture.strategy = strategy;
        self
    }

    /// Set the fixed block size.
    pub fn block_size(mut self, size: usize) -> Self {
        self.config.capture.block_size = size;
        self
    }

    /// Set the wire protocol vocabulary.
    pub fn protocol(mut self, protocol: ProtocolConfig) -> Self {
        self.config.protocol = protocol;
        self
    }

    /// Set the handshake timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_connect_timeout(timeout);
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<VoiceConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PayloadShape;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = VoiceConfig::new("agent_123");
        assert_eq!(config.capture.block_size, 4096);
        assert_eq!(config.capture.gain, 1.0);
        assert_eq!(config.capture.wire_sample_rate, Some(16000));
        assert_eq!(config.playback.agent_sample_rate, 16000);
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_connect_url_carries_agent_id() {
        let endpoint = AgentEndpoint::new("agent_123");
        let url = endpoint.connect_url().unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.query(), Some("agent_id=agent_123"));
    }

    #[test]
    fn test_rejects_http_url() {
        let config = VoiceConfig::new("a").with_url("https://example.com/ws");
        assert!(matches!(config.validate(), Err(VoiceError::ConfigError(_))));
    }

    #[test]
    fn test_gain_bounds() {
        assert!(VoiceConfig::new("a").with_gain(8.0).validate().is_ok());
        assert!(VoiceConfig::new("a").with_gain(0.5).validate().is_err());
        assert!(VoiceConfig::new("a").with_gain(9.0).validate().is_err());
    }

    #[test]
    fn test_builder_requires_agent_id() {
        assert!(VoiceConfig::builder().build().is_err());

        let config = VoiceConfig::builder()
            .agent_id("agent")
            .gain(8.0)
            .wire_sample_rate(None)
            .strategy(StrategyPreference::BlockProcessor)
            .build()
            .unwrap();
        assert_eq!(config.capture.gain, 8.0);
        assert_eq!(config.capture.wire_sample_rate, None);
        assert_eq!(config.capture.strategy, StrategyPreference::BlockProcessor);
    }

    #[test]
    fn test_api_key_is_redacted_in_debug() {
        let config = VoiceConfig::new("a").with_api_key("sk-very-secret");
        assert_eq!(config.endpoint.api_key(), Some("sk-very-secret"));
        assert!(!format!("{:?}", config).contains("sk-very-secret"));
    }

    #[test]
    fn test_from_env() {
        let config = VoiceConfig::from_lookup(env(&[
            ("ARIA_AGENT_ID", "agent_9"),
            ("ARIA_API_KEY", "key"),
            ("ARIA_INPUT_GAIN", "8"),
            ("ARIA_WIRE_SAMPLE_RATE", "native"),
            ("ARIA_AGENT_SAMPLE_RATE", "24000"),
            ("ARIA_PAYLOAD_SHAPE", "top_level"),
        ]))
        .unwrap();

        assert_eq!(config.endpoint.agent_id, "agent_9");
        assert_eq!(config.endpoint.api_key(), Some("key"));
        assert_eq!(config.capture.gain, 8.0);
        assert_eq!(config.capture.wire_sample_rate, None);
        assert_eq!(config.playback.agent_sample_rate, 24000);
        assert_eq!(config.protocol.payload_shape, PayloadShape::TopLevel);
    }

    #[test]
    fn test_from_env_missing_agent() {
        let err = VoiceConfig::from_lookup(env(&[])).unwrap_err();
        assert!(err.to_string().contains("ARIA_AGENT_ID"));
    }

    #[test]
    fn test_from_env_bad_number() {
        let err =
            VoiceConfig::from_lookup(env(&[("ARIA_AGENT_ID", "a"), ("ARIA_INPUT_GAIN", "loud")]))
                .unwrap_err();
        assert!(matches!(err, VoiceError::ConfigError(_)));
    }
}
