use crate::cli::CallArgs;
use anyhow::Result;
use aria_voice::VoiceConfig;

/// Resolve the call configuration: `ARIA_*` variables first, then command-line overrides.
pub fn resolve(args: &CallArgs) -> Result<VoiceConfig> {
    let mut config = VoiceConfig::from_lookup(|key| match (key, &args.agent_id) {
        ("ARIA_AGENT_ID", Some(agent_id)) => Some(agent_id.clone()),
        _ => std::env::var(key).ok(),
    })?;

    if let Some(url) = &args.url {
        config = config.with_url(url.clone());
    }
    if let Some(gain) = args.gain {
        config = config.with_gain(gain);
    }
    if let Some(rate) = args.wire_rate {
        config = config.with_wire_sample_rate((rate > 0).then_some(rate));
    }
    if let Some(strategy) = args.strategy {
        config = config.with_strategy(strategy.into());
    }

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::CliStrategy;
    use aria_voice::StrategyPreference;

    #[test]
    fn test_flags_override_environment() {
        let args = CallArgs {
            agent_id: Some("agent_cli".to_string()),
            url: Some("ws://localhost:9000/convai".to_string()),
            gain: Some(2.5),
            wire_rate: Some(0),
            strategy: Some(CliStrategy::Block),
            ..Default::default()
        };

        let config = resolve(&args).unwrap();
        assert_eq!(config.endpoint.agent_id, "agent_cli");
        assert_eq!(config.endpoint.url, "ws://localhost:9000/convai");
        assert_eq!(config.capture.gain, 2.5);
        assert_eq!(config.capture.wire_sample_rate, None);
        assert_eq!(config.capture.strategy, StrategyPreference::BlockProcessor);
    }

    #[test]
    fn test_gain_out_of_range_rejected() {
        let args = CallArgs {
            agent_id: Some("agent_cli".to_string()),
            gain: Some(20.0),
            ..Default::default()
        };
        assert!(resolve(&args).is_err());
    }
}
