use std::env;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "http://localhost:1234/v1";
const DEFAULT_API_KEY: &str = "lm-studio";
const DEFAULT_MODEL: &str = "local-model";

/// Engine configuration.
///
/// Defaults mirror a local OpenAI-compatible endpoint (LM Studio style).
/// Every field can be overridden through `TURNGATE_*` environment variables
/// via [`EngineConfig::from_env`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the OpenAI-compatible endpoint, without a trailing slash.
    pub base_url: String,
    pub api_key: String,
    /// Model used when a turn does not select one explicitly.
    pub default_model: String,
    /// History token estimate above which compression triggers.
    pub max_history_tokens: usize,
    /// Master switch for tool binding; feature flags on a conversation are
    /// ignored when this is off.
    pub tools_enabled: bool,
    /// Upper bound on responder invocations per turn.
    pub max_tool_iterations: u32,
    /// Hard wall-clock limit for an approved terminal command.
    pub terminal_timeout: Duration,
    /// Independent size cap for captured stdout and stderr, in characters.
    pub terminal_output_cap: usize,
    /// Timeout for a single model endpoint request.
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            api_key: DEFAULT_API_KEY.to_owned(),
            default_model: DEFAULT_MODEL.to_owned(),
            max_history_tokens: 2000,
            tools_enabled: true,
            max_tool_iterations: 3,
            terminal_timeout: Duration::from_secs(15),
            terminal_output_cap: 10_000,
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl EngineConfig {
    /// Build a configuration from the environment, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = env::var("TURNGATE_BASE_URL") {
            config.base_url = value.trim_end_matches('/').to_owned();
        }
        if let Ok(value) = env::var("TURNGATE_API_KEY") {
            config.api_key = value;
        }
        if let Ok(value) = env::var("TURNGATE_MODEL") {
            config.default_model = value;
        }
        if let Some(value) = parse_env("TURNGATE_MAX_HISTORY_TOKENS") {
            config.max_history_tokens = value;
        }
        if let Ok(value) = env::var("TURNGATE_TOOLS_ENABLED") {
            config.tools_enabled = matches!(value.trim(), "1" | "true" | "yes");
        }
        if let Some(value) = parse_env("TURNGATE_MAX_TOOL_ITERATIONS") {
            config.max_tool_iterations = value;
        }

        config
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|value| value.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_local_endpoint() {
        let config = EngineConfig::default();
        assert_eq!(config.base_url, "http://localhost:1234/v1");
        assert_eq!(config.max_history_tokens, 2000);
        assert_eq!(config.max_tool_iterations, 3);
        assert!(config.tools_enabled);
        assert_eq!(config.terminal_timeout, Duration::from_secs(15));
    }
}
