//! Gateway configuration: defaults, optional TOML file, environment overrides.

use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::core::error::GatewayError;

pub const DEFAULT_SYSTEM_PROMPT: &str = "日本語を使用する,タグを出力しない,plain/textで回答する";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub completion: CompletionConfig,
    pub orchestrator: OrchestratorConfig,
    pub weather: WeatherConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_ms: u64,
    pub timeout_ms: u64,
    pub retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// OpenAI-compatible base, e.g. `http://localhost:11434/v1`.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub system_prompt: String,
    pub max_output_tokens: u32,
    /// Decide/dispatch rounds before the streamed answer. 1 = single hop.
    pub max_tool_rounds: u32,
    pub tool_timeout_ms: u64,
    pub stream_idle_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub base_url: String,
    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            completion: CompletionConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            weather: WeatherConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { connect_timeout_ms: 2_000, timeout_ms: 60_000, retries: 2 }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".into(),
            api_key: "ollama".into(),
            model: "qwen2.5-coder:14b".into(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            max_output_tokens: 512,
            max_tool_rounds: 1,
            tool_timeout_ms: 30_000,
            stream_idle_timeout_ms: 60_000,
        }
    }
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.jma.go.jp".into(),
            http: HttpConfig { connect_timeout_ms: 2_000, timeout_ms: 6_000, retries: 2 },
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env_var(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}

impl Config {
    /// TOML file named by `GATEWAY_CONFIG` (if any), then environment overrides.
    pub fn load() -> Result<Self, GatewayError> {
        let mut cfg = match env_var("GATEWAY_CONFIG") {
            Some(path) => Self::from_toml_file(Path::new(&path))?,
            None => Self::default(),
        };
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, GatewayError> {
        toml::from_str(s).map_err(|e| GatewayError::Config(e.to_string()))
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, GatewayError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    fn apply_env(&mut self) {
        if let Some(v) = env_parse("PORT") {
            self.port = v;
        }
        if let Some(v) = env_var("COMPLETION_BASE_URL") {
            self.completion.base_url = v;
        }
        if let Some(v) = env_var("COMPLETION_API_KEY") {
            self.completion.api_key = v;
        }
        if let Some(v) = env_var("COMPLETION_MODEL") {
            self.completion.model = v;
        }
        if let Some(v) = env_parse("COMPLETION_TIMEOUT_MS") {
            self.completion.http.timeout_ms = v;
        }
        if let Some(v) = env_parse("COMPLETION_RETRIES") {
            self.completion.http.retries = v;
        }
        if let Some(v) = env_parse("MAX_OUTPUT_TOKENS") {
            self.orchestrator.max_output_tokens = v;
        }
        if let Some(v) = env_parse("MAX_TOOL_ROUNDS") {
            self.orchestrator.max_tool_rounds = v;
        }
        if let Some(v) = env_var("SYSTEM_PROMPT") {
            self.orchestrator.system_prompt = v;
        }
        if let Some(v) = env_parse("TOOL_TIMEOUT_MS") {
            self.orchestrator.tool_timeout_ms = v;
        }
        if let Some(v) = env_parse("STREAM_IDLE_TIMEOUT_MS") {
            self.orchestrator.stream_idle_timeout_ms = v;
        }
        if let Some(v) = env_var("JMA_BASE_URL") {
            self.weather.base_url = v;
        }
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.port == 0 {
            return Err(GatewayError::Config("port cannot be 0".into()));
        }
        for (key, url) in [
            ("completion.base_url", &self.completion.base_url),
            ("weather.base_url", &self.weather.base_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(GatewayError::Config(format!("{key} must be an http(s) URL, got '{url}'")));
            }
        }
        if self.completion.model.trim().is_empty() {
            return Err(GatewayError::Config("completion.model is empty".into()));
        }
        if self.orchestrator.max_tool_rounds == 0 {
            return Err(GatewayError::Config("orchestrator.max_tool_rounds must be at least 1".into()));
        }
        if self.orchestrator.max_output_tokens == 0 {
            return Err(GatewayError::Config("orchestrator.max_output_tokens must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "GATEWAY_CONFIG",
        "PORT",
        "COMPLETION_BASE_URL",
        "COMPLETION_MODEL",
        "MAX_TOOL_ROUNDS",
        "MAX_OUTPUT_TOKENS",
        "JMA_BASE_URL",
    ];

    fn clear_env() {
        for k in KEYS {
            std::env::remove_var(k);
        }
    }

    #[test]
    #[serial]
    fn defaults_match_local_ollama_setup() {
        clear_env();
        let cfg = Config::load().unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.completion.base_url, "http://localhost:11434/v1");
        assert_eq!(cfg.completion.model, "qwen2.5-coder:14b");
        assert_eq!(cfg.orchestrator.max_output_tokens, 512);
        assert_eq!(cfg.orchestrator.max_tool_rounds, 1);
        assert_eq!(cfg.orchestrator.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    #[serial]
    fn parses_env_overrides() {
        clear_env();
        std::env::set_var("PORT", "9090");
        std::env::set_var("COMPLETION_MODEL", "llama3.1");
        std::env::set_var("MAX_TOOL_ROUNDS", "3");
        std::env::set_var("JMA_BASE_URL", "http://jma.test");
        let cfg = Config::load().unwrap();
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.completion.model, "llama3.1");
        assert_eq!(cfg.orchestrator.max_tool_rounds, 3);
        assert_eq!(cfg.weather.base_url, "http://jma.test");
        clear_env();
    }

    #[test]
    #[serial]
    fn unparsable_override_keeps_default() {
        clear_env();
        std::env::set_var("MAX_OUTPUT_TOKENS", "lots");
        let cfg = Config::load().unwrap();
        assert_eq!(cfg.orchestrator.max_output_tokens, 512);
        clear_env();
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg = Config::from_toml_str(
            r#"
            port = 3000

            [completion]
            model = "gpt-4o-mini"
            base_url = "https://api.openai.com/v1"

            [orchestrator]
            max_tool_rounds = 2
            "#,
        )
        .unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.completion.model, "gpt-4o-mini");
        assert_eq!(cfg.completion.api_key, "ollama");
        assert_eq!(cfg.orchestrator.max_tool_rounds, 2);
        assert_eq!(cfg.orchestrator.max_output_tokens, 512);
    }

    #[test]
    fn malformed_toml_is_config_error() {
        let err = Config::from_toml_str("port = \"eighty\"").unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn validate_rejects_zero_rounds_and_bad_urls() {
        let mut cfg = Config::default();
        cfg.orchestrator.max_tool_rounds = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.completion.base_url = "localhost:11434".into();
        assert!(cfg.validate().unwrap_err().to_string().contains("completion.base_url"));
    }
}
