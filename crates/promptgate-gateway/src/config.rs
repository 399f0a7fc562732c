//! Gateway configuration.
//!
//! Precedence (highest wins): environment variables, config file values,
//! built-in defaults. The binary applies CLI flag overrides on top.

use promptgate_core::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub security: SecurityConfig,
    pub pii: PiiConfig,
    pub audit: AuditConfig,
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// `release` or `debug`.
    pub mode: String,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            mode: "release".to_string(),
            read_timeout_secs: 30,
            write_timeout_secs: 30,
        }
    }
}

/// Static upstream LLM configuration, used to build the default client at
/// boot and as the fallback layer for per-request overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// openai, anthropic, google, ollama, xai, or bedrock.
    pub provider: String,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            api_key: String::new(),
            base_url: String::new(),
            model: "gpt-4o".to_string(),
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

/// Injection-classifier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub enable_injection_detection: bool,
    pub block_on_detection: bool,
    /// Custom regexes appended to the built-in library.
    pub injection_patterns: Vec<String>,
    pub max_prompt_length: usize,
    pub rate_limit_per_minute: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_injection_detection: true,
            block_on_detection: true,
            injection_patterns: Vec::new(),
            max_prompt_length: 32_000,
            rate_limit_per_minute: 60,
        }
    }
}

/// PII-redactor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PiiConfig {
    pub enable_masking: bool,
    pub mask_character: char,
    /// Enabled categories; empty enables all.
    pub pii_types: Vec<String>,
    /// Keep the `@domain` part of masked e-mail addresses.
    pub preserve_domain: bool,
}

impl Default for PiiConfig {
    fn default() -> Self {
        Self {
            enable_masking: true,
            mask_character: '*',
            pii_types: Vec::new(),
            preserve_domain: false,
        }
    }
}

/// Audit-engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Ring capacity; oldest entries are evicted beyond this.
    pub max_entries: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error.
    pub level: String,
    /// `text` or `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load configuration: defaults, then the YAML file (when given), then
/// environment variable overrides.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(p) => {
            let data = std::fs::read_to_string(p).map_err(|e| {
                GatewayError::Config(format!("failed to read {}: {e}", p.display()))
            })?;
            serde_yaml::from_str(&data)
                .map_err(|e| GatewayError::Config(format!("invalid config file: {e}")))?
        }
        None => Config::default(),
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Apply `PROMPTGATE_*` environment variable overrides.
pub fn apply_env_overrides(config: &mut Config) {
    if let Ok(v) = std::env::var("PROMPTGATE_HOST") {
        config.server.host = v;
    }
    if let Ok(v) = std::env::var("PROMPTGATE_PORT") {
        if let Ok(port) = v.parse() {
            config.server.port = port;
        }
    }
    if let Ok(v) = std::env::var("PROMPTGATE_MODE") {
        config.server.mode = v;
    }
    if let Ok(v) = std::env::var("PROMPTGATE_LLM_PROVIDER") {
        config.llm.provider = v;
    }
    if let Ok(v) = std::env::var("PROMPTGATE_LLM_API_KEY") {
        config.llm.api_key = v;
    }
    if let Ok(v) = std::env::var("PROMPTGATE_LLM_BASE_URL") {
        config.llm.base_url = v;
    }
    if let Ok(v) = std::env::var("PROMPTGATE_LLM_MODEL") {
        config.llm.model = v;
    }
    if let Ok(v) = std::env::var("PROMPTGATE_LOG_LEVEL") {
        config.logging.level = v;
    }
}

/// Validate a resolved configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        return Err(GatewayError::Config("server.port must be non-zero".into()));
    }
    match config.server.mode.as_str() {
        "release" | "debug" | "test" => {}
        other => {
            return Err(GatewayError::Config(format!(
                "server.mode must be release, debug, or test (got {other:?})"
            )));
        }
    }
    match config.logging.format.as_str() {
        "text" | "json" => {}
        other => {
            return Err(GatewayError::Config(format!(
                "logging.format must be text or json (got {other:?})"
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.llm.model, "gpt-4o");
        assert!(config.security.enable_injection_detection);
        assert!(config.security.block_on_detection);
        assert!(config.pii.enable_masking);
        assert_eq!(config.pii.mask_character, '*');
        assert_eq!(config.audit.max_entries, 10_000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_from_yaml_file() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 9090
llm:
  provider: "ollama"
  base_url: "http://localhost:11434"
  model: "llama3.3"
security:
  block_on_detection: false
logging:
  level: "warn"
  format: "text"
"#;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(yaml.as_bytes()).unwrap();

        let config = load(Some(f.path())).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.llm.model, "llama3.3");
        assert!(!config.security.block_on_detection);
        // Unspecified sections keep their defaults.
        assert!(config.pii.enable_masking);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_load_missing_file_errors() {
        assert!(load(Some(Path::new("/nonexistent/promptgate.yaml"))).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_mode() {
        let mut config = Config::default();
        config.server.mode = "production".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(validate(&Config::default()).is_ok());
    }
}
