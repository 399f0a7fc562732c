//! Per-request LLM client selection.
//!
//! [`ClientFactory`] owns the static default configuration, an optional
//! default client built at boot, and an optional settings service. Selection
//! order for one request, first match wins:
//!
//! 1. Request carries any of provider / api_key / base_url → synthesize a
//!    per-request config layered over the defaults and build a transient
//!    client (`owned = true`).
//! 2. A settings service is attached and returns a configuration with a
//!    non-empty API key → build a transient client from it.
//! 3. A default client exists → share it (`owned = false`).
//! 4. Otherwise fail with a configuration error.

use promptgate_core::{GatewayError, GuardRequest, Result};
use std::sync::Arc;

use crate::config::LlmConfig;
use crate::provider::{build_client, ChatClient};
use crate::settings::SettingsService;

/// Builds and selects upstream clients.
pub struct ClientFactory {
    http: reqwest::Client,
    default_config: LlmConfig,
    default_client: Option<Arc<dyn ChatClient>>,
    settings: Option<Arc<SettingsService>>,
}

impl ClientFactory {
    /// Create a factory. A default client is built only when the static
    /// configuration carries an API key.
    pub fn new(config: LlmConfig, http: reqwest::Client) -> Result<Self> {
        let default_client = if config.api_key.is_empty() {
            None
        } else {
            Some(build_client(&config, http.clone())?)
        };

        Ok(Self {
            http,
            default_config: config,
            default_client,
            settings: None,
        })
    }

    /// Attach a settings service for dynamic configuration.
    #[must_use]
    pub fn with_settings(mut self, settings: Arc<SettingsService>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Whether a default client was built at boot.
    #[must_use]
    pub fn has_default_client(&self) -> bool {
        self.default_client.is_some()
    }

    /// The static default configuration.
    #[must_use]
    pub fn default_config(&self) -> &LlmConfig {
        &self.default_config
    }

    /// Select or build the client for one request.
    ///
    /// Returns `(client, owned)`; an owned client is transient and dropped
    /// at the end of the request, so per-request overrides never bleed into
    /// subsequent requests.
    pub async fn get_client(&self, req: &GuardRequest) -> Result<(Arc<dyn ChatClient>, bool)> {
        let has_override =
            !req.provider.is_empty() || !req.api_key.is_empty() || !req.base_url.is_empty();

        if !has_override {
            // Dynamic settings take precedence over the boot-time default.
            if let Some(settings) = &self.settings {
                let (provider, model, api_key, base_url) = settings.llm_config().await;
                if !api_key.is_empty() {
                    let config = LlmConfig {
                        provider,
                        model,
                        api_key,
                        base_url,
                        max_tokens: self.default_config.max_tokens,
                        temperature: self.default_config.temperature,
                    };
                    let client = build_client(&config, self.http.clone()).map_err(|e| {
                        GatewayError::Config(format!("failed to create client from settings: {e}"))
                    })?;
                    return Ok((client, true));
                }
            }

            return match &self.default_client {
                Some(client) => Ok((Arc::clone(client), false)),
                None => Err(GatewayError::Config(
                    "no LLM client configured and no provider specified in request".to_string(),
                )),
            };
        }

        // Layer the request over the defaults, field by field.
        let mut config = LlmConfig {
            provider: req.provider.clone(),
            api_key: req.api_key.clone(),
            base_url: req.base_url.clone(),
            model: req.model.clone(),
            max_tokens: self.default_config.max_tokens,
            temperature: self.default_config.temperature,
        };
        if config.provider.is_empty() {
            config.provider = self.default_config.provider.clone();
        }
        if config.api_key.is_empty() {
            config.api_key = self.default_config.api_key.clone();
        }
        if config.base_url.is_empty() {
            config.base_url = self.default_config.base_url.clone();
        }
        if config.model.is_empty() {
            config.model = self.default_config.model.clone();
        }
        if let Some(max_tokens) = req.max_tokens {
            config.max_tokens = max_tokens;
        }
        if let Some(temperature) = req.temperature {
            config.temperature = temperature;
        }

        let client = build_client(&config, self.http.clone()).map_err(|e| {
            GatewayError::Config(format!("failed to create LLM client for request: {e}"))
        })?;
        Ok((client, true))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
