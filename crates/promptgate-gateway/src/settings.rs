//! Dynamic settings service.
//!
//! Wraps the repository's key/value settings store behind typed views with
//! read-mostly caching: the LLM settings are cached on first read and the
//! cache entry is dropped on every write. Repository errors degrade to the
//! built-in defaults so a missing or unreachable store never fails a
//! request.

use promptgate_core::{Repository, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Dynamic upstream LLM configuration, editable from the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: String,
    pub model: String,
    pub api_key: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            api_key: String::new(),
            base_url: String::new(),
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

/// Dynamic security configuration, editable from the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    pub injection_detection_enabled: bool,
    pub block_on_detection: bool,
    pub pii_masking_enabled: bool,
    pub rate_limit_per_minute: u32,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            injection_detection_enabled: true,
            block_on_detection: true,
            pii_masking_enabled: true,
            rate_limit_per_minute: 100,
        }
    }
}

/// Cached, repository-backed settings surface.
pub struct SettingsService {
    repo: Arc<dyn Repository>,
    llm_cache: RwLock<Option<LlmSettings>>,
}

impl SettingsService {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self {
            repo,
            llm_cache: RwLock::new(None),
        }
    }

    // -- LLM settings --------------------------------------------------------

    /// Current LLM settings: cache, then repository overlay on defaults.
    pub async fn llm_settings(&self) -> LlmSettings {
        if let Some(cached) = self.llm_cache.read().expect("settings cache poisoned").clone() {
            return cached;
        }

        let mut settings = LlmSettings::default();
        self.overlay_string("llm_provider", &mut settings.provider).await;
        self.overlay_string("llm_model", &mut settings.model).await;
        self.overlay_string("llm_api_key", &mut settings.api_key).await;
        self.overlay_string("llm_base_url", &mut settings.base_url).await;
        if let Some(n) = self.read_u64("llm_max_tokens").await {
            settings.max_tokens = n as u32;
        }
        if let Some(t) = self.read_f64("llm_temperature").await {
            settings.temperature = t;
        }

        *self.llm_cache.write().expect("settings cache poisoned") = Some(settings.clone());
        settings
    }

    /// The `(provider, model, api_key, base_url)` tuple consumed by the
    /// client factory.
    pub async fn llm_config(&self) -> (String, String, String, String) {
        let s = self.llm_settings().await;
        (s.provider, s.model, s.api_key, s.base_url)
    }

    /// Write LLM settings through to the repository and invalidate the cache.
    /// Secrets are only written when non-empty so a partial update cannot
    /// wipe a stored key.
    pub async fn update_llm_settings(&self, settings: &LlmSettings) -> Result<()> {
        self.repo
            .set_setting("llm_provider", Value::from(settings.provider.clone()))
            .await?;
        self.repo
            .set_setting("llm_model", Value::from(settings.model.clone()))
            .await?;
        if !settings.api_key.is_empty() {
            self.repo
                .set_setting("llm_api_key", Value::from(settings.api_key.clone()))
                .await?;
        }
        if !settings.base_url.is_empty() {
            self.repo
                .set_setting("llm_base_url", Value::from(settings.base_url.clone()))
                .await?;
        }
        self.repo
            .set_setting("llm_max_tokens", Value::from(settings.max_tokens))
            .await?;
        self.repo
            .set_setting("llm_temperature", Value::from(settings.temperature))
            .await?;

        self.invalidate_cache();
        tracing::info!(
            provider = %settings.provider,
            model = %settings.model,
            "LLM settings updated"
        );
        Ok(())
    }

    // -- Security settings ---------------------------------------------------

    /// Current security settings overlaid on defaults. Not cached: reads are
    /// off the request path.
    pub async fn security_settings(&self) -> SecuritySettings {
        let mut settings = SecuritySettings::default();
        if let Some(b) = self.read_bool("injection_detection_enabled").await {
            settings.injection_detection_enabled = b;
        }
        if let Some(b) = self.read_bool("block_on_detection").await {
            settings.block_on_detection = b;
        }
        if let Some(b) = self.read_bool("pii_masking_enabled").await {
            settings.pii_masking_enabled = b;
        }
        if let Some(n) = self.read_u64("rate_limit_requests_per_minute").await {
            settings.rate_limit_per_minute = n as u32;
        }
        settings
    }

    /// Write security settings through to the repository.
    pub async fn update_security_settings(&self, settings: &SecuritySettings) -> Result<()> {
        self.repo
            .set_setting(
                "injection_detection_enabled",
                Value::from(settings.injection_detection_enabled),
            )
            .await?;
        self.repo
            .set_setting("block_on_detection", Value::from(settings.block_on_detection))
            .await?;
        self.repo
            .set_setting("pii_masking_enabled", Value::from(settings.pii_masking_enabled))
            .await?;
        self.repo
            .set_setting(
                "rate_limit_requests_per_minute",
                Value::from(settings.rate_limit_per_minute),
            )
            .await?;

        tracing::info!("Security settings updated");
        Ok(())
    }

    // -- Raw access ----------------------------------------------------------

    /// All stored settings. Degrades to an empty map on storage error.
    pub async fn all_settings(&self) -> HashMap<String, Value> {
        self.repo.all_settings().await.unwrap_or_default()
    }

    /// Drop every cached entry.
    pub fn invalidate_cache(&self) {
        *self.llm_cache.write().expect("settings cache poisoned") = None;
    }

    // -- typed reads ----------------------------------------------------------

    async fn overlay_string(&self, key: &str, target: &mut String) {
        if let Ok(Some(Value::String(s))) = self.repo.get_setting(key).await {
            if !s.is_empty() {
                *target = s;
            }
        }
    }

    async fn read_bool(&self, key: &str) -> Option<bool> {
        match self.repo.get_setting(key).await {
            Ok(Some(v)) => v.as_bool(),
            _ => None,
        }
    }

    async fn read_u64(&self, key: &str) -> Option<u64> {
        match self.repo.get_setting(key).await {
            Ok(Some(v)) => v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)),
            _ => None,
        }
    }

    async fn read_f64(&self, key: &str) -> Option<f64> {
        match self.repo.get_setting(key).await {
            Ok(Some(v)) => v.as_f64(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
