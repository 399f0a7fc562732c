//! Upstream provider clients.
//!
//! Each supported provider has a distinct wire contract; this module wraps
//! them behind the [`ChatClient`] capability trait so callers never know the
//! variant. Friendly names map as `anthropic|claude`, `gemini|google`,
//! `xai|grok`; `bedrock|aws` is served through an OpenAI-compatible endpoint
//! and requires an explicit `base_url`.
//!
//! Response parsing is kept in free functions so the per-provider formats
//! are testable without a network.

use async_trait::async_trait;
use futures_util::StreamExt;
use promptgate_core::{GatewayError, LlmResponse, Message, Result, Usage};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::LlmConfig;

/// Synchronous delta consumer for streaming chat calls. Errors abort the
/// stream and surface to the caller.
pub type ChunkHandler<'a> = &'a mut (dyn FnMut(&str) -> Result<()> + Send);

// ---------------------------------------------------------------------------
// ChatClient trait
// ---------------------------------------------------------------------------

/// Uniform chat interface over the supported upstream providers.
#[async_trait]
pub trait ChatClient: Send + Sync + std::fmt::Debug {
    /// Send a chat completion request and return the normalized response.
    async fn chat(&self, messages: &[Message]) -> Result<LlmResponse>;

    /// Send a streaming chat completion request.
    ///
    /// `on_chunk` is invoked synchronously for each non-empty content delta;
    /// the returned response carries the accumulated content and the last
    /// observed finish reason.
    async fn chat_stream(
        &self,
        messages: &[Message],
        on_chunk: ChunkHandler<'_>,
    ) -> Result<LlmResponse>;

    /// The configured model name.
    fn model(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Provider kinds
// ---------------------------------------------------------------------------

/// Supported upstream providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Gemini,
    Ollama,
    Xai,
    Bedrock,
}

impl ProviderKind {
    /// Parse a friendly provider name.
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_lowercase().trim() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "gemini" | "google" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            "xai" | "grok" => Ok(Self::Xai),
            "bedrock" | "aws" => Ok(Self::Bedrock),
            other => Err(GatewayError::Config(format!(
                "unsupported provider: {other} (supported: openai, anthropic, google, ollama, xai, bedrock)"
            ))),
        }
    }

    /// Canonical lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
            Self::Xai => "xai",
            Self::Bedrock => "bedrock",
        }
    }
}

/// Map a message role onto the provider-conventional set; unknown roles are
/// treated as user input.
fn map_role(role: &str) -> &'static str {
    match role {
        "system" => "system",
        "assistant" => "assistant",
        _ => "user",
    }
}

/// Build a [`ChatClient`] for the configured provider.
///
/// Bedrock has no native wire support and is served through an
/// OpenAI-compatible endpoint, so it requires an explicit `base_url`.
pub fn build_client(
    config: &LlmConfig,
    http: reqwest::Client,
) -> Result<std::sync::Arc<dyn ChatClient>> {
    let kind = ProviderKind::parse(&config.provider)?;

    let client: std::sync::Arc<dyn ChatClient> = match kind {
        ProviderKind::OpenAi => std::sync::Arc::new(OpenAiCompatClient::new(
            http,
            config,
            "https://api.openai.com",
        )),
        ProviderKind::Xai => std::sync::Arc::new(OpenAiCompatClient::new(
            http,
            config,
            "https://api.x.ai",
        )),
        ProviderKind::Bedrock => {
            if config.base_url.is_empty() {
                return Err(GatewayError::Config(
                    "bedrock requires base_url (OpenAI-compatible endpoint)".to_string(),
                ));
            }
            std::sync::Arc::new(OpenAiCompatClient::new(http, config, ""))
        }
        ProviderKind::Anthropic => std::sync::Arc::new(AnthropicClient::new(http, config)),
        ProviderKind::Gemini => std::sync::Arc::new(GeminiClient::new(http, config)),
        ProviderKind::Ollama => std::sync::Arc::new(OllamaClient::new(http, config)),
    };

    Ok(client)
}

/// Resolve the effective base URL: configured value, else the provider
/// default, without a trailing slash.
fn effective_base(configured: &str, default: &str) -> String {
    let base = if configured.is_empty() {
        default
    } else {
        configured
    };
    base.trim_end_matches('/').to_string()
}

/// Surface a non-success upstream status as a provider error.
async fn error_for_status(resp: reqwest::Response) -> GatewayError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(200).collect();
    GatewayError::Provider(format!("upstream returned {status}: {snippet}"))
}

/// Drive a streaming response line by line. The handler sees each line with
/// trailing CR/LF stripped; handler errors abort the stream.
async fn for_each_line(
    resp: reqwest::Response,
    mut handle: impl FnMut(&str) -> Result<()>,
) -> Result<()> {
    let mut stream = resp.bytes_stream();
    let mut buf: Vec<u8> = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| GatewayError::Provider(format!("stream read failed: {e}")))?;
        buf.extend_from_slice(&chunk);

        while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            handle(line.trim_end_matches(['\n', '\r']))?;
        }
    }

    if !buf.is_empty() {
        let line = String::from_utf8_lossy(&buf).to_string();
        handle(line.trim_end_matches(['\n', '\r']))?;
    }

    Ok(())
}

/// Extract the JSON payload from an SSE `data:` line.
///
/// Returns `None` for blank lines, comments, non-data fields, and the
/// terminal `data: [DONE]` sentinel.
pub(crate) fn extract_sse_data(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }
    let payload = trimmed.strip_prefix("data:")?.trim_start();
    if payload == "[DONE]" {
        return None;
    }
    Some(payload)
}

// ---------------------------------------------------------------------------
// OpenAI-compatible client (openai, xai, bedrock-via-gateway)
// ---------------------------------------------------------------------------

/// Client for OpenAI-compatible `/v1/chat/completions` endpoints.
#[derive(Debug)]
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
}

impl OpenAiCompatClient {
    fn new(http: reqwest::Client, config: &LlmConfig, default_base: &str) -> Self {
        Self {
            http,
            base_url: effective_base(&config.base_url, default_base),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    fn request_body(&self, messages: &[Message], stream: bool) -> Value {
        let msgs: Vec<Value> = messages
            .iter()
            .map(|m| json!({"role": map_role(&m.role), "content": m.content}))
            .collect();

        let mut body = json!({"model": self.model, "messages": msgs});
        if self.max_tokens > 0 {
            body["max_tokens"] = json!(self.max_tokens);
        }
        if self.temperature > 0.0 {
            body["temperature"] = json!(self.temperature);
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        let resp = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::Provider(format!("request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(error_for_status(resp).await);
        }
        Ok(resp)
    }
}

#[async_trait]
impl ChatClient for OpenAiCompatClient {
    async fn chat(&self, messages: &[Message]) -> Result<LlmResponse> {
        let resp = self.send(&self.request_body(messages, false)).await?;
        let value: Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::Provider(format!("invalid response body: {e}")))?;
        Ok(parse_openai_chat(&value, &self.model))
    }

    async fn chat_stream(
        &self,
        messages: &[Message],
        on_chunk: ChunkHandler<'_>,
    ) -> Result<LlmResponse> {
        let resp = self.send(&self.request_body(messages, true)).await?;

        let mut content = String::new();
        let mut finish_reason = String::new();
        let mut usage: Option<Usage> = None;

        for_each_line(resp, |line| {
            let Some(data) = extract_sse_data(line) else {
                return Ok(());
            };
            let Ok(chunk) = serde_json::from_str::<OpenAiSseChunk>(data) else {
                return Ok(());
            };

            if let Some(choice) = chunk.choices.first() {
                if let Some(delta) = &choice.delta {
                    if let Some(text) = &delta.content {
                        if !text.is_empty() {
                            content.push_str(text);
                            on_chunk(text)?;
                        }
                    }
                }
                if let Some(reason) = &choice.finish_reason {
                    if !reason.is_empty() {
                        finish_reason = reason.clone();
                    }
                }
            }
            if let Some(u) = chunk.usage {
                usage = Some(Usage {
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                    total_tokens: u.total_tokens,
                });
            }
            Ok(())
        })
        .await?;

        Ok(LlmResponse {
            content,
            model: self.model.clone(),
            finish_reason,
            usage,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// OpenAI streaming chunk.
#[derive(Debug, Deserialize)]
struct OpenAiSseChunk {
    #[serde(default)]
    choices: Vec<OpenAiSseChoice>,
    #[serde(default)]
    usage: Option<OpenAiSseUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiSseChoice {
    #[serde(default)]
    delta: Option<OpenAiSseDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiSseDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiSseUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

/// Parse an OpenAI-compatible chat completion body.
pub(crate) fn parse_openai_chat(v: &Value, fallback_model: &str) -> LlmResponse {
    let content = v["choices"]
        .as_array()
        .and_then(|c| c.first())
        .and_then(|c| c["message"]["content"].as_str())
        .unwrap_or_default()
        .to_string();
    let finish_reason = v["choices"]
        .as_array()
        .and_then(|c| c.first())
        .and_then(|c| c["finish_reason"].as_str())
        .unwrap_or_default()
        .to_string();
    let model = v["model"]
        .as_str()
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback_model)
        .to_string();

    let usage = v.get("usage").and_then(|u| {
        let total = u["total_tokens"].as_u64()?;
        Some(Usage {
            prompt_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as u32,
            total_tokens: total as u32,
        })
    });

    LlmResponse {
        content,
        model,
        finish_reason,
        usage,
    }
}

// ---------------------------------------------------------------------------
// Anthropic client
// ---------------------------------------------------------------------------

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Client for the Anthropic Messages API.
#[derive(Debug)]
pub struct AnthropicClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
}

impl AnthropicClient {
    fn new(http: reqwest::Client, config: &LlmConfig) -> Self {
        Self {
            http,
            base_url: effective_base(&config.base_url, "https://api.anthropic.com"),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    /// Build the request body. System messages are lifted into the dedicated
    /// `system` field; everything else goes into `messages`.
    fn request_body(&self, messages: &[Message], stream: bool) -> Value {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut msgs: Vec<Value> = Vec::new();
        for m in messages {
            if m.role == "system" {
                system_parts.push(&m.content);
            } else {
                msgs.push(json!({"role": map_role(&m.role), "content": m.content}));
            }
        }

        // The API requires max_tokens; fall back to a sane cap when unset.
        let max_tokens = if self.max_tokens > 0 {
            self.max_tokens
        } else {
            4096
        };

        let mut body = json!({"model": self.model, "messages": msgs, "max_tokens": max_tokens});
        if !system_parts.is_empty() {
            body["system"] = json!(system_parts.join("\n"));
        }
        if self.temperature > 0.0 {
            body["temperature"] = json!(self.temperature);
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        let resp = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::Provider(format!("request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(error_for_status(resp).await);
        }
        Ok(resp)
    }
}

#[async_trait]
impl ChatClient for AnthropicClient {
    async fn chat(&self, messages: &[Message]) -> Result<LlmResponse> {
        let resp = self.send(&self.request_body(messages, false)).await?;
        let value: Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::Provider(format!("invalid response body: {e}")))?;
        Ok(parse_anthropic_chat(&value, &self.model))
    }

    async fn chat_stream(
        &self,
        messages: &[Message],
        on_chunk: ChunkHandler<'_>,
    ) -> Result<LlmResponse> {
        let resp = self.send(&self.request_body(messages, true)).await?;

        let mut content = String::new();
        let mut finish_reason = String::new();
        let mut prompt_tokens: u32 = 0;
        let mut completion_tokens: u32 = 0;

        for_each_line(resp, |line| {
            let Some(data) = extract_sse_data(line) else {
                return Ok(());
            };
            let Ok(event) = serde_json::from_str::<Value>(data) else {
                return Ok(());
            };

            match event["type"].as_str().unwrap_or_default() {
                "message_start" => {
                    prompt_tokens =
                        event["message"]["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32;
                }
                "content_block_delta" => {
                    if let Some(text) = event["delta"]["text"].as_str() {
                        if !text.is_empty() {
                            content.push_str(text);
                            on_chunk(text)?;
                        }
                    }
                }
                "message_delta" => {
                    if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                        finish_reason = reason.to_string();
                    }
                    completion_tokens =
                        event["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32;
                }
                _ => {}
            }
            Ok(())
        })
        .await?;

        let usage = (prompt_tokens > 0 || completion_tokens > 0).then_some(Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        });

        Ok(LlmResponse {
            content,
            model: self.model.clone(),
            finish_reason,
            usage,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Parse an Anthropic Messages API response body.
pub(crate) fn parse_anthropic_chat(v: &Value, fallback_model: &str) -> LlmResponse {
    let content = v["content"]
        .as_array()
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b["type"].as_str() == Some("text"))
                .filter_map(|b| b["text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();
    let finish_reason = v["stop_reason"].as_str().unwrap_or_default().to_string();
    let model = v["model"]
        .as_str()
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback_model)
        .to_string();

    let input = v["usage"]["input_tokens"].as_u64();
    let output = v["usage"]["output_tokens"].as_u64();
    let usage = match (input, output) {
        (None, None) => None,
        (i, o) => {
            let prompt = i.unwrap_or(0) as u32;
            let completion = o.unwrap_or(0) as u32;
            Some(Usage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: prompt + completion,
            })
        }
    };

    LlmResponse {
        content,
        model,
        finish_reason,
        usage,
    }
}

// ---------------------------------------------------------------------------
// Gemini client
// ---------------------------------------------------------------------------

/// Client for the Gemini `generateContent` API.
#[derive(Debug)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
}

impl GeminiClient {
    fn new(http: reqwest::Client, config: &LlmConfig) -> Self {
        Self {
            http,
            base_url: effective_base(
                &config.base_url,
                "https://generativelanguage.googleapis.com",
            ),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    /// Build the request body. Gemini has no system role; system messages
    /// are folded into `systemInstruction`, assistant turns become `model`.
    fn request_body(&self, messages: &[Message]) -> Value {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut contents: Vec<Value> = Vec::new();
        for m in messages {
            if m.role == "system" {
                system_parts.push(&m.content);
                continue;
            }
            let role = if m.role == "assistant" { "model" } else { "user" };
            contents.push(json!({"role": role, "parts": [{"text": m.content}]}));
        }

        let mut generation_config = json!({});
        if self.max_tokens > 0 {
            generation_config["maxOutputTokens"] = json!(self.max_tokens);
        }
        if self.temperature > 0.0 {
            generation_config["temperature"] = json!(self.temperature);
        }

        let mut body = json!({"contents": contents, "generationConfig": generation_config});
        if !system_parts.is_empty() {
            body["systemInstruction"] = json!({"parts": [{"text": system_parts.join("\n")}]});
        }
        body
    }
}

#[async_trait]
impl ChatClient for GeminiClient {
    async fn chat(&self, messages: &[Message]) -> Result<LlmResponse> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let resp = self
            .http
            .post(url)
            .json(&self.request_body(messages))
            .send()
            .await
            .map_err(|e| GatewayError::Provider(format!("request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(error_for_status(resp).await);
        }

        let value: Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::Provider(format!("invalid response body: {e}")))?;
        Ok(parse_gemini_chat(&value, &self.model))
    }

    /// Gemini streaming is served as a single accumulated delta: the full
    /// completion is fetched and handed to `on_chunk` once.
    async fn chat_stream(
        &self,
        messages: &[Message],
        on_chunk: ChunkHandler<'_>,
    ) -> Result<LlmResponse> {
        let response = self.chat(messages).await?;
        if !response.content.is_empty() {
            on_chunk(&response.content)?;
        }
        Ok(response)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Parse a Gemini `generateContent` response body.
pub(crate) fn parse_gemini_chat(v: &Value, fallback_model: &str) -> LlmResponse {
    let candidate = &v["candidates"][0];
    let content = candidate["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p["text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();
    let finish_reason = candidate["finishReason"]
        .as_str()
        .unwrap_or_default()
        .to_lowercase();

    let meta = &v["usageMetadata"];
    let usage = meta["totalTokenCount"].as_u64().map(|total| Usage {
        prompt_tokens: meta["promptTokenCount"].as_u64().unwrap_or(0) as u32,
        completion_tokens: meta["candidatesTokenCount"].as_u64().unwrap_or(0) as u32,
        total_tokens: total as u32,
    });

    LlmResponse {
        content,
        model: fallback_model.to_string(),
        finish_reason,
        usage,
    }
}

// ---------------------------------------------------------------------------
// Ollama client
// ---------------------------------------------------------------------------

/// Client for the Ollama `/api/chat` endpoint.
#[derive(Debug)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f64,
}

impl OllamaClient {
    fn new(http: reqwest::Client, config: &LlmConfig) -> Self {
        Self {
            http,
            base_url: effective_base(&config.base_url, "http://localhost:11434"),
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }

    fn request_body(&self, messages: &[Message], stream: bool) -> Value {
        let msgs: Vec<Value> = messages
            .iter()
            .map(|m| json!({"role": map_role(&m.role), "content": m.content}))
            .collect();

        let mut body = json!({"model": self.model, "messages": msgs, "stream": stream});
        if self.temperature > 0.0 {
            body["options"] = json!({"temperature": self.temperature});
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        let resp = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::Provider(format!("request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(error_for_status(resp).await);
        }
        Ok(resp)
    }
}

#[async_trait]
impl ChatClient for OllamaClient {
    async fn chat(&self, messages: &[Message]) -> Result<LlmResponse> {
        let resp = self.send(&self.request_body(messages, false)).await?;
        let value: Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::Provider(format!("invalid response body: {e}")))?;
        Ok(parse_ollama_chat(&value, &self.model))
    }

    /// Ollama streams newline-delimited JSON objects rather than SSE.
    async fn chat_stream(
        &self,
        messages: &[Message],
        on_chunk: ChunkHandler<'_>,
    ) -> Result<LlmResponse> {
        let resp = self.send(&self.request_body(messages, true)).await?;

        let mut content = String::new();
        let mut finish_reason = String::new();
        let mut usage: Option<Usage> = None;

        for_each_line(resp, |line| {
            if line.trim().is_empty() {
                return Ok(());
            }
            let Ok(event) = serde_json::from_str::<Value>(line) else {
                return Ok(());
            };

            if let Some(text) = event["message"]["content"].as_str() {
                if !text.is_empty() {
                    content.push_str(text);
                    on_chunk(text)?;
                }
            }
            if event["done"].as_bool() == Some(true) {
                finish_reason = event["done_reason"]
                    .as_str()
                    .unwrap_or("stop")
                    .to_string();
                let parsed = parse_ollama_chat(&event, &self.model);
                usage = parsed.usage;
            }
            Ok(())
        })
        .await?;

        Ok(LlmResponse {
            content,
            model: self.model.clone(),
            finish_reason,
            usage,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Parse an Ollama chat response body.
pub(crate) fn parse_ollama_chat(v: &Value, fallback_model: &str) -> LlmResponse {
    let content = v["message"]["content"]
        .as_str()
        .or_else(|| v["response"].as_str())
        .unwrap_or_default()
        .to_string();
    let finish_reason = v["done_reason"].as_str().unwrap_or_default().to_string();
    let model = v["model"]
        .as_str()
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback_model)
        .to_string();

    let prompt = v["prompt_eval_count"].as_u64();
    let completion = v["eval_count"].as_u64();
    let usage = match (prompt, completion) {
        (None, None) => None,
        (p, c) => {
            let prompt = p.unwrap_or(0) as u32;
            let completion = c.unwrap_or(0) as u32;
            Some(Usage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: prompt + completion,
            })
        }
    };

    LlmResponse {
        content,
        model,
        finish_reason,
        usage,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
