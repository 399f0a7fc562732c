//! Core types, traits, and errors for PromptGate
//!
//! This crate contains the foundational types shared across all PromptGate
//! components: the chat/guard data model, security and PII reports,
//! governance policies, spending limits, audit records, alerts, and the
//! storage trait the gateway consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Chat data model
// ---------------------------------------------------------------------------

/// A single chat message.
///
/// Roles are the provider-conventional strings `"system"`, `"user"`, and
/// `"assistant"`. System messages are considered trusted and are exempt
/// from injection classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    /// Create a message with an arbitrary role.
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

/// An inbound request to the guard pipeline.
///
/// Besides the message list, a request may carry a per-request provider
/// override (`provider` / `api_key` / `base_url` / `model`) that causes the
/// client factory to build a transient upstream client for this request
/// only. The acting user is carried in `metadata["user_id"]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardRequest {
    /// Caller-supplied request ID; generated when empty.
    #[serde(default)]
    pub request_id: String,
    pub messages: Vec<Message>,
    /// Upstream provider override (openai, anthropic, google, ollama, xai, bedrock).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    /// Per-request API key override. Never echoed back or audited.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl GuardRequest {
    /// The acting user, when the caller provided one in metadata.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.metadata.get("user_id").map(String::as_str)
    }

    /// The acting user's email, when provided in metadata.
    #[must_use]
    pub fn user_email(&self) -> Option<&str> {
        self.metadata.get("user_email").map(String::as_str)
    }
}

/// The sanitized input that was (or would be) forwarded upstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessedInput {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub original_messages: Vec<Message>,
    pub masked_messages: Vec<Message>,
    pub pii_masked: bool,
}

/// Token usage reported by the upstream provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A normalized upstream chat completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub finish_reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// The full pipeline response for `guard` and its degenerate variants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardResponse {
    pub request_id: String,
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_input: Option<ProcessedInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_response: Option<LlmResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_report: Option<SecurityReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pii_report: Option<PiiReport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub processing_time_ms: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

// ---------------------------------------------------------------------------
// Security report
// ---------------------------------------------------------------------------

/// Ordinal categorization of injection risk.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// A single injection detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Detection category, e.g. `instruction_override` or `keyword_match`.
    #[serde(rename = "type")]
    pub detection_type: String,
    /// The pattern or keyword that matched.
    pub pattern: String,
    /// Which message matched, e.g. `user_message_0`.
    pub location: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    pub description: String,
}

/// Result of classifying a request for prompt injection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityReport {
    pub injection_detected: bool,
    pub threat_level: ThreatLevel,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detections: Vec<Detection>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub blocked_reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
}

// ---------------------------------------------------------------------------
// PII report
// ---------------------------------------------------------------------------

/// A detected-and-masked PII instance.
///
/// `original_value` is retained for in-process use only; it must never be
/// written to persistent audit details or any external sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiMatch {
    /// PII category, e.g. `email` or `ssn`.
    #[serde(rename = "type")]
    pub pii_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub original_value: String,
    pub masked_value: String,
    pub location: String,
    /// Byte offsets into the content string at the time of the match.
    pub start: usize,
    pub end: usize,
}

/// Result of scanning messages for PII.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PiiReport {
    pub pii_detected: bool,
    pub pii_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pii_types: Vec<PiiMatch>,
    pub masked_count: usize,
}

// ---------------------------------------------------------------------------
// Governance policies
// ---------------------------------------------------------------------------

/// Category of a governance policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyType {
    Spending,
    RateLimit,
    #[default]
    Content,
    Access,
    Compliance,
}

/// Lifecycle status of a policy. Only `active` policies are evaluated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStatus {
    Active,
    Inactive,
    #[default]
    Draft,
}

/// Comparison operator within a policy rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperator {
    #[default]
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    NotContains,
    In,
    NotIn,
}

/// How a rule combines with the running result of the rules before it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCondition {
    #[default]
    And,
    Or,
}

/// Action taken when a policy matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Allow,
    Deny,
    Warn,
    #[default]
    Audit,
    Throttle,
}

/// A single rule within a policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyRule {
    #[serde(default)]
    pub id: String,
    /// Field to resolve: `user_id`, `model`, `provider`, `token_count`,
    /// `cost`, or a request-metadata key.
    pub field: String,
    pub operator: RuleOperator,
    pub value: serde_json::Value,
    #[serde(default)]
    pub condition: RuleCondition,
}

/// Who and what a policy applies to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyTargets {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<String>,
    #[serde(default)]
    pub all_users: bool,
}

/// What happens when a policy is triggered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyActions {
    pub action: ActionType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notify: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub webhook_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log_level: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Type-specific policy configuration knobs.
///
/// `requests_per_hour` and `burst_limit` are part of the stored schema but
/// have no evaluator wiring; rate-limit policies are evaluated through the
/// generic rule engine only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    // Spending
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_limit: Option<f64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub currency: String,
    // Rate limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_minute: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_hour: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst_limit: Option<u32>,
    // Content filter
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub blocked_keywords: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub allowed_models: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    // Access control
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub allowed_roles: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub allowed_users: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub denied_users: String,
    // Compliance
    #[serde(default)]
    pub require_audit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_retention_days: Option<u32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pii_handling: String,
}

/// An AI-governance policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "type")]
    pub policy_type: PolicyType,
    pub status: PolicyStatus,
    /// Evaluation priority; 1 is highest.
    pub priority: i32,
    #[serde(default)]
    pub config: PolicyConfig,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
    #[serde(default)]
    pub targets: PolicyTargets,
    #[serde(default)]
    pub actions: PolicyActions,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_by: String,
}

/// The outcome of evaluating one policy against a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyEvaluation {
    pub policy_id: String,
    pub policy_name: String,
    pub matched: bool,
    pub action: ActionType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub evaluated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Spending limits
// ---------------------------------------------------------------------------

/// Accumulation window of a spending limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitType {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

/// A budget that accumulates spend and may alert at a threshold.
///
/// An empty or `"*"` `user_id` makes the limit global. `current_spend` is
/// monotone non-decreasing between `reset_at` boundaries; resetting is an
/// external scheduler concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpendingLimit {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    pub limit_type: LimitType,
    pub limit_amount: f64,
    #[serde(default)]
    pub current_spend: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub currency: String,
    #[serde(default)]
    pub reset_at: Option<DateTime<Utc>>,
    /// Percentage of `limit_amount` at which to alert (1..=100; 0 disables).
    #[serde(default)]
    pub alert_at: f64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SpendingLimit {
    /// Whether this limit applies to the given user.
    #[must_use]
    pub fn applies_to(&self, user_id: &str) -> bool {
        self.user_id == user_id || self.user_id.is_empty() || self.user_id == "*"
    }
}

// ---------------------------------------------------------------------------
// Users and groups
// ---------------------------------------------------------------------------

/// RBAC role of a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    SuperAdmin,
    Admin,
    #[default]
    User,
    Viewer,
}

/// A user known to the control plane.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,
}

/// A named group of users; feeds policy targeting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Group {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Audit log
// ---------------------------------------------------------------------------

/// Kind of audit event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    #[default]
    Request,
    PolicyChange,
    UserAction,
    SystemEvent,
    SecurityAlert,
    SpendingAlert,
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Request => "request",
            Self::PolicyChange => "policy_change",
            Self::UserAction => "user_action",
            Self::SystemEvent => "system_event",
            Self::SecurityAlert => "security_alert",
            Self::SpendingAlert => "spending_alert",
        };
        write!(f, "{s}")
    }
}

/// Outcome recorded on an audit event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    #[default]
    Success,
    Failure,
    Blocked,
    Warning,
}

/// An append-only audit record.
///
/// `details` must never contain original PII values, raw API keys, or
/// message contents — only counts, types, and categorical outcomes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditLog {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub event_type: AuditEventType,
    pub action: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_email: String,
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip_address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_agent: String,
    pub status: AuditStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy_results: Vec<PolicyEvaluation>,
}

/// Filter and pagination parameters for audit queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub event_types: Vec<AuditEventType>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub resource_type: String,
    #[serde(default)]
    pub status: Option<AuditStatus>,
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

/// Per-user usage aggregate within an [`AuditStats`] period.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_email: String,
    pub request_count: u64,
    pub tokens_used: u64,
    pub total_cost: f64,
}

/// Per-model usage aggregate within an [`AuditStats`] period.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelStats {
    pub model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider: String,
    pub request_count: u64,
    pub tokens_used: u64,
    pub total_cost: f64,
}

/// Aggregated audit statistics for a lookback period.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditStats {
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub allowed_requests: u64,
    pub warning_requests: u64,
    pub unique_users: u64,
    pub total_tokens_used: u64,
    pub total_cost: f64,
    pub top_users: Vec<UserStats>,
    pub top_models: Vec<ModelStats>,
    /// Hour buckets keyed `YYYY-MM-DDTHH`.
    pub requests_by_hour: HashMap<String, u64>,
    pub events_by_type: HashMap<String, u64>,
    pub period: String,
}

// ---------------------------------------------------------------------------
// Dashboard metrics
// ---------------------------------------------------------------------------

/// High-level request/user/spend counters with day-over-day change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverviewMetrics {
    pub total_requests_24h: u64,
    pub requests_change_percent: f64,
    pub active_users_24h: u64,
    pub users_change_percent: f64,
    pub blocked_requests_24h: u64,
    pub blocked_change_percent: f64,
    pub total_spend_24h: f64,
    pub spend_change_percent: f64,
}

/// Security posture counters for the dashboard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityMetrics {
    pub injection_attempts_24h: u64,
    pub pii_detections_24h: u64,
    pub threats_by_level: HashMap<String, u64>,
    pub top_threat_types: HashMap<String, u64>,
}

/// Token and routing counters for the dashboard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageMetrics {
    pub total_tokens_24h: u64,
    pub prompt_tokens_24h: u64,
    pub completion_tokens_24h: u64,
    pub requests_by_model: HashMap<String, u64>,
    pub requests_by_provider: HashMap<String, u64>,
}

/// Spend breakdowns for the dashboard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpendingMetrics {
    pub total_spend_today: f64,
    pub spend_by_user: HashMap<String, f64>,
    pub spend_by_model: HashMap<String, f64>,
}

/// Aggregated metrics served by the control-plane dashboard endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DashboardMetrics {
    pub overview: OverviewMetrics,
    pub security: SecurityMetrics,
    pub usage: UsageMetrics,
    pub spending: SpendingMetrics,
    pub recent_alerts: Vec<Alert>,
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// Category of an alert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Security,
    Spending,
    Policy,
    #[default]
    System,
}

/// Severity of an alert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

/// A derived alert. Acknowledgement is idempotent: `acked_at` is set at most
/// once, and later acks are no-ops.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Alert {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub policy_id: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub acked_by: String,
}

// ---------------------------------------------------------------------------
// HTTP envelope types
// ---------------------------------------------------------------------------

/// Liveness/readiness payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
    pub services: HashMap<String, String>,
}

/// JSON error body returned by the HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Core error type shared across PromptGate components.
#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Security analysis error: {0}")]
    Security(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

// ---------------------------------------------------------------------------
// Repository trait
// ---------------------------------------------------------------------------

/// Storage collaborator consumed by the gateway.
///
/// The concrete backend is opaque to the core: an in-memory implementation
/// lives in `promptgate-storage`, and a database-backed one can be swapped
/// in without touching the pipeline. Settings are a plain key/value store
/// with JSON values.
#[async_trait::async_trait]
pub trait Repository: Send + Sync {
    // -- users --
    async fn create_user(&self, user: &User) -> Result<User>;
    async fn get_user(&self, id: &str) -> Result<Option<User>>;
    async fn list_users(&self) -> Result<Vec<User>>;
    async fn update_user(&self, user: &User) -> Result<User>;
    async fn delete_user(&self, id: &str) -> Result<()>;

    // -- policies --
    async fn create_policy(&self, policy: &Policy) -> Result<Policy>;
    async fn get_policy(&self, id: &str) -> Result<Option<Policy>>;
    async fn list_policies(&self) -> Result<Vec<Policy>>;
    async fn update_policy(&self, policy: &Policy) -> Result<Policy>;
    async fn delete_policy(&self, id: &str) -> Result<()>;

    // -- spending limits (never deleted, only reset) --
    async fn create_spending_limit(&self, limit: &SpendingLimit) -> Result<SpendingLimit>;
    async fn get_spending_limit(&self, id: &str) -> Result<Option<SpendingLimit>>;
    async fn list_spending_limits(&self) -> Result<Vec<SpendingLimit>>;
    async fn update_spending_limit(&self, limit: &SpendingLimit) -> Result<SpendingLimit>;

    // -- audit logs --
    async fn create_audit_log(&self, entry: &AuditLog) -> Result<()>;
    async fn list_audit_logs(&self, limit: usize) -> Result<Vec<AuditLog>>;

    // -- settings --
    async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>>;
    async fn set_setting(&self, key: &str, value: serde_json::Value) -> Result<()>;
    async fn all_settings(&self) -> Result<HashMap<String, serde_json::Value>>;
}

/// Generate a fresh entity ID.
#[must_use]
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
