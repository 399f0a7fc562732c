//! The guard pipeline.
//!
//! Orchestrates one request through classify → mask → policy → forward →
//! meter → audit. A block at the classification or policy stage means no
//! upstream call is made and no spending is recorded; an upstream failure
//! after classification still returns the security and PII analysis to the
//! caller. `analyze`, `mask`, and `detect` are degenerate pipelines over the
//! same engines.
//!
//! Every variant appends exactly one `request` audit record; security and
//! spending alerts append their own records on top.

use promptgate_core::{
    Alert, AlertSeverity, AlertType, AuditEventType, AuditLog, AuditStatus, GuardRequest,
    GuardResponse, PiiReport, PolicyEvaluation, ProcessedInput, SecurityReport, ThreatLevel,
};
use promptgate_security::{InjectionDetector, PiiMasker};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::audit::AuditEngine;
use crate::factory::ClientFactory;
use crate::policy::{EvaluationContext, PolicyEngine};
use crate::spending::SpendTracker;

/// Transport-level request attributes recorded in the audit trail.
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub ip_address: String,
    pub user_agent: String,
}

/// The request pipeline and its collaborators.
pub struct GuardPipeline {
    detector: Arc<InjectionDetector>,
    masker: Arc<PiiMasker>,
    factory: Arc<ClientFactory>,
    policy: Arc<PolicyEngine>,
    spending: Arc<SpendTracker>,
    audit: Arc<AuditEngine>,
}

impl GuardPipeline {
    pub fn new(
        detector: Arc<InjectionDetector>,
        masker: Arc<PiiMasker>,
        factory: Arc<ClientFactory>,
        policy: Arc<PolicyEngine>,
        spending: Arc<SpendTracker>,
        audit: Arc<AuditEngine>,
    ) -> Self {
        Self {
            detector,
            masker,
            factory,
            policy,
            spending,
            audit,
        }
    }

    // -- full pipeline -------------------------------------------------------

    /// Run the full guard pipeline for one request.
    pub async fn guard(&self, mut req: GuardRequest, meta: &ClientMeta) -> GuardResponse {
        let start = Instant::now();
        ensure_request_id(&mut req);

        let mut response = GuardResponse {
            request_id: req.request_id.clone(),
            allowed: true,
            ..GuardResponse::default()
        };

        // Stage 1: injection classification.
        let security = self.detector.analyze(&req.messages);
        if self.detector.should_block(&security) {
            self.emit_security_alert(&req, &security, meta);
            response.allowed = false;
            response.processing_time_ms = start.elapsed().as_millis() as u64;
            self.log_request(
                &req,
                "guard",
                AuditStatus::Blocked,
                Some(&security),
                None,
                &[],
                HashMap::new(),
                response.processing_time_ms,
                meta,
            );
            response.security_report = Some(security);
            return response;
        }

        // Stage 2: PII masking.
        let (masked, pii) = self.masker.mask(&req.messages);
        response.processed_input = Some(ProcessedInput {
            original_messages: req.messages.clone(),
            masked_messages: masked.clone(),
            pii_masked: pii.pii_detected,
        });

        // Stage 3: policy evaluation over the pre-call context.
        let eval = self.policy.evaluate(&self.evaluation_context(&req));
        response.warnings = eval.warnings.clone();
        if !eval.allowed {
            response.allowed = false;
            response.error = if eval.block_reason.is_empty() {
                "Request blocked by policy".to_string()
            } else {
                eval.block_reason.clone()
            };
            response.processing_time_ms = start.elapsed().as_millis() as u64;
            self.log_request(
                &req,
                "guard",
                AuditStatus::Blocked,
                Some(&security),
                Some(&pii),
                &eval.evaluations,
                HashMap::new(),
                response.processing_time_ms,
                meta,
            );
            response.security_report = Some(security);
            response.pii_report = Some(pii);
            return response;
        }

        // Stages 4-6: forward the sanitized prompt and meter usage. The
        // owned flag only marks the client transient; dropping the handle at
        // scope exit releases it either way.
        let mut extra_details: HashMap<String, serde_json::Value> = HashMap::new();
        match self.factory.get_client(&req).await {
            Err(e) => {
                response.error = e.to_string();
            }
            Ok((client, _owned)) => match client.chat(&masked).await {
                Err(e) => {
                    response.error = e.to_string();
                }
                Ok(llm) => {
                    if let Some(usage) = llm.usage {
                        let user = req.user_id().unwrap_or_default();
                        match self.spending.record_usage(user, &llm.model, &usage).await {
                            Ok(cost) => {
                                extra_details
                                    .insert("cost".to_string(), serde_json::json!(cost));
                            }
                            Err(e) => {
                                tracing::warn!(request_id = %req.request_id, "Failed to record usage: {e}");
                            }
                        }
                        extra_details.insert(
                            "prompt_tokens".to_string(),
                            serde_json::json!(usage.prompt_tokens),
                        );
                        extra_details.insert(
                            "completion_tokens".to_string(),
                            serde_json::json!(usage.completion_tokens),
                        );
                        extra_details.insert(
                            "total_tokens".to_string(),
                            serde_json::json!(usage.total_tokens),
                        );
                    }
                    extra_details
                        .insert("model".to_string(), serde_json::json!(llm.model.clone()));
                    extra_details.insert(
                        "provider".to_string(),
                        serde_json::json!(self.effective_provider(&req)),
                    );
                    response.llm_response = Some(llm);
                }
            },
        }

        response.processing_time_ms = start.elapsed().as_millis() as u64;
        self.log_request(
            &req,
            "guard",
            AuditStatus::Success,
            Some(&security),
            Some(&pii),
            &eval.evaluations,
            extra_details,
            response.processing_time_ms,
            meta,
        );

        response.security_report = Some(security);
        response.pii_report = Some(pii);
        response
    }

    // -- degenerate pipelines --------------------------------------------------

    /// Classification and PII detection only; nothing is forwarded.
    pub fn analyze(&self, mut req: GuardRequest, meta: &ClientMeta) -> GuardResponse {
        let start = Instant::now();
        ensure_request_id(&mut req);

        let security = self.detector.analyze(&req.messages);
        let pii = self.masker.analyze(&req.messages);
        let allowed = !self.detector.should_block(&security);

        let elapsed = start.elapsed().as_millis() as u64;
        self.log_request(
            &req,
            "analyze",
            if allowed {
                AuditStatus::Success
            } else {
                AuditStatus::Blocked
            },
            Some(&security),
            Some(&pii),
            &[],
            HashMap::new(),
            elapsed,
            meta,
        );

        GuardResponse {
            request_id: req.request_id,
            allowed,
            security_report: Some(security),
            pii_report: Some(pii),
            processing_time_ms: elapsed,
            ..GuardResponse::default()
        }
    }

    /// PII masking only.
    pub fn mask(&self, mut req: GuardRequest, meta: &ClientMeta) -> GuardResponse {
        let start = Instant::now();
        ensure_request_id(&mut req);

        let (masked, pii) = self.masker.mask(&req.messages);

        let elapsed = start.elapsed().as_millis() as u64;
        self.log_request(
            &req,
            "mask",
            AuditStatus::Success,
            None,
            Some(&pii),
            &[],
            HashMap::new(),
            elapsed,
            meta,
        );

        GuardResponse {
            request_id: req.request_id,
            allowed: true,
            processed_input: Some(ProcessedInput {
                masked_messages: masked,
                pii_masked: pii.pii_detected,
                ..ProcessedInput::default()
            }),
            pii_report: Some(pii),
            processing_time_ms: elapsed,
            ..GuardResponse::default()
        }
    }

    /// Injection detection only.
    pub fn detect(&self, mut req: GuardRequest, meta: &ClientMeta) -> GuardResponse {
        let start = Instant::now();
        ensure_request_id(&mut req);

        let security = self.detector.analyze(&req.messages);
        let allowed = !self.detector.should_block(&security);

        let elapsed = start.elapsed().as_millis() as u64;
        self.log_request(
            &req,
            "detect",
            if allowed {
                AuditStatus::Success
            } else {
                AuditStatus::Blocked
            },
            Some(&security),
            None,
            &[],
            HashMap::new(),
            elapsed,
            meta,
        );

        GuardResponse {
            request_id: req.request_id,
            allowed,
            security_report: Some(security),
            processing_time_ms: elapsed,
            ..GuardResponse::default()
        }
    }

    // -- internals --------------------------------------------------------------

    fn evaluation_context(&self, req: &GuardRequest) -> EvaluationContext {
        EvaluationContext {
            user_id: req.user_id().unwrap_or_default().to_string(),
            model: self.effective_model(req),
            provider: self.effective_provider(req),
            token_count: 0,
            cost: 0.0,
            content_type: "chat".to_string(),
            metadata: req.metadata.clone(),
        }
    }

    fn effective_model(&self, req: &GuardRequest) -> String {
        if req.model.is_empty() {
            self.factory.default_config().model.clone()
        } else {
            req.model.clone()
        }
    }

    fn effective_provider(&self, req: &GuardRequest) -> String {
        if req.provider.is_empty() {
            self.factory.default_config().provider.clone()
        } else {
            req.provider.clone()
        }
    }

    /// Record the security alert trail for a blocked injection.
    fn emit_security_alert(&self, req: &GuardRequest, report: &SecurityReport, meta: &ClientMeta) {
        let top_type = report
            .detections
            .first()
            .map(|d| d.detection_type.clone())
            .unwrap_or_default();

        let mut details = HashMap::new();
        details.insert(
            "threat_level".to_string(),
            serde_json::json!(report.threat_level.to_string()),
        );
        details.insert(
            "detection_count".to_string(),
            serde_json::json!(report.detections.len()),
        );
        if !top_type.is_empty() {
            details.insert("threat_type".to_string(), serde_json::json!(top_type));
        }

        self.audit.log(AuditLog {
            event_type: AuditEventType::SecurityAlert,
            action: "injection_blocked".to_string(),
            user_id: req.user_id().unwrap_or_default().to_string(),
            resource_type: "llm".to_string(),
            request_id: req.request_id.clone(),
            ip_address: meta.ip_address.clone(),
            user_agent: meta.user_agent.clone(),
            status: AuditStatus::Blocked,
            details,
            ..AuditLog::default()
        });

        self.audit.create_alert(Alert {
            alert_type: AlertType::Security,
            severity: if report.threat_level >= ThreatLevel::Critical {
                AlertSeverity::Critical
            } else {
                AlertSeverity::High
            },
            title: "Prompt injection blocked".to_string(),
            message: format!(
                "Blocked request with threat level {} ({} detection(s))",
                report.threat_level,
                report.detections.len()
            ),
            user_id: req.user_id().unwrap_or_default().to_string(),
            ..Alert::default()
        });
    }

    /// Append the per-request audit record. Details carry counts, types, and
    /// categorical outcomes only — never message contents, original PII
    /// values, or API keys.
    #[allow(clippy::too_many_arguments)]
    fn log_request(
        &self,
        req: &GuardRequest,
        action: &str,
        status: AuditStatus,
        security: Option<&SecurityReport>,
        pii: Option<&PiiReport>,
        evaluations: &[PolicyEvaluation],
        extra_details: HashMap<String, serde_json::Value>,
        duration_ms: u64,
        meta: &ClientMeta,
    ) {
        let mut details = extra_details;
        details.insert("action".to_string(), serde_json::json!(action));

        if let Some(report) = security {
            details.insert(
                "injection_detected".to_string(),
                serde_json::json!(report.injection_detected),
            );
            details.insert(
                "threat_level".to_string(),
                serde_json::json!(report.threat_level.to_string()),
            );
            if report.injection_detected {
                details.insert(
                    "detection_count".to_string(),
                    serde_json::json!(report.detections.len()),
                );
            }
        }
        if let Some(report) = pii {
            details.insert(
                "pii_detected".to_string(),
                serde_json::json!(report.pii_detected),
            );
            details.insert("pii_count".to_string(), serde_json::json!(report.pii_count));
        }

        self.audit.log(AuditLog {
            event_type: AuditEventType::Request,
            action: action.to_string(),
            user_id: req.user_id().unwrap_or_default().to_string(),
            user_email: req.user_email().unwrap_or_default().to_string(),
            resource_type: "llm".to_string(),
            request_id: req.request_id.clone(),
            ip_address: meta.ip_address.clone(),
            user_agent: meta.user_agent.clone(),
            status,
            duration_ms,
            details,
            policy_results: evaluations.to_vec(),
            ..AuditLog::default()
        });
    }
}

/// Assign a request ID when the caller did not provide one.
fn ensure_request_id(req: &mut GuardRequest) {
    if req.request_id.is_empty() {
        req.request_id = Uuid::new_v4().to_string();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
