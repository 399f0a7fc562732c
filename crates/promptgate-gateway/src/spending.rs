//! Spending ledger: cost model, usage metering, and threshold alerts.
//!
//! Pricing is a per-million-token table with custom overrides; lookup is
//! custom override → exact entry → longest matching prefix → the `default`
//! fallback. Usage recording applies the cost to every limit that covers
//! the user (an empty or `"*"` limit user is global) and fires exactly one
//! spending alert per limit on the first crossing of its alert threshold.
//! The increment-and-check sequence is serialized by a tracker mutex so
//! concurrent requests cannot miss or double-fire an alert.

use promptgate_core::{
    Alert, AlertSeverity, AlertType, AuditEventType, AuditLog, AuditStatus, Repository, Result,
    SpendingLimit, Usage,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

use crate::audit::AuditEngine;

// ---------------------------------------------------------------------------
// Pricing table (USD per 1 million tokens)
// ---------------------------------------------------------------------------

/// Pricing entry for a model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// Built-in pricing for well-known commercial models. Keys are matched
/// exactly first, then by longest prefix so dated releases inherit their
/// family pricing.
const DEFAULT_PRICING: &[(&str, ModelPricing)] = &[
    // OpenAI
    ("gpt-4o", ModelPricing { input_per_million: 2.50, output_per_million: 10.00 }),
    ("gpt-4o-mini", ModelPricing { input_per_million: 0.15, output_per_million: 0.60 }),
    ("gpt-4-turbo", ModelPricing { input_per_million: 10.00, output_per_million: 30.00 }),
    ("gpt-4", ModelPricing { input_per_million: 30.00, output_per_million: 60.00 }),
    ("gpt-3.5-turbo", ModelPricing { input_per_million: 0.50, output_per_million: 1.50 }),
    // Anthropic
    ("claude-3-5-sonnet-latest", ModelPricing { input_per_million: 3.00, output_per_million: 15.00 }),
    ("claude-3-5-sonnet-20241022", ModelPricing { input_per_million: 3.00, output_per_million: 15.00 }),
    ("claude-3-opus-20240229", ModelPricing { input_per_million: 15.00, output_per_million: 75.00 }),
    ("claude-3-sonnet-20240229", ModelPricing { input_per_million: 3.00, output_per_million: 15.00 }),
    ("claude-3-haiku-20240307", ModelPricing { input_per_million: 0.25, output_per_million: 1.25 }),
    // Google
    ("gemini-1.5-pro", ModelPricing { input_per_million: 1.25, output_per_million: 5.00 }),
    ("gemini-1.5-flash", ModelPricing { input_per_million: 0.075, output_per_million: 0.30 }),
    ("gemini-pro", ModelPricing { input_per_million: 0.50, output_per_million: 1.50 }),
    // AWS Bedrock Claude model IDs
    ("anthropic.claude-3-5-sonnet-20241022-v2:0", ModelPricing { input_per_million: 3.00, output_per_million: 15.00 }),
    ("anthropic.claude-3-sonnet-20240229-v1:0", ModelPricing { input_per_million: 3.00, output_per_million: 15.00 }),
    ("anthropic.claude-3-haiku-20240307-v1:0", ModelPricing { input_per_million: 0.25, output_per_million: 1.25 }),
    // X.AI
    ("grok-beta", ModelPricing { input_per_million: 5.00, output_per_million: 15.00 }),
];

/// Fallback pricing for unknown models.
const FALLBACK_PRICING: ModelPricing = ModelPricing {
    input_per_million: 1.00,
    output_per_million: 3.00,
};

// ---------------------------------------------------------------------------
// SpendTracker
// ---------------------------------------------------------------------------

/// Meters token usage into the spending limits held by the repository.
pub struct SpendTracker {
    repo: Arc<dyn Repository>,
    audit: Arc<AuditEngine>,
    custom_pricing: RwLock<HashMap<String, ModelPricing>>,
    /// Serializes increment-and-threshold-check sequences across requests.
    ledger: Mutex<()>,
}

impl SpendTracker {
    pub fn new(repo: Arc<dyn Repository>, audit: Arc<AuditEngine>) -> Self {
        Self {
            repo,
            audit,
            custom_pricing: RwLock::new(HashMap::new()),
            ledger: Mutex::new(()),
        }
    }

    /// Install a custom pricing override for a model.
    pub fn set_custom_pricing(&self, model: &str, pricing: ModelPricing) {
        self.custom_pricing
            .write()
            .expect("pricing map poisoned")
            .insert(model.to_string(), pricing);
    }

    /// Resolve pricing for a model.
    #[must_use]
    pub fn pricing_for(&self, model: &str) -> ModelPricing {
        if let Some(p) = self
            .custom_pricing
            .read()
            .expect("pricing map poisoned")
            .get(model)
        {
            return *p;
        }

        let mut best: Option<(&str, ModelPricing)> = None;
        for (key, pricing) in DEFAULT_PRICING {
            if model == *key {
                return *pricing;
            }
            if model.starts_with(key) {
                match best {
                    Some((b, _)) if key.len() <= b.len() => {}
                    _ => best = Some((key, *pricing)),
                }
            }
        }
        best.map_or(FALLBACK_PRICING, |(_, p)| p)
    }

    /// Cost in USD for a usage record against a model.
    #[must_use]
    pub fn calculate_cost(&self, model: &str, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        let pricing = self.pricing_for(model);
        f64::from(prompt_tokens) * pricing.input_per_million / 1_000_000.0
            + f64::from(completion_tokens) * pricing.output_per_million / 1_000_000.0
    }

    /// Record usage for a user: apply the cost to every covering limit and
    /// fire the threshold alert on the first crossing.
    pub async fn record_usage(&self, user_id: &str, model: &str, usage: &Usage) -> Result<f64> {
        let cost = self.calculate_cost(model, usage.prompt_tokens, usage.completion_tokens);

        tracing::debug!(
            user_id,
            model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            cost,
            "Recording usage"
        );

        let _guard = self.ledger.lock().await;
        let limits = self.repo.list_spending_limits().await?;

        for limit in limits {
            if !limit.applies_to(user_id) {
                continue;
            }

            let prev = limit.current_spend;
            let mut updated = limit.clone();
            updated.current_spend = prev + cost;

            if let Err(e) = self.repo.update_spending_limit(&updated).await {
                tracing::warn!(limit_id = %limit.id, "Failed to update spending limit: {e}");
                continue;
            }

            if limit.alert_at > 0.0 {
                let threshold = limit.limit_amount * limit.alert_at / 100.0;
                if prev < threshold && updated.current_spend >= threshold {
                    self.emit_threshold_alert(&updated, threshold, user_id);
                }
            }
        }

        Ok(cost)
    }

    /// Advisory limit check: whether any covering limit is already at or
    /// over its cap, with the first offender's spend and cap.
    pub async fn check_limit(&self, user_id: &str) -> Result<(bool, f64, f64)> {
        let limits = self.repo.list_spending_limits().await?;
        for limit in limits {
            if limit.applies_to(user_id) && limit.current_spend >= limit.limit_amount {
                return Ok((true, limit.current_spend, limit.limit_amount));
            }
        }
        Ok((false, 0.0, 0.0))
    }

    /// Total spend accumulated across every limit covering a user.
    pub async fn user_spending(&self, user_id: &str) -> Result<f64> {
        let limits = self.repo.list_spending_limits().await?;
        Ok(limits
            .iter()
            .filter(|l| l.applies_to(user_id))
            .map(|l| l.current_spend)
            .sum())
    }

    /// Emit the spending-alert audit entry and alert for a crossed limit.
    /// Severity is medium, escalated to high at or beyond the full cap.
    fn emit_threshold_alert(&self, limit: &SpendingLimit, threshold: f64, acting_user: &str) {
        let severity = if limit.current_spend >= limit.limit_amount {
            AlertSeverity::High
        } else {
            AlertSeverity::Medium
        };

        tracing::warn!(
            limit_id = %limit.id,
            user_id = %limit.user_id,
            current_spend = limit.current_spend,
            threshold,
            "Spending alert threshold reached"
        );

        let user_id = if limit.user_id.is_empty() || limit.user_id == "*" {
            acting_user.to_string()
        } else {
            limit.user_id.clone()
        };

        let mut details = HashMap::new();
        details.insert(
            "current_spend".to_string(),
            serde_json::json!(limit.current_spend),
        );
        details.insert(
            "limit_amount".to_string(),
            serde_json::json!(limit.limit_amount),
        );
        details.insert("alert_at_percent".to_string(), serde_json::json!(limit.alert_at));

        self.audit.log(AuditLog {
            event_type: AuditEventType::SpendingAlert,
            action: "spending_threshold".to_string(),
            user_id: user_id.clone(),
            resource_type: "spending_limit".to_string(),
            resource_id: limit.id.clone(),
            status: AuditStatus::Warning,
            details,
            ..AuditLog::default()
        });

        self.audit.create_alert(Alert {
            alert_type: AlertType::Spending,
            severity,
            title: "Spending threshold reached".to_string(),
            message: format!(
                "Spend ${:.2} of ${:.2} ({:.0}% alert threshold)",
                limit.current_spend, limit.limit_amount, limit.alert_at
            ),
            user_id,
            ..Alert::default()
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use promptgate_core::LimitType;
    use promptgate_storage::MemoryRepository;

    fn tracker() -> (SpendTracker, Arc<dyn Repository>, Arc<AuditEngine>) {
        let repo: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
        let audit = Arc::new(AuditEngine::new(1000));
        (
            SpendTracker::new(Arc::clone(&repo), Arc::clone(&audit)),
            repo,
            audit,
        )
    }

    fn usage(prompt: u32, completion: u32) -> Usage {
        Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        }
    }

    async fn make_limit(
        repo: &Arc<dyn Repository>,
        user_id: &str,
        amount: f64,
        alert_at: f64,
    ) -> SpendingLimit {
        repo.create_spending_limit(&SpendingLimit {
            user_id: user_id.to_string(),
            limit_type: LimitType::Daily,
            limit_amount: amount,
            alert_at,
            currency: "USD".to_string(),
            ..SpendingLimit::default()
        })
        .await
        .unwrap()
    }

    // -- pricing --------------------------------------------------------------

    #[test]
    fn test_exact_pricing() {
        let (t, _, _) = tracker();
        let p = t.pricing_for("gpt-4o");
        assert!((p.input_per_million - 2.50).abs() < 1e-9);
        assert!((p.output_per_million - 10.00).abs() < 1e-9);
    }

    #[test]
    fn test_prefix_pricing_prefers_longest() {
        let (t, _, _) = tracker();
        // Dated release matches gpt-4o-mini, not gpt-4o or gpt-4.
        let p = t.pricing_for("gpt-4o-mini-2024-07-18");
        assert!((p.input_per_million - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_model_uses_fallback() {
        let (t, _, _) = tracker();
        let p = t.pricing_for("mystery-model-v9");
        assert!((p.input_per_million - 1.00).abs() < 1e-9);
        assert!((p.output_per_million - 3.00).abs() < 1e-9);
    }

    #[test]
    fn test_custom_pricing_overrides_default() {
        let (t, _, _) = tracker();
        t.set_custom_pricing(
            "gpt-4o",
            ModelPricing {
                input_per_million: 99.0,
                output_per_million: 99.0,
            },
        );
        assert!((t.pricing_for("gpt-4o").input_per_million - 99.0).abs() < 1e-9);
    }

    #[test]
    fn test_calculate_cost() {
        let (t, _, _) = tracker();
        // 1M prompt + 1M completion on gpt-4: $30 + $60.
        let cost = t.calculate_cost("gpt-4", 1_000_000, 1_000_000);
        assert!((cost - 90.0).abs() < 1e-6);
    }

    #[test]
    fn test_calculate_cost_small_request() {
        let (t, _, _) = tracker();
        let cost = t.calculate_cost("gpt-4o-mini", 500, 200);
        let expected = (500.0 * 0.15 + 200.0 * 0.60) / 1_000_000.0;
        assert!((cost - expected).abs() < 1e-12);
    }

    // -- recording ------------------------------------------------------------

    #[tokio::test]
    async fn test_record_usage_accumulates_spend() {
        let (t, repo, _) = tracker();
        let limit = make_limit(&repo, "u1", 100.0, 0.0).await;

        t.record_usage("u1", "gpt-4", &usage(1_000_000, 0)).await.unwrap();
        t.record_usage("u1", "gpt-4", &usage(1_000_000, 0)).await.unwrap();

        let stored = repo.get_spending_limit(&limit.id).await.unwrap().unwrap();
        assert!((stored.current_spend - 60.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_record_usage_applies_to_global_limits() {
        let (t, repo, _) = tracker();
        let global = make_limit(&repo, "*", 100.0, 0.0).await;
        let other = make_limit(&repo, "someone-else", 100.0, 0.0).await;

        t.record_usage("u1", "gpt-4", &usage(1_000_000, 0)).await.unwrap();

        let g = repo.get_spending_limit(&global.id).await.unwrap().unwrap();
        assert!((g.current_spend - 30.0).abs() < 1e-6);
        let o = repo.get_spending_limit(&other.id).await.unwrap().unwrap();
        assert!(o.current_spend.abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_spend_is_monotone() {
        let (t, repo, _) = tracker();
        let limit = make_limit(&repo, "u1", 1000.0, 0.0).await;

        let mut last = 0.0;
        for _ in 0..5 {
            t.record_usage("u1", "gpt-4o", &usage(10_000, 5_000)).await.unwrap();
            let now = repo
                .get_spending_limit(&limit.id)
                .await
                .unwrap()
                .unwrap()
                .current_spend;
            assert!(now >= last);
            last = now;
        }
    }

    // -- threshold alerts -----------------------------------------------------

    #[tokio::test]
    async fn test_alert_fires_once_on_first_crossing() {
        let (t, repo, audit) = tracker();
        let limit = make_limit(&repo, "u1", 10.0, 80.0).await;

        // Seed $7.50 of spend.
        let mut seeded = repo.get_spending_limit(&limit.id).await.unwrap().unwrap();
        seeded.current_spend = 7.5;
        repo.update_spending_limit(&seeded).await.unwrap();

        // $1.00 usage crosses the $8 threshold.
        t.set_custom_pricing(
            "flat",
            ModelPricing {
                input_per_million: 1_000_000.0,
                output_per_million: 0.0,
            },
        );
        t.record_usage("u1", "flat", &usage(1, 0)).await.unwrap();

        assert_eq!(audit.alerts(10, true).len(), 1);
        let (entries, _) = audit.query(&promptgate_core::AuditQuery {
            event_types: vec![AuditEventType::SpendingAlert],
            ..Default::default()
        });
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, AuditStatus::Warning);

        // A further $1.00 stays above the threshold: no new alert.
        t.record_usage("u1", "flat", &usage(1, 0)).await.unwrap();
        assert_eq!(audit.alerts(10, true).len(), 1);
    }

    #[tokio::test]
    async fn test_alert_severity_high_at_full_cap() {
        let (t, repo, audit) = tracker();
        make_limit(&repo, "u1", 10.0, 100.0).await;

        t.set_custom_pricing(
            "flat",
            ModelPricing {
                input_per_million: 1_000_000.0,
                output_per_million: 0.0,
            },
        );
        // $12 in one shot: crosses the 100% threshold at the cap.
        t.record_usage("u1", "flat", &usage(12, 0)).await.unwrap();

        let alerts = audit.alerts(10, true);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::High);
        assert_eq!(alerts[0].alert_type, AlertType::Spending);
    }

    #[tokio::test]
    async fn test_alert_disabled_when_alert_at_zero() {
        let (t, repo, audit) = tracker();
        make_limit(&repo, "u1", 0.01, 0.0).await;

        t.record_usage("u1", "gpt-4", &usage(1_000_000, 1_000_000)).await.unwrap();
        assert!(audit.alerts(10, true).is_empty());
    }

    // -- check_limit ----------------------------------------------------------

    #[tokio::test]
    async fn test_check_limit_reports_exceeded() {
        let (t, repo, _) = tracker();
        let limit = make_limit(&repo, "u1", 5.0, 0.0).await;

        let (exceeded, _, _) = t.check_limit("u1").await.unwrap();
        assert!(!exceeded);

        let mut over = repo.get_spending_limit(&limit.id).await.unwrap().unwrap();
        over.current_spend = 5.0;
        repo.update_spending_limit(&over).await.unwrap();

        let (exceeded, current, cap) = t.check_limit("u1").await.unwrap();
        assert!(exceeded);
        assert!((current - 5.0).abs() < 1e-9);
        assert!((cap - 5.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_user_spending_sums_covering_limits() {
        let (t, repo, _) = tracker();
        let a = make_limit(&repo, "u1", 10.0, 0.0).await;
        let b = make_limit(&repo, "", 10.0, 0.0).await;

        let mut a = repo.get_spending_limit(&a.id).await.unwrap().unwrap();
        a.current_spend = 1.0;
        repo.update_spending_limit(&a).await.unwrap();
        let mut b = repo.get_spending_limit(&b.id).await.unwrap().unwrap();
        b.current_spend = 2.0;
        repo.update_spending_limit(&b).await.unwrap();

        let total = t.user_spending("u1").await.unwrap();
        assert!((total - 3.0).abs() < 1e-9);
    }
}
