//! Policy storage and evaluation.
//!
//! [`PolicyEngine`] owns the in-memory policy and user sets behind a
//! read-write lock. Evaluation is snapshot-based: one read lock is held for
//! the duration of a single [`evaluate`](PolicyEngine::evaluate) call, so
//! concurrent mutations apply to subsequent requests only. Given an
//! identical policy set and context, evaluation output is byte-identical.

use chrono::Utc;
use promptgate_core::{
    new_id, ActionType, GatewayError, Policy, PolicyEvaluation, PolicyRule, PolicyStatus, Result,
    RuleCondition, RuleOperator, User,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

// ---------------------------------------------------------------------------
// Evaluation types
// ---------------------------------------------------------------------------

/// Request context a policy set is evaluated against.
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    pub user_id: String,
    pub model: String,
    pub provider: String,
    pub token_count: u64,
    pub cost: f64,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
}

/// Combined outcome of evaluating all active policies.
#[derive(Debug, Clone)]
pub struct EvaluationResult {
    pub allowed: bool,
    pub blocked_by: String,
    pub block_reason: String,
    pub warnings: Vec<String>,
    pub throttled: bool,
    pub evaluations: Vec<PolicyEvaluation>,
}

impl Default for EvaluationResult {
    fn default() -> Self {
        Self {
            allowed: true,
            blocked_by: String::new(),
            block_reason: String::new(),
            warnings: Vec::new(),
            throttled: false,
            evaluations: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// PolicyEngine
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PolicyState {
    policies: HashMap<String, Policy>,
    users: HashMap<String, User>,
}

/// In-memory policy store and evaluator.
pub struct PolicyEngine {
    state: RwLock<PolicyState>,
}

impl PolicyEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(PolicyState::default()),
        }
    }

    // -- policy CRUD ---------------------------------------------------------

    /// Create a policy, filling in id and timestamps.
    pub fn create_policy(&self, policy: &Policy) -> Policy {
        let mut policy = policy.clone();
        if policy.id.is_empty() {
            policy.id = new_id();
        }
        let now = Utc::now();
        policy.created_at = Some(now);
        policy.updated_at = Some(now);

        tracing::info!(
            policy_id = %policy.id,
            name = %policy.name,
            "Policy created"
        );

        let mut state = self.state.write().expect("policy state poisoned");
        state.policies.insert(policy.id.clone(), policy.clone());
        policy
    }

    pub fn get_policy(&self, id: &str) -> Result<Policy> {
        self.state
            .read()
            .expect("policy state poisoned")
            .policies
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("policy not found: {id}")))
    }

    /// All policies, ordered by ascending priority then id.
    #[must_use]
    pub fn list_policies(&self) -> Vec<Policy> {
        let state = self.state.read().expect("policy state poisoned");
        let mut policies: Vec<Policy> = state.policies.values().cloned().collect();
        policies.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        policies
    }

    /// Update a policy, preserving `created_at`.
    pub fn update_policy(&self, policy: &Policy) -> Result<Policy> {
        let mut state = self.state.write().expect("policy state poisoned");
        let existing = state
            .policies
            .get(&policy.id)
            .ok_or_else(|| GatewayError::NotFound(format!("policy not found: {}", policy.id)))?;

        let mut updated = policy.clone();
        updated.created_at = existing.created_at;
        updated.updated_at = Some(Utc::now());

        tracing::info!(policy_id = %updated.id, name = %updated.name, "Policy updated");
        state.policies.insert(updated.id.clone(), updated.clone());
        Ok(updated)
    }

    pub fn delete_policy(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().expect("policy state poisoned");
        state
            .policies
            .remove(id)
            .map(|_| tracing::info!(policy_id = %id, "Policy deleted"))
            .ok_or_else(|| GatewayError::NotFound(format!("policy not found: {id}")))
    }

    // -- user registry -------------------------------------------------------

    /// Insert or replace a user in the evaluation snapshot. Group targeting
    /// resolves through this registry.
    pub fn upsert_user(&self, user: &User) {
        let mut state = self.state.write().expect("policy state poisoned");
        state.users.insert(user.id.clone(), user.clone());
    }

    pub fn remove_user(&self, id: &str) {
        let mut state = self.state.write().expect("policy state poisoned");
        state.users.remove(id);
    }

    // -- evaluation ----------------------------------------------------------

    /// Evaluate all active policies against a request context.
    ///
    /// Policies run in ascending priority order (1 = highest). A matched
    /// `deny` pins the result to blocked; later policies still record their
    /// evaluations but cannot flip the decision back.
    #[must_use]
    pub fn evaluate(&self, ctx: &EvaluationContext) -> EvaluationResult {
        let state = self.state.read().expect("policy state poisoned");
        let mut result = EvaluationResult::default();

        let mut active: Vec<&Policy> = state
            .policies
            .values()
            .filter(|p| p.status == PolicyStatus::Active)
            .collect();
        active.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));

        for policy in active {
            let eval = evaluate_policy(policy, ctx, &state.users);
            let matched = eval.matched;
            let action = eval.action;
            let message = eval.message.clone();
            result.evaluations.push(eval);

            if !matched {
                continue;
            }

            match action {
                ActionType::Deny => {
                    result.allowed = false;
                    result.blocked_by = policy.id.clone();
                    result.block_reason = message;
                }
                ActionType::Warn => result.warnings.push(message),
                ActionType::Throttle => result.throttled = true,
                ActionType::Allow | ActionType::Audit => {}
            }
        }

        result
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Policy evaluation internals
// ---------------------------------------------------------------------------

fn evaluate_policy(
    policy: &Policy,
    ctx: &EvaluationContext,
    users: &HashMap<String, User>,
) -> PolicyEvaluation {
    let mut eval = PolicyEvaluation {
        policy_id: policy.id.clone(),
        policy_name: policy.name.clone(),
        matched: false,
        action: policy.actions.action,
        message: String::new(),
        evaluated_at: Utc::now(),
    };

    if !targets_user(policy, &ctx.user_id, users) {
        return eval;
    }

    eval.matched = evaluate_rules(&policy.rules, ctx);
    if eval.matched {
        eval.message = if policy.actions.message.is_empty() {
            format!("Policy '{}' triggered", policy.name)
        } else {
            policy.actions.message.clone()
        };
    }

    eval
}

/// Targeting: `all_users`, explicit user list, group intersection, or — when
/// both users and groups are empty — every user.
fn targets_user(policy: &Policy, user_id: &str, users: &HashMap<String, User>) -> bool {
    let targets = &policy.targets;
    if targets.all_users {
        return true;
    }
    if targets.users.iter().any(|u| u == user_id) {
        return true;
    }
    if let Some(user) = users.get(user_id) {
        if user
            .groups
            .iter()
            .any(|g| targets.groups.iter().any(|t| t == g))
        {
            return true;
        }
    }
    targets.users.is_empty() && targets.groups.is_empty()
}

/// Rule-chain evaluation: the first rule must match; each subsequent rule's
/// `condition` combines it with the running result — `and` short-circuits
/// false on mismatch, `or` short-circuits true on match. An empty list
/// matches.
fn evaluate_rules(rules: &[PolicyRule], ctx: &EvaluationContext) -> bool {
    if rules.is_empty() {
        return true;
    }

    for (i, rule) in rules.iter().enumerate() {
        let matched = evaluate_rule(rule, ctx);

        if i == 0 {
            if !matched {
                return false;
            }
            continue;
        }

        match rule.condition {
            RuleCondition::And => {
                if !matched {
                    return false;
                }
            }
            RuleCondition::Or => {
                if matched {
                    return true;
                }
            }
        }
    }

    true
}

fn evaluate_rule(rule: &PolicyRule, ctx: &EvaluationContext) -> bool {
    let field = resolve_field(&rule.field, ctx);

    match rule.operator {
        RuleOperator::Equals => field == value_string(&rule.value),
        RuleOperator::NotEquals => field != value_string(&rule.value),
        RuleOperator::Contains => field.contains(&value_string(&rule.value)),
        RuleOperator::NotContains => !field.contains(&value_string(&rule.value)),
        RuleOperator::GreaterThan => field_number(&rule.field, ctx) > value_number(&rule.value),
        RuleOperator::LessThan => field_number(&rule.field, ctx) < value_number(&rule.value),
        RuleOperator::In => value_list(&rule.value).iter().any(|v| *v == field),
        RuleOperator::NotIn => !value_list(&rule.value).iter().any(|v| *v == field),
    }
}

/// Built-in fields resolve from the context; any other name is looked up in
/// request metadata (missing keys resolve to the empty string).
fn resolve_field(field: &str, ctx: &EvaluationContext) -> String {
    match field {
        "user_id" => ctx.user_id.clone(),
        "model" => ctx.model.clone(),
        "provider" => ctx.provider.clone(),
        "token_count" => ctx.token_count.to_string(),
        "cost" => format_float(ctx.cost),
        other => ctx.metadata.get(other).cloned().unwrap_or_default(),
    }
}

/// Numeric view of a field; unparseable values coerce to 0.
fn field_number(field: &str, ctx: &EvaluationContext) -> f64 {
    match field {
        "token_count" => ctx.token_count as f64,
        "cost" => ctx.cost,
        other => resolve_field(other, ctx).parse().unwrap_or(0.0),
    }
}

fn value_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Numeric view of a rule value; unparseable values coerce to 0.
fn value_number(value: &Value) -> f64 {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .unwrap_or(0.0)
}

/// List view of a rule value for `in`/`not_in`; scalars behave as a
/// single-element list.
fn value_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().map(value_string).collect(),
        other => vec![value_string(other)],
    }
}

/// Render a float without a trailing fractional part for whole numbers, so
/// string comparison against integer-valued rules behaves intuitively.
fn format_float(f: f64) -> String {
    if f.fract() == 0.0 {
        format!("{}", f as i64)
    } else {
        format!("{f}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use promptgate_core::{PolicyActions, PolicyTargets, PolicyType};
    use serde_json::json;

    fn rule(field: &str, operator: RuleOperator, value: Value) -> PolicyRule {
        PolicyRule {
            field: field.to_string(),
            operator,
            value,
            ..PolicyRule::default()
        }
    }

    fn policy(name: &str, priority: i32, action: ActionType, rules: Vec<PolicyRule>) -> Policy {
        Policy {
            name: name.to_string(),
            policy_type: PolicyType::Access,
            status: PolicyStatus::Active,
            priority,
            rules,
            targets: PolicyTargets::default(),
            actions: PolicyActions {
                action,
                message: format!("{name} says so"),
                ..PolicyActions::default()
            },
            ..Policy::default()
        }
    }

    fn ctx(user_id: &str, model: &str) -> EvaluationContext {
        EvaluationContext {
            user_id: user_id.to_string(),
            model: model.to_string(),
            provider: "openai".to_string(),
            content_type: "chat".to_string(),
            ..EvaluationContext::default()
        }
    }

    // -- CRUD -----------------------------------------------------------------

    #[test]
    fn test_create_and_get_policy() {
        let engine = PolicyEngine::new();
        let created = engine.create_policy(&policy("p", 1, ActionType::Audit, vec![]));
        assert!(!created.id.is_empty());
        assert!(created.created_at.is_some());

        let fetched = engine.get_policy(&created.id).unwrap();
        assert_eq!(fetched.name, "p");
    }

    #[test]
    fn test_update_preserves_created_at() {
        let engine = PolicyEngine::new();
        let created = engine.create_policy(&policy("p", 1, ActionType::Audit, vec![]));

        let mut changed = created.clone();
        changed.name = "renamed".to_string();
        changed.created_at = None;
        let updated = engine.update_policy(&changed).unwrap();
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.name, "renamed");
    }

    #[test]
    fn test_delete_unknown_policy_errors() {
        let engine = PolicyEngine::new();
        assert!(engine.delete_policy("missing").is_err());
        assert!(engine.get_policy("missing").is_err());
    }

    #[test]
    fn test_list_orders_by_priority() {
        let engine = PolicyEngine::new();
        engine.create_policy(&policy("low", 10, ActionType::Audit, vec![]));
        engine.create_policy(&policy("high", 1, ActionType::Audit, vec![]));

        let listed = engine.list_policies();
        assert_eq!(listed[0].name, "high");
        assert_eq!(listed[1].name, "low");
    }

    // -- evaluation basics ----------------------------------------------------

    #[test]
    fn test_empty_policy_set_allows() {
        let engine = PolicyEngine::new();
        let result = engine.evaluate(&ctx("u1", "gpt-4o"));
        assert!(result.allowed);
        assert!(result.evaluations.is_empty());
    }

    #[test]
    fn test_inactive_policy_skipped() {
        let engine = PolicyEngine::new();
        let mut p = policy("off", 1, ActionType::Deny, vec![]);
        p.status = PolicyStatus::Inactive;
        engine.create_policy(&p);
        let mut d = policy("draft", 1, ActionType::Deny, vec![]);
        d.status = PolicyStatus::Draft;
        engine.create_policy(&d);

        let result = engine.evaluate(&ctx("u1", "gpt-4o"));
        assert!(result.allowed);
        assert!(result.evaluations.is_empty());
    }

    #[test]
    fn test_empty_rules_match_everything() {
        let engine = PolicyEngine::new();
        engine.create_policy(&policy("warn-all", 1, ActionType::Warn, vec![]));

        let result = engine.evaluate(&ctx("u1", "gpt-4o"));
        assert!(result.allowed);
        assert_eq!(result.warnings, vec!["warn-all says so"]);
    }

    #[test]
    fn test_deny_blocks_and_records_policy() {
        let engine = PolicyEngine::new();
        let created = engine.create_policy(&policy(
            "block-u1",
            1,
            ActionType::Deny,
            vec![rule("user_id", RuleOperator::Equals, json!("u1"))],
        ));

        let result = engine.evaluate(&ctx("u1", "gpt-4o"));
        assert!(!result.allowed);
        assert_eq!(result.blocked_by, created.id);
        assert_eq!(result.block_reason, "block-u1 says so");

        let other = engine.evaluate(&ctx("u2", "gpt-4o"));
        assert!(other.allowed);
    }

    #[test]
    fn test_deny_with_lower_priority_warn() {
        let engine = PolicyEngine::new();
        let deny = engine.create_policy(&policy(
            "deny-u1",
            1,
            ActionType::Deny,
            vec![rule("user_id", RuleOperator::Equals, json!("u1"))],
        ));
        engine.create_policy(&policy(
            "warn-gpt",
            10,
            ActionType::Warn,
            vec![rule("model", RuleOperator::Contains, json!("gpt"))],
        ));

        let result = engine.evaluate(&ctx("u1", "gpt-4o"));
        assert!(!result.allowed);
        assert_eq!(result.blocked_by, deny.id);
        assert_eq!(result.warnings, vec!["warn-gpt says so"]);
        assert_eq!(result.evaluations.len(), 2);
        assert!(result.evaluations.iter().all(|e| e.matched));
    }

    #[test]
    fn test_later_allow_cannot_flip_deny() {
        let engine = PolicyEngine::new();
        engine.create_policy(&policy(
            "deny",
            1,
            ActionType::Deny,
            vec![rule("user_id", RuleOperator::Equals, json!("u1"))],
        ));
        engine.create_policy(&policy("allow-all", 5, ActionType::Allow, vec![]));

        let result = engine.evaluate(&ctx("u1", "gpt-4o"));
        assert!(!result.allowed);
    }

    #[test]
    fn test_throttle_sets_flag() {
        let engine = PolicyEngine::new();
        engine.create_policy(&policy("slow", 1, ActionType::Throttle, vec![]));
        let result = engine.evaluate(&ctx("u1", "gpt-4o"));
        assert!(result.throttled);
        assert!(result.allowed);
    }

    #[test]
    fn test_non_matching_policies_are_noops() {
        let engine = PolicyEngine::new();
        engine.create_policy(&policy(
            "deny-other",
            1,
            ActionType::Deny,
            vec![rule("user_id", RuleOperator::Equals, json!("someone-else"))],
        ));
        // A non-matching policy's priority is irrelevant to the outcome.
        let mut reordered = engine.get_policy(&engine.list_policies()[0].id).unwrap();
        let before = engine.evaluate(&ctx("u1", "gpt-4o"));
        reordered.priority = 99;
        engine.update_policy(&reordered).unwrap();
        let after = engine.evaluate(&ctx("u1", "gpt-4o"));

        assert_eq!(before.allowed, after.allowed);
        assert_eq!(before.warnings, after.warnings);
        assert_eq!(before.throttled, after.throttled);
    }

    // -- targeting ------------------------------------------------------------

    #[test]
    fn test_targeting_explicit_users() {
        let engine = PolicyEngine::new();
        let mut p = policy("only-u1", 1, ActionType::Deny, vec![]);
        p.targets.users = vec!["u1".to_string()];
        engine.create_policy(&p);

        assert!(!engine.evaluate(&ctx("u1", "m")).allowed);
        assert!(engine.evaluate(&ctx("u2", "m")).allowed);
    }

    #[test]
    fn test_targeting_by_group_membership() {
        let engine = PolicyEngine::new();
        engine.upsert_user(&User {
            id: "u1".to_string(),
            email: "u1@x.io".to_string(),
            groups: vec!["finance".to_string()],
            ..User::default()
        });

        let mut p = policy("finance-only", 1, ActionType::Deny, vec![]);
        p.targets.groups = vec!["finance".to_string()];
        engine.create_policy(&p);

        assert!(!engine.evaluate(&ctx("u1", "m")).allowed);
        assert!(engine.evaluate(&ctx("u2", "m")).allowed);
    }

    #[test]
    fn test_empty_targets_match_every_user() {
        let engine = PolicyEngine::new();
        engine.create_policy(&policy("everyone", 1, ActionType::Warn, vec![]));
        assert_eq!(engine.evaluate(&ctx("anyone", "m")).warnings.len(), 1);
    }

    #[test]
    fn test_all_users_flag() {
        let engine = PolicyEngine::new();
        let mut p = policy("all", 1, ActionType::Warn, vec![]);
        p.targets.all_users = true;
        p.targets.users = vec!["someone-else".to_string()];
        engine.create_policy(&p);
        assert_eq!(engine.evaluate(&ctx("u1", "m")).warnings.len(), 1);
    }

    // -- rule chains -----------------------------------------------------------

    #[test]
    fn test_first_rule_must_match() {
        let rules = vec![
            rule("user_id", RuleOperator::Equals, json!("someone-else")),
            rule("model", RuleOperator::Equals, json!("gpt-4o")),
        ];
        assert!(!evaluate_rules(&rules, &ctx("u1", "gpt-4o")));
    }

    #[test]
    fn test_and_chain_short_circuits() {
        let mut second = rule("model", RuleOperator::Equals, json!("other"));
        second.condition = RuleCondition::And;
        let rules = vec![
            rule("user_id", RuleOperator::Equals, json!("u1")),
            second,
        ];
        assert!(!evaluate_rules(&rules, &ctx("u1", "gpt-4o")));
    }

    #[test]
    fn test_or_chain_short_circuits_true() {
        let mut second = rule("model", RuleOperator::Equals, json!("gpt-4o"));
        second.condition = RuleCondition::Or;
        let mut third = rule("provider", RuleOperator::Equals, json!("never"));
        third.condition = RuleCondition::And;
        let rules = vec![
            rule("user_id", RuleOperator::Equals, json!("u1")),
            second,
            third,
        ];
        // The OR match returns before the impossible AND rule runs.
        assert!(evaluate_rules(&rules, &ctx("u1", "gpt-4o")));
    }

    // -- operators -------------------------------------------------------------

    #[test]
    fn test_numeric_operators() {
        let mut c = ctx("u1", "m");
        c.token_count = 500;
        c.cost = 0.25;

        assert!(evaluate_rule(
            &rule("token_count", RuleOperator::GreaterThan, json!(100)),
            &c
        ));
        assert!(!evaluate_rule(
            &rule("token_count", RuleOperator::LessThan, json!(100)),
            &c
        ));
        assert!(evaluate_rule(
            &rule("cost", RuleOperator::LessThan, json!(1.0)),
            &c
        ));
        // String-encoded numbers coerce.
        assert!(evaluate_rule(
            &rule("token_count", RuleOperator::GreaterThan, json!("100")),
            &c
        ));
    }

    #[test]
    fn test_unparseable_numeric_coerces_to_zero() {
        let c = ctx("u1", "m");
        // metadata "tier" missing → "" → 0; 0 > -1
        assert!(evaluate_rule(
            &rule("tier", RuleOperator::GreaterThan, json!(-1)),
            &c
        ));
        assert!(!evaluate_rule(
            &rule("tier", RuleOperator::GreaterThan, json!("not-a-number")),
            &c
        ));
    }

    #[test]
    fn test_metadata_field_resolution() {
        let mut c = ctx("u1", "m");
        c.metadata
            .insert("department".to_string(), "legal".to_string());
        assert!(evaluate_rule(
            &rule("department", RuleOperator::Equals, json!("legal")),
            &c
        ));
        assert!(evaluate_rule(
            &rule("department", RuleOperator::NotEquals, json!("sales")),
            &c
        ));
    }

    #[test]
    fn test_in_and_not_in() {
        let c = ctx("u1", "gpt-4o");
        assert!(evaluate_rule(
            &rule("model", RuleOperator::In, json!(["gpt-4o", "gpt-4"])),
            &c
        ));
        assert!(!evaluate_rule(
            &rule("model", RuleOperator::In, json!(["claude-3"])),
            &c
        ));
        assert!(evaluate_rule(
            &rule("model", RuleOperator::NotIn, json!(["claude-3"])),
            &c
        ));
        // Scalar value behaves as a single-element list.
        assert!(evaluate_rule(
            &rule("model", RuleOperator::In, json!("gpt-4o")),
            &c
        ));
    }

    #[test]
    fn test_contains_operators() {
        let c = ctx("u1", "gpt-4o-mini");
        assert!(evaluate_rule(
            &rule("model", RuleOperator::Contains, json!("gpt")),
            &c
        ));
        assert!(evaluate_rule(
            &rule("model", RuleOperator::NotContains, json!("claude")),
            &c
        ));
    }

    // -- determinism ------------------------------------------------------------

    #[test]
    fn test_evaluation_deterministic() {
        let engine = PolicyEngine::new();
        engine.create_policy(&policy(
            "a",
            2,
            ActionType::Warn,
            vec![rule("model", RuleOperator::Contains, json!("gpt"))],
        ));
        engine.create_policy(&policy("b", 1, ActionType::Audit, vec![]));

        let first = engine.evaluate(&ctx("u1", "gpt-4o"));
        let second = engine.evaluate(&ctx("u1", "gpt-4o"));
        assert_eq!(first.warnings, second.warnings);
        assert_eq!(
            first
                .evaluations
                .iter()
                .map(|e| (e.policy_name.clone(), e.matched))
                .collect::<Vec<_>>(),
            second
                .evaluations
                .iter()
                .map(|e| (e.policy_name.clone(), e.matched))
                .collect::<Vec<_>>()
        );
        // Priority order: b (1) before a (2).
        assert_eq!(first.evaluations[0].policy_name, "b");
    }
}
