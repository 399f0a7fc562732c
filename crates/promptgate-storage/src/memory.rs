//! In-memory repository backend.
//!
//! Stores all data in maps behind `RwLock`s. Data is lost when the struct is
//! dropped; queries are linear scans. Create operations fill in missing IDs
//! and timestamps; update operations preserve `created_at`.

use async_trait::async_trait;
use chrono::Utc;
use promptgate_core::{
    new_id, AuditLog, GatewayError, Policy, Repository, Result, SpendingLimit, User,
};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Maximum audit entries mirrored into the repository.
const MAX_AUDIT_LOGS: usize = 10_000;

/// In-memory [`Repository`] implementation.
pub struct MemoryRepository {
    users: RwLock<HashMap<String, User>>,
    policies: RwLock<HashMap<String, Policy>>,
    spending_limits: RwLock<HashMap<String, SpendingLimit>>,
    audit_logs: RwLock<Vec<AuditLog>>,
    settings: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemoryRepository {
    /// Create a new, empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            policies: RwLock::new(HashMap::new()),
            spending_limits: RwLock::new(HashMap::new()),
            audit_logs: RwLock::new(Vec::new()),
            settings: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    // -- users ---------------------------------------------------------------

    async fn create_user(&self, user: &User) -> Result<User> {
        let mut user = user.clone();
        if user.id.is_empty() {
            user.id = new_id();
        }
        user.created_at = Some(Utc::now());

        let mut users = self.users.write().await;
        users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let mut users: Vec<User> = self.users.read().await.values().cloned().collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(users)
    }

    async fn update_user(&self, user: &User) -> Result<User> {
        let mut users = self.users.write().await;
        let existing = users
            .get(&user.id)
            .ok_or_else(|| GatewayError::NotFound(format!("user not found: {}", user.id)))?;

        let mut updated = user.clone();
        updated.created_at = existing.created_at;
        users.insert(updated.id.clone(), updated.clone());
        Ok(updated)
    }

    async fn delete_user(&self, id: &str) -> Result<()> {
        let mut users = self.users.write().await;
        users
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| GatewayError::NotFound(format!("user not found: {id}")))
    }

    // -- policies ------------------------------------------------------------

    async fn create_policy(&self, policy: &Policy) -> Result<Policy> {
        let mut policy = policy.clone();
        if policy.id.is_empty() {
            policy.id = new_id();
        }
        let now = Utc::now();
        policy.created_at = Some(now);
        policy.updated_at = Some(now);

        let mut policies = self.policies.write().await;
        policies.insert(policy.id.clone(), policy.clone());
        Ok(policy)
    }

    async fn get_policy(&self, id: &str) -> Result<Option<Policy>> {
        Ok(self.policies.read().await.get(id).cloned())
    }

    async fn list_policies(&self) -> Result<Vec<Policy>> {
        let mut policies: Vec<Policy> = self.policies.read().await.values().cloned().collect();
        policies.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(policies)
    }

    async fn update_policy(&self, policy: &Policy) -> Result<Policy> {
        let mut policies = self.policies.write().await;
        let existing = policies
            .get(&policy.id)
            .ok_or_else(|| GatewayError::NotFound(format!("policy not found: {}", policy.id)))?;

        let mut updated = policy.clone();
        updated.created_at = existing.created_at;
        updated.updated_at = Some(Utc::now());
        policies.insert(updated.id.clone(), updated.clone());
        Ok(updated)
    }

    async fn delete_policy(&self, id: &str) -> Result<()> {
        let mut policies = self.policies.write().await;
        policies
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| GatewayError::NotFound(format!("policy not found: {id}")))
    }

    // -- spending limits -------------------------------------------------------

    async fn create_spending_limit(&self, limit: &SpendingLimit) -> Result<SpendingLimit> {
        let mut limit = limit.clone();
        if limit.id.is_empty() {
            limit.id = new_id();
        }
        let now = Utc::now();
        limit.created_at = Some(now);
        limit.updated_at = Some(now);
        limit.current_spend = 0.0;

        let mut limits = self.spending_limits.write().await;
        limits.insert(limit.id.clone(), limit.clone());
        Ok(limit)
    }

    async fn get_spending_limit(&self, id: &str) -> Result<Option<SpendingLimit>> {
        Ok(self.spending_limits.read().await.get(id).cloned())
    }

    async fn list_spending_limits(&self) -> Result<Vec<SpendingLimit>> {
        let mut limits: Vec<SpendingLimit> =
            self.spending_limits.read().await.values().cloned().collect();
        limits.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(limits)
    }

    async fn update_spending_limit(&self, limit: &SpendingLimit) -> Result<SpendingLimit> {
        let mut limits = self.spending_limits.write().await;
        let existing = limits.get(&limit.id).ok_or_else(|| {
            GatewayError::NotFound(format!("spending limit not found: {}", limit.id))
        })?;

        let mut updated = limit.clone();
        updated.created_at = existing.created_at;
        updated.updated_at = Some(Utc::now());
        limits.insert(updated.id.clone(), updated.clone());
        Ok(updated)
    }

    // -- audit logs -----------------------------------------------------------

    async fn create_audit_log(&self, entry: &AuditLog) -> Result<()> {
        let mut logs = self.audit_logs.write().await;
        logs.push(entry.clone());
        if logs.len() > MAX_AUDIT_LOGS {
            let excess = logs.len() - MAX_AUDIT_LOGS;
            logs.drain(..excess);
        }
        Ok(())
    }

    async fn list_audit_logs(&self, limit: usize) -> Result<Vec<AuditLog>> {
        let logs = self.audit_logs.read().await;
        // Newest first.
        Ok(logs.iter().rev().take(limit).cloned().collect())
    }

    // -- settings --------------------------------------------------------------

    async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.settings.read().await.get(key).cloned())
    }

    async fn set_setting(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.settings
            .write()
            .await
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn all_settings(&self) -> Result<HashMap<String, serde_json::Value>> {
        Ok(self.settings.read().await.clone())
    }
}
