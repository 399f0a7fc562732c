//! Audit trail and alerting.
//!
//! [`AuditEngine`] keeps a bounded in-memory ring of audit records (oldest
//! evicted first) and an append-only alert list, and derives the stats and
//! dashboard aggregates served by the control plane. All operations are
//! synchronous over in-memory structures; each collection sits behind its
//! own mutex.

use chrono::{DateTime, Duration, Utc};
use promptgate_core::{
    new_id, Alert, AuditLog, AuditQuery, AuditStats, AuditStatus, DashboardMetrics, ModelStats,
    UserStats,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

/// Default ring capacity.
const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Default page size for queries.
const DEFAULT_QUERY_LIMIT: usize = 50;

/// Number of alerts embedded in the dashboard payload.
const DASHBOARD_RECENT_ALERTS: usize = 10;

/// Bounded audit ring plus alert list.
pub struct AuditEngine {
    max_entries: usize,
    logs: Mutex<VecDeque<AuditLog>>,
    alerts: Mutex<Vec<Alert>>,
}

impl AuditEngine {
    /// Create an engine with the given ring capacity (0 selects the default).
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        let max_entries = if max_entries == 0 {
            DEFAULT_MAX_ENTRIES
        } else {
            max_entries
        };
        Self {
            max_entries,
            logs: Mutex::new(VecDeque::new()),
            alerts: Mutex::new(Vec::new()),
        }
    }

    // -- append --------------------------------------------------------------

    /// Append an audit record, filling `id` and `timestamp` when empty.
    /// Beyond capacity, the oldest entries are evicted.
    pub fn log(&self, mut entry: AuditLog) {
        if entry.id.is_empty() {
            entry.id = new_id();
        }
        if entry.timestamp.is_none() {
            entry.timestamp = Some(Utc::now());
        }

        tracing::debug!(
            audit_id = %entry.id,
            event_type = %entry.event_type,
            action = %entry.action,
            "Audit log created"
        );

        let mut logs = self.logs.lock().expect("audit ring poisoned");
        logs.push_back(entry);
        while logs.len() > self.max_entries {
            logs.pop_front();
        }
    }

    /// Append an alert, filling `id` and `created_at` when empty.
    pub fn create_alert(&self, mut alert: Alert) {
        if alert.id.is_empty() {
            alert.id = new_id();
        }
        if alert.created_at.is_none() {
            alert.created_at = Some(Utc::now());
        }

        tracing::warn!(
            alert_id = %alert.id,
            title = %alert.title,
            "Alert created"
        );

        self.alerts.lock().expect("alert list poisoned").push(alert);
    }

    /// Number of retained audit entries.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.logs.lock().expect("audit ring poisoned").len()
    }

    // -- query ---------------------------------------------------------------

    /// Query audit records. Filters are ANDed; results are newest-first with
    /// `offset` skipping from the newest side. Returns the page and the
    /// total filtered count before paging.
    #[must_use]
    pub fn query(&self, query: &AuditQuery) -> (Vec<AuditLog>, usize) {
        let logs = self.logs.lock().expect("audit ring poisoned");

        let filtered: Vec<&AuditLog> =
            logs.iter().filter(|e| matches_query(e, query)).collect();
        let total = filtered.len();

        let limit = if query.limit == 0 {
            DEFAULT_QUERY_LIMIT
        } else {
            query.limit
        };

        let page = filtered
            .into_iter()
            .rev()
            .skip(query.offset)
            .take(limit)
            .cloned()
            .collect();

        (page, total)
    }

    // -- stats ---------------------------------------------------------------

    /// Aggregate statistics over a lookback period (`24h`, `7d`, or `30d`;
    /// anything else falls back to `24h`).
    #[must_use]
    pub fn stats(&self, period: &str) -> AuditStats {
        let (period, lookback) = match period {
            "7d" => ("7d", Duration::days(7)),
            "30d" => ("30d", Duration::days(30)),
            "24h" => ("24h", Duration::hours(24)),
            _ => ("24h", Duration::hours(24)),
        };
        let cutoff = Utc::now() - lookback;

        let mut stats = AuditStats {
            period: period.to_string(),
            ..AuditStats::default()
        };
        let mut users: HashMap<String, UserStats> = HashMap::new();
        let mut models: HashMap<String, ModelStats> = HashMap::new();

        let logs = self.logs.lock().expect("audit ring poisoned");
        for entry in logs.iter() {
            let ts = match entry.timestamp {
                Some(ts) if ts >= cutoff => ts,
                _ => continue,
            };

            stats.total_requests += 1;
            *stats
                .events_by_type
                .entry(entry.event_type.to_string())
                .or_default() += 1;

            match entry.status {
                AuditStatus::Blocked => stats.blocked_requests += 1,
                AuditStatus::Success => stats.allowed_requests += 1,
                AuditStatus::Warning => stats.warning_requests += 1,
                AuditStatus::Failure => {}
            }

            *stats
                .requests_by_hour
                .entry(ts.format("%Y-%m-%dT%H").to_string())
                .or_default() += 1;

            let tokens = detail_u64(entry, "total_tokens");
            let cost = detail_f64(entry, "cost");

            if !entry.user_id.is_empty() {
                let user = users.entry(entry.user_id.clone()).or_insert_with(|| UserStats {
                    user_id: entry.user_id.clone(),
                    user_email: entry.user_email.clone(),
                    ..UserStats::default()
                });
                user.request_count += 1;
                if let Some(t) = tokens {
                    user.tokens_used += t;
                    stats.total_tokens_used += t;
                }
                if let Some(c) = cost {
                    user.total_cost += c;
                    stats.total_cost += c;
                }
            }

            if let Some(model) = detail_str(entry, "model") {
                let m = models.entry(model.clone()).or_insert_with(|| ModelStats {
                    model,
                    provider: detail_str(entry, "provider").unwrap_or_default(),
                    ..ModelStats::default()
                });
                m.request_count += 1;
                if let Some(t) = tokens {
                    m.tokens_used += t;
                }
                if let Some(c) = cost {
                    m.total_cost += c;
                }
            }
        }

        stats.unique_users = users.len() as u64;
        stats.top_users = users.into_values().collect();
        stats.top_models = models.into_values().collect();
        stats
    }

    /// Dashboard aggregates over the current 24h window against the previous
    /// one. Percentage change is `(cur - prev) / prev * 100` when the
    /// previous window is non-empty, else 0.
    #[must_use]
    pub fn dashboard_metrics(&self) -> DashboardMetrics {
        let now = Utc::now();
        let last_24h = now - Duration::hours(24);
        let prev_24h = now - Duration::hours(48);

        let mut metrics = DashboardMetrics {
            recent_alerts: self.recent_alerts(DASHBOARD_RECENT_ALERTS),
            ..DashboardMetrics::default()
        };

        let mut current_requests: u64 = 0;
        let mut prev_requests: u64 = 0;
        let mut current_users: HashSet<String> = HashSet::new();
        let mut prev_users: HashSet<String> = HashSet::new();
        let mut current_blocked: u64 = 0;
        let mut prev_blocked: u64 = 0;
        let mut current_spend: f64 = 0.0;
        let mut prev_spend: f64 = 0.0;

        let logs = self.logs.lock().expect("audit ring poisoned");
        for entry in logs.iter() {
            let Some(ts) = entry.timestamp else { continue };

            if ts > last_24h {
                current_requests += 1;
                if !entry.user_id.is_empty() {
                    current_users.insert(entry.user_id.clone());
                }
                if entry.status == AuditStatus::Blocked {
                    current_blocked += 1;
                }

                if entry.event_type == promptgate_core::AuditEventType::SecurityAlert {
                    metrics.security.injection_attempts_24h += 1;
                    if let Some(level) = detail_str(entry, "threat_level") {
                        *metrics.security.threats_by_level.entry(level).or_default() += 1;
                    }
                    if let Some(threat) = detail_str(entry, "threat_type") {
                        *metrics.security.top_threat_types.entry(threat).or_default() += 1;
                    }
                }

                if let Some(t) = detail_u64(entry, "total_tokens") {
                    metrics.usage.total_tokens_24h += t;
                }
                if let Some(t) = detail_u64(entry, "prompt_tokens") {
                    metrics.usage.prompt_tokens_24h += t;
                }
                if let Some(t) = detail_u64(entry, "completion_tokens") {
                    metrics.usage.completion_tokens_24h += t;
                }
                if let Some(model) = detail_str(entry, "model") {
                    *metrics.usage.requests_by_model.entry(model.clone()).or_default() += 1;
                    if let Some(c) = detail_f64(entry, "cost") {
                        *metrics.spending.spend_by_model.entry(model).or_default() += c;
                    }
                }
                if let Some(provider) = detail_str(entry, "provider") {
                    *metrics
                        .usage
                        .requests_by_provider
                        .entry(provider)
                        .or_default() += 1;
                }
                if let Some(c) = detail_f64(entry, "cost") {
                    current_spend += c;
                    if !entry.user_id.is_empty() {
                        *metrics
                            .spending
                            .spend_by_user
                            .entry(entry.user_id.clone())
                            .or_default() += c;
                    }
                }
                if let Some(n) = detail_u64(entry, "pii_count") {
                    metrics.security.pii_detections_24h += n;
                }
            } else if ts > prev_24h {
                prev_requests += 1;
                if !entry.user_id.is_empty() {
                    prev_users.insert(entry.user_id.clone());
                }
                if entry.status == AuditStatus::Blocked {
                    prev_blocked += 1;
                }
                if let Some(c) = detail_f64(entry, "cost") {
                    prev_spend += c;
                }
            }
        }
        drop(logs);

        metrics.overview.total_requests_24h = current_requests;
        metrics.overview.active_users_24h = current_users.len() as u64;
        metrics.overview.blocked_requests_24h = current_blocked;
        metrics.overview.total_spend_24h = current_spend;
        metrics.spending.total_spend_today = current_spend;

        metrics.overview.requests_change_percent = percent_change(current_requests, prev_requests);
        metrics.overview.users_change_percent =
            percent_change(current_users.len() as u64, prev_users.len() as u64);
        metrics.overview.blocked_change_percent = percent_change(current_blocked, prev_blocked);
        if prev_spend > 0.0 {
            metrics.overview.spend_change_percent =
                (current_spend - prev_spend) / prev_spend * 100.0;
        }

        metrics
    }

    // -- alerts --------------------------------------------------------------

    /// Recent alerts, newest first. When `include_acked` is false,
    /// acknowledged alerts are skipped.
    #[must_use]
    pub fn alerts(&self, limit: usize, include_acked: bool) -> Vec<Alert> {
        let alerts = self.alerts.lock().expect("alert list poisoned");
        alerts
            .iter()
            .rev()
            .filter(|a| include_acked || a.acked_at.is_none())
            .take(limit)
            .cloned()
            .collect()
    }

    /// Acknowledge an alert. Idempotent: the first call sets
    /// `acked_at`/`acked_by`, later calls are no-ops. Unknown IDs succeed
    /// (documented behavior).
    pub fn ack_alert(&self, id: &str, user_id: &str) {
        let mut alerts = self.alerts.lock().expect("alert list poisoned");
        if let Some(alert) = alerts.iter_mut().find(|a| a.id == id) {
            if alert.acked_at.is_none() {
                alert.acked_at = Some(Utc::now());
                alert.acked_by = user_id.to_string();
            }
        }
    }

    fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        let alerts = self.alerts.lock().expect("alert list poisoned");
        alerts.iter().rev().take(limit).cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Filter and detail helpers
// ---------------------------------------------------------------------------

fn matches_query(entry: &AuditLog, query: &AuditQuery) -> bool {
    let ts = entry.timestamp.unwrap_or_else(|| DateTime::<Utc>::MIN_UTC);
    if let Some(start) = query.start_time {
        if ts < start {
            return false;
        }
    }
    if let Some(end) = query.end_time {
        if ts > end {
            return false;
        }
    }
    if !query.user_id.is_empty() && entry.user_id != query.user_id {
        return false;
    }
    if !query.resource_type.is_empty() && entry.resource_type != query.resource_type {
        return false;
    }
    if let Some(status) = query.status {
        if entry.status != status {
            return false;
        }
    }
    if !query.event_types.is_empty() && !query.event_types.contains(&entry.event_type) {
        return false;
    }
    true
}

fn detail_str(entry: &AuditLog, key: &str) -> Option<String> {
    entry
        .details
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn detail_u64(entry: &AuditLog, key: &str) -> Option<u64> {
    entry
        .details
        .get(key)
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)))
}

fn detail_f64(entry: &AuditLog, key: &str) -> Option<f64> {
    entry.details.get(key).and_then(|v| v.as_f64())
}

fn percent_change(current: u64, prev: u64) -> f64 {
    if prev == 0 {
        return 0.0;
    }
    (current as f64 - prev as f64) / prev as f64 * 100.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
