use crate::alert::{
    Alert, AlertCounts, AlertHistoryEntry, AlertRule, AlertSeverity, AlertStatus,
};
use crate::collector::{Labels, MetricsCollector};
use crate::error::{MonitorError, Result};
use crate::history::AlertHistory;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use verimon_notify::{AlertAction, Dispatcher, NotifyMessage};

pub const DEFAULT_MAX_ALERT_AGE_SECS: u64 = 86_400;

/// 告警去重键：规则 + 触发序列的标签
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct AlertKey {
    pub(crate) rule_id: String,
    pub(crate) labels: Labels,
}

impl AlertKey {
    pub(crate) fn new(rule_id: &str, labels: Labels) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            labels,
        }
    }

    fn of(alert: &Alert) -> Self {
        Self::new(&alert.rule_id, alert.labels.clone())
    }
}

/// 活跃告警、去重索引和冷却时间戳，三者由同一把锁保护
#[derive(Default)]
pub(crate) struct AlertBook {
    pub(crate) alerts: HashMap<String, Alert>,
    pub(crate) by_key: HashMap<AlertKey, String>,
    pub(crate) cooldowns: HashMap<AlertKey, DateTime<Utc>>,
}

impl AlertBook {
    fn insert(&mut self, alert: Alert) {
        self.by_key.insert(AlertKey::of(&alert), alert.id.clone());
        self.alerts.insert(alert.id.clone(), alert);
    }

    fn remove(&mut self, id: &str) -> Option<Alert> {
        let alert = self.alerts.remove(id)?;
        self.by_key.remove(&AlertKey::of(&alert));
        Some(alert)
    }

    /// 解决告警并写入历史，告警从活跃集合中移除
    pub(crate) fn close(
        &mut self,
        history: &mut AlertHistory,
        id: &str,
        now: DateTime<Utc>,
        note: &str,
    ) -> Option<AlertHistoryEntry> {
        let mut alert = self.remove(id)?;
        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(now);
        alert.updated_at = now;

        let entry = AlertHistoryEntry::closing(&alert, now, note);
        history.push(entry.clone());
        info!(
            alert_id = %alert.id,
            rule = %alert.rule_id,
            "Alert resolved: {} ({})",
            alert.rule_name,
            note
        );
        Some(entry)
    }
}

/// 释放锁之后再派发的通知
pub(crate) type Outbox = Vec<(NotifyMessage, Vec<AlertAction>)>;

/// 一次评估的结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluationSummary {
    pub rules_evaluated: usize,
    pub rules_skipped: usize,
    pub created: usize,
    pub retriggered: usize,
    pub debounced: usize,
    pub resolved: usize,
    pub notifications: usize,
}

/// 告警规则引擎
///
/// 锁顺序：rules → book → history。通知总是在释放锁之后派发。
pub struct AlertEngine {
    pub(crate) collector: Arc<MetricsCollector>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) rules: RwLock<HashMap<String, AlertRule>>,
    pub(crate) book: RwLock<AlertBook>,
    pub(crate) history: RwLock<AlertHistory>,
    pub(crate) max_alert_age: Duration,
}

impl AlertEngine {
    pub fn new(collector: Arc<MetricsCollector>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            collector,
            dispatcher,
            rules: RwLock::new(HashMap::new()),
            book: RwLock::new(AlertBook::default()),
            history: RwLock::new(AlertHistory::default()),
            max_alert_age: Duration::seconds(DEFAULT_MAX_ALERT_AGE_SECS as i64),
        }
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history = RwLock::new(AlertHistory::new(capacity));
        self
    }

    /// 未解决告警的最长存活时间，超过后强制解决
    pub fn with_max_alert_age(mut self, max_age: Duration) -> Self {
        self.max_alert_age = max_age;
        self
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.collector
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub(crate) fn deliver(&self, outbox: Outbox) -> usize {
        outbox
            .into_iter()
            .map(|(message, actions)| self.dispatcher.dispatch(message, &actions))
            .sum()
    }

    // ---- 规则管理 ----

    /// 校验规则：结构合法、指标已知、动作渠道已注册且配置有效
    pub fn validate_rule(&self, rule: &AlertRule) -> Result<()> {
        rule.validate()?;

        if !self.collector.is_known(&rule.metric) {
            return Err(MonitorError::UnknownMetric {
                rule: rule.id.clone(),
                metric: rule.metric.clone(),
            });
        }

        for action in rule.all_actions() {
            self.dispatcher
                .validate_action(action)
                .map_err(|e| MonitorError::invalid_rule(&rule.id, e.to_string()))?;
        }

        Ok(())
    }

    pub async fn add_rule(&self, mut rule: AlertRule) -> Result<()> {
        self.validate_rule(&rule)?;

        let mut rules = self.rules.write().await;
        if rules.contains_key(&rule.id) {
            return Err(MonitorError::DuplicateRule(rule.id));
        }

        let now = Utc::now();
        rule.created_at = now;
        rule.updated_at = now;

        info!("Adding alert rule: {} ({})", rule.id, rule.name);
        rules.insert(rule.id.clone(), rule);
        Ok(())
    }

    /// 替换已有规则，保留创建时间
    pub async fn update_rule(&self, mut rule: AlertRule) -> Result<()> {
        self.validate_rule(&rule)?;

        let mut rules = self.rules.write().await;
        let existing = rules
            .get(&rule.id)
            .ok_or_else(|| MonitorError::RuleNotFound(rule.id.clone()))?;

        rule.created_at = existing.created_at;
        rule.updated_at = Utc::now();

        info!("Updating alert rule: {}", rule.id);
        rules.insert(rule.id.clone(), rule);
        Ok(())
    }

    /// 删除规则，同时清理其冷却记录并解决其未关闭的告警
    pub async fn delete_rule(&self, id: &str) -> Result<AlertRule> {
        let removed = self
            .rules
            .write()
            .await
            .remove(id)
            .ok_or_else(|| MonitorError::RuleNotFound(id.to_string()))?;

        let now = Utc::now();
        let mut book = self.book.write().await;
        book.cooldowns.retain(|key, _| key.rule_id != id);

        let open: Vec<String> = book
            .alerts
            .values()
            .filter(|a| a.rule_id == id)
            .map(|a| a.id.clone())
            .collect();

        if !open.is_empty() {
            let mut history = self.history.write().await;
            for alert_id in &open {
                book.close(&mut history, alert_id, now, "rule deleted");
            }
        }

        info!("Deleted alert rule: {} ({} open alerts resolved)", id, open.len());
        Ok(removed)
    }

    pub async fn get_rules(&self) -> Vec<AlertRule> {
        let mut rules: Vec<AlertRule> = self.rules.read().await.values().cloned().collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        rules
    }

    pub async fn get_rule(&self, id: &str) -> Option<AlertRule> {
        self.rules.read().await.get(id).cloned()
    }

    // ---- 评估 ----

    pub async fn evaluate(&self) -> EvaluationSummary {
        self.evaluate_at(Utc::now()).await
    }

    /// 以给定时间评估所有启用的规则
    ///
    /// 整轮评估持有规则读锁，删除或更新规则要等本轮结束，
    /// 避免为已删除的规则创建告警。
    pub async fn evaluate_at(&self, now: DateTime<Utc>) -> EvaluationSummary {
        let guard = self.rules.read().await;
        let mut rules: Vec<&AlertRule> = guard.values().filter(|r| r.enabled).collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));

        let mut summary = EvaluationSummary::default();
        let mut outbox = Outbox::new();

        for rule in rules {
            let observed: Vec<(Labels, f64)> = self
                .collector
                .series_stats(&rule.metric, &rule.labels, rule.window(), now)
                .into_iter()
                .filter(|(_, stats)| !stats.is_empty())
                .map(|(labels, stats)| (labels, rule.aggregation.pick(&stats)))
                .collect();

            if observed.is_empty() {
                debug!(rule = %rule.id, "No data for metric {}, rule skipped", rule.metric);
                summary.rules_skipped += 1;
                continue;
            }
            summary.rules_evaluated += 1;

            let mut book = self.book.write().await;
            for (labels, value) in observed {
                if !value.is_finite() {
                    warn!(rule = %rule.id, "Non-finite aggregate for {}, series skipped", rule.metric);
                    continue;
                }

                let key = AlertKey::new(&rule.id, labels);
                if rule.condition.holds(value, rule.threshold) {
                    trigger(&mut book, rule, key, value, now, &mut summary, &mut outbox);
                } else if rule.resolve_on_recovery {
                    if let Some(id) = book.by_key.get(&key).cloned() {
                        let mut history = self.history.write().await;
                        if book.close(&mut history, &id, now, "condition cleared").is_some() {
                            summary.resolved += 1;
                        }
                    }
                }
            }
        }

        drop(guard);

        summary.notifications = self.deliver(outbox);
        summary
    }

    // ---- 告警操作 ----

    pub async fn acknowledge_alert(&self, id: &str) -> Result<Alert> {
        let now = Utc::now();
        let mut book = self.book.write().await;
        let alert = book
            .alerts
            .get_mut(id)
            .ok_or_else(|| MonitorError::AlertNotFound(id.to_string()))?;

        alert.status = AlertStatus::Acknowledged;
        alert.updated_at = now;
        alert.metadata.insert("acknowledged_at".to_string(), json!(now));

        info!(alert_id = %id, "Alert acknowledged: {}", alert.rule_name);
        Ok(alert.clone())
    }

    pub async fn suppress_alert(&self, id: &str, reason: &str) -> Result<Alert> {
        let now = Utc::now();
        let mut book = self.book.write().await;
        let alert = book
            .alerts
            .get_mut(id)
            .ok_or_else(|| MonitorError::AlertNotFound(id.to_string()))?;

        alert.status = AlertStatus::Suppressed;
        alert.updated_at = now;
        alert
            .metadata
            .insert("suppression_reason".to_string(), json!(reason));

        info!(alert_id = %id, "Alert suppressed: {} ({})", alert.rule_name, reason);
        Ok(alert.clone())
    }

    /// 解决告警，写入一条历史记录
    pub async fn resolve_alert(&self, id: &str, note: &str) -> Result<AlertHistoryEntry> {
        let mut book = self.book.write().await;
        let mut history = self.history.write().await;
        book.close(&mut history, id, Utc::now(), note)
            .ok_or_else(|| MonitorError::AlertNotFound(id.to_string()))
    }

    // ---- 查询 ----

    /// 所有未解决的告警，按创建时间排序
    pub async fn get_active_alerts(&self) -> Vec<Alert> {
        self.collect_alerts(|_| true).await
    }

    pub async fn get_alert(&self, id: &str) -> Option<Alert> {
        self.book.read().await.alerts.get(id).cloned()
    }

    pub async fn get_alerts(
        &self,
        severity: Option<AlertSeverity>,
        category: Option<&str>,
    ) -> Vec<Alert> {
        self.collect_alerts(|alert| {
            severity.map_or(true, |s| alert.severity == s)
                && category.map_or(true, |c| alert.category == c)
        })
        .await
    }

    async fn collect_alerts<F>(&self, filter: F) -> Vec<Alert>
    where
        F: Fn(&Alert) -> bool,
    {
        let mut alerts: Vec<Alert> = self
            .book
            .read()
            .await
            .alerts
            .values()
            .filter(|a| filter(a))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        alerts
    }

    /// 最近 `limit` 条历史，按时间正序
    pub async fn get_alert_history(&self, limit: usize) -> Vec<AlertHistoryEntry> {
        self.history.read().await.recent(limit)
    }

    pub async fn alert_counts(&self) -> AlertCounts {
        let book = self.book.read().await;
        let history = self.history.read().await;

        let mut counts = AlertCounts {
            open: book.alerts.len(),
            history_entries: history.len(),
            avg_resolution_secs: history.avg_resolution_secs(),
            ..AlertCounts::default()
        };
        for alert in book.alerts.values() {
            *counts.by_status.entry(alert.status).or_insert(0) += 1;
            *counts.by_severity.entry(alert.severity).or_insert(0) += 1;
        }
        counts.by_status.insert(AlertStatus::Resolved, history.len());
        counts
    }

    // ---- 冷却清理 ----

    pub async fn cleanup_cooldowns(&self) -> usize {
        self.cleanup_cooldowns_at(Utc::now()).await
    }

    /// 清除已过期的冷却记录，返回清除数量
    pub async fn cleanup_cooldowns_at(&self, now: DateTime<Utc>) -> usize {
        let cooldowns: HashMap<String, Duration> = self
            .rules
            .read()
            .await
            .values()
            .map(|r| (r.id.clone(), r.cooldown()))
            .collect();

        let mut book = self.book.write().await;
        let before = book.cooldowns.len();
        book.cooldowns.retain(|key, last| match cooldowns.get(&key.rule_id) {
            Some(cooldown) => now - *last < *cooldown,
            None => false,
        });

        let removed = before - book.cooldowns.len();
        if removed > 0 {
            debug!("Cleaned up {} expired cooldown entries", removed);
        }
        removed
    }
}

/// 条件满足时的处理：创建、重复触发或去抖
fn trigger(
    book: &mut AlertBook,
    rule: &AlertRule,
    key: AlertKey,
    value: f64,
    now: DateTime<Utc>,
    summary: &mut EvaluationSummary,
    outbox: &mut Outbox,
) {
    let in_cooldown = book
        .cooldowns
        .get(&key)
        .map_or(false, |last| now - *last < rule.cooldown());
    let existing = book.by_key.get(&key).cloned();
    let alert = existing.as_ref().and_then(|id| book.alerts.get_mut(id));

    match alert {
        Some(alert) if in_cooldown => {
            if alert.status == AlertStatus::Active {
                alert.occurrence_count += 1;
            }
            alert.updated_at = now;
            summary.debounced += 1;
            debug!(alert_id = %alert.id, "Alert within cooldown, notification suppressed");
        }
        Some(alert) => {
            if alert.status == AlertStatus::Active {
                alert.occurrence_count += 1;
            }
            alert.updated_at = now;
            alert.message = rule.describe_breach(&key.labels, value);
            if alert.status.notifies_on_trigger() {
                outbox.push((alert.to_notify_message(), rule.actions.clone()));
            }
            info!(alert_id = %alert.id, "Alert re-triggered: {}", alert.message);
            book.cooldowns.insert(key, now);
            summary.retriggered += 1;
        }
        None if in_cooldown => {
            summary.debounced += 1;
            debug!(rule = %rule.id, "Condition met within cooldown, no alert created");
        }
        None => {
            let alert = Alert::new(rule, key.labels.clone(), rule.describe_breach(&key.labels, value), now);
            info!(alert_id = %alert.id, "Alert fired: {}", alert.message);
            outbox.push((alert.to_notify_message(), rule.actions.clone()));
            book.cooldowns.insert(key, now);
            book.insert(alert);
            summary.created += 1;
        }
    }
}
