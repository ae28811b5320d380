use crate::alert::{format_duration, Alert, AlertSeverity, AlertStatus, EscalationLevel, EscalationPolicy};
use crate::engine::{AlertEngine, Outbox};
use crate::error::{MonitorError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{info, warn};

/// 手动升级的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationOutcome {
    Escalated { level: u32, severity: AlertSeverity },
    /// 已达到策略上限，未做任何改变
    AtMaximum,
    /// 规则没有升级策略（或规则已删除）
    NoPolicy,
}

/// 一次升级检查的结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EscalationSummary {
    pub escalated: usize,
    pub expired: usize,
    pub notifications: usize,
}

fn advance(alert: &mut Alert, level: &EscalationLevel, now: DateTime<Utc>) {
    // 级别只增不减，规则更新后重新编号也一样
    alert.escalation_level = alert.escalation_level.max(level.level);
    alert.severity = level.severity;
    alert.status = AlertStatus::Escalated;
    alert.escalated_at = Some(now);
    alert.updated_at = now;

    info!(
        alert_id = %alert.id,
        "Alert escalated to level {} ({}): {}",
        alert.escalation_level,
        level.name,
        alert.rule_name
    );
}

/// 下一个升级级别（从当前已升级次数 + 1 算起）
fn next_level<'a>(policy: &'a EscalationPolicy, alert: &Alert) -> Option<&'a EscalationLevel> {
    policy.level(escalation_count(policy, alert) + 1)
}

/// 已升级的次数，级别编号可能不连续，按位置换算
fn escalation_count(policy: &EscalationPolicy, alert: &Alert) -> u32 {
    policy
        .levels
        .iter()
        .take_while(|l| l.level <= alert.escalation_level)
        .count() as u32
}

impl AlertEngine {
    pub async fn check_escalations(&self) -> EscalationSummary {
        self.check_escalations_at(Utc::now()).await
    }

    /// 推进到期的自动升级，并强制解决超龄告警
    ///
    /// 每个告警每次最多升一级。
    pub async fn check_escalations_at(&self, now: DateTime<Utc>) -> EscalationSummary {
        let policies: HashMap<String, EscalationPolicy> = self
            .rules
            .read()
            .await
            .values()
            .filter_map(|r| r.escalation.clone().map(|p| (r.id.clone(), p)))
            .collect();

        let mut summary = EscalationSummary::default();
        let mut outbox = Outbox::new();
        let mut book = self.book.write().await;

        let expired: Vec<(String, String)> = book
            .alerts
            .values()
            .filter(|a| a.age(now) >= self.max_alert_age)
            .map(|a| (a.id.clone(), format!("auto-resolved after {}", format_duration(a.age(now)))))
            .collect();

        if !expired.is_empty() {
            let mut history = self.history.write().await;
            for (id, note) in &expired {
                warn!(alert_id = %id, "Alert exceeded maximum age, {}", note);
                if book.close(&mut history, id, now, note).is_some() {
                    summary.expired += 1;
                }
            }
        }

        for alert in book.alerts.values_mut() {
            if matches!(alert.status, AlertStatus::Suppressed | AlertStatus::Resolved) {
                continue;
            }
            let Some(policy) = policies.get(&alert.rule_id).filter(|p| p.auto_escalate) else {
                continue;
            };
            let Some(level) = next_level(policy, alert) else {
                continue;
            };

            if now - alert.escalation_anchor() >= level.delay() {
                advance(alert, level, now);
                outbox.push((alert.to_notify_message(), level.actions.clone()));
                summary.escalated += 1;
            }
        }
        drop(book);

        summary.notifications = self.deliver(outbox);
        summary
    }

    /// 手动升级一级，忽略延迟和 auto_escalate，但不超过策略上限
    pub async fn escalate_alert(&self, id: &str) -> Result<EscalationOutcome> {
        let rule_id = self
            .get_alert(id)
            .await
            .map(|a| a.rule_id)
            .ok_or_else(|| MonitorError::AlertNotFound(id.to_string()))?;
        let policy = self
            .rules
            .read()
            .await
            .get(&rule_id)
            .and_then(|r| r.escalation.clone());

        let now = Utc::now();
        let mut book = self.book.write().await;
        let alert = book
            .alerts
            .get_mut(id)
            .ok_or_else(|| MonitorError::AlertNotFound(id.to_string()))?;

        let Some(policy) = policy else {
            return Ok(EscalationOutcome::NoPolicy);
        };
        let Some(level) = next_level(&policy, alert) else {
            return Ok(EscalationOutcome::AtMaximum);
        };

        advance(alert, level, now);
        let outcome = EscalationOutcome::Escalated {
            level: alert.escalation_level,
            severity: alert.severity,
        };
        let outbox = vec![(alert.to_notify_message(), level.actions.clone())];
        drop(book);

        self.deliver(outbox);
        Ok(outcome)
    }
}
