use crate::collector::{is_valid_metric_name, Labels};
use crate::error::{MonitorError, Result};
use crate::stats::MetricStats;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use verimon_notify::{AlertAction, NotifyLevel, NotifyMessage};

/// 告警级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    pub const ALL: [AlertSeverity; 4] = [
        AlertSeverity::Info,
        AlertSeverity::Warning,
        AlertSeverity::Error,
        AlertSeverity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Error => "error",
            AlertSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<AlertSeverity> for NotifyLevel {
    fn from(severity: AlertSeverity) -> Self {
        match severity {
            AlertSeverity::Info => NotifyLevel::Info,
            AlertSeverity::Warning => NotifyLevel::Warning,
            AlertSeverity::Error => NotifyLevel::Error,
            AlertSeverity::Critical => NotifyLevel::Critical,
        }
    }
}

/// 告警状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Escalated,
    Suppressed,
    Resolved,
}

impl AlertStatus {
    pub const ALL: [AlertStatus; 5] = [
        AlertStatus::Active,
        AlertStatus::Acknowledged,
        AlertStatus::Escalated,
        AlertStatus::Suppressed,
        AlertStatus::Resolved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Escalated => "escalated",
            AlertStatus::Suppressed => "suppressed",
            AlertStatus::Resolved => "resolved",
        }
    }

    /// 该状态下重复触发是否发送通知
    pub fn notifies_on_trigger(&self) -> bool {
        !matches!(self, AlertStatus::Acknowledged | AlertStatus::Suppressed)
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = ">", alias = "gt")]
    GreaterThan,
    #[serde(rename = "<", alias = "lt")]
    LessThan,
    #[serde(rename = "=", alias = "==", alias = "eq")]
    Equal,
}

impl Comparison {
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::GreaterThan => value > threshold,
            Comparison::LessThan => value < threshold,
            Comparison::Equal => (value - threshold).abs() < f64::EPSILON,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparison::GreaterThan => ">",
            Comparison::LessThan => "<",
            Comparison::Equal => "=",
        }
    }
}

/// 规则比较的是窗口统计中的哪个值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Latest,
    Avg,
    Min,
    Max,
    P50,
    P95,
    P99,
}

impl Aggregation {
    pub fn pick(&self, stats: &MetricStats) -> f64 {
        match self {
            Aggregation::Latest => stats.latest,
            Aggregation::Avg => stats.avg,
            Aggregation::Min => stats.min,
            Aggregation::Max => stats.max,
            Aggregation::P50 => stats.p50,
            Aggregation::P95 => stats.p95,
            Aggregation::P99 => stats.p99,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Latest => "latest",
            Aggregation::Avg => "avg",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::P50 => "p50",
            Aggregation::P95 => "p95",
            Aggregation::P99 => "p99",
        }
    }
}

/// 升级级别
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationLevel {
    pub level: u32,
    pub name: String,
    pub severity: AlertSeverity,
    /// 距上一次升级（或创建）的等待时间
    pub delay_secs: u64,
    #[serde(default)]
    pub actions: Vec<AlertAction>,
}

impl EscalationLevel {
    pub fn delay(&self) -> Duration {
        secs(self.delay_secs)
    }
}

/// 升级策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    pub levels: Vec<EscalationLevel>,

    #[serde(default = "default_true")]
    pub auto_escalate: bool,

    /// 最多升级次数，未设置时等于级别数
    #[serde(default)]
    pub max_escalations: Option<u32>,
}

impl EscalationPolicy {
    /// 实际可达的最高级别
    pub fn max_level(&self) -> u32 {
        let levels = self.levels.len() as u32;
        self.max_escalations.map_or(levels, |max| max.min(levels))
    }

    /// 第 `level` 级（从 1 开始）
    pub fn level(&self, level: u32) -> Option<&EscalationLevel> {
        if level == 0 || level > self.max_level() {
            return None;
        }
        self.levels.get(level as usize - 1)
    }

    fn validate(&self, rule_id: &str) -> Result<()> {
        if self.levels.is_empty() {
            return Err(MonitorError::invalid_rule(rule_id, "escalation policy has no levels"));
        }

        if self.levels[0].level == 0 {
            return Err(MonitorError::invalid_rule(rule_id, "escalation levels start at 1"));
        }

        for pair in self.levels.windows(2) {
            if pair[1].level <= pair[0].level {
                return Err(MonitorError::invalid_rule(
                    rule_id,
                    format!(
                        "escalation levels must be strictly increasing ({} after {})",
                        pair[1].level, pair[0].level
                    ),
                ));
            }
        }

        if self.levels.iter().any(|l| l.name.trim().is_empty()) {
            return Err(MonitorError::invalid_rule(rule_id, "escalation level without a name"));
        }

        Ok(())
    }
}

/// 告警规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// 监控的指标名
    pub metric: String,

    /// 标签选择器（子集匹配），为空时匹配该指标的所有序列
    #[serde(default)]
    pub labels: Labels,

    pub condition: Comparison,
    pub threshold: f64,

    #[serde(default)]
    pub aggregation: Aggregation,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    pub severity: AlertSeverity,

    #[serde(default = "default_category")]
    pub category: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    #[serde(default)]
    pub escalation: Option<EscalationPolicy>,

    #[serde(default)]
    pub actions: Vec<AlertAction>,

    /// 条件不再满足时自动解决
    #[serde(default)]
    pub resolve_on_recovery: bool,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

fn default_window_secs() -> u64 {
    300
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_category() -> String {
    "general".to_string()
}

/// 配置中的时长上限（100 年），避免时间运算溢出
const MAX_DURATION_SECS: u64 = 100 * 365 * 24 * 3600;

pub(crate) fn secs(value: u64) -> Duration {
    Duration::seconds(value.min(MAX_DURATION_SECS) as i64)
}

impl AlertRule {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        metric: impl Into<String>,
        condition: Comparison,
        threshold: f64,
        severity: AlertSeverity,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            metric: metric.into(),
            labels: Labels::new(),
            condition,
            threshold,
            aggregation: Aggregation::default(),
            window_secs: default_window_secs(),
            severity,
            category: default_category(),
            enabled: true,
            cooldown_secs: default_cooldown_secs(),
            escalation: None,
            actions: Vec::new(),
            resolve_on_recovery: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_window(mut self, window_secs: u64) -> Self {
        self.window_secs = window_secs;
        self
    }

    pub fn with_cooldown(mut self, cooldown_secs: u64) -> Self {
        self.cooldown_secs = cooldown_secs;
        self
    }

    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_action(mut self, action: AlertAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_escalation(mut self, policy: EscalationPolicy) -> Self {
        self.escalation = Some(policy);
        self
    }

    pub fn resolving_on_recovery(mut self) -> Self {
        self.resolve_on_recovery = true;
        self
    }

    pub fn window(&self) -> Duration {
        secs(self.window_secs)
    }

    pub fn cooldown(&self) -> Duration {
        secs(self.cooldown_secs)
    }

    /// 规则及其升级策略中的所有动作
    pub fn all_actions(&self) -> impl Iterator<Item = &AlertAction> {
        self.actions.iter().chain(
            self.escalation
                .iter()
                .flat_map(|policy| policy.levels.iter())
                .flat_map(|level| level.actions.iter()),
        )
    }

    /// 结构校验（不涉及指标是否存在、渠道是否注册）
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(MonitorError::invalid_rule("<empty>", "rule id must not be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(MonitorError::invalid_rule(&self.id, "rule name must not be empty"));
        }
        if !is_valid_metric_name(&self.metric) {
            return Err(MonitorError::invalid_rule(
                &self.id,
                format!("invalid metric name: {:?}", self.metric),
            ));
        }
        if !self.threshold.is_finite() {
            return Err(MonitorError::invalid_rule(&self.id, "threshold must be finite"));
        }
        if self.window_secs == 0 {
            return Err(MonitorError::invalid_rule(&self.id, "evaluation window must be positive"));
        }
        if let Some(policy) = &self.escalation {
            policy.validate(&self.id)?;
        }
        Ok(())
    }

    /// 触发消息
    pub fn describe_breach(&self, labels: &Labels, value: f64) -> String {
        let series = if labels.is_empty() {
            self.metric.clone()
        } else {
            let pairs: Vec<String> = labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            format!("{}{{{}}}", self.metric, pairs.join(","))
        };
        format!(
            "{}: {} {} = {:.4} {} threshold {}",
            self.name,
            series,
            self.aggregation.as_str(),
            value,
            self.condition.symbol(),
            self.threshold
        )
    }
}

/// 告警实例
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub category: String,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub message: String,
    /// 触发序列的标签
    pub labels: Labels,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub escalated_at: Option<DateTime<Utc>>,
    /// 0 表示未升级
    pub escalation_level: u32,
    pub occurrence_count: u64,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Alert {
    pub fn new(rule: &AlertRule, labels: Labels, message: String, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            category: rule.category.clone(),
            severity: rule.severity,
            status: AlertStatus::Active,
            message,
            labels,
            created_at: now,
            updated_at: now,
            resolved_at: None,
            escalated_at: None,
            escalation_level: 0,
            occurrence_count: 1,
            metadata: HashMap::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status != AlertStatus::Resolved
    }

    /// 升级计时起点
    pub fn escalation_anchor(&self) -> DateTime<Utc> {
        match self.escalated_at {
            Some(at) if at > self.created_at => at,
            _ => self.created_at,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    pub fn to_notify_message(&self) -> NotifyMessage {
        let title = if self.escalation_level > 0 {
            format!(
                "[{}] {} (escalation level {})",
                self.severity.as_str().to_uppercase(),
                self.rule_name,
                self.escalation_level
            )
        } else {
            format!("[{}] {}", self.severity.as_str().to_uppercase(), self.rule_name)
        };

        NotifyMessage::new(title, self.message.clone(), self.severity.into()).with_metadata(json!({
            "alert_id": self.id,
            "rule_id": self.rule_id,
            "category": self.category,
            "status": self.status,
            "labels": self.labels,
            "escalation_level": self.escalation_level,
            "occurrence_count": self.occurrence_count,
        }))
    }
}

/// 告警历史记录，写入后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertHistoryEntry {
    pub alert_id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub resolved: bool,
    pub resolution: String,
}

impl AlertHistoryEntry {
    pub fn closing(alert: &Alert, ended_at: DateTime<Utc>, resolution: impl Into<String>) -> Self {
        Self {
            alert_id: alert.id.clone(),
            rule_id: alert.rule_id.clone(),
            rule_name: alert.rule_name.clone(),
            severity: alert.severity,
            message: alert.message.clone(),
            started_at: alert.created_at,
            ended_at,
            duration_ms: (ended_at - alert.created_at).num_milliseconds(),
            resolved: true,
            resolution: resolution.into(),
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::milliseconds(self.duration_ms)
    }
}

/// 告警统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlertCounts {
    pub open: usize,
    pub by_status: HashMap<AlertStatus, usize>,
    pub by_severity: HashMap<AlertSeverity, usize>,
    pub history_entries: usize,
    pub avg_resolution_secs: f64,
}

impl AlertCounts {
    pub fn status(&self, status: AlertStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }

    pub fn severity(&self, severity: AlertSeverity) -> usize {
        self.by_severity.get(&severity).copied().unwrap_or(0)
    }
}

/// 格式化时长，例如 `24h0m0s`
pub fn format_duration(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    format!("{}h{}m{}s", total / 3600, (total % 3600) / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::label_set;
    use verimon_notify::ChannelKind;

    #[test]
    fn test_comparison() {
        assert!(Comparison::GreaterThan.holds(0.15, 0.10));
        assert!(!Comparison::GreaterThan.holds(0.10, 0.10));
        assert!(Comparison::LessThan.holds(0.05, 0.10));
        assert!(Comparison::Equal.holds(0.1 + 0.2 - 0.2, 0.1));
    }

    #[test]
    fn test_rule_from_toml() {
        let rule: AlertRule = toml::from_str(
            r#"
            id = "R1"
            name = "High Error Rate"
            metric = "error_rate"
            condition = ">"
            threshold = 0.10
            severity = "warning"
            cooldown_secs = 300
            labels = { provider = "openai" }

            [[actions]]
            type = "log"

            [escalation]
            max_escalations = 1

            [[escalation.levels]]
            level = 1
            name = "on-call"
            severity = "critical"
            delay_secs = 600
            "#,
        )
        .unwrap();

        assert_eq!(rule.condition, Comparison::GreaterThan);
        assert_eq!(rule.aggregation, Aggregation::Latest);
        assert_eq!(rule.category, "general");
        assert_eq!(rule.window_secs, 300);
        assert_eq!(rule.actions[0].kind, ChannelKind::Log);
        assert_eq!(rule.labels, label_set(&[("provider", "openai")]));

        let policy = rule.escalation.as_ref().unwrap();
        assert!(policy.auto_escalate);
        assert_eq!(policy.max_level(), 1);
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_rule_validation() {
        let base = AlertRule::new("R1", "High", "error_rate", Comparison::GreaterThan, 0.1, AlertSeverity::Warning);
        assert!(base.validate().is_ok());

        let mut bad = base.clone();
        bad.threshold = f64::NAN;
        assert!(matches!(bad.validate(), Err(MonitorError::InvalidRule { .. })));

        let bad = base.clone().with_window(0);
        assert!(bad.validate().is_err());

        let mut bad = base.clone();
        bad.metric = "error rate".into();
        assert!(bad.validate().is_err());

        let bad = base.with_escalation(EscalationPolicy {
            levels: vec![],
            auto_escalate: true,
            max_escalations: None,
        });
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_policy_cap() {
        let level = |n: u32| EscalationLevel {
            level: n,
            name: format!("L{}", n),
            severity: AlertSeverity::Critical,
            delay_secs: 60,
            actions: vec![],
        };
        let policy = EscalationPolicy {
            levels: vec![level(1), level(2), level(3)],
            auto_escalate: true,
            max_escalations: Some(2),
        };

        assert_eq!(policy.max_level(), 2);
        assert!(policy.level(2).is_some());
        assert!(policy.level(3).is_none());
        assert!(policy.level(0).is_none());

        let uncapped = EscalationPolicy {
            max_escalations: Some(10),
            ..policy
        };
        assert_eq!(uncapped.max_level(), 3);
    }

    #[test]
    fn test_alert_message() {
        let rule = AlertRule::new("R1", "High Error Rate", "error_rate", Comparison::GreaterThan, 0.1, AlertSeverity::Warning);
        let labels = label_set(&[("provider", "openai")]);
        let message = rule.describe_breach(&labels, 0.15);
        assert!(message.contains("0.1500"));
        assert!(message.contains("provider=openai"));

        let alert = Alert::new(&rule, labels, message, Utc::now());
        let notify = alert.to_notify_message();
        assert_eq!(notify.level, NotifyLevel::Warning);
        assert_eq!(notify.title, "[WARNING] High Error Rate");
        assert_eq!(notify.metadata.unwrap()["rule_id"], "R1");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::hours(24)), "24h0m0s");
        assert_eq!(format_duration(Duration::seconds(3725)), "1h2m5s");
    }
}
