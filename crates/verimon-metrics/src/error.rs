use thiserror::Error;
use verimon_notify::NotifyError;

/// 监控子系统统一错误类型
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Invalid rule {rule}: {reason}")]
    InvalidRule { rule: String, reason: String },

    #[error("Rule {rule} references unknown metric: {metric}")]
    UnknownMetric { rule: String, metric: String },

    #[error("Invalid metric {name}: {reason}")]
    InvalidMetric { name: String, reason: String },

    #[error("Rule already exists: {0}")]
    DuplicateRule(String),

    #[error("Rule not found: {0}")]
    RuleNotFound(String),

    #[error("Alert not found: {0}")]
    AlertNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),
}

impl MonitorError {
    pub fn invalid_rule(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        MonitorError::InvalidRule {
            rule: rule.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_metric(name: impl Into<String>, reason: impl Into<String>) -> Self {
        MonitorError::InvalidMetric {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// 是否为查找失败（未知 id）
    pub fn is_not_found(&self) -> bool {
        matches!(self, MonitorError::RuleNotFound(_) | MonitorError::AlertNotFound(_))
    }
}

impl From<toml::de::Error> for MonitorError {
    fn from(err: toml::de::Error) -> Self {
        MonitorError::Config(err.to_string())
    }
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, MonitorError>;
