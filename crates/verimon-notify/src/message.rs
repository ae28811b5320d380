use crate::error::NotifyError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// 通知级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyLevel {
    /// 信息
    Info,
    /// 警告
    Warning,
    /// 错误
    Error,
    /// 严重
    Critical,
}

impl NotifyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyLevel::Info => "info",
            NotifyLevel::Warning => "warning",
            NotifyLevel::Error => "error",
            NotifyLevel::Critical => "critical",
        }
    }
}

/// 通知渠道类型
///
/// 渠道集合是封闭的：配置中出现未知的 `type` 会在反序列化阶段直接报错，
/// 而不是等到派发时才发现。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// 仅写入日志
    Log,
    /// 通用 Webhook
    Webhook,
    /// Slack incoming webhook
    Slack,
    /// 邮件
    Email,
    /// PagerDuty Events API v2
    PagerDuty,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 5] = [
        ChannelKind::Log,
        ChannelKind::Webhook,
        ChannelKind::Slack,
        ChannelKind::Email,
        ChannelKind::PagerDuty,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Log => "log",
            ChannelKind::Webhook => "webhook",
            ChannelKind::Slack => "slack",
            ChannelKind::Email => "email",
            ChannelKind::PagerDuty => "pagerduty",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = NotifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChannelKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| NotifyError::UnknownChannel(s.to_string()))
    }
}

/// 动作的自由配置（例如 url、channel、to）
pub type ActionConfig = HashMap<String, serde_json::Value>;

/// 告警动作：触发或升级时要执行的一次通知
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertAction {
    #[serde(rename = "type")]
    pub kind: ChannelKind,

    #[serde(default)]
    pub config: ActionConfig,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl AlertAction {
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            config: HashMap::new(),
            enabled: true,
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// 通知消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyMessage {
    /// 标题
    pub title: String,

    /// 内容
    pub content: String,

    /// 级别
    pub level: NotifyLevel,

    /// 时间
    pub timestamp: DateTime<Utc>,

    /// 额外数据
    pub metadata: Option<serde_json::Value>,
}

impl NotifyMessage {
    pub fn new(title: impl Into<String>, content: impl Into<String>, level: NotifyLevel) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            level,
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn warning(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(title, content, NotifyLevel::Warning)
    }

    pub fn critical(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(title, content, NotifyLevel::Critical)
    }
}
