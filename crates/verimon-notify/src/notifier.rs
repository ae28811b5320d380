use crate::error::NotifyError;
use crate::message::{ActionConfig, ChannelKind, NotifyMessage};
use anyhow::Result;
use async_trait::async_trait;

/// 通知结果
#[derive(Debug, Clone)]
pub struct NotifyResult {
    pub success: bool,
    pub message: String,
}

impl NotifyResult {
    pub fn success() -> Self {
        Self {
            success: true,
            message: "Notification sent successfully".to_string(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// 通知器 trait，每种渠道一个实现
#[async_trait]
pub trait Notifier: Send + Sync {
    /// 发送通知，`config` 为该动作的配置
    async fn send(&self, message: &NotifyMessage, config: &ActionConfig) -> Result<NotifyResult>;

    /// 渠道类型
    fn kind(&self) -> ChannelKind;

    /// 校验动作配置，在规则创建时调用
    fn validate(&self, _config: &ActionConfig) -> Result<(), NotifyError> {
        Ok(())
    }

    /// 通知器名称
    fn name(&self) -> &str {
        self.kind().as_str()
    }
}

pub(crate) fn config_str<'a>(config: &'a ActionConfig, key: &str) -> Option<&'a str> {
    config.get(key).and_then(|v| v.as_str())
}

pub(crate) fn require_str<'a>(
    config: &'a ActionConfig,
    key: &str,
    channel: ChannelKind,
) -> Result<&'a str, NotifyError> {
    match config_str(config, key) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(NotifyError::invalid_config(
            channel,
            format!("missing required string field `{}`", key),
        )),
    }
}

pub(crate) fn require_url<'a>(
    config: &'a ActionConfig,
    key: &str,
    channel: ChannelKind,
) -> Result<&'a str, NotifyError> {
    let url = require_str(config, key, channel)?;
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(url)
    } else {
        Err(NotifyError::invalid_config(
            channel,
            format!("`{}` must be an http(s) URL, got {}", key, url),
        ))
    }
}
