use serde::{Deserialize, Serialize};

/// 渠道配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// HTTP 类渠道的请求超时（秒）
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// SMTP 配置，未配置时不注册邮件渠道
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_smtp_port() -> u16 {
    587
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: default_http_timeout_secs(),
            smtp: None,
        }
    }
}
