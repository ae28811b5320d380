use crate::message::ChannelKind;

/// 通知错误
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("No handler registered for channel: {0}")]
    UnsupportedChannel(ChannelKind),

    #[error("Unknown channel type: {0}")]
    UnknownChannel(String),

    #[error("Invalid {channel} action config: {reason}")]
    InvalidConfig { channel: ChannelKind, reason: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Email error: {0}")]
    Email(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl NotifyError {
    pub fn invalid_config(channel: ChannelKind, reason: impl Into<String>) -> Self {
        NotifyError::InvalidConfig {
            channel,
            reason: reason.into(),
        }
    }
}
