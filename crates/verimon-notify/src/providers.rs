use crate::config::SmtpConfig;
use crate::error::NotifyError;
use crate::message::{ActionConfig, ChannelKind, NotifyLevel, NotifyMessage};
use crate::notifier::{config_str, require_str, require_url, Notifier, NotifyResult};
use anyhow::Result;
use async_trait::async_trait;
use tracing::{error, info, warn};

// ============================================================================
// 日志通知
// ============================================================================

/// 只写日志的渠道，用于本地调试和兜底
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &NotifyMessage, _config: &ActionConfig) -> Result<NotifyResult> {
        match message.level {
            NotifyLevel::Info => info!(title = %message.title, "{}", message.content),
            NotifyLevel::Warning => warn!(title = %message.title, "{}", message.content),
            NotifyLevel::Error | NotifyLevel::Critical => {
                error!(title = %message.title, "{}", message.content)
            }
        }
        Ok(NotifyResult::success())
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Log
    }
}

// ============================================================================
// Webhook 通知
// ============================================================================

pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, message: &NotifyMessage, config: &ActionConfig) -> Result<NotifyResult> {
        let url = require_url(config, "url", ChannelKind::Webhook)?;

        let mut request = match config_str(config, "method") {
            Some(method) if method.eq_ignore_ascii_case("put") => self.client.put(url),
            _ => self.client.post(url),
        };

        if let Some(headers) = config.get("headers").and_then(|h| h.as_object()) {
            for (key, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(key.as_str(), value);
                }
            }
        }

        let response = request.json(message).send().await?;

        if response.status().is_success() {
            Ok(NotifyResult::success())
        } else {
            Ok(NotifyResult::failure(format!(
                "Webhook failed with status: {}",
                response.status()
            )))
        }
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Webhook
    }

    fn validate(&self, config: &ActionConfig) -> Result<(), NotifyError> {
        require_url(config, "url", ChannelKind::Webhook)?;
        if let Some(method) = config_str(config, "method") {
            if !method.eq_ignore_ascii_case("post") && !method.eq_ignore_ascii_case("put") {
                return Err(NotifyError::invalid_config(
                    ChannelKind::Webhook,
                    format!("unsupported method {}", method),
                ));
            }
        }
        if let Some(headers) = config.get("headers") {
            if !headers.is_object() {
                return Err(NotifyError::invalid_config(
                    ChannelKind::Webhook,
                    "`headers` must be a table of strings",
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Slack 通知
// ============================================================================

pub struct SlackNotifier {
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build_message(&self, message: &NotifyMessage, config: &ActionConfig) -> serde_json::Value {
        let color = match message.level {
            NotifyLevel::Info => "good",
            NotifyLevel::Warning => "warning",
            NotifyLevel::Error | NotifyLevel::Critical => "danger",
        };

        let mut body = serde_json::json!({
            "attachments": [{
                "color": color,
                "title": message.title,
                "text": message.content,
                "fields": [
                    {
                        "title": "Level",
                        "value": message.level.as_str(),
                        "short": true
                    },
                    {
                        "title": "Time",
                        "value": message.timestamp.to_rfc3339(),
                        "short": true
                    }
                ]
            }]
        });

        if let Some(channel) = config_str(config, "channel") {
            body["channel"] = serde_json::Value::String(channel.to_string());
        }

        body
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, message: &NotifyMessage, config: &ActionConfig) -> Result<NotifyResult> {
        let url = require_url(config, "webhook_url", ChannelKind::Slack)?;
        let body = self.build_message(message, config);

        let response = self.client.post(url).json(&body).send().await?;

        if response.status().is_success() {
            Ok(NotifyResult::success())
        } else {
            Ok(NotifyResult::failure(format!(
                "Slack failed: {}",
                response.status()
            )))
        }
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Slack
    }

    fn validate(&self, config: &ActionConfig) -> Result<(), NotifyError> {
        require_url(config, "webhook_url", ChannelKind::Slack).map(|_| ())
    }
}

// ============================================================================
// PagerDuty 通知
// ============================================================================

const PAGERDUTY_EVENTS_URL: &str = "https://events.pagerduty.com/v2/enqueue";

pub struct PagerDutyNotifier {
    client: reqwest::Client,
}

impl PagerDutyNotifier {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build_event(&self, message: &NotifyMessage, routing_key: &str) -> serde_json::Value {
        // Events API v2 只接受 critical/error/warning/info
        serde_json::json!({
            "routing_key": routing_key,
            "event_action": "trigger",
            "payload": {
                "summary": format!("{}: {}", message.title, message.content),
                "severity": message.level.as_str(),
                "source": "verimon",
                "timestamp": message.timestamp.to_rfc3339(),
                "custom_details": message.metadata,
            }
        })
    }
}

#[async_trait]
impl Notifier for PagerDutyNotifier {
    async fn send(&self, message: &NotifyMessage, config: &ActionConfig) -> Result<NotifyResult> {
        let routing_key = require_str(config, "routing_key", ChannelKind::PagerDuty)?;
        let url = config_str(config, "url").unwrap_or(PAGERDUTY_EVENTS_URL);
        let body = self.build_event(message, routing_key);

        let response = self.client.post(url).json(&body).send().await?;

        if response.status().is_success() {
            Ok(NotifyResult::success())
        } else {
            Ok(NotifyResult::failure(format!(
                "PagerDuty failed: {}",
                response.status()
            )))
        }
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::PagerDuty
    }

    fn validate(&self, config: &ActionConfig) -> Result<(), NotifyError> {
        require_str(config, "routing_key", ChannelKind::PagerDuty)?;
        if config.contains_key("url") {
            require_url(config, "url", ChannelKind::PagerDuty)?;
        }
        Ok(())
    }
}

// ============================================================================
// 邮件通知
// ============================================================================

pub struct EmailNotifier {
    from: String,
    mailer: lettre::AsyncSmtpTransport<lettre::Tokio1Executor>,
}

impl EmailNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, NotifyError> {
        use lettre::transport::smtp::authentication::Credentials;
        use lettre::{AsyncSmtpTransport, Tokio1Executor};

        let creds = Credentials::new(config.username.clone(), config.password.clone());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| NotifyError::Email(e.to_string()))?
            .credentials(creds)
            .port(config.port)
            .build();

        Ok(Self {
            from: config.from.clone(),
            mailer,
        })
    }

    fn recipients(config: &ActionConfig) -> Vec<String> {
        match config.get("to") {
            Some(serde_json::Value::String(to)) => vec![to.clone()],
            Some(serde_json::Value::Array(list)) => list
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn format_body(message: &NotifyMessage) -> String {
        let mut body = format!("{}\n\n", message.content);
        body.push_str(&format!("Level: {}\n", message.level.as_str()));
        body.push_str(&format!("Time: {}\n", message.timestamp.to_rfc3339()));
        if let Some(metadata) = &message.metadata {
            body.push_str(&format!("\nDetails:\n{}\n", metadata));
        }
        body
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, message: &NotifyMessage, config: &ActionConfig) -> Result<NotifyResult> {
        use lettre::message::header::ContentType;
        use lettre::{AsyncTransport, Message};

        let recipients = Self::recipients(config);
        let mut builder = Message::builder()
            .from(self.from.parse()?)
            .subject(message.title.as_str())
            .header(ContentType::TEXT_PLAIN);
        for to in &recipients {
            builder = builder.to(to.parse()?);
        }
        let email = builder.body(Self::format_body(message))?;

        match self.mailer.send(email).await {
            Ok(_) => Ok(NotifyResult::success()),
            Err(e) => Ok(NotifyResult::failure(format!("Email send failed: {}", e))),
        }
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    fn validate(&self, config: &ActionConfig) -> Result<(), NotifyError> {
        let recipients = Self::recipients(config);
        if recipients.is_empty() {
            return Err(NotifyError::invalid_config(
                ChannelKind::Email,
                "`to` must be an address or a list of addresses",
            ));
        }
        for to in &recipients {
            if to.parse::<lettre::message::Mailbox>().is_err() {
                return Err(NotifyError::invalid_config(
                    ChannelKind::Email,
                    format!("invalid address {}", to),
                ));
            }
        }
        Ok(())
    }
}
