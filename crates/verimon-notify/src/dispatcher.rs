use crate::config::ChannelsConfig;
use crate::error::NotifyError;
use crate::message::{AlertAction, ChannelKind, NotifyMessage};
use crate::notifier::Notifier;
use crate::providers::{EmailNotifier, LogNotifier, PagerDutyNotifier, SlackNotifier, WebhookNotifier};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 派发统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub sent: u64,
    pub failed: u64,
    pub dropped: u64,
}

impl DispatchStats {
    pub fn attempted(&self) -> u64 {
        self.sent + self.failed
    }

    pub fn failure_ratio(&self) -> f64 {
        match self.attempted() {
            0 => 0.0,
            n => self.failed as f64 / n as f64,
        }
    }
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// 通知派发器
///
/// 每种渠道注册一个处理器。`dispatch` 为每个启用的动作启动一个独立任务后立即返回，
/// 投递结果只记录日志和计数，不会回写告警状态，也不重试。
pub struct Dispatcher {
    handlers: HashMap<ChannelKind, Arc<dyn Notifier>>,
    counters: Arc<Counters>,
}

impl Dispatcher {
    /// 空派发器，不含任何渠道
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// 按配置注册内置渠道
    pub fn from_config(config: &ChannelsConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()?;

        let mut dispatcher = Self::new();
        dispatcher.register(Arc::new(LogNotifier));
        dispatcher.register(Arc::new(WebhookNotifier::new(client.clone())));
        dispatcher.register(Arc::new(SlackNotifier::new(client.clone())));
        dispatcher.register(Arc::new(PagerDutyNotifier::new(client)));

        if let Some(smtp) = &config.smtp {
            dispatcher.register(Arc::new(EmailNotifier::new(smtp)?));
        }

        Ok(dispatcher)
    }

    /// 注册通知器，同类型的旧处理器会被替换
    pub fn register(&mut self, notifier: Arc<dyn Notifier>) {
        info!("Registered notifier: {}", notifier.name());
        self.handlers.insert(notifier.kind(), notifier);
    }

    pub fn supports(&self, kind: ChannelKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn channels(&self) -> Vec<ChannelKind> {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// 校验动作：渠道必须已注册，配置必须通过该渠道的校验
    pub fn validate_action(&self, action: &AlertAction) -> Result<(), NotifyError> {
        let handler = self
            .handlers
            .get(&action.kind)
            .ok_or(NotifyError::UnsupportedChannel(action.kind))?;
        handler.validate(&action.config)
    }

    /// 派发通知，返回启动的投递任务数
    pub fn dispatch(&self, message: NotifyMessage, actions: &[AlertAction]) -> usize {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No async runtime available, dropping notification: {}", message.title);
                let enabled = actions.iter().filter(|a| a.enabled).count();
                self.counters
                    .dropped
                    .fetch_add(enabled as u64, Ordering::Relaxed);
                return 0;
            }
        };

        let message = Arc::new(message);
        let mut spawned = 0;

        for action in actions.iter().filter(|a| a.enabled) {
            let Some(handler) = self.handlers.get(&action.kind).cloned() else {
                warn!("No handler for channel {}, action skipped", action.kind);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            };

            let message = Arc::clone(&message);
            let config = action.config.clone();
            let counters = Arc::clone(&self.counters);

            runtime.spawn(async move {
                match handler.send(&message, &config).await {
                    Ok(result) if result.success => {
                        counters.sent.fetch_add(1, Ordering::Relaxed);
                        debug!("Notification sent via {}: {}", handler.name(), message.title);
                    }
                    Ok(result) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        error!("Notification failed via {}: {}", handler.name(), result.message);
                    }
                    Err(e) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        error!("Notification error via {}: {}", handler.name(), e);
                    }
                }
            });
            spawned += 1;
        }

        spawned
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            sent: self.counters.sent.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
