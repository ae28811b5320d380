pub mod config;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod notifier;
pub mod providers;

pub use config::{ChannelsConfig, SmtpConfig};
pub use dispatcher::{DispatchStats, Dispatcher};
pub use error::NotifyError;
pub use message::{ActionConfig, AlertAction, ChannelKind, NotifyLevel, NotifyMessage};
pub use notifier::{Notifier, NotifyResult};
pub use providers::{EmailNotifier, LogNotifier, PagerDutyNotifier, SlackNotifier, WebhookNotifier};
