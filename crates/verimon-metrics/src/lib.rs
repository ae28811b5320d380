pub mod alert;
pub mod collector;
pub mod config;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod exporter;
pub mod health;
pub mod history;
pub mod service;
pub mod stats;
pub mod system;

pub use alert::{
    Aggregation, Alert, AlertCounts, AlertHistoryEntry, AlertRule, AlertSeverity, AlertStatus,
    Comparison, EscalationLevel, EscalationPolicy,
};
pub use collector::{label_set, FamilySnapshot, Labels, MetricSample, MetricType, MetricsCollector, SeriesKey};
pub use config::{MetricDescriptor, MonitorConfig};
pub use engine::{AlertEngine, EvaluationSummary};
pub use error::{MonitorError, Result};
pub use escalation::{EscalationOutcome, EscalationSummary};
pub use exporter::Exporter;
pub use health::{
    CollectorProbe, ComponentHealth, FnProbe, HealthAggregator, HealthProbe, HealthReport,
    HealthStatus, NotificationProbe, ProbeReport, SystemProbe,
};
pub use history::AlertHistory;
pub use service::{MonitorService, MonitorTaskHandle};
pub use stats::MetricStats;
pub use system::{SystemSampler, SystemSnapshot};
