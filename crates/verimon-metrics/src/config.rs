use crate::alert::AlertRule;
use crate::collector::{is_valid_metric_name, MetricType, DEFAULT_MAX_SERIES, DEFAULT_SERIES_CAPACITY};
use crate::engine::DEFAULT_MAX_ALERT_AGE_SECS;
use crate::error::{MonitorError, Result};
use crate::exporter::DEFAULT_NAMESPACE;
use crate::history::DEFAULT_HISTORY_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::Path;
use verimon_notify::ChannelsConfig;

/// 指标族声明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDescriptor {
    pub name: String,

    #[serde(rename = "type")]
    pub metric_type: MetricType,

    #[serde(default)]
    pub help: String,
}

/// 监控服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// 规则评估间隔（秒）
    #[serde(default = "default_evaluation_interval_secs")]
    pub evaluation_interval_secs: u64,

    /// 升级检查间隔（秒）
    #[serde(default = "default_escalation_interval_secs")]
    pub escalation_interval_secs: u64,

    /// 冷却记录清理间隔（秒）
    #[serde(default = "default_cooldown_cleanup_interval_secs")]
    pub cooldown_cleanup_interval_secs: u64,

    /// 健康检查间隔（秒）
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,

    /// 系统指标采样间隔（秒）
    #[serde(default = "default_system_sample_interval_secs")]
    pub system_sample_interval_secs: u64,

    /// 每个序列保留的样本数
    #[serde(default = "default_series_capacity")]
    pub series_capacity: usize,

    #[serde(default = "default_max_series")]
    pub max_series: usize,

    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// 未解决告警的最长存活时间（秒）
    #[serde(default = "default_max_alert_age_secs")]
    pub max_alert_age_secs: u64,

    #[serde(default = "default_exporter_namespace")]
    pub exporter_namespace: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub metrics: Vec<MetricDescriptor>,

    #[serde(default)]
    pub rules: Vec<AlertRule>,

    #[serde(default)]
    pub channels: ChannelsConfig,
}

fn default_evaluation_interval_secs() -> u64 {
    30
}

fn default_escalation_interval_secs() -> u64 {
    60
}

fn default_cooldown_cleanup_interval_secs() -> u64 {
    60
}

fn default_health_interval_secs() -> u64 {
    30
}

fn default_system_sample_interval_secs() -> u64 {
    15
}

fn default_series_capacity() -> usize {
    DEFAULT_SERIES_CAPACITY
}

fn default_max_series() -> usize {
    DEFAULT_MAX_SERIES
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_max_alert_age_secs() -> u64 {
    DEFAULT_MAX_ALERT_AGE_SECS
}

fn default_exporter_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl MonitorConfig {
    /// 从文件加载配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("evaluation_interval_secs", self.evaluation_interval_secs),
            ("escalation_interval_secs", self.escalation_interval_secs),
            ("cooldown_cleanup_interval_secs", self.cooldown_cleanup_interval_secs),
            ("health_interval_secs", self.health_interval_secs),
            ("system_sample_interval_secs", self.system_sample_interval_secs),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(MonitorError::Config(format!("{} must be positive", name)));
            }
        }

        if !is_valid_metric_name(&self.exporter_namespace) {
            return Err(MonitorError::Config(format!(
                "invalid exporter namespace: {:?}",
                self.exporter_namespace
            )));
        }

        Ok(())
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_secs: default_evaluation_interval_secs(),
            escalation_interval_secs: default_escalation_interval_secs(),
            cooldown_cleanup_interval_secs: default_cooldown_cleanup_interval_secs(),
            health_interval_secs: default_health_interval_secs(),
            system_sample_interval_secs: default_system_sample_interval_secs(),
            series_capacity: default_series_capacity(),
            max_series: default_max_series(),
            history_capacity: default_history_capacity(),
            max_alert_age_secs: default_max_alert_age_secs(),
            exporter_namespace: default_exporter_namespace(),
            log_level: default_log_level(),
            metrics: Vec::new(),
            rules: Vec::new(),
            channels: ChannelsConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::Comparison;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_file() {
        let config: MonitorConfig = toml::from_str("").unwrap();
        assert_eq!(config.evaluation_interval_secs, 30);
        assert_eq!(config.max_alert_age_secs, 86_400);
        assert_eq!(config.exporter_namespace, "verimon");
        assert!(config.rules.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            evaluation_interval_secs = 10
            log_level = "debug"

            [[metrics]]
            name = "error_rate"
            type = "gauge"
            help = "Ratio of failed requests"

            [[rules]]
            id = "R1"
            name = "High Error Rate"
            metric = "error_rate"
            condition = ">"
            threshold = 0.1
            severity = "warning"

            [channels]
            http_timeout_secs = 5
            "#
        )
        .unwrap();

        let config = MonitorConfig::load(file.path()).unwrap();
        assert_eq!(config.evaluation_interval_secs, 10);
        assert_eq!(config.metrics[0].metric_type, MetricType::Gauge);
        assert_eq!(config.rules[0].condition, Comparison::GreaterThan);
        assert_eq!(config.channels.http_timeout_secs, 5);
    }

    #[test]
    fn test_invalid_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "health_interval_secs = 0").unwrap();
        assert!(matches!(
            MonitorConfig::load(file.path()),
            Err(MonitorError::Config(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "rules = \"not a list\"").unwrap();
        assert!(matches!(
            MonitorConfig::load(file.path()),
            Err(MonitorError::Config(_))
        ));

        assert!(matches!(
            MonitorConfig::load("/nonexistent/monitor.toml"),
            Err(MonitorError::Io(_))
        ));
    }
}
