use crate::alert::{AlertCounts, AlertSeverity, AlertStatus};
use crate::collector::{FamilySnapshot, Labels, MetricsCollector};
use crate::engine::AlertEngine;
use chrono::Utc;
use std::fmt::Write;
use std::sync::Arc;

pub const DEFAULT_NAMESPACE: &str = "verimon";

/// 文本导出器（Prometheus exposition 格式）
pub struct Exporter {
    collector: Arc<MetricsCollector>,
    engine: Option<Arc<AlertEngine>>,
    namespace: String,
}

impl Exporter {
    pub fn new(collector: Arc<MetricsCollector>) -> Self {
        Self {
            collector,
            engine: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// 附加告警统计指标
    pub fn with_alerts(mut self, engine: Arc<AlertEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// 只导出收集器中的指标
    pub fn render_metrics(&self) -> String {
        let mut out = String::new();
        render_families(&self.collector.snapshot(), &mut out);
        out
    }

    /// 导出全部指标和告警统计
    pub async fn render(&self) -> String {
        let mut out = self.render_metrics();
        if let Some(engine) = &self.engine {
            let counts = engine.alert_counts().await;
            render_alert_counts(&self.namespace, &counts, Utc::now().timestamp_millis(), &mut out);
        }
        out
    }
}

/// 渲染指标族，`families` 需已按名称排序、序列按标签排序
pub fn render_families(families: &[FamilySnapshot], out: &mut String) {
    for family in families {
        let help = family.help.as_deref().unwrap_or(&family.name);
        let _ = writeln!(out, "# HELP {} {}", family.name, escape_help(help));
        let _ = writeln!(out, "# TYPE {} {}", family.name, family.metric_type);

        for sample in &family.series {
            let _ = writeln!(
                out,
                "{}{} {} {}",
                family.name,
                format_labels(&sample.labels),
                format_value(sample.value),
                sample.timestamp.timestamp_millis()
            );
        }
    }
}

fn render_alert_counts(namespace: &str, counts: &AlertCounts, timestamp: i64, out: &mut String) {
    let alerts = format!("{}_alerts", namespace);
    let _ = writeln!(out, "# HELP {} Number of alerts by status", alerts);
    let _ = writeln!(out, "# TYPE {} gauge", alerts);
    for status in AlertStatus::ALL {
        let _ = writeln!(
            out,
            "{}{{status=\"{}\"}} {} {}",
            alerts,
            status.as_str(),
            counts.status(status),
            timestamp
        );
    }

    let by_severity = format!("{}_alerts_by_severity", namespace);
    let _ = writeln!(out, "# HELP {} Number of open alerts by severity", by_severity);
    let _ = writeln!(out, "# TYPE {} gauge", by_severity);
    for severity in AlertSeverity::ALL {
        let _ = writeln!(
            out,
            "{}{{severity=\"{}\"}} {} {}",
            by_severity,
            severity.as_str(),
            counts.severity(severity),
            timestamp
        );
    }

    let history = format!("{}_alert_history_entries", namespace);
    let _ = writeln!(out, "# HELP {} Number of entries in the alert history", history);
    let _ = writeln!(out, "# TYPE {} gauge", history);
    let _ = writeln!(out, "{} {} {}", history, counts.history_entries, timestamp);
}

/// 标签集合，空集合不输出花括号
pub fn format_labels(labels: &Labels) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let pairs: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();
    format!("{{{}}}", pairs.join(","))
}

/// 标签值转义：反斜杠、双引号、换行
pub fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}
