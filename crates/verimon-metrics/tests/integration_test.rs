use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use verimon_metrics::{
    AlertEngine, AlertRule, AlertSeverity, AlertStatus, Comparison, EscalationLevel,
    EscalationOutcome, EscalationPolicy, Exporter, FnProbe, HealthStatus, Labels, MetricType,
    MetricsCollector, MonitorConfig, MonitorService, ProbeReport,
};
use verimon_notify::{
    ActionConfig, AlertAction, ChannelKind, Dispatcher, Notifier, NotifyLevel, NotifyMessage,
    NotifyResult,
};

/// 把收到的通知转发到 channel，便于断言
struct RecordingNotifier {
    tx: mpsc::UnboundedSender<NotifyMessage>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &NotifyMessage, _config: &ActionConfig) -> anyhow::Result<NotifyResult> {
        let _ = self.tx.send(message.clone());
        Ok(NotifyResult::success())
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Log
    }
}

fn recording_dispatcher() -> (Arc<Dispatcher>, mpsc::UnboundedReceiver<NotifyMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut dispatcher = Dispatcher::new();
    dispatcher.register(Arc::new(RecordingNotifier { tx }));
    (Arc::new(dispatcher), rx)
}

fn engine_with(dispatcher: Arc<Dispatcher>) -> Arc<AlertEngine> {
    let collector = Arc::new(MetricsCollector::default());
    collector
        .describe("error_rate", MetricType::Gauge, "Ratio of failed requests")
        .unwrap();
    Arc::new(AlertEngine::new(collector, dispatcher))
}

fn error_rate_rule() -> AlertRule {
    AlertRule::new(
        "R1",
        "High Error Rate",
        "error_rate",
        Comparison::GreaterThan,
        0.10,
        AlertSeverity::Warning,
    )
    .with_cooldown(300)
    .with_action(AlertAction::new(ChannelKind::Log))
}

async fn drain(rx: &mut mpsc::UnboundedReceiver<NotifyMessage>) -> Vec<NotifyMessage> {
    // 派发是异步的，给投递任务一点时间
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}

#[tokio::test]
async fn test_error_rate_scenario() {
    let (dispatcher, mut rx) = recording_dispatcher();
    let engine = engine_with(dispatcher);
    engine.add_rule(error_rate_rule()).await.unwrap();

    let labels = Labels::new();
    let t0 = Utc::now();

    engine
        .collector()
        .record_at("error_rate", MetricType::Gauge, 0.05, &labels, t0);
    engine.evaluate_at(t0).await;
    assert!(engine.get_active_alerts().await.is_empty());
    assert!(drain(&mut rx).await.is_empty());

    let t1 = t0 + Duration::seconds(30);
    engine
        .collector()
        .record_at("error_rate", MetricType::Gauge, 0.15, &labels, t1);
    engine.evaluate_at(t1).await;

    let alerts = engine.get_active_alerts().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, AlertSeverity::Warning);
    assert_eq!(alerts[0].status, AlertStatus::Active);

    let sent = drain(&mut rx).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].level, NotifyLevel::Warning);

    let t2 = t1 + Duration::seconds(30);
    engine
        .collector()
        .record_at("error_rate", MetricType::Gauge, 0.20, &labels, t2);
    engine.evaluate_at(t2).await;

    let alerts = engine.get_active_alerts().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].occurrence_count, 2);
    assert!(drain(&mut rx).await.is_empty());
}

#[tokio::test]
async fn test_resolve_appears_in_history_and_exposition() {
    let (dispatcher, _rx) = recording_dispatcher();
    let engine = engine_with(dispatcher);
    engine.add_rule(error_rate_rule()).await.unwrap();

    let now = Utc::now();
    engine
        .collector()
        .record_at("error_rate", MetricType::Gauge, 0.5, &Labels::new(), now);
    engine.evaluate_at(now).await;

    let id = engine.get_active_alerts().await[0].id.clone();
    engine.acknowledge_alert(&id).await.unwrap();
    engine.resolve_alert(&id, "provider recovered").await.unwrap();

    assert!(engine.get_active_alerts().await.is_empty());
    let history = engine.get_alert_history(10).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].alert_id, id);
    assert!(history[0].resolved);

    let text = Exporter::new(engine.collector().clone())
        .with_alerts(engine.clone())
        .render()
        .await;
    assert!(text.contains("# TYPE error_rate gauge"));
    assert!(text.contains("verimon_alerts{status=\"active\"} 0"));
    assert!(text.contains("verimon_alerts{status=\"resolved\"} 1"));
    assert!(text.contains("verimon_alert_history_entries 1"));
}

#[tokio::test]
async fn test_escalation_notifies_each_level_until_cap() {
    let (dispatcher, mut rx) = recording_dispatcher();
    let engine = engine_with(dispatcher);

    let level = |n: u32, severity| EscalationLevel {
        level: n,
        name: format!("tier-{}", n),
        severity,
        delay_secs: 60,
        actions: vec![AlertAction::new(ChannelKind::Log)],
    };
    let rule = error_rate_rule().with_escalation(EscalationPolicy {
        levels: vec![
            level(1, AlertSeverity::Error),
            level(2, AlertSeverity::Critical),
            level(3, AlertSeverity::Critical),
        ],
        auto_escalate: true,
        max_escalations: Some(2),
    });
    engine.add_rule(rule).await.unwrap();

    let t0 = Utc::now();
    engine
        .collector()
        .record_at("error_rate", MetricType::Gauge, 0.5, &Labels::new(), t0);
    engine.evaluate_at(t0).await;
    assert_eq!(drain(&mut rx).await.len(), 1);

    for minutes in 1..=5 {
        engine.check_escalations_at(t0 + Duration::minutes(minutes)).await;
    }

    let alert = &engine.get_active_alerts().await[0];
    assert_eq!(alert.escalation_level, 2);
    assert_eq!(alert.severity, AlertSeverity::Critical);

    let sent = drain(&mut rx).await;
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].level, NotifyLevel::Critical);

    assert_eq!(
        engine.escalate_alert(&alert.id).await.unwrap(),
        EscalationOutcome::AtMaximum
    );
}

#[tokio::test]
async fn test_service_health_and_exposition() {
    let mut config = MonitorConfig::default();
    config.exporter_namespace = "llmv".to_string();

    let service = MonitorService::new(config).await.unwrap();
    service.health().register(Arc::new(FnProbe::new("database", || {
        Ok(ProbeReport::degraded("replication lag"))
    })));

    let health = service.health().clone();
    let status = tokio::task::spawn_blocking(move || health.run_checks())
        .await
        .unwrap();
    assert!(status >= HealthStatus::Degraded);

    let names: Vec<String> = service
        .health()
        .components()
        .into_iter()
        .map(|c| c.name)
        .collect();
    for expected in ["database", "metrics_collector", "notifications", "system"] {
        assert!(names.iter().any(|n| n == expected), "missing {}", expected);
    }

    let text = service.exporter().render().await;
    assert!(text.contains("llmv_alerts_by_severity{severity=\"warning\"} 0"));
}

/// 按文本格式还原转义过的标签值
fn unescape_label_value(escaped: &str) -> String {
    let mut out = String::new();
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// 解析 `k="v",...`，值内的转义引号不会截断
fn parse_labels(body: &str) -> Vec<(String, String)> {
    let mut labels = Vec::new();
    let mut rest = body;
    while let Some((key, tail)) = rest.split_once("=\"") {
        let mut end = None;
        let mut escaped = false;
        for (i, c) in tail.char_indices() {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => {
                    end = Some(i);
                    break;
                }
                _ => {}
            }
        }
        let end = end.expect("unterminated label value");
        labels.push((key.to_string(), unescape_label_value(&tail[..end])));
        rest = tail[end + 1..].trim_start_matches(',');
    }
    labels
}

#[test]
fn test_exposition_lines_parse_back() {
    let collector = Arc::new(MetricsCollector::default());
    let originals = [
        ("path", "C:\\temp\\logs\\n"),
        ("provider", "open\"ai"),
        ("region", "eu\nwest"),
    ];
    let labels = verimon_metrics::label_set(&originals);
    collector.record_counter("requests_total", 3.0, &labels);
    collector.record_counter("requests_total", 2.0, &labels);

    let text = Exporter::new(collector).render_metrics();
    let line = text
        .lines()
        .find(|l| l.starts_with("requests_total{"))
        .unwrap();

    let (series, rest) = line.rsplit_once("} ").unwrap();
    let mut fields = rest.split(' ');
    assert_eq!(fields.next(), Some("5"));
    let millis: i64 = fields.next().unwrap().parse().unwrap();
    assert!((Utc::now().timestamp_millis() - millis).abs() < 60_000);

    let body = series.strip_prefix("requests_total{").unwrap();
    let parsed = parse_labels(body);
    let expected: Vec<(String, String)> = originals
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    assert_eq!(parsed, expected);
}

#[test]
fn test_rule_admin_without_runtime_helpers() {
    let (dispatcher, _rx) = recording_dispatcher();
    let engine = engine_with(dispatcher);

    tokio_test::block_on(engine.add_rule(error_rate_rule())).unwrap();
    let mut updated = error_rate_rule();
    updated.threshold = 0.25;
    tokio_test::block_on(engine.update_rule(updated)).unwrap();

    let rule = tokio_test::block_on(engine.get_rule("R1")).unwrap();
    assert_eq!(rule.threshold, 0.25);
    assert!(rule.updated_at >= rule.created_at);

    tokio_test::block_on(engine.delete_rule("R1")).unwrap();
    assert!(tokio_test::block_on(engine.get_rules()).is_empty());
}
