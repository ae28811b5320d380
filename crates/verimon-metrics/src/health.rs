use crate::collector::MetricsCollector;
use crate::system::SystemSampler;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use verimon_notify::Dispatcher;

/// 健康状态，按严重程度排序
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// 健康
    Healthy,
    /// 降级
    Degraded,
    /// 不健康
    Unhealthy,
}

impl HealthStatus {
    /// 从使用率判断健康状态
    pub fn from_usage_percent(usage: f64) -> Self {
        if usage >= 95.0 {
            HealthStatus::Unhealthy
        } else if usage >= 85.0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    /// 整体状态：取最严重的组件状态，没有组件时为健康
    pub fn worst<I: IntoIterator<Item = HealthStatus>>(statuses: I) -> Self {
        statuses.into_iter().max().unwrap_or(HealthStatus::Healthy)
    }
}

/// 探针返回的检查结果
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub status: HealthStatus,
    pub message: String,
    pub details: HashMap<String, serde_json::Value>,
    /// 探针自行测量的响应时间，未提供时由聚合器计时
    pub response_time: Option<Duration>,
}

impl ProbeReport {
    pub fn new(status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: HashMap::new(),
            response_time: None,
        }
    }

    pub fn healthy(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Healthy, message)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Degraded, message)
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Unhealthy, message)
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn with_response_time(mut self, response_time: Duration) -> Self {
        self.response_time = Some(response_time);
        self
    }
}

/// 组件健康状态，每轮检查覆盖，不保留历史
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
    pub last_checked: DateTime<Utc>,
    pub response_time_ms: u64,
    pub details: HashMap<String, serde_json::Value>,
}

/// 健康报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: Vec<ComponentHealth>,
    pub uptime_secs: i64,
    pub checked_at: DateTime<Utc>,
}

/// 健康探针
pub trait HealthProbe: Send + Sync {
    fn name(&self) -> &str;

    /// 执行检查；返回错误或 panic 都会记为不健康
    fn check(&self) -> anyhow::Result<ProbeReport>;
}

/// 健康聚合器
pub struct HealthAggregator {
    probes: RwLock<Vec<Arc<dyn HealthProbe>>>,
    components: RwLock<BTreeMap<String, ComponentHealth>>,
    started_at: DateTime<Utc>,
}

impl HealthAggregator {
    pub fn new() -> Self {
        Self {
            probes: RwLock::new(Vec::new()),
            components: RwLock::new(BTreeMap::new()),
            started_at: Utc::now(),
        }
    }

    /// 注册探针，同名探针会被替换
    pub fn register(&self, probe: Arc<dyn HealthProbe>) {
        let mut probes = self.probes.write();
        probes.retain(|p| p.name() != probe.name());
        info!("Registered health probe: {}", probe.name());
        probes.push(probe);
    }

    /// 运行所有探针并返回整体状态
    pub fn run_checks(&self) -> HealthStatus {
        let probes: Vec<Arc<dyn HealthProbe>> = self.probes.read().clone();

        let results: Vec<ComponentHealth> = probes.iter().map(|probe| run_probe(probe.as_ref())).collect();

        let mut components = self.components.write();
        for component in results {
            if !component.status.is_healthy() {
                warn!(
                    component = %component.name,
                    "Component {}: {}",
                    component.status.as_str(),
                    component.message
                );
            }
            components.insert(component.name.clone(), component);
        }

        HealthStatus::worst(components.values().map(|c| c.status))
    }

    pub fn overall_status(&self) -> HealthStatus {
        HealthStatus::worst(self.components.read().values().map(|c| c.status))
    }

    /// 最近一次检查的组件状态，按名称排序
    pub fn components(&self) -> Vec<ComponentHealth> {
        self.components.read().values().cloned().collect()
    }

    pub fn component(&self, name: &str) -> Option<ComponentHealth> {
        self.components.read().get(name).cloned()
    }

    pub fn report(&self) -> HealthReport {
        let components = self.components();
        let now = Utc::now();
        HealthReport {
            status: HealthStatus::worst(components.iter().map(|c| c.status)),
            components,
            uptime_secs: (now - self.started_at).num_seconds(),
            checked_at: now,
        }
    }
}

impl Default for HealthAggregator {
    fn default() -> Self {
        Self::new()
    }
}

fn run_probe(probe: &dyn HealthProbe) -> ComponentHealth {
    let started = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| probe.check()));
    let measured = started.elapsed();

    let report = match outcome {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => ProbeReport::unhealthy(format!("check failed: {:#}", e)),
        Err(payload) => ProbeReport::unhealthy(format!("check panicked: {}", panic_message(&*payload))),
    };

    ComponentHealth {
        name: probe.name().to_string(),
        status: report.status,
        message: report.message,
        last_checked: Utc::now(),
        response_time_ms: report.response_time.unwrap_or(measured).as_millis() as u64,
        details: report.details,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// 闭包探针
pub struct FnProbe<F> {
    name: String,
    check: F,
}

impl<F> FnProbe<F>
where
    F: Fn() -> anyhow::Result<ProbeReport> + Send + Sync,
{
    pub fn new(name: impl Into<String>, check: F) -> Self {
        Self {
            name: name.into(),
            check,
        }
    }
}

impl<F> HealthProbe for FnProbe<F>
where
    F: Fn() -> anyhow::Result<ProbeReport> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self) -> anyhow::Result<ProbeReport> {
        (self.check)()
    }
}

/// 系统内存探针
pub struct SystemProbe {
    sampler: Arc<SystemSampler>,
}

impl SystemProbe {
    pub fn new(sampler: Arc<SystemSampler>) -> Self {
        Self { sampler }
    }
}

impl HealthProbe for SystemProbe {
    fn name(&self) -> &str {
        "system"
    }

    fn check(&self) -> anyhow::Result<ProbeReport> {
        let snapshot = self.sampler.snapshot();
        if snapshot.memory_total == 0 {
            anyhow::bail!("total memory reported as zero");
        }

        let usage = snapshot.memory_usage_percent();
        Ok(ProbeReport::new(
            HealthStatus::from_usage_percent(usage),
            format!("memory usage {:.1}%", usage),
        )
        .with_detail("memory_used_bytes", snapshot.memory_used)
        .with_detail("memory_total_bytes", snapshot.memory_total)
        .with_detail("cpu_usage_percent", snapshot.cpu_usage_percent))
    }
}

/// 指标收集器探针：序列数占上限的比例
pub struct CollectorProbe {
    collector: Arc<MetricsCollector>,
}

impl CollectorProbe {
    pub fn new(collector: Arc<MetricsCollector>) -> Self {
        Self { collector }
    }
}

impl HealthProbe for CollectorProbe {
    fn name(&self) -> &str {
        "metrics_collector"
    }

    fn check(&self) -> anyhow::Result<ProbeReport> {
        let series = self.collector.series_count();
        let max = self.collector.max_series();
        let usage = series as f64 / max as f64 * 100.0;

        Ok(ProbeReport::new(
            HealthStatus::from_usage_percent(usage),
            format!("{} of {} series in use", series, max),
        )
        .with_detail("series", series)
        .with_detail("max_series", max)
        .with_detail("dropped_samples", self.collector.dropped_samples()))
    }
}

/// 通知派发探针：渠道注册情况和投递失败率
pub struct NotificationProbe {
    dispatcher: Arc<Dispatcher>,
}

impl NotificationProbe {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl HealthProbe for NotificationProbe {
    fn name(&self) -> &str {
        "notifications"
    }

    fn check(&self) -> anyhow::Result<ProbeReport> {
        let channels: Vec<&str> = self.dispatcher.channels().iter().map(|c| c.as_str()).collect();
        let stats = self.dispatcher.stats();
        let ratio = stats.failure_ratio();

        let report = if channels.is_empty() {
            ProbeReport::degraded("no notification channels registered")
        } else if stats.attempted() > 0 && ratio >= 0.5 {
            ProbeReport::unhealthy(format!("{:.0}% of deliveries failed", ratio * 100.0))
        } else if ratio > 0.0 {
            ProbeReport::degraded(format!("{} deliveries failed", stats.failed))
        } else {
            ProbeReport::healthy(format!("{} channels registered", channels.len()))
        };

        Ok(report
            .with_detail("channels", json!(channels))
            .with_detail("sent", stats.sent)
            .with_detail("failed", stats.failed)
            .with_detail("dropped", stats.dropped))
    }
}
