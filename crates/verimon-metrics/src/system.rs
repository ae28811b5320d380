use crate::collector::{Labels, MetricType, MetricsCollector};
use parking_lot::Mutex;
use std::sync::Arc;
use sysinfo::System;
use tracing::debug;

pub const MEMORY_USED_METRIC: &str = "system_memory_used_bytes";
pub const MEMORY_USAGE_METRIC: &str = "system_memory_usage_percent";
pub const CPU_USAGE_METRIC: &str = "system_cpu_usage_percent";

/// 一次系统采样
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemSnapshot {
    pub memory_used: u64,
    pub memory_total: u64,
    pub cpu_usage_percent: f64,
}

impl SystemSnapshot {
    pub fn memory_usage_percent(&self) -> f64 {
        if self.memory_total == 0 {
            return 0.0;
        }
        self.memory_used as f64 / self.memory_total as f64 * 100.0
    }
}

/// 系统指标采样器
pub struct SystemSampler {
    system: Mutex<System>,
    metrics: Arc<MetricsCollector>,
}

impl SystemSampler {
    pub fn new(metrics: Arc<MetricsCollector>) -> Self {
        let _ = metrics.describe(MEMORY_USED_METRIC, MetricType::Gauge, "Used system memory in bytes");
        let _ = metrics.describe(MEMORY_USAGE_METRIC, MetricType::Gauge, "Used system memory in percent");
        let _ = metrics.describe(CPU_USAGE_METRIC, MetricType::Gauge, "Global CPU usage in percent");

        Self {
            system: Mutex::new(System::new()),
            metrics,
        }
    }

    /// 刷新并返回当前系统状态，不写入指标
    pub fn snapshot(&self) -> SystemSnapshot {
        let mut system = self.system.lock();
        system.refresh_memory();
        system.refresh_cpu();

        SystemSnapshot {
            memory_used: system.used_memory(),
            memory_total: system.total_memory(),
            cpu_usage_percent: system.global_cpu_info().cpu_usage() as f64,
        }
    }

    /// 采样并写入系统指标
    pub fn sample(&self) -> SystemSnapshot {
        let snapshot = self.snapshot();
        let labels = Labels::new();

        self.metrics
            .record_gauge(MEMORY_USED_METRIC, snapshot.memory_used as f64, &labels);
        self.metrics
            .record_gauge(MEMORY_USAGE_METRIC, snapshot.memory_usage_percent(), &labels);
        self.metrics
            .record_gauge(CPU_USAGE_METRIC, snapshot.cpu_usage_percent, &labels);

        debug!(
            "System metrics updated: CPU={:.2}%, Memory={}MB",
            snapshot.cpu_usage_percent,
            snapshot.memory_used / 1024 / 1024
        );
        snapshot
    }
}
