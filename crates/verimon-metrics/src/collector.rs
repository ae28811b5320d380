use crate::error::{MonitorError, Result};
use crate::stats::MetricStats;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// 标签集合，使用有序 map 保证同一组标签只有一种表示
pub type Labels = BTreeMap<String, String>;

/// 由键值对构造标签集合
pub fn label_set(pairs: &[(&str, &str)]) -> Labels {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub const DEFAULT_SERIES_CAPACITY: usize = 1000;
pub const DEFAULT_MAX_SERIES: usize = 10_000;

/// 指标类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    Summary,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Histogram => "histogram",
            MetricType::Summary => "summary",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个样本，写入后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    pub metric_type: MetricType,
    pub value: f64,
    pub labels: Labels,
    pub timestamp: DateTime<Utc>,
}

/// 序列键：指标名 + 标签集合
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    pub name: String,
    pub labels: Labels,
}

impl SeriesKey {
    pub fn new(name: impl Into<String>, labels: Labels) -> Self {
        Self {
            name: name.into(),
            labels,
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.labels.is_empty() {
            let pairs: Vec<String> = self
                .labels
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, "{{{}}}", pairs.join(","))?;
        }
        Ok(())
    }
}

/// 指标族的导出快照
#[derive(Debug, Clone)]
pub struct FamilySnapshot {
    pub name: String,
    pub metric_type: MetricType,
    pub help: Option<String>,
    /// 每个序列的最新样本，按标签排序
    pub series: Vec<MetricSample>,
}

struct MetricFamily {
    metric_type: MetricType,
    help: Option<String>,
}

#[derive(Default)]
struct Inner {
    families: HashMap<String, MetricFamily>,
    series: HashMap<SeriesKey, VecDeque<MetricSample>>,
}

/// 指标收集器
///
/// 按 名称+标签 保存有界的样本序列（FIFO 淘汰）。写入只持有内存锁，不会失败；
/// 不合法的样本会被丢弃并记录日志。所有读取都返回副本。
pub struct MetricsCollector {
    inner: RwLock<Inner>,
    series_capacity: usize,
    max_series: usize,
    dropped: AtomicU64,
}

impl MetricsCollector {
    pub fn new(series_capacity: usize, max_series: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            series_capacity: series_capacity.max(1),
            max_series: max_series.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// 声明指标族（类型和说明）
    pub fn describe(&self, name: &str, metric_type: MetricType, help: &str) -> Result<()> {
        if !is_valid_metric_name(name) {
            return Err(MonitorError::invalid_metric(name, "not a valid exposition name"));
        }

        let mut inner = self.inner.write();
        let family = inner
            .families
            .entry(name.to_string())
            .or_insert_with(|| MetricFamily {
                metric_type,
                help: None,
            });

        if family.metric_type != metric_type {
            return Err(MonitorError::invalid_metric(
                name,
                format!(
                    "already registered as {}, cannot redeclare as {}",
                    family.metric_type, metric_type
                ),
            ));
        }

        family.help = Some(help.to_string());
        Ok(())
    }

    /// 计数器：新值 = 上一个值 + 增量
    pub fn record_counter(&self, name: &str, delta: f64, labels: &Labels) {
        self.record_at(name, MetricType::Counter, delta, labels, Utc::now());
    }

    /// 仪表：直接替换
    pub fn record_gauge(&self, name: &str, value: f64, labels: &Labels) {
        self.record_at(name, MetricType::Gauge, value, labels, Utc::now());
    }

    /// 直方图：每个观测值独立追加
    pub fn record_histogram(&self, name: &str, value: f64, labels: &Labels) {
        self.record_at(name, MetricType::Histogram, value, labels, Utc::now());
    }

    pub fn record_summary(&self, name: &str, value: f64, labels: &Labels) {
        self.record_at(name, MetricType::Summary, value, labels, Utc::now());
    }

    /// 以指定时间戳写入样本
    pub fn record_at(
        &self,
        name: &str,
        metric_type: MetricType,
        value: f64,
        labels: &Labels,
        timestamp: DateTime<Utc>,
    ) {
        if !is_valid_metric_name(name) {
            self.drop_sample(name, "invalid metric name");
            return;
        }
        if let Some(key) = labels.keys().find(|k| !is_valid_label_name(k)) {
            self.drop_sample(name, &format!("invalid label name {:?}", key));
            return;
        }
        if !value.is_finite() {
            self.drop_sample(name, "non-finite value");
            return;
        }
        if metric_type == MetricType::Counter && value < 0.0 {
            self.drop_sample(name, "negative counter delta");
            return;
        }

        let mut inner = self.inner.write();

        match inner.families.get(name).map(|f| f.metric_type) {
            Some(existing) if existing != metric_type => {
                drop(inner);
                self.drop_sample(
                    name,
                    &format!("type {} conflicts with registered {}", metric_type, existing),
                );
                return;
            }
            Some(_) => {}
            None => {
                inner.families.insert(
                    name.to_string(),
                    MetricFamily {
                        metric_type,
                        help: None,
                    },
                );
            }
        }

        let key = SeriesKey::new(name, labels.clone());
        if !inner.series.contains_key(&key) && inner.series.len() >= self.max_series {
            drop(inner);
            self.drop_sample(name, "series limit reached");
            return;
        }

        let capacity = self.series_capacity;
        let series = inner.series.entry(key).or_default();

        let stored = match metric_type {
            MetricType::Counter => series.back().map_or(0.0, |last| last.value) + value,
            _ => value,
        };

        series.push_back(MetricSample {
            name: name.to_string(),
            metric_type,
            value: stored,
            labels: labels.clone(),
            timestamp,
        });
        while series.len() > capacity {
            series.pop_front();
        }
    }

    fn drop_sample(&self, name: &str, reason: &str) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        warn!(metric = name, "Dropped metric sample: {}", reason);
    }

    /// 某个序列的最新样本
    pub fn get_latest(&self, name: &str, labels: &Labels) -> Option<MetricSample> {
        let inner = self.inner.read();
        inner
            .series
            .get(&SeriesKey::new(name, labels.clone()))
            .and_then(|series| series.back().cloned())
    }

    /// 某个序列的全部样本（副本）
    pub fn samples(&self, name: &str, labels: &Labels) -> Vec<MetricSample> {
        let inner = self.inner.read();
        inner
            .series
            .get(&SeriesKey::new(name, labels.clone()))
            .map(|series| series.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 指标在窗口内的统计（合并该名称下所有序列）
    pub fn stats(&self, name: &str, window: Duration) -> MetricStats {
        self.stats_at(name, window, Utc::now())
    }

    pub fn stats_at(&self, name: &str, window: Duration, now: DateTime<Utc>) -> MetricStats {
        let cutoff = now - window;
        let inner = self.inner.read();
        MetricStats::from_samples(
            inner
                .series
                .iter()
                .filter(|(key, _)| key.name == name)
                .flat_map(|(_, series)| series.iter())
                .filter(|s| s.timestamp >= cutoff && s.timestamp <= now),
        )
    }

    /// 按序列分别计算窗口统计，`selector` 为标签子集匹配（空表示全部）
    pub fn series_stats(
        &self,
        name: &str,
        selector: &Labels,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Vec<(Labels, MetricStats)> {
        let cutoff = now - window;
        let inner = self.inner.read();

        let mut result: Vec<(Labels, MetricStats)> = inner
            .series
            .iter()
            .filter(|(key, _)| key.name == name && labels_match(selector, &key.labels))
            .map(|(key, series)| {
                let stats = MetricStats::from_samples(
                    series
                        .iter()
                        .filter(|s| s.timestamp >= cutoff && s.timestamp <= now),
                );
                (key.labels.clone(), stats)
            })
            .collect();

        result.sort_by(|a, b| a.0.cmp(&b.0));
        debug!(metric = name, series = result.len(), "Computed series stats");
        result
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.inner.read().families.contains_key(name)
    }

    pub fn metric_type(&self, name: &str) -> Option<MetricType> {
        self.inner.read().families.get(name).map(|f| f.metric_type)
    }

    /// 所有指标族的最新值快照，按名称排序
    pub fn snapshot(&self) -> Vec<FamilySnapshot> {
        let inner = self.inner.read();

        let mut families: Vec<FamilySnapshot> = inner
            .families
            .iter()
            .map(|(name, family)| FamilySnapshot {
                name: name.clone(),
                metric_type: family.metric_type,
                help: family.help.clone(),
                series: Vec::new(),
            })
            .collect();
        families.sort_by(|a, b| a.name.cmp(&b.name));

        let mut latest: Vec<(&SeriesKey, &MetricSample)> = inner
            .series
            .iter()
            .filter_map(|(key, series)| series.back().map(|s| (key, s)))
            .collect();
        latest.sort_by(|a, b| a.0.cmp(b.0));

        for (key, sample) in latest {
            if let Ok(idx) = families.binary_search_by(|f| f.name.as_str().cmp(key.name.as_str())) {
                families[idx].series.push(sample.clone());
            }
        }

        families
    }

    pub fn series_count(&self) -> usize {
        self.inner.read().series.len()
    }

    pub fn max_series(&self) -> usize {
        self.max_series
    }

    pub fn series_capacity(&self) -> usize {
        self.series_capacity
    }

    /// 被丢弃的样本总数
    pub fn dropped_samples(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(DEFAULT_SERIES_CAPACITY, DEFAULT_MAX_SERIES)
    }
}

/// 标签子集匹配
pub fn labels_match(selector: &Labels, labels: &Labels) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.get(k).map_or(false, |actual| actual == v))
}

/// 导出格式要求的指标名：`[a-zA-Z_:][a-zA-Z0-9_:]*`
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// 标签名只允许 `[a-zA-Z_][a-zA-Z0-9_]*`
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_gauge_latest_wins() {
        let collector = MetricsCollector::default();
        let labels = label_set(&[("provider", "openai")]);

        for v in [3.0, 1.0, 7.5, 2.25] {
            collector.record_gauge("active_connections", v, &labels);
        }

        let latest = collector.get_latest("active_connections", &labels).unwrap();
        assert_eq!(latest.value, 2.25);
        assert_eq!(latest.metric_type, MetricType::Gauge);
    }

    #[test]
    fn test_counter_accumulates() {
        let collector = MetricsCollector::default();
        let labels = label_set(&[("provider", "openai"), ("type", "timeout")]);

        let deltas = [1.0, 2.0, 0.5, 10.0];
        for d in deltas {
            collector.record_counter("errors_total", d, &labels);
        }

        let latest = collector.get_latest("errors_total", &labels).unwrap();
        assert_eq!(latest.value, deltas.iter().sum::<f64>());
    }

    #[test]
    fn test_label_order_irrelevant() {
        let collector = MetricsCollector::default();
        let mut a = Labels::new();
        a.insert("b".into(), "2".into());
        a.insert("a".into(), "1".into());

        collector.record_gauge("memory_usage", 1.0, &a);
        let b = label_set(&[("a", "1"), ("b", "2")]);
        assert_eq!(collector.get_latest("memory_usage", &b).unwrap().value, 1.0);
        assert_eq!(collector.series_count(), 1);
    }

    #[test]
    fn test_series_capacity_fifo() {
        let collector = MetricsCollector::new(5, 100);
        let labels = Labels::new();

        for i in 0..12 {
            collector.record_histogram("request_duration", i as f64, &labels);
        }

        let samples = collector.samples("request_duration", &labels);
        assert_eq!(samples.len(), 5);
        assert_eq!(samples[0].value, 7.0);
        assert_eq!(samples[4].value, 11.0);
    }

    #[test]
    fn test_series_limit() {
        let collector = MetricsCollector::new(10, 2);
        collector.record_gauge("g", 1.0, &label_set(&[("k", "a")]));
        collector.record_gauge("g", 1.0, &label_set(&[("k", "b")]));
        collector.record_gauge("g", 1.0, &label_set(&[("k", "c")]));
        // 已存在的序列仍可写入
        collector.record_gauge("g", 2.0, &label_set(&[("k", "a")]));

        assert_eq!(collector.series_count(), 2);
        assert_eq!(collector.dropped_samples(), 1);
        assert_eq!(
            collector.get_latest("g", &label_set(&[("k", "a")])).unwrap().value,
            2.0
        );
    }

    #[test]
    fn test_invalid_samples_dropped() {
        let collector = MetricsCollector::default();
        let labels = Labels::new();

        collector.record_gauge("bad name", 1.0, &labels);
        collector.record_gauge("nan_gauge", f64::NAN, &labels);
        collector.record_counter("requests_total", -1.0, &labels);
        collector.record_gauge("requests_total", 1.0, &labels);
        collector.record_counter("requests_total", 1.0, &labels);
        // gauge 已占用该名称，计数器写入被拒绝
        assert_eq!(collector.metric_type("requests_total"), Some(MetricType::Gauge));
        assert_eq!(collector.dropped_samples(), 4);
    }

    #[test]
    fn test_stats_window() {
        let collector = MetricsCollector::default();
        let labels = Labels::new();
        let now = Utc::now();

        collector.record_at("latency", MetricType::Histogram, 100.0, &labels, now - Duration::minutes(10));
        collector.record_at("latency", MetricType::Histogram, 1.0, &labels, now - Duration::seconds(30));
        collector.record_at("latency", MetricType::Histogram, 3.0, &labels, now - Duration::seconds(10));

        let stats = collector.stats_at("latency", Duration::minutes(5), now);
        assert_eq!(stats.count, 2);
        assert_eq!(stats.max, 3.0);
        assert_eq!(stats.avg, 2.0);
        assert_eq!(stats.latest, 3.0);
    }

    #[test]
    fn test_stats_no_samples() {
        let collector = MetricsCollector::default();
        let stats = collector.stats("missing", Duration::minutes(5));
        assert_eq!(stats.count, 0);
        assert!(stats.latest_time.is_none());
    }

    #[test]
    fn test_series_stats_selector() {
        let collector = MetricsCollector::default();
        let now = Utc::now();
        for (provider, v) in [("openai", 0.2), ("anthropic", 0.05)] {
            collector.record_at(
                "error_rate",
                MetricType::Gauge,
                v,
                &label_set(&[("provider", provider), ("region", "us")]),
                now,
            );
        }

        let all = collector.series_stats("error_rate", &Labels::new(), Duration::minutes(1), now);
        assert_eq!(all.len(), 2);

        let one = collector.series_stats(
            "error_rate",
            &label_set(&[("provider", "openai")]),
            Duration::minutes(1),
            now,
        );
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].1.latest, 0.2);
    }

    #[test]
    fn test_describe() {
        let collector = MetricsCollector::default();
        collector
            .describe("error_rate", MetricType::Gauge, "Ratio of failed requests")
            .unwrap();

        assert!(collector.is_known("error_rate"));
        assert!(collector
            .describe("error_rate", MetricType::Counter, "x")
            .is_err());
        assert!(collector.describe("9bad", MetricType::Gauge, "x").is_err());

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].series.is_empty());
    }

    #[test]
    fn test_concurrent_writers() {
        let collector = Arc::new(MetricsCollector::default());
        let labels = Labels::new();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let collector = Arc::clone(&collector);
                let labels = labels.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        collector.record_counter("requests_total", 1.0, &labels);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // 容量 1000 足以保留全部 800 次写入
        assert_eq!(
            collector.get_latest("requests_total", &labels).unwrap().value,
            800.0
        );
    }

    #[test]
    fn test_valid_metric_names() {
        assert!(is_valid_metric_name("http_requests_total"));
        assert!(is_valid_metric_name("ns:sub_metric"));
        assert!(!is_valid_metric_name(""));
        assert!(!is_valid_metric_name("1abc"));
        assert!(!is_valid_metric_name("with-dash"));
    }

    #[test]
    fn test_invalid_label_names_dropped() {
        let collector = MetricsCollector::default();

        collector.record_gauge("up", 1.0, &label_set(&[("bad-key\"}x", "v")]));
        collector.record_gauge("up", 1.0, &label_set(&[("ns:zone", "a")]));
        collector.record_gauge("up", 1.0, &label_set(&[("", "a")]));
        assert_eq!(collector.dropped_samples(), 3);
        assert_eq!(collector.series_count(), 0);
        assert!(!collector.is_known("up"));

        collector.record_gauge("up", 1.0, &label_set(&[("_zone", "a"), ("region2", "eu")]));
        assert_eq!(collector.series_count(), 1);

        assert!(is_valid_label_name("provider"));
        assert!(!is_valid_label_name("9lives"));
        assert!(!is_valid_label_name("a.b"));
    }
}
