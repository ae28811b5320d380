use crate::collector::MetricSample;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 窗口统计结果
///
/// 窗口内没有样本时返回全零结果（`count == 0`），而不是错误。
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub latest: f64,
    pub latest_time: Option<DateTime<Utc>>,
}

impl MetricStats {
    /// 根据样本计算统计值，样本顺序无关
    pub fn from_samples<'a, I>(samples: I) -> Self
    where
        I: IntoIterator<Item = &'a MetricSample>,
    {
        let mut values = Vec::new();
        let mut latest: Option<&MetricSample> = None;

        for sample in samples {
            values.push(sample.value);
            // 时间戳相同时以后到达的为准
            if latest.map_or(true, |l| sample.timestamp >= l.timestamp) {
                latest = Some(sample);
            }
        }

        let Some(latest) = latest else {
            return Self::default();
        };

        values.sort_by(|a, b| a.total_cmp(b));

        let count = values.len();
        let min = values[0];
        let max = values[count - 1];
        // 增量均值，极端值求和会溢出
        let mut avg = 0.0;
        for (i, v) in values.iter().enumerate() {
            let k = (i + 1) as f64;
            avg += v / k - avg / k;
        }
        let avg = avg.clamp(min, max);

        Self {
            count,
            min,
            max,
            avg,
            p50: percentile(&values, 50.0),
            p95: percentile(&values, 95.0),
            p99: percentile(&values, 99.0),
            latest: latest.value,
            latest_time: Some(latest.timestamp),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// 线性插值百分位，`sorted` 必须已升序排列
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = lower + 1;

    if upper >= sorted.len() {
        return sorted[lower];
    }

    let weight = rank - lower as f64;
    let (lo, hi) = (sorted[lower], sorted[upper]);
    if weight == 0.0 {
        return lo;
    }
    // `hi - lo` 可能溢出为 inf
    (lo * (1.0 - weight) + hi * weight).clamp(lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{Labels, MetricType};
    use chrono::Duration;

    fn samples(values: &[f64]) -> Vec<MetricSample> {
        let base = Utc::now();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| MetricSample {
                name: "latency".to_string(),
                metric_type: MetricType::Histogram,
                value: *v,
                labels: Labels::new(),
                timestamp: base + Duration::milliseconds(i as i64),
            })
            .collect()
    }

    #[test]
    fn test_percentile_interpolation() {
        let sorted = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&sorted, 50.0), 3.0);
        assert_eq!(percentile(&sorted, 0.0), 1.0);
        assert_eq!(percentile(&sorted, 100.0), 5.0);
        assert!((percentile(&sorted, 95.0) - 4.8).abs() < 1e-9);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_stats_basic() {
        let stats = MetricStats::from_samples(&samples(&[5.0, 1.0, 3.0]));

        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 5.0);
        assert_eq!(stats.avg, 3.0);
        assert_eq!(stats.p50, 3.0);
        // 最新值按时间戳而非大小
        assert_eq!(stats.latest, 3.0);
    }

    #[test]
    fn test_stats_empty() {
        let stats = MetricStats::from_samples(&Vec::<MetricSample>::new());
        assert!(stats.is_empty());
        assert_eq!(stats, MetricStats::default());
    }

    #[test]
    fn test_stats_ordering_invariants() {
        let sets: Vec<Vec<f64>> = vec![
            vec![0.1, 0.1, 0.1],
            vec![1e-9, 1e9, 3.5, -2.0],
            vec![42.0],
            (0..1000).map(|i| ((i * 7919) % 1000) as f64 / 3.0).collect(),
            vec![-5.0, -5.0, -4.999999999, 10.0],
            vec![-1e308, -1e308, 1e308],
            vec![f64::MIN, f64::MAX, f64::MAX, 0.0, f64::MIN],
        ];

        for set in sets {
            let stats = MetricStats::from_samples(&samples(&set));
            assert!(stats.p50 <= stats.p95, "{:?}", stats);
            assert!(stats.p95 <= stats.p99, "{:?}", stats);
            assert!(stats.p99 <= stats.max, "{:?}", stats);
            assert!(stats.min <= stats.avg && stats.avg <= stats.max, "{:?}", stats);
            assert!(stats.min <= stats.p50, "{:?}", stats);
        }
    }

    #[test]
    fn test_stats_extreme_values() {
        let stats = MetricStats::from_samples(&samples(&[-1e308, -1e308, 1e308]));

        assert_eq!(stats.p50, -1e308);
        assert!(stats.p95.is_finite());
        let expected_avg = -1e308 / 3.0;
        assert!((stats.avg - expected_avg).abs() <= expected_avg.abs() * 1e-12, "{:?}", stats);
        assert!((percentile(&[-1e308, 1e308], 50.0)).abs() < 1e300);
    }
}
