use crate::alert::AlertHistoryEntry;
use std::collections::VecDeque;

pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// 告警历史环形缓冲，满了之后淘汰最旧的记录
#[derive(Debug)]
pub struct AlertHistory {
    entries: VecDeque<AlertHistoryEntry>,
    capacity: usize,
}

impl AlertHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY)),
            capacity,
        }
    }

    pub fn push(&mut self, entry: AlertHistoryEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// 最近 `limit` 条，按时间正序
    pub fn recent(&self, limit: usize) -> Vec<AlertHistoryEntry> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 平均解决耗时（秒）
    pub fn avg_resolution_secs(&self) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        let total: i64 = self.entries.iter().map(|e| e.duration_ms).sum();
        total as f64 / self.entries.len() as f64 / 1000.0
    }
}

impl Default for AlertHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
