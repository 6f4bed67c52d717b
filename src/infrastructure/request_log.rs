//! 请求日志缓冲区
//!
//! 固定容量的环形缓冲区，满了以后丢弃最旧的条目。克隆得到的是同一个缓冲区的句柄。

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::{LogEntry, LogEvent, UnitId};

pub const DEFAULT_LOG_CAPACITY: usize = 200;

#[derive(Debug, Clone)]
pub struct RequestLog {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
    capacity: usize,
}

impl RequestLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn append(&self, entry: LogEntry) {
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// 以当前时间追加一条记录
    pub fn record(&self, unit_id: Option<UnitId>, event: LogEvent) {
        self.append(LogEntry::new(unit_id, event));
    }

    /// 按插入顺序返回全部条目
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for RequestLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
