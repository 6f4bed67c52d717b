//! 请求日志条目
//!
//! 每个阶段一个变体，字段固定；序列化后以 `phase` 字段区分。

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::unit::UnitId;

/// 日志缓冲区中的一条记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub unit_id: Option<UnitId>,
    #[serde(flatten)]
    pub event: LogEvent,
}

impl LogEntry {
    pub fn new(unit_id: Option<UnitId>, event: LogEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            unit_id,
            event,
        }
    }

    pub fn phase(&self) -> &'static str {
        self.event.phase()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum LogEvent {
    /// 请求即将发送
    #[serde(rename = "request")]
    PendingRequest {
        request: RequestRecord,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        blocked_headers: Vec<BlockedHeader>,
        meta: RequestMeta,
    },
    /// 响应或发送失败
    Response {
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<ResponseRecord>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        meta: RequestMeta,
    },
    /// 讲座页面访问
    Visit {
        status: VisitStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<VisitOutcome>,
        #[serde(default)]
        auto_appended: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// 标签页清理失败
    VisitCleanup { message: String },
    /// 单元被跳过
    Skip { reason: SkipReason, url: String },
    Cancel { stage: CancelStage, message: String },
    /// 导致整个运行终止的错误
    Error { message: String },
    /// 单元成功完成
    Summary { meta: RequestMeta },
}

impl LogEvent {
    pub fn phase(&self) -> &'static str {
        match self {
            LogEvent::PendingRequest { .. } => "request",
            LogEvent::Response { .. } => "response",
            LogEvent::Visit { .. } => "visit",
            LogEvent::VisitCleanup { .. } => "visit-cleanup",
            LogEvent::Skip { .. } => "skip",
            LogEvent::Cancel { .. } => "cancel",
            LogEvent::Error { .. } => "error",
            LogEvent::Summary { .. } => "summary",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub method: String,
    pub url: String,
    pub body: String,
    pub headers: BTreeMap<String, String>,
}

/// 无法设置的请求头（值不合法等），记录后继续发送
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedHeader {
    pub key: String,
    pub value: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub status: u16,
    pub ok: bool,
    pub body_snippet: String,
}

/// 随每个请求一起记录的上下文
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMeta {
    pub duration_seconds: u32,
    pub timecode: String,
    pub visit_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisitStatus {
    Success,
    Cancelled,
    Warning,
    Skipped,
    Error,
}

/// 页面等待的结果，先到者为准
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisitOutcome {
    Complete,
    Skipped,
    Cancelled,
    Timeout,
    Error,
}

impl VisitOutcome {
    pub fn log_status(self) -> VisitStatus {
        match self {
            VisitOutcome::Complete => VisitStatus::Success,
            VisitOutcome::Cancelled => VisitStatus::Cancelled,
            VisitOutcome::Skipped => VisitStatus::Skipped,
            VisitOutcome::Timeout => VisitStatus::Warning,
            VisitOutcome::Error => VisitStatus::Error,
        }
    }
}

/// 跳过原因，都不是错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// 最终 URL 不含字幕参数
    MissingMarker,
    /// 读取游标已越过时间码列表
    NoTimecodeRemaining,
    /// 按 `time_index + skipped` 取到的条目不存在
    InvalidTimecode,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingMarker => write!(f, "最终 URL 缺少字幕参数，跳过"),
            SkipReason::NoTimecodeRemaining => write!(f, "没有剩余的时间信息，跳过"),
            SkipReason::InvalidTimecode => write!(f, "对应的时间信息无效，跳过"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelStage {
    Pending,
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_tag_is_flattened() {
        let entry = LogEntry::new(
            Some(12),
            LogEvent::Skip {
                reason: SkipReason::MissingMarker,
                url: "https://example.com/lecture".to_string(),
            },
        );

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["phase"], "skip");
        assert_eq!(json["unitId"], 12);
        assert_eq!(json["reason"], "missing-marker");
        assert_eq!(entry.phase(), "skip");
    }

    #[test]
    fn test_pending_request_uses_request_phase() {
        let event = LogEvent::PendingRequest {
            request: RequestRecord {
                method: "PATCH".to_string(),
                url: "https://example.com/api".to_string(),
                body: "{}".to_string(),
                headers: BTreeMap::new(),
            },
            blocked_headers: Vec::new(),
            meta: RequestMeta {
                duration_seconds: 61,
                timecode: "01:01".to_string(),
                visit_url: String::new(),
            },
        };
        let json = serde_json::to_value(LogEntry::new(Some(1), event)).unwrap();
        assert_eq!(json["phase"], "request");
        assert!(json.get("blockedHeaders").is_none());
        assert_eq!(json["meta"]["durationSeconds"], 61);
    }

    #[test]
    fn test_visit_outcome_log_status() {
        assert_eq!(VisitOutcome::Complete.log_status(), VisitStatus::Success);
        assert_eq!(VisitOutcome::Timeout.log_status(), VisitStatus::Warning);
    }
}
