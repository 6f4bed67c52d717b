//! 运行状态与命令响应

use serde::{Deserialize, Serialize};

use super::unit::{CourseContext, UnitId};

/// 运行状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Cancelled,
    Done,
    Error,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Cancelled | RunStatus::Done | RunStatus::Error)
    }
}

/// 唯一的运行记录，只由编排循环修改
///
/// `time_index` 是时间码读取游标，与 `skipped` 计数器分开维护；
/// 选择时间码时两者相加（见 `workflow::select_timecode`）。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub status: RunStatus,
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub last_unit_id: Option<UnitId>,
    pub time_index: usize,
    pub cancel_requested: bool,
    pub error: Option<String>,
    pub course_context: Option<CourseContext>,
}

/// 对外提供的状态快照
pub type RunSnapshot = RunState;

impl RunState {
    pub fn started(total: usize, course_context: Option<CourseContext>) -> Self {
        Self {
            status: RunStatus::Running,
            total,
            course_context,
            ..Self::default()
        }
    }

    pub fn progress(&self) -> ProgressEvent {
        ProgressEvent {
            status: self.status,
            total: self.total,
            processed: self.processed,
            skipped: self.skipped,
            last_unit_id: self.last_unit_id,
            error_message: self.error.clone(),
        }
    }
}

/// 推送给观察者的进度事件，投递失败直接忽略
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub status: RunStatus,
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_unit_id: Option<UnitId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// start() 的响应
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum StartResponse {
    Started { total: usize },
    AlreadyRunning,
    NoEntries,
}

/// cancel() 的响应
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CancelResponse {
    Cancelling,
    Idle,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_response_wire_shape() {
        let json = serde_json::to_value(StartResponse::Started { total: 3 }).unwrap();
        assert_eq!(json, serde_json::json!({"status": "started", "total": 3}));

        let json = serde_json::to_value(StartResponse::AlreadyRunning).unwrap();
        assert_eq!(json, serde_json::json!({"status": "already-running"}));
    }

    #[test]
    fn test_progress_omits_absent_fields() {
        let state = RunState::started(4, None);
        let json = serde_json::to_value(state.progress()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"status": "running", "total": 4, "processed": 0, "skipped": 0})
        );
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!RunStatus::Idle.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Done.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(RunStatus::Error.is_terminal());
    }
}
