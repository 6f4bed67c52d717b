//! 单元、时间码与课程上下文
//!
//! 单元与时间码之间没有显式关联，只按位置对应（见 `workflow::select_timecode`）。

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 课程中的一个讲座 / 视频单元
pub type UnitId = u64;

/// 页面上显示的 "MM:SS" 时长
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeCode {
    pub raw: String,
    pub duration_seconds: u32,
}

impl TimeCode {
    pub fn new(raw: impl Into<String>, duration_seconds: u32) -> Self {
        Self {
            raw: raw.into(),
            duration_seconds,
        }
    }

    /// 解析 "MM:SS"，秒数不检查是否小于 60，与页面显示保持一致
    pub fn parse(raw: &str) -> Option<Self> {
        let (minutes, seconds) = raw.trim().split_once(':')?;
        let minutes: u32 = minutes.parse().ok()?;
        let seconds: u32 = seconds.parse().ok()?;
        Some(Self::new(raw.trim(), minutes * 60 + seconds))
    }
}

impl fmt::Display for TimeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}s)", self.raw, self.duration_seconds)
    }
}

/// 课程上下文，缺少 course_id 时无法构造讲座页面地址
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CourseContext {
    pub course_id: Option<u64>,
    pub tab: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub subtitle_language: String,
}

impl CourseContext {
    pub const DEFAULT_TAB: &'static str = "curriculum";
    pub const DEFAULT_KIND: &'static str = "LECTURE";
    pub const DEFAULT_SUBTITLE_LANGUAGE: &'static str = "ko";

    pub fn with_course_id(course_id: u64) -> Self {
        Self {
            course_id: Some(course_id),
            ..Self::default()
        }
    }
}

impl Default for CourseContext {
    fn default() -> Self {
        Self {
            course_id: None,
            tab: Self::DEFAULT_TAB.to_string(),
            kind: Self::DEFAULT_KIND.to_string(),
            subtitle_language: Self::DEFAULT_SUBTITLE_LANGUAGE.to_string(),
        }
    }
}

/// 未经清洗的时间码条目
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeCodeInput {
    pub raw: Option<String>,
    pub duration_seconds: Option<f64>,
}

impl From<TimeCode> for TimeCodeInput {
    fn from(tc: TimeCode) -> Self {
        Self {
            raw: Some(tc.raw),
            duration_seconds: Some(f64::from(tc.duration_seconds)),
        }
    }
}

/// 开始命令（来自展示层，尚未清洗）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCommand {
    #[serde(default)]
    pub unit_ids: Vec<i64>,
    #[serde(default)]
    pub timecodes: Vec<TimeCodeInput>,
    #[serde(default)]
    pub course_context: Option<CourseContext>,
}

/// 只保留正整数，去重并保持首次出现的顺序
pub fn sanitize_unit_ids(raw: &[i64]) -> Vec<UnitId> {
    let mut seen = HashSet::new();
    raw.iter()
        .filter(|&&id| id > 0)
        .map(|&id| id as UnitId)
        .filter(|id| seen.insert(*id))
        .collect()
}

/// 丢弃没有原始文本或时长不是有效数字的条目
pub fn sanitize_timecodes(raw: &[TimeCodeInput]) -> Vec<TimeCode> {
    raw.iter()
        .filter_map(|item| {
            let text = item.raw.as_ref()?;
            let seconds = item.duration_seconds?;
            if !seconds.is_finite() || seconds < 0.0 || seconds > f64::from(u32::MAX) {
                return None;
            }
            Some(TimeCode::new(text.clone(), seconds.round() as u32))
        })
        .collect()
}
