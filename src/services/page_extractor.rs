//! 课程页面数据提取服务 - 业务能力层
//!
//! 从渲染后的课程页面标记中提取单元 ID、时间码和课程上下文。
//! 单元与时间码数量不一致是常见情况，只记录警告，由编排层按位置对应。

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::ExtractionError;
use crate::infrastructure::JsExecutor;
use crate::models::{CourseContext, StartCommand, TimeCode, TimeCodeInput, UnitId};

/// 单元与时间码数量对比
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MismatchInfo {
    pub unit_count: usize,
    pub timecode_count: usize,
    pub mismatched: bool,
}

/// 提取结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageData {
    pub unit_ids: Vec<UnitId>,
    pub timecodes: Vec<TimeCode>,
    pub mismatch_info: MismatchInfo,
    pub course_context: CourseContext,
}

impl PageData {
    pub fn to_start_command(&self) -> StartCommand {
        StartCommand {
            unit_ids: self.unit_ids.iter().map(|&id| id as i64).collect(),
            timecodes: self
                .timecodes
                .iter()
                .cloned()
                .map(TimeCodeInput::from)
                .collect(),
            course_context: Some(self.course_context.clone()),
        }
    }
}

pub struct PageExtractor {
    unit_id: Regex,
    timecode: Regex,
    course_label: Regex,
    course_param: Regex,
}

impl PageExtractor {
    pub fn new() -> Result<Self, ExtractionError> {
        Ok(Self {
            unit_id: Regex::new(r"unitId=(\d+)")?,
            timecode: Regex::new(r">\s*(\d{2}:\d{2})\s*<")?,
            course_label: Regex::new(r"강의 ID\s*(\d+)")?,
            course_param: Regex::new(r"courseId=(\d+)")?,
        })
    }

    /// 从当前课程页面读取标记并提取
    pub async fn extract(&self, executor: &JsExecutor) -> Result<PageData, ExtractionError> {
        let html = executor
            .rendered_html()
            .await
            .map_err(|e| ExtractionError::ScriptFailed(e.into()))?;
        let location = executor.location().await;
        debug!("页面标记长度: {} 字符, 地址: {:?}", html.len(), location);

        let data = self.parse(&html, location.as_deref());
        info!(
            "✓ 提取到 {} 个单元, {} 个时间码",
            data.unit_ids.len(),
            data.timecodes.len()
        );
        if data.mismatch_info.mismatched {
            warn!(
                "⚠️ 单元数量 ({}) 与时间码数量 ({}) 不一致，将按位置对应",
                data.mismatch_info.unit_count, data.mismatch_info.timecode_count
            );
        }
        Ok(data)
    }

    pub fn parse(&self, html: &str, page_url: Option<&str>) -> PageData {
        let unit_ids = self.unit_ids(html);
        let timecodes = self.timecodes(html);
        let course_context = self.course_context(html, page_url);

        PageData {
            mismatch_info: MismatchInfo {
                unit_count: unit_ids.len(),
                timecode_count: timecodes.len(),
                mismatched: unit_ids.len() != timecodes.len(),
            },
            unit_ids,
            timecodes,
            course_context,
        }
    }

    /// 首次出现顺序，去重
    fn unit_ids(&self, html: &str) -> Vec<UnitId> {
        let mut ids: Vec<UnitId> = Vec::new();
        for caps in self.unit_id.captures_iter(html) {
            if let Ok(id) = caps[1].parse::<UnitId>() {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids
    }

    /// 保留重复项
    fn timecodes(&self, html: &str) -> Vec<TimeCode> {
        self.timecode
            .captures_iter(html)
            .filter_map(|caps| TimeCode::parse(&caps[1]))
            .collect()
    }

    fn course_context(&self, html: &str, page_url: Option<&str>) -> CourseContext {
        let params: Vec<(String, String)> = page_url
            .and_then(|u| Url::parse(u).ok())
            .map(|u| u.query_pairs().into_owned().collect())
            .unwrap_or_default();
        let param = |key: &str| {
            params
                .iter()
                .find(|(k, v)| k == key && !v.is_empty())
                .map(|(_, v)| v.clone())
        };

        let course_id = param("courseId")
            .and_then(|v| v.parse().ok())
            .or_else(|| self.course_id_from_html(html));

        CourseContext {
            course_id,
            tab: param("tab").unwrap_or_else(|| CourseContext::DEFAULT_TAB.to_string()),
            kind: param("type").unwrap_or_else(|| CourseContext::DEFAULT_KIND.to_string()),
            subtitle_language: param("subtitleLanguage")
                .unwrap_or_else(|| CourseContext::DEFAULT_SUBTITLE_LANGUAGE.to_string()),
        }
    }

    fn course_id_from_html(&self, html: &str) -> Option<u64> {
        [&self.course_label, &self.course_param]
            .into_iter()
            .find_map(|re| re.captures(html).and_then(|caps| caps[1].parse().ok()))
    }
}
