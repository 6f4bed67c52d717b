//! 单元处理流程 - 流程层
//!
//! 核心职责：定义"一个单元"的完整处理流程
//!
//! 流程顺序：
//! 1. 访问讲座页面（后台标签页）
//! 2. 检查取消 / 字幕参数 / 时间码，不满足则跳过
//! 3. 发送完成请求
//! 4. 无论结果如何都关闭标签页

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::clients::CompletionSender;
use crate::error::RequestError;
use crate::infrastructure::{RequestLog, TabId};
use crate::models::{CancelStage, CourseContext, LogEvent, RequestMeta, SkipReason, TimeCode, VisitOutcome};
use crate::services::{LectureVisitor, VisitReport};
use crate::workflow::unit_ctx::UnitCtx;

/// 单元处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    /// 请求成功，消耗了一个时间码
    Completed,
    /// 跳过，不消耗时间码
    Skipped(SkipReason),
    /// 检测到取消，整个运行应当停止
    Cancelled,
}

/// 运行计数器在本单元开始时的值
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeCursor {
    pub time_index: usize,
    pub skipped: usize,
}

/// 按位置为当前单元选择时间码
///
/// 读取游标越界时跳过；否则取 `time_index + skipped` 处的条目。
/// 跳过计数会推后选取位置；改动这条规则会改变单元与时长的对应关系。
pub fn select_timecode(timecodes: &[TimeCode], cursor: TimeCursor) -> Result<&TimeCode, SkipReason> {
    if cursor.time_index >= timecodes.len() {
        return Err(SkipReason::NoTimecodeRemaining);
    }
    timecodes
        .get(cursor.time_index + cursor.skipped)
        .ok_or(SkipReason::InvalidTimecode)
}

/// 单元处理流程
///
/// - 编排单个单元的 访问 → 校验 → 请求 → 清理
/// - 不修改运行状态，只返回结果，由编排层计数
pub struct UnitFlow {
    visitor: LectureVisitor,
    sender: Arc<dyn CompletionSender>,
    log: RequestLog,
}

impl UnitFlow {
    pub fn new(visitor: LectureVisitor, sender: Arc<dyn CompletionSender>, log: RequestLog) -> Self {
        Self {
            visitor,
            sender,
            log,
        }
    }

    /// 处理一个单元；请求失败时返回错误，此时整个运行应当终止
    pub async fn run(
        &self,
        ctx: &UnitCtx,
        cursor: TimeCursor,
        timecodes: &[TimeCode],
        course: Option<&CourseContext>,
        cancel: &CancellationToken,
    ) -> Result<UnitOutcome, RequestError> {
        let visit = self.visitor.visit(ctx.unit_id, course, cancel).await;

        let result = self.process(ctx, &visit, cursor, timecodes, cancel).await;

        if let Some(tab) = visit.tab {
            self.close_tab(ctx, tab).await;
        }

        result
    }

    async fn process(
        &self,
        ctx: &UnitCtx,
        visit: &VisitReport,
        cursor: TimeCursor,
        timecodes: &[TimeCode],
        cancel: &CancellationToken,
    ) -> Result<UnitOutcome, RequestError> {
        if visit.outcome == VisitOutcome::Cancelled {
            self.log.record(
                Some(ctx.unit_id),
                LogEvent::Cancel {
                    stage: CancelStage::Cancelled,
                    message: "页面加载期间检测到取消请求".to_string(),
                },
            );
            info!("{} 页面加载期间检测到取消请求", ctx);
            return Ok(UnitOutcome::Cancelled);
        }
        if cancel.is_cancelled() {
            return Ok(UnitOutcome::Cancelled);
        }

        let final_url = visit.final_url.as_deref().unwrap_or_default();
        if !self.visitor.has_marker(final_url) {
            return Ok(self.skip(ctx, SkipReason::MissingMarker, final_url));
        }

        let timecode = match select_timecode(timecodes, cursor) {
            Ok(tc) => tc,
            Err(reason) => return Ok(self.skip(ctx, reason, final_url)),
        };

        // 发送前最后一次检查，取消时不消耗时间码
        if cancel.is_cancelled() {
            return Ok(UnitOutcome::Cancelled);
        }

        info!("{} ⏱️ 使用时间码 {}", ctx, timecode);
        let meta = RequestMeta {
            duration_seconds: timecode.duration_seconds,
            timecode: timecode.raw.clone(),
            visit_url: final_url.to_string(),
        };

        match self
            .sender
            .send(ctx.unit_id, timecode.duration_seconds, meta)
            .await
        {
            Ok(_) => {
                info!("{} ✓ 完成请求成功", ctx);
                Ok(UnitOutcome::Completed)
            }
            Err(e) => {
                error!("{} ❌ 完成请求失败: {}", ctx, e);
                Err(e)
            }
        }
    }

    fn skip(&self, ctx: &UnitCtx, reason: SkipReason, url: &str) -> UnitOutcome {
        let url = if url.is_empty() { "(未知)" } else { url };
        self.log.record(
            Some(ctx.unit_id),
            LogEvent::Skip {
                reason,
                url: url.to_string(),
            },
        );
        info!("{} ⏭️ {}", ctx, reason);
        UnitOutcome::Skipped(reason)
    }

    /// 清理失败只记录警告
    async fn close_tab(&self, ctx: &UnitCtx, tab: TabId) {
        if let Err(e) = self.visitor.driver().close_tab(tab).await {
            warn!("{} ⚠️ 标签页清理失败: {}", ctx, e);
            self.log.record(
                Some(ctx.unit_id),
                LogEvent::VisitCleanup {
                    message: format!("标签页清理失败: {}", e),
                },
            );
        }
    }
}
