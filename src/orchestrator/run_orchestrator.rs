//! 运行编排器 - 编排层
//!
//! ## 职责
//!
//! 按顺序驱动单元 ID 列表，一次只处理一个单元：
//!
//! 1. **命令接口**：start / cancel / status / logs / clear_logs
//! 2. **运行状态**：唯一的 [`RunState`]，只由运行循环修改
//! 3. **协作式取消**：取消令牌只在固定检查点被读取，进行中的请求不会被中断
//! 4. **节奏控制**：两个单元之间随机等待
//! 5. **进度推送**：broadcast 通道，没有订阅者时直接丢弃
//!
//! ## 检查点
//!
//! - 每个单元开始前
//! - 页面加载等待期间（轮询）
//! - 发送请求之前
//! - 每个单元结束后、推送进度之前

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clients::CompletionSender;
use crate::config::{PacingSettings, VisitSettings};
use crate::error::RequestError;
use crate::infrastructure::{RequestLog, TabDriver};
use crate::models::{
    sanitize_timecodes, sanitize_unit_ids, CancelResponse, CancelStage, CourseContext, LogEntry,
    LogEvent, ProgressEvent, RunSnapshot, RunState, RunStatus, StartCommand, StartResponse,
    TimeCode, UnitId,
};
use crate::services::LectureVisitor;
use crate::workflow::{TimeCursor, UnitCtx, UnitFlow, UnitOutcome};

const PROGRESS_CHANNEL_CAPACITY: usize = 64;

/// 运行编排器，克隆得到同一个实例的句柄
#[derive(Clone)]
pub struct RunOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    flow: UnitFlow,
    log: RequestLog,
    pacing: PacingSettings,
    state: Mutex<RunState>,
    cancel: Mutex<CancellationToken>,
    progress: broadcast::Sender<ProgressEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// 一个单元结束后循环该怎么走
enum Step {
    Continue,
    Cancelled,
    Failed(RequestError),
}

impl RunOrchestrator {
    pub fn new(
        driver: Arc<dyn TabDriver>,
        sender: Arc<dyn CompletionSender>,
        log: RequestLog,
        visit: VisitSettings,
        pacing: PacingSettings,
    ) -> Self {
        let visitor = LectureVisitor::new(driver, visit, log.clone());
        let flow = UnitFlow::new(visitor, sender, log.clone());
        let (progress, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                flow,
                log,
                pacing,
                state: Mutex::new(RunState::default()),
                cancel: Mutex::new(CancellationToken::new()),
                progress,
                task: Mutex::new(None),
            }),
        }
    }

    /// 订阅进度事件
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.inner.progress.subscribe()
    }

    /// 清洗输入并在后台开始一次运行
    pub fn start(&self, command: StartCommand) -> StartResponse {
        if self.inner.state.lock().status == RunStatus::Running {
            return StartResponse::AlreadyRunning;
        }

        let unit_ids = sanitize_unit_ids(&command.unit_ids);
        let timecodes = sanitize_timecodes(&command.timecodes);
        if unit_ids.is_empty() {
            return StartResponse::NoEntries;
        }

        let total = unit_ids.len();
        let Some(token) = self.begin_run(total, command.course_context.clone()) else {
            return StartResponse::AlreadyRunning;
        };

        let this = self.clone();
        let context = command.course_context;
        let handle = tokio::spawn(async move {
            this.drive(token, unit_ids, timecodes, context).await;
        });
        *self.inner.task.lock() = Some(handle);

        StartResponse::Started { total }
    }

    /// 在当前任务中执行一次完整运行，返回结束时的状态
    ///
    /// 已有运行进行中时不做任何事，直接返回当前状态。
    pub async fn run_completion(
        &self,
        unit_ids: Vec<UnitId>,
        timecodes: Vec<TimeCode>,
        context: Option<CourseContext>,
    ) -> RunSnapshot {
        let Some(token) = self.begin_run(unit_ids.len(), context.clone()) else {
            warn!("已有运行进行中，忽略本次调用");
            return self.status();
        };
        self.drive(token, unit_ids, timecodes, context).await;
        self.status()
    }

    /// 请求取消；重复调用只生效一次
    pub fn cancel(&self) -> CancelResponse {
        let mut state = self.inner.state.lock();
        if state.status != RunStatus::Running {
            return CancelResponse::Idle;
        }

        let token = self.inner.cancel.lock().clone();
        if !token.is_cancelled() {
            token.cancel();
            state.cancel_requested = true;
            self.inner.log.record(
                state.last_unit_id,
                LogEvent::Cancel {
                    stage: CancelStage::Pending,
                    message: "用户请求取消".to_string(),
                },
            );
            info!("🛑 已请求取消，将在下一个检查点停止");
        }
        CancelResponse::Cancelling
    }

    pub fn status(&self) -> RunSnapshot {
        self.inner.state.lock().clone()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.inner.log.snapshot()
    }

    pub fn clear_logs(&self) {
        self.inner.log.clear();
    }

    /// 等待后台运行结束
    pub async fn wait(&self) -> RunSnapshot {
        let handle = self.inner.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("运行任务异常退出: {}", e);
                let mut state = self.inner.state.lock();
                if state.status == RunStatus::Running {
                    state.status = RunStatus::Error;
                    state.error = Some(format!("运行任务异常退出: {}", e));
                }
            }
        }
        self.status()
    }

    /// 重置运行状态并换一个新的取消令牌；已在运行时返回 None
    fn begin_run(&self, total: usize, context: Option<CourseContext>) -> Option<CancellationToken> {
        let mut state = self.inner.state.lock();
        if state.status == RunStatus::Running {
            return None;
        }
        *state = RunState::started(total, context);

        let token = CancellationToken::new();
        *self.inner.cancel.lock() = token.clone();
        Some(token)
    }

    async fn drive(
        &self,
        token: CancellationToken,
        unit_ids: Vec<UnitId>,
        timecodes: Vec<TimeCode>,
        context: Option<CourseContext>,
    ) {
        let total = unit_ids.len();
        info!(
            "▶️ 开始运行: {} 个单元, {} 个时间码, courseId={:?}",
            total,
            timecodes.len(),
            context.as_ref().and_then(|c| c.course_id)
        );
        self.emit_progress();

        for (index, &unit_id) in unit_ids.iter().enumerate() {
            if token.is_cancelled() {
                return self.finish_cancelled();
            }

            let ctx = UnitCtx::new(unit_id, index + 1, total);
            info!("\n{} {}", ctx, "─".repeat(30));

            match self
                .process_unit(&ctx, &timecodes, context.as_ref(), &token)
                .await
            {
                Step::Continue => {}
                Step::Cancelled => return self.finish_cancelled(),
                Step::Failed(e) => return self.finish_failed(unit_id, e),
            }

            if token.is_cancelled() {
                return self.finish_cancelled();
            }

            self.emit_progress();

            if !ctx.is_last() {
                let delay = self.random_delay();
                debug!("{} 等待 {:?} 后处理下一个单元", ctx, delay);
                tokio::time::sleep(delay).await;
            }
        }

        self.finish_done();
    }

    async fn process_unit(
        &self,
        ctx: &UnitCtx,
        timecodes: &[TimeCode],
        context: Option<&CourseContext>,
        token: &CancellationToken,
    ) -> Step {
        let cursor = {
            let state = self.inner.state.lock();
            TimeCursor {
                time_index: state.time_index,
                skipped: state.skipped,
            }
        };

        let outcome = self
            .inner
            .flow
            .run(ctx, cursor, timecodes, context, token)
            .await;

        let mut state = self.inner.state.lock();
        match outcome {
            Ok(UnitOutcome::Completed) => {
                state.time_index += 1;
                state.processed += 1;
                state.last_unit_id = Some(ctx.unit_id);
                Step::Continue
            }
            Ok(UnitOutcome::Skipped(_)) => {
                state.skipped += 1;
                state.last_unit_id = Some(ctx.unit_id);
                Step::Continue
            }
            Ok(UnitOutcome::Cancelled) => Step::Cancelled,
            // 请求已发出，时间码视为已消耗
            Err(e) => {
                state.time_index += 1;
                Step::Failed(e)
            }
        }
    }

    fn random_delay(&self) -> Duration {
        let min = self.inner.pacing.min_delay.as_millis() as u64;
        let max = self.inner.pacing.max_delay.as_millis() as u64;
        if min >= max {
            return Duration::from_millis(min);
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    fn emit_progress(&self) {
        let event = self.inner.state.lock().progress();
        // 没有订阅者时发送失败，忽略
        let _ = self.inner.progress.send(event);
    }

    fn finish_done(&self) {
        {
            let mut state = self.inner.state.lock();
            state.status = RunStatus::Done;
            info!(
                "✅ 运行完成: 完成 {}, 跳过 {}, 共 {}",
                state.processed, state.skipped, state.total
            );
        }
        self.emit_progress();
    }

    fn finish_cancelled(&self) {
        {
            let mut state = self.inner.state.lock();
            state.status = RunStatus::Cancelled;
            state.cancel_requested = true;
            self.inner.log.record(
                state.last_unit_id,
                LogEvent::Cancel {
                    stage: CancelStage::Cancelled,
                    message: "用户取消了运行".to_string(),
                },
            );
            warn!(
                "🛑 运行已取消: 完成 {}, 跳过 {}, 共 {}",
                state.processed, state.skipped, state.total
            );
        }
        self.emit_progress();
    }

    fn finish_failed(&self, unit_id: UnitId, err: RequestError) {
        let message = err.to_string();
        self.inner.log.record(
            Some(unit_id),
            LogEvent::Error {
                message: message.clone(),
            },
        );
        {
            let mut state = self.inner.state.lock();
            state.status = RunStatus::Error;
            state.error = Some(message);
            error!(
                "❌ 运行因错误终止: 完成 {}, 跳过 {}, 共 {}",
                state.processed, state.skipped, state.total
            );
        }
        self.emit_progress();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VisitError;
    use crate::infrastructure::TabId;
    use crate::models::RequestMeta;
    use async_trait::async_trait;

    struct InstantDriver;

    #[async_trait]
    impl TabDriver for InstantDriver {
        async fn open_tab(&self, _url: &str) -> Result<TabId, VisitError> {
            Ok(TabId(1))
        }
        async fn wait_loaded(&self, _tab: TabId) -> Result<(), VisitError> {
            Ok(())
        }
        async fn current_url(&self, _tab: TabId) -> Result<Option<String>, VisitError> {
            Ok(Some("https://x.test/lecture?subtitleLanguage=ko".to_string()))
        }
        async fn close_tab(&self, _tab: TabId) -> Result<(), VisitError> {
            Ok(())
        }
    }

    struct OkSender;

    #[async_trait]
    impl CompletionSender for OkSender {
        async fn send(
            &self,
            _unit_id: UnitId,
            _duration_seconds: u32,
            _meta: RequestMeta,
        ) -> Result<String, RequestError> {
            Ok("{}".to_string())
        }
    }

    fn orchestrator() -> RunOrchestrator {
        RunOrchestrator::new(
            Arc::new(InstantDriver),
            Arc::new(OkSender),
            RequestLog::default(),
            VisitSettings::default(),
            PacingSettings::default(),
        )
    }

    #[test]
    fn test_random_delay_within_bounds() {
        let orchestrator = orchestrator();
        for _ in 0..200 {
            let delay = orchestrator.random_delay();
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(800));
        }
    }

    #[tokio::test]
    async fn test_cancel_when_idle() {
        let orchestrator = orchestrator();
        assert_eq!(orchestrator.cancel(), CancelResponse::Idle);
        assert_eq!(orchestrator.status().status, RunStatus::Idle);
        assert!(orchestrator.logs().is_empty());
    }

    #[tokio::test]
    async fn test_start_without_units() {
        let orchestrator = orchestrator();
        let response = orchestrator.start(StartCommand {
            unit_ids: vec![0, -3],
            ..StartCommand::default()
        });
        assert_eq!(response, StartResponse::NoEntries);
        assert_eq!(orchestrator.status().status, RunStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_completion_inline() {
        let orchestrator = orchestrator();
        let snapshot = orchestrator
            .run_completion(
                vec![1, 2],
                vec![TimeCode::new("00:10", 10), TimeCode::new("00:20", 20)],
                Some(CourseContext::with_course_id(7)),
            )
            .await;

        assert_eq!(snapshot.status, RunStatus::Done);
        assert_eq!(snapshot.processed, 2);
        assert_eq!(snapshot.time_index, 2);
        assert_eq!(snapshot.last_unit_id, Some(2));
    }
}
