//! 讲座页面访问服务 - 业务能力层
//!
//! 在后台标签页打开单元的讲座页面，等待 加载完成 / 取消 / 超时 三者中最先发生的一个，
//! 再读取最终地址。标签页由调用方关闭。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::VisitSettings;
use crate::error::VisitError;
use crate::infrastructure::{RequestLog, TabDriver, TabId};
use crate::models::{CourseContext, LogEvent, UnitId, VisitOutcome, VisitStatus};

/// 一次访问的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitReport {
    /// 打开的标签页，需要调用方关闭
    pub tab: Option<TabId>,
    pub outcome: VisitOutcome,
    pub final_url: Option<String>,
}

impl VisitReport {
    fn without_tab(outcome: VisitOutcome) -> Self {
        Self {
            tab: None,
            outcome,
            final_url: None,
        }
    }
}

/// 构造讲座页面地址，缺少 course_id 时返回 None
pub fn build_lecture_url(base: &str, unit_id: UnitId, ctx: &CourseContext) -> Option<String> {
    let course_id = ctx.course_id?;
    let mut url = Url::parse(base).ok()?;
    let tab = non_empty_or(&ctx.tab, CourseContext::DEFAULT_TAB);
    let kind = non_empty_or(&ctx.kind, CourseContext::DEFAULT_KIND);
    url.query_pairs_mut()
        .append_pair("courseId", &course_id.to_string())
        .append_pair("tab", tab)
        .append_pair("type", kind)
        .append_pair("unitId", &unit_id.to_string());
    Some(url.into())
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() {
        fallback
    } else {
        value
    }
}

/// 地址中是否带有指定的查询参数
pub fn has_query_param(url: &str, param: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => parsed.query_pairs().any(|(key, _)| key == param),
        Err(_) => url.contains(&format!("{}=", param)),
    }
}

pub struct LectureVisitor {
    driver: Arc<dyn TabDriver>,
    settings: VisitSettings,
    log: RequestLog,
}

impl LectureVisitor {
    pub fn new(driver: Arc<dyn TabDriver>, settings: VisitSettings, log: RequestLog) -> Self {
        Self {
            driver,
            settings,
            log,
        }
    }

    pub fn settings(&self) -> &VisitSettings {
        &self.settings
    }

    pub fn driver(&self) -> &Arc<dyn TabDriver> {
        &self.driver
    }

    /// 最终地址是否带有字幕参数
    pub fn has_marker(&self, url: &str) -> bool {
        has_query_param(url, &self.settings.marker_param)
    }

    pub async fn visit(
        &self,
        unit_id: UnitId,
        ctx: Option<&CourseContext>,
        cancel: &CancellationToken,
    ) -> VisitReport {
        let target = ctx.and_then(|c| build_lecture_url(&self.settings.lecture_url_base, unit_id, c));
        let Some(target) = target else {
            self.log.record(
                Some(unit_id),
                LogEvent::Visit {
                    status: VisitStatus::Skipped,
                    url: None,
                    result: Some(VisitOutcome::Skipped),
                    auto_appended: false,
                    message: Some("没有 courseId，不打开讲座页面".to_string()),
                },
            );
            debug!("[单元 {}] 没有 courseId，跳过页面访问", unit_id);
            return VisitReport::without_tab(VisitOutcome::Skipped);
        };

        let tab = match self.driver.open_tab(&target).await {
            Ok(tab) => tab,
            Err(e) => {
                warn!("[单元 {}] 无法打开讲座页面: {}", unit_id, e);
                self.log.record(
                    Some(unit_id),
                    LogEvent::Visit {
                        status: VisitStatus::Error,
                        url: Some(target),
                        result: Some(VisitOutcome::Error),
                        auto_appended: false,
                        message: Some(format!("无法打开讲座页面: {}", e)),
                    },
                );
                return VisitReport::without_tab(VisitOutcome::Error);
            }
        };

        let outcome = match self.wait_for_load(tab, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("[单元 {}] 等待页面加载失败: {}", unit_id, e);
                VisitOutcome::Error
            }
        };

        // 超时或出错时沿用构造的地址
        let mut final_url = target.clone();
        if matches!(outcome, VisitOutcome::Complete | VisitOutcome::Cancelled) {
            match self.driver.current_url(tab).await {
                Ok(Some(url)) => final_url = url,
                Ok(None) => {}
                Err(e) => {
                    self.log.record(
                        Some(unit_id),
                        LogEvent::Visit {
                            status: VisitStatus::Warning,
                            url: None,
                            result: None,
                            auto_appended: false,
                            message: Some(format!("无法读取标签页地址: {}", e)),
                        },
                    );
                }
            }
        }

        let auto_appended = !self.has_marker(&target) && self.has_marker(&final_url);
        self.log.record(
            Some(unit_id),
            LogEvent::Visit {
                status: outcome.log_status(),
                url: Some(final_url.clone()),
                result: Some(outcome),
                auto_appended,
                message: None,
            },
        );
        info!("[单元 {}] 页面访问结果: {:?} -> {}", unit_id, outcome, final_url);

        // 等客户端跳转完成
        sleep(self.settings.settle_delay).await;

        VisitReport {
            tab: Some(tab),
            outcome,
            final_url: Some(final_url),
        }
    }

    /// 加载完成、取消（轮询）、超时三者竞争，先到者决定结果
    async fn wait_for_load(
        &self,
        tab: TabId,
        cancel: &CancellationToken,
    ) -> Result<VisitOutcome, VisitError> {
        let mut poll = interval(self.settings.poll_interval.max(Duration::from_millis(1)));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let timeout = sleep(self.settings.load_timeout);
        tokio::pin!(timeout);
        let loaded = self.driver.wait_loaded(tab);
        tokio::pin!(loaded);

        loop {
            tokio::select! {
                biased;
                result = &mut loaded => {
                    result?;
                    return Ok(VisitOutcome::Complete);
                }
                _ = poll.tick() => {
                    if cancel.is_cancelled() {
                        return Ok(VisitOutcome::Cancelled);
                    }
                }
                _ = &mut timeout => return Ok(VisitOutcome::Timeout),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Copy)]
    enum Load {
        Immediate,
        Never,
    }

    struct FakeDriver {
        load: Load,
        fail_open: bool,
        redirect_to: Option<String>,
        opened: Mutex<Vec<String>>,
        url_reads: AtomicUsize,
    }

    impl FakeDriver {
        fn new(load: Load) -> Self {
            Self {
                load,
                fail_open: false,
                redirect_to: None,
                opened: Mutex::new(Vec::new()),
                url_reads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TabDriver for FakeDriver {
        async fn open_tab(&self, url: &str) -> Result<TabId, VisitError> {
            if self.fail_open {
                return Err(VisitError::TabOpenFailed {
                    url: url.to_string(),
                    source: "browser gone".into(),
                });
            }
            let mut opened = self.opened.lock();
            opened.push(url.to_string());
            Ok(TabId(opened.len() as u64))
        }

        async fn wait_loaded(&self, _tab: TabId) -> Result<(), VisitError> {
            match self.load {
                Load::Immediate => Ok(()),
                Load::Never => futures::future::pending().await,
            }
        }

        async fn current_url(&self, _tab: TabId) -> Result<Option<String>, VisitError> {
            self.url_reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.redirect_to.clone())
        }

        async fn close_tab(&self, _tab: TabId) -> Result<(), VisitError> {
            Ok(())
        }
    }

    fn course() -> CourseContext {
        CourseContext::with_course_id(331)
    }

    fn visitor(driver: Arc<FakeDriver>, log: RequestLog) -> LectureVisitor {
        LectureVisitor::new(driver, VisitSettings::default(), log)
    }

    #[test]
    fn test_build_lecture_url() {
        let url = build_lecture_url(
            "https://www.inflearn.com/courses/lecture",
            9001,
            &course(),
        )
        .unwrap();
        assert_eq!(
            url,
            "https://www.inflearn.com/courses/lecture?courseId=331&tab=curriculum&type=LECTURE&unitId=9001"
        );

        assert!(build_lecture_url("https://x.test/lecture", 1, &CourseContext::default()).is_none());
    }

    #[test]
    fn test_has_query_param() {
        assert!(has_query_param(
            "https://x.test/lecture?unitId=1&subtitleLanguage=ko",
            "subtitleLanguage"
        ));
        assert!(!has_query_param("https://x.test/lecture?unitId=1", "subtitleLanguage"));
        assert!(!has_query_param("", "subtitleLanguage"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_course_id_skips_without_opening_tab() {
        let driver = Arc::new(FakeDriver::new(Load::Immediate));
        let log = RequestLog::default();
        let report = visitor(driver.clone(), log.clone())
            .visit(5, None, &CancellationToken::new())
            .await;

        assert_eq!(report, VisitReport::without_tab(VisitOutcome::Skipped));
        assert!(driver.opened.lock().is_empty());
        assert_eq!(log.snapshot()[0].phase(), "visit");
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_reads_redirected_url() {
        let redirected =
            "https://www.inflearn.com/courses/lecture?courseId=331&unitId=5&subtitleLanguage=ko";
        let mut fake = FakeDriver::new(Load::Immediate);
        fake.redirect_to = Some(redirected.to_string());
        let driver = Arc::new(fake);
        let log = RequestLog::default();

        let report = visitor(driver.clone(), log.clone())
            .visit(5, Some(&course()), &CancellationToken::new())
            .await;

        assert_eq!(report.outcome, VisitOutcome::Complete);
        assert_eq!(report.tab, Some(TabId(1)));
        assert_eq!(report.final_url.as_deref(), Some(redirected));

        match &log.snapshot()[0].event {
            LogEvent::Visit {
                status,
                auto_appended,
                ..
            } => {
                assert_eq!(*status, VisitStatus::Success);
                assert!(*auto_appended);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_back_to_constructed_url() {
        let driver = Arc::new(FakeDriver::new(Load::Never));
        let started = tokio::time::Instant::now();

        let report = visitor(driver.clone(), RequestLog::default())
            .visit(5, Some(&course()), &CancellationToken::new())
            .await;

        assert_eq!(report.outcome, VisitOutcome::Timeout);
        let constructed = driver.opened.lock()[0].clone();
        assert_eq!(report.final_url, Some(constructed));
        assert_eq!(driver.url_reads.load(Ordering::SeqCst), 0);
        // 10 秒超时 + 300 毫秒稳定等待
        assert!(started.elapsed() >= Duration::from_millis(10_300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_observed_while_waiting() {
        let driver = Arc::new(FakeDriver::new(Load::Never));
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(400)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let report = visitor(driver.clone(), RequestLog::default())
            .visit(5, Some(&course()), &token)
            .await;

        assert_eq!(report.outcome, VisitOutcome::Cancelled);
        assert!(report.tab.is_some());
        assert_eq!(driver.url_reads.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_failure_reports_error_without_tab() {
        let mut fake = FakeDriver::new(Load::Immediate);
        fake.fail_open = true;
        let log = RequestLog::default();

        let report = visitor(Arc::new(fake), log.clone())
            .visit(5, Some(&course()), &CancellationToken::new())
            .await;

        assert_eq!(report, VisitReport::without_tab(VisitOutcome::Error));
        match &log.snapshot()[0].event {
            LogEvent::Visit { status, .. } => assert_eq!(*status, VisitStatus::Error),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
