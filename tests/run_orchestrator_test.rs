use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_test::assert_ok;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use unit_completer::clients::{CompletionClient, CompletionSender};
use unit_completer::config::{ClientSettings, PacingSettings, VisitSettings};
use unit_completer::error::{RequestError, VisitError};
use unit_completer::infrastructure::{RequestLog, TabDriver, TabId};
use unit_completer::models::{
    CancelResponse, CancelStage, CourseContext, LogEvent, RequestMeta, RunStatus, SkipReason,
    StartCommand, StartResponse, TimeCodeInput, UnitId,
};
use unit_completer::RunOrchestrator;

/// 假浏览器：立即加载完成，最终 URL 带上字幕参数（`no_marker` 中的单元除外）
#[derive(Default)]
struct FakeDriver {
    no_marker: HashSet<UnitId>,
    opened: Mutex<Vec<(TabId, UnitId)>>,
    closed: Mutex<Vec<TabId>>,
}

impl FakeDriver {
    fn without_marker(units: &[UnitId]) -> Self {
        Self {
            no_marker: units.iter().copied().collect(),
            ..Self::default()
        }
    }

    fn opened_units(&self) -> Vec<UnitId> {
        self.opened.lock().iter().map(|(_, unit)| *unit).collect()
    }

    fn unit_of(&self, tab: TabId) -> Option<UnitId> {
        self.opened
            .lock()
            .iter()
            .find(|(t, _)| *t == tab)
            .map(|(_, unit)| *unit)
    }
}

#[async_trait]
impl TabDriver for FakeDriver {
    async fn open_tab(&self, url: &str) -> Result<TabId, VisitError> {
        let unit = Url::parse(url)
            .ok()
            .and_then(|u| {
                u.query_pairs()
                    .find(|(k, _)| k == "unitId")
                    .and_then(|(_, v)| v.parse().ok())
            })
            .unwrap_or_default();
        let mut opened = self.opened.lock();
        let tab = TabId(opened.len() as u64 + 1);
        opened.push((tab, unit));
        Ok(tab)
    }

    async fn wait_loaded(&self, _tab: TabId) -> Result<(), VisitError> {
        Ok(())
    }

    async fn current_url(&self, tab: TabId) -> Result<Option<String>, VisitError> {
        let unit = self.unit_of(tab).ok_or(VisitError::UnknownTab(tab))?;
        let mut url = format!("https://www.inflearn.com/courses/lecture?courseId=331&unitId={}", unit);
        if !self.no_marker.contains(&unit) {
            url.push_str("&subtitleLanguage=ko");
        }
        Ok(Some(url))
    }

    async fn close_tab(&self, tab: TabId) -> Result<(), VisitError> {
        self.closed.lock().push(tab);
        Ok(())
    }
}

/// 假客户端：记录 (unit_id, 时长)，对 `fail_on` 中的单元返回 500
#[derive(Default)]
struct FakeSender {
    fail_on: Option<UnitId>,
    sent: Mutex<Vec<(UnitId, u32)>>,
}

#[async_trait]
impl CompletionSender for FakeSender {
    async fn send(
        &self,
        unit_id: UnitId,
        duration_seconds: u32,
        _meta: RequestMeta,
    ) -> Result<String, RequestError> {
        self.sent.lock().push((unit_id, duration_seconds));
        if self.fail_on == Some(unit_id) {
            return Err(RequestError::HttpStatus {
                status: 500,
                body: "internal error".to_string(),
            });
        }
        Ok("{\"ok\":true}".to_string())
    }
}

fn command(unit_ids: &[i64], seconds: &[u32], context: Option<CourseContext>) -> StartCommand {
    StartCommand {
        unit_ids: unit_ids.to_vec(),
        timecodes: seconds
            .iter()
            .map(|&s| TimeCodeInput {
                raw: Some(format!("{:02}:{:02}", s / 60, s % 60)),
                duration_seconds: Some(s as f64),
            })
            .collect(),
        course_context: context,
    }
}

fn orchestrator(driver: Arc<FakeDriver>, sender: Arc<FakeSender>) -> RunOrchestrator {
    RunOrchestrator::new(
        driver,
        sender,
        RequestLog::default(),
        VisitSettings::default(),
        PacingSettings::default(),
    )
}

fn course() -> Option<CourseContext> {
    Some(CourseContext::with_course_id(331))
}

#[tokio::test(start_paused = true)]
async fn test_all_units_complete() {
    let driver = Arc::new(FakeDriver::default());
    let sender = Arc::new(FakeSender::default());
    let orchestrator = orchestrator(driver.clone(), sender.clone());

    let response = orchestrator.start(command(&[11, 12, 12, 13], &[10, 20, 30], course()));
    assert_eq!(response, StartResponse::Started { total: 3 });

    let snapshot = orchestrator.wait().await;
    assert_eq!(snapshot.status, RunStatus::Done);
    assert_eq!(snapshot.processed, 3);
    assert_eq!(snapshot.skipped, 0);
    assert_eq!(snapshot.time_index, 3);
    assert_eq!(snapshot.last_unit_id, Some(13));
    assert_eq!(*sender.sent.lock(), vec![(11, 10), (12, 20), (13, 30)]);
    assert_eq!(driver.closed.lock().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_skipped_unit_shifts_timecode_selection() {
    let driver = Arc::new(FakeDriver::without_marker(&[2]));
    let sender = Arc::new(FakeSender::default());
    let orchestrator = orchestrator(driver.clone(), sender.clone());

    orchestrator.start(command(&[1, 2, 3], &[10, 20, 30], course()));
    let snapshot = orchestrator.wait().await;

    assert_eq!(snapshot.status, RunStatus::Done);
    assert_eq!(snapshot.processed, 2);
    assert_eq!(snapshot.skipped, 1);
    // 单元 3 取索引 2（30 秒），而不是索引 1
    assert_eq!(*sender.sent.lock(), vec![(1, 10), (3, 30)]);

    let skips: Vec<_> = orchestrator
        .logs()
        .into_iter()
        .filter_map(|entry| match entry.event {
            LogEvent::Skip { reason, .. } => Some((entry.unit_id, reason)),
            _ => None,
        })
        .collect();
    assert_eq!(skips, vec![(Some(2), SkipReason::MissingMarker)]);
    // 跳过的单元也会关闭标签页
    assert_eq!(driver.closed.lock().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_between_units() {
    let driver = Arc::new(FakeDriver::default());
    let sender = Arc::new(FakeSender::default());
    let orchestrator = orchestrator(driver.clone(), sender.clone());
    let mut progress = orchestrator.subscribe();

    orchestrator.start(command(&[1, 2, 3], &[10, 20, 30], course()));

    loop {
        let event = assert_ok!(progress.recv().await);
        if event.processed == 1 {
            assert_eq!(orchestrator.cancel(), CancelResponse::Cancelling);
            break;
        }
    }

    let snapshot = orchestrator.wait().await;
    assert_eq!(snapshot.status, RunStatus::Cancelled);
    assert_eq!(snapshot.processed, 1);
    assert!(snapshot.cancel_requested);
    // 单元 2 既没有打开页面，也没有发出请求
    assert_eq!(driver.opened_units(), vec![1]);
    assert_eq!(*sender.sent.lock(), vec![(1, 10)]);
    assert!(orchestrator
        .logs()
        .iter()
        .all(|entry| entry.unit_id != Some(2)));
}

#[tokio::test(start_paused = true)]
async fn test_repeated_cancel_stops_once() {
    let driver = Arc::new(FakeDriver::default());
    let sender = Arc::new(FakeSender::default());
    let orchestrator = orchestrator(driver, sender.clone());

    orchestrator.start(command(&[1, 2], &[10, 20], course()));
    assert_eq!(orchestrator.cancel(), CancelResponse::Cancelling);
    assert_eq!(orchestrator.cancel(), CancelResponse::Cancelling);

    let snapshot = orchestrator.wait().await;
    assert_eq!(snapshot.status, RunStatus::Cancelled);
    assert_eq!(snapshot.processed, 0);
    assert_eq!(snapshot.skipped, 0);
    assert!(sender.sent.lock().is_empty());

    let stages: Vec<_> = orchestrator
        .logs()
        .into_iter()
        .filter_map(|entry| match entry.event {
            LogEvent::Cancel { stage, .. } => Some(stage),
            _ => None,
        })
        .collect();
    assert_eq!(stages, vec![CancelStage::Pending, CancelStage::Cancelled]);

    // 运行结束后取消无效
    assert_eq!(orchestrator.cancel(), CancelResponse::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_request_error_aborts_run() {
    let driver = Arc::new(FakeDriver::default());
    let sender = Arc::new(FakeSender {
        fail_on: Some(2),
        ..FakeSender::default()
    });
    let orchestrator = orchestrator(driver.clone(), sender.clone());

    orchestrator.start(command(&[1, 2, 3], &[10, 20, 30], course()));
    let snapshot = orchestrator.wait().await;

    assert_eq!(snapshot.status, RunStatus::Error);
    assert_eq!(snapshot.processed, 1);
    assert!(snapshot.error.as_deref().unwrap_or_default().contains("HTTP 500"));
    assert_eq!(driver.opened_units(), vec![1, 2]);
    assert_eq!(driver.closed.lock().len(), 2);
    assert_eq!(*sender.sent.lock(), vec![(1, 10), (2, 20)]);

    let last = orchestrator.logs().pop().map(|entry| entry.event);
    assert!(matches!(last, Some(LogEvent::Error { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_start_rejects_overlap_and_empty_input() {
    let driver = Arc::new(FakeDriver::default());
    let sender = Arc::new(FakeSender::default());
    let orchestrator = orchestrator(driver, sender);

    assert_eq!(
        orchestrator.start(command(&[-1, 0], &[10], course())),
        StartResponse::NoEntries
    );

    assert_eq!(
        orchestrator.start(command(&[1, 2], &[10, 20], course())),
        StartResponse::Started { total: 2 }
    );
    assert_eq!(
        orchestrator.start(command(&[3], &[30], course())),
        StartResponse::AlreadyRunning
    );

    let snapshot = orchestrator.wait().await;
    assert_eq!(snapshot.status, RunStatus::Done);
    assert_eq!(snapshot.total, 2);

    // 上一次运行结束后可以再次启动
    assert_eq!(
        orchestrator.start(command(&[3], &[30], course())),
        StartResponse::Started { total: 1 }
    );
    assert_eq!(orchestrator.wait().await.processed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_without_course_id_every_unit_is_skipped() {
    let driver = Arc::new(FakeDriver::default());
    let sender = Arc::new(FakeSender::default());
    let orchestrator = orchestrator(driver.clone(), sender.clone());

    orchestrator.start(command(&[1, 2, 3], &[10, 20, 30], None));
    let snapshot = orchestrator.wait().await;

    assert_eq!(snapshot.status, RunStatus::Done);
    assert_eq!(snapshot.processed, 0);
    assert_eq!(snapshot.skipped, 3);
    assert!(driver.opened_units().is_empty());
    assert!(sender.sent.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_progress_events_follow_unit_order() {
    let driver = Arc::new(FakeDriver::without_marker(&[2]));
    let sender = Arc::new(FakeSender::default());
    let orchestrator = orchestrator(driver, sender);
    let mut progress = orchestrator.subscribe();

    orchestrator.start(command(&[1, 2, 3], &[10, 20, 30], course()));
    orchestrator.wait().await;

    let mut events = Vec::new();
    while let Ok(event) = progress.try_recv() {
        events.push((event.status, event.processed, event.skipped, event.last_unit_id));
    }
    assert_eq!(
        events,
        vec![
            (RunStatus::Running, 0, 0, None),
            (RunStatus::Running, 1, 0, Some(1)),
            (RunStatus::Running, 1, 1, Some(2)),
            (RunStatus::Running, 2, 1, Some(3)),
            (RunStatus::Done, 2, 1, Some(3)),
        ]
    );
}

#[tokio::test]
async fn test_run_against_mock_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/api/v2/unit/complete/current-time"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"ok\":true}"))
        .expect(2)
        .mount(&server)
        .await;

    let log = RequestLog::default();
    let client = CompletionClient::new(
        ClientSettings {
            api_url: format!("{}/api/v2/unit/complete/current-time", server.uri()),
            user_id: 42,
            session_cookie: "SESSION=abc".to_string(),
            referer: "inflearn-mobile://CourseDetail".to_string(),
            user_agent: "Android/15 (InflearnMobile 2025.908.28;)".to_string(),
            prev_request_lookback: Duration::from_secs(60),
            timeout: Duration::from_secs(5),
        },
        log.clone(),
    )
    .unwrap();

    let orchestrator = RunOrchestrator::new(
        Arc::new(FakeDriver::default()),
        Arc::new(client),
        log,
        VisitSettings {
            settle_delay: Duration::ZERO,
            ..VisitSettings::default()
        },
        PacingSettings {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        },
    );

    orchestrator.start(command(&[7, 8], &[65, 125], course()));
    let snapshot = orchestrator.wait().await;
    assert_eq!(snapshot.status, RunStatus::Done);
    assert_eq!(snapshot.processed, 2);

    let phases: Vec<_> = orchestrator.logs().iter().map(|e| e.phase()).collect();
    assert_eq!(
        phases,
        vec![
            "visit", "request", "response", "summary", "visit", "request", "response", "summary"
        ]
    );

    let received = server.received_requests().await.unwrap_or_default();
    let body: serde_json::Value = serde_json::from_slice(&received[1].body).unwrap();
    assert_eq!(body["unitId"], 8);
    assert_eq!(body["currentTime"], 125);
    assert_eq!(body["userId"], 42);

    orchestrator.clear_logs();
    assert!(orchestrator.logs().is_empty());
}
