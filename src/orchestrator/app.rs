//! 命令行应用 - 编排层
//!
//! 应用入口：连接浏览器 → 提取课程页面数据 → 启动运行 → 转发进度 →
//! Ctrl-C 取消 → 导出请求日志。

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chromiumoxide::{Browser, Page};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::browser;
use crate::clients::CompletionClient;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::infrastructure::{ChromiumTabDriver, JsExecutor, RequestLog};
use crate::models::{RunSnapshot, StartResponse};
use crate::orchestrator::RunOrchestrator;
use crate::services::PageExtractor;
use crate::utils::logging;

/// 应用主结构
pub struct App {
    config: Config,
    executor: JsExecutor,
    orchestrator: RunOrchestrator,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        config.validate().context("配置校验失败")?;
        logging::log_startup(&config.api_url, config.browser_debug_port);

        let (browser, page) = open_course_page(&config).await?;
        let orchestrator = build_orchestrator(&config, browser)?;

        Ok(Self {
            config,
            executor: JsExecutor::new(page),
            orchestrator,
        })
    }

    /// 运行应用主逻辑，返回结束时的运行状态
    pub async fn run(&self) -> Result<RunSnapshot> {
        let extractor = PageExtractor::new()?;
        let data = extractor
            .extract(&self.executor)
            .await
            .context("提取课程页面数据失败")?;

        // 先订阅再启动，避免漏掉第一条进度
        let mut progress = self.orchestrator.subscribe();
        match self.orchestrator.start(data.to_start_command()) {
            StartResponse::Started { total } => info!("▶️ 已启动，共 {} 个单元", total),
            StartResponse::NoEntries => {
                warn!("⚠️ 页面上没有找到单元，程序结束");
                return Ok(self.orchestrator.status());
            }
            StartResponse::AlreadyRunning => bail!("已有运行进行中"),
        }

        loop {
            tokio::select! {
                event = progress.recv() => match event {
                    Ok(event) => {
                        logging::log_progress(&event);
                        if event.status.is_terminal() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!("进度事件积压，丢弃 {} 条", n);
                        if self.orchestrator.status().status.is_terminal() {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("收到 Ctrl-C，请求取消");
                    self.orchestrator.cancel();
                }
            }
        }

        let snapshot = self.orchestrator.wait().await;
        self.export_logs()?;
        logging::print_final_stats(&snapshot, &self.config.output_log_file);
        Ok(snapshot)
    }

    fn export_logs(&self) -> Result<()> {
        let entries = self.orchestrator.logs();
        let json = serde_json::to_string_pretty(&entries)?;
        std::fs::write(&self.config.output_log_file, json)
            .with_context(|| format!("写入请求日志失败: {}", self.config.output_log_file))?;
        Ok(())
    }
}

async fn open_course_page(config: &Config) -> AppResult<(Browser, Page)> {
    if config.launch_headless {
        let url = config
            .course_page_url
            .as_deref()
            .ok_or_else(|| AppError::Other("无头模式需要配置 course_page_url".to_string()))?;
        return Ok(
            browser::launch_headless_browser(url, config.chrome_executable.as_deref()).await?,
        );
    }

    Ok(browser::connect_to_browser_and_page(
        config.browser_debug_port,
        config.course_page_url.as_deref(),
        config.course_page_title.as_deref(),
    )
    .await?)
}

fn build_orchestrator(config: &Config, browser: Browser) -> AppResult<RunOrchestrator> {
    let log = RequestLog::new(config.log_capacity);
    let client = CompletionClient::new(config.client_settings(), log.clone())?;

    Ok(RunOrchestrator::new(
        Arc::new(ChromiumTabDriver::new(browser)),
        Arc::new(client),
        log,
        config.visit_settings(),
        config.pacing_settings(),
    ))
}
