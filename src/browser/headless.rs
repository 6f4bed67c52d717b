use std::path::Path;

use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::error::BrowserError;

/// 启动无头浏览器并打开课程页面
///
/// 未指定可执行文件时由 chromiumoxide 自动查找本机 Chrome。
pub async fn launch_headless_browser(
    url: &str,
    executable: Option<&str>,
) -> Result<(Browser, Page), BrowserError> {
    info!("🚀 启动无头浏览器...");
    debug!("目标 URL: {}, 可执行文件: {:?}", url, executable);

    let mut builder = BrowserConfig::builder().new_headless_mode().args(vec![
        "--disable-gpu",
        "--no-sandbox",
        "--disable-dev-shm-usage",
    ]);
    if let Some(path) = executable {
        builder = builder.chrome_executable(Path::new(path));
    }

    let config = builder.build().map_err(|message| {
        error!("配置无头浏览器失败: {}", message);
        BrowserError::ConfigurationFailed { message }
    })?;

    let (browser, mut handler) = Browser::launch(config).await.map_err(|e| {
        error!("启动无头浏览器失败: {}", e);
        BrowserError::ConfigurationFailed {
            message: e.to_string(),
        }
    })?;
    debug!("无头浏览器启动成功");

    tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    sleep(tokio::time::Duration::from_millis(300)).await;

    let page = browser
        .new_page(url)
        .await
        .map_err(|e| BrowserError::NavigationFailed {
            url: url.to_string(),
            source: Box::new(e),
        })?;

    info!("✅ 无头浏览器已打开: {}", url);
    Ok((browser, page))
}
