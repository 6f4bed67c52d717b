use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::error::BrowserError;

/// 连接到已打开调试端口的浏览器，并找到课程页面
///
/// 先按标题关键字、再按 URL 前缀在已打开的页面中查找；都找不到时新建页面，
/// 有 `target_url` 则导航过去。
pub async fn connect_to_browser_and_page(
    port: u16,
    target_url: Option<&str>,
    target_title: Option<&str>,
) -> Result<(Browser, Page), BrowserError> {
    let browser_url = format!("http://localhost:{}", port);
    info!("正在连接到浏览器: {}", browser_url);
    debug!("目标 URL: {:?}, 目标标题: {:?}", target_url, target_title);

    let (browser, mut handler) = Browser::connect(&browser_url).await.map_err(|e| {
        error!("连接浏览器失败: {}", e);
        BrowserError::ConnectionFailed {
            port,
            source: Box::new(e),
        }
    })?;
    debug!("浏览器连接成功");

    // 在后台处理浏览器事件
    tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    // 等待浏览器状态同步
    sleep(tokio::time::Duration::from_millis(300)).await;

    let pages = browser.pages().await?;
    debug!("获取到 {} 个页面", pages.len());

    if let Some(page) = find_open_page(&pages, target_url, target_title).await {
        return Ok((browser, page));
    }

    let page = browser.new_page("about:blank").await.map_err(|e| {
        error!("创建新页面失败: {}", e);
        BrowserError::PageCreationFailed {
            source: Box::new(e),
        }
    })?;

    if let Some(url) = target_url {
        debug!("未找到已打开的课程页面，导航到: {}", url);
        page.goto(url)
            .await
            .map_err(|e| BrowserError::NavigationFailed {
                url: url.to_string(),
                source: Box::new(e),
            })?;
        info!("已导航到: {}", url);
    }

    Ok((browser, page))
}

async fn find_open_page(
    pages: &[Page],
    target_url: Option<&str>,
    target_title: Option<&str>,
) -> Option<Page> {
    if let Some(title) = target_title {
        debug!("正在查找标题包含 '{}' 的页面", title);
        for p in pages {
            if let Ok(Some(page_title)) = p.get_title().await {
                if page_title.contains(title) {
                    info!("✓ 找到课程页面: {}", page_title);
                    return Some(p.clone());
                }
            }
        }
    }

    if let Some(url) = target_url {
        for p in pages {
            if let Ok(Some(page_url)) = p.url().await {
                if page_url.starts_with(url) {
                    info!("✓ 找到课程页面: {}", page_url);
                    return Some(p.clone());
                }
            }
        }
    }

    None
}
