//! 标签页驱动 - 基础设施层
//!
//! 讲座页面访问需要的四个动作：打开后台标签页、等待加载、读取地址、关闭。
//! 访问逻辑只依赖 [`TabDriver`]，Chromium 的实现通过 DevTools 协议完成。

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::{Browser, Page};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::VisitError;

/// 本地分配的标签页编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TabId(pub u64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab#{}", self.0)
    }
}

#[async_trait]
pub trait TabDriver: Send + Sync {
    /// 打开一个不激活的后台标签页并开始导航
    async fn open_tab(&self, url: &str) -> Result<TabId, VisitError>;

    /// 等待当前导航完成；可能永远不返回，由调用方负责超时
    async fn wait_loaded(&self, tab: TabId) -> Result<(), VisitError>;

    async fn current_url(&self, tab: TabId) -> Result<Option<String>, VisitError>;

    async fn close_tab(&self, tab: TabId) -> Result<(), VisitError>;
}

/// 基于 chromiumoxide 的标签页驱动
///
/// 唯一持有 Browser 的对象，打开的页面按 [`TabId`] 保存，关闭时移除。
pub struct ChromiumTabDriver {
    browser: Browser,
    pages: Mutex<HashMap<TabId, Page>>,
    next_id: AtomicU64,
}

impl ChromiumTabDriver {
    pub fn new(browser: Browser) -> Self {
        Self {
            browser,
            pages: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn browser(&self) -> &Browser {
        &self.browser
    }

    fn page(&self, tab: TabId) -> Result<Page, VisitError> {
        self.pages
            .lock()
            .get(&tab)
            .cloned()
            .ok_or(VisitError::UnknownTab(tab))
    }
}

#[async_trait]
impl TabDriver for ChromiumTabDriver {
    async fn open_tab(&self, url: &str) -> Result<TabId, VisitError> {
        let params = CreateTargetParams::builder()
            .url(url)
            .background(true)
            .build()
            .map_err(|e| VisitError::TabOpenFailed {
                url: url.to_string(),
                source: e.into(),
            })?;

        let page = self
            .browser
            .new_page(params)
            .await
            .map_err(|e| VisitError::TabOpenFailed {
                url: url.to_string(),
                source: Box::new(e),
            })?;

        let tab = TabId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!("已打开 {}: {}", tab, url);
        self.pages.lock().insert(tab, page);
        Ok(tab)
    }

    async fn wait_loaded(&self, tab: TabId) -> Result<(), VisitError> {
        let page = self.page(tab)?;
        page.wait_for_navigation()
            .await
            .map_err(|e| VisitError::NavigationFailed {
                tab,
                source: Box::new(e),
            })?;
        Ok(())
    }

    async fn current_url(&self, tab: TabId) -> Result<Option<String>, VisitError> {
        let page = self.page(tab)?;
        page.url().await.map_err(|e| VisitError::UrlReadFailed {
            tab,
            source: Box::new(e),
        })
    }

    async fn close_tab(&self, tab: TabId) -> Result<(), VisitError> {
        let page = self
            .pages
            .lock()
            .remove(&tab)
            .ok_or(VisitError::UnknownTab(tab))?;
        page.close().await.map_err(|e| VisitError::TabCloseFailed {
            tab,
            source: Box::new(e),
        })?;
        debug!("已关闭 {}", tab);
        Ok(())
    }
}
