//! JS 执行器 - 基础设施层
//!
//! 持有课程页面，只暴露"执行 JS"的能力

use anyhow::Result;
use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::debug;

/// JS 执行器
///
/// 职责：
/// - 持有课程页面的 Page
/// - 暴露 eval() 能力
/// - 不认识单元 / 时间码
pub struct JsExecutor {
    page: Page,
}

impl JsExecutor {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    /// 执行 JS 代码并返回 JSON 结果
    pub async fn eval(&self, js_code: impl Into<String>) -> Result<JsonValue> {
        let result = self.page.evaluate(js_code.into()).await?;
        let json_value = result.into_value()?;
        Ok(json_value)
    }

    /// 执行 JS 代码并反序列化为指定类型
    pub async fn eval_as<T: DeserializeOwned>(&self, js_code: impl Into<String>) -> Result<T> {
        let json_value = self.eval(js_code).await?;
        let typed_value = serde_json::from_value(json_value)?;
        Ok(typed_value)
    }

    /// 读取页面渲染后的标记（`documentElement.innerHTML`）
    pub async fn rendered_html(&self) -> Result<String> {
        let html: Option<String> = self
            .eval_as("document.documentElement ? document.documentElement.innerHTML : ''")
            .await?;
        Ok(html.unwrap_or_default())
    }

    /// 当前页面地址，读取失败时为 None
    pub async fn location(&self) -> Option<String> {
        match self.page.url().await {
            Ok(url) => url,
            Err(e) => {
                debug!("读取页面地址失败: {}", e);
                None
            }
        }
    }
}
