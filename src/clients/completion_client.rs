/// 完成请求客户端
///
/// 为单个单元构造并发送一次进度更新请求（PATCH），
/// 每次发送都会在请求日志中留下 待发送 / 响应 / 汇总 三条记录。
use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ClientSettings;
use crate::error::RequestError;
use crate::infrastructure::RequestLog;
use crate::models::{
    BlockedHeader, LogEvent, RequestMeta, RequestRecord, ResponseRecord, UnitId,
};
use crate::utils::truncate_text;

/// 响应体预览的最大字符数
const BODY_PREVIEW_CHARS: usize = 400;

/// 发送完成请求的能力
///
/// 编排层只依赖这个 trait，测试中用假实现替换。
#[async_trait]
pub trait CompletionSender: Send + Sync {
    /// 成功（2xx）时返回原始响应体
    async fn send(
        &self,
        unit_id: UnitId,
        duration_seconds: u32,
        meta: RequestMeta,
    ) -> Result<String, RequestError>;
}

/// 请求体
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionPayload {
    pub unit_id: UnitId,
    pub user_id: u64,
    pub current_time: u32,
    /// 毫秒时间戳，模拟一次较早的心跳
    pub prev_request_time: i64,
}

struct PreparedHeaders {
    headers: HeaderMap,
    applied: BTreeMap<String, String>,
    blocked: Vec<BlockedHeader>,
}

pub struct CompletionClient {
    http: reqwest::Client,
    settings: ClientSettings,
    log: RequestLog,
}

impl CompletionClient {
    pub fn new(settings: ClientSettings, log: RequestLog) -> Result<Self, RequestError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(RequestError::ClientBuild)?;
        Ok(Self {
            http,
            settings,
            log,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.settings.api_url
    }

    pub fn build_payload(&self, unit_id: UnitId, duration_seconds: u32) -> CompletionPayload {
        let lookback = i64::try_from(self.settings.prev_request_lookback.as_millis()).unwrap_or(0);
        CompletionPayload {
            unit_id,
            user_id: self.settings.user_id,
            current_time: duration_seconds,
            prev_request_time: Utc::now().timestamp_millis() - lookback,
        }
    }

    /// 构造请求头
    ///
    /// 内容协商头总是设置；其余头若名称或值不合法则记录下来跳过，不影响发送。
    fn build_headers(&self) -> PreparedHeaders {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let desired = [
            ("referer", self.settings.referer.as_str()),
            ("user-agent", self.settings.user_agent.as_str()),
            ("cookie", self.settings.session_cookie.as_str()),
        ];

        let mut blocked = Vec::new();
        for (key, value) in desired {
            let name = match HeaderName::from_bytes(key.as_bytes()) {
                Ok(name) => name,
                Err(e) => {
                    blocked.push(BlockedHeader {
                        key: key.to_string(),
                        value: value.to_string(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            match HeaderValue::from_str(value) {
                Ok(v) => {
                    headers.insert(name, v);
                }
                Err(e) => blocked.push(BlockedHeader {
                    key: key.to_string(),
                    value: value.to_string(),
                    error: e.to_string(),
                }),
            }
        }

        let applied = headers
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();

        PreparedHeaders {
            headers,
            applied,
            blocked,
        }
    }
}

#[async_trait]
impl CompletionSender for CompletionClient {
    async fn send(
        &self,
        unit_id: UnitId,
        duration_seconds: u32,
        meta: RequestMeta,
    ) -> Result<String, RequestError> {
        let payload = self.build_payload(unit_id, duration_seconds);
        let body = serde_json::to_string(&payload)?;
        let PreparedHeaders {
            headers,
            applied,
            blocked,
        } = self.build_headers();

        if !blocked.is_empty() {
            warn!(
                "[单元 {}] {} 个请求头无法设置，将在没有它们的情况下发送",
                unit_id,
                blocked.len()
            );
        }

        self.log.record(
            Some(unit_id),
            LogEvent::PendingRequest {
                request: RequestRecord {
                    method: "PATCH".to_string(),
                    url: self.settings.api_url.clone(),
                    body: body.clone(),
                    headers: applied,
                },
                blocked_headers: blocked,
                meta: meta.clone(),
            },
        );
        info!(
            "[单元 {}] 📤 发送完成请求 (currentTime={}s)",
            unit_id, duration_seconds
        );
        debug!("请求体: {}", body);

        let response = match self
            .http
            .patch(&self.settings.api_url)
            .headers(headers)
            .body(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                self.log.record(
                    Some(unit_id),
                    LogEvent::Response {
                        ok: false,
                        response: None,
                        message: Some(e.to_string()),
                        meta,
                    },
                );
                warn!("[单元 {}] 请求在收到响应前失败: {}", unit_id, e);
                return Err(RequestError::Transport {
                    endpoint: self.settings.api_url.clone(),
                    source: e,
                });
            }
        };

        let status = response.status();
        let raw_body = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                self.log.record(
                    Some(unit_id),
                    LogEvent::Response {
                        ok: false,
                        response: None,
                        message: Some(e.to_string()),
                        meta,
                    },
                );
                return Err(RequestError::Transport {
                    endpoint: self.settings.api_url.clone(),
                    source: e,
                });
            }
        };

        let ok = status.is_success();
        let body_snippet = truncate_text(&raw_body, BODY_PREVIEW_CHARS);
        self.log.record(
            Some(unit_id),
            LogEvent::Response {
                ok,
                response: Some(ResponseRecord {
                    status: status.as_u16(),
                    ok,
                    body_snippet: body_snippet.clone(),
                }),
                message: (!ok).then(|| format!("HTTP {}", status.as_u16())),
                meta: meta.clone(),
            },
        );
        info!(
            "[单元 {}] 收到响应: HTTP {} {}",
            unit_id,
            status.as_u16(),
            body_snippet
        );

        if !ok {
            return Err(RequestError::HttpStatus {
                status: status.as_u16(),
                body: raw_body,
            });
        }

        self.log.record(Some(unit_id), LogEvent::Summary { meta });
        Ok(raw_body)
    }
}
