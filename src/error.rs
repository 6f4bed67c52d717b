use thiserror::Error;

use crate::infrastructure::TabId;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 浏览器连接 / 启动错误
    #[error("浏览器错误: {0}")]
    Browser(#[from] BrowserError),
    /// 课程页面访问错误
    #[error("页面访问错误: {0}")]
    Visit(#[from] VisitError),
    /// 完成请求错误
    #[error("请求错误: {0}")]
    Request(#[from] RequestError),
    /// 页面数据提取错误
    #[error("提取错误: {0}")]
    Extraction(#[from] ExtractionError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 其他错误
    #[error("错误: {0}")]
    Other(String),
}

/// 浏览器相关错误
#[derive(Debug, Error)]
pub enum BrowserError {
    /// 连接浏览器失败
    #[error("无法连接到浏览器 (端口: {port}): {source}")]
    ConnectionFailed { port: u16, source: BoxError },
    /// 创建页面失败
    #[error("创建页面失败: {source}")]
    PageCreationFailed { source: BoxError },
    /// 导航失败
    #[error("导航到 {url} 失败: {source}")]
    NavigationFailed { url: String, source: BoxError },
    /// 浏览器配置失败
    #[error("浏览器配置失败: {message}")]
    ConfigurationFailed { message: String },
}

/// 课程页面访问错误（标签页创建 / 导航 / 读取 / 关闭）
#[derive(Debug, Error)]
pub enum VisitError {
    #[error("无法打开标签页 {url}: {source}")]
    TabOpenFailed { url: String, source: BoxError },
    #[error("等待标签页 {tab} 加载失败: {source}")]
    NavigationFailed { tab: TabId, source: BoxError },
    #[error("读取标签页 {tab} 的 URL 失败: {source}")]
    UrlReadFailed { tab: TabId, source: BoxError },
    #[error("关闭标签页 {tab} 失败: {source}")]
    TabCloseFailed { tab: TabId, source: BoxError },
    #[error("未知的标签页: {0}")]
    UnknownTab(TabId),
}

/// 完成请求错误，任何一种都会终止整个运行
#[derive(Debug, Error)]
pub enum RequestError {
    /// 收到响应之前的网络错误
    #[error("请求发送失败 ({endpoint}): {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    /// 非 2xx 响应
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
    /// 请求体序列化失败
    #[error("请求体序列化失败: {0}")]
    Encode(#[from] serde_json::Error),
    /// 客户端构建失败
    #[error("无法创建 HTTP 客户端: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

impl RequestError {
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// 页面数据提取错误
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("执行提取脚本失败: {0}")]
    ScriptFailed(#[source] BoxError),
    #[error("正则表达式无效: {0}")]
    Pattern(#[from] regex::Error),
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("配置文件不存在: {path}")]
    FileNotFound { path: String },
    #[error("读取配置文件失败 ({path}): {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("缺少必要配置: {field}")]
    MissingValue { field: String },
    #[error("配置区间无效 {field}: {min} > {max}")]
    InvalidRange { field: String, min: u64, max: u64 },
}

impl From<chromiumoxide::error::CdpError> for BrowserError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        BrowserError::PageCreationFailed {
            source: Box::new(err),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
