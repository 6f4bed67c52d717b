use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// 配置文件默认路径
pub const DEFAULT_CONFIG_FILE: &str = "unit_completer.toml";

/// 程序配置文件
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 浏览器调试端口
    pub browser_debug_port: u16,
    /// 是否自行启动无头浏览器（而不是连接已有浏览器）
    pub launch_headless: bool,
    /// 无头模式下的浏览器可执行文件
    pub chrome_executable: Option<String>,
    /// 课程页面 URL（找不到已打开的页面时导航到此处）
    pub course_page_url: Option<String>,
    /// 课程页面标题关键字，用于在已打开的页面中查找
    pub course_page_title: Option<String>,
    // --- 完成请求 ---
    pub api_url: String,
    pub lecture_url_base: String,
    pub user_id: u64,
    pub session_cookie: String,
    pub referer: String,
    pub user_agent: String,
    /// 上一次心跳的回溯秒数
    pub prev_request_lookback_secs: u64,
    pub request_timeout_secs: u64,
    // --- 页面访问 ---
    /// 字幕参数名，出现在最终 URL 中表示页面已就绪
    pub marker_param: String,
    pub page_load_timeout_ms: u64,
    pub cancel_poll_interval_ms: u64,
    pub settle_delay_ms: u64,
    // --- 节奏控制 ---
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    // --- 日志 ---
    /// 请求日志环形缓冲区容量
    pub log_capacity: usize,
    /// 运行结束后导出请求日志的文件
    pub output_log_file: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            browser_debug_port: 9222,
            launch_headless: false,
            chrome_executable: None,
            course_page_url: None,
            course_page_title: None,
            api_url: "https://www.inflearn.com/api/v2/unit/complete/current-time".to_string(),
            lecture_url_base: "https://www.inflearn.com/courses/lecture".to_string(),
            user_id: 0,
            session_cookie: String::new(),
            referer: "inflearn-mobile://CourseDetail".to_string(),
            user_agent: "Android/15 (InflearnMobile 2025.908.28;)".to_string(),
            prev_request_lookback_secs: 60,
            request_timeout_secs: 30,
            marker_param: "subtitleLanguage".to_string(),
            page_load_timeout_ms: 10_000,
            cancel_poll_interval_ms: 150,
            settle_delay_ms: 300,
            min_delay_ms: 200,
            max_delay_ms: 800,
            log_capacity: 200,
            output_log_file: "request_log.json".to_string(),
            verbose_logging: false,
        }
    }
}

impl Config {
    /// 读取配置：TOML 文件（可选）+ 环境变量覆盖
    ///
    /// 文件路径取自 `UNIT_COMPLETER_CONFIG`，未设置时尝试当前目录下的
    /// [`DEFAULT_CONFIG_FILE`]，文件不存在则使用默认值。
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var("UNIT_COMPLETER_CONFIG").ok();
        let path = explicit.clone().unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());

        if Path::new(&path).exists() {
            Ok(Self::from_toml_file(&path)?.with_env_overrides())
        } else if explicit.is_some() {
            Err(ConfigError::FileNotFound { path })
        } else {
            Ok(Self::from_env())
        }
    }

    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn from_toml_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_string(),
            source: e,
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::TomlParse { source, .. } => ConfigError::TomlParse {
                path: path.to_string(),
                source,
            },
            other => other,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::TomlParse {
            path: String::new(),
            source: e,
        })
    }

    fn with_env_overrides(self) -> Self {
        let default = self;
        Self {
            browser_debug_port: env_parse("BROWSER_DEBUG_PORT").unwrap_or(default.browser_debug_port),
            launch_headless: env_parse("LAUNCH_HEADLESS").unwrap_or(default.launch_headless),
            chrome_executable: std::env::var("CHROME_EXECUTABLE").ok().or(default.chrome_executable),
            course_page_url: std::env::var("COURSE_PAGE_URL").ok().or(default.course_page_url),
            course_page_title: std::env::var("COURSE_PAGE_TITLE").ok().or(default.course_page_title),
            api_url: std::env::var("COMPLETION_API_URL").unwrap_or(default.api_url),
            lecture_url_base: std::env::var("LECTURE_URL_BASE").unwrap_or(default.lecture_url_base),
            user_id: env_parse("COMPLETION_USER_ID").unwrap_or(default.user_id),
            session_cookie: std::env::var("SESSION_COOKIE").unwrap_or(default.session_cookie),
            referer: std::env::var("REQUEST_REFERER").unwrap_or(default.referer),
            user_agent: std::env::var("REQUEST_USER_AGENT").unwrap_or(default.user_agent),
            prev_request_lookback_secs: env_parse("PREV_REQUEST_LOOKBACK_SECS").unwrap_or(default.prev_request_lookback_secs),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS").unwrap_or(default.request_timeout_secs),
            marker_param: std::env::var("MARKER_PARAM").unwrap_or(default.marker_param),
            page_load_timeout_ms: env_parse("PAGE_LOAD_TIMEOUT_MS").unwrap_or(default.page_load_timeout_ms),
            cancel_poll_interval_ms: env_parse("CANCEL_POLL_INTERVAL_MS").unwrap_or(default.cancel_poll_interval_ms),
            settle_delay_ms: env_parse("SETTLE_DELAY_MS").unwrap_or(default.settle_delay_ms),
            min_delay_ms: env_parse("MIN_DELAY_MS").unwrap_or(default.min_delay_ms),
            max_delay_ms: env_parse("MAX_DELAY_MS").unwrap_or(default.max_delay_ms),
            log_capacity: env_parse("LOG_CAPACITY").unwrap_or(default.log_capacity),
            output_log_file: std::env::var("OUTPUT_LOG_FILE").unwrap_or(default.output_log_file),
            verbose_logging: env_parse("VERBOSE_LOGGING").unwrap_or(default.verbose_logging),
        }
    }

    /// 运行前的必要检查
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_cookie.trim().is_empty() {
            return Err(ConfigError::MissingValue {
                field: "session_cookie".to_string(),
            });
        }
        if self.user_id == 0 {
            return Err(ConfigError::MissingValue {
                field: "user_id".to_string(),
            });
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(ConfigError::InvalidRange {
                field: "min_delay_ms..=max_delay_ms".to_string(),
                min: self.min_delay_ms,
                max: self.max_delay_ms,
            });
        }
        Ok(())
    }

    pub fn visit_settings(&self) -> VisitSettings {
        VisitSettings {
            lecture_url_base: self.lecture_url_base.clone(),
            load_timeout: Duration::from_millis(self.page_load_timeout_ms),
            poll_interval: Duration::from_millis(self.cancel_poll_interval_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            marker_param: self.marker_param.clone(),
        }
    }

    pub fn pacing_settings(&self) -> PacingSettings {
        PacingSettings {
            min_delay: Duration::from_millis(self.min_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            api_url: self.api_url.clone(),
            user_id: self.user_id,
            session_cookie: self.session_cookie.clone(),
            referer: self.referer.clone(),
            user_agent: self.user_agent.clone(),
            prev_request_lookback: Duration::from_secs(self.prev_request_lookback_secs),
            timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// 页面访问参数
#[derive(Clone, Debug)]
pub struct VisitSettings {
    pub lecture_url_base: String,
    pub load_timeout: Duration,
    pub poll_interval: Duration,
    pub settle_delay: Duration,
    pub marker_param: String,
}

impl Default for VisitSettings {
    fn default() -> Self {
        Config::default().visit_settings()
    }
}

/// 两个单元之间的随机等待区间（闭区间）
#[derive(Clone, Copy, Debug)]
pub struct PacingSettings {
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for PacingSettings {
    fn default() -> Self {
        Config::default().pacing_settings()
    }
}

/// 完成请求客户端参数
#[derive(Clone, Debug)]
pub struct ClientSettings {
    pub api_url: String,
    pub user_id: u64,
    pub session_cookie: String,
    pub referer: String,
    pub user_agent: String,
    pub prev_request_lookback: Duration,
    pub timeout: Duration,
}
