//! 基础设施层
//!
//! 持有稀缺资源（页面、标签页、请求日志缓冲区），只暴露能力

pub mod js_executor;
pub mod request_log;
pub mod tab_driver;

pub use js_executor::JsExecutor;
pub use request_log::{RequestLog, DEFAULT_LOG_CAPACITY};
pub use tab_driver::{ChromiumTabDriver, TabDriver, TabId};
