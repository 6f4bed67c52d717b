//! 编排层（Orchestration Layer）
//!
//! ## 模块划分
//!
//! ### `run_orchestrator` - 运行编排器
//! - 持有唯一的运行状态和请求日志
//! - 提供 start / cancel / status / logs / clear_logs 命令接口
//! - 顺序驱动单元，控制节奏，推送进度
//!
//! ### `app` - 命令行应用
//! - 连接浏览器、创建客户端和编排器
//! - 提取课程页面数据并启动运行
//! - Ctrl-C 映射为取消，结束后导出请求日志
//!
//! ## 层次关系
//!
//! ```text
//! app (命令行)
//!     ↓
//! run_orchestrator (处理 Vec<UnitId>)
//!     ↓
//! workflow::UnitFlow (处理单个单元)
//!     ↓
//! services (能力层：visit / extract) + clients (完成请求)
//!     ↓
//! infrastructure (基础设施：TabDriver / JsExecutor / RequestLog)
//! ```

pub mod app;
pub mod run_orchestrator;

pub use app::App;
pub use run_orchestrator::RunOrchestrator;
