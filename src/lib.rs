//! # Unit Completer
//!
//! 按课程页面上的单元列表，逐个访问讲座页面并上报完成进度。
//!
//! ## 架构设计
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（页面、标签页、日志缓冲区），只暴露能力
//! - `JsExecutor` - 课程页面的唯一持有者，提供 eval() 能力
//! - `TabDriver` - 后台标签页的打开 / 等待 / 读取 / 关闭
//! - `RequestLog` - 容量有限的结构化请求日志
//!
//! ### ② 客户端与业务能力层（Clients / Services）
//! - `clients/` - `CompletionClient`，唯一的 HTTP 接口
//! - `services/` - 描述"我能做什么"，只处理单个单元
//! - `LectureVisitor` - 讲座页面访问能力
//! - `PageExtractor` - 课程页面数据提取能力
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个单元"的完整处理流程
//! - `UnitCtx` - 上下文封装（unit_id + 位置）
//! - `UnitFlow` - 流程编排（visit → 校验 → 请求 → 关闭标签页）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/run_orchestrator` - 运行状态、命令接口、取消与节奏控制
//! - `orchestrator/app` - 命令行应用

pub mod browser;
pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use browser::connect_to_browser_and_page;
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::{JsExecutor, RequestLog, TabDriver};
pub use models::{LogEntry, RunSnapshot, RunStatus, StartCommand};
pub use orchestrator::{App, RunOrchestrator};
pub use workflow::{UnitCtx, UnitFlow, UnitOutcome};
