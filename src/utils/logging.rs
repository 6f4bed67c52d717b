//! 日志工具模块
//!
//! 提供 tracing 初始化以及日志格式化的辅助函数

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::models::{ProgressEvent, RunSnapshot};

/// 初始化 tracing 订阅者
///
/// `RUST_LOG` 优先；否则按 `verbose` 选择 debug 或 info 级别。
pub fn init(verbose: bool) {
    let default_level = if verbose {
        "unit_completer=debug,info"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // 测试中可能被多次调用，重复初始化直接忽略
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(api_url: &str, port: u16) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 课程单元完成模式");
    info!("🌐 完成接口: {}", api_url);
    info!("🔌 浏览器调试端口: {}", port);
    info!("{}", "=".repeat(60));
}

/// 记录单个进度事件
pub fn log_progress(event: &ProgressEvent) {
    let last = event
        .last_unit_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    info!(
        "📈 进度 [{:?}]: 完成 {} / 跳过 {} / 共 {} (最近单元: {})",
        event.status, event.processed, event.skipped, event.total, last
    );
}

/// 打印最终统计信息
pub fn print_final_stats(snapshot: &RunSnapshot, log_file_path: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📊 运行结束统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("状态: {:?}", snapshot.status);
    info!("✅ 完成: {}/{}", snapshot.processed, snapshot.total);
    info!("⏭️ 跳过: {}", snapshot.skipped);
    if let Some(error) = &snapshot.error {
        info!("❌ 错误: {}", error);
    }
    info!("{}", "=".repeat(60));
    info!("\n请求日志已保存至: {}", log_file_path);
}

/// 截断长文本用于日志显示，超出部分以 "…" 结尾
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "…"
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text_counts_chars() {
        assert_eq!(truncate_text("abc", 3), "abc");
        assert_eq!(truncate_text("abcd", 3), "abc…");
        // 多字节字符按字符计数
        assert_eq!(truncate_text("강의완료요청", 2), "강의…");
    }
}
