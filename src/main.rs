use anyhow::{bail, Result};
use unit_completer::models::RunStatus;
use unit_completer::utils::logging;
use unit_completer::{App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = Config::load()?;

    // 初始化日志
    logging::init(config.verbose_logging);

    // 初始化并运行应用
    let snapshot = App::initialize(config).await?.run().await?;

    if snapshot.status == RunStatus::Error {
        bail!(
            "运行因错误终止: {}",
            snapshot.error.unwrap_or_default()
        );
    }

    Ok(())
}
