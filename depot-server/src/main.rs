use anyhow::Context;
use depot_server::{ServerState, print_banner, setup_environment};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. 设置环境 (dotenv, 日志) 并加载配置
    let config = setup_environment().context("failed to set up environment")?;

    print_banner();
    tracing::info!(environment = %config.environment, "Depot server starting...");

    // 2. 初始化服务状态 (存储、目录、预留重建、外部账本)
    let state = ServerState::initialize(&config)
        .await
        .context("failed to initialize server state")?;

    // 3. 校验外部账本结构
    state
        .validate_external_ledger()
        .await
        .context("external ledger schema check failed")?;

    // 4. 启动后台任务
    let tasks = state.start_background_tasks()?;

    if let Ok(status) = state.orders.observability() {
        tracing::info!(
            reserved_products = status.reserved.len(),
            pending_external_commits = status.pending_external_commits,
            "Depot server ready"
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("Shutdown signal received");

    tasks.shutdown().await;
    tracing::info!("Depot server stopped");
    Ok(())
}
