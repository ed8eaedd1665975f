//! Depot Server - 库存预留、订单生命周期与外部账本同步
//!
//! # 模块结构
//!
//! ```text
//! depot-server/src/
//! ├── core/          # 配置、状态、错误、后台任务
//! ├── store/         # redb 持久化
//! ├── inventory/     # 预留账本 (soft holds)
//! ├── orders/        # 订单状态机、定价、定时维护
//! ├── ledger_sync/   # 外部账本 (Google Sheets) 同步
//! ├── services/      # 商品/骑手目录
//! └── utils/         # 日志
//! ```

pub mod core;
pub mod inventory;
pub mod ledger_sync;
pub mod orders;
pub mod services;
pub mod store;
pub mod utils;

// Re-export 公共类型
pub use crate::core::{BackgroundTasks, Config, ServerError, ServerState};
pub use inventory::{LedgerError, ReservationLedger};
pub use ledger_sync::{LedgerSyncGateway, SyncError};
pub use orders::{ManagerError, OrdersManager};
pub use services::CatalogService;
pub use store::{DepotStorage, StorageError};

// Re-export logger functions
pub use utils::logger::{init_logger, init_logger_with_file};

// Security logging macro - 拒绝的越权操作统一打到 `security` target
#[macro_export]
macro_rules! security_log {
    ($event:expr, $($fields:tt)*) => {
        tracing::warn!(target: "security", event = $event, $($fields)*)
    };
}

/// 加载 `.env`，创建日志目录并初始化日志
///
/// 返回加载好的配置。
pub fn setup_environment() -> crate::core::Result<Config> {
    dotenv::dotenv().ok();
    let config = Config::from_env();

    if let Some(dir) = &config.log_dir {
        std::fs::create_dir_all(dir)?;
    }
    init_logger_with_file(
        Some(&config.log_level),
        config.log_json,
        config.log_dir.as_deref(),
    );
    Ok(config)
}

pub fn print_banner() {
    println!(
        r#"
    ____
   / __ \___  ____  ____  / /_
  / / / / _ \/ __ \/ __ \/ __/
 / /_/ /  __/ /_/ / /_/ / /_
/_____/\___/ .___/\____/\__/
          /_/
    "#
    );
}
