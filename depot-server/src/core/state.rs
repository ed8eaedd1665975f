//! 服务状态 - 装配所有核心组件
//!
//! ```text
//! ServerState::initialize(config)
//!     ├─ 1. 打开 redb (WORK_DIR/DATABASE_FILE)
//!     ├─ 2. 导入种子目录 (CATALOG_SEED_FILE)，预热骑手缓存
//!     ├─ 3. 从持久化预留重建内存计数
//!     ├─ 4. 选择外部账本传输 (HTTP / 内存)
//!     └─ 5. 构建 gateway、同步队列和 OrdersManager
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::tasks::{BackgroundTasks, TaskKind};
use super::{Config, Result, ServerError};
use crate::inventory::ReservationLedger;
use crate::ledger_sync::{
    HttpSheetTransport, LedgerSyncGateway, MemorySheetTransport, SYNC_QUEUE_CAPACITY,
    SheetTransport, SyncHandle, SyncJob, SyncWorker,
};
use crate::orders::{MaintenanceScheduler, MaintenanceSettings, OrdersManager};
use crate::services::CatalogService;
use crate::store::DepotStorage;

/// 服务状态
///
/// 克隆成本低，所有组件都在 `Arc` 之后。
#[derive(Clone)]
pub struct ServerState {
    pub config: Config,
    pub storage: DepotStorage,
    pub ledger: Arc<ReservationLedger>,
    pub catalog: CatalogService,
    pub gateway: Arc<LedgerSyncGateway>,
    pub orders: Arc<OrdersManager>,
    /// 同步队列接收端，`start_background_tasks` 时取走
    sync_rx: Arc<Mutex<Option<mpsc::Receiver<SyncJob>>>>,
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("config", &self.config)
            .field("gateway", &self.gateway)
            .field("orders", &self.orders)
            .finish()
    }
}

impl ServerState {
    /// 初始化服务状态
    pub async fn initialize(config: &Config) -> Result<Self> {
        config.validate()?;

        std::fs::create_dir_all(&config.work_dir)?;
        let db_path = config.database_path();
        let storage = DepotStorage::open(&db_path)?;
        tracing::info!(path = %db_path.display(), "Storage opened");

        let catalog = CatalogService::new(storage.clone());
        if let Some(seed) = &config.catalog_seed_file {
            let (products, couriers) = catalog.seed_from_file(seed)?;
            tracing::info!(seed = %seed, products, couriers, "Catalog seeded");
        }
        catalog.warmup()?;

        let ledger = Arc::new(ReservationLedger::new(storage.clone()));
        let restored = ledger.restore_reservations()?;
        tracing::info!(active_reservations = restored, "Reservation counters rebuilt");

        let layout = config.sheet_layout()?;
        let transport: Arc<dyn SheetTransport> = if config.sheets.enabled {
            Arc::new(HttpSheetTransport::new(
                &config.sheets.api_base,
                config.sheets.spreadsheet_id.clone(),
                config.sheets.access_token.clone(),
                Duration::from_millis(config.sheets.timeout_ms),
            )?)
        } else {
            tracing::warn!("SHEETS_ENABLED=false, using an in-memory external ledger");
            Arc::new(MemorySheetTransport::with_catalog(
                &layout,
                &catalog.list_products()?,
                &catalog.get_active_couriers(),
            ))
        };
        let gateway = Arc::new(LedgerSyncGateway::new(
            storage.clone(),
            transport,
            layout,
            config.retry_policy(),
        ));

        let (sync, sync_rx) = SyncHandle::channel(SYNC_QUEUE_CAPACITY);
        let orders = Arc::new(OrdersManager::new(
            ledger.clone(),
            catalog.clone(),
            sync,
            config.manager_settings()?,
        ));

        Ok(Self {
            config: config.clone(),
            storage,
            ledger,
            catalog,
            gateway,
            orders,
            sync_rx: Arc::new(Mutex::new(Some(sync_rx))),
        })
    }

    /// 检查外部账本的 tab 结构
    ///
    /// 启用 Sheets 时失败即退出，内存账本只记录警告。
    pub async fn validate_external_ledger(&self) -> Result<()> {
        match self.gateway.validate_schema().await {
            Ok(()) => Ok(()),
            Err(e) if self.config.sheets.enabled => Err(ServerError::Sync(e)),
            Err(e) => {
                tracing::warn!(error = %e, "External ledger schema check failed");
                Ok(())
            }
        }
    }

    /// 启动后台任务：同步 worker 与定时维护
    pub fn start_background_tasks(&self) -> Result<BackgroundTasks> {
        let rx = self
            .sync_rx
            .lock()
            .take()
            .ok_or_else(|| ServerError::Config("background tasks already started".into()))?;

        let mut tasks = BackgroundTasks::new();
        let shutdown = tasks.shutdown_token();

        let worker = SyncWorker::new(self.gateway.clone());
        tasks.spawn(
            "ledger_sync_worker",
            TaskKind::Worker,
            worker.run(rx, shutdown.clone()),
        );

        let scheduler = MaintenanceScheduler::new(
            self.orders.clone(),
            self.gateway.clone(),
            MaintenanceSettings {
                expire_every: Duration::from_secs(self.config.expire_interval_secs),
                repair_every: Duration::from_secs(self.config.repair_interval_secs),
                purge_every: Duration::from_secs(self.config.purge_interval_secs),
                not_issued_retention_minutes: self.config.not_issued_retention_minutes,
                stale_order_max_age: self.config.stale_order_max_age(),
                // 内存账本由本地目录生成，无需回读
                catalog_refresh_every: self
                    .config
                    .sheets
                    .enabled
                    .then(|| Duration::from_secs(self.config.catalog_refresh_secs)),
                reminder_hour: self.config.reminder_hour,
            },
            shutdown,
        );
        tasks.spawn("maintenance_scheduler", TaskKind::Periodic, scheduler.run());

        tasks.log_summary();
        Ok(tasks)
    }

    /// 获取工作目录
    pub fn work_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.work_dir)
    }
}
