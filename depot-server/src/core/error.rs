use crate::inventory::LedgerError;
use crate::ledger_sync::SyncError;
use crate::services::CatalogError;
use crate::store::StorageError;
use thiserror::Error;

/// 启动/装配阶段的错误
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("存储错误: {0}")]
    Storage(#[from] StorageError),

    #[error("库存账本错误: {0}")]
    Ledger(#[from] LedgerError),

    #[error("商品目录错误: {0}")]
    Catalog(#[from] CatalogError),

    #[error("外部账本错误: {0}")]
    Sync(#[from] SyncError),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;
