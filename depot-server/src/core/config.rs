use crate::ledger_sync::{RetryPolicy, SheetLayout, SheetMode};
use crate::orders::pricing::{DEFAULT_PRICE_TIERS, PriceTable};
use crate::orders::{DEFAULT_REMINDER_OFFSET_DAYS, ManagerSettings};
use shared::models::Category;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::ServerError;

/// 服务配置 - depot-server 的所有配置项
///
/// # 环境变量
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | WORK_DIR | ./data | 工作目录 (数据库、日志) |
/// | DATABASE_FILE | depot.redb | redb 文件名 |
/// | ENVIRONMENT | development | 运行环境 |
/// | LOG_LEVEL | info | 日志级别 |
/// | LOG_JSON | false | JSON 日志 |
/// | LOG_DIR | - | 按日滚动的日志目录 |
/// | RESERVATION_TTL_MINUTES | 15 | 未确认订单的库存占用时长 |
/// | NOT_ISSUED_RETENTION_MINUTES | 1440 | not_issued 订单保留时长 |
/// | STALE_ORDER_CANCEL_HOURS | 48 | 超时未送达订单自动取消 |
/// | CATALOG_SEED_FILE | - | 商品/骑手 JSON 种子文件 |
/// | SHEETS_ENABLED | false | 启用 Google Sheets 外部账本 |
/// | SHEETS_API_BASE | https://sheets.googleapis.com/v4 | API 地址 |
/// | SHEETS_SPREADSHEET_ID | - | 表格 ID |
/// | SHEETS_ACCESS_TOKEN | - | Bearer token |
/// | SHEETS_MODE | single | single / tabs_per_city |
/// | CITY_CODE | FFM | tabs_per_city 模式下的 tab 后缀 |
/// | SHEETS_WRITE_RETRY | 3 | 每次外部写入的尝试次数 |
/// | SHEETS_WRITE_RETRY_BACKOFF_MS | 1000 | 重试间隔 |
/// | SHEETS_TIMEOUT_MS | 15000 | HTTP 超时 |
/// | PRICE_TIERS | 1:18,2:16,3:15 | liquids 阶梯价 |
/// | EXPIRE_INTERVAL_SECS | 60 | 过期扫描周期 |
/// | REPAIR_INTERVAL_SECS | 300 | 修复扫描周期 |
/// | PURGE_INTERVAL_SECS | 600 | 清理周期 |
/// | CATALOG_REFRESH_SECS | 300 | 从表格刷新商品/骑手/阶梯价 (仅 SHEETS_ENABLED) |
/// | REMINDER_OFFSET_DAYS | 7 | 送达后多少天发提醒 |
/// | REMINDER_HOUR | 10 | 每日提醒任务的本地小时 |
///
/// # 示例
///
/// ```ignore
/// WORK_DIR=/data/depot SHEETS_ENABLED=true cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// 工作目录
    pub work_dir: String,
    pub database_file: String,
    /// 运行环境: development | production
    pub environment: String,
    pub log_level: String,
    pub log_json: bool,
    pub log_dir: Option<String>,

    pub reservation_ttl_minutes: u64,
    pub not_issued_retention_minutes: u64,
    pub stale_order_cancel_hours: u64,
    pub catalog_seed_file: Option<String>,
    pub price_tiers: String,

    pub sheets: SheetsConfig,

    pub expire_interval_secs: u64,
    pub repair_interval_secs: u64,
    pub purge_interval_secs: u64,
    pub catalog_refresh_secs: u64,

    pub reminder_offset_days: u64,
    /// 本地时间 0-23
    pub reminder_hour: u32,
}

/// 外部账本 (Google Sheets) 配置
#[derive(Clone)]
pub struct SheetsConfig {
    pub enabled: bool,
    pub api_base: String,
    pub spreadsheet_id: String,
    pub access_token: String,
    pub mode: String,
    pub city: String,
    pub write_retry: u32,
    pub write_retry_backoff_ms: u64,
    pub timeout_ms: u64,
}

impl std::fmt::Debug for SheetsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SheetsConfig")
            .field("enabled", &self.enabled)
            .field("api_base", &self.api_base)
            .field("spreadsheet_id", &self.spreadsheet_id)
            .field("access_token", &"<redacted>")
            .field("mode", &self.mode)
            .field("city", &self.city)
            .field("write_retry", &self.write_retry)
            .field("write_retry_backoff_ms", &self.write_retry_backoff_ms)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn env_optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 如果环境变量未设置或无法解析，使用默认值
    pub fn from_env() -> Self {
        Self {
            work_dir: env_string("WORK_DIR", "./data"),
            database_file: env_string("DATABASE_FILE", "depot.redb"),
            environment: env_string("ENVIRONMENT", "development"),
            log_level: env_string("LOG_LEVEL", "info"),
            log_json: env_or("LOG_JSON", false),
            log_dir: env_optional("LOG_DIR"),

            reservation_ttl_minutes: env_or("RESERVATION_TTL_MINUTES", 15),
            not_issued_retention_minutes: env_or("NOT_ISSUED_RETENTION_MINUTES", 1440),
            stale_order_cancel_hours: env_or("STALE_ORDER_CANCEL_HOURS", 48),
            catalog_seed_file: env_optional("CATALOG_SEED_FILE"),
            price_tiers: env_string("PRICE_TIERS", DEFAULT_PRICE_TIERS),

            sheets: SheetsConfig {
                enabled: env_or("SHEETS_ENABLED", false),
                api_base: env_string("SHEETS_API_BASE", "https://sheets.googleapis.com/v4"),
                spreadsheet_id: env_string("SHEETS_SPREADSHEET_ID", ""),
                access_token: env_string("SHEETS_ACCESS_TOKEN", ""),
                mode: env_string("SHEETS_MODE", "single"),
                city: env_string("CITY_CODE", "FFM"),
                write_retry: env_or("SHEETS_WRITE_RETRY", 3),
                write_retry_backoff_ms: env_or("SHEETS_WRITE_RETRY_BACKOFF_MS", 1000),
                timeout_ms: env_or("SHEETS_TIMEOUT_MS", 15000),
            },

            expire_interval_secs: env_or("EXPIRE_INTERVAL_SECS", 60),
            repair_interval_secs: env_or("REPAIR_INTERVAL_SECS", 300),
            purge_interval_secs: env_or("PURGE_INTERVAL_SECS", 600),
            catalog_refresh_secs: env_or("CATALOG_REFRESH_SECS", 300),

            reminder_offset_days: env_or("REMINDER_OFFSET_DAYS", DEFAULT_REMINDER_OFFSET_DAYS),
            reminder_hour: env_or("REMINDER_HOUR", 10),
        }
    }

    /// 使用自定义工作目录覆盖配置
    ///
    /// 常用于测试场景
    pub fn with_work_dir(work_dir: impl Into<String>) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config
    }

    /// 检查相互依赖的配置项
    pub fn validate(&self) -> Result<(), ServerError> {
        self.sheet_layout()?;
        self.price_table()?;
        if self.sheets.enabled {
            if self.sheets.spreadsheet_id.trim().is_empty() {
                return Err(ServerError::Config(
                    "SHEETS_SPREADSHEET_ID is required when SHEETS_ENABLED=true".into(),
                ));
            }
            if self.sheets.access_token.trim().is_empty() {
                return Err(ServerError::Config(
                    "SHEETS_ACCESS_TOKEN is required when SHEETS_ENABLED=true".into(),
                ));
            }
        }
        if self.expire_interval_secs == 0
            || self.repair_interval_secs == 0
            || self.purge_interval_secs == 0
            || self.catalog_refresh_secs == 0
        {
            return Err(ServerError::Config("job intervals must be positive".into()));
        }
        if self.reminder_hour > 23 {
            return Err(ServerError::Config(format!(
                "REMINDER_HOUR must be 0-23, got {}",
                self.reminder_hour
            )));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join(&self.database_file)
    }

    pub fn reservation_ttl(&self) -> Duration {
        Duration::from_secs(self.reservation_ttl_minutes.saturating_mul(60))
    }

    pub fn stale_order_max_age(&self) -> Duration {
        Duration::from_secs(self.stale_order_cancel_hours.saturating_mul(3600))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.sheets.write_retry,
            Duration::from_millis(self.sheets.write_retry_backoff_ms),
        )
    }

    pub fn sheet_layout(&self) -> Result<SheetLayout, ServerError> {
        let mode = self
            .sheets
            .mode
            .parse::<SheetMode>()
            .map_err(ServerError::Config)?;
        Ok(SheetLayout {
            mode,
            city: self.sheets.city.clone(),
        })
    }

    pub fn price_table(&self) -> Result<PriceTable, ServerError> {
        PriceTable::parse(Category::Liquids, &self.price_tiers)
            .map_err(|e| ServerError::Config(format!("PRICE_TIERS: {e}")))
    }

    pub fn manager_settings(&self) -> Result<ManagerSettings, ServerError> {
        Ok(ManagerSettings {
            reservation_ttl: self.reservation_ttl(),
            price_table: self.price_table()?,
            reminder_offset_days: self.reminder_offset_days,
        })
    }

    /// 是否生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_values() {
        let mut config = Config::with_work_dir("/tmp/depot");
        config.database_file = "depot.redb".into();
        config.reservation_ttl_minutes = 15;
        config.sheets.write_retry = 0;
        config.sheets.write_retry_backoff_ms = 250;

        assert_eq!(config.database_path(), PathBuf::from("/tmp/depot/depot.redb"));
        assert_eq!(config.reservation_ttl(), Duration::from_secs(900));
        // At least one attempt is always made
        assert_eq!(config.retry_policy().max_attempts, 1);
        assert_eq!(config.retry_policy().backoff, Duration::from_millis(250));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::with_work_dir("/tmp/depot");
        config.sheets.enabled = false;
        config.sheets.mode = "single".into();
        config.price_tiers = DEFAULT_PRICE_TIERS.into();
        config.expire_interval_secs = 60;
        config.repair_interval_secs = 300;
        config.purge_interval_secs = 600;
        config.catalog_refresh_secs = 300;
        config.reminder_hour = 10;
        assert!(config.validate().is_ok());

        config.reminder_hour = 24;
        assert!(config.validate().is_err());
        config.reminder_hour = 10;

        config.sheets.enabled = true;
        config.sheets.spreadsheet_id = String::new();
        assert!(matches!(config.validate(), Err(ServerError::Config(_))));

        config.sheets.enabled = false;
        config.price_tiers = "cheap".into();
        assert!(config.validate().is_err());

        config.price_tiers = DEFAULT_PRICE_TIERS.into();
        config.sheets.mode = "per_street".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let mut config = Config::with_work_dir("/tmp/depot");
        config.sheets.access_token = "secret-token".into();
        assert!(!format!("{config:?}").contains("secret-token"));
    }
}
