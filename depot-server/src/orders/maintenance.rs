//! 定时维护任务
//!
//! 注册为 `TaskKind::Periodic`，在 `ServerState::start_background_tasks()` 中启动。
//!
//! | Job | Cadence |
//! |-----|---------|
//! | expire lapsed buffer orders | `expire_every` |
//! | repair unsynced deliveries and cancellations | `repair_every` |
//! | purge `not_issued`, cancel stale orders | `purge_every` |
//! | refresh catalog and price tiers from the sheet | `catalog_refresh_every` (optional) |
//! | clear exact delivery times | daily, local midnight |
//! | apply due reminders | daily, `reminder_hour` local |

use super::pricing::{PriceTable, PricingError};
use super::{ManagerError, OrdersManager};
use crate::ledger_sync::{LedgerSyncGateway, SyncError};
use crate::services::{CatalogError, CatalogRefresh};
use chrono::{Days, Local, NaiveTime};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval, interval_at};
use tokio_util::sync::CancellationToken;

const ONE_DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct MaintenanceSettings {
    pub expire_every: Duration,
    pub repair_every: Duration,
    pub purge_every: Duration,
    pub not_issued_retention_minutes: u64,
    pub stale_order_max_age: Duration,
    /// `None` when the sheet is not the catalog source
    pub catalog_refresh_every: Option<Duration>,
    pub reminder_hour: u32,
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("Sheet read failed: {0}")]
    Sync(#[from] SyncError),

    #[error("Catalog merge failed: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Invalid price tiers in sheet: {0}")]
    Pricing(#[from] PricingError),

    #[error("Refresh task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Pull products, couriers and liquid price tiers from the sheet
///
/// The configured tiers stay in place when the sheet has none for this city.
pub async fn refresh_catalog(
    manager: &Arc<OrdersManager>,
    gateway: &LedgerSyncGateway,
) -> Result<CatalogRefresh, RefreshError> {
    let sheet = gateway.fetch_catalog().await?;
    let catalog = manager.catalog().clone();
    let refresh = tokio::task::spawn_blocking(move || catalog.apply_sheet_catalog(&sheet)).await??;

    let tiers = gateway.fetch_price_tiers().await?;
    if !tiers.is_empty() {
        let category = manager.price_table().category().clone();
        manager.set_price_table(PriceTable::from_tiers(category, &tiers)?);
    }
    Ok(refresh)
}

pub struct MaintenanceScheduler {
    manager: Arc<OrdersManager>,
    gateway: Arc<LedgerSyncGateway>,
    settings: MaintenanceSettings,
    shutdown: CancellationToken,
}

impl MaintenanceScheduler {
    pub fn new(
        manager: Arc<OrdersManager>,
        gateway: Arc<LedgerSyncGateway>,
        settings: MaintenanceSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            manager,
            gateway,
            settings,
            shutdown,
        }
    }

    /// 主循环，直到 shutdown
    pub async fn run(self) {
        tracing::info!(settings = ?self.settings, "Maintenance scheduler started");

        let mut expire_tick = interval(self.settings.expire_every);
        let mut repair_tick = interval(self.settings.repair_every);
        let mut purge_tick = interval(self.settings.purge_every);
        let mut slot_tick = interval_at(Instant::now() + until_next_local_hour(0), ONE_DAY);
        let mut reminder_tick = interval_at(
            Instant::now() + until_next_local_hour(self.settings.reminder_hour),
            ONE_DAY,
        );
        for tick in [
            &mut expire_tick,
            &mut repair_tick,
            &mut purge_tick,
            &mut slot_tick,
            &mut reminder_tick,
        ] {
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }
        let mut refresh_tick = self.settings.catalog_refresh_every.map(|every| {
            let mut tick = interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tick
        });

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Maintenance scheduler received shutdown signal");
                    break;
                }
                _ = expire_tick.tick() => self.expire().await,
                _ = repair_tick.tick() => {
                    self.gateway.run_repair_sweep().await;
                }
                _ = purge_tick.tick() => self.purge().await,
                _ = slot_tick.tick() => self.clear_slots().await,
                _ = reminder_tick.tick() => self.reminders().await,
                _ = tick_optional(&mut refresh_tick) => {
                    if let Err(e) = refresh_catalog(&self.manager, &self.gateway).await {
                        tracing::warn!(error = %e, "Catalog refresh failed, keeping current catalog");
                    }
                }
            }
        }
    }

    async fn expire(&self) {
        let manager = self.manager.clone();
        match tokio::task::spawn_blocking(move || manager.expire_due_orders()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Expiry sweep failed"),
            Err(e) => tracing::error!(error = %e, "Expiry sweep task aborted"),
        }
    }

    async fn purge(&self) {
        let manager = self.manager.clone();
        let retention = self.settings.not_issued_retention_minutes;
        let max_age = self.settings.stale_order_max_age;
        let result = tokio::task::spawn_blocking(move || {
            let purged = manager.purge_stale_not_issued(retention)?;
            let cancelled = manager.cancel_stale_orders(max_age)?;
            Ok::<_, ManagerError>((purged, cancelled))
        })
        .await;
        match result {
            Ok(Ok((purged, cancelled))) => {
                tracing::debug!(purged, cancelled, "Cleanup pass finished");
            }
            Ok(Err(e)) => tracing::error!(error = %e, "Cleanup pass failed"),
            Err(e) => tracing::error!(error = %e, "Cleanup task aborted"),
        }
    }

    async fn clear_slots(&self) {
        let manager = self.manager.clone();
        match tokio::task::spawn_blocking(move || manager.clear_stale_delivery_slots()).await {
            Ok(Ok(cleared)) => tracing::info!(cleared, "Daily delivery slot cleanup finished"),
            Ok(Err(e)) => tracing::error!(error = %e, "Delivery slot cleanup failed"),
            Err(e) => tracing::error!(error = %e, "Delivery slot cleanup task aborted"),
        }
    }

    async fn reminders(&self) {
        let manager = self.manager.clone();
        match tokio::task::spawn_blocking(move || manager.apply_due_reminders()).await {
            Ok(Ok(applied)) => tracing::info!(applied, "Reminder campaign pass finished"),
            Ok(Err(e)) => tracing::error!(error = %e, "Reminder campaign pass failed"),
            Err(e) => tracing::error!(error = %e, "Reminder task aborted"),
        }
    }
}

/// Tick of an optional interval; never completes when absent
async fn tick_optional(tick: &mut Option<Interval>) {
    match tick {
        Some(tick) => {
            tick.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Time left until the next `hour:00` local time
fn until_next_local_hour(hour: u32) -> Duration {
    let Some(at) = NaiveTime::from_hms_opt(hour, 0, 0) else {
        return ONE_DAY;
    };
    let now = Local::now().naive_local();
    let today = now.date().and_time(at);
    let next = if today > now {
        Some(today)
    } else {
        now.date()
            .checked_add_days(Days::new(1))
            .map(|d| d.and_time(at))
    };
    next.and_then(|next| (next - now).to_std().ok())
        .unwrap_or(ONE_DAY)
}
