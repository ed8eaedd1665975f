//! Sync Worker - drains queued external ledger jobs
//!
//! The lifecycle queues a job after each committed transition and moves on.
//! Jobs run concurrently under a semaphore; a failed job is logged and left
//! to the repair sweep.

use super::gateway::LedgerSyncGateway;
use shared::order::Order;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

/// Queue capacity between the lifecycle and the worker
pub const SYNC_QUEUE_CAPACITY: usize = 1024;

/// Concurrent external calls (the sheets API is rate limited)
const SYNC_CONCURRENCY: usize = 4;

#[derive(Debug, Clone)]
pub enum SyncJob {
    AppendRecord(Order),
    CommitDelivery(u64),
    RecordCancelled(u64),
}

impl SyncJob {
    pub fn order_id(&self) -> u64 {
        match self {
            SyncJob::AppendRecord(order) => order.id,
            SyncJob::CommitDelivery(id) | SyncJob::RecordCancelled(id) => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SyncJob::AppendRecord(_) => "append_record",
            SyncJob::CommitDelivery(_) => "commit_delivery",
            SyncJob::RecordCancelled(_) => "record_cancelled",
        }
    }
}

/// Sending side used by the lifecycle
#[derive(Debug, Clone)]
pub struct SyncHandle {
    tx: Option<mpsc::Sender<SyncJob>>,
}

impl SyncHandle {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SyncJob>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx: Some(tx) }, rx)
    }

    /// Handle that drops every job
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Queue a job without waiting
    pub fn notify(&self, job: SyncJob) {
        let Some(tx) = &self.tx else {
            tracing::trace!(order_id = job.order_id(), kind = job.kind(), "External sync disabled, job dropped");
            return;
        };
        match tx.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::warn!(
                    order_id = job.order_id(),
                    kind = job.kind(),
                    "Sync queue full, job dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::warn!(
                    order_id = job.order_id(),
                    kind = job.kind(),
                    "Sync worker stopped, job dropped"
                );
            }
        }
    }
}

pub struct SyncWorker {
    gateway: Arc<LedgerSyncGateway>,
    semaphore: Arc<Semaphore>,
}

impl SyncWorker {
    pub fn new(gateway: Arc<LedgerSyncGateway>) -> Self {
        Self {
            gateway,
            semaphore: Arc::new(Semaphore::new(SYNC_CONCURRENCY)),
        }
    }

    pub async fn run(self, mut rx: mpsc::Receiver<SyncJob>, shutdown: CancellationToken) {
        tracing::info!(concurrency = SYNC_CONCURRENCY, "SyncWorker started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("SyncWorker received shutdown signal");
                    break;
                }
                job = rx.recv() => {
                    let Some(job) = job else {
                        tracing::info!("Sync channel closed, shutting down SyncWorker");
                        break;
                    };
                    let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
                        break;
                    };
                    let gateway = self.gateway.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        process(&gateway, job).await;
                    });
                }
            }
        }
    }
}

async fn process(gateway: &LedgerSyncGateway, job: SyncJob) {
    let order_id = job.order_id();
    let kind = job.kind();
    let result = match job {
        SyncJob::AppendRecord(order) => gateway.append_record(&order).await.map(|_| None),
        SyncJob::CommitDelivery(id) => gateway.commit_delivery(id).await.map(Some),
        SyncJob::RecordCancelled(id) => gateway.record_cancelled(id).await.map(Some),
    };
    match result {
        Ok(outcome) => tracing::debug!(order_id, kind, outcome = ?outcome, "Sync job done"),
        Err(e) => tracing::warn!(order_id, kind, error = %e, "Sync job failed"),
    }
}
