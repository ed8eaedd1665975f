use super::*;
use crate::ledger_sync::SyncJob;
use crate::services::CatalogSeed;
use shared::models::{Category, Courier, Product};
use tokio::sync::mpsc;

// ========================================================================
// Catalog fixture
// ========================================================================
//
// | id | category    | price | stock | active |
// |----|-------------|-------|-------|--------|
// | 1  | liquids     | 18    | 10    | yes    |
// | 2  | liquids     | 18    | 2     | yes    |
// | 3  | electronics | 50    | 5     | yes    |
// | 4  | liquids     | 18    | 5     | no     |
//
// Couriers 7 and 8 are active, 9 is not.

const ACTIVE_COURIER: u64 = 7;
const OTHER_COURIER: u64 = 8;
const INACTIVE_COURIER: u64 = 9;

fn product(id: u64, category: Category, price: f64, available: u32, active: bool) -> Product {
    Product {
        id,
        title: format!("Product {id}"),
        price,
        category,
        brand: None,
        available,
        active,
        upsell_group_id: None,
    }
}

fn courier(id: u64, active: bool) -> Courier {
    Courier {
        id,
        name: format!("Courier {id}"),
        chat_id: None,
        active,
        delivery_interval: None,
    }
}

fn seed(manager: &OrdersManager) {
    manager
        .catalog()
        .seed(&CatalogSeed {
            products: vec![
                product(1, Category::Liquids, 18.0, 10, true),
                product(2, Category::Liquids, 18.0, 2, true),
                product(3, Category::Electronics, 50.0, 5, true),
                product(4, Category::Liquids, 18.0, 5, false),
            ],
            couriers: vec![
                courier(ACTIVE_COURIER, true),
                courier(OTHER_COURIER, true),
                courier(INACTIVE_COURIER, false),
            ],
        })
        .unwrap();
}

fn create_test_manager() -> OrdersManager {
    let storage = DepotStorage::open_in_memory().unwrap();
    let manager = OrdersManager::with_storage(storage);
    seed(&manager);
    manager
}

/// Manager wired to a sync queue so tests can inspect the queued jobs
fn create_synced_manager(
    settings: ManagerSettings,
    capacity: usize,
) -> (OrdersManager, mpsc::Receiver<SyncJob>) {
    let storage = DepotStorage::open_in_memory().unwrap();
    let (sync, rx) = SyncHandle::channel(capacity);
    let manager = OrdersManager::new(
        Arc::new(ReservationLedger::new(storage.clone())),
        CatalogService::new(storage),
        sync,
        settings,
    );
    seed(&manager);
    (manager, rx)
}

fn drain(rx: &mut mpsc::Receiver<SyncJob>) -> Vec<(&'static str, u64)> {
    let mut jobs = Vec::new();
    while let Ok(job) = rx.try_recv() {
        jobs.push((job.kind(), job.order_id()));
    }
    jobs
}

fn item(product_id: u64, quantity: u32) -> OrderItem {
    OrderItem::at_list_price(product_id, quantity, 18.0)
}

fn stock(manager: &OrdersManager, product_id: u64) -> u32 {
    manager
        .catalog()
        .get_product(product_id)
        .unwrap()
        .unwrap()
        .available
}

/// create → confirm → assign, returning the order id
fn assigned_order(manager: &OrdersManager, items: Vec<OrderItem>) -> u64 {
    let order = manager.create(100, items, None).unwrap();
    manager.confirm(order.id).unwrap();
    manager.assign_courier(order.id, ACTIVE_COURIER).unwrap();
    order.id
}

mod test_boundary;
