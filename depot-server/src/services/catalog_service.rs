//! Catalog Service - products and couriers directory
//!
//! Products are read through to the store on every call because the ledger
//! mutates `available` on final deduction. Couriers change rarely and are
//! cached in memory; every write refreshes the cache.
//!
//! When the external sheet is the catalog source, [`CatalogService::apply_sheet_catalog`]
//! merges its rows: descriptive fields and `active` follow the sheet, while
//! `available` of a known product stays with the local ledger (the sheet lags
//! behind by every delivery not yet committed).

use crate::ledger_sync::{ProductRecord, SheetCatalog};
use crate::store::{DepotStorage, StorageError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use shared::models::{Category, Courier, Product};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read catalog seed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid catalog seed: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// JSON seed file layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub couriers: Vec<Courier>,
}

/// What a sheet refresh changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CatalogRefresh {
    pub products_added: usize,
    pub products_updated: usize,
    /// Rows skipped because a new product had no price
    pub products_skipped: usize,
    pub couriers: usize,
}

#[derive(Clone)]
pub struct CatalogService {
    storage: DepotStorage,
    couriers: std::sync::Arc<RwLock<HashMap<u64, Courier>>>,
}

impl std::fmt::Debug for CatalogService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogService")
            .field("couriers", &self.couriers.read().len())
            .finish()
    }
}

impl CatalogService {
    pub fn new(storage: DepotStorage) -> Self {
        Self {
            storage,
            couriers: Default::default(),
        }
    }

    /// Load the courier cache from the store
    pub fn warmup(&self) -> CatalogResult<()> {
        let couriers = self.storage.list_couriers()?;
        let mut cache = self.couriers.write();
        cache.clear();
        cache.extend(couriers.into_iter().map(|c| (c.id, c)));
        tracing::debug!(couriers = cache.len(), "Catalog warmed up");
        Ok(())
    }

    // ========== Products ==========

    pub fn get_product(&self, id: u64) -> CatalogResult<Option<Product>> {
        Ok(self.storage.get_product(id)?)
    }

    pub fn list_products(&self) -> CatalogResult<Vec<Product>> {
        Ok(self.storage.list_products()?)
    }

    /// Fetch several products at once, missing ids are skipped
    pub fn products_by_id(&self, ids: &[u64]) -> CatalogResult<HashMap<u64, Product>> {
        let mut found = HashMap::with_capacity(ids.len());
        for &id in ids {
            if found.contains_key(&id) {
                continue;
            }
            if let Some(product) = self.storage.get_product(id)? {
                found.insert(id, product);
            }
        }
        Ok(found)
    }

    /// Insert or replace a product
    ///
    /// Stock written here is the catalog's authoritative `available`; holds
    /// are tracked separately and are not affected.
    pub fn upsert_product(&self, product: &Product) -> CatalogResult<()> {
        self.storage.put_product(product)?;
        Ok(())
    }

    // ========== Couriers ==========

    pub fn get_courier(&self, id: u64) -> Option<Courier> {
        self.couriers.read().get(&id).cloned()
    }

    pub fn get_active_couriers(&self) -> Vec<Courier> {
        let mut couriers: Vec<Courier> = self
            .couriers
            .read()
            .values()
            .filter(|c| c.active)
            .cloned()
            .collect();
        couriers.sort_by_key(|c| c.id);
        couriers
    }

    pub fn upsert_courier(&self, courier: &Courier) -> CatalogResult<()> {
        self.storage.put_courier(courier)?;
        self.couriers.write().insert(courier.id, courier.clone());
        Ok(())
    }

    // ========== Sheet refresh ==========

    /// Merge products and couriers read from the external sheet
    ///
    /// All product rows are written in one transaction.
    pub fn apply_sheet_catalog(&self, catalog: &SheetCatalog) -> CatalogResult<CatalogRefresh> {
        let mut refresh = CatalogRefresh::default();

        let txn = self.storage.begin_write()?;
        for record in &catalog.products {
            match self.storage.get_product_txn(&txn, record.id)? {
                Some(mut product) => {
                    if merge_record(&mut product, record) {
                        self.storage.put_product_txn(&txn, &product)?;
                        refresh.products_updated += 1;
                    }
                }
                None => match new_product(record) {
                    Some(product) => {
                        self.storage.put_product_txn(&txn, &product)?;
                        refresh.products_added += 1;
                    }
                    None => {
                        tracing::warn!(product_id = record.id, "Sheet product without price skipped");
                        refresh.products_skipped += 1;
                    }
                },
            }
        }
        txn.commit().map_err(StorageError::from)?;

        for courier in &catalog.couriers {
            if self.get_courier(courier.id).as_ref() != Some(courier) {
                self.upsert_courier(courier)?;
            }
        }
        refresh.couriers = catalog.couriers.len();

        tracing::info!(
            added = refresh.products_added,
            updated = refresh.products_updated,
            skipped = refresh.products_skipped,
            couriers = refresh.couriers,
            "Catalog refreshed from sheet"
        );
        Ok(refresh)
    }

    // ========== Seeding ==========

    /// Load products and couriers from a JSON seed file
    pub fn seed_from_file(&self, path: impl AsRef<Path>) -> CatalogResult<(usize, usize)> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let seed: CatalogSeed = serde_json::from_str(&raw)?;
        self.seed(&seed)
    }

    pub fn seed(&self, seed: &CatalogSeed) -> CatalogResult<(usize, usize)> {
        for product in &seed.products {
            self.upsert_product(product)?;
        }
        for courier in &seed.couriers {
            self.upsert_courier(courier)?;
        }
        tracing::info!(
            products = seed.products.len(),
            couriers = seed.couriers.len(),
            "Catalog seeded"
        );
        Ok((seed.products.len(), seed.couriers.len()))
    }
}

/// Apply the sheet's columns to a known product, keeping local stock
///
/// Returns whether anything changed.
fn merge_record(product: &mut Product, record: &ProductRecord) -> bool {
    let before = product.clone();
    if let Some(title) = &record.title {
        product.title = title.clone();
    }
    if let Some(price) = record.price {
        product.price = price;
    }
    if let Some(category) = &record.category {
        product.category = category.clone();
    }
    if record.brand.is_some() {
        product.brand = record.brand.clone();
    }
    if record.upsell_group_id.is_some() {
        product.upsell_group_id = record.upsell_group_id;
    }
    product.active = record.active;
    *product != before
}

fn new_product(record: &ProductRecord) -> Option<Product> {
    Some(Product {
        id: record.id,
        title: record
            .title
            .clone()
            .unwrap_or_else(|| format!("Product {}", record.id)),
        price: record.price?,
        category: record.category.clone().unwrap_or(Category::Liquids),
        brand: record.brand.clone(),
        available: record.stock,
        active: record.active,
        upsell_group_id: record.upsell_group_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SEED: &str = r#"{
        "products": [
            {"id": 1, "title": "Mango Ice", "price": 18.0, "category": "liquids", "available": 4},
            {"id": 2, "title": "Pod Kit", "price": 25.0, "category": "electronics", "available": 1, "active": false}
        ],
        "couriers": [
            {"id": 10, "name": "Anna", "chat_id": 1001},
            {"id": 11, "name": "Ben", "active": false}
        ]
    }"#;

    #[test]
    fn test_seed_from_file() {
        let storage = DepotStorage::open_in_memory().unwrap();
        let catalog = CatalogService::new(storage.clone());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SEED.as_bytes()).unwrap();

        assert_eq!(catalog.seed_from_file(file.path()).unwrap(), (2, 2));
        assert_eq!(catalog.list_products().unwrap().len(), 2);
        assert!(catalog.get_product(1).unwrap().unwrap().active);
        assert!(!catalog.get_product(2).unwrap().unwrap().active);

        let active = catalog.get_active_couriers();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "Anna");
    }

    #[test]
    fn test_warmup_reloads_couriers() {
        let storage = DepotStorage::open_in_memory().unwrap();
        storage
            .put_courier(&Courier {
                id: 3,
                name: "Cleo".to_string(),
                chat_id: None,
                active: true,
                delivery_interval: Some("14-16".to_string()),
            })
            .unwrap();

        let catalog = CatalogService::new(storage);
        assert!(catalog.get_courier(3).is_none());
        catalog.warmup().unwrap();
        assert_eq!(catalog.get_courier(3).unwrap().name, "Cleo");
    }

    #[test]
    fn test_invalid_seed_is_rejected() {
        let catalog = CatalogService::new(DepotStorage::open_in_memory().unwrap());
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        assert!(matches!(
            catalog.seed_from_file(file.path()),
            Err(CatalogError::Parse(_))
        ));
    }

    fn record(id: u64, price: Option<f64>, stock: u32, active: bool) -> ProductRecord {
        ProductRecord {
            id,
            title: Some(format!("Sheet {id}")),
            price,
            category: None,
            brand: None,
            stock,
            active,
            upsell_group_id: None,
        }
    }

    #[test]
    fn test_sheet_catalog_keeps_local_stock() {
        let storage = DepotStorage::open_in_memory().unwrap();
        let catalog = CatalogService::new(storage);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SEED.as_bytes()).unwrap();
        catalog.seed_from_file(file.path()).unwrap();

        let sheet = SheetCatalog {
            products: vec![
                record(1, Some(19.5), 40, true),
                // Unchanged: no title column value, still inactive
                ProductRecord {
                    title: None,
                    ..record(2, None, 1, false)
                },
                record(5, Some(12.0), 6, true),
                record(6, None, 3, true),
            ],
            couriers: vec![Courier {
                id: 10,
                name: "Anna K.".into(),
                chat_id: Some(1001),
                active: false,
                delivery_interval: None,
            }],
        };
        let refresh = catalog.apply_sheet_catalog(&sheet).unwrap();
        assert_eq!(
            refresh,
            CatalogRefresh {
                products_added: 1,
                products_updated: 1,
                products_skipped: 1,
                couriers: 1,
            }
        );

        let mango = catalog.get_product(1).unwrap().unwrap();
        assert_eq!(mango.price, 19.5);
        assert_eq!(mango.title, "Sheet 1");
        assert_eq!(mango.category, Category::Liquids);
        // Local ledger owns stock of known products
        assert_eq!(mango.available, 4);

        let added = catalog.get_product(5).unwrap().unwrap();
        assert_eq!((added.available, added.price), (6, 12.0));
        assert!(catalog.get_product(6).unwrap().is_none());

        assert!(catalog.get_active_couriers().iter().all(|c| c.id != 10));
        assert_eq!(catalog.get_courier(10).unwrap().name, "Anna K.");
    }
}
