//! Cart pricing and order totals
//!
//! All arithmetic runs on `Decimal`; values are converted back to `f64`
//! rounded to cents for storage.

use rust_decimal::prelude::*;
use shared::models::{Category, CustomerSegment, Product};
use shared::order::{OrderItem, Totals};
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

/// Rounding strategy for monetary values (2 decimal places, half-up)
const DECIMAL_PLACES: u32 = 2;

/// Default tier table for liquids
pub const DEFAULT_PRICE_TIERS: &str = "1:18,2:16,3:15";

#[derive(Debug, Error, PartialEq)]
pub enum PricingError {
    #[error("Invalid price tier '{0}', expected <min_quantity>:<unit_price>")]
    InvalidTier(String),

    #[error("Price tier table is empty")]
    EmptyTable,

    #[error("Product not found: {0}")]
    ProductNotFound(u64),

    #[error("Product inactive: {0}")]
    ProductInactive(u64),

    #[error("Quantity must be positive for product {0}")]
    ZeroQuantity(u64),
}

/// Convert f64 to Decimal for calculation
#[inline]
pub fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default()
}

/// Convert Decimal back to f64 for storage, rounded to 2 decimal places
#[inline]
pub fn to_f64(value: Decimal) -> f64 {
    value
        .round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
        .to_f64()
        .unwrap_or_default()
}

/// Totals of a set of frozen items
///
/// Used both for previews and for the persisted order, so the two always agree.
pub fn compute_totals(items: &[OrderItem]) -> Totals {
    let (list, charged) = items.iter().fold(
        (Decimal::ZERO, Decimal::ZERO),
        |(list, charged), item| {
            let qty = Decimal::from(item.quantity);
            (
                list + to_decimal(item.list_price) * qty,
                charged + to_decimal(item.unit_price) * qty,
            )
        },
    );
    let list = list.round_dp(DECIMAL_PLACES);
    let charged = charged.round_dp(DECIMAL_PLACES);
    Totals {
        total_without_discount: to_f64(list),
        discount_total: to_f64(list - charged),
        total_with_discount: to_f64(charged),
    }
}

/// One line of a customer's cart before pricing
#[derive(Debug, Clone, PartialEq)]
pub struct CartLine {
    pub product_id: u64,
    pub quantity: u32,
    pub is_upsell: bool,
    /// Explicit price of an upsell offer, kept as-is
    pub price_override: Option<f64>,
}

impl CartLine {
    pub fn new(product_id: u64, quantity: u32) -> Self {
        Self {
            product_id,
            quantity,
            is_upsell: false,
            price_override: None,
        }
    }

    pub fn upsell(product_id: u64, quantity: u32, price: f64) -> Self {
        Self {
            product_id,
            quantity,
            is_upsell: true,
            price_override: Some(price),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceTier {
    pub min_quantity: u32,
    pub unit_price: Decimal,
}

/// Quantity-tiered unit prices for one category
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTable {
    category: Category,
    /// Sorted by `min_quantity`
    tiers: Vec<PriceTier>,
}

impl Default for PriceTable {
    fn default() -> Self {
        // DEFAULT_PRICE_TIERS is a valid literal
        Self::parse(Category::Liquids, DEFAULT_PRICE_TIERS).unwrap_or(Self {
            category: Category::Liquids,
            tiers: Vec::new(),
        })
    }
}

impl PriceTable {
    /// Parse `"1:18,2:16,3:15"`
    pub fn parse(category: Category, raw: &str) -> Result<Self, PricingError> {
        let mut tiers = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|part| {
                let (qty, price) = part
                    .split_once(':')
                    .ok_or_else(|| PricingError::InvalidTier(part.to_string()))?;
                let min_quantity: u32 = qty
                    .trim()
                    .parse()
                    .map_err(|_| PricingError::InvalidTier(part.to_string()))?;
                let unit_price = Decimal::from_str(price.trim())
                    .map_err(|_| PricingError::InvalidTier(part.to_string()))?;
                if min_quantity == 0 || unit_price.is_sign_negative() {
                    return Err(PricingError::InvalidTier(part.to_string()));
                }
                Ok(PriceTier {
                    min_quantity,
                    unit_price,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if tiers.is_empty() {
            return Err(PricingError::EmptyTable);
        }
        tiers.sort_by_key(|t| t.min_quantity);
        Ok(Self { category, tiers })
    }

    /// Table from `(min_quantity, unit_price)` pairs, e.g. rows of the price tab
    pub fn from_tiers(category: Category, tiers: &[(u32, f64)]) -> Result<Self, PricingError> {
        let mut tiers = tiers
            .iter()
            .map(|&(min_quantity, price)| {
                if min_quantity == 0 || !price.is_finite() || price < 0.0 {
                    return Err(PricingError::InvalidTier(format!("{min_quantity}:{price}")));
                }
                Ok(PriceTier {
                    min_quantity,
                    unit_price: to_decimal(price),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if tiers.is_empty() {
            return Err(PricingError::EmptyTable);
        }
        tiers.sort_by_key(|t| t.min_quantity);
        Ok(Self { category, tiers })
    }

    pub fn category(&self) -> &Category {
        &self.category
    }

    /// Unit price for a cumulative quantity of the tiered category
    pub fn tier_price(&self, cumulative_quantity: u32) -> Option<Decimal> {
        self.tiers
            .iter()
            .rev()
            .find(|t| t.min_quantity <= cumulative_quantity)
            .map(|t| t.unit_price)
    }

    /// Freeze cart lines into order items
    ///
    /// Every tiered line is priced by the category's total quantity in the
    /// cart; the segment discount applies to tiered prices only.
    pub fn price_lines(
        &self,
        lines: &[CartLine],
        products: &HashMap<u64, Product>,
        segment: CustomerSegment,
    ) -> Result<Vec<OrderItem>, PricingError> {
        for line in lines {
            if line.quantity == 0 {
                return Err(PricingError::ZeroQuantity(line.product_id));
            }
            let product = products
                .get(&line.product_id)
                .ok_or(PricingError::ProductNotFound(line.product_id))?;
            if !product.active {
                return Err(PricingError::ProductInactive(line.product_id));
            }
        }

        let tiered_quantity: u32 = lines
            .iter()
            .filter(|l| {
                products
                    .get(&l.product_id)
                    .is_some_and(|p| p.category == self.category)
            })
            .fold(0u32, |total, l| total.saturating_add(l.quantity));

        let discount = Decimal::from(100 - segment.discount_percent()) / Decimal::from(100);

        let items = lines
            .iter()
            .filter_map(|line| {
                let product = products.get(&line.product_id)?;
                let unit = match line.price_override {
                    Some(price) => to_decimal(price),
                    None if product.category == self.category => self
                        .tier_price(tiered_quantity)
                        .map(|p| p * discount)
                        .unwrap_or_else(|| to_decimal(product.price)),
                    None => to_decimal(product.price),
                };
                Some(OrderItem {
                    product_id: line.product_id,
                    quantity: line.quantity,
                    unit_price: to_f64(unit),
                    list_price: product.price,
                    is_upsell: line.is_upsell,
                })
            })
            .collect();
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: u64, category: Category, price: f64) -> Product {
        Product {
            id,
            title: format!("P{id}"),
            price,
            category,
            brand: None,
            available: 10,
            active: true,
            upsell_group_id: None,
        }
    }

    fn catalog() -> HashMap<u64, Product> {
        [
            product(1, Category::Liquids, 18.0),
            product(2, Category::Liquids, 18.0),
            product(3, Category::Electronics, 24.99),
        ]
        .into_iter()
        .map(|p| (p.id, p))
        .collect()
    }

    #[test]
    fn test_tier_steps() {
        let table = PriceTable::default();
        assert_eq!(table.tier_price(0), None);
        assert_eq!(table.tier_price(1), Some(Decimal::from(18)));
        assert_eq!(table.tier_price(2), Some(Decimal::from(16)));
        assert_eq!(table.tier_price(3), Some(Decimal::from(15)));
        assert_eq!(table.tier_price(40), Some(Decimal::from(15)));
    }

    #[test]
    fn test_cumulative_quantity_prices_every_liquid_line() {
        let table = PriceTable::default();
        let items = table
            .price_lines(
                &[CartLine::new(1, 1), CartLine::new(2, 2), CartLine::new(3, 1)],
                &catalog(),
                CustomerSegment::Regular,
            )
            .unwrap();

        assert_eq!(items[0].unit_price, 15.0);
        assert_eq!(items[1].unit_price, 15.0);
        assert_eq!(items[2].unit_price, 24.99);

        let totals = compute_totals(&items);
        assert_eq!(totals.total_without_discount, 78.99);
        assert_eq!(totals.total_with_discount, 69.99);
        assert_eq!(totals.discount_total, 9.0);
    }

    #[test]
    fn test_sale10_segment_discount() {
        let table = PriceTable::default();
        let items = table
            .price_lines(
                &[CartLine::new(1, 2), CartLine::new(3, 1)],
                &catalog(),
                CustomerSegment::Sale10,
            )
            .unwrap();
        assert_eq!(items[0].unit_price, 14.4);
        // Untiered categories are not discounted
        assert_eq!(items[1].unit_price, 24.99);
    }

    #[test]
    fn test_upsell_override_is_kept() {
        let table = PriceTable::default();
        let items = table
            .price_lines(
                &[CartLine::new(1, 1), CartLine::upsell(2, 1, 16.0)],
                &catalog(),
                CustomerSegment::Regular,
            )
            .unwrap();
        // The upsell still counts toward the tier of the other line
        assert_eq!(items[0].unit_price, 16.0);
        assert_eq!(items[1].unit_price, 16.0);
        assert!(items[1].is_upsell);
    }

    #[test]
    fn test_unknown_inactive_and_zero_lines() {
        let table = PriceTable::default();
        let mut products = catalog();
        products.get_mut(&3).unwrap().active = false;

        assert_eq!(
            table.price_lines(&[CartLine::new(9, 1)], &products, CustomerSegment::Regular),
            Err(PricingError::ProductNotFound(9))
        );
        assert_eq!(
            table.price_lines(&[CartLine::new(3, 1)], &products, CustomerSegment::Regular),
            Err(PricingError::ProductInactive(3))
        );
        assert_eq!(
            table.price_lines(&[CartLine::new(1, 0)], &products, CustomerSegment::Regular),
            Err(PricingError::ZeroQuantity(1))
        );
    }

    #[test]
    fn test_parse_tier_table() {
        let table = PriceTable::parse(Category::Liquids, "3:15, 1:18.50").unwrap();
        assert_eq!(table.tier_price(2), Some(Decimal::new(1850, 2)));
        assert_eq!(table.tier_price(3), Some(Decimal::from(15)));

        assert_eq!(
            PriceTable::parse(Category::Liquids, "1-18"),
            Err(PricingError::InvalidTier("1-18".to_string()))
        );
        assert_eq!(
            PriceTable::parse(Category::Liquids, "0:18"),
            Err(PricingError::InvalidTier("0:18".to_string()))
        );
        assert_eq!(
            PriceTable::parse(Category::Liquids, " "),
            Err(PricingError::EmptyTable)
        );
    }

    #[test]
    fn test_totals_round_to_cents() {
        let items = vec![
            OrderItem {
                product_id: 1,
                quantity: 3,
                unit_price: 0.1,
                list_price: 0.2,
                is_upsell: false,
            },
            OrderItem::at_list_price(2, 1, 0.2),
        ];
        let totals = compute_totals(&items);
        assert_eq!(totals.total_without_discount, 0.8);
        assert_eq!(totals.total_with_discount, 0.5);
        assert_eq!(totals.discount_total, 0.3);
    }

    #[test]
    fn test_from_tiers() {
        let table = PriceTable::from_tiers(Category::Liquids, &[(3, 14.5), (1, 19.0)]).unwrap();
        assert_eq!(table.tier_price(2), Some(Decimal::from(19)));
        assert_eq!(table.tier_price(3), Some(to_decimal(14.5)));
        assert_eq!(
            PriceTable::from_tiers(Category::Liquids, &[]),
            Err(PricingError::EmptyTable)
        );
        assert!(PriceTable::from_tiers(Category::Liquids, &[(0, 1.0)]).is_err());
    }

    #[test]
    fn test_huge_quantities_saturate() {
        let lines = [CartLine::new(1, u32::MAX), CartLine::new(2, u32::MAX)];
        let items = PriceTable::default()
            .price_lines(&lines, &catalog(), CustomerSegment::Regular)
            .unwrap();
        assert_eq!(items[0].unit_price, 15.0);
        assert_eq!(items[1].unit_price, 15.0);
    }
}
