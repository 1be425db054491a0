use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProductId(pub String);

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Catalog entry as seen by the quoting core.
///
/// `stock = None` means inventory is not tracked for the product: it never
/// blocks an approval and is never mutated by deduction or restoration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub base_price: Decimal,
    pub tax_rate: Decimal,
    pub unit: String,
    pub stock: Option<i64>,
    pub active: bool,
}

impl Product {
    pub fn tracks_inventory(&self) -> bool {
        self.stock.is_some()
    }

    pub fn has_stock_for(&self, quantity: u32) -> bool {
        match self.stock {
            Some(available) => available >= i64::from(quantity),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{Product, ProductId};

    fn product(stock: Option<i64>) -> Product {
        Product {
            id: ProductId("prod-widget".to_string()),
            name: "Widget".to_string(),
            base_price: Decimal::new(10_000, 2),
            tax_rate: Decimal::new(1_600, 2),
            unit: "pcs".to_string(),
            stock,
            active: true,
        }
    }

    #[test]
    fn untracked_inventory_always_has_stock() {
        let product = product(None);
        assert!(!product.tracks_inventory());
        assert!(product.has_stock_for(1_000_000));
    }

    #[test]
    fn tracked_inventory_compares_against_quantity() {
        let product = product(Some(5));
        assert!(product.has_stock_for(5));
        assert!(!product.has_stock_for(6));
    }
}
