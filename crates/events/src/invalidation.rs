use serde::{Deserialize, Serialize};

use cardvault_core::ProductId;

/// A cached view that is now stale.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheInvalidation {
    /// Available-card count for a product changed.
    ProductStock { product_id: ProductId },
    /// An order's status or cards changed.
    Order { order_no: String },
}

impl CacheInvalidation {
    pub fn stock(product_id: ProductId) -> Self {
        Self::ProductStock { product_id }
    }

    pub fn order(order_no: impl Into<String>) -> Self {
        Self::Order {
            order_no: order_no.into(),
        }
    }

    /// Cache key the message refers to.
    pub fn cache_key(&self) -> String {
        match self {
            Self::ProductStock { product_id } => format!("stock:{product_id}"),
            Self::Order { order_no } => format!("order:{order_no}"),
        }
    }
}
