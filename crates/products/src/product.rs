use serde::{Deserialize, Serialize};

use cardvault_core::{Amount, DomainError, DomainResult, Entity, ProductId};

/// Catalog view of a product, as consumed by checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    /// Unit price snapshot; orders copy it at creation and never re-read it.
    pub price: Amount,
    pub min_qty: u32,
    pub max_qty: u32,
    pub is_active: bool,
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Product {
    /// Check if product can be sold (must be active).
    pub fn can_be_sold(&self) -> bool {
        self.is_active
    }

    /// Validate a requested quantity against the purchasable window.
    pub fn check_quantity(&self, quantity: u32) -> DomainResult<()> {
        if quantity == 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if quantity < self.min_qty {
            return Err(DomainError::validation(format!(
                "quantity must be at least {}",
                self.min_qty
            )));
        }
        if self.max_qty > 0 && quantity > self.max_qty {
            return Err(DomainError::validation(format!(
                "quantity must be at most {}",
                self.max_qty
            )));
        }
        Ok(())
    }
}
