use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use cardvault_core::ProductId;

use crate::Product;

/// Read-only catalog lookup.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_product(&self, id: ProductId) -> Option<Product>;
}

/// In-memory catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<ProductId, Product>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, product: Product) {
        self.products
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(product.id, product);
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn get_product(&self, id: ProductId) -> Option<Product> {
        self.products
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardvault_core::Amount;

    #[tokio::test]
    async fn upsert_then_lookup() {
        let catalog = InMemoryCatalog::new();
        let id = ProductId::new();
        catalog.upsert(Product {
            id,
            name: "Steam 50".to_string(),
            price: Amount::parse("50.00").unwrap(),
            min_qty: 1,
            max_qty: 10,
            is_active: true,
        });

        assert_eq!(catalog.get_product(id).await.unwrap().name, "Steam 50");
        assert!(catalog.get_product(ProductId::new()).await.is_none());
    }
}
