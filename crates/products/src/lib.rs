//! Catalog collaborator contract.
//!
//! Product CRUD, categories and listing live outside the core. Checkout only
//! needs a price snapshot and the purchasable quantity window, which is what
//! this crate models.

pub mod catalog;
pub mod product;

pub use catalog::{Catalog, InMemoryCatalog};
pub use product::Product;
