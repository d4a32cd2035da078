//! Infrastructure layer: storage backends, sweep leases, configuration and
//! the application services that tie them to the payment gateway.

pub mod config;
pub mod lease;
pub mod services;
pub mod store;

#[cfg(feature = "redis")]
pub mod invalidation;

pub use config::{AppConfig, ConfigError};
pub use lease::{LocalLease, PgSweepLease, SweepLease};
pub use services::{Shop, ShopContext, ShopSettings};
pub use store::{InMemoryStore, PgCatalog, PostgresStore, Store, StoreError};
