//! Transactional storage for cards and orders.
//!
//! A [`Store`] hands out transactions. Everything done through one
//! [`StoreTx`] becomes visible atomically on [`StoreTx::commit`]; dropping a
//! transaction without committing rolls it back.
//!
//! Cards are reserved under pessimistic row locks; order status changes are
//! conditional updates (`WHERE status = from`) that report a lost race
//! instead of failing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use cardvault_core::{CardId, DomainError, OrderId, ProductId};
use cardvault_inventory::Card;
use cardvault_sales::{Order, Transition};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::{PgCatalog, PostgresStore};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A business rule refused the operation (e.g. insufficient stock).
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("database error in {operation}: {message}")]
    Database {
        operation: &'static str,
        message: String,
    },

    /// A persisted row could not be mapped back to the domain model.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn database(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Database {
            operation,
            message: err.to_string(),
        }
    }
}

/// Result of a conditional status update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The row was still in `from`; here it is after the update.
    Applied(Order),
    /// Zero rows matched: another writer moved the order first.
    LostRace,
}

/// Card status changes. Implemented by transactions.
#[async_trait]
pub trait InventoryLedger: Send {
    /// Lock exactly `quantity` available cards of `product_id` for `order_id`.
    ///
    /// Fails with [`DomainError::InsufficientStock`] carrying the available
    /// count when fewer cards are lockable. Nothing is reserved in that case;
    /// callers must drop the transaction.
    async fn reserve(
        &mut self,
        product_id: ProductId,
        quantity: u32,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<Vec<CardId>, StoreError>;

    /// locked → sold for every card held by `order_id`. Returns the count.
    async fn fulfill(&mut self, order_id: OrderId, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// locked → available for every card held by `order_id`.
    async fn release(&mut self, order_id: OrderId) -> Result<u64, StoreError>;

    /// sold → available for every card sold to `order_id`.
    async fn return_to_pool(&mut self, order_id: OrderId) -> Result<u64, StoreError>;

    async fn available_count(&mut self, product_id: ProductId) -> Result<u64, StoreError>;

    async fn cards_for_order(&mut self, order_id: OrderId) -> Result<Vec<Card>, StoreError>;
}

/// Order persistence and guarded status updates.
#[async_trait]
pub trait OrderRepository: Send {
    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError>;

    async fn order_by_id(&mut self, id: OrderId) -> Result<Option<Order>, StoreError>;

    async fn order_by_no(&mut self, order_no: &str) -> Result<Option<Order>, StoreError>;

    /// `UPDATE ... WHERE id = order_id AND status = from`.
    async fn apply_transition(&mut self, transition: &Transition) -> Result<TransitionOutcome, StoreError>;

    /// Bulk pending → expired for orders whose `expired_at` is before `now`.
    /// Returns the orders this call expired.
    async fn expire_overdue(&mut self, now: DateTime<Utc>) -> Result<Vec<Order>, StoreError>;

    async fn increment_sales(&mut self, product_id: ProductId, quantity: u32) -> Result<(), StoreError>;

    /// Take the exclusive right to settle a refund with the gateway.
    ///
    /// Returns `true` only while the order is `refund_pending` and no claim
    /// taken at or after `stale_before` is held. Claims older than that
    /// belong to a crashed caller and are taken over.
    async fn claim_refund(
        &mut self,
        order_id: OrderId,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Whether a live claim (taken at or after `stale_before`) exists.
    async fn refund_claim_held(&mut self, order_id: OrderId, stale_before: DateTime<Utc>) -> Result<bool, StoreError>;

    async fn release_refund_claim(&mut self, order_id: OrderId) -> Result<(), StoreError>;
}

/// One unit of work.
#[async_trait]
pub trait StoreTx: InventoryLedger + OrderRepository + Send {
    async fn commit(self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Tx: StoreTx + 'static;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}
