//! In-memory store for tests and local runs.
//!
//! Transactions are serialized: `begin` takes an owned lock on the whole
//! state and works on a copy, `commit` writes the copy back. Dropping the
//! transaction discards the copy. That gives the same all-or-nothing and
//! no-oversell behavior as the Postgres backend, without row-level
//! concurrency.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use cardvault_core::{CardId, DomainError, OrderId, ProductId, Secret};
use cardvault_inventory::Card;
use cardvault_sales::{Order, OrderStatus, Transition};

use super::{InventoryLedger, OrderRepository, Store, StoreError, StoreTx, TransitionOutcome};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    /// Keyed by id; v7 ids keep import order.
    cards: BTreeMap<CardId, Card>,
    orders: HashMap<OrderId, Order>,
    order_nos: HashMap<String, OrderId>,
    sales: HashMap<ProductId, u64>,
    refund_claims: HashMap<OrderId, DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stock import: add available cards for a product.
    pub async fn import_cards<I, T>(&self, product_id: ProductId, secrets: I) -> Vec<CardId>
    where
        I: IntoIterator<Item = T>,
        T: Into<Secret>,
    {
        let mut state = self.state.lock().await;
        secrets
            .into_iter()
            .map(|secret| {
                let card = Card::available(product_id, secret);
                let id = card.id;
                state.cards.insert(id, card);
                id
            })
            .collect()
    }

    /// Snapshot of every card, for assertions.
    pub async fn cards(&self) -> Vec<Card> {
        self.state.lock().await.cards.values().cloned().collect()
    }

    pub async fn sales_count(&self, product_id: ProductId) -> u64 {
        self.state
            .lock()
            .await
            .sales
            .get(&product_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Store for InMemoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(InMemoryTx { guard, work })
    }
}

pub struct InMemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    work: MemoryState,
}

#[async_trait]
impl InventoryLedger for InMemoryTx {
    async fn reserve(
        &mut self,
        product_id: ProductId,
        quantity: u32,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<Vec<CardId>, StoreError> {
        let candidates: Vec<CardId> = self
            .work
            .cards
            .values()
            .filter(|c| c.product_id == product_id && c.is_available())
            .map(|c| c.id)
            .collect();

        if candidates.len() < quantity as usize {
            return Err(DomainError::insufficient_stock(quantity, candidates.len() as u64).into());
        }

        let mut reserved = Vec::with_capacity(quantity as usize);
        for id in candidates.into_iter().take(quantity as usize) {
            if let Some(card) = self.work.cards.get_mut(&id) {
                card.lock(order_id, now)?;
                reserved.push(id);
            }
        }
        Ok(reserved)
    }

    async fn fulfill(&mut self, order_id: OrderId, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut n = 0;
        for card in self.work.cards.values_mut().filter(|c| c.is_locked_by(order_id)) {
            card.sell(now)?;
            n += 1;
        }
        Ok(n)
    }

    async fn release(&mut self, order_id: OrderId) -> Result<u64, StoreError> {
        let mut n = 0;
        for card in self.work.cards.values_mut().filter(|c| c.is_locked_by(order_id)) {
            card.release()?;
            n += 1;
        }
        Ok(n)
    }

    async fn return_to_pool(&mut self, order_id: OrderId) -> Result<u64, StoreError> {
        let mut n = 0;
        for card in self.work.cards.values_mut().filter(|c| c.is_sold_to(order_id)) {
            card.return_to_pool()?;
            n += 1;
        }
        Ok(n)
    }

    async fn available_count(&mut self, product_id: ProductId) -> Result<u64, StoreError> {
        Ok(self
            .work
            .cards
            .values()
            .filter(|c| c.product_id == product_id && c.is_available())
            .count() as u64)
    }

    async fn cards_for_order(&mut self, order_id: OrderId) -> Result<Vec<Card>, StoreError> {
        Ok(self
            .work
            .cards
            .values()
            .filter(|c| c.order_id == Some(order_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl OrderRepository for InMemoryTx {
    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        if self.work.order_nos.contains_key(&order.order_no) || self.work.orders.contains_key(&order.id) {
            return Err(DomainError::conflict(format!("order {} already exists", order.order_no)).into());
        }
        self.work.order_nos.insert(order.order_no.clone(), order.id);
        self.work.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn order_by_id(&mut self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.work.orders.get(&id).cloned())
    }

    async fn order_by_no(&mut self, order_no: &str) -> Result<Option<Order>, StoreError> {
        Ok(self
            .work
            .order_nos
            .get(order_no)
            .and_then(|id| self.work.orders.get(id))
            .cloned())
    }

    async fn apply_transition(&mut self, transition: &Transition) -> Result<TransitionOutcome, StoreError> {
        match self.work.orders.get_mut(&transition.order_id) {
            Some(order) if order.status == transition.from => {
                order.apply(transition);
                Ok(TransitionOutcome::Applied(order.clone()))
            }
            _ => Ok(TransitionOutcome::LostRace),
        }
    }

    async fn expire_overdue(&mut self, now: DateTime<Utc>) -> Result<Vec<Order>, StoreError> {
        let mut expired = Vec::new();
        for order in self.work.orders.values_mut().filter(|o| o.is_overdue(now)) {
            order.status = OrderStatus::Expired;
            expired.push(order.clone());
        }
        Ok(expired)
    }

    async fn increment_sales(&mut self, product_id: ProductId, quantity: u32) -> Result<(), StoreError> {
        *self.work.sales.entry(product_id).or_default() += u64::from(quantity);
        Ok(())
    }

    async fn claim_refund(
        &mut self,
        order_id: OrderId,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let pending = self
            .work
            .orders
            .get(&order_id)
            .is_some_and(|o| o.status == OrderStatus::RefundPending);
        if !pending || self.refund_claim_held(order_id, stale_before).await? {
            return Ok(false);
        }
        self.work.refund_claims.insert(order_id, now);
        Ok(true)
    }

    async fn refund_claim_held(&mut self, order_id: OrderId, stale_before: DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(self
            .work
            .refund_claims
            .get(&order_id)
            .is_some_and(|claimed_at| *claimed_at >= stale_before))
    }

    async fn release_refund_claim(&mut self, order_id: OrderId) -> Result<(), StoreError> {
        self.work.refund_claims.remove(&order_id);
        Ok(())
    }
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn commit(mut self) -> Result<(), StoreError> {
        *self.guard = std::mem::take(&mut self.work);
        Ok(())
    }
}
