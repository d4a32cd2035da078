//! pending → completed, shared by the webhook and the admin console.

use cardvault_events::CacheInvalidation;
use cardvault_sales::{plan, Order, OrderEvent};

use crate::store::{InventoryLedger, OrderRepository, Store, StoreTx, TransitionOutcome};

use super::context::ShopContext;
use super::error::{ServiceError, ServiceResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// This call moved the order to completed.
    Completed(Order),
    /// Another writer had already completed it.
    AlreadySettled(Order),
}

impl Completion {
    pub fn into_order(self) -> Order {
        match self {
            Completion::Completed(o) | Completion::AlreadySettled(o) => o,
        }
    }
}

impl<S: Store> ShopContext<S> {
    /// Conditional transition, card fulfillment and sales counter in one
    /// transaction. A lost race is resolved by re-reading the order.
    #[tracing::instrument(skip(self, order, event), fields(order_no = %order.order_no))]
    pub(crate) async fn complete_order(&self, order: &Order, event: OrderEvent) -> ServiceResult<Completion> {
        let transition = plan(order, event, &self.settings.policy)?;
        let now = self.now();

        let mut tx = self.store.begin().await?;
        match tx.apply_transition(&transition).await? {
            TransitionOutcome::Applied(updated) => {
                let sold = tx.fulfill(order.id, now).await?;
                if sold != u64::from(order.quantity) {
                    // Dropping the transaction rolls the status change back.
                    tracing::error!(sold, quantity = order.quantity, "locked card count does not match order");
                    return Err(ServiceError::internal(format!(
                        "order {} holds {sold} locked cards, expected {}",
                        order.order_no, order.quantity
                    )));
                }
                tx.increment_sales(order.product_id, order.quantity).await?;
                tx.commit().await?;

                tracing::info!(cards = sold, "order completed");
                self.invalidation.invalidate_all(vec![
                    CacheInvalidation::stock(order.product_id),
                    CacheInvalidation::order(order.order_no.clone()),
                ]);
                Ok(Completion::Completed(updated))
            }
            TransitionOutcome::LostRace => {
                drop(tx);
                let current = self.load_order(order.id).await?;
                if current.status.is_settled() {
                    tracing::debug!("order already completed by a concurrent writer");
                    Ok(Completion::AlreadySettled(current))
                } else {
                    Err(ServiceError::conflict(format!(
                        "order {} moved to {} concurrently",
                        current.order_no, current.status
                    )))
                }
            }
        }
    }
}
