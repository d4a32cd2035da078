//! Reclaims cards held by abandoned pending orders.

use std::collections::BTreeSet;

use serde::Serialize;

use cardvault_auth::{authorize, Capability, Principal};
use cardvault_events::CacheInvalidation;

use crate::store::{InventoryLedger, OrderRepository, Store, StoreTx};

use super::context::ShopContext;
use super::error::ServiceResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired_orders: usize,
    pub released_cards: u64,
}

pub struct ExpirySweeper<'a, S: Store> {
    ctx: &'a ShopContext<S>,
}

impl<'a, S: Store> ExpirySweeper<'a, S> {
    pub(crate) fn new(ctx: &'a ShopContext<S>) -> Self {
        Self { ctx }
    }

    /// Expire every overdue pending order and release its cards, in one
    /// transaction. Running it again right away is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self) -> ServiceResult<SweepReport> {
        let now = self.ctx.now();
        let mut tx = self.ctx.store.begin().await?;

        let expired = tx.expire_overdue(now).await?;
        let mut report = SweepReport {
            expired_orders: expired.len(),
            released_cards: 0,
        };
        for order in &expired {
            report.released_cards += tx.release(order.id).await?;
        }
        tx.commit().await?;

        if report.expired_orders > 0 {
            tracing::info!(
                expired_orders = report.expired_orders,
                released_cards = report.released_cards,
                "expired abandoned orders"
            );
            let products: BTreeSet<_> = expired.iter().map(|o| o.product_id).collect();
            let mut messages: Vec<_> = products.into_iter().map(CacheInvalidation::stock).collect();
            messages.extend(expired.into_iter().map(|o| CacheInvalidation::order(o.order_no)));
            self.ctx.invalidation.invalidate_all(messages);
        }
        Ok(report)
    }

    /// Sweep unless the lease says another sweep ran within the interval.
    pub async fn maybe_sweep(&self) -> ServiceResult<Option<SweepReport>> {
        let acquired = self
            .ctx
            .lease
            .try_acquire(self.ctx.now(), self.ctx.settings.sweep_interval)
            .await?;
        if !acquired {
            return Ok(None);
        }
        self.sweep().await.map(Some)
    }

    /// Admin-forced, unthrottled sweep.
    pub async fn sweep_as(&self, principal: &Principal) -> ServiceResult<SweepReport> {
        authorize(principal, Capability::RunSweep)?;
        self.sweep().await
    }

    /// Inline sweep on a hot path. Failures are logged and swallowed.
    pub(crate) async fn sweep_inline(&self) {
        if let Err(err) = self.maybe_sweep().await {
            tracing::warn!(error = %err, "inline sweep failed");
        }
    }
}
