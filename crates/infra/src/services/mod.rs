//! Application services over the store, catalog and gateway.
//!
//! [`Shop`] owns the shared [`ShopContext`] and hands out one borrowed view
//! per workflow: checkout, webhook handling, expiry sweeps, refunds and the
//! admin console.

use std::sync::Arc;

use crate::store::Store;

pub mod admin;
pub mod checkout;
pub mod context;
pub mod error;
pub mod fulfillment;
pub mod refund;
pub mod sweeper;
pub mod webhook;

#[cfg(test)]
mod tests;

pub use admin::{AdminOrders, SyncOutcome};
pub use checkout::{Checkout, CheckoutRequest, OrderView, PlacedOrder};
pub use context::{ShopContext, ShopSettings};
pub use error::{ServiceError, ServiceResult};
pub use fulfillment::Completion;
pub use refund::{ManualAttestation, RefundWorkflow};
pub use sweeper::{ExpirySweeper, SweepReport};
pub use webhook::{WebhookReply, WebhookVerifier};

/// Cheaply cloneable handle to every service.
pub struct Shop<S: Store> {
    ctx: Arc<ShopContext<S>>,
}

impl<S: Store> Clone for Shop<S> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
        }
    }
}

impl<S: Store> Shop<S> {
    pub fn new(ctx: ShopContext<S>) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    pub fn context(&self) -> &ShopContext<S> {
        &self.ctx
    }

    pub fn checkout(&self) -> Checkout<'_, S> {
        Checkout::new(&self.ctx)
    }

    pub fn webhooks(&self) -> WebhookVerifier<'_, S> {
        WebhookVerifier::new(&self.ctx)
    }

    pub fn sweeper(&self) -> ExpirySweeper<'_, S> {
        ExpirySweeper::new(&self.ctx)
    }

    pub fn refunds(&self) -> RefundWorkflow<'_, S> {
        RefundWorkflow::new(&self.ctx)
    }

    pub fn admin(&self) -> AdminOrders<'_, S> {
        AdminOrders::new(&self.ctx)
    }
}
