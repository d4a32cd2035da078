use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use cardvault_core::{Clock, OrderId};
use cardvault_events::InvalidationSink;
use cardvault_gateway::PaymentGateway;
use cardvault_products::Catalog;
use cardvault_sales::{Order, TransitionPolicy};

use crate::lease::SweepLease;
use crate::store::{OrderRepository, Store};

use super::error::{ServiceError, ServiceResult};

/// Business tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShopSettings {
    /// Reservation lifetime of a pending order.
    pub order_ttl: Duration,
    /// Minimum gap between lazy sweeps.
    pub sweep_interval: Duration,
    pub manual_handoff_ttl: Duration,
    /// Age after which a refund claim is considered abandoned.
    pub refund_claim_ttl: Duration,
    /// Gateway channels buyers may choose.
    pub payment_channels: Vec<String>,
    pub policy: TransitionPolicy,
}

impl Default for ShopSettings {
    fn default() -> Self {
        Self {
            order_ttl: Duration::minutes(15),
            sweep_interval: Duration::seconds(60),
            manual_handoff_ttl: Duration::minutes(5),
            refund_claim_ttl: Duration::minutes(5),
            payment_channels: vec!["alipay".to_string(), "wxpay".to_string()],
            policy: TransitionPolicy::default(),
        }
    }
}

/// Collaborators shared by every service.
pub struct ShopContext<S: Store> {
    pub store: S,
    pub catalog: Arc<dyn Catalog>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub invalidation: Arc<dyn InvalidationSink>,
    pub clock: Arc<dyn Clock>,
    pub lease: Arc<dyn SweepLease>,
    pub settings: ShopSettings,
}

impl<S: Store> ShopContext<S> {
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Read an order in a throwaway transaction.
    pub(crate) async fn load_order(&self, id: OrderId) -> ServiceResult<Order> {
        let mut tx = self.store.begin().await?;
        tx.order_by_id(id).await?.ok_or(ServiceError::NotFound)
    }

    pub(crate) async fn load_order_by_no(&self, order_no: &str) -> ServiceResult<Order> {
        let mut tx = self.store.begin().await?;
        tx.order_by_no(order_no).await?.ok_or(ServiceError::NotFound)
    }
}
