//! Operator actions on pending orders.

use serde::Serialize;

use cardvault_auth::{authorize, Capability, Principal};
use cardvault_core::{minor_units, OrderId};
use cardvault_gateway::{GatewayOrder, OrderLookup};
use cardvault_observability::AuditEvent;
use cardvault_sales::{Order, OrderEvent, OrderStatus};

use crate::store::Store;

use super::context::ShopContext;
use super::error::{ServiceError, ServiceResult};
use super::fulfillment::Completion;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub order: Order,
    pub gateway: GatewayOrder,
    /// Whether this call completed the order.
    pub completed: bool,
}

pub struct AdminOrders<'a, S: Store> {
    ctx: &'a ShopContext<S>,
}

impl<'a, S: Store> AdminOrders<'a, S> {
    pub(crate) fn new(ctx: &'a ShopContext<S>) -> Self {
        Self { ctx }
    }

    /// Mark a pending order paid on the operator's word.
    #[tracing::instrument(skip(self, principal, trade_no), fields(actor = %principal.id()))]
    pub async fn complete_manually(
        &self,
        principal: &Principal,
        order_id: OrderId,
        trade_no: Option<String>,
    ) -> ServiceResult<Order> {
        authorize(principal, Capability::CompleteOrder)?;

        let order = self.ctx.load_order(order_id).await?;
        if order.status.is_settled() {
            return Ok(order);
        }

        let trade_no = trade_no.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        let event = OrderEvent::ManuallyCompleted {
            trade_no: trade_no.clone(),
            paid_at: self.ctx.now(),
        };
        match self.ctx.complete_order(&order, event).await? {
            Completion::Completed(updated) => {
                AuditEvent::OrderCompletedManually {
                    actor: principal.id().to_string(),
                    order_no: updated.order_no.clone(),
                    trade_no,
                }
                .record();
                Ok(updated)
            }
            Completion::AlreadySettled(current) => Ok(current),
        }
    }

    /// Ask the gateway about a pending order and complete it if it was paid.
    #[tracing::instrument(skip(self, principal), fields(actor = %principal.id()))]
    pub async fn sync_with_gateway(&self, principal: &Principal, order_id: OrderId) -> ServiceResult<SyncOutcome> {
        authorize(principal, Capability::SyncWithGateway)?;

        let order = self.ctx.load_order(order_id).await?;
        if order.status != OrderStatus::Pending && !order.status.is_settled() {
            return Err(ServiceError::InvalidStateTransition {
                from: order.status.to_string(),
                to: OrderStatus::Completed.to_string(),
            });
        }

        let remote = self
            .ctx
            .gateway
            .query_order(OrderLookup::OutTradeNo(order.order_no.clone()))
            .await?;

        if order.status.is_settled() || !remote.paid {
            return Ok(SyncOutcome {
                order,
                gateway: remote,
                completed: false,
            });
        }

        if remote.out_trade_no != order.order_no {
            return Err(ServiceError::validation("gateway returned a different order"));
        }
        if remote.channel != order.payment_method {
            return Err(ServiceError::validation(format!(
                "gateway paid through {} but the order was placed with {}",
                remote.channel, order.payment_method
            )));
        }
        let expected = order.total_amount.to_minor_units();
        if expected.is_none() || expected != minor_units(&remote.money) {
            return Err(ServiceError::validation(format!(
                "gateway amount {} does not match order total {}",
                remote.money,
                order.total_amount.to_two_decimals()
            )));
        }

        let event = OrderEvent::PaymentConfirmed {
            trade_no: remote.trade_no.clone(),
            paid_at: self.ctx.now(),
        };
        let completion = self.ctx.complete_order(&order, event).await?;
        let completed = matches!(completion, Completion::Completed(_));
        if completed {
            AuditEvent::OrderSyncedFromGateway {
                actor: principal.id().to_string(),
                order_no: order.order_no.clone(),
                trade_no: remote.trade_no.clone(),
            }
            .record();
        }
        Ok(SyncOutcome {
            order: completion.into_order(),
            gateway: remote,
            completed,
        })
    }
}
