//! Inbound payment notifications.
//!
//! Every path ends in one of three replies. The gateway only ever sees the
//! literal body `success` or `fail`; the reason for a `fail` is logged here
//! and nowhere else.

use cardvault_core::minor_units;
use cardvault_gateway::{Notification, Params};
use cardvault_sales::{Order, OrderEvent, OrderStatus};

use crate::store::Store;

use super::context::ShopContext;
use super::error::ServiceError;
use super::fulfillment::Completion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookReply {
    /// Processed, or nothing left to do. Stops gateway retries.
    Success,
    /// Malformed, forged or mismatched notification.
    Rejected,
    /// Transient failure; the gateway should deliver again.
    RetryLater,
}

impl WebhookReply {
    pub fn status_code(&self) -> u16 {
        match self {
            WebhookReply::Success => 200,
            WebhookReply::Rejected => 400,
            WebhookReply::RetryLater => 500,
        }
    }

    pub fn body(&self) -> &'static str {
        match self {
            WebhookReply::Success => "success",
            WebhookReply::Rejected | WebhookReply::RetryLater => "fail",
        }
    }
}

pub struct WebhookVerifier<'a, S: Store> {
    ctx: &'a ShopContext<S>,
}

impl<'a, S: Store> WebhookVerifier<'a, S> {
    pub(crate) fn new(ctx: &'a ShopContext<S>) -> Self {
        Self { ctx }
    }

    #[tracing::instrument(
        skip(self, params),
        fields(out_trade_no = params.get("out_trade_no").map(String::as_str).unwrap_or(""))
    )]
    pub async fn handle(&self, params: &Params) -> WebhookReply {
        let notification = match Notification::verify(params, self.ctx.gateway.merchant()) {
            Ok(n) => n,
            Err(err) => {
                tracing::warn!(error = %err, "notification rejected");
                return WebhookReply::Rejected;
            }
        };

        let order = match self.ctx.load_order_by_no(&notification.out_trade_no).await {
            Ok(order) => order,
            Err(ServiceError::NotFound) => {
                tracing::warn!("notification for unknown order");
                return WebhookReply::Rejected;
            }
            Err(err) => {
                tracing::error!(error = %err, "order lookup failed");
                return WebhookReply::RetryLater;
            }
        };

        if let Some(reason) = mismatch(&order, &notification) {
            tracing::warn!(order_no = %order.order_no, reason, "notification does not match order");
            return WebhookReply::Rejected;
        }

        if order.status.is_settled() {
            tracing::debug!(order_no = %order.order_no, "duplicate notification");
            return WebhookReply::Success;
        }
        if !notification.is_trade_success() {
            tracing::info!(
                order_no = %order.order_no,
                trade_status = %notification.trade_status,
                "acknowledged non-success trade status"
            );
            return WebhookReply::Success;
        }
        if order.status != OrderStatus::Pending {
            tracing::info!(order_no = %order.order_no, status = %order.status, "notification for closed order");
            return WebhookReply::Success;
        }

        self.confirm_payment(&order, &notification.trade_no).await
    }

    /// Fulfill a verified payment against the order as it was read.
    pub(super) async fn confirm_payment(&self, order: &Order, trade_no: &str) -> WebhookReply {
        let event = OrderEvent::PaymentConfirmed {
            trade_no: trade_no.to_string(),
            paid_at: self.ctx.now(),
        };
        match self.ctx.complete_order(order, event).await {
            Ok(Completion::Completed(_)) | Ok(Completion::AlreadySettled(_)) => WebhookReply::Success,
            Err(err) => {
                tracing::error!(order_no = %order.order_no, error = %err, "fulfillment failed");
                WebhookReply::RetryLater
            }
        }
    }
}

/// Channel and amount reconciliation.
fn mismatch(order: &Order, notification: &Notification) -> Option<&'static str> {
    if order.payment_method != notification.channel {
        return Some("channel");
    }
    let expected = order.total_amount.to_minor_units();
    let received = minor_units(&notification.money);
    match (expected, received) {
        (Some(a), Some(b)) if a == b => None,
        _ => Some("amount"),
    }
}
