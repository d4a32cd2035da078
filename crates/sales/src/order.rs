use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use cardvault_core::{Amount, DomainError, Entity, OrderId, ProductId, UserId};
use cardvault_products::Product;

use crate::transition::{OrderEvent, Transition};

/// Order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Completed,
    Expired,
    RefundPending,
    RefundRejected,
    Refunded,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Completed,
        OrderStatus::Expired,
        OrderStatus::RefundPending,
        OrderStatus::RefundRejected,
        OrderStatus::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Completed => "completed",
            OrderStatus::Expired => "expired",
            OrderStatus::RefundPending => "refund_pending",
            OrderStatus::RefundRejected => "refund_rejected",
            OrderStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    /// Payment has been taken for this order.
    pub fn is_settled(&self) -> bool {
        matches!(self, OrderStatus::Paid | OrderStatus::Completed)
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Purchase of a fixed quantity of cards at a snapshot price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    /// Public merchant order number (`out_trade_no` on the gateway wire).
    pub order_no: String,
    pub product_id: ProductId,
    pub user_id: UserId,
    pub quantity: u32,
    /// Unit price × quantity at creation; never recomputed.
    pub total_amount: Amount,
    pub status: OrderStatus,
    /// Gateway channel chosen at checkout (e.g. `alipay`).
    pub payment_method: String,
    pub trade_no: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub refund_reason: Option<String>,
    pub refund_requested_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refund_rejection: Option<String>,
}

impl Entity for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Checkout input for a new order.
#[derive(Debug, Clone)]
pub struct PlaceOrder<'a> {
    pub user_id: UserId,
    pub product: &'a Product,
    pub quantity: u32,
    pub payment_method: String,
    pub now: DateTime<Utc>,
    pub ttl: Duration,
}

impl Order {
    /// Build a pending order from a catalog snapshot.
    pub fn place(cmd: PlaceOrder<'_>) -> Result<Order, DomainError> {
        if !cmd.product.can_be_sold() {
            return Err(DomainError::validation("product is not on sale"));
        }
        cmd.product.check_quantity(cmd.quantity)?;
        if cmd.payment_method.trim().is_empty() {
            return Err(DomainError::validation("payment method is required"));
        }
        if cmd.ttl <= Duration::zero() {
            return Err(DomainError::validation("reservation ttl must be positive"));
        }

        Ok(Order {
            id: OrderId::new(),
            order_no: generate_order_no(cmd.now),
            product_id: cmd.product.id,
            user_id: cmd.user_id,
            quantity: cmd.quantity,
            total_amount: cmd.product.price.times(cmd.quantity),
            status: OrderStatus::Pending,
            payment_method: cmd.payment_method,
            trade_no: None,
            created_at: cmd.now,
            expired_at: cmd.now + cmd.ttl,
            paid_at: None,
            refund_reason: None,
            refund_requested_at: None,
            refunded_at: None,
            refund_rejection: None,
        })
    }

    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == OrderStatus::Pending && self.expired_at < now
    }

    /// Apply a planned transition to this in-memory copy.
    ///
    /// Storage backends guard this with `status == transition.from`; calling it
    /// on a row in another state is a programming error and is ignored.
    pub fn apply(&mut self, transition: &Transition) {
        if self.status != transition.from {
            return;
        }
        self.status = transition.to;

        match &transition.event {
            OrderEvent::PaymentConfirmed { trade_no, paid_at } => {
                self.trade_no = Some(trade_no.clone());
                self.paid_at = Some(*paid_at);
            }
            OrderEvent::ManuallyCompleted { trade_no, paid_at } => {
                if trade_no.is_some() {
                    self.trade_no = trade_no.clone();
                }
                self.paid_at = Some(*paid_at);
            }
            OrderEvent::Expired => {}
            OrderEvent::RefundRequested { reason, at } => {
                self.refund_reason = Some(reason.clone());
                self.refund_requested_at = Some(*at);
                self.refund_rejection = None;
            }
            OrderEvent::RefundApproved { at } => {
                self.refunded_at = Some(*at);
            }
            OrderEvent::RefundRejected { reason } => {
                self.refund_rejection = reason.clone();
            }
        }
    }
}

/// Merchant order number: UTC timestamp followed by six random digits.
pub fn generate_order_no(now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{}{:06}", now.format("%Y%m%d%H%M%S"), suffix)
}
