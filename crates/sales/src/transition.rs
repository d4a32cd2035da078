//! Order state machine: the legal edges and the guard that plans a move.
//!
//! `plan` never writes anything. It checks the edge against the order's
//! current status and the event's own preconditions, and returns the
//! [`Transition`] a store must apply as `UPDATE ... WHERE status = from`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cardvault_core::{DomainError, OrderId};

use crate::order::{Order, OrderStatus};

/// Something that happened to an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderEvent {
    /// Verified gateway notification with `TRADE_SUCCESS`.
    PaymentConfirmed {
        trade_no: String,
        paid_at: DateTime<Utc>,
    },
    /// Operator marked the order paid out of band.
    ManuallyCompleted {
        trade_no: Option<String>,
        paid_at: DateTime<Utc>,
    },
    /// Reservation deadline passed without payment.
    Expired,
    RefundRequested {
        reason: String,
        at: DateTime<Utc>,
    },
    RefundApproved {
        at: DateTime<Utc>,
    },
    RefundRejected {
        reason: Option<String>,
    },
}

impl OrderEvent {
    pub fn target(&self) -> OrderStatus {
        match self {
            OrderEvent::PaymentConfirmed { .. } | OrderEvent::ManuallyCompleted { .. } => {
                OrderStatus::Completed
            }
            OrderEvent::Expired => OrderStatus::Expired,
            OrderEvent::RefundRequested { .. } => OrderStatus::RefundPending,
            OrderEvent::RefundApproved { .. } => OrderStatus::Refunded,
            OrderEvent::RefundRejected { .. } => OrderStatus::RefundRejected,
        }
    }

    fn allowed_from(&self, policy: &TransitionPolicy) -> &'static [OrderStatus] {
        match self {
            OrderEvent::PaymentConfirmed { .. }
            | OrderEvent::ManuallyCompleted { .. }
            | OrderEvent::Expired => &[OrderStatus::Pending],
            OrderEvent::RefundRequested { .. } if policy.allow_refund_resubmission => {
                &[OrderStatus::Completed, OrderStatus::RefundRejected]
            }
            OrderEvent::RefundRequested { .. } => &[OrderStatus::Completed],
            OrderEvent::RefundApproved { .. } | OrderEvent::RefundRejected { .. } => {
                &[OrderStatus::RefundPending]
            }
        }
    }
}

/// Every edge the state machine can ever take.
///
/// `RefundRejected -> RefundPending` is only live when
/// [`TransitionPolicy::allow_refund_resubmission`] is set.
pub const LEGAL_EDGES: &[(OrderStatus, OrderStatus)] = &[
    (OrderStatus::Pending, OrderStatus::Completed),
    (OrderStatus::Pending, OrderStatus::Expired),
    (OrderStatus::Completed, OrderStatus::RefundPending),
    (OrderStatus::RefundPending, OrderStatus::Refunded),
    (OrderStatus::RefundPending, OrderStatus::RefundRejected),
    (OrderStatus::RefundRejected, OrderStatus::RefundPending),
];

/// Tunables that change what the guard accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionPolicy {
    /// Minimum refund reason length, in characters after trimming.
    pub refund_reason_min_len: usize,
    pub allow_refund_resubmission: bool,
}

impl Default for TransitionPolicy {
    fn default() -> Self {
        Self {
            refund_reason_min_len: 5,
            allow_refund_resubmission: false,
        }
    }
}

/// A guarded, not-yet-applied status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub order_id: OrderId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub event: OrderEvent,
}

/// Check `event` against the order's current status and plan the move.
///
/// Illegal moves fail with `InvalidStateTransition` before anything is
/// written; malformed event data fails with `Validation`.
pub fn plan(
    order: &Order,
    event: OrderEvent,
    policy: &TransitionPolicy,
) -> Result<Transition, DomainError> {
    let to = event.target();
    if !event.allowed_from(policy).contains(&order.status) {
        return Err(DomainError::invalid_transition(order.status, to));
    }

    match &event {
        OrderEvent::PaymentConfirmed { trade_no, .. } if trade_no.trim().is_empty() => {
            return Err(DomainError::validation("trade_no is required"));
        }
        OrderEvent::RefundRequested { reason, .. }
            if reason.trim().chars().count() < policy.refund_reason_min_len =>
        {
            return Err(DomainError::validation(format!(
                "refund reason must be at least {} characters",
                policy.refund_reason_min_len
            )));
        }
        _ => {}
    }

    Ok(Transition {
        order_id: order.id,
        from: order.status,
        to,
        event,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardvault_core::{Amount, ProductId, UserId};
    use chrono::Duration;
    use proptest::prelude::*;

    fn order_in(status: OrderStatus) -> Order {
        let now = Utc::now();
        Order {
            id: OrderId::new(),
            order_no: "20260101000000000001".to_string(),
            product_id: ProductId::new(),
            user_id: UserId::new(),
            quantity: 1,
            total_amount: Amount::parse("10.00").unwrap(),
            status,
            payment_method: "alipay".to_string(),
            trade_no: None,
            created_at: now,
            expired_at: now + Duration::minutes(15),
            paid_at: None,
            refund_reason: None,
            refund_requested_at: None,
            refunded_at: None,
            refund_rejection: None,
        }
    }

    fn events() -> Vec<OrderEvent> {
        let now = Utc::now();
        vec![
            OrderEvent::PaymentConfirmed {
                trade_no: "T1".to_string(),
                paid_at: now,
            },
            OrderEvent::ManuallyCompleted {
                trade_no: None,
                paid_at: now,
            },
            OrderEvent::Expired,
            OrderEvent::RefundRequested {
                reason: "code already used".to_string(),
                at: now,
            },
            OrderEvent::RefundApproved { at: now },
            OrderEvent::RefundRejected { reason: None },
        ]
    }

    #[test]
    fn expired_orders_cannot_be_paid() {
        let order = order_in(OrderStatus::Expired);
        let err = plan(
            &order,
            OrderEvent::PaymentConfirmed {
                trade_no: "T1".to_string(),
                paid_at: Utc::now(),
            },
            &TransitionPolicy::default(),
        )
        .unwrap_err();
        assert_eq!(err, DomainError::invalid_transition("expired", "completed"));
    }

    #[test]
    fn refund_reason_has_minimum_length() {
        let order = order_in(OrderStatus::Completed);
        let err = plan(
            &order,
            OrderEvent::RefundRequested {
                reason: "  bad ".to_string(),
                at: Utc::now(),
            },
            &TransitionPolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn resubmission_after_rejection_follows_policy() {
        let order = order_in(OrderStatus::RefundRejected);
        let event = OrderEvent::RefundRequested {
            reason: "still not working".to_string(),
            at: Utc::now(),
        };

        assert!(plan(&order, event.clone(), &TransitionPolicy::default()).is_err());

        let lenient = TransitionPolicy {
            allow_refund_resubmission: true,
            ..TransitionPolicy::default()
        };
        let t = plan(&order, event, &lenient).unwrap();
        assert_eq!(t.to, OrderStatus::RefundPending);
    }

    #[test]
    fn apply_records_payment_details() {
        let mut order = order_in(OrderStatus::Pending);
        let paid_at = Utc::now();
        let t = plan(
            &order,
            OrderEvent::PaymentConfirmed {
                trade_no: "2026T99".to_string(),
                paid_at,
            },
            &TransitionPolicy::default(),
        )
        .unwrap();
        order.apply(&t);
        assert_eq!(order.status, OrderStatus::Completed);
        assert_eq!(order.trade_no.as_deref(), Some("2026T99"));
        assert_eq!(order.paid_at, Some(paid_at));
    }

    #[test]
    fn apply_ignores_stale_transitions() {
        let mut order = order_in(OrderStatus::Pending);
        let t = plan(&order, OrderEvent::Expired, &TransitionPolicy::default()).unwrap();
        order.status = OrderStatus::Completed;
        order.apply(&t);
        assert_eq!(order.status, OrderStatus::Completed);
    }

    proptest! {
        #[test]
        fn planned_transitions_only_follow_legal_edges(
            status_idx in 0usize..OrderStatus::ALL.len(),
            event_idx in 0usize..6,
            resubmission in any::<bool>(),
        ) {
            let order = order_in(OrderStatus::ALL[status_idx]);
            let event = events()[event_idx].clone();
            let policy = TransitionPolicy { allow_refund_resubmission: resubmission, ..TransitionPolicy::default() };
            if let Ok(t) = plan(&order, event, &policy) {
                prop_assert!(LEGAL_EDGES.contains(&(t.from, t.to)));
                prop_assert_eq!(t.from, order.status);
            }
        }
    }
}
