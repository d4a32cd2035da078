//! Operator-visible audit trail.
//!
//! Actions that change money or inventory on an admin's say-so, and
//! attestations the server cannot verify, are emitted as structured events on
//! the [`AUDIT_TARGET`] tracing target. `RUST_LOG=audit=info` isolates them.

use serde::Serialize;

pub const AUDIT_TARGET: &str = "audit";

/// One audited action. Identifiers are rendered as strings so this crate
/// stays independent of the domain crates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AuditEvent {
    OrderCompletedManually {
        actor: String,
        order_no: String,
        trade_no: Option<String>,
    },
    OrderSyncedFromGateway {
        actor: String,
        order_no: String,
        trade_no: String,
    },
    RefundApproved {
        actor: String,
        order_no: String,
        amount: String,
    },
    RefundRejected {
        actor: String,
        order_no: String,
        reason: Option<String>,
    },
    ManualRefundHandoffIssued {
        actor: String,
        order_no: String,
        expires_at: String,
    },
    /// Not independently verified: trusted because the actor is an admin.
    ManualRefundAttested {
        actor: String,
        order_no: String,
        succeeded: bool,
        note: Option<String>,
    },
    /// Secrets already shown to a buyer became sellable again.
    DisclosedCardsReturned {
        order_no: String,
        cards: u64,
    },
    RefundCommitConflict {
        actor: String,
        order_no: String,
        detail: String,
    },
}

impl AuditEvent {
    pub fn action(&self) -> &'static str {
        match self {
            AuditEvent::OrderCompletedManually { .. } => "order_completed_manually",
            AuditEvent::OrderSyncedFromGateway { .. } => "order_synced_from_gateway",
            AuditEvent::RefundApproved { .. } => "refund_approved",
            AuditEvent::RefundRejected { .. } => "refund_rejected",
            AuditEvent::ManualRefundHandoffIssued { .. } => "manual_refund_handoff_issued",
            AuditEvent::ManualRefundAttested { .. } => "manual_refund_attested",
            AuditEvent::DisclosedCardsReturned { .. } => "disclosed_cards_returned",
            AuditEvent::RefundCommitConflict { .. } => "refund_commit_conflict",
        }
    }

    /// Emit on the audit target. Warnings are used for the events an operator
    /// should look at twice.
    pub fn record(&self) {
        let detail = serde_json::to_string(self).unwrap_or_default();
        match self {
            AuditEvent::ManualRefundAttested { .. }
            | AuditEvent::DisclosedCardsReturned { .. }
            | AuditEvent::RefundCommitConflict { .. } => {
                tracing::warn!(target: AUDIT_TARGET, action = self.action(), %detail, "audit");
            }
            _ => {
                tracing::info!(target: AUDIT_TARGET, action = self.action(), %detail, "audit");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_action_tag() {
        let event = AuditEvent::ManualRefundAttested {
            actor: "admin-1".to_string(),
            order_no: "O1".to_string(),
            succeeded: true,
            note: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["action"], event.action());
        assert_eq!(json["succeeded"], true);
        event.record();
    }
}
