//! Refund request, approval, rejection and the client-assisted variant.
//!
//! Approval first claims the order, so only one caller ever talks to the
//! gateway for it. The gateway call runs outside any transaction; the status
//! change, the card return and the claim release then commit together. A
//! failed gateway call drops the claim and leaves the order in
//! `refund_pending`.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use cardvault_auth::{authorize, AuthzError, Capability, Principal};
use cardvault_core::OrderId;
use cardvault_events::CacheInvalidation;
use cardvault_gateway::{HandoffError, RefundHandoff};
use cardvault_observability::AuditEvent;
use cardvault_sales::{plan, Order, OrderEvent, OrderStatus};

use crate::store::{InventoryLedger, OrderRepository, Store, StoreTx, TransitionOutcome};

use super::context::ShopContext;
use super::error::{ServiceError, ServiceResult};

/// Operator report on a refund they performed in their own browser.
#[derive(Debug, Clone, Deserialize)]
pub struct ManualAttestation {
    pub expires_at: DateTime<Utc>,
    pub token: String,
    pub succeeded: bool,
    #[serde(default)]
    pub note: Option<String>,
}

/// Result of trying to take the refund claim.
enum Claim {
    Taken,
    /// Someone else finished the refund first.
    AlreadyRefunded(Order),
}

pub struct RefundWorkflow<'a, S: Store> {
    ctx: &'a ShopContext<S>,
}

impl<'a, S: Store> RefundWorkflow<'a, S> {
    pub(crate) fn new(ctx: &'a ShopContext<S>) -> Self {
        Self { ctx }
    }

    /// Buyer asks for a refund of their completed order.
    #[tracing::instrument(skip(self, principal, reason), fields(user = %principal.id()))]
    pub async fn request(&self, principal: &Principal, order_id: OrderId, reason: &str) -> ServiceResult<Order> {
        authorize(principal, Capability::RequestRefund)?;

        let mut tx = self.ctx.store.begin().await?;
        let order = tx.order_by_id(order_id).await?.ok_or(ServiceError::NotFound)?;
        if !order.is_owned_by(principal.id()) {
            return Err(AuthzError::NotOwner.into());
        }

        let event = OrderEvent::RefundRequested {
            reason: reason.trim().to_string(),
            at: self.ctx.now(),
        };
        let transition = plan(&order, event, &self.ctx.settings.policy)?;
        match tx.apply_transition(&transition).await? {
            TransitionOutcome::Applied(updated) => {
                tx.commit().await?;
                tracing::info!(order_no = %updated.order_no, "refund requested");
                self.ctx
                    .invalidation
                    .invalidate(CacheInvalidation::order(updated.order_no.clone()));
                Ok(updated)
            }
            TransitionOutcome::LostRace => Err(ServiceError::conflict("order changed while requesting a refund")),
        }
    }

    /// Refund through the gateway, then return the cards to the pool.
    #[tracing::instrument(skip(self, principal), fields(actor = %principal.id()))]
    pub async fn approve(&self, principal: &Principal, order_id: OrderId) -> ServiceResult<Order> {
        authorize(principal, Capability::ApproveRefund)?;

        let order = self.ctx.load_order(order_id).await?;
        if order.status == OrderStatus::Refunded {
            return Ok(order);
        }
        let trade_no = self.refundable(&order)?;
        if let Claim::AlreadyRefunded(current) = self.claim(&order).await? {
            return Ok(current);
        }

        if let Err(err) = self.ctx.gateway.refund(&trade_no, order.total_amount).await {
            tracing::warn!(order_no = %order.order_no, error = %err, "gateway refund failed; order left pending");
            self.release_claim(&order).await;
            return Err(err.into());
        }

        let refunded = self.commit_refund(principal, &order).await?;
        AuditEvent::RefundApproved {
            actor: principal.id().to_string(),
            order_no: refunded.order_no.clone(),
            amount: refunded.total_amount.to_two_decimals(),
        }
        .record();
        Ok(refunded)
    }

    /// refund_pending → refund_rejected. Cards stay with the buyer.
    #[tracing::instrument(skip(self, principal, reason), fields(actor = %principal.id()))]
    pub async fn reject(
        &self,
        principal: &Principal,
        order_id: OrderId,
        reason: Option<String>,
    ) -> ServiceResult<Order> {
        authorize(principal, Capability::RejectRefund)?;

        let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        let mut tx = self.ctx.store.begin().await?;
        let order = tx.order_by_id(order_id).await?.ok_or(ServiceError::NotFound)?;
        if order.status == OrderStatus::RefundRejected {
            return Ok(order);
        }

        let transition = plan(
            &order,
            OrderEvent::RefundRejected { reason: reason.clone() },
            &self.ctx.settings.policy,
        )?;
        match tx.apply_transition(&transition).await? {
            TransitionOutcome::Applied(updated) => {
                let stale_before = self.ctx.now() - self.ctx.settings.refund_claim_ttl;
                if tx.refund_claim_held(order_id, stale_before).await? {
                    return Err(ServiceError::conflict("a refund for this order is already in progress"));
                }
                tx.commit().await?;
                AuditEvent::RefundRejected {
                    actor: principal.id().to_string(),
                    order_no: updated.order_no.clone(),
                    reason,
                }
                .record();
                self.ctx
                    .invalidation
                    .invalidate(CacheInvalidation::order(updated.order_no.clone()));
                Ok(updated)
            }
            TransitionOutcome::LostRace => Err(ServiceError::conflict("order changed while rejecting the refund")),
        }
    }

    /// Short-lived call parameters for an operator to run the refund from
    /// their own browser.
    pub async fn issue_manual_handoff(&self, principal: &Principal, order_id: OrderId) -> ServiceResult<RefundHandoff> {
        authorize(principal, Capability::AttestManualRefund)?;

        let order = self.ctx.load_order(order_id).await?;
        let trade_no = self.refundable(&order)?;
        let expires_at = self.ctx.now() + self.ctx.settings.manual_handoff_ttl;

        let handoff = self
            .ctx
            .gateway
            .manual_refund_handoff(&order.order_no, &trade_no, order.total_amount, expires_at);
        AuditEvent::ManualRefundHandoffIssued {
            actor: principal.id().to_string(),
            order_no: order.order_no.clone(),
            expires_at: expires_at.to_rfc3339(),
        }
        .record();
        Ok(handoff)
    }

    /// Apply an operator's report of a client-assisted refund.
    ///
    /// The token proves the report refers to a handoff this server issued
    /// and that it has not expired. Whether the gateway really refunded is
    /// taken on the admin's word; the attestation is audited either way.
    pub async fn record_manual_attestation(
        &self,
        principal: &Principal,
        order_id: OrderId,
        attestation: ManualAttestation,
    ) -> ServiceResult<Order> {
        authorize(principal, Capability::AttestManualRefund)?;

        let order = self.ctx.load_order(order_id).await?;
        let trade_no = self.refundable(&order)?;
        RefundHandoff::verify_token(
            self.ctx.gateway.merchant(),
            &order.order_no,
            &trade_no,
            order.total_amount,
            attestation.expires_at,
            &attestation.token,
            self.ctx.now(),
        )
        .map_err(|err| match err {
            HandoffError::Expired => ServiceError::validation("refund handoff has expired"),
            HandoffError::BadToken => ServiceError::validation("refund handoff token does not match this order"),
        })?;

        AuditEvent::ManualRefundAttested {
            actor: principal.id().to_string(),
            order_no: order.order_no.clone(),
            succeeded: attestation.succeeded,
            note: attestation.note,
        }
        .record();

        if !attestation.succeeded {
            return Ok(order);
        }
        match self.claim(&order).await? {
            Claim::Taken => self.commit_refund(principal, &order).await,
            Claim::AlreadyRefunded(current) => Ok(current),
        }
    }

    /// Take the order's refund claim in its own transaction.
    async fn claim(&self, order: &Order) -> ServiceResult<Claim> {
        let now = self.ctx.now();
        let stale_before = now - self.ctx.settings.refund_claim_ttl;

        let mut tx = self.ctx.store.begin().await?;
        if tx.claim_refund(order.id, now, stale_before).await? {
            tx.commit().await?;
            return Ok(Claim::Taken);
        }

        let current = tx.order_by_id(order.id).await?.ok_or(ServiceError::NotFound)?;
        match current.status {
            OrderStatus::Refunded => Ok(Claim::AlreadyRefunded(current)),
            OrderStatus::RefundPending => {
                tracing::info!(order_no = %current.order_no, "refund already being settled by another caller");
                Err(ServiceError::conflict("a refund for this order is already in progress"))
            }
            other => Err(ServiceError::InvalidStateTransition {
                from: other.to_string(),
                to: OrderStatus::Refunded.to_string(),
            }),
        }
    }

    /// Drop a claim after a failed attempt so the refund can be retried.
    async fn release_claim(&self, order: &Order) {
        let released = async {
            let mut tx = self.ctx.store.begin().await?;
            tx.release_refund_claim(order.id).await?;
            tx.commit().await
        }
        .await;
        if let Err(err) = released {
            tracing::error!(order_no = %order.order_no, error = %err, "failed to release refund claim");
        }
    }

    /// Checks shared by every approval path; returns the trade number.
    fn refundable(&self, order: &Order) -> ServiceResult<String> {
        plan(
            order,
            OrderEvent::RefundApproved { at: self.ctx.now() },
            &self.ctx.settings.policy,
        )?;
        order
            .trade_no
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ServiceError::validation("order has no gateway trade number"))
    }

    /// refund_pending → refunded plus card return, in one transaction.
    async fn commit_refund(&self, principal: &Principal, order: &Order) -> ServiceResult<Order> {
        let transition = plan(
            order,
            OrderEvent::RefundApproved { at: self.ctx.now() },
            &self.ctx.settings.policy,
        )?;

        let mut tx = self.ctx.store.begin().await?;
        match tx.apply_transition(&transition).await? {
            TransitionOutcome::Applied(updated) => {
                let returned = tx.return_to_pool(order.id).await?;
                tx.release_refund_claim(order.id).await?;
                tx.commit().await?;

                if returned > 0 {
                    AuditEvent::DisclosedCardsReturned {
                        order_no: updated.order_no.clone(),
                        cards: returned,
                    }
                    .record();
                }
                self.ctx.invalidation.invalidate_all(vec![
                    CacheInvalidation::stock(updated.product_id),
                    CacheInvalidation::order(updated.order_no.clone()),
                ]);
                Ok(updated)
            }
            TransitionOutcome::LostRace => {
                drop(tx);
                self.release_claim(order).await;
                let current = self.ctx.load_order(order.id).await?;
                if current.status == OrderStatus::Refunded {
                    return Ok(current);
                }
                let detail = format!("refund taken at the gateway but order is now {}", current.status);
                AuditEvent::RefundCommitConflict {
                    actor: principal.id().to_string(),
                    order_no: current.order_no.clone(),
                    detail: detail.clone(),
                }
                .record();
                Err(ServiceError::conflict(detail))
            }
        }
    }
}
