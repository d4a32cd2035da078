//! Buyer-side operations: checkout, payment resume, order view, stock.

use serde::Serialize;

use cardvault_auth::{authorize, authorize_owner, AuthzError, Capability, Principal};
use cardvault_core::ProductId;
use cardvault_events::CacheInvalidation;
use cardvault_gateway::{PaymentForm, PaymentRequest};
use cardvault_inventory::CardView;
use cardvault_sales::{Order, OrderStatus, PlaceOrder};

use crate::store::{InventoryLedger, OrderRepository, Store, StoreTx};

use super::context::ShopContext;
use super::error::{ServiceError, ServiceResult};
use super::sweeper::ExpirySweeper;

/// A committed order plus the form that starts its payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacedOrder {
    pub order: Order,
    pub payment: PaymentForm,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderView {
    pub order: Order,
    /// Empty until the order is completed.
    pub cards: Vec<CardView>,
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub product_id: ProductId,
    pub quantity: u32,
    pub channel: String,
}

pub struct Checkout<'a, S: Store> {
    ctx: &'a ShopContext<S>,
}

impl<'a, S: Store> Checkout<'a, S> {
    pub(crate) fn new(ctx: &'a ShopContext<S>) -> Self {
        Self { ctx }
    }

    /// Reserve cards and create the pending order in one transaction, then
    /// build the payment form.
    ///
    /// If the form cannot be built the order stays committed with its cards
    /// reserved and [`ServiceError::PartialSuccess`] is returned; the buyer
    /// continues through [`Checkout::resume_payment`].
    #[tracing::instrument(
        skip(self, principal, req),
        fields(user = %principal.id(), product = %req.product_id, quantity = req.quantity)
    )]
    pub async fn place_order(&self, principal: &Principal, req: CheckoutRequest) -> ServiceResult<PlacedOrder> {
        authorize(principal, Capability::PlaceOrder)?;

        let channel = req.channel.trim().to_string();
        if !self.ctx.settings.payment_channels.iter().any(|c| *c == channel) {
            return Err(ServiceError::validation(format!("unsupported payment channel '{channel}'")));
        }

        let product = self
            .ctx
            .catalog
            .get_product(req.product_id)
            .await
            .ok_or(ServiceError::NotFound)?;

        ExpirySweeper::new(self.ctx).sweep_inline().await;

        let order = Order::place(PlaceOrder {
            user_id: principal.id(),
            product: &product,
            quantity: req.quantity,
            payment_method: channel,
            now: self.ctx.now(),
            ttl: self.ctx.settings.order_ttl,
        })?;

        let mut tx = self.ctx.store.begin().await?;
        tx.insert_order(&order).await?;
        let reserved = tx.reserve(order.product_id, order.quantity, order.id, order.created_at).await?;
        tx.commit().await?;

        tracing::info!(order_no = %order.order_no, cards = reserved.len(), "order placed");
        self.ctx.invalidation.invalidate_all(vec![
            CacheInvalidation::stock(order.product_id),
            CacheInvalidation::order(order.order_no.clone()),
        ]);

        let payment = self.payment_form(&order, &product.name).map_err(|reason| {
            ServiceError::PartialSuccess {
                order_no: order.order_no.clone(),
                reason,
            }
        })?;
        Ok(PlacedOrder { order, payment })
    }

    /// Rebuild the payment form for the owner's pending, unexpired order.
    pub async fn resume_payment(&self, principal: &Principal, order_no: &str) -> ServiceResult<PaymentForm> {
        let order = self.ctx.load_order_by_no(order_no).await?;
        if !order.is_owned_by(principal.id()) {
            return Err(AuthzError::NotOwner.into());
        }
        if order.status != OrderStatus::Pending {
            return Err(ServiceError::conflict(format!("order is {}", order.status)));
        }
        if order.expired_at < self.ctx.now() {
            return Err(ServiceError::conflict("reservation has expired"));
        }

        let name = match self.ctx.catalog.get_product(order.product_id).await {
            Some(p) => p.name,
            None => format!("order {}", order.order_no),
        };
        self.payment_form(&order, &name)
            .map_err(ServiceError::GatewayUnavailable)
    }

    /// Owner or admin. Cards are listed only once the order is completed.
    pub async fn order_view(&self, principal: &Principal, order_no: &str) -> ServiceResult<OrderView> {
        let mut tx = self.ctx.store.begin().await?;
        let order = tx.order_by_no(order_no).await?.ok_or(ServiceError::NotFound)?;
        authorize_owner(principal, order.user_id)?;

        let cards = if order.status.is_settled() {
            tx.cards_for_order(order.id)
                .await?
                .iter()
                .map(|c| c.view())
                .collect()
        } else {
            Vec::new()
        };
        Ok(OrderView { order, cards })
    }

    /// Available cards for a product, after a lazy sweep.
    pub async fn stock(&self, product_id: ProductId) -> ServiceResult<u64> {
        ExpirySweeper::new(self.ctx).sweep_inline().await;
        let mut tx = self.ctx.store.begin().await?;
        Ok(tx.available_count(product_id).await?)
    }

    fn payment_form(&self, order: &Order, product_name: &str) -> Result<PaymentForm, String> {
        let req = PaymentRequest {
            order_no: &order.order_no,
            channel: &order.payment_method,
            product_name,
            amount: order.total_amount,
        };
        self.ctx.gateway.build_payment_request(&req).map_err(|err| {
            tracing::error!(order_no = %order.order_no, error = %err, "payment form unavailable");
            "payment link could not be generated".to_string()
        })
    }
}
