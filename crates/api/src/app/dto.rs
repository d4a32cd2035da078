use serde::Deserialize;

use cardvault_core::{OrderId, ProductId};
use cardvault_gateway::{PaymentForm, RefundHandoff};
use cardvault_infra::services::{OrderView, SweepReport, SyncOutcome};
use cardvault_sales::Order;

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub product_id: String,
    pub quantity: u32,
    pub channel: String,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectRefundRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteOrderRequest {
    #[serde(default)]
    pub trade_no: Option<String>,
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn order_to_json(order: &Order) -> serde_json::Value {
    serde_json::json!({
        "id": order.id.to_string(),
        "order_no": order.order_no,
        "product_id": order.product_id.to_string(),
        "quantity": order.quantity,
        "total_amount": order.total_amount.to_two_decimals(),
        "status": order.status.as_str(),
        "payment_method": order.payment_method,
        "trade_no": order.trade_no,
        "created_at": order.created_at.to_rfc3339(),
        "expired_at": order.expired_at.to_rfc3339(),
        "paid_at": order.paid_at.map(|t| t.to_rfc3339()),
        "refund_reason": order.refund_reason,
        "refund_requested_at": order.refund_requested_at.map(|t| t.to_rfc3339()),
        "refunded_at": order.refunded_at.map(|t| t.to_rfc3339()),
        "refund_rejection": order.refund_rejection,
    })
}

pub fn order_view_to_json(view: &OrderView) -> serde_json::Value {
    let mut json = order_to_json(&view.order);
    json["cards"] = serde_json::json!(view
        .cards
        .iter()
        .map(|c| serde_json::json!({
            "id": c.id.to_string(),
            "status": c.status.as_str(),
            "secret": c.secret.as_ref().map(|s| s.expose_secret().to_string()),
        }))
        .collect::<Vec<_>>());
    json
}

pub fn payment_to_json(form: &PaymentForm) -> serde_json::Value {
    serde_json::json!({
        "redirect_url": form.redirect_url,
        "form_fields": form.form_fields,
    })
}

pub fn handoff_to_json(handoff: &RefundHandoff) -> serde_json::Value {
    serde_json::json!({
        "endpoint": handoff.endpoint,
        "params": handoff.params,
        "expires_at": handoff.expires_at.to_rfc3339(),
        "token": handoff.token,
    })
}

pub fn sync_to_json(outcome: &SyncOutcome) -> serde_json::Value {
    serde_json::json!({
        "order": order_to_json(&outcome.order),
        "gateway": {
            "trade_no": outcome.gateway.trade_no,
            "money": outcome.gateway.money,
            "paid": outcome.gateway.paid,
        },
        "completed": outcome.completed,
    })
}

pub fn sweep_to_json(report: SweepReport) -> serde_json::Value {
    serde_json::json!({
        "expired_orders": report.expired_orders,
        "released_cards": report.released_cards,
    })
}

// -------------------------
// Path parsing
// -------------------------

pub fn parse_order_id(s: &str) -> Result<OrderId, axum::response::Response> {
    s.parse().map_err(|_| {
        errors::json_error(axum::http::StatusCode::BAD_REQUEST, "invalid_id", "invalid order id")
    })
}

pub fn parse_product_id(s: &str) -> Result<ProductId, axum::response::Response> {
    s.parse().map_err(|_| {
        errors::json_error(axum::http::StatusCode::BAD_REQUEST, "invalid_id", "invalid product id")
    })
}
