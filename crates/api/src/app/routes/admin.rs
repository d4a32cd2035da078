//! Operator console. Every handler's service call checks the capability it
//! needs; errors name the failed precondition.

use axum::{
    extract::{Extension, Path},
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use cardvault_infra::services::{ManualAttestation, ServiceError, Shop};
use cardvault_infra::Store;

use crate::app::errors::Audience;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router<S: Store>() -> Router {
    Router::new()
        .route("/orders/:id/complete", post(complete_order::<S>))
        .route("/orders/:id/sync", post(sync_order::<S>))
        .route("/refunds/:id/approve", post(approve_refund::<S>))
        .route("/refunds/:id/reject", post(reject_refund::<S>))
        .route("/refunds/:id/handoff", post(issue_handoff::<S>))
        .route("/refunds/:id/attest", post(attest_refund::<S>))
        .route("/sweep", post(sweep::<S>))
}

fn respond<T>(
    result: Result<T, ServiceError>,
    to_json: impl FnOnce(&T) -> serde_json::Value,
) -> axum::response::Response {
    match result {
        Ok(value) => Json(to_json(&value)).into_response(),
        Err(e) => errors::service_error_to_response(e, Audience::Operator),
    }
}

pub async fn complete_order<S: Store>(
    Extension(shop): Extension<Shop<S>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::CompleteOrderRequest>>,
) -> axum::response::Response {
    let order_id = match dto::parse_order_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let body = body.map(|Json(b)| b).unwrap_or_default();

    let result = shop
        .admin()
        .complete_manually(ctx.principal(), order_id, body.trade_no)
        .await;
    respond(result, dto::order_to_json)
}

pub async fn sync_order<S: Store>(
    Extension(shop): Extension<Shop<S>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id = match dto::parse_order_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let result = shop.admin().sync_with_gateway(ctx.principal(), order_id).await;
    respond(result, dto::sync_to_json)
}

pub async fn approve_refund<S: Store>(
    Extension(shop): Extension<Shop<S>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id = match dto::parse_order_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let result = shop.refunds().approve(ctx.principal(), order_id).await;
    respond(result, dto::order_to_json)
}

pub async fn reject_refund<S: Store>(
    Extension(shop): Extension<Shop<S>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::RejectRefundRequest>>,
) -> axum::response::Response {
    let order_id = match dto::parse_order_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let body = body.map(|Json(b)| b).unwrap_or_default();

    let result = shop.refunds().reject(ctx.principal(), order_id, body.reason).await;
    respond(result, dto::order_to_json)
}

pub async fn issue_handoff<S: Store>(
    Extension(shop): Extension<Shop<S>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id = match dto::parse_order_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let result = shop.refunds().issue_manual_handoff(ctx.principal(), order_id).await;
    respond(result, dto::handoff_to_json)
}

pub async fn attest_refund<S: Store>(
    Extension(shop): Extension<Shop<S>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(attestation): Json<ManualAttestation>,
) -> axum::response::Response {
    let order_id = match dto::parse_order_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let result = shop
        .refunds()
        .record_manual_attestation(ctx.principal(), order_id, attestation)
        .await;
    respond(result, dto::order_to_json)
}

pub async fn sweep<S: Store>(
    Extension(shop): Extension<Shop<S>>,
    Extension(ctx): Extension<PrincipalContext>,
) -> axum::response::Response {
    let result = shop.sweeper().sweep_as(ctx.principal()).await;
    respond(result, |report| dto::sweep_to_json(*report))
}
