use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use cardvault_infra::services::{CheckoutRequest, Shop};
use cardvault_infra::Store;

use crate::app::errors::Audience;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router<S: Store>() -> Router {
    Router::new()
        .route("/", post(place_order::<S>))
        .route("/:order_no", get(get_order::<S>))
        .route("/:order_no/pay", get(resume_payment::<S>))
        .route("/:order_no/refund", post(request_refund::<S>))
}

pub async fn place_order<S: Store>(
    Extension(shop): Extension<Shop<S>>,
    Extension(ctx): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateOrderRequest>,
) -> axum::response::Response {
    let product_id = match dto::parse_product_id(&body.product_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let req = CheckoutRequest {
        product_id,
        quantity: body.quantity,
        channel: body.channel,
    };
    match shop.checkout().place_order(ctx.principal(), req).await {
        Ok(placed) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "order": dto::order_to_json(&placed.order),
                "payment": dto::payment_to_json(&placed.payment),
            })),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e, Audience::Buyer),
    }
}

pub async fn get_order<S: Store>(
    Extension(shop): Extension<Shop<S>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(order_no): Path<String>,
) -> axum::response::Response {
    match shop.checkout().order_view(ctx.principal(), &order_no).await {
        Ok(view) => Json(dto::order_view_to_json(&view)).into_response(),
        Err(e) => errors::service_error_to_response(e, Audience::Buyer),
    }
}

pub async fn resume_payment<S: Store>(
    Extension(shop): Extension<Shop<S>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(order_no): Path<String>,
) -> axum::response::Response {
    match shop.checkout().resume_payment(ctx.principal(), &order_no).await {
        Ok(form) => Json(dto::payment_to_json(&form)).into_response(),
        Err(e) => errors::service_error_to_response(e, Audience::Buyer),
    }
}

pub async fn request_refund<S: Store>(
    Extension(shop): Extension<Shop<S>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(order_no): Path<String>,
    Json(body): Json<dto::RefundRequest>,
) -> axum::response::Response {
    let order = match shop.checkout().order_view(ctx.principal(), &order_no).await {
        Ok(view) => view.order,
        Err(e) => return errors::service_error_to_response(e, Audience::Buyer),
    };

    match shop.refunds().request(ctx.principal(), order.id, &body.reason).await {
        Ok(updated) => Json(dto::order_to_json(&updated)).into_response(),
        Err(e) => errors::service_error_to_response(e, Audience::Buyer),
    }
}
