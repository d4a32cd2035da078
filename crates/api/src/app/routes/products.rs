use axum::{
    extract::{Extension, Path},
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use cardvault_infra::services::Shop;
use cardvault_infra::Store;

use crate::app::{dto, errors};
use crate::app::errors::Audience;

pub fn router<S: Store>() -> Router {
    Router::new().route("/:id/stock", get(stock::<S>))
}

pub async fn stock<S: Store>(
    Extension(shop): Extension<Shop<S>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let product_id = match dto::parse_product_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match shop.checkout().stock(product_id).await {
        Ok(available) => Json(serde_json::json!({
            "product_id": product_id.to_string(),
            "available": available,
        }))
        .into_response(),
        Err(e) => errors::service_error_to_response(e, Audience::Buyer),
    }
}
