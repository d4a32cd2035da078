//! Gateway payment notifications. Public: authenticity comes from the
//! signature, not from a bearer token.

use axum::{
    extract::{
        rejection::{FormRejection, QueryRejection},
        Extension, Form, Query,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};

use cardvault_gateway::Params;
use cardvault_infra::services::Shop;
use cardvault_infra::Store;

pub async fn notify_query<S: Store>(
    Extension(shop): Extension<Shop<S>>,
    params: Result<Query<Params>, QueryRejection>,
) -> Response {
    match params {
        Ok(Query(params)) => handle(&shop, &params).await,
        Err(rejection) => unreadable(&rejection),
    }
}

pub async fn notify_form<S: Store>(
    Extension(shop): Extension<Shop<S>>,
    params: Result<Form<Params>, FormRejection>,
) -> Response {
    match params {
        Ok(Form(params)) => handle(&shop, &params).await,
        Err(rejection) => unreadable(&rejection),
    }
}

async fn handle<S: Store>(shop: &Shop<S>, params: &Params) -> Response {
    let reply = shop.webhooks().handle(params).await;
    let status = StatusCode::from_u16(reply.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, reply.body()).into_response()
}

/// The gateway only understands `success` and `fail`.
fn unreadable(rejection: &dyn std::fmt::Display) -> Response {
    tracing::warn!(error = %rejection, "unreadable payment notification");
    (StatusCode::BAD_REQUEST, "fail").into_response()
}
