//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use cardvault_infra::services::Shop;
use cardvault_infra::Store;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app<S: Store>(jwt_secret: &[u8], shop: Shop<S>) -> Router {
    let jwt = Arc::new(cardvault_auth::Hs256JwtValidator::new(jwt_secret.to_vec()));
    let auth_state = middleware::AuthState { jwt };

    // Protected routes: require a valid bearer token.
    let protected = routes::router::<S>()
        .layer(Extension(shop.clone()))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    // The gateway authenticates by signature.
    let public = Router::new()
        .route("/health", get(routes::system::health))
        .route(
            "/pay/notify",
            get(routes::notify::notify_query::<S>).post(routes::notify::notify_form::<S>),
        )
        .layer(Extension(shop));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(ServiceBuilder::new())
}
