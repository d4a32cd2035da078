use axum::{routing::get, Router};

use cardvault_infra::Store;

pub mod admin;
pub mod notify;
pub mod orders;
pub mod products;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router<S: Store>() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/orders", orders::router::<S>())
        .nest("/products", products::router::<S>())
        .nest("/admin", admin::router::<S>())
}
