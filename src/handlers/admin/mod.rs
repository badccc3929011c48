mod api_keys;
mod customers;
mod licenses;
mod products;
mod subscriptions;

pub use api_keys::*;
pub use customers::*;
pub use licenses::*;
pub use products::*;
pub use subscriptions::*;

use axum::{
    Router, middleware,
    routing::{delete, get, patch, post, put},
};

use crate::db::AppState;
use crate::middleware::admin_auth;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        // Customers
        .route("/admin/customers", post(create_customer))
        .route("/admin/customers", get(list_customers))
        .route("/admin/customers/{id}", get(get_customer))
        .route("/admin/customers/{id}", patch(update_customer))
        // Products
        .route("/admin/products", post(create_product))
        .route("/admin/products", get(list_products))
        .route("/admin/products/{id}", get(get_product))
        .route("/admin/products/{id}", patch(update_product))
        .route("/admin/products/{id}", delete(delete_product))
        // Subscriptions
        .route("/admin/subscriptions", post(create_subscription))
        .route("/admin/subscriptions", get(list_subscriptions))
        .route("/admin/subscriptions/{id}", get(get_subscription))
        .route("/admin/subscriptions/{id}", patch(update_subscription))
        .route("/admin/subscriptions/{id}", delete(delete_subscription))
        .route("/admin/subscriptions/{id}/payments", post(record_payment))
        .route("/admin/subscriptions/{id}/cancel", post(cancel_subscription))
        // Licenses
        .route("/admin/licenses", post(create_license))
        .route("/admin/licenses", get(list_licenses))
        .route("/admin/licenses/{id}", get(get_license))
        .route("/admin/licenses/{id}", patch(update_license))
        .route("/admin/licenses/{id}/renew", post(renew_license))
        .route("/admin/licenses/{id}/regenerate", post(regenerate_license_key))
        .route("/admin/licenses/{id}/meta/{key}", get(get_license_meta))
        .route("/admin/licenses/{id}/meta/{key}", put(set_license_meta))
        .route("/admin/licenses/{id}/meta/{key}", delete(delete_license_meta))
        .route(
            "/admin/licenses/{id}/activations/{activation_id}",
            delete(delete_activation),
        )
        // API keys
        .route("/admin/api-keys", post(create_api_key))
        .route("/admin/api-keys", get(list_api_keys))
        .route("/admin/api-keys/{id}", delete(revoke_api_key))
        .layer(middleware::from_fn_with_state(state, admin_auth))
}
