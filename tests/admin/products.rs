use axum::http::StatusCode;
use serde_json::json;

#[path = "../common/mod.rs"]
mod common;
use common::*;

fn setup() -> (AppState, String) {
    let state = create_test_app_state();
    let api_key = {
        let conn = state.db.get().unwrap();
        create_test_api_key(&conn)
    };
    (state, api_key)
}

#[tokio::test]
async fn test_create_product_defaults_and_slug() {
    let (state, key) = setup();
    let app = admin_app(state);

    let response = admin_request(
        &app,
        "POST",
        "/admin/products",
        &key,
        Some(json!({ "name": "Pro Plugin", "price_cents": 1299 })),
    )
    .await;
    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["name"], "Pro Plugin");
    assert_eq!(body["slug"], "pro-plugin");
    assert_eq!(body["version"], "1.0.0");
    assert_eq!(body["currency"], "usd");
    assert_eq!(body["billing_period"], serde_json::Value::Null);
    assert_eq!(body["licensing_enabled"], false);
}

#[tokio::test]
async fn test_create_full_subscription_product() {
    let (state, key) = setup();
    let app = admin_app(state);

    let response = admin_request(
        &app,
        "POST",
        "/admin/products",
        &key,
        Some(json!({
            "name": "Pro Plugin",
            "price_cents": 1299,
            "billing_period": "month",
            "trial_days": 14,
            "bill_times": 12,
            "licensing_enabled": true,
            "activation_limit": 3,
            "license_length_days": 365
        })),
    )
    .await;
    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["billing_period"], "month");
    assert_eq!(body["trial_days"], 14);
    assert_eq!(body["bill_times"], 12);
    assert_eq!(body["activation_limit"], 3);
    assert_eq!(body["license_length_days"], 365);
}

#[tokio::test]
async fn test_duplicate_slug_conflicts() {
    let (state, key) = setup();
    {
        let conn = state.db.get().unwrap();
        create_test_product(&conn, "Pro Plugin");
    }
    let app = admin_app(state);

    let response = admin_request(
        &app,
        "POST",
        "/admin/products",
        &key,
        Some(json!({ "name": "Different Name", "slug": "pro-plugin", "price_cents": 999 })),
    )
    .await;
    let body = assert_json(response, StatusCode::CONFLICT).await;
    assert_eq!(body["details"], "A product with this slug already exists");
}

#[tokio::test]
async fn test_negative_price_is_rejected() {
    let (state, key) = setup();
    let product_id = {
        let conn = state.db.get().unwrap();
        create_test_product(&conn, "Pro Plugin").id
    };
    let app = admin_app(state);

    let response = admin_request(
        &app,
        "POST",
        "/admin/products",
        &key,
        Some(json!({ "name": "Bad", "price_cents": -1 })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = admin_request(
        &app,
        "PATCH",
        &format!("/admin/products/{}", product_id),
        &key,
        Some(json!({ "price_cents": -50 })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_update_product_null_clears_license_term() {
    let (state, key) = setup();
    let product = {
        let conn = state.db.get().unwrap();
        create_test_product(&conn, "Pro Plugin")
    };
    assert_eq!(product.license_length_days, Some(365));
    let app = admin_app(state);

    let response = admin_request(
        &app,
        "PATCH",
        &format!("/admin/products/{}", product.id),
        &key,
        Some(json!({ "version": "1.3.0", "license_length_days": null })),
    )
    .await;
    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["version"], "1.3.0");
    assert!(
        body["license_length_days"].is_null(),
        "null switches to lifetime licenses"
    );
}

#[tokio::test]
async fn test_delete_product_cascades() {
    let (state, key) = setup();
    let (product_id, license_id) = {
        let conn = state.db.get().unwrap();
        let customer = create_test_customer(&conn, "jane@example.com");
        let product = create_test_product(&conn, "Pro Plugin");
        let license =
            create_test_license(&conn, &customer.id, &product.id, Some(future_timestamp(30)));
        (product.id, license.id)
    };
    let app = admin_app(state.clone());

    let response = admin_request(
        &app,
        "DELETE",
        &format!("/admin/products/{}", product_id),
        &key,
        None,
    )
    .await;
    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["success"], true);

    let conn = state.db.get().unwrap();
    assert!(queries::get_product_by_id(&conn, &product_id).unwrap().is_none());
    assert!(
        queries::get_license_by_id(&conn, &license_id).unwrap().is_none(),
        "licenses go with the product"
    );
}

#[tokio::test]
async fn test_delete_unknown_product_is_404() {
    let (state, key) = setup();
    let app = admin_app(state);

    let response = admin_request(&app, "DELETE", "/admin/products/prd_missing", &key, None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
