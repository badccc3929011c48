//! Tests for the POST /deactivate endpoint.

use axum::http::StatusCode;
use serde_json::json;

#[path = "../common/mod.rs"]
mod common;
use common::*;

/// Set up a license with one activated site. Returns (state, key,
/// product id); the activated site is example.com.
fn setup_activated() -> (AppState, String, String) {
    let state = create_test_app_state();
    let key;
    let product_id;
    {
        let conn = state.db.get().unwrap();
        let customer = create_test_customer(&conn, "buyer@example.com");
        let product = create_test_product(&conn, "Pro Plugin");
        let license = create_test_license(
            &conn,
            &customer.id,
            &product.id,
            Some(future_timestamp(ONE_YEAR)),
        );
        licensing::activate_site(&conn, &state.cache, &license, &product, "example.com").unwrap();
        key = license.key;
        product_id = product.id;
    }
    (state, key, product_id)
}

#[tokio::test]
async fn test_deactivate_releases_the_site() {
    let (state, key, product_id) = setup_activated();
    let app = public_app(state.clone());

    let response = post_json(
        &app,
        "/deactivate",
        json!({ "key": key, "product_id": product_id, "url": "https://www.example.com/" }),
    )
    .await;

    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["license"], "deactivated");
    assert_eq!(body["site_count"], 0);
    assert_eq!(body["activations_left"], 3);

    // Releasing the last counted site returns the license to inactive.
    let conn = state.db.get().unwrap();
    let license = queries::get_license_by_key(&conn, &key).unwrap().unwrap();
    assert_eq!(license.status, LicenseStatus::Inactive);
}

#[tokio::test]
async fn test_deactivate_site_that_was_never_activated() {
    let (state, key, product_id) = setup_activated();
    let app = public_app(state);

    let response = post_json(
        &app,
        "/deactivate",
        json!({ "key": key, "product_id": product_id, "url": "other.example.com" }),
    )
    .await;

    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "site_inactive");
}

#[tokio::test]
async fn test_deactivate_unknown_key_fails_with_missing() {
    let (state, _key, product_id) = setup_activated();
    let app = public_app(state);

    let response = post_json(
        &app,
        "/deactivate",
        json!({ "key": "nope", "product_id": product_id, "url": "example.com" }),
    )
    .await;

    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "missing");
}

#[tokio::test]
async fn test_deactivate_expired_license_still_releases_sites() {
    let (state, key, product_id) = setup_activated();
    {
        let conn = state.db.get().unwrap();
        let license = queries::get_license_by_key(&conn, &key).unwrap().unwrap();
        queries::set_license_expiration(
            &conn,
            &license.id,
            Some(past_timestamp(ONE_DAY)),
            license.status,
        )
        .unwrap();
        state.cache.invalidate_license(&license.id);
    }
    let app = public_app(state.clone());

    let response = post_json(
        &app,
        "/deactivate",
        json!({ "key": key, "product_id": product_id, "url": "example.com" }),
    )
    .await;

    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["success"], true, "expired licenses may release sites");
    assert_eq!(body["license"], "deactivated");

    let conn = state.db.get().unwrap();
    assert_eq!(
        queries::count_site_activations(
            &conn,
            &queries::get_license_by_key(&conn, &key).unwrap().unwrap().id
        )
        .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_deactivate_disabled_license_fails_with_disabled() {
    let (state, key, product_id) = setup_activated();
    {
        let conn = state.db.get().unwrap();
        let license = queries::get_license_by_key(&conn, &key).unwrap().unwrap();
        licensing::disable_license(&conn, &state.cache, &license).unwrap();
    }
    let app = public_app(state);

    let response = post_json(
        &app,
        "/deactivate",
        json!({ "key": key, "product_id": product_id, "url": "example.com" }),
    )
    .await;

    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "disabled");
}
