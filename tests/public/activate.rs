//! Tests for the POST /activate endpoint.
//!
//! Activation binds a site URL to a license key. Failures stay inside the
//! JSON envelope with `success: false`; the HTTP status is 200 either way.

use axum::http::StatusCode;
use serde_json::json;

#[path = "../common/mod.rs"]
mod common;
use common::*;

/// Set up a customer, a licensed product, and one license expiring in a
/// year. Returns (state, license key, product id).
fn setup() -> (AppState, String, String) {
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
        key = license.key;
        product_id = product.id;
    }
    (state, key, product_id)
}

#[tokio::test]
async fn test_activate_returns_valid_with_accounting() {
    let (state, key, product_id) = setup();
    let app = public_app(state);

    let response = post_json(
        &app,
        "/activate",
        json!({ "key": key, "product_id": product_id, "url": "https://www.example.com/" }),
    )
    .await;

    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["license"], "valid");
    assert!(body.get("error").is_none());
    assert!(body.get("expires").is_some(), "term licenses report expires");
    assert_eq!(body["site_count"], 1);
    assert_eq!(body["activation_limit"], 3);
    assert_eq!(body["activations_left"], 2);
}

#[tokio::test]
async fn test_activate_first_site_flips_license_to_active() {
    let (state, key, product_id) = setup();
    let app = public_app(state.clone());

    post_json(
        &app,
        "/activate",
        json!({ "key": key, "product_id": product_id, "url": "example.com" }),
    )
    .await;

    let conn = state.db.get().unwrap();
    let license = queries::get_license_by_key(&conn, &key).unwrap().unwrap();
    assert_eq!(license.status, LicenseStatus::Active);
}

#[tokio::test]
async fn test_activate_same_site_twice_is_idempotent() {
    let (state, key, product_id) = setup();
    let app = public_app(state);
    let body = json!({ "key": key, "product_id": product_id, "url": "https://example.com" });

    post_json(&app, "/activate", body.clone()).await;
    let response = post_json(&app, "/activate", body).await;

    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["site_count"], 1, "re-activation must not consume a slot");
    assert_eq!(body["activations_left"], 2);
}

#[tokio::test]
async fn test_activate_local_site_does_not_consume_a_slot() {
    let (state, key, product_id) = setup();
    let app = public_app(state.clone());

    let response = post_json(
        &app,
        "/activate",
        json!({ "key": key, "product_id": product_id, "url": "http://localhost:8080" }),
    )
    .await;

    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["license"], "valid");
    assert_eq!(body["site_count"], 0, "local sites are not counted");
    assert_eq!(body["activations_left"], 3);

    // Local-only activity leaves the license inactive.
    let conn = state.db.get().unwrap();
    let license = queries::get_license_by_key(&conn, &key).unwrap().unwrap();
    assert_eq!(license.status, LicenseStatus::Inactive);
}

#[tokio::test]
async fn test_activate_over_limit_fails_with_no_activations_left() {
    let (state, key, product_id) = setup();
    let app = public_app(state);

    for site in ["one.example.com", "two.example.com", "three.example.com"] {
        let response = post_json(
            &app,
            "/activate",
            json!({ "key": key, "product_id": product_id, "url": site }),
        )
        .await;
        let body = assert_json(response, StatusCode::OK).await;
        assert_eq!(body["success"], true, "{site} should fit within the limit");
    }

    let response = post_json(
        &app,
        "/activate",
        json!({ "key": key, "product_id": product_id, "url": "four.example.com" }),
    )
    .await;
    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "no_activations_left");
    assert!(body.get("license").is_none());
}

#[tokio::test]
async fn test_activate_unknown_key_fails_with_missing() {
    let (state, _key, product_id) = setup();
    let app = public_app(state);

    let response = post_json(
        &app,
        "/activate",
        json!({ "key": "does-not-exist", "product_id": product_id, "url": "example.com" }),
    )
    .await;

    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "missing");
}

#[tokio::test]
async fn test_activate_wrong_product_fails_with_invalid_item_id() {
    let (state, key, _product_id) = setup();
    let other_product_id;
    {
        let conn = state.db.get().unwrap();
        other_product_id = create_test_product(&conn, "Other Plugin").id;
    }
    let app = public_app(state);

    let response = post_json(
        &app,
        "/activate",
        json!({ "key": key, "product_id": other_product_id, "url": "example.com" }),
    )
    .await;

    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "invalid_item_id");
}

#[tokio::test]
async fn test_activate_without_url_fails_with_missing_url() {
    let (state, key, product_id) = setup();
    let app = public_app(state);

    let response = post_json(
        &app,
        "/activate",
        json!({ "key": key, "product_id": product_id }),
    )
    .await;
    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "missing_url");

    // An unparseable URL is as good as no URL.
    let response = post_json(
        &app,
        "/activate",
        json!({ "key": key, "product_id": product_id, "url": "not a url" }),
    )
    .await;
    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["error"], "missing_url");
}

#[tokio::test]
async fn test_activate_lapsed_license_reports_expired_and_persists_the_flip() {
    let state = create_test_app_state();
    let key;
    let product_id;
    let expired_at = past_timestamp(ONE_DAY);
    {
        let conn = state.db.get().unwrap();
        let customer = create_test_customer(&conn, "buyer@example.com");
        let product = create_test_product(&conn, "Pro Plugin");
        let license = create_test_license(&conn, &customer.id, &product.id, Some(expired_at));
        key = license.key;
        product_id = product.id;
    }
    let app = public_app(state.clone());

    let response = post_json(
        &app,
        "/activate",
        json!({ "key": key, "product_id": product_id, "url": "example.com" }),
    )
    .await;

    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "expired");
    assert_eq!(body["expires"], expired_at, "clients show the lapsed date");

    // The lazy status flip commits even though the request failed.
    let conn = state.db.get().unwrap();
    let license = queries::get_license_by_key(&conn, &key).unwrap().unwrap();
    assert_eq!(license.status, LicenseStatus::Expired);
}

#[tokio::test]
async fn test_activate_disabled_license_fails_with_disabled() {
    let (state, key, product_id) = setup();
    {
        let conn = state.db.get().unwrap();
        let license = queries::get_license_by_key(&conn, &key).unwrap().unwrap();
        licensing::disable_license(&conn, &state.cache, &license).unwrap();
    }
    let app = public_app(state);

    let response = post_json(
        &app,
        "/activate",
        json!({ "key": key, "product_id": product_id, "url": "example.com" }),
    )
    .await;

    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "disabled");
}

#[tokio::test]
async fn test_activate_key_is_trimmed() {
    let (state, key, product_id) = setup();
    let app = public_app(state);

    let response = post_json(
        &app,
        "/activate",
        json!({ "key": format!("  {key}  "), "product_id": product_id, "url": "example.com" }),
    )
    .await;

    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["success"], true, "surrounding whitespace is ignored");
}
