//! Tests for the POST /check endpoint.
//!
//! Check is read-mostly: it reports the license state without changing
//! activations, but it does refresh lazy expiry and site check-in times.

use axum::http::StatusCode;
use serde_json::json;

#[path = "../common/mod.rs"]
mod common;
use common::*;

/// Set up a license with example.com activated. Returns (state, key,
/// product id).
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
async fn test_check_activated_site_is_valid() {
    let (state, key, product_id) = setup_activated();
    let app = public_app(state);

    let response = post_json(
        &app,
        "/check",
        json!({ "key": key, "product_id": product_id, "url": "https://example.com" }),
    )
    .await;

    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["license"], "valid");
    assert_eq!(body["site_count"], 1);
    assert_eq!(body["activation_limit"], 3);
    assert_eq!(body["activations_left"], 2);
}

#[tokio::test]
async fn test_check_without_url_reports_overall_state() {
    let (state, key, product_id) = setup_activated();
    let app = public_app(state);

    let response = post_json(&app, "/check", json!({ "key": key, "product_id": product_id })).await;

    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["license"], "valid", "an active license is valid overall");
}

#[tokio::test]
async fn test_check_fresh_license_without_url_is_inactive() {
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
    let app = public_app(state);

    let response = post_json(&app, "/check", json!({ "key": key, "product_id": product_id })).await;

    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["license"], "inactive");
}

#[tokio::test]
async fn test_check_unactivated_site_is_site_inactive() {
    let (state, key, product_id) = setup_activated();
    let app = public_app(state);

    let response = post_json(
        &app,
        "/check",
        json!({ "key": key, "product_id": product_id, "url": "other.example.com" }),
    )
    .await;

    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["success"], true, "the license itself is fine");
    assert_eq!(body["license"], "site_inactive");
}

#[tokio::test]
async fn test_check_unknown_key_is_invalid() {
    let (state, _key, product_id) = setup_activated();
    let app = public_app(state);

    let response = post_json(
        &app,
        "/check",
        json!({ "key": "nope", "product_id": product_id }),
    )
    .await;

    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["license"], "invalid");
    assert!(
        body.get("error").is_none(),
        "check reports invalid through the license field"
    );
}

#[tokio::test]
async fn test_check_wrong_product_is_invalid() {
    let (state, key, _product_id) = setup_activated();
    let other_product_id;
    {
        let conn = state.db.get().unwrap();
        other_product_id = create_test_product(&conn, "Other Plugin").id;
    }
    let app = public_app(state);

    let response = post_json(
        &app,
        "/check",
        json!({ "key": key, "product_id": other_product_id }),
    )
    .await;

    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["license"], "invalid");
}

#[tokio::test]
async fn test_check_lapsed_license_reports_expired() {
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
        "/check",
        json!({ "key": key, "product_id": product_id, "url": "example.com" }),
    )
    .await;

    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["license"], "expired");
    assert!(body.get("expires").is_some());

    // Lazy expiry persisted.
    let conn = state.db.get().unwrap();
    let license = queries::get_license_by_key(&conn, &key).unwrap().unwrap();
    assert_eq!(license.status, LicenseStatus::Expired);
}

#[tokio::test]
async fn test_check_disabled_license_reports_disabled() {
    let (state, key, product_id) = setup_activated();
    {
        let conn = state.db.get().unwrap();
        let license = queries::get_license_by_key(&conn, &key).unwrap().unwrap();
        licensing::disable_license(&conn, &state.cache, &license).unwrap();
    }
    let app = public_app(state);

    let response = post_json(&app, "/check", json!({ "key": key, "product_id": product_id })).await;

    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["license"], "disabled");
}

#[tokio::test]
async fn test_check_touches_the_matched_sites_last_seen() {
    let (state, key, product_id) = setup_activated();
    let license_id;
    {
        let conn = state.db.get().unwrap();
        let license = queries::get_license_by_key(&conn, &key).unwrap().unwrap();
        license_id = license.id.clone();
        conn.execute(
            "UPDATE activations SET last_seen_at = 1000 WHERE license_id = ?1",
            [&license_id],
        )
        .unwrap();
    }
    let app = public_app(state.clone());

    post_json(
        &app,
        "/check",
        json!({ "key": key, "product_id": product_id, "url": "example.com" }),
    )
    .await;

    let conn = state.db.get().unwrap();
    let activation = queries::get_activation(&conn, &license_id, "example.com")
        .unwrap()
        .unwrap();
    assert!(
        activation.last_seen_at > 1000,
        "check should record the install's check-in"
    );
}

#[tokio::test]
async fn test_check_unlimited_license_omits_activations_left() {
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
        // Per-license override: 0 = unlimited.
        queries::update_license(
            &conn,
            &license.id,
            &UpdateLicense {
                activation_limit: Some(Some(0)),
                ..Default::default()
            },
        )
        .unwrap();
        key = license.key;
        product_id = product.id;
    }
    let app = public_app(state);

    let response = post_json(&app, "/check", json!({ "key": key, "product_id": product_id })).await;

    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["activation_limit"], 0);
    assert!(
        body.get("activations_left").is_none(),
        "unlimited licenses do not report a remaining count"
    );
}
