use axum::http::StatusCode;
use serde_json::json;

#[path = "../common/mod.rs"]
mod common;
use common::*;

/// Set up a customer and licensed product.
fn setup() -> (AppState, String, Customer, Product) {
    let state = create_test_app_state();
    let (api_key, customer, product) = {
        let conn = state.db.get().unwrap();
        let api_key = create_test_api_key(&conn);
        let customer = create_test_customer(&conn, "jane@example.com");
        let product = create_test_product(&conn, "Pro Plugin");
        (api_key, customer, product)
    };
    (state, api_key, customer, product)
}

#[tokio::test]
async fn test_create_license_defaults_expiration_from_product_term() {
    let (state, key, customer, product) = setup();
    let app = admin_app(state);

    let response = admin_request(
        &app,
        "POST",
        "/admin/licenses",
        &key,
        Some(json!({ "customer_id": customer.id, "product_id": product.id })),
    )
    .await;
    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["status"], "inactive");
    assert_eq!(body["key"].as_str().unwrap().len(), 32);
    let expiration = body["expiration"].as_i64().unwrap();
    // Product term is 365 days; allow slack for test runtime.
    assert!((expiration - future_timestamp(ONE_YEAR)).abs() < 60);
}

#[tokio::test]
async fn test_create_license_null_expiration_means_lifetime() {
    let (state, key, customer, product) = setup();
    let app = admin_app(state);

    let response = admin_request(
        &app,
        "POST",
        "/admin/licenses",
        &key,
        Some(json!({
            "customer_id": customer.id,
            "product_id": product.id,
            "expiration": null
        })),
    )
    .await;
    let body = assert_json(response, StatusCode::OK).await;
    assert!(body["expiration"].is_null());
}

#[tokio::test]
async fn test_create_license_requires_licensing_enabled() {
    let (state, key, customer, _product) = setup();
    let plain = {
        let conn = state.db.get().unwrap();
        create_test_unlicensed_product(&conn, "Ebook")
    };
    let app = admin_app(state);

    let response = admin_request(
        &app,
        "POST",
        "/admin/licenses",
        &key,
        Some(json!({ "customer_id": customer.id, "product_id": plain.id })),
    )
    .await;
    let body = assert_json(response, StatusCode::BAD_REQUEST).await;
    assert_eq!(body["details"], "Product does not have licensing enabled");
}

#[tokio::test]
async fn test_create_license_rejects_mismatched_subscription() {
    let (state, key, customer, product) = setup();
    let other_sub = {
        let conn = state.db.get().unwrap();
        let other = create_test_customer(&conn, "other@example.com");
        create_test_subscription(&conn, &other, &product, "manual", None)
    };
    let app = admin_app(state);

    let response = admin_request(
        &app,
        "POST",
        "/admin/licenses",
        &key,
        Some(json!({
            "customer_id": customer.id,
            "product_id": product.id,
            "subscription_id": other_sub.id
        })),
    )
    .await;
    let body = assert_json(response, StatusCode::BAD_REQUEST).await;
    assert_eq!(
        body["details"],
        "Subscription belongs to a different customer or product"
    );
}

#[tokio::test]
async fn test_license_detail_shape() {
    let (state, key, customer, product) = setup();
    let license = {
        let conn = state.db.get().unwrap();
        let license =
            create_test_license(&conn, &customer.id, &product.id, Some(future_timestamp(30)));
        licensing::activate_site(&conn, &state.cache, &license, &product, "example.com").unwrap();
        licensing::activate_site(&conn, &state.cache, &license, &product, "localhost").unwrap();
        queries::upsert_license_meta(&conn, &license.id, "order_ref", "ord_42").unwrap();
        license
    };
    let app = admin_app(state);

    let response = admin_request(
        &app,
        "GET",
        &format!("/admin/licenses/{}", license.id),
        &key,
        None,
    )
    .await;
    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["id"], license.id.as_str());
    assert_eq!(body["product_name"], "Pro Plugin");
    assert_eq!(body["activations"].as_array().unwrap().len(), 2);
    assert_eq!(body["site_count"], 1, "local sites are not counted");
    assert_eq!(body["meta"][0]["meta_key"], "order_ref");
    assert_eq!(body["meta"][0]["meta_value"], "ord_42");
}

#[tokio::test]
async fn test_list_licenses_filters() {
    let (state, key, customer, product) = setup();
    let target_key = {
        let conn = state.db.get().unwrap();
        let first =
            create_test_license(&conn, &customer.id, &product.id, Some(future_timestamp(30)));
        let second =
            create_test_license(&conn, &customer.id, &product.id, Some(future_timestamp(30)));
        queries::upsert_license_meta(&conn, &second.id, "origin", "migration").unwrap();
        first.key
    };
    let app = admin_app(state);

    let response = admin_request(
        &app,
        "GET",
        &format!("/admin/licenses?key={}", target_key),
        &key,
        None,
    )
    .await;
    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["key"], target_key.as_str());
    assert_eq!(body["items"][0]["product_name"], "Pro Plugin");

    let response = admin_request(
        &app,
        "GET",
        "/admin/licenses?meta_key=origin&meta_value=migration",
        &key,
        None,
    )
    .await;
    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["total"], 1);

    let response = admin_request(&app, "GET", "/admin/licenses?status=inactive", &key, None).await;
    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["total"], 2);
}

#[tokio::test]
async fn test_update_license_limit_and_reinherit() {
    let (state, key, customer, product) = setup();
    let license = {
        let conn = state.db.get().unwrap();
        create_test_license(&conn, &customer.id, &product.id, Some(future_timestamp(30)))
    };
    let app = admin_app(state);

    let response = admin_request(
        &app,
        "PATCH",
        &format!("/admin/licenses/{}", license.id),
        &key,
        Some(json!({ "activation_limit": 10 })),
    )
    .await;
    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["activation_limit"], 10);

    let response = admin_request(
        &app,
        "PATCH",
        &format!("/admin/licenses/{}", license.id),
        &key,
        Some(json!({ "activation_limit": -2 })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // `null` drops the override and re-inherits the product limit.
    let response = admin_request(
        &app,
        "PATCH",
        &format!("/admin/licenses/{}", license.id),
        &key,
        Some(json!({ "activation_limit": null })),
    )
    .await;
    let body = assert_json(response, StatusCode::OK).await;
    assert!(body["activation_limit"].is_null());
}

#[tokio::test]
async fn test_disable_and_enable_license() {
    let (state, key, customer, product) = setup();
    let license = {
        let conn = state.db.get().unwrap();
        let license =
            create_test_license(&conn, &customer.id, &product.id, Some(future_timestamp(30)));
        licensing::activate_site(&conn, &state.cache, &license, &product, "example.com").unwrap();
        license
    };
    let app = admin_app(state.clone());

    let response = admin_request(
        &app,
        "PATCH",
        &format!("/admin/licenses/{}", license.id),
        &key,
        Some(json!({ "status": "disabled" })),
    )
    .await;
    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["status"], "disabled");

    // Re-enabling lands back on `active` because a site is activated.
    let response = admin_request(
        &app,
        "PATCH",
        &format!("/admin/licenses/{}", license.id),
        &key,
        Some(json!({ "status": "enabled" })),
    )
    .await;
    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["status"], "active");
}

#[tokio::test]
async fn test_enable_lapsed_license_lands_on_expired() {
    let (state, key, customer, product) = setup();
    let license = {
        let conn = state.db.get().unwrap();
        let license =
            create_test_license(&conn, &customer.id, &product.id, Some(past_timestamp(5)));
        licensing::disable_license(&conn, &state.cache, &license).unwrap()
    };
    let app = admin_app(state);

    let response = admin_request(
        &app,
        "PATCH",
        &format!("/admin/licenses/{}", license.id),
        &key,
        Some(json!({ "status": "enabled" })),
    )
    .await;
    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["status"], "expired");
}

#[tokio::test]
async fn test_renew_license_extends_by_product_term() {
    let (state, key, customer, product) = setup();
    let (license_id, old_expiration) = {
        let conn = state.db.get().unwrap();
        let license =
            create_test_license(&conn, &customer.id, &product.id, Some(future_timestamp(30)));
        (license.id, license.expiration.unwrap())
    };
    let app = admin_app(state);

    let response = admin_request(
        &app,
        "POST",
        &format!("/admin/licenses/{}/renew", license_id),
        &key,
        None,
    )
    .await;
    let body = assert_json(response, StatusCode::OK).await;
    let renewed = body["expiration"].as_i64().unwrap();
    assert_eq!(renewed, old_expiration + ONE_YEAR * 86400);

    let response = admin_request(
        &app,
        "GET",
        &format!("/admin/licenses/{}", license_id),
        &key,
        None,
    )
    .await;
    let body = assert_json(response, StatusCode::OK).await;
    assert!(body["notes"].as_str().unwrap().contains("License renewed"));
}

#[tokio::test]
async fn test_regenerate_key_replaces_the_key() {
    let (state, key, customer, product) = setup();
    let license = {
        let conn = state.db.get().unwrap();
        create_test_license(&conn, &customer.id, &product.id, Some(future_timestamp(30)))
    };
    let app = admin_app(state.clone());

    let response = admin_request(
        &app,
        "POST",
        &format!("/admin/licenses/{}/regenerate", license.id),
        &key,
        None,
    )
    .await;
    let body = assert_json(response, StatusCode::OK).await;
    let new_key = body["key"].as_str().unwrap().to_string();
    assert_ne!(new_key, license.key);
    assert_eq!(new_key.len(), 32);

    let conn = state.db.get().unwrap();
    assert!(
        queries::get_license_by_key(&conn, &license.key).unwrap().is_none(),
        "the old key no longer resolves"
    );
}

#[tokio::test]
async fn test_license_meta_crud() {
    let (state, key, customer, product) = setup();
    let license = {
        let conn = state.db.get().unwrap();
        create_test_license(&conn, &customer.id, &product.id, Some(future_timestamp(30)))
    };
    let app = admin_app(state);
    let meta_uri = format!("/admin/licenses/{}/meta/order_ref", license.id);

    let response = admin_request(&app, "GET", &meta_uri, &key, None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response =
        admin_request(&app, "PUT", &meta_uri, &key, Some(json!({ "value": "ord_42" }))).await;
    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["meta_key"], "order_ref");
    assert_eq!(body["meta_value"], "ord_42");

    // PUT on the same key overwrites.
    let response =
        admin_request(&app, "PUT", &meta_uri, &key, Some(json!({ "value": "ord_43" }))).await;
    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["meta_value"], "ord_43");

    let response = admin_request(&app, "GET", &meta_uri, &key, None).await;
    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["meta_value"], "ord_43");

    let response = admin_request(&app, "DELETE", &meta_uri, &key, None).await;
    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["success"], true);

    let response = admin_request(&app, "DELETE", &meta_uri, &key, None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_force_remove_activation() {
    let (state, key, customer, product) = setup();
    let (license_id, activation_id) = {
        let conn = state.db.get().unwrap();
        let license =
            create_test_license(&conn, &customer.id, &product.id, Some(future_timestamp(30)));
        let outcome =
            licensing::activate_site(&conn, &state.cache, &license, &product, "example.com")
                .unwrap();
        let licensing::ActivationOutcome::Activated(activation) = outcome else {
            panic!("activation did not apply");
        };
        (license.id, activation.id)
    };
    let app = admin_app(state.clone());

    let response = admin_request(
        &app,
        "DELETE",
        &format!("/admin/licenses/{}/activations/{}", license_id, activation_id),
        &key,
        None,
    )
    .await;
    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["success"], true);

    let conn = state.db.get().unwrap();
    let license = queries::get_license_by_id(&conn, &license_id).unwrap().unwrap();
    assert_eq!(license.status, LicenseStatus::Inactive, "last site released");
    assert_eq!(queries::count_site_activations(&conn, &license_id).unwrap(), 0);
}

#[tokio::test]
async fn test_remove_activation_from_wrong_license_is_404() {
    let (state, key, customer, product) = setup();
    let (other_license_id, activation_id) = {
        let conn = state.db.get().unwrap();
        let first =
            create_test_license(&conn, &customer.id, &product.id, Some(future_timestamp(30)));
        let second =
            create_test_license(&conn, &customer.id, &product.id, Some(future_timestamp(30)));
        let outcome = licensing::activate_site(&conn, &state.cache, &first, &product, "example.com")
            .unwrap();
        let licensing::ActivationOutcome::Activated(activation) = outcome else {
            panic!("activation did not apply");
        };
        (second.id, activation.id)
    };
    let app = admin_app(state);

    let response = admin_request(
        &app,
        "DELETE",
        &format!(
            "/admin/licenses/{}/activations/{}",
            other_license_id, activation_id
        ),
        &key,
        None,
    )
    .await;
    let body = assert_json(response, StatusCode::NOT_FOUND).await;
    assert_eq!(body["details"], "Activation not found");
}
