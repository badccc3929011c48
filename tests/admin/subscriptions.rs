use axum::http::StatusCode;
use serde_json::json;

#[path = "../common/mod.rs"]
mod common;
use common::*;

/// Set up a customer and product ready for subscription tests.
fn setup() -> (AppState, String, Customer, Product) {
    let state = create_test_app_state();
    let (api_key, customer, product) = {
        let conn = state.db.get().unwrap();
        let api_key = create_test_api_key(&conn);
        let customer = create_test_customer(&conn, "buyer@example.com");
        let product = create_test_product(&conn, "Pro Plugin");
        (api_key, customer, product)
    };
    (state, api_key, customer, product)
}

#[tokio::test]
async fn test_create_subscription_defaults_from_product() {
    let (state, key, customer, product) = setup();
    let app = admin_app(state);

    let response = admin_request(
        &app,
        "POST",
        "/admin/subscriptions",
        &key,
        Some(json!({
            "customer_id": customer.id,
            "product_id": product.id,
            "gateway": "manual"
        })),
    )
    .await;
    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["status"], "pending");
    assert_eq!(body["period"], "month");
    assert_eq!(body["initial_amount_cents"], 1299);
    assert_eq!(body["recurring_amount_cents"], 1299);
    assert_eq!(body["times_billed"], 0);
    assert_eq!(body["expiration"], serde_json::Value::Null);
    assert!(
        body["profile_id"].as_str().unwrap().starts_with("man_"),
        "manual gateway assigns its own profile reference"
    );
}

#[tokio::test]
async fn test_create_subscription_unknown_gateway_is_400() {
    let (state, key, customer, product) = setup();
    let app = admin_app(state);

    let response = admin_request(
        &app,
        "POST",
        "/admin/subscriptions",
        &key,
        Some(json!({
            "customer_id": customer.id,
            "product_id": product.id,
            "gateway": "stripe"
        })),
    )
    .await;
    let body = assert_json(response, StatusCode::BAD_REQUEST).await;
    assert_eq!(body["details"], "Unknown gateway");
}

#[tokio::test]
async fn test_create_subscription_duplicate_profile_conflicts() {
    let (state, key, customer, product) = setup();
    {
        let conn = state.db.get().unwrap();
        create_test_subscription(&conn, &customer, &product, "paypal", Some("I-TAKEN"));
    }
    let app = admin_app(state);

    let response = admin_request(
        &app,
        "POST",
        "/admin/subscriptions",
        &key,
        Some(json!({
            "customer_id": customer.id,
            "product_id": product.id,
            "gateway": "paypal",
            "profile_id": "I-TAKEN"
        })),
    )
    .await;
    let body = assert_json(response, StatusCode::CONFLICT).await;
    assert_eq!(body["details"], "profile_id already in use for this gateway");
}

#[tokio::test]
async fn test_get_subscription_includes_payments_and_lifetime_value() {
    let (state, key, customer, product) = setup();
    let sub_id = {
        let conn = state.db.get().unwrap();
        let (sub, _license) = create_active_subscription(
            &conn,
            &state.cache,
            &customer,
            &product,
            "manual",
            None,
        );
        sub.id
    };
    let app = admin_app(state);

    let response = admin_request(
        &app,
        "GET",
        &format!("/admin/subscriptions/{}", sub_id),
        &key,
        None,
    )
    .await;
    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["id"], sub_id.as_str());
    assert_eq!(body["status"], "active");
    let payments = body["payments"].as_array().unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0]["payment_type"], "initial");
    assert_eq!(body["lifetime_value_cents"], 1299);
}

#[tokio::test]
async fn test_record_initial_payment_activates() {
    let (state, key, customer, product) = setup();
    let sub_id = {
        let conn = state.db.get().unwrap();
        create_test_subscription(&conn, &customer, &product, "manual", None).id
    };
    let app = admin_app(state.clone());

    let response = admin_request(
        &app,
        "POST",
        &format!("/admin/subscriptions/{}/payments", sub_id),
        &key,
        Some(json!({ "payment_type": "initial", "transaction_id": "ch_1" })),
    )
    .await;
    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["status"], "active");
    assert_eq!(body["times_billed"], 1);
    assert!(body["expiration"].as_i64().unwrap() > now());

    let conn = state.db.get().unwrap();
    assert!(
        queries::get_license_for_subscription(&conn, &sub_id)
            .unwrap()
            .is_some(),
        "initial payment issues the license"
    );
}

#[tokio::test]
async fn test_record_duplicate_transaction_conflicts() {
    let (state, key, customer, product) = setup();
    let sub_id = {
        let conn = state.db.get().unwrap();
        let (sub, _license) = create_active_subscription(
            &conn,
            &state.cache,
            &customer,
            &product,
            "manual",
            None,
        );
        sub.id
    };
    let app = admin_app(state);

    let renewal = json!({ "payment_type": "renewal", "transaction_id": "ch_dup" });
    let response = admin_request(
        &app,
        "POST",
        &format!("/admin/subscriptions/{}/payments", sub_id),
        &key,
        Some(renewal.clone()),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = admin_request(
        &app,
        "POST",
        &format!("/admin/subscriptions/{}/payments", sub_id),
        &key,
        Some(renewal),
    )
    .await;
    let body = assert_json(response, StatusCode::CONFLICT).await;
    assert_eq!(body["details"], "Transaction already recorded");
}

#[tokio::test]
async fn test_record_refund_keeps_status_and_lowers_lifetime_value() {
    let (state, key, customer, product) = setup();
    let sub_id = {
        let conn = state.db.get().unwrap();
        let (sub, _license) = create_active_subscription(
            &conn,
            &state.cache,
            &customer,
            &product,
            "manual",
            None,
        );
        sub.id
    };
    let app = admin_app(state);

    let response = admin_request(
        &app,
        "POST",
        &format!("/admin/subscriptions/{}/payments", sub_id),
        &key,
        Some(json!({ "payment_type": "refund", "amount_cents": 500 })),
    )
    .await;
    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["status"], "active", "refunds do not change the lifecycle");
    assert_eq!(body["times_billed"], 1);
    assert_eq!(body["lifetime_value_cents"], 1299 - 500);
}

#[tokio::test]
async fn test_cancel_subscription_keeps_access_until_expiration() {
    let (state, key, customer, product) = setup();
    let (sub_id, expiration) = {
        let conn = state.db.get().unwrap();
        let (sub, _license) = create_active_subscription(
            &conn,
            &state.cache,
            &customer,
            &product,
            "manual",
            None,
        );
        (sub.id, sub.expiration)
    };
    let app = admin_app(state);

    let response = admin_request(
        &app,
        "POST",
        &format!("/admin/subscriptions/{}/cancel", sub_id),
        &key,
        None,
    )
    .await;
    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["status"], "cancelled");
    assert_eq!(body["expiration"].as_i64(), expiration);

    // A cancelled subscription cannot be cancelled again.
    let response = admin_request(
        &app,
        "POST",
        &format!("/admin/subscriptions/{}/cancel", sub_id),
        &key,
        None,
    )
    .await;
    let body = assert_json(response, StatusCode::BAD_REQUEST).await;
    assert_eq!(body["details"], "Cannot cancel a cancelled subscription");
}

#[tokio::test]
async fn test_update_subscription_profile_id() {
    let (state, key, customer, product) = setup();
    let (first_id, second_id) = {
        let conn = state.db.get().unwrap();
        let first = create_test_subscription(&conn, &customer, &product, "paypal", Some("I-FIRST"));
        let second =
            create_test_subscription(&conn, &customer, &product, "paypal", Some("I-SECOND"));
        (first.id, second.id)
    };
    let app = admin_app(state);

    // Claiming another subscription's profile is a conflict.
    let response = admin_request(
        &app,
        "PATCH",
        &format!("/admin/subscriptions/{}", second_id),
        &key,
        Some(json!({ "profile_id": "I-FIRST" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // `null` detaches the billing profile.
    let response = admin_request(
        &app,
        "PATCH",
        &format!("/admin/subscriptions/{}", first_id),
        &key,
        Some(json!({ "profile_id": null })),
    )
    .await;
    let body = assert_json(response, StatusCode::OK).await;
    assert!(body["profile_id"].is_null());
}

#[tokio::test]
async fn test_list_subscriptions_filters_by_status() {
    let (state, key, customer, product) = setup();
    {
        let conn = state.db.get().unwrap();
        create_test_subscription(&conn, &customer, &product, "manual", None);
        create_active_subscription(&conn, &state.cache, &customer, &product, "manual", None);
    }
    let app = admin_app(state);

    let response =
        admin_request(&app, "GET", "/admin/subscriptions?status=pending", &key, None).await;
    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["status"], "pending");

    let response = admin_request(&app, "GET", "/admin/subscriptions", &key, None).await;
    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["total"], 2);
}

#[tokio::test]
async fn test_delete_subscription_detaches_license() {
    let (state, key, customer, product) = setup();
    let (sub_id, license_id) = {
        let conn = state.db.get().unwrap();
        let (sub, license) = create_active_subscription(
            &conn,
            &state.cache,
            &customer,
            &product,
            "manual",
            None,
        );
        (sub.id, license.id)
    };
    let app = admin_app(state.clone());

    let response = admin_request(
        &app,
        "DELETE",
        &format!("/admin/subscriptions/{}", sub_id),
        &key,
        None,
    )
    .await;
    let body = assert_json(response, StatusCode::OK).await;
    assert_eq!(body["success"], true);

    let conn = state.db.get().unwrap();
    assert!(queries::get_subscription_by_id(&conn, &sub_id).unwrap().is_none());
    let license = queries::get_license_by_id(&conn, &license_id).unwrap().unwrap();
    assert_eq!(
        license.subscription_id, None,
        "the license survives with its subscription link cleared"
    );
}
