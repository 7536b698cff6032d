mod common;

use axum::http::{header, Method, StatusCode};
use chrono::{Duration, Utc};
use common::{response_json, TestApp};
use serde_json::json;
use storefront_api::entities::{ItemStatus, PaymentMethod, PaymentStatus};
use storefront_api::services::checkout::SettlementRequest;
use uuid::Uuid;

fn location(response: &axum::response::Response) -> Option<&str> {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn health_reports_database_status() {
    let app = TestApp::new().await;

    let (status, body) = response_json(app.request(Method::GET, "/health", None, None).await).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "healthy");
    assert_eq!(body["data"]["service"], "storefront-api");
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/health", None, None).await;

    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn customer_routes_require_identity() {
    let app = TestApp::new().await;

    let (status, body) =
        response_json(app.request(Method::POST, "/checkout/validate", None, None).await).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let response = app
        .request_in_session(Method::GET, "/orders", None, Some("s1"), None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn validating_an_empty_cart_conflicts() {
    let app = TestApp::new().await;
    let user = app.seed_user("Ana", "ANA001", None).await;

    let (status, body) = response_json(
        app.request(Method::POST, "/checkout/validate", Some(user.id), None)
            .await,
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["message"], "Your cart is empty!");
}

#[tokio::test]
async fn stock_violations_list_product_names() {
    let app = TestApp::new().await;
    let user = app.seed_user("Bo", "BO0001", None).await;
    let gone = app.seed_product("Gone", 100, 0).await;
    let scarce = app.seed_product("Scarce", 100, 1).await;
    app.add_to_cart(user.id, gone.id, 1).await;
    app.add_to_cart(user.id, scarce.id, 3).await;

    let (status, body) = response_json(
        app.request(Method::POST, "/checkout/validate", Some(user.id), None)
            .await,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["outOfStock"], json!(["Gone"]));
    assert_eq!(body["maxExceed"], json!(["Scarce"]));
}

#[tokio::test]
async fn empty_cart_checkout_page_redirects_to_shop() {
    let app = TestApp::new().await;
    let user = app.seed_user("Cal", "CAL001", None).await;

    let response = app
        .request(Method::GET, "/checkout", Some(user.id), None)
        .await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), Some("/shop"));
}

#[tokio::test]
async fn coupons_apply_and_remove_per_session() {
    let app = TestApp::new().await;
    let user = app.seed_user("Dee", "DEE001", None).await;
    let shoe = app.seed_product("Runner", 800, 5).await;
    app.add_to_cart(user.id, shoe.id, 1).await;
    app.seed_coupon("SAVE25", 25, 500, Utc::now() + Duration::days(3), true)
        .await;

    let (status, body) = response_json(
        app.request_in_session(
            Method::POST,
            "/checkout/coupon/apply",
            Some(user.id),
            Some("tab-1"),
            Some(json!({"couponCode": "SAVE25"})),
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["totals"]["total"], 600);
    assert_eq!(app.sessions.snapshot("tab-1").discount_percent, 25);
    assert_eq!(app.sessions.snapshot("tab-2").discount_percent, 0);

    let (status, body) = response_json(
        app.request_in_session(
            Method::GET,
            "/checkout",
            Some(user.id),
            Some("tab-1"),
            None,
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["discountPercent"], 25);

    let response = app
        .request_in_session(
            Method::POST,
            "/checkout/coupon/remove",
            Some(user.id),
            Some("tab-1"),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.sessions.snapshot("tab-1").discount_percent, 0);
}

#[tokio::test]
async fn unknown_coupons_are_bad_requests() {
    let app = TestApp::new().await;
    let user = app.seed_user("Eli", "ELI001", None).await;

    let (status, body) = response_json(
        app.request(
            Method::POST,
            "/checkout/coupon/apply",
            Some(user.id),
            Some(json!({"couponCode": "NOPE"})),
        )
        .await,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid coupon code");
}

#[tokio::test]
async fn session_defaults_to_the_user_id() {
    let app = TestApp::new().await;
    let user = app.seed_user("Flo", "FLO001", None).await;
    app.seed_address(user.id, "Goa", 0).await;
    let shoe = app.seed_product("Runner", 100, 5).await;
    app.add_to_cart(user.id, shoe.id, 1).await;

    let response = app
        .request(
            Method::POST,
            "/checkout/address",
            Some(user.id),
            Some(json!({"addressIndex": 0})),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        app.sessions.snapshot(&user.id.to_string()).address_index,
        Some(0)
    );
}

#[tokio::test]
async fn out_of_range_address_is_rejected() {
    let app = TestApp::new().await;
    let user = app.seed_user("Gil", "GIL001", None).await;
    app.seed_address(user.id, "Goa", 0).await;
    let shoe = app.seed_product("Runner", 100, 5).await;
    app.add_to_cart(user.id, shoe.id, 1).await;

    let (status, _) = response_json(
        app.request(
            Method::POST,
            "/checkout/address",
            Some(user.id),
            Some(json!({"addressIndex": 4})),
        )
        .await,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn payment_page_without_address_redirects_to_cart() {
    let app = TestApp::new().await;
    let user = app.seed_user("Hana", "HANA01", None).await;

    let response = app
        .request(Method::GET, "/checkout/payment", Some(user.id), None)
        .await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), Some("/cart"));
}

#[tokio::test]
async fn confirming_cod_places_the_order() {
    let app = TestApp::new().await;
    let user = app.seed_user("Ike", "IKE001", None).await;
    app.seed_address(user.id, "Goa", 0).await;
    let shoe = app.seed_product("Runner", 250, 5).await;
    app.add_to_cart(user.id, shoe.id, 2).await;
    app.choose_address("s1", 0);

    let (status, body) = response_json(
        app.request_in_session(
            Method::POST,
            "/checkout/confirm",
            Some(user.id),
            Some("s1"),
            Some(json!({"paymentMethod": "COD"})),
        )
        .await,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["order"]["totalAmount"], 500);
    assert_eq!(body["data"]["order"]["paymentMethod"], "COD");
    assert_eq!(body["data"]["items"][0]["status"], "Confirmed");
    assert_eq!(app.stock_of(shoe.id).await, 3);
    assert_eq!(app.cart_len(user.id).await, 0);

    let (status, body) = response_json(
        app.request(Method::GET, "/order-placed?status=success", Some(user.id), None)
            .await,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["cartCount"], 0);
}

#[tokio::test]
async fn razorpay_order_locks_until_unlocked() {
    let app = TestApp::new().await;
    let user = app.seed_user("Jay", "JAY001", None).await;
    let shoe = app.seed_product("Runner", 120, 5).await;
    app.add_to_cart(user.id, shoe.id, 1).await;

    let (status, body) = response_json(
        app.request_in_session(
            Method::POST,
            "/checkout/razorpay-order",
            Some(user.id),
            Some("s1"),
            None,
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["order"]["amount"], 12_000);

    let (status, _) = response_json(
        app.request_in_session(
            Method::POST,
            "/checkout/razorpay-order",
            Some(user.id),
            Some("s1"),
            None,
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let response = app
        .request_in_session(
            Method::POST,
            "/checkout/payment-unlock",
            Some(user.id),
            Some("s1"),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!app.sessions.is_locked("s1"));
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let app = TestApp::new().await;
    let user = app.seed_user("Kay", "KAY001", None).await;

    let (status, body) = response_json(
        app.request(
            Method::POST,
            "/checkout/confirm",
            Some(user.id),
            Some(json!({"paymentMethod": "Cheque"})),
        )
        .await,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn order_details_redirect_for_unknown_ids() {
    let app = TestApp::new().await;
    let user = app.seed_user("Lee", "LEE001", None).await;

    let response = app
        .request(Method::GET, "/orders/details?id=bad", Some(user.id), None)
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), Some("/orders"));

    let uri = format!("/orders/details?id={}", Uuid::new_v4());
    let response = app.request(Method::GET, &uri, Some(user.id), None).await;
    assert_eq!(location(&response), Some("/orders"));

    let response = app
        .request(Method::GET, "/admin/orders/details?id=bad", None, None)
        .await;
    assert_eq!(location(&response), Some("/admin/orders"));
}

async fn place_cod_order(app: &TestApp, name: &str, price: i64) -> (Uuid, Uuid, Uuid) {
    let user = app
        .seed_user(name, &format!("{}01", name.to_uppercase()), None)
        .await;
    app.seed_address(user.id, "Goa", 0).await;
    let shoe = app.seed_product(&format!("{name} shoe"), price, 5).await;
    app.add_to_cart(user.id, shoe.id, 1).await;
    let session = user.id.to_string();
    app.choose_address(&session, 0);
    let settled = app
        .services()
        .settlement
        .settle(SettlementRequest {
            user_id: user.id,
            session_id: session,
            payment_method: PaymentMethod::Cod,
            payment_status: PaymentStatus::Pending,
        })
        .await
        .expect("settle");
    (user.id, settled.order.id, shoe.id)
}

#[tokio::test]
async fn order_history_and_details_are_owner_scoped() {
    let app = TestApp::new().await;
    let (owner, order_id, _) = place_cod_order(&app, "Mo", 100).await;
    let stranger = app.seed_user("Ned", "NED001", None).await;

    let (status, body) =
        response_json(app.request(Method::GET, "/orders", Some(owner), None).await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["orders"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["data"]["orders"][0]["items"][0]["productName"], "Mo shoe");

    let uri = format!("/orders/details?id={order_id}");
    let (status, body) =
        response_json(app.request(Method::GET, &uri, Some(owner), None).await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], order_id.to_string());

    let response = app.request(Method::GET, &uri, Some(stranger.id), None).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn admin_list_filters_and_sorts() {
    let app = TestApp::new().await;
    place_cod_order(&app, "Ola", 100).await;
    place_cod_order(&app, "Pia", 300).await;

    let (status, body) = response_json(
        app.request(
            Method::GET,
            "/admin/orders?sortBy=totalAmount&sortOrder=asc",
            None,
            None,
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let totals: Vec<i64> = body["data"]["orders"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["totalAmount"].as_i64().unwrap())
        .collect();
    assert_eq!(totals, vec![100, 300]);

    let (_, body) = response_json(
        app.request(Method::GET, "/admin/orders?q=pia", None, None)
            .await,
    )
    .await;
    assert_eq!(body["data"]["orders"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["data"]["orders"][0]["customerName"], "Pia");

    for wildcard in ["%25", "_"] {
        let (_, body) = response_json(
            app.request(Method::GET, &format!("/admin/orders?q={wildcard}"), None, None)
                .await,
        )
        .await;
        assert_eq!(body["data"]["orders"].as_array().map(Vec::len), Some(0));
    }

    let (_, body) = response_json(
        app.request(Method::GET, "/admin/orders?status=Success", None, None)
            .await,
    )
    .await;
    assert_eq!(body["data"]["orders"].as_array().map(Vec::len), Some(0));

    let (status, _) = response_json(
        app.request(Method::GET, "/admin/orders?status=Bogus", None, None)
            .await,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn customer_cancels_through_the_api() {
    let app = TestApp::new().await;
    let (owner, order_id, product_id) = place_cod_order(&app, "Quin", 200).await;
    assert_eq!(app.stock_of(product_id).await, 4);

    let (status, body) = response_json(
        app.request(
            Method::POST,
            "/orders/cancel",
            Some(owner),
            Some(json!({
                "orderId": order_id,
                "productId": product_id,
                "cancellationReason": "Changed my mind"
            })),
        )
        .await,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["item"]["status"], "Cancelled");
    assert_eq!(body["data"]["restocked"], true);
    assert_eq!(app.stock_of(product_id).await, 5);
}

#[tokio::test]
async fn blank_cancellation_reason_fails_validation() {
    let app = TestApp::new().await;
    let (owner, order_id, product_id) = place_cod_order(&app, "Rae", 200).await;

    let (status, _) = response_json(
        app.request(
            Method::POST,
            "/orders/cancel",
            Some(owner),
            Some(json!({
                "orderId": order_id,
                "productId": product_id,
                "cancellationReason": ""
            })),
        )
        .await,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.stock_of(product_id).await, 4);
}

#[tokio::test]
async fn admin_status_changes_go_through_the_api() {
    let app = TestApp::new().await;
    let (_, order_id, product_id) = place_cod_order(&app, "Sam", 200).await;

    let (status, body) = response_json(
        app.request(
            Method::POST,
            "/admin/orders/status",
            None,
            Some(json!({
                "orderId": order_id,
                "productId": product_id,
                "status": ItemStatus::Shipped
            })),
        )
        .await,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["item"]["status"], "Shipped");
    assert_eq!(app.items_of(order_id).await[0].status, ItemStatus::Shipped);
}
