//! Pre-settlement checkout steps: validation, coupons, addresses and the
//! gateway payment lock.

mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use common::TestApp;
use storefront_api::errors::ServiceError;
use storefront_api::services::checkout::{CheckoutPage, PaymentPage};

#[tokio::test]
async fn validate_rejects_stale_stock_and_clears_discount_on_success() {
    let app = TestApp::new().await;
    let user = app.seed_user("Ada", "ADA001", None).await;
    let shoe = app.seed_product("Runner", 100, 1).await;
    app.add_to_cart(user.id, shoe.id, 2).await;
    app.sessions.set_discount("s1", 15);
    let checkout = &app.services().checkout;

    let err = checkout.validate_cart(user.id, "s1").await.unwrap_err();
    assert_matches!(err, ServiceError::StockUnavailable(ref c) if c.max_exceed == vec!["Runner".to_string()]);
    assert_eq!(app.sessions.snapshot("s1").discount_percent, 15);

    let other = app.seed_product("Sandal", 50, 5).await;
    let buyer = app.seed_user("Ben", "BEN001", None).await;
    app.add_to_cart(buyer.id, other.id, 1).await;
    app.sessions.set_discount("s2", 15);
    checkout.validate_cart(buyer.id, "s2").await.unwrap();
    assert_eq!(app.sessions.snapshot("s2").discount_percent, 0);
}

#[tokio::test]
async fn empty_cart_checkout_page_redirects() {
    let app = TestApp::new().await;
    let user = app.seed_user("Cy", "CY0001", None).await;

    let page = app
        .services()
        .checkout
        .checkout_view(user.id, "s1", 1)
        .await
        .unwrap();

    assert_matches!(page, CheckoutPage::EmptyCart);
}

#[tokio::test]
async fn checkout_page_lists_applicable_coupons_and_paged_addresses() {
    let app = TestApp::new().await;
    let user = app.seed_user("Di", "DI0001", None).await;
    for i in 0..5 {
        app.seed_address(user.id, &format!("City {i}"), i).await;
    }
    let shoe = app.seed_product("Runner", 500, 5).await;
    app.add_to_cart(user.id, shoe.id, 2).await;
    let later = Utc::now() + Duration::days(7);
    app.seed_coupon("SAVE10", 10, 500, later, true).await;
    app.seed_coupon("BIG50", 50, 5_000, later, true).await;
    app.seed_coupon("OFF", 20, 0, later, false).await;

    let page = app
        .services()
        .checkout
        .checkout_view(user.id, "s1", 2)
        .await
        .unwrap();
    let CheckoutPage::Ready(view) = page else {
        panic!("expected a checkout page");
    };

    assert_eq!(view.totals.subtotal, 1_000);
    assert_eq!(view.coupons.len(), 1);
    assert_eq!(view.coupons[0].code, "SAVE10");
    assert_eq!(view.address_page.total_pages, 2);
    assert_eq!(view.address_page.current_page, 2);
    assert_eq!(view.address_page.addresses.len(), 1);
    assert_eq!(view.address_page.addresses[0].city, "City 4");
}

#[tokio::test]
async fn coupon_rules_are_enforced() {
    let app = TestApp::new().await;
    let user = app.seed_user("Ed", "ED0001", None).await;
    let shoe = app.seed_product("Runner", 400, 5).await;
    app.add_to_cart(user.id, shoe.id, 1).await;
    let later = Utc::now() + Duration::days(1);
    let earlier = Utc::now() - Duration::days(1);
    app.seed_coupon("FRESH", 25, 100, later, true).await;
    app.seed_coupon("STALE", 25, 100, earlier, true).await;
    app.seed_coupon("OFF", 25, 100, later, false).await;
    app.seed_coupon("RICH", 25, 1_000, later, true).await;
    let checkout = &app.services().checkout;

    for code in ["", "NOPE", "STALE", "OFF", "RICH"] {
        let err = checkout.apply_coupon(user.id, "s1", code).await.unwrap_err();
        assert_matches!(err, ServiceError::BadRequest(_), "code {code:?}");
    }
    assert_eq!(app.sessions.snapshot("s1").discount_percent, 0);

    let applied = checkout.apply_coupon(user.id, "s1", " FRESH ").await.unwrap();
    assert_eq!(applied.discount_percent, 25);
    assert_eq!(applied.totals.total, 300);
    assert_eq!(app.sessions.snapshot("s1").discount_percent, 25);

    checkout.remove_coupon("s1");
    assert_eq!(app.sessions.snapshot("s1").discount_percent, 0);
}

#[tokio::test]
async fn coupon_expiry_follows_the_session_clock() {
    let app = TestApp::new().await;
    let user = app.seed_user("Fi", "FI0001", None).await;
    let shoe = app.seed_product("Runner", 400, 5).await;
    app.add_to_cart(user.id, shoe.id, 1).await;
    app.seed_coupon("HOUR", 10, 0, app.sessions.now() + Duration::hours(1), true)
        .await;

    app.clock.advance(Duration::hours(2));
    let err = app
        .services()
        .checkout
        .apply_coupon(user.id, "s1", "HOUR")
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::BadRequest(ref m) if m.contains("expired"));
}

#[tokio::test]
async fn address_selection_is_bounded_by_saved_addresses() {
    let app = TestApp::new().await;
    let user = app.seed_user("Gus", "GUS001", None).await;
    app.seed_address(user.id, "Kochi", 0).await;
    let shoe = app.seed_product("Runner", 100, 5).await;
    app.add_to_cart(user.id, shoe.id, 1).await;
    let checkout = &app.services().checkout;

    let err = checkout.select_address(user.id, "s1", 1).await.unwrap_err();
    assert_matches!(err, ServiceError::BadRequest(_));
    assert_eq!(app.sessions.snapshot("s1").address_index, None);

    checkout.select_address(user.id, "s1", 0).await.unwrap();
    assert_eq!(app.sessions.snapshot("s1").address_index, Some(0));
}

#[tokio::test]
async fn payment_page_needs_an_address_and_a_cart() {
    let app = TestApp::new().await;
    let user = app.seed_user("Hal", "HAL001", None).await;
    app.seed_address(user.id, "Kochi", 0).await;
    let shoe = app.seed_product("Runner", 100, 5).await;
    let checkout = &app.services().checkout;

    let page = checkout.payment_view(user.id, "s1").await.unwrap();
    assert_matches!(page, PaymentPage::NoAddress);

    app.choose_address("s1", 0);
    let page = checkout.payment_view(user.id, "s1").await.unwrap();
    assert_matches!(page, PaymentPage::EmptyCart);

    app.add_to_cart(user.id, shoe.id, 3).await;
    app.fund_wallet(user.id, 75).await;
    let PaymentPage::Ready(view) = checkout.payment_view(user.id, "s1").await.unwrap() else {
        panic!("expected a payment page");
    };
    assert_eq!(view.totals.total, 300);
    assert_eq!(view.wallet_balance, 75);
    assert_eq!(view.address.city, "Kochi");
    assert_eq!(view.gateway_key_id, "rzp_test_key");
}

#[tokio::test]
async fn gateway_order_holds_the_lock_until_unlocked() {
    let app = TestApp::new().await;
    let user = app.seed_user("Ivy", "IVY001", None).await;
    let shoe = app.seed_product("Runner", 450, 5).await;
    app.add_to_cart(user.id, shoe.id, 2).await;
    app.sessions.set_discount("s1", 10);
    let checkout = &app.services().checkout;

    let order = checkout.create_gateway_order(user.id, "s1").await.unwrap();
    assert_eq!(order.amount, 81_000);
    assert_eq!(order.currency, "INR");
    assert!(app.gateway.last_request().unwrap().receipt.starts_with("rcpt_"));
    assert_eq!(
        app.sessions.snapshot("s1").payment_lock.and_then(|l| l.reference),
        Some(order.id.clone())
    );

    let err = checkout.create_gateway_order(user.id, "s1").await.unwrap_err();
    assert_matches!(err, ServiceError::PaymentInProgress);
    assert_eq!(app.gateway.call_count(), 1);

    checkout.unlock_payment("s1").await;
    assert!(!app.sessions.is_locked("s1"));
    checkout.create_gateway_order(user.id, "s1").await.unwrap();
}

#[tokio::test]
async fn gateway_lock_expires_after_its_ttl() {
    let app = TestApp::new().await;
    let user = app.seed_user("Jo", "JO0001", None).await;
    let shoe = app.seed_product("Runner", 100, 5).await;
    app.add_to_cart(user.id, shoe.id, 1).await;
    let checkout = &app.services().checkout;

    checkout.create_gateway_order(user.id, "s1").await.unwrap();
    app.clock.advance(Duration::seconds(30));
    assert!(checkout.create_gateway_order(user.id, "s1").await.is_err());

    app.clock.advance(Duration::seconds(31));
    checkout.create_gateway_order(user.id, "s1").await.unwrap();
    assert_eq!(app.gateway.call_count(), 2);
}

#[tokio::test]
async fn failed_gateway_calls_release_the_lock() {
    let app = TestApp::new().await;
    let user = app.seed_user("Kit", "KIT001", None).await;
    let shoe = app.seed_product("Runner", 100, 5).await;
    app.add_to_cart(user.id, shoe.id, 1).await;
    app.gateway.fail_next(true);

    let err = app
        .services()
        .checkout
        .create_gateway_order(user.id, "s1")
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::ExternalServiceError(_));
    assert!(!app.sessions.is_locked("s1"));
}

#[tokio::test]
async fn zero_total_cannot_go_to_the_gateway() {
    let app = TestApp::new().await;
    let user = app.seed_user("Lu", "LU0001", None).await;
    let shoe = app.seed_product("Freebie", 100, 5).await;
    app.add_to_cart(user.id, shoe.id, 1).await;
    app.sessions.set_discount("s1", 100);

    let err = app
        .services()
        .checkout
        .create_gateway_order(user.id, "s1")
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::BadRequest(_));
    assert_eq!(app.gateway.call_count(), 0);
    assert!(!app.sessions.is_locked("s1"));
}

#[tokio::test]
async fn expired_attempt_cannot_release_a_newer_gateway_lock() {
    let app = TestApp::new().await;
    let user = app.seed_user("Mo", "MO0001", None).await;
    let shoe = app.seed_product("Runner", 100, 5).await;
    app.add_to_cart(user.id, shoe.id, 1).await;
    let stale = app.sessions.acquire_payment_lock("s1").unwrap();

    app.clock.advance(Duration::seconds(61));
    let order = app
        .services()
        .checkout
        .create_gateway_order(user.id, "s1")
        .await
        .unwrap();
    drop(stale);

    assert!(app.sessions.is_locked("s1"));
    assert_eq!(
        app.sessions.snapshot("s1").payment_lock.and_then(|l| l.reference),
        Some(order.id)
    );
}
