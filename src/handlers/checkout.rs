use axum::{
    extract::{Query, State},
    response::Response,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use validator::Validate;

use super::common::{ok_response, redirect, success_response, validate_input, PageQuery};
use super::extractors::{AppJson, CheckoutSessionId, CurrentUser};
use crate::entities::{PaymentMethod, PaymentStatus};
use crate::errors::ServiceError;
use crate::services::checkout::{CheckoutPage, PaymentPage, SettlementRequest};
use crate::services::payment_gateway::GatewayOrder;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ApplyCouponRequest {
    #[validate(length(min = 1, max = 64, message = "Coupon code is required"))]
    pub coupon_code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectAddressRequest {
    pub address_index: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmOrderRequest {
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub payment_status: Option<PaymentStatus>,
}

#[derive(Debug, Deserialize)]
pub struct OrderPlacedQuery {
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GatewayOrderResponse {
    pub order: GatewayOrder,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/checkout", get(checkout_page))
        .route("/checkout/validate", post(validate_checkout))
        .route("/checkout/coupon/apply", post(apply_coupon))
        .route("/checkout/coupon/remove", post(remove_coupon))
        .route("/checkout/address", post(select_address))
        .route("/checkout/payment", get(payment_page))
        .route("/checkout/confirm", post(confirm_order))
        .route("/checkout/razorpay-order", post(create_razorpay_order))
        .route("/checkout/payment-unlock", post(unlock_payment))
        .route("/order-placed", get(order_placed))
}

#[instrument(skip(state))]
async fn validate_checkout(
    State(state): State<AppState>,
    user: CurrentUser,
    session: CheckoutSessionId,
) -> Result<Response, ServiceError> {
    state
        .services
        .checkout
        .validate_cart(user.user_id, session.as_str())
        .await?;
    Ok(ok_response())
}

#[instrument(skip(state))]
async fn checkout_page(
    State(state): State<AppState>,
    user: CurrentUser,
    session: CheckoutSessionId,
    Query(query): Query<PageQuery>,
) -> Result<Response, ServiceError> {
    match state
        .services
        .checkout
        .checkout_view(user.user_id, session.as_str(), query.page())
        .await?
    {
        CheckoutPage::EmptyCart => Ok(redirect("/shop")),
        CheckoutPage::Ready(view) => Ok(success_response(view)),
    }
}

#[instrument(skip(state))]
async fn apply_coupon(
    State(state): State<AppState>,
    user: CurrentUser,
    session: CheckoutSessionId,
    AppJson(request): AppJson<ApplyCouponRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&request)?;
    let applied = state
        .services
        .checkout
        .apply_coupon(user.user_id, session.as_str(), &request.coupon_code)
        .await?;
    Ok(success_response(applied))
}

async fn remove_coupon(
    State(state): State<AppState>,
    session: CheckoutSessionId,
) -> Result<Response, ServiceError> {
    state.services.checkout.remove_coupon(session.as_str());
    Ok(ok_response())
}

#[instrument(skip(state))]
async fn select_address(
    State(state): State<AppState>,
    user: CurrentUser,
    session: CheckoutSessionId,
    AppJson(request): AppJson<SelectAddressRequest>,
) -> Result<Response, ServiceError> {
    state
        .services
        .checkout
        .select_address(user.user_id, session.as_str(), request.address_index)
        .await?;
    Ok(ok_response())
}

#[instrument(skip(state))]
async fn payment_page(
    State(state): State<AppState>,
    user: CurrentUser,
    session: CheckoutSessionId,
) -> Result<Response, ServiceError> {
    match state
        .services
        .checkout
        .payment_view(user.user_id, session.as_str())
        .await?
    {
        PaymentPage::NoAddress => Ok(redirect("/cart")),
        PaymentPage::EmptyCart => Ok(redirect("/shop")),
        PaymentPage::Ready(view) => Ok(success_response(view)),
    }
}

#[instrument(skip(state))]
async fn confirm_order(
    State(state): State<AppState>,
    user: CurrentUser,
    session: CheckoutSessionId,
    AppJson(request): AppJson<ConfirmOrderRequest>,
) -> Result<Response, ServiceError> {
    let settled = state
        .services
        .settlement
        .settle(SettlementRequest {
            user_id: user.user_id,
            session_id: session.0,
            payment_method: request.payment_method,
            payment_status: request.payment_status.unwrap_or(PaymentStatus::Pending),
        })
        .await?;
    Ok(success_response(settled))
}

#[instrument(skip(state))]
async fn create_razorpay_order(
    State(state): State<AppState>,
    user: CurrentUser,
    session: CheckoutSessionId,
) -> Result<Response, ServiceError> {
    let order = state
        .services
        .checkout
        .create_gateway_order(user.user_id, session.as_str())
        .await?;
    Ok(success_response(GatewayOrderResponse { order }))
}

async fn unlock_payment(
    State(state): State<AppState>,
    session: CheckoutSessionId,
) -> Result<Response, ServiceError> {
    state
        .services
        .checkout
        .unlock_payment(session.as_str())
        .await;
    Ok(ok_response())
}

async fn order_placed(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<OrderPlacedQuery>,
) -> Result<Response, ServiceError> {
    let view = state
        .services
        .checkout
        .order_placed_view(user.user_id, query.status)
        .await?;
    Ok(success_response(view))
}
