use axum::{
    extract::{Query, State},
    response::Response,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use super::common::{redirect, success_response, validate_input, IdQuery, PageQuery};
use super::extractors::{AppJson, CurrentUser};
use crate::errors::ServiceError;
use crate::services::payment_gateway::GatewayOrder;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CancelItemRequest {
    #[validate(length(min = 1, max = 500, message = "A cancellation reason is required"))]
    pub cancellation_reason: String,
    pub product_id: Uuid,
    pub order_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReturnItemRequest {
    pub product_id: Uuid,
    pub order_id: Uuid,
    #[validate(length(min = 1, max = 500, message = "A return reason is required"))]
    pub return_reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepayRequest {
    #[serde(default)]
    pub order_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepaymentConfirmRequest {
    pub order_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct RepayResponse {
    pub order: GatewayOrder,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(order_history))
        .route("/orders/details", get(order_details))
        .route("/orders/cancel", post(cancel_item))
        .route("/orders/return", post(request_return))
        .route("/orders/repay", post(repay))
        .route("/orders/repayment-confirm", post(repayment_confirm))
}

async fn order_history(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<PageQuery>,
) -> Result<Response, ServiceError> {
    let page = state
        .services
        .orders
        .history(user.user_id, query.page())
        .await?;
    Ok(success_response(page))
}

async fn order_details(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<IdQuery>,
) -> Result<Response, ServiceError> {
    let Some(order_id) = query.parsed() else {
        return Ok(redirect("/orders"));
    };
    match state.services.orders.detail(user.user_id, order_id).await? {
        Some(order) => Ok(success_response(order)),
        None => Ok(redirect("/orders")),
    }
}

#[instrument(skip(state))]
async fn cancel_item(
    State(state): State<AppState>,
    user: CurrentUser,
    AppJson(request): AppJson<CancelItemRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&request)?;
    let outcome = state
        .services
        .reversals
        .cancel(
            user.user_id,
            request.order_id,
            request.product_id,
            request.cancellation_reason,
        )
        .await?;
    Ok(success_response(outcome))
}

#[instrument(skip(state))]
async fn request_return(
    State(state): State<AppState>,
    user: CurrentUser,
    AppJson(request): AppJson<ReturnItemRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&request)?;
    let item = state
        .services
        .reversals
        .request_return(
            user.user_id,
            request.order_id,
            request.product_id,
            request.return_reason,
        )
        .await?;
    Ok(success_response(item))
}

#[instrument(skip(state))]
async fn repay(
    State(state): State<AppState>,
    user: CurrentUser,
    AppJson(request): AppJson<RepayRequest>,
) -> Result<Response, ServiceError> {
    let order = state
        .services
        .payments
        .repay(user.user_id, request.order_id)
        .await?;
    Ok(success_response(RepayResponse { order }))
}

#[instrument(skip(state))]
async fn repayment_confirm(
    State(state): State<AppState>,
    user: CurrentUser,
    AppJson(request): AppJson<RepaymentConfirmRequest>,
) -> Result<Response, ServiceError> {
    let order = state
        .services
        .payments
        .confirm_repayment(user.user_id, request.order_id)
        .await?;
    Ok(success_response(order))
}
