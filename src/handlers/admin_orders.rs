use axum::{
    extract::{Query, State},
    response::Response,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tracing::instrument;
use uuid::Uuid;

use super::common::{redirect, success_response, IdQuery};
use super::extractors::AppJson;
use crate::entities::ItemStatus;
use crate::errors::ServiceError;
use crate::services::orders::AdminOrderQuery;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeStatusRequest {
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub status: ItemStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnDecisionRequest {
    pub order_id: Uuid,
    pub product_id: Uuid,
    #[serde(default)]
    pub reason: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/admin/orders", get(list_orders))
        .route("/admin/orders/details", get(order_details))
        .route("/admin/orders/status", post(change_status))
        .route("/admin/orders/approve-return", post(approve_return))
        .route("/admin/orders/decline-return", post(decline_return))
}

async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<AdminOrderQuery>,
) -> Result<Response, ServiceError> {
    let page = state.services.orders.admin_list(query).await?;
    Ok(success_response(page))
}

async fn order_details(
    State(state): State<AppState>,
    Query(query): Query<IdQuery>,
) -> Result<Response, ServiceError> {
    let Some(order_id) = query.parsed() else {
        return Ok(redirect("/admin/orders"));
    };
    match state.services.orders.admin_detail(order_id).await {
        Ok(detail) => Ok(success_response(detail)),
        Err(ServiceError::NotFound(_)) => Ok(redirect("/admin/orders")),
        Err(err) => Err(err),
    }
}

#[instrument(skip(state))]
async fn change_status(
    State(state): State<AppState>,
    AppJson(request): AppJson<ChangeStatusRequest>,
) -> Result<Response, ServiceError> {
    let outcome = state
        .services
        .reversals
        .admin_change_status(request.order_id, request.product_id, request.status)
        .await?;
    Ok(success_response(outcome))
}

#[instrument(skip(state))]
async fn approve_return(
    State(state): State<AppState>,
    AppJson(request): AppJson<ReturnDecisionRequest>,
) -> Result<Response, ServiceError> {
    let outcome = state
        .services
        .reversals
        .approve_return(request.order_id, request.product_id, request.reason)
        .await?;
    Ok(success_response(outcome))
}

#[instrument(skip(state))]
async fn decline_return(
    State(state): State<AppState>,
    AppJson(request): AppJson<ReturnDecisionRequest>,
) -> Result<Response, ServiceError> {
    let item = state
        .services
        .reversals
        .decline_return(request.order_id, request.product_id)
        .await?;
    Ok(success_response(item))
}
