use axum::{
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::errors::ServiceError;
use crate::ApiResponse;

/// Standard success response
pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

/// `{success: true}` with no payload
pub fn ok_response() -> Response {
    (StatusCode::OK, Json(ApiResponse::<()>::ok())).into_response()
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ServiceError> {
    input
        .validate()
        .map_err(|e| ServiceError::ValidationError(format!("Validation failed: {}", e)))
}

/// Page loads answer with a redirect to a safe page instead of an error.
pub fn redirect(to: &'static str) -> Response {
    Redirect::to(to).into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u64>,
}

impl PageQuery {
    pub fn page(&self) -> u64 {
        self.page.unwrap_or(1).max(1)
    }
}

/// `?id=` for detail pages. Kept as text so a malformed id can redirect.
#[derive(Debug, Default, Deserialize)]
pub struct IdQuery {
    pub id: Option<String>,
}

impl IdQuery {
    pub fn parsed(&self) -> Option<Uuid> {
        self.id.as_deref().and_then(|id| Uuid::parse_str(id.trim()).ok())
    }
}
