//! Error taxonomy for the core.
//!
//! The matching core never swallows errors silently: every fallible
//! operation returns an [`ApiError`] variant, and the service layer is
//! responsible for translating book/ledger outcomes into the right class
//! before they reach the edge (HTTP) layer.

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

use crate::ledger::store::StoreError;

/// Domain error classes, each mapped to a fixed HTTP status by `IntoResponse`.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Malformed payload, out-of-range quantity/price. 422.
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing/invalid token, wrong role. 403.
    #[error("authorization error: {0}")]
    Authorization(String),

    /// Missing user/order/instrument. 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// Insufficient funds, cancel of terminal order, unfillable market order, etc. 400.
    #[error("domain conflict: {0}")]
    DomainConflict(String),

    /// Invariant breach: book/ledger divergence, negative balance, market
    /// order ending with `filled != qty`. 500, logged with full context.
    #[error("consistency violation: {0}")]
    Consistency(String),

    /// Ledger contention/serialization failure, exhausted after bounded retry. 5xx.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Catch-all for unexpected I/O failures from the durable store.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Authorization(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::DomainConflict(_) => StatusCode::BAD_REQUEST,
            ApiError::Consistency(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        if matches!(self, ApiError::Consistency(_)) {
            tracing::error!(error = %self, "invariant violation");
        }
        let status = self.status();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}
