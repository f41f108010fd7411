//! API error types

use axum::{
    extract::{multipart::MultipartError, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use luckychat_billing::BillingError;
use serde_json::json;
use thiserror::Error;

use crate::storage::StorageError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Upstream service error: {0}")]
    Upstream(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::InvalidSignature => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::InvalidSignature => "invalid_signature",
            ApiError::Upstream(_) => "upstream_error",
            ApiError::Database(_) => "database_error",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Server-side details stay in the logs
        let message = match &self {
            ApiError::Database(detail) | ApiError::Internal(detail) => {
                tracing::error!(error = %detail, code = self.code(), "Request failed");
                "Internal server error".to_string()
            }
            ApiError::Upstream(detail) => {
                tracing::warn!(error = %detail, code = self.code(), "Upstream call failed");
                self.to_string()
            }
            _ => self.to_string(),
        };

        let body = Json(json!({
            "error": self.code(),
            "message": message,
        }));

        (status, body).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InvalidInput(msg) => ApiError::Validation(msg),
            BillingError::PackageNotFound(id) => {
                ApiError::NotFound(format!("Package not found: {}", id))
            }
            BillingError::PackageNotProvisioned(_)
            | BillingError::CustomerNotLinked(_)
            | BillingError::EventInProgress(_) => ApiError::Conflict(err.to_string()),
            BillingError::WebhookSignatureInvalid => ApiError::InvalidSignature,
            BillingError::CheckoutCreationFailed(_)
            | BillingError::StripeApi(_)
            | BillingError::VendorTimeout(_) => ApiError::Upstream(err.to_string()),
            BillingError::Database(msg) => ApiError::Database(msg),
            BillingError::InvalidCatalog(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidInput(msg) => ApiError::Validation(msg),
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Database(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::Validation(err.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_billing_error_status_mapping() {
        let cases = [
            (BillingError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (BillingError::PackageNotFound("x".into()), StatusCode::NOT_FOUND),
            (BillingError::PackageNotProvisioned("x".into()), StatusCode::CONFLICT),
            (BillingError::CheckoutCreationFailed("x".into()), StatusCode::BAD_GATEWAY),
            (BillingError::VendorTimeout(30), StatusCode::BAD_GATEWAY),
            (BillingError::WebhookSignatureInvalid, StatusCode::BAD_REQUEST),
            (BillingError::CustomerNotLinked("cus".into()), StatusCode::CONFLICT),
            (BillingError::EventInProgress("evt".into()), StatusCode::CONFLICT),
            (BillingError::Database("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            let label = err.to_string();
            assert_eq!(ApiError::from(err).status(), expected, "{}", label);
        }
    }

    #[tokio::test]
    async fn test_database_details_not_leaked() {
        let response = ApiError::Database("relation user_ledger does not exist".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "database_error");
        assert_eq!(body["message"], "Internal server error");
    }
}
