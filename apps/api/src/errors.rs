use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
///
/// The 401 variants are deliberately split: a missing/expired token
/// (`Unauthenticated`) renders differently on the client than a live session
/// whose account or institution license is no longer usable.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Account inactive: {0}")]
    AccountInactive(String),

    #[error("Institution license expired")]
    LicenseExpired,

    #[error("Upgrade required: {0}")]
    UpgradeRequired(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("No seats available")]
    NoSeatsAvailable,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Payment provider not configured")]
    BillingNotConfigured,

    #[error("Upstream provider error: {0}")]
    Upstream(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "AUTHENTICATION_REQUIRED",
                "Authentication required".to_string(),
            ),
            AppError::AccountInactive(msg) => {
                (StatusCode::UNAUTHORIZED, "ACCOUNT_INACTIVE", msg.clone())
            }
            AppError::LicenseExpired => (
                StatusCode::UNAUTHORIZED,
                "LICENSE_EXPIRED",
                "Your institution's license is not currently valid".to_string(),
            ),
            AppError::UpgradeRequired(msg) => {
                // Carries requires_upgrade so the client routes to the upsell
                // view instead of a generic error page.
                let body = Json(json!({
                    "error": {
                        "code": "UPGRADE_REQUIRED",
                        "message": msg,
                        "requires_upgrade": true
                    }
                }));
                return (StatusCode::FORBIDDEN, body).into_response();
            }
            AppError::Forbidden => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "Access denied".to_string(),
            ),
            AppError::NoSeatsAvailable => (
                StatusCode::BAD_REQUEST,
                "NO_SEATS_AVAILABLE",
                "This institution has no remaining licensed seats".to_string(),
            ),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::BillingNotConfigured => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "BILLING_NOT_CONFIGURED",
                "Payment provider not configured".to_string(),
            ),
            AppError::Upstream(msg) => {
                tracing::error!("Upstream provider error: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "UPSTREAM_ERROR",
                    "An external service is unavailable, please try again later".to_string(),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
