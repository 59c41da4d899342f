// src/errors.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("MongoDB error: {0}")]
    MongoDB(#[from] mongodb::error::Error),

    #[error("M-Pesa credential acquisition failed: {0}")]
    UpstreamAuth(String),

    #[error("M-Pesa gateway unreachable: {0}")]
    GatewayUnreachable(String),

    #[error("payment rejected by gateway: {0}")]
    PaymentRejected(String),

    #[error("vehicle not registered")]
    VehicleNotFound,

    #[error("transaction not found")]
    TransactionNotFound,

    #[error("invalid ObjectId: {0}")]
    InvalidObjectId(#[from] mongodb::bson::oid::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // The verification UI keys off `registered` for the unknown-plate case.
        if matches!(self, AppError::VehicleNotFound) {
            let body = Json(json!({
                "registered": false,
                "success": false,
                "message": "Vehicle not found. Please register first.",
            }));
            return (StatusCode::NOT_FOUND, body).into_response();
        }

        let (status, error_message) = match &self {
            AppError::MongoDB(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Database error"),
            AppError::UpstreamAuth(_) => (StatusCode::BAD_GATEWAY, "Gateway authentication failed"),
            AppError::GatewayUnreachable(_) => (StatusCode::BAD_GATEWAY, "Gateway unreachable"),
            AppError::PaymentRejected(_) => (StatusCode::PAYMENT_REQUIRED, "Payment rejected"),
            AppError::VehicleNotFound => (StatusCode::NOT_FOUND, "Vehicle not found"),
            AppError::TransactionNotFound => (StatusCode::NOT_FOUND, "Transaction not found"),
            AppError::InvalidObjectId(_) => (StatusCode::BAD_REQUEST, "Invalid ID format"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "Validation failed"),
            AppError::Configuration(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Configuration error")
            }
        };

        let body = Json(json!({
            "error": error_message,
            "message": self.to_string(),
            "success": false,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::GatewayUnreachable(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Validation(format!("JSON parsing error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
