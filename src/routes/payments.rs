use axum::{
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use crate::handlers::payments;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(payments_health))
        .route("/initiate", post(payments::initiate_payment))
        .route("/callback", post(payments::mpesa_callback))
        .route("/:id/status", get(payments::transaction_status))
        .route("/transactions", get(payments::list_transactions))
}

async fn payments_health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "payments",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
