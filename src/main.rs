use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::{http::Method, response::Json, routing::get, Router};
use mongodb::bson::doc;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use tollgate_api::config::AppConfig;
use tollgate_api::services::mpesa::MpesaGateway;
use tollgate_api::state::AppState;
use tollgate_api::{database, routes};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // missing configuration or an unreachable database is startup-fatal;
    // nothing past this point is allowed to take the process down
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let db = match database::connection::connect(&config.database_url).await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!("failed to connect to MongoDB: {}", e);
            std::process::exit(1);
        }
    };

    let host = config.host.clone();
    let port = config.port;
    let toll_amount = config.toll_amount;
    tracing::info!(
        "M-Pesa environment: {} (shortcode {})",
        config.mpesa_environment,
        config.mpesa_short_code
    );

    let mpesa = Arc::new(MpesaGateway::new(config));
    match mpesa.refresh_token().await {
        Ok(_) => tracing::info!("M-Pesa credentials verified"),
        // transient: the inline refresh on the first request will retry
        Err(e) => tracing::warn!("could not obtain initial M-Pesa token: {}", e),
    }
    mpesa.spawn_token_refresh();

    let app_state = AppState::new(db, mpesa, toll_amount);
    let app = build_router(app_state);
    start_server(app, &host, port).await;
}

fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_check))
        .route("/api/health", get(api_health_check))
        .nest("/api/vehicles", routes::vehicles::routes())
        .nest("/api/payments", routes::payments::routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

async fn start_server(app: Router, host: &str, port: u16) {
    let addr: SocketAddr = match format!("{}:{}", host, port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!("invalid listen address {}:{}: {}", host, port, e);
            std::process::exit(1);
        }
    };

    tracing::info!("server starting on {}", addr);
    match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("server error: {}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            tracing::error!("failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    }
}

async fn root_handler() -> &'static str {
    "Toll Payment API"
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn api_health_check(State(state): State<AppState>) -> Json<Value> {
    let db_status = match state.db.run_command(doc! { "ping": 1 }).await {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };

    Json(json!({
        "status": "healthy",
        "database": db_status,
        "mpesa_token_cached": state.mpesa.has_cached_token(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
