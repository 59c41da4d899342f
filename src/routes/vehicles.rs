use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::vehicles;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(vehicles::register_vehicle))
        .route("/:plate", get(vehicles::get_vehicle))
}
