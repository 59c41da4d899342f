// handlers/vehicles.rs
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use crate::errors::{AppError, Result};
use crate::models::vehicle::{RegisterVehicle, Vehicle};
use crate::services::registry::VehicleRegistry;
use crate::state::AppState;

pub async fn register_vehicle(
    State(state): State<AppState>,
    Json(request): Json<RegisterVehicle>,
) -> Result<(StatusCode, Json<Value>)> {
    let plate = request.license_plate.trim().to_uppercase();
    if plate.is_empty() {
        return Err(AppError::Validation("license plate cannot be blank".into()));
    }
    if request.owner_name.trim().is_empty() {
        return Err(AppError::Validation("owner name cannot be blank".into()));
    }

    let vehicle = Vehicle {
        id: None,
        license_plate: plate.clone(),
        owner_name: request.owner_name,
        car_type: request.car_type,
        brand: request.brand,
        color: request.color,
        contact: request.contact,
        registration_date: request.registration_date,
        created_at: Utc::now(),
    };

    state.vehicles.register(vehicle).await?;
    info!("vehicle {} registered", plate);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Successful Registration",
        })),
    ))
}

pub async fn get_vehicle(
    State(state): State<AppState>,
    Path(plate): Path<String>,
) -> Result<Json<Vehicle>> {
    let plate = plate.trim().to_uppercase();
    let vehicle = state
        .vehicles
        .find_by_plate(&plate)
        .await?
        .ok_or(AppError::VehicleNotFound)?;
    Ok(Json(vehicle))
}
