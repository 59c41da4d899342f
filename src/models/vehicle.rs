use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub license_plate: String,
    pub owner_name: String,
    pub car_type: String,
    pub brand: String,
    pub color: String,
    pub contact: String,
    pub registration_date: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterVehicle {
    pub license_plate: String,
    pub owner_name: String,
    pub car_type: String,
    pub brand: String,
    pub color: String,
    pub contact: String,
    pub registration_date: String,
}
