// services/registry.rs
use std::sync::Arc;

use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::{Collection, Database};
use tokio::sync::RwLock;

use crate::errors::Result;
use crate::models::vehicle::Vehicle;

/// Vehicle registry collaborator. The payment flow only ever needs the
/// existence check by plate; the registration handlers own the writes.
#[async_trait]
pub trait VehicleRegistry: Send + Sync {
    async fn register(&self, vehicle: Vehicle) -> Result<()>;
    async fn find_by_plate(&self, plate: &str) -> Result<Option<Vehicle>>;
}

#[derive(Clone)]
pub struct MongoVehicleRegistry {
    collection: Collection<Vehicle>,
}

impl MongoVehicleRegistry {
    pub fn new(db: &Database) -> Self {
        MongoVehicleRegistry {
            collection: db.collection("vehicles"),
        }
    }
}

#[async_trait]
impl VehicleRegistry for MongoVehicleRegistry {
    async fn register(&self, vehicle: Vehicle) -> Result<()> {
        self.collection.insert_one(&vehicle).await?;
        Ok(())
    }

    async fn find_by_plate(&self, plate: &str) -> Result<Option<Vehicle>> {
        Ok(self
            .collection
            .find_one(doc! { "license_plate": plate })
            .await?)
    }
}

/// In-memory registry used by tests.
#[derive(Default, Clone)]
pub struct InMemoryVehicleRegistry {
    rows: Arc<RwLock<Vec<Vehicle>>>,
}

impl InMemoryVehicleRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VehicleRegistry for InMemoryVehicleRegistry {
    async fn register(&self, vehicle: Vehicle) -> Result<()> {
        self.rows.write().await.push(vehicle);
        Ok(())
    }

    async fn find_by_plate(&self, plate: &str) -> Result<Option<Vehicle>> {
        let rows = self.rows.read().await;
        Ok(rows.iter().find(|v| v.license_plate == plate).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn vehicle(plate: &str) -> Vehicle {
        Vehicle {
            id: None,
            license_plate: plate.into(),
            owner_name: "Jane Wanjiku".into(),
            car_type: "Saloon".into(),
            brand: "Toyota".into(),
            color: "White".into(),
            contact: "0712345678".into(),
            registration_date: "2024-03-01".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn registered_vehicle_is_found_by_plate() {
        let registry = InMemoryVehicleRegistry::new();
        registry.register(vehicle("KAA001A")).await.unwrap();

        let found = registry.find_by_plate("KAA001A").await.unwrap();
        assert_eq!(found.unwrap().owner_name, "Jane Wanjiku");
    }

    #[tokio::test]
    async fn unknown_plate_is_a_miss() {
        let registry = InMemoryVehicleRegistry::new();
        registry.register(vehicle("KAA001A")).await.unwrap();

        assert!(registry.find_by_plate("ZZZ999Z").await.unwrap().is_none());
    }
}
