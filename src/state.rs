use std::sync::Arc;

use mongodb::Database;

use crate::services::ledger::{MongoTransactionStore, TransactionStore};
use crate::services::mpesa::MpesaGateway;
use crate::services::registry::{MongoVehicleRegistry, VehicleRegistry};

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub mpesa: Arc<MpesaGateway>,
    pub ledger: Arc<dyn TransactionStore>,
    pub vehicles: Arc<dyn VehicleRegistry>,
    pub toll_amount: u32,
}

impl AppState {
    pub fn new(db: Database, mpesa: Arc<MpesaGateway>, toll_amount: u32) -> Self {
        let ledger = Arc::new(MongoTransactionStore::new(&db));
        let vehicles = Arc::new(MongoVehicleRegistry::new(&db));
        AppState {
            db,
            mpesa,
            ledger,
            vehicles,
            toll_amount,
        }
    }
}
