pub mod ledger;
pub mod mpesa;
pub mod poller;
pub mod registry;
