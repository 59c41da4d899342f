pub mod transaction;
pub mod vehicle;
