pub mod payments;
pub mod vehicles;
