//! Domain model: rows, value objects and the datastore ports.

pub mod kyc;
pub mod money;
pub mod phone;
pub mod pin;
pub mod ports;
pub mod quote;
pub mod transaction;
pub mod wallet;
