//! Modbus gateway for the ectoControl boiler adapter.
//!
//! All register access goes through one [`gateway::Gateway`] which serializes concurrent
//! requests onto a single link and confirms writes through the adapter's status registers.
//! The [`register`] codec turns raw words into typed values, [`scan`] polls them periodically.

pub mod config;
pub mod error;
pub mod gateway;
pub mod net;
pub mod register;
pub mod replay;
pub mod scan;
pub mod signal;


pub use config::AppConfig;
pub use error::{Error, Result};
pub use gateway::Gateway;
