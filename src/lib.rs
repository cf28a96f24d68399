//! Kitting fulfillment scheduler: turns incoming orders into pick-and-place
//! cycles, routes products to lanes, and ships each lane when its shipment
//! is left behind.

pub mod actuation;
pub mod boundary;
pub mod build_queue;
pub mod config;
pub mod cycle;
pub mod error;
pub mod lanes;
pub mod localization;
pub mod logging;
pub mod scheduler;
pub mod sensor_health;
pub mod session;
pub mod shutdown;
pub mod sim;
pub mod types;
