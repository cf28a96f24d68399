//! Error types for fulfillment, localization, and configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::types::{LaneId, ShipmentRef};

/// Per-product failures surfaced by the scheduler loop.
#[derive(Debug, thiserror::Error)]
pub enum FulfillmentError {
    /// No matching (fresh) part observation arrived within the configured bound.
    #[error("no observation of {part_type} for shipment {shipment} within {waited:?}")]
    LocalizationTimeout {
        shipment: ShipmentRef,
        part_type: String,
        waited: Duration,
    },

    /// Placement kept failing until the per-product attempt cap was reached.
    #[error("placement of {product_type} for shipment {shipment} failed after {attempts} attempts")]
    RetriesExhausted {
        shipment: ShipmentRef,
        product_type: String,
        attempts: u32,
    },

    /// The product names a lane that is not on the lane board.
    #[error("lane {lane} is not configured")]
    UnknownLane { lane: LaneId },

    /// The shutdown signal fired while the scheduler was working or waiting.
    #[error("fulfillment cancelled")]
    Cancelled,
}

/// Failures of a blocking part claim, before a shipment is attached.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LocateError {
    #[error("no observation of {part_type} within {waited:?}")]
    TimedOut { part_type: String, waited: Duration },

    #[error("part claim cancelled")]
    Cancelled,
}

impl LocateError {
    /// Attach the shipment the claim was made for.
    pub fn for_shipment(self, shipment: &ShipmentRef) -> FulfillmentError {
        match self {
            Self::TimedOut { part_type, waited } => FulfillmentError::LocalizationTimeout {
                shipment: shipment.clone(),
                part_type,
                waited,
            },
            Self::Cancelled => FulfillmentError::Cancelled,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
