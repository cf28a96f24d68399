//! Shipment boundary detection over the pulled product stream.

use crate::types::ShipmentRef;

/// What crossing into a pulled product's shipment means for the previous one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BoundaryDecision {
    /// First shipment seen; adopted without dispatch.
    Opened,
    /// Same shipment sequence as the current one.
    Unchanged,
    /// Sequence went up: the previous shipment is dropped from bookkeeping
    /// without a ship call.
    Abandoned { previous: ShipmentRef },
    /// Sequence went down: the previous shipment must be shipped before the
    /// new one is adopted.
    DispatchPrevious { previous: ShipmentRef },
}

/// Scheduler cursor: the shipment being built.
#[derive(Debug, Default)]
pub struct ShipmentCursor {
    current: Option<ShipmentRef>,
}

impl ShipmentCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track the shipment of a freshly pulled product.
    ///
    /// Only a decreasing sequence triggers a dispatch of the previous
    /// shipment; an increasing one abandons it. Any transition replaces the
    /// tracked shipment.
    pub fn observe(&mut self, shipment: &ShipmentRef) -> BoundaryDecision {
        if self
            .current
            .as_ref()
            .is_some_and(|current| current.sequence == shipment.sequence)
        {
            return BoundaryDecision::Unchanged;
        }
        match self.current.replace(shipment.clone()) {
            None => BoundaryDecision::Opened,
            Some(previous) if previous.sequence > shipment.sequence => {
                BoundaryDecision::DispatchPrevious { previous }
            }
            Some(previous) => BoundaryDecision::Abandoned { previous },
        }
    }

    pub fn current(&self) -> Option<&ShipmentRef> {
        self.current.as_ref()
    }
}
