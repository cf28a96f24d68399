//! Pick/place/retry state machine for a single product.
//!
//! ```text
//!   ┌──────┐  staged   ┌───────┐  placed   ┌──────┐
//!   │ PICK │──────────▶│ PLACE │──────────▶│ DONE │
//!   └──────┘           └───────┘           └──────┘
//!      ▲                   │
//!      └───── re-query ────┘  (placement failed)
//! ```

use std::fmt;

use tracing::{debug, info, warn};

use crate::actuation::Actuator;
use crate::error::FulfillmentError;
use crate::lanes::LaneState;
use crate::shutdown::ShutdownSignal;
use crate::types::{Arm, Product, ShipmentRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CycleState {
    #[default]
    Pick,
    Place,
    Done,
}

impl CycleState {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    pub fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::Pick => matches!(target, Self::Place),
            Self::Place => matches!(target, Self::Done | Self::Pick),
            Self::Done => false,
        }
    }

    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Pick => "pick",
            Self::Place => "place",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// How a product reached `DONE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Placement attempts, including the successful one.
    pub attempts: u32,
    pub flips: u32,
    /// Arm that performed the successful placement.
    pub arm: Arm,
}

/// Drives one product through pick, staging, optional flip, and place,
/// re-querying its part after every failed placement.
pub struct PlacementCycle<'a, A: ?Sized> {
    actuator: &'a mut A,
    staging_x_offset: f64,
    max_attempts: Option<u32>,
    shutdown: &'a ShutdownSignal,
}

impl<'a, A: Actuator + ?Sized> PlacementCycle<'a, A> {
    /// `max_attempts` of `None` retries until placement succeeds or
    /// `shutdown` fires.
    pub fn new(
        actuator: &'a mut A,
        staging_x_offset: f64,
        max_attempts: Option<u32>,
        shutdown: &'a ShutdownSignal,
    ) -> Self {
        Self {
            actuator,
            staging_x_offset,
            max_attempts,
            shutdown,
        }
    }

    /// Run the product to `DONE`.
    ///
    /// `arm` is the scheduler's active arm; a flip switches it to the right
    /// arm for this and every later attempt of the product. `requery` must
    /// replace the product's part with a fresher observation.
    pub fn run<F>(
        &mut self,
        shipment: &ShipmentRef,
        product: &mut Product,
        lane_state: &mut LaneState,
        arm: &mut Arm,
        mut requery: F,
    ) -> Result<CycleOutcome, FulfillmentError>
    where
        F: FnMut(&mut Product) -> Result<(), FulfillmentError>,
    {
        let mut state = CycleState::Pick;
        let mut attempts = 0u32;
        let mut flips = 0u32;
        loop {
            let next = match state {
                CycleState::Pick => {
                    if self.shutdown.is_triggered() {
                        warn!(
                            shipment = %shipment,
                            product_type = %product.product_type,
                            attempts,
                            "shutdown requested, abandoning product"
                        );
                        return Err(FulfillmentError::Cancelled);
                    }
                    if self.pick_and_stage(product, arm) {
                        flips += 1;
                    }
                    CycleState::Place
                }
                CycleState::Place => {
                    attempts += 1;
                    if self.actuator.place(&*product, &product.lane, *arm, lane_state) {
                        info!(
                            shipment = %shipment,
                            product_type = %product.product_type,
                            arm = %arm,
                            attempts,
                            "product placed"
                        );
                        CycleState::Done
                    } else {
                        if self.max_attempts.is_some_and(|max| attempts >= max) {
                            return Err(FulfillmentError::RetriesExhausted {
                                shipment: shipment.clone(),
                                product_type: product.product_type.clone(),
                                attempts,
                            });
                        }
                        warn!(
                            shipment = %shipment,
                            product_type = %product.product_type,
                            attempt = attempts,
                            "placement failed, re-querying part"
                        );
                        requery(product)?;
                        CycleState::Pick
                    }
                }
                CycleState::Done => {
                    return Ok(CycleOutcome {
                        attempts,
                        flips,
                        arm: *arm,
                    });
                }
            };
            debug_assert!(state.can_transition_to(next), "illegal cycle transition {state} -> {next}");
            state = next;
        }
    }

    /// Approach, pick, retreat to staging, and flip if the target pose needs
    /// the part upside down. Returns whether a flip happened.
    fn pick_and_stage(&mut self, product: &mut Product, arm: &mut Arm) -> bool {
        let (x, y, _) = product.assigned_part.pose.translation();
        let y_reached = self.actuator.move_to_offset(x, -y);
        debug!(
            product_type = %product.product_type,
            sensor = %product.assigned_part.source,
            seq = product.assigned_part.seq,
            "picking part"
        );
        self.actuator.pick(&product.assigned_part);
        self.actuator
            .move_to_offset(x - self.staging_x_offset, -y_reached);
        product.working_pose = product.target_pose.clone();

        if !product.working_pose.is_inverted() {
            return false;
        }
        debug!(product_type = %product.product_type, "flipping part to the right arm");
        self.actuator.flip();
        *arm = Arm::Right;
        self.actuator.activate_gripper(Arm::Right);
        self.actuator.deactivate_gripper(Arm::Left);
        true
    }
}
