//! Fulfillment scheduler: drains the build queue one product at a time,
//! tracks shipment boundaries, and ships completed shipments.

use std::sync::Arc;

use tracing::{info, warn};

use crate::actuation::{Actuator, Dispatcher};
use crate::boundary::{BoundaryDecision, ShipmentCursor};
use crate::build_queue::BuildQueue;
use crate::config::SchedulerConfig;
use crate::cycle::PlacementCycle;
use crate::error::FulfillmentError;
use crate::lanes::LaneBoard;
use crate::shutdown::ShutdownSignal;
use crate::types::{Arm, BuildItem, LaneId, ShipmentRef};

/// A product that reached `DONE`.
#[derive(Clone, Debug, PartialEq)]
pub struct PlacedProduct {
    pub shipment: ShipmentRef,
    pub product_type: String,
    pub lane: LaneId,
    pub arm: Arm,
    pub attempts: u32,
}

/// A product reported as a fulfillment failure instead of being retried forever.
#[derive(Clone, Debug, PartialEq)]
pub struct ProductFailure {
    pub shipment: ShipmentRef,
    pub product_type: String,
    pub reason: String,
}

/// Everything a run did, in order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FulfillmentReport {
    pub placed: Vec<PlacedProduct>,
    pub failures: Vec<ProductFailure>,
    pub dispatched: Vec<ShipmentRef>,
    /// Shipments dropped by an increasing sequence transition, never shipped.
    pub abandoned: Vec<ShipmentRef>,
    pub cancelled: bool,
}

impl FulfillmentReport {
    /// Total placement attempts across placed products.
    pub fn place_attempts(&self) -> u32 {
        self.placed.iter().map(|placed| placed.attempts).sum()
    }

    /// True when no product of the shipment failed.
    pub fn is_complete(&self, shipment: &ShipmentRef) -> bool {
        !self.failures.iter().any(|failure| &failure.shipment == shipment)
    }
}

/// Single-threaded control loop: at most one product is in flight.
pub struct Scheduler<A, D> {
    config: SchedulerConfig,
    queue: Arc<BuildQueue>,
    actuator: A,
    dispatcher: D,
    lanes: LaneBoard,
    cursor: ShipmentCursor,
    shutdown: ShutdownSignal,
    report: FulfillmentReport,
}

impl<A: Actuator, D: Dispatcher> Scheduler<A, D> {
    pub fn new(
        config: SchedulerConfig,
        queue: Arc<BuildQueue>,
        actuator: A,
        dispatcher: D,
        shutdown: ShutdownSignal,
    ) -> Self {
        let lanes = LaneBoard::new(config.lanes.iter().cloned());
        Self {
            config,
            queue,
            actuator,
            dispatcher,
            lanes,
            cursor: ShipmentCursor::new(),
            shutdown,
            report: FulfillmentReport::default(),
        }
    }

    pub fn lanes(&self) -> &LaneBoard {
        &self.lanes
    }

    /// Run until the queue is closed and drained, or shutdown fires.
    ///
    /// Per-product failures are recorded in the report and the loop moves on.
    /// On a normal exit the robot goes home and the last shipment is shipped.
    pub fn run(&mut self) -> FulfillmentReport {
        loop {
            if self.shutdown.is_triggered() {
                self.report.cancelled = true;
                break;
            }
            match self.queue.next(&self.shutdown) {
                Ok(Some(item)) => {
                    self.track_boundary(&item.shipment);
                    self.fulfill(item);
                }
                Ok(None) => break,
                Err(err @ FulfillmentError::LocalizationTimeout { .. }) => self.skip_unlocated(err),
                Err(FulfillmentError::Cancelled) => self.report.cancelled = true,
                Err(err) => warn!(error = %err, "unexpected build queue error"),
            }
            if self.report.cancelled {
                break;
            }
        }

        if self.report.cancelled {
            warn!("fulfillment cancelled, current shipment left unshipped");
        } else {
            self.actuator.move_to_home();
            if let Some(last) = self.cursor.current().cloned() {
                self.dispatch(last);
            }
        }
        std::mem::take(&mut self.report)
    }

    /// Keep boundary bookkeeping for a product whose part never showed up,
    /// then report it failed.
    fn skip_unlocated(&mut self, err: FulfillmentError) {
        let FulfillmentError::LocalizationTimeout {
            shipment, part_type, ..
        } = &err
        else {
            return;
        };
        self.track_boundary(shipment);
        let silent = self
            .queue
            .locator()
            .silent_sensors(self.config.sensor_silence());
        warn!(error = %err, ?silent, "skipping product without part observation");
        self.record_failure(shipment.clone(), part_type.clone(), &err);
    }

    fn track_boundary(&mut self, shipment: &ShipmentRef) {
        match self.cursor.observe(shipment) {
            BoundaryDecision::Unchanged => {}
            BoundaryDecision::Opened => {
                info!(shipment = %shipment, "shipment opened");
            }
            BoundaryDecision::Abandoned { previous } => {
                warn!(
                    previous = %previous,
                    shipment = %shipment,
                    "sequence increased, previous shipment left without ship call"
                );
                self.report.abandoned.push(previous);
            }
            BoundaryDecision::DispatchPrevious { previous } => {
                self.actuator.move_to_home();
                self.dispatch(previous);
                info!(shipment = %shipment, "shipment opened");
            }
        }
    }

    fn fulfill(&mut self, item: BuildItem) {
        let BuildItem {
            shipment,
            mut product,
        } = item;
        // Every product starts on the left arm; a flip moves it right.
        let mut arm = Arm::Left;

        let Some(lane_state) = self.lanes.get_mut(&product.lane) else {
            let err = FulfillmentError::UnknownLane {
                lane: product.lane.clone(),
            };
            warn!(shipment = %shipment, error = %err, "product routed to unknown lane");
            self.record_failure(shipment, product.product_type, &err);
            return;
        };

        let queue = &self.queue;
        let shutdown = &self.shutdown;
        let result = PlacementCycle::new(
            &mut self.actuator,
            self.config.staging_x_offset,
            self.config.max_place_attempts(),
            shutdown,
        )
        .run(&shipment, &mut product, lane_state, &mut arm, |product| {
            queue.requery(&shipment, product, shutdown)
        });

        match result {
            Ok(outcome) => self.report.placed.push(PlacedProduct {
                shipment,
                product_type: product.product_type,
                lane: product.lane,
                arm: outcome.arm,
                attempts: outcome.attempts,
            }),
            Err(FulfillmentError::Cancelled) => self.report.cancelled = true,
            Err(err) => {
                warn!(error = %err, "product not fulfilled");
                self.record_failure(shipment, product.product_type, &err);
            }
        }
    }

    fn dispatch(&mut self, shipment: ShipmentRef) {
        if !self.report.is_complete(&shipment) {
            warn!(shipment = %shipment, "dispatching shipment with unfulfilled products");
        }
        info!(shipment = %shipment, "dispatching shipment");
        self.dispatcher
            .dispatch_shipment(&shipment.lane, &shipment.shipment_type);
        self.report.dispatched.push(shipment);
    }

    fn record_failure(&mut self, shipment: ShipmentRef, product_type: String, err: &FulfillmentError) {
        self.report.failures.push(ProductFailure {
            shipment,
            product_type,
            reason: err.to_string(),
        });
    }
}
