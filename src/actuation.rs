//! Contracts of the external collaborators the scheduler drives.

use std::time::Duration;

use crate::lanes::LaneState;
use crate::types::{Arm, Part, Product};

/// Motion and gripper primitives of the dual-arm robot.
///
/// Implementations own trajectory planning and gripper actuation; the
/// scheduler only sequences the calls and reads the placement outcome.
pub trait Actuator {
    /// Move over (x, y); returns the y actually reached.
    fn move_to_offset(&mut self, x: f64, y: f64) -> f64;

    fn pick(&mut self, part: &Part);

    /// Place the held part on the lane; `true` when the part ended up in its slot.
    fn place(&mut self, product: &Product, lane: &str, arm: Arm, lane_state: &mut LaneState) -> bool;

    /// Hand the part over to turn it upside down.
    fn flip(&mut self);

    fn activate_gripper(&mut self, arm: Arm);

    fn deactivate_gripper(&mut self, arm: Arm);

    /// Return to the home/staging preset.
    fn move_to_home(&mut self);
}

/// Releases completed shipments to downstream processing.
pub trait Dispatcher {
    fn dispatch_shipment(&mut self, lane: &str, shipment_type: &str);
}

/// Competition lifecycle around a run.
pub trait Competition: Dispatcher {
    fn start(&mut self);

    fn state(&self) -> String;

    /// Competition clock since start.
    fn clock(&self) -> Duration;

    fn end_competition(&mut self);
}

impl<A: Actuator + ?Sized> Actuator for &mut A {
    fn move_to_offset(&mut self, x: f64, y: f64) -> f64 {
        (**self).move_to_offset(x, y)
    }

    fn pick(&mut self, part: &Part) {
        (**self).pick(part)
    }

    fn place(&mut self, product: &Product, lane: &str, arm: Arm, lane_state: &mut LaneState) -> bool {
        (**self).place(product, lane, arm, lane_state)
    }

    fn flip(&mut self) {
        (**self).flip()
    }

    fn activate_gripper(&mut self, arm: Arm) {
        (**self).activate_gripper(arm)
    }

    fn deactivate_gripper(&mut self, arm: Arm) {
        (**self).deactivate_gripper(arm)
    }

    fn move_to_home(&mut self) {
        (**self).move_to_home()
    }
}

impl<D: Dispatcher + ?Sized> Dispatcher for &mut D {
    fn dispatch_shipment(&mut self, lane: &str, shipment_type: &str) {
        (**self).dispatch_shipment(lane, shipment_type)
    }
}
