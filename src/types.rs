//! Shared identifiers and the order/part model used across the system.

use std::fmt;

use nalgebra::{Isometry3, Quaternion, Translation3, UnitQuaternion};

/// Identifier of a destination lane (an AGV tray).
pub type LaneId = String;
/// Identifier of a localization sensor (a logical camera).
pub type SensorId = String;
/// Sequence number of a shipment within its order.
pub type ShipmentSeq = u32;

/// Orientation component value marking a part that must be flipped.
const INVERTED_SENTINEL: f64 = 1.0;

/// 6-DoF pose: translation plus unit-quaternion rotation.
#[derive(Clone, Debug, PartialEq)]
pub struct Pose {
    pub transform: Isometry3<f64>,
}

impl Pose {
    /// Build a pose from a position and quaternion components as reported by
    /// the feeds. The quaternion is taken as already normalised.
    pub fn new(position: [f64; 3], orientation: [f64; 4]) -> Self {
        let [qx, qy, qz, qw] = orientation;
        let rotation = UnitQuaternion::new_unchecked(Quaternion::new(qw, qx, qy, qz));
        Self {
            transform: Isometry3::from_parts(
                Translation3::new(position[0], position[1], position[2]),
                rotation,
            ),
        }
    }

    /// Pose at the given position with identity rotation.
    pub fn from_translation(x: f64, y: f64, z: f64) -> Self {
        Self {
            transform: Isometry3::translation(x, y, z),
        }
    }

    pub fn translation(&self) -> (f64, f64, f64) {
        let t = &self.transform.translation;
        (t.x, t.y, t.z)
    }

    /// The quaternion x component.
    pub fn orientation_x(&self) -> f64 {
        self.transform.rotation.quaternion().i
    }

    /// True when the orientation x component sits on either sentinel extreme.
    pub fn is_inverted(&self) -> bool {
        let x = self.orientation_x();
        x == INVERTED_SENTINEL || x == -INVERTED_SENTINEL
    }

    /// Copy of this pose shifted in the plane by (dx, dy).
    pub fn shifted(&self, dx: f64, dy: f64) -> Self {
        let mut transform = self.transform;
        transform.translation.x += dx;
        transform.translation.y += dy;
        Self { transform }
    }
}

/// What a sensor reports for one physical object, before it is stamped.
#[derive(Clone, Debug, PartialEq)]
pub struct PartSighting {
    pub part_type: String,
    pub pose: Pose,
}

impl PartSighting {
    pub fn new(part_type: impl Into<String>, pose: Pose) -> Self {
        Self {
            part_type: part_type.into(),
            pose,
        }
    }
}

/// An observed physical part. Immutable once observed; a retry replaces it
/// with a fresher observation.
#[derive(Clone, Debug, PartialEq)]
pub struct Part {
    pub part_type: String,
    pub pose: Pose,
    pub source: SensorId,
    /// Observation sequence number; higher means fresher.
    pub seq: u64,
}

/// A product requested by a shipment: what to build and where it goes on the tray.
#[derive(Clone, Debug, PartialEq)]
pub struct ProductSpec {
    pub product_type: String,
    pub target_pose: Pose,
}

impl ProductSpec {
    pub fn new(product_type: impl Into<String>, target_pose: Pose) -> Self {
        Self {
            product_type: product_type.into(),
            target_pose,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Shipment {
    pub sequence: ShipmentSeq,
    pub lane: LaneId,
    pub shipment_type: String,
    pub products: Vec<ProductSpec>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Order {
    pub order_id: String,
    pub shipments: Vec<Shipment>,
}

/// The identity of a shipment as seen by boundary detection and dispatch.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShipmentRef {
    pub sequence: ShipmentSeq,
    pub lane: LaneId,
    pub shipment_type: String,
}

impl ShipmentRef {
    pub fn of(shipment: &Shipment) -> Self {
        Self {
            sequence: shipment.sequence,
            lane: shipment.lane.clone(),
            shipment_type: shipment.shipment_type.clone(),
        }
    }
}

impl fmt::Display for ShipmentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.shipment_type, self.sequence, self.lane)
    }
}

/// A build request bound to an observed part.
#[derive(Clone, Debug, PartialEq)]
pub struct Product {
    pub product_type: String,
    pub target_pose: Pose,
    pub assigned_part: Part,
    pub lane: LaneId,
    /// Pose the motion layer works from: the part pose until staging, the
    /// target pose afterwards.
    pub working_pose: Pose,
}

impl Product {
    pub fn new(spec: ProductSpec, lane: LaneId, part: Part) -> Self {
        let working_pose = part.pose.clone();
        Self {
            product_type: spec.product_type,
            target_pose: spec.target_pose,
            assigned_part: part,
            lane,
            working_pose,
        }
    }

    /// Replace the assigned part with a fresher observation.
    pub fn reassign(&mut self, part: Part) {
        self.working_pose = part.pose.clone();
        self.assigned_part = part;
    }
}

/// One pulled unit of work: a product plus the shipment it belongs to.
#[derive(Clone, Debug, PartialEq)]
pub struct BuildItem {
    pub shipment: ShipmentRef,
    pub product: Product,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Arm {
    #[default]
    Left,
    Right,
}

impl Arm {
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Left => "left_arm",
            Self::Right => "right_arm",
        }
    }
}

impl fmt::Display for Arm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}
