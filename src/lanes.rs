//! Per-lane occupancy state, keyed by lane id.

use std::collections::HashMap;

use crate::types::{Arm, LaneId, Pose, Product};

/// A part resting on a lane's tray.
#[derive(Clone, Debug, PartialEq)]
pub struct Placement {
    pub product_type: String,
    pub pose: Pose,
    pub arm: Arm,
}

/// Occupancy of one lane. Mutated only by the placement primitive.
#[derive(Clone, Debug, PartialEq)]
pub struct LaneState {
    lane: LaneId,
    placements: Vec<Placement>,
}

impl LaneState {
    pub fn new(lane: impl Into<LaneId>) -> Self {
        Self {
            lane: lane.into(),
            placements: Vec::new(),
        }
    }

    /// Record a successful placement of the product at its working pose.
    pub fn record_placement(&mut self, product: &Product, arm: Arm) {
        debug_assert_eq!(product.lane, self.lane, "placement routed to the wrong lane");
        self.placements.push(Placement {
            product_type: product.product_type.clone(),
            pose: product.working_pose.clone(),
            arm,
        });
    }

    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    pub fn occupied_slots(&self) -> usize {
        self.placements.len()
    }
}

/// Lane id to lane state, for any number of lanes.
#[derive(Clone, Debug, Default)]
pub struct LaneBoard {
    lanes: HashMap<LaneId, LaneState>,
}

impl LaneBoard {
    pub fn new<I, S>(lanes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<LaneId>,
    {
        let lanes = lanes
            .into_iter()
            .map(|lane| {
                let lane = lane.into();
                (lane.clone(), LaneState::new(lane))
            })
            .collect();
        Self { lanes }
    }

    pub fn get(&self, lane: &str) -> Option<&LaneState> {
        self.lanes.get(lane)
    }

    pub fn get_mut(&mut self, lane: &str) -> Option<&mut LaneState> {
        self.lanes.get_mut(lane)
    }

    /// Occupied slot count per lane, sorted by lane id.
    pub fn occupancy(&self) -> Vec<(LaneId, usize)> {
        let mut occupancy: Vec<_> = self
            .lanes
            .values()
            .map(|state| (state.lane.clone(), state.occupied_slots()))
            .collect();
        occupancy.sort();
        occupancy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Part, ProductSpec};

    fn product(lane: &str) -> Product {
        let part = Part {
            part_type: "gasket_part".to_string(),
            pose: Pose::from_translation(1.0, 1.0, 0.0),
            source: "cam1".to_string(),
            seq: 1,
        };
        Product::new(
            ProductSpec::new("gasket_part", Pose::from_translation(0.1, 0.0, 0.0)),
            lane.to_string(),
            part,
        )
    }

    #[test]
    fn lanes_are_independent() {
        let mut board = LaneBoard::new(["agv1", "agv2"]);
        board
            .get_mut("agv2")
            .expect("agv2")
            .record_placement(&product("agv2"), Arm::Right);
        assert_eq!(board.occupancy(), vec![("agv1".to_string(), 0), ("agv2".to_string(), 1)]);
        assert_eq!(board.get("agv2").expect("agv2").placements()[0].arm, Arm::Right);
    }

    #[test]
    fn unknown_lane_is_absent() {
        let mut board = LaneBoard::new(["agv1"]);
        assert!(board.get_mut("agv9").is_none());
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "placement routed to the wrong lane")]
    fn cross_lane_placement_panics_in_debug() {
        let mut state = LaneState::new("agv1");
        state.record_placement(&product("agv2"), Arm::Left);
    }
}
