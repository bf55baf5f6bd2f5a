//! Visibility predicates used to gate far block requests

use crate::core::types::NodePos;

/// Answers whether a node position holds something worth drawing from afar.
///
/// Implementations must be cheap and deterministic; scanners call them
/// from worker threads many thousands of times per pass.
pub trait VisibilityOracle: Send + Sync {
    /// Position is at or below the ground surface
    fn is_visible(&self, pos: NodePos) -> bool;

    /// Position is below the water surface
    fn is_visible_at_water_level(&self, pos: NodePos) -> bool;
}

/// Flat world with a constant ground height, for tests and benchmarks
#[derive(Clone, Copy, Debug)]
pub struct FlatWorld {
    pub ground: i32,
    pub water_level: i32,
}

impl FlatWorld {
    pub fn new(ground: i32, water_level: i32) -> Self {
        Self { ground, water_level }
    }
}

impl VisibilityOracle for FlatWorld {
    fn is_visible(&self, pos: NodePos) -> bool {
        self.ground >= pos.y
    }

    fn is_visible_at_water_level(&self, pos: NodePos) -> bool {
        pos.y < self.water_level
    }
}
