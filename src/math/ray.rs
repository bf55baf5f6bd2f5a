//! Ray type used by the far-mesh scanners

use crate::core::types::{NodePos, Vec3};

/// A ray defined by origin and direction
#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    /// Create a new ray, normalizing the direction
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize_or_zero(),
        }
    }

    /// Get point along ray at parameter t
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Node at parameter t, floored onto a grid of `align` nodes
    pub fn aligned_at(&self, t: f32, align: i32) -> NodePos {
        let p = self.at(t);
        let align = align.max(1) as f32;
        NodePos::new(
            ((p.x / align).floor() * align) as i32,
            ((p.y / align).floor() * align) as i32,
            ((p.z / align).floor() * align) as i32,
        )
    }
}
