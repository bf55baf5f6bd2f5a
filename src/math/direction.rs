//! Cardinal directions

use crate::core::types::IVec3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Back,
    Right,
    Front,
    Left,
    Bottom,
    Top,
}

impl Direction {
    /// Scan order: back, right, front, left, bottom, top
    pub const ALL: [Direction; 6] = [
        Direction::Back,
        Direction::Right,
        Direction::Front,
        Direction::Left,
        Direction::Bottom,
        Direction::Top,
    ];

    pub fn vector(self) -> IVec3 {
        match self {
            Direction::Back => IVec3::Z,
            Direction::Right => IVec3::X,
            Direction::Front => IVec3::NEG_Z,
            Direction::Left => IVec3::NEG_X,
            Direction::Bottom => IVec3::NEG_Y,
            Direction::Top => IVec3::Y,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Direction::Back => "back",
            Direction::Right => "right",
            Direction::Front => "front",
            Direction::Left => "left",
            Direction::Bottom => "bottom",
            Direction::Top => "top",
        }
    }
}

/// Face neighbour offsets: back, right, front, left, top, bottom
pub const FACE_NEIGHBORS: [IVec3; 6] = [
    IVec3::new(0, 0, 1),
    IVec3::new(1, 0, 0),
    IVec3::new(0, 0, -1),
    IVec3::new(-1, 0, 0),
    IVec3::new(0, 1, 0),
    IVec3::new(0, -1, 0),
];
