//! Mathematical utilities

pub mod direction;
pub mod ray;

pub use direction::{Direction, FACE_NEIGHBORS};
pub use ray::Ray;
