//! Farmesh - distance-driven far terrain streaming for voxel worlds

pub mod core;
pub mod math;
pub mod voxel;
pub mod terrain;
pub mod streaming;

pub use crate::core::{Error, FarConfig, FarParams, Result};
