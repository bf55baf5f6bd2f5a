//! Procedural terrain and visibility

pub mod generator;
pub use generator::{TerrainGenerator, TerrainParams};

pub mod biome;
pub use biome::{Biome, BiomeMap};

pub mod oracle;
pub use oracle::{FlatWorld, VisibilityOracle};
