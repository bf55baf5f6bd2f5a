//! Biome and climate based on temperature and moisture

use noise::{NoiseFn, Perlin};

use crate::voxel::node::{ContentId, content};

/// Biome types
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Biome {
    Ocean,
    Beach,
    Desert,
    Grassland,
    Savanna,
    Forest,
    Tundra,
    Mountains,
    Snow,
}

impl Biome {
    /// Top layer content for this biome
    pub fn surface_content(&self) -> ContentId {
        match self {
            Biome::Ocean => content::SAND,
            Biome::Beach => content::SAND,
            Biome::Desert => content::SAND,
            Biome::Grassland => content::GRASS,
            Biome::Savanna => content::DRY_GRASS,
            Biome::Forest => content::GRASS,
            Biome::Tundra => content::SNOW,
            Biome::Mountains => content::STONE,
            Biome::Snow => content::SNOW,
        }
    }

    /// Content just below the top layer
    pub fn filler_content(&self) -> ContentId {
        match self {
            Biome::Ocean | Biome::Beach | Biome::Desert => content::SAND,
            Biome::Mountains => content::STONE,
            _ => content::DIRT,
        }
    }

    /// Whether open water freezes over
    pub fn freezes(&self) -> bool {
        matches!(self, Biome::Tundra | Biome::Snow)
    }
}

/// Climate map generator
pub struct BiomeMap {
    temperature_noise: Perlin,
    moisture_noise: Perlin,
    temp_scale: f32,
    moisture_scale: f32,
}

impl BiomeMap {
    /// Create new biome map with given seed
    pub fn new(seed: u32) -> Self {
        Self {
            temperature_noise: Perlin::new(seed),
            moisture_noise: Perlin::new(seed.wrapping_add(1000)),
            temp_scale: 0.0008,
            moisture_scale: 0.0012,
        }
    }

    /// Temperature at a node column (-1 to 1, cold to hot)
    pub fn temperature_at(&self, x: f32, z: f32) -> f32 {
        let temp = self.temperature_noise.get([
            (x * self.temp_scale) as f64,
            (z * self.temp_scale) as f64,
        ]) as f32;

        // Colder towards the poles
        let latitude_factor = (z * 0.0002).abs().min(1.0);
        temp - latitude_factor * 0.5
    }

    /// Moisture at a node column (0 to 1, dry to wet)
    pub fn moisture_at(&self, x: f32, z: f32) -> f32 {
        let moisture = self.moisture_noise.get([
            (x * self.moisture_scale) as f64,
            (z * self.moisture_scale) as f64,
        ]) as f32;

        (moisture + 1.0) * 0.5
    }

    /// Heat in degrees, colder with altitude (3 degrees per 100 nodes)
    pub fn heat_at(&self, x: f32, y: f32, z: f32) -> i16 {
        let base = 15.0 + self.temperature_at(x, z) * 30.0;
        (base - y * 0.03).round().clamp(-100.0, 100.0) as i16
    }

    /// Relative humidity in percent
    pub fn humidity_at(&self, x: f32, z: f32) -> i16 {
        (self.moisture_at(x, z) * 100.0).round() as i16
    }

    /// Biome at a column given its ground height
    pub fn biome_at(&self, x: f32, z: f32, height: f32, sea_level: f32) -> Biome {
        let temp = self.temperature_at(x, z);
        let moisture = self.moisture_at(x, z);

        if height < sea_level - 2.0 {
            return Biome::Ocean;
        }
        if height < sea_level + 1.0 {
            return Biome::Beach;
        }

        let altitude_factor = (height - sea_level) / 100.0;
        if altitude_factor > 0.8 {
            return Biome::Snow;
        }
        if altitude_factor > 0.6 {
            return Biome::Mountains;
        }

        match (temp, moisture) {
            (t, _) if t < -0.3 => Biome::Tundra,
            (t, m) if t > 0.3 => {
                if m > 0.6 {
                    Biome::Forest
                } else if m > 0.3 {
                    Biome::Savanna
                } else {
                    Biome::Desert
                }
            }
            (_, m) => {
                if m > 0.6 {
                    Biome::Forest
                } else if m > 0.3 {
                    Biome::Grassland
                } else {
                    Biome::Desert
                }
            }
        }
    }
}
