//! Scene configuration
//!
//! All construction parameters for a particle session live here. Values come
//! from an optional JSON file next to the binary and fall back to the stock
//! scene. Validation runs at startup; a bad config is fatal before any
//! window or camera is touched.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "gesture-particles.json";

pub const DEFAULT_PARTICLE_COUNT: usize = 3500;
pub const DEFAULT_NEBULA_RADIUS: f32 = 15.0;
pub const DEFAULT_TREE_HEIGHT: f32 = 12.0;
pub const DEFAULT_TREE_RADIUS: f32 = 5.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("particle count must be at least 2")]
    ParticleCount,
    #[error("{0} must be positive, got {1}")]
    NonPositive(&'static str, f32),
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Bloom post-processing settings.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomSettings {
    /// Luminance below this does not feed the bloom chain.
    pub threshold: f32,
    /// Additive weight of the blurred highlights.
    pub strength: f32,
    /// Blur spread in half-resolution texels.
    pub radius: f32,
}

impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            threshold: 0.1,
            strength: 1.8,
            radius: 0.5,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Total particle count, split evenly between the cuboid and sphere
    /// batches.
    pub particle_count: usize,
    /// Radius of the resting nebula sphere.
    pub nebula_radius: f32,
    /// Height of the tree cone.
    pub tree_height: f32,
    /// Base radius of the tree cone.
    pub tree_radius: f32,
    /// Camera device index passed to the capture backend.
    pub camera_index: u32,
    /// Requested capture resolution.
    pub capture_width: u32,
    pub capture_height: u32,
    pub bloom: BloomSettings,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            particle_count: DEFAULT_PARTICLE_COUNT,
            nebula_radius: DEFAULT_NEBULA_RADIUS,
            tree_height: DEFAULT_TREE_HEIGHT,
            tree_radius: DEFAULT_TREE_RADIUS,
            camera_index: 0,
            capture_width: 640,
            capture_height: 480,
            bloom: BloomSettings::default(),
        }
    }
}

impl SceneConfig {
    /// Load the config file if one exists, otherwise use the defaults.
    /// Either way the result is validated.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        let path = Path::new(CONFIG_FILE);
        let config = if path.exists() {
            log::info!("Loading scene config from {CONFIG_FILE}");
            Self::load(path)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Reject parameters the formation generator cannot work with. Two
    /// particles is the floor so both batches are non-empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.particle_count < 2 {
            return Err(ConfigError::ParticleCount);
        }
        for (name, value) in [
            ("nebula_radius", self.nebula_radius),
            ("tree_height", self.tree_height),
            ("tree_radius", self.tree_radius),
            ("bloom.strength", self.bloom.strength),
            ("bloom.radius", self.bloom.radius),
        ] {
            if !(value > 0.0) || !value.is_finite() {
                return Err(ConfigError::NonPositive(name, value));
            }
        }
        if !self.bloom.threshold.is_finite() || self.bloom.threshold < 0.0 {
            return Err(ConfigError::NonPositive(
                "bloom.threshold",
                self.bloom.threshold,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SceneConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_tiny_particle_count() {
        let mut config = SceneConfig::default();
        config.particle_count = 0;
        assert!(config.validate().is_err());
        config.particle_count = 1;
        assert!(config.validate().is_err());
        config.particle_count = 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_non_positive_dimensions() {
        let mut config = SceneConfig::default();
        config.nebula_radius = 0.0;
        assert!(config.validate().is_err());

        let mut config = SceneConfig::default();
        config.tree_height = -3.0;
        assert!(config.validate().is_err());

        let mut config = SceneConfig::default();
        config.tree_radius = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let config: SceneConfig = serde_json::from_str(r#"{"particle_count": 500}"#).unwrap();
        assert_eq!(config.particle_count, 500);
        assert_eq!(config.nebula_radius, DEFAULT_NEBULA_RADIUS);
        assert_eq!(config.bloom.strength, 1.8);
    }
}
