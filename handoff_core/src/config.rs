// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Configuration loaded from `handoff.toml`.
//!
//! Every field has a default, so an empty file (or no file) is valid:
//!
//! ```toml
//! [ring]
//! slots = 3
//! slot_size = 65536
//! # alignment = 256   # may only raise the device's own alignment
//!
//! [surface]
//! background = [0.0, 0.0, 0.0, 0.0]
//! msaa_samples = 1
//! depth = false
//!
//! [pipeline]
//! cache_capacity = 64
//!
//! [software]
//! # allocation_budget = 67108864
//! ```

use std::num::NonZeroUsize;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::format::{Color, PixelFormat};
use crate::surface::SurfaceConfig;

/// Errors from loading or validating a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid TOML for this schema.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is out of range.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending key.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HandoffConfig {
    /// Frame ring and per-frame buffer settings.
    pub ring: RingConfig,
    /// Offscreen backing store settings.
    pub surface: SurfaceSection,
    /// Pipeline cache settings.
    pub pipeline: PipelineConfig,
    /// Software device settings.
    pub software: SoftwareConfig,
}

/// `[ring]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Number of frame slots; 2 for double, 3 for triple buffering.
    pub slots: usize,
    /// Bytes per slot buffer.
    pub slot_size: u64,
    /// Minimum reservation alignment. The device's own alignment wins if it
    /// is larger.
    pub alignment: Option<u64>,
}

/// `[surface]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceSection {
    /// Straight-alpha RGBA clear color.
    pub background: [f32; 4],
    /// MSAA sample count; 1 disables multisampling.
    pub msaa_samples: u32,
    /// Whether offscreens get a depth attachment.
    pub depth: bool,
    /// Store BGRA instead of RGBA.
    pub bgra: bool,
}

/// `[pipeline]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Compiled pipelines kept before the least recently used is evicted.
    pub cache_capacity: usize,
}

/// `[software]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SoftwareConfig {
    /// Byte budget for textures and buffers. Unlimited when absent.
    pub allocation_budget: Option<u64>,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            slots: 3,
            slot_size: 64 * 1024,
            alignment: None,
        }
    }
}

impl Default for SurfaceSection {
    fn default() -> Self {
        Self {
            background: [0.0; 4],
            msaa_samples: 1,
            depth: false,
            bgra: false,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { cache_capacity: 64 }
    }
}

impl SurfaceSection {
    /// The clear color.
    #[must_use]
    pub fn background_color(&self) -> Color {
        Color::from_array(self.background)
    }

    /// Backing store layout for offscreens.
    #[must_use]
    pub fn surface_config(&self) -> SurfaceConfig {
        SurfaceConfig {
            format: if self.bgra {
                PixelFormat::BgraPre
            } else {
                PixelFormat::RgbaPre
            },
            msaa_samples: self.msaa_samples,
            depth: self.depth,
        }
    }
}

impl PipelineConfig {
    /// Cache capacity; validated to be non-zero.
    #[must_use]
    pub fn capacity(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.cache_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}

impl HandoffConfig {
    /// Loads and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Loads `handoff.toml` from the working directory, falling back to the
    /// defaults if it is missing or invalid.
    #[must_use]
    pub fn load_or_default() -> Self {
        match Self::load("handoff.toml") {
            Ok(config) => config,
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Self::default()
            }
            Err(e) => {
                tracing::warn!(%e, "ignoring handoff.toml");
                Self::default()
            }
        }
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=usize::from(u8::MAX)).contains(&self.ring.slots) {
            return Err(invalid("ring.slots", format!("{} is outside 1..=255", self.ring.slots)));
        }
        if self.ring.slot_size == 0 {
            return Err(invalid("ring.slot_size", "must be non-zero".into()));
        }
        if let Some(a) = self.ring.alignment
            && !a.is_power_of_two()
        {
            return Err(invalid("ring.alignment", format!("{a} is not a power of two")));
        }
        if self.surface.msaa_samples == 0 {
            return Err(invalid("surface.msaa_samples", "must be at least 1".into()));
        }
        if self.surface.background.iter().any(|c| !c.is_finite()) {
            return Err(invalid("surface.background", "components must be finite".into()));
        }
        if self.pipeline.cache_capacity == 0 {
            return Err(invalid("pipeline.cache_capacity", "must be non-zero".into()));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { field, reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_defaults() {
        let config = HandoffConfig::from_toml_str("").unwrap();
        assert_eq!(config, HandoffConfig::default());
        assert_eq!(config.ring.slots, 3);
        assert_eq!(config.ring.slot_size, 65536);
        assert_eq!(config.pipeline.capacity().get(), 64);
        assert_eq!(config.surface.surface_config(), SurfaceConfig::default());
    }

    #[test]
    fn sections_override_defaults() {
        let config = HandoffConfig::from_toml_str(
            r#"
            [ring]
            slots = 2
            alignment = 256

            [surface]
            background = [1.0, 1.0, 1.0, 1.0]
            msaa_samples = 4
            bgra = true

            [software]
            allocation_budget = 1048576
            "#,
        )
        .unwrap();
        assert_eq!(config.ring.slots, 2);
        assert_eq!(config.ring.slot_size, 65536);
        assert_eq!(config.ring.alignment, Some(256));
        assert_eq!(config.surface.background_color(), Color::WHITE);
        let surface = config.surface.surface_config();
        assert_eq!(surface.format, PixelFormat::BgraPre);
        assert_eq!(surface.msaa_samples, 4);
        assert_eq!(config.software.allocation_budget, Some(1 << 20));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        for (text, field) in [
            ("[ring]\nslots = 0", "ring.slots"),
            ("[ring]\nslots = 256", "ring.slots"),
            ("[ring]\nslot_size = 0", "ring.slot_size"),
            ("[ring]\nalignment = 48", "ring.alignment"),
            ("[surface]\nmsaa_samples = 0", "surface.msaa_samples"),
            ("[pipeline]\ncache_capacity = 0", "pipeline.cache_capacity"),
        ] {
            match HandoffConfig::from_toml_str(text) {
                Err(ConfigError::Invalid { field: f, .. }) => assert_eq!(f, field),
                other => panic!("{text:?}: expected invalid {field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            HandoffConfig::from_toml_str("[ring]\nslots = \"three\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            HandoffConfig::load("/nonexistent/handoff.toml"),
            Err(ConfigError::Io(_))
        ));
    }
}
