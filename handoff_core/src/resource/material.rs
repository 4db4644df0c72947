// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use crate::device::TextureId;
use crate::format::Color;

/// Which map slot of a [`PhongMaterial`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MapKind {
    /// Diffuse color map.
    Diffuse,
    /// Specular map.
    Specular,
    /// Bump (normal) map.
    Bump,
    /// Self-illumination map.
    SelfIllumination,
}

impl MapKind {
    /// All map kinds in slot order.
    pub const ALL: [Self; 4] = [
        Self::Diffuse,
        Self::Specular,
        Self::Bump,
        Self::SelfIllumination,
    ];

    const fn slot(self) -> usize {
        match self {
            Self::Diffuse => 0,
            Self::Specular => 1,
            Self::Bump => 2,
            Self::SelfIllumination => 3,
        }
    }
}

/// Phong shading parameters: a solid diffuse color plus optional maps.
///
/// Maps are borrowed texture handles. The material never owns them, so
/// releasing it leaves every map texture alive.
#[derive(Clone, Debug, PartialEq)]
pub struct PhongMaterial {
    diffuse: Color,
    maps: [Option<TextureId>; 4],
}

impl Default for PhongMaterial {
    fn default() -> Self {
        Self::new()
    }
}

impl PhongMaterial {
    /// A white material without maps.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            diffuse: Color::WHITE,
            maps: [None; 4],
        }
    }

    /// Sets the solid diffuse color.
    pub fn set_solid_color(&mut self, color: Color) {
        self.diffuse = color;
    }

    /// Solid diffuse color.
    #[must_use]
    pub fn solid_color(&self) -> Color {
        self.diffuse
    }

    /// Sets or clears one map.
    pub fn set_map(&mut self, kind: MapKind, texture: Option<TextureId>) {
        self.maps[kind.slot()] = texture;
    }

    /// The texture bound to one map slot.
    #[must_use]
    pub fn map(&self, kind: MapKind) -> Option<TextureId> {
        self.maps[kind.slot()]
    }

    /// Releases the material and hands back its map handles untouched.
    pub fn release(self) -> [Option<TextureId>; 4] {
        self.maps
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::device::software::SoftwareDevice;
    use crate::device::{Device, TextureDesc};
    use crate::format::PixelFormat;
    use crate::geometry::PhysicalSize;

    #[test]
    fn release_keeps_map_textures_alive() {
        let device = Arc::new(SoftwareDevice::new());
        let bump = device
            .create_texture(&TextureDesc::color(
                PhysicalSize::new(2, 2),
                PixelFormat::RgbaPre,
            ))
            .unwrap();
        let mut material = PhongMaterial::new();
        material.set_solid_color(Color::BLACK);
        material.set_map(MapKind::Bump, Some(bump));
        assert_eq!(material.map(MapKind::Bump), Some(bump));
        assert_eq!(material.map(MapKind::Diffuse), None);

        let maps = material.release();
        assert_eq!(maps[2], Some(bump));
        assert_eq!(device.live_textures(), 1);
    }
}
