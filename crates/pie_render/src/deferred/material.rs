//! Solid-color material for the deferred pipeline.
//!
//! Meshes are shaded from a single albedo color and a specular intensity;
//! there is no texture sampling. The G-buffer stores the pair as
//! `AlbedoSpec` (rgb = albedo, a = specular).

use bevy::prelude::*;

/// Marker for entities drawn by the deferred geometry and shadow passes.
///
/// Inserted automatically alongside [`SolidMaterial`].
#[derive(Component, Default, Clone, Copy, Debug)]
pub struct DeferredRenderable;

/// Per-mesh material: linear albedo plus specular intensity.
///
/// # Example
///
/// ```rust,ignore
/// commands.spawn((
///     Mesh3d(meshes.add(Cuboid::default())),
///     SolidMaterial::from_color(200, 60, 60, 128),
///     Transform::from_xyz(0.0, 0.5, 0.0),
/// ));
/// ```
#[derive(Component, Clone, Copy, Debug, PartialEq)]
#[require(DeferredRenderable, Transform, Visibility)]
pub struct SolidMaterial {
    /// Linear RGB albedo in `[0, 1]`.
    pub albedo: [f32; 3],
    /// Specular intensity in `[0, 1]`.
    pub specular: f32,
}

impl Default for SolidMaterial {
    fn default() -> Self {
        Self {
            albedo: [0.95, 0.95, 0.95],
            specular: 0.5,
        }
    }
}

impl SolidMaterial {
    pub fn new(albedo: [f32; 3], specular: f32) -> Self {
        Self { albedo, specular }
    }

    /// Build from 8-bit channels; alpha becomes the specular intensity.
    pub fn from_color(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self {
            albedo: [r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0],
            specular: a as f32 / 255.0,
        }
    }

    /// Build from a Bevy color (converted to linear) and a specular intensity.
    pub fn from_bevy_color(color: Color, specular: f32) -> Self {
        let linear = color.to_linear();
        Self {
            albedo: [linear.red, linear.green, linear.blue],
            specular,
        }
    }

    /// Packed `AlbedoSpec` value as written to the G-buffer.
    pub fn to_rgba_f32(&self) -> [f32; 4] {
        [self.albedo[0], self.albedo[1], self.albedo[2], self.specular]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_color_round_trip() {
        for r in (0..=255u8).step_by(17) {
            for g in [0u8, 1, 127, 128, 254, 255] {
                let material = SolidMaterial::from_color(r, g, 255 - r, g);
                let rgba = material.to_rgba_f32();
                let expected = [
                    r as f32 / 255.0,
                    g as f32 / 255.0,
                    (255 - r) as f32 / 255.0,
                    g as f32 / 255.0,
                ];
                for (got, want) in rgba.iter().zip(expected) {
                    assert!((got - want).abs() < 1e-6);
                }
            }
        }
    }

    #[test]
    fn test_default_matches_engine_default() {
        let rgba = SolidMaterial::default().to_rgba_f32();
        assert_eq!(rgba, [0.95, 0.95, 0.95, 0.5]);
    }

    #[test]
    fn test_from_bevy_color_is_linear() {
        let material = SolidMaterial::from_bevy_color(Color::srgb(1.0, 0.0, 0.0), 0.25);
        assert!((material.albedo[0] - 1.0).abs() < 1e-5);
        assert_eq!(material.albedo[1], 0.0);
        assert_eq!(material.specular, 0.25);
    }
}
