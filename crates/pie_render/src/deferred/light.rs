//! Lights for the deferred pipeline.
//!
//! A light is either a point light (positioned by its `Transform`, falls off
//! to zero at `radius`) or a directional light (a direction, no falloff).
//! Lights are extracted to the render world every frame and packed into the
//! lighting uniform.
//!
//! ## Usage
//!
//! ```rust,ignore
//! commands.spawn((
//!     DeferredLight::point(Color::srgb(1.0, 0.6, 0.3), 8.0),
//!     Transform::from_xyz(2.0, 3.0, 0.0),
//! ));
//! commands.spawn(DeferredLight::directional(Color::WHITE, Vec3::new(-0.3, -1.0, -0.2)).with_shadows());
//! ```
//!
//! At most [`MAX_LIGHTS`] lights are shaded per frame; extra lights are dropped.

use bevy::prelude::*;
use bevy::render::Extract;
use bytemuck::{Pod, Zeroable};

use super::shadow_registry::{PointShadowRegistry, ShadowSlot};
use crate::shading::falloff_coefficients;

/// Maximum number of lights shaded per frame.
/// Must match MAX_LIGHTS in deferred_lighting.wgsl.
pub const MAX_LIGHTS: usize = 32;

/// Shape of a light's contribution.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LightKind {
    /// Omnidirectional light at the entity's position.
    Point { radius: f32 },
    /// Infinitely distant light; `direction` points from the light into the scene.
    Directional { direction: Vec3 },
}

/// Light component.
#[derive(Component, Clone, Copy, Debug)]
#[require(Transform, Visibility)]
pub struct DeferredLight {
    /// Linear color. Components above 1.0 make brighter lights.
    pub color: Color,
    pub kind: LightKind,
    /// Point lights additionally need a [`ShadowSlot`] to cast shadows.
    pub casts_shadow: bool,
}

impl DeferredLight {
    pub fn point(color: Color, radius: f32) -> Self {
        Self {
            color,
            kind: LightKind::Point { radius },
            casts_shadow: false,
        }
    }

    pub fn directional(color: Color, direction: Vec3) -> Self {
        Self {
            color,
            kind: LightKind::Directional {
                direction: direction.normalize_or(Vec3::NEG_Y),
            },
            casts_shadow: false,
        }
    }

    pub fn with_shadows(mut self) -> Self {
        self.casts_shadow = true;
        self
    }

    pub fn radius(&self) -> Option<f32> {
        match self.kind {
            LightKind::Point { radius } => Some(radius),
            LightKind::Directional { .. } => None,
        }
    }
}

/// Light data copied into the render world.
#[derive(Clone, Copy, Debug)]
pub struct ExtractedLight {
    pub kind: LightKind,
    /// World position (unused for directional lights).
    pub position: Vec3,
    /// Linear RGB.
    pub color: Vec3,
    pub casts_shadow: bool,
    pub shadow_slot: Option<u32>,
}

/// Lights for the current frame, already truncated to [`MAX_LIGHTS`].
#[derive(Resource, Default, Debug)]
pub struct ExtractedLights {
    pub lights: Vec<ExtractedLight>,
    /// Index into `lights` of the directional light that owns the shadow map.
    pub directional_shadow: Option<usize>,
}

impl ExtractedLights {
    /// Build the frame's light list. Lights past the cap are dropped.
    pub fn from_lights(lights: impl IntoIterator<Item = ExtractedLight>) -> Self {
        let mut extracted = Self::default();
        let mut dropped = 0usize;

        for light in lights {
            if extracted.lights.len() >= MAX_LIGHTS {
                dropped += 1;
                continue;
            }
            if extracted.directional_shadow.is_none()
                && light.casts_shadow
                && matches!(light.kind, LightKind::Directional { .. })
            {
                extracted.directional_shadow = Some(extracted.lights.len());
            }
            extracted.lights.push(light);
        }

        if dropped > 0 {
            warn_once!(
                "Too many lights ({} > {}), extras are not rendered",
                MAX_LIGHTS + dropped,
                MAX_LIGHTS
            );
        }
        extracted
    }

    /// Direction of the shadow-casting directional light, if any.
    pub fn shadow_direction(&self) -> Option<Vec3> {
        let light = self.lights.get(self.directional_shadow?)?;
        match light.kind {
            LightKind::Directional { direction } => Some(direction),
            LightKind::Point { .. } => None,
        }
    }

    /// Point lights with a shadow slot below `capacity`.
    pub fn shadow_casting_points(&self, capacity: u32) -> impl Iterator<Item = (u32, &ExtractedLight)> {
        self.lights.iter().filter_map(move |light| match (light.kind, light.shadow_slot) {
            (LightKind::Point { .. }, Some(slot)) if light.casts_shadow && slot < capacity => {
                Some((slot, light))
            }
            _ => None,
        })
    }
}

/// Main-world light as seen by the renderer.
///
/// A [`ShadowSlot`] is honored only when `registry` issued it to `entity`, so
/// every rendered slot has exactly one owner.
pub fn extract_light(
    registry: &PointShadowRegistry,
    entity: Entity,
    transform: &GlobalTransform,
    light: &DeferredLight,
    slot: Option<&ShadowSlot>,
) -> ExtractedLight {
    let shadow_slot = slot.and_then(|slot| registry.owned_slot(entity, *slot));
    if slot.is_some() && shadow_slot.is_none() {
        warn_once!("Ignoring a ShadowSlot not issued to its light; it renders unshadowed");
    } else if light.casts_shadow
        && slot.is_none()
        && matches!(light.kind, LightKind::Point { .. })
    {
        warn_once!("Shadow-casting point light without a ShadowSlot renders unshadowed");
    }

    let color = light.color.to_linear();
    ExtractedLight {
        kind: light.kind,
        position: transform.translation(),
        color: Vec3::new(color.red, color.green, color.blue),
        casts_shadow: light.casts_shadow,
        shadow_slot: shadow_slot.map(ShadowSlot::index),
    }
}

/// System to extract lights from the main world to the render world.
pub fn extract_lights(
    mut commands: Commands,
    registry: Extract<Res<PointShadowRegistry>>,
    lights_query: Extract<
        Query<(Entity, &GlobalTransform, &DeferredLight, Option<&ShadowSlot>)>,
    >,
) {
    let lights = lights_query.iter().map(|(entity, transform, light, slot)| {
        extract_light(&registry, entity, transform, light, slot)
    });

    commands.insert_resource(ExtractedLights::from_lights(lights));
}

/// GPU representation of one light (48 bytes, std140 compatible).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct GpuLight {
    /// xyz = position (point) or direction (directional), w = kind (0 point, 1 directional)
    pub position_kind: [f32; 4],
    /// rgb = linear color, w = radius
    pub color_radius: [f32; 4],
    /// x = linear, y = quadratic, z = has shadow (0/1), w = shadow slot
    pub falloff_shadow: [f32; 4],
}

impl GpuLight {
    pub const POINT: f32 = 0.0;
    pub const DIRECTIONAL: f32 = 1.0;

    /// Pack a light. `has_shadow` is decided by the caller, which knows
    /// which shadow maps were actually rendered this frame.
    pub fn new(light: &ExtractedLight, has_shadow: bool) -> Self {
        let shadow = if has_shadow { 1.0 } else { 0.0 };
        match light.kind {
            LightKind::Point { radius } => {
                let (linear, quadratic) = falloff_coefficients(radius.max(f32::EPSILON));
                Self {
                    position_kind: light.position.extend(Self::POINT).to_array(),
                    color_radius: light.color.extend(radius).to_array(),
                    falloff_shadow: [
                        linear,
                        quadratic,
                        shadow,
                        light.shadow_slot.unwrap_or(0) as f32,
                    ],
                }
            }
            LightKind::Directional { direction } => Self {
                position_kind: direction.extend(Self::DIRECTIONAL).to_array(),
                color_radius: light.color.extend(0.0).to_array(),
                falloff_shadow: [0.0, 0.0, shadow, 0.0],
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(slot: Option<u32>, casts_shadow: bool) -> ExtractedLight {
        ExtractedLight {
            kind: LightKind::Point { radius: 10.0 },
            position: Vec3::new(1.0, 2.0, 3.0),
            color: Vec3::ONE,
            casts_shadow,
            shadow_slot: slot,
        }
    }

    fn directional(casts_shadow: bool, direction: Vec3) -> ExtractedLight {
        ExtractedLight {
            kind: LightKind::Directional { direction },
            position: Vec3::ZERO,
            color: Vec3::ONE,
            casts_shadow,
            shadow_slot: None,
        }
    }

    #[test]
    fn test_excess_lights_are_dropped() {
        let lights = (0..MAX_LIGHTS + 10).map(|_| point(None, false));
        let extracted = ExtractedLights::from_lights(lights);
        assert_eq!(extracted.lights.len(), MAX_LIGHTS);
    }

    #[test]
    fn test_first_shadowed_directional_owns_shadow_map() {
        let extracted = ExtractedLights::from_lights([
            directional(false, Vec3::NEG_Y),
            point(None, false),
            directional(true, Vec3::NEG_X),
            directional(true, Vec3::NEG_Z),
        ]);
        assert_eq!(extracted.directional_shadow, Some(2));
        assert_eq!(extracted.shadow_direction(), Some(Vec3::NEG_X));
    }

    #[test]
    fn test_shadow_casting_points_respect_capacity() {
        let extracted = ExtractedLights::from_lights([
            point(Some(0), true),
            point(Some(5), true),
            point(Some(1), false),
            point(None, true),
        ]);
        let slots: Vec<u32> = extracted.shadow_casting_points(4).map(|(slot, _)| slot).collect();
        assert_eq!(slots, vec![0]);
        let slots: Vec<u32> = extracted.shadow_casting_points(8).map(|(slot, _)| slot).collect();
        assert_eq!(slots, vec![0, 5]);
    }

    #[test]
    fn test_gpu_light_packing() {
        let gpu = GpuLight::new(&point(Some(3), true), true);
        assert_eq!(gpu.position_kind, [1.0, 2.0, 3.0, GpuLight::POINT]);
        assert_eq!(gpu.color_radius[3], 10.0);
        assert!((gpu.falloff_shadow[0] - 0.45).abs() < 1e-6);
        assert!((gpu.falloff_shadow[1] - 0.75).abs() < 1e-6);
        assert_eq!(gpu.falloff_shadow[2], 1.0);
        assert_eq!(gpu.falloff_shadow[3], 3.0);

        let sun = GpuLight::new(&directional(false, Vec3::NEG_Y), false);
        assert_eq!(sun.position_kind, [0.0, -1.0, 0.0, GpuLight::DIRECTIONAL]);
        assert_eq!(sun.falloff_shadow[2], 0.0);
    }

    #[test]
    fn test_gpu_light_size_is_std140_aligned() {
        assert_eq!(std::mem::size_of::<GpuLight>(), 48);
    }

    #[test]
    fn test_directional_constructor_normalizes() {
        let light = DeferredLight::directional(Color::WHITE, Vec3::new(0.0, -4.0, 0.0));
        assert_eq!(light.kind, LightKind::Directional { direction: Vec3::NEG_Y });
        assert_eq!(light.radius(), None);
        assert_eq!(DeferredLight::point(Color::WHITE, 3.0).radius(), Some(3.0));
    }
}
