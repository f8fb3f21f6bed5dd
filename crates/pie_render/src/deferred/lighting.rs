//! Deferred lighting configuration and per-view resources.
//!
//! The lighting pass reads the G-buffer plus both shadow maps and writes
//! unclamped HDR color. Everything it needs from the CPU is packed into one
//! [`LightingUniform`] per camera.

use bevy::prelude::*;
use bevy::render::{
    camera::ExtractedCamera,
    extract_resource::ExtractResource,
    render_resource::{BindGroup, BindGroupEntry, Buffer, BufferInitDescriptor, BufferUsages, TextureFormat},
    renderer::RenderDevice,
    texture::{CachedTexture, TextureCache},
};
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use super::gbuffer::{screen_texture, view_texture_size, DeferredCamera};
use super::gbuffer_geometry::ViewDeferredUniforms;
use super::light::{ExtractedLights, GpuLight, LightKind, MAX_LIGHTS};
use super::lighting_node::LightingPipeline;
use super::point_light_shadow::PointShadowMaps;
use super::shadow::ViewDirectionalShadow;
use crate::shading::AMBIENT_STRENGTH;

/// HDR scene color format.
pub const HDR_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

/// Configuration for deferred lighting.
#[derive(Resource, ExtractResource, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeferredLightingConfig {
    /// Ambient term as a fraction of albedo.
    pub ambient_strength: f32,
    /// Written where the G-buffer holds no geometry.
    pub background: Color,
}

impl Default for DeferredLightingConfig {
    fn default() -> Self {
        Self {
            ambient_strength: AMBIENT_STRENGTH,
            background: Color::BLACK,
        }
    }
}

/// Lighting pass uniform (std140 compatible).
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct LightingUniform {
    /// Directional shadow light-space matrix, same one the shadow pass used.
    pub light_clip_from_world: [[f32; 4]; 4],
    pub camera_position: [f32; 4],
    /// Linear background color.
    pub background: [f32; 4],
    /// x = ambient strength
    pub params: [f32; 4],
    /// x = light count
    pub counts: [u32; 4],
    pub lights: [GpuLight; MAX_LIGHTS],
}

/// Pack the frame's lights for the GPU.
///
/// A light is flagged as shadowed only when its map was actually rendered
/// this frame: the directional light owning the 2D map while that map is
/// active, or a point light whose slot has a cube map.
pub fn pack_lights(
    lights: &ExtractedLights,
    directional_shadow_active: bool,
    rendered_point_slots: &[u32],
) -> ([GpuLight; MAX_LIGHTS], u32) {
    let mut packed = [GpuLight::default(); MAX_LIGHTS];
    let mut count = 0;

    for (index, light) in lights.lights.iter().take(MAX_LIGHTS).enumerate() {
        let has_shadow = light.casts_shadow
            && match light.kind {
                LightKind::Directional { .. } => {
                    directional_shadow_active && lights.directional_shadow == Some(index)
                }
                LightKind::Point { .. } => light
                    .shadow_slot
                    .is_some_and(|slot| rendered_point_slots.contains(&slot)),
            };
        packed[index] = GpuLight::new(light, has_shadow);
        count += 1;
    }

    (packed, count)
}

/// HDR color target written by the lighting and light sphere passes.
#[derive(Component)]
pub struct ViewHdrTexture {
    pub texture: CachedTexture,
}

pub fn prepare_hdr_textures(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    mut texture_cache: ResMut<TextureCache>,
    cameras: Query<(Entity, &ExtractedCamera), With<DeferredCamera>>,
) {
    for (entity, camera) in cameras.iter() {
        let Some(size) = view_texture_size(camera) else {
            continue;
        };
        let texture = screen_texture(&render_device, &mut texture_cache, "hdr_color", size, HDR_FORMAT);
        commands.entity(entity).insert(ViewHdrTexture { texture });
    }
}

/// Per-view lighting uniform buffer and bind group.
#[derive(Component)]
pub struct ViewLightingUniforms {
    #[allow(dead_code)]
    pub buffer: Buffer, // Kept alive to back the bind group
    pub bind_group: BindGroup,
}

/// Build the lighting uniform for each camera.
///
/// Runs after the shadow resources are prepared so it sees which maps are
/// valid this frame and the exact light-space matrix they were rendered with.
pub fn prepare_lighting_uniforms(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    pipeline: Option<Res<LightingPipeline>>,
    config: Res<DeferredLightingConfig>,
    lights: Option<Res<ExtractedLights>>,
    point_shadows: Option<Res<PointShadowMaps>>,
    cameras: Query<(Entity, &ViewDeferredUniforms, &ViewDirectionalShadow), With<DeferredCamera>>,
) {
    let Some(pipeline) = pipeline else {
        return;
    };
    let empty = ExtractedLights::default();
    let lights = lights.as_deref().unwrap_or(&empty);
    let rendered_slots = point_shadows
        .as_ref()
        .map(|maps| maps.rendered_slots.as_slice())
        .unwrap_or(&[]);
    let background = config.background.to_linear();

    for (entity, view, shadow) in cameras.iter() {
        let (packed, count) = pack_lights(lights, shadow.active, rendered_slots);

        let uniform = LightingUniform {
            light_clip_from_world: shadow.light_clip_from_world.to_cols_array_2d(),
            camera_position: view.world_position.extend(1.0).to_array(),
            background: [
                background.red,
                background.green,
                background.blue,
                background.alpha,
            ],
            params: [config.ambient_strength, 0.0, 0.0, 0.0],
            counts: [count, 0, 0, 0],
            lights: packed,
        };

        let buffer = render_device.create_buffer_with_data(&BufferInitDescriptor {
            label: Some("lighting_uniform"),
            contents: bytemuck::bytes_of(&uniform),
            usage: BufferUsages::UNIFORM,
        });

        let bind_group = render_device.create_bind_group(
            Some("lighting_uniform_bind_group"),
            &pipeline.uniform_layout,
            &[BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        );

        commands
            .entity(entity)
            .insert(ViewLightingUniforms { buffer, bind_group });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::light::ExtractedLight;

    fn point(slot: Option<u32>) -> ExtractedLight {
        ExtractedLight {
            kind: LightKind::Point { radius: 8.0 },
            position: Vec3::new(0.0, 4.0, 0.0),
            color: Vec3::ONE,
            casts_shadow: slot.is_some(),
            shadow_slot: slot,
        }
    }

    fn sun(casts_shadow: bool) -> ExtractedLight {
        ExtractedLight {
            kind: LightKind::Directional {
                direction: Vec3::NEG_Y,
            },
            position: Vec3::ZERO,
            color: Vec3::ONE,
            casts_shadow,
            shadow_slot: None,
        }
    }

    fn has_shadow(light: &GpuLight) -> bool {
        light.falloff_shadow[2] == 1.0
    }

    #[test]
    fn test_uniform_size_matches_wgsl() {
        assert_eq!(std::mem::size_of::<LightingUniform>(), 128 + 48 * MAX_LIGHTS);
    }

    #[test]
    fn test_only_rendered_point_slots_are_shadowed() {
        let lights = ExtractedLights::from_lights([point(Some(0)), point(Some(3)), point(None)]);
        let (packed, count) = pack_lights(&lights, false, &[3]);

        assert_eq!(count, 3);
        assert!(!has_shadow(&packed[0]));
        assert!(has_shadow(&packed[1]));
        assert!(!has_shadow(&packed[2]));
    }

    #[test]
    fn test_directional_shadow_needs_active_map() {
        let lights = ExtractedLights::from_lights([sun(true), sun(true)]);

        let (packed, _) = pack_lights(&lights, true, &[]);
        assert!(has_shadow(&packed[0]));
        assert!(!has_shadow(&packed[1]), "only the first caster owns the map");

        let (packed, _) = pack_lights(&lights, false, &[]);
        assert!(!has_shadow(&packed[0]));
    }

    #[test]
    fn test_count_never_exceeds_cap() {
        let lights = ExtractedLights::from_lights((0..40).map(|_| point(None)));
        let (_, count) = pack_lights(&lights, false, &[]);
        assert_eq!(count as usize, MAX_LIGHTS);
    }
}
