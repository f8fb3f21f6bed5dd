//! G-Buffer textures for deferred rendering.
//!
//! The G-Buffer stores geometry information in multiple render targets:
//! - gPosition (RGBA32F): XYZ = world position, W = 1 where geometry was drawn
//! - gNormal (RGBA16F): XYZ = world-space normal (normalized)
//! - gAlbedoSpec (RGBA8): RGB = albedo, A = specular intensity
//!
//! These textures are created in the render world and managed via TextureCache.
//! Every target is cleared to zero at the start of the geometry pass, so a
//! texel with `position.w == 0` holds no geometry.

use bevy::prelude::*;
use bevy::render::{
    camera::ExtractedCamera,
    extract_component::ExtractComponent,
    render_resource::{Extent3d, TextureDescriptor, TextureDimension, TextureFormat, TextureUsages},
    renderer::RenderDevice,
    texture::{CachedTexture, TextureCache},
};

/// Marker component for cameras that should use deferred rendering.
///
/// The camera's output is fully replaced by the deferred pipeline. Use it
/// with `Msaa::Off` and a non-HDR target.
#[derive(Component, Default, Clone, ExtractComponent)]
pub struct DeferredCamera;

/// Depth texture format for the geometry pass (reverse-Z).
pub const GBUFFER_DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

pub const GBUFFER_POSITION_FORMAT: TextureFormat = TextureFormat::Rgba32Float;
pub const GBUFFER_NORMAL_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
pub const GBUFFER_ALBEDO_SPEC_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// Size of the screen-space targets for a camera, clamped to at least 1x1.
pub fn view_texture_size(camera: &ExtractedCamera) -> Option<Extent3d> {
    let size = camera.physical_viewport_size?.max(UVec2::ONE);
    Some(Extent3d {
        width: size.x,
        height: size.y,
        depth_or_array_layers: 1,
    })
}

/// Request a single-sample 2D render target from the texture cache.
pub fn screen_texture(
    render_device: &RenderDevice,
    texture_cache: &mut TextureCache,
    label: &'static str,
    size: Extent3d,
    format: TextureFormat,
) -> CachedTexture {
    texture_cache.get(
        render_device,
        TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format,
            usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        },
    )
}

/// G-Buffer textures for a camera in the render world.
#[derive(Component)]
pub struct ViewGBufferTextures {
    /// XYZ = world position, W = coverage
    pub position: CachedTexture,
    /// XYZ = world-space normal
    pub normal: CachedTexture,
    /// RGB = albedo, A = specular intensity
    pub albedo_spec: CachedTexture,
    /// Depth buffer shared by the geometry and light sphere passes
    pub depth: CachedTexture,
    pub size: Extent3d,
}

impl ViewGBufferTextures {
    pub fn new(
        render_device: &RenderDevice,
        texture_cache: &mut TextureCache,
        size: Extent3d,
    ) -> Self {
        Self {
            position: screen_texture(
                render_device,
                texture_cache,
                "gbuffer_position",
                size,
                GBUFFER_POSITION_FORMAT,
            ),
            normal: screen_texture(
                render_device,
                texture_cache,
                "gbuffer_normal",
                size,
                GBUFFER_NORMAL_FORMAT,
            ),
            albedo_spec: screen_texture(
                render_device,
                texture_cache,
                "gbuffer_albedo_spec",
                size,
                GBUFFER_ALBEDO_SPEC_FORMAT,
            ),
            depth: screen_texture(
                render_device,
                texture_cache,
                "gbuffer_depth",
                size,
                GBUFFER_DEPTH_FORMAT,
            ),
            size,
        }
    }
}

/// System to request G-buffer textures for deferred cameras.
///
/// Runs every frame so the texture cache keeps them alive; a viewport resize
/// produces a new set at the new size.
pub fn prepare_gbuffer_textures(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    mut texture_cache: ResMut<TextureCache>,
    cameras: Query<(Entity, &ExtractedCamera), With<DeferredCamera>>,
) {
    for (entity, camera) in cameras.iter() {
        let Some(size) = view_texture_size(camera) else {
            continue;
        };
        let textures = ViewGBufferTextures::new(&render_device, &mut texture_cache, size);
        commands.entity(entity).insert(textures);
    }
}
