//! Directional light shadow mapping.
//!
//! 1. Render scene depth from the light's orthographic view into a 2D map
//! 2. Sample it with a 3x3 PCF in the lighting pass
//!
//! Only the first shadow-casting directional light gets the map. The same
//! light-space matrix is used to render and to sample it.

use bevy::prelude::*;
use bevy::render::{
    extract_resource::ExtractResource,
    render_resource::{
        BindGroup, BindGroupEntry, BindGroupLayout, BindGroupLayoutEntry, BindingType, Buffer,
        BufferBindingType, BufferInitDescriptor, BufferUsages, CachedRenderPipelineId,
        CompareFunction, DepthStencilState, Extent3d, PipelineCache, PrimitiveState,
        RenderPipelineDescriptor, ShaderStages, StencilState, TextureDescriptor,
        TextureDimension, TextureFormat, TextureUsages, VertexState,
    },
    renderer::RenderDevice,
    texture::{CachedTexture, TextureCache},
};
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use super::gbuffer::DeferredCamera;
use super::gbuffer_geometry::{deferred_mesh_vertex_layout, DeferredLayouts};
use super::light::ExtractedLights;

/// Shadow map resolution.
pub const SHADOW_MAP_SIZE: u32 = 2048;

/// Shadow map texture format.
pub const SHADOW_DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// Orthographic shadow frustum for the directional light.
///
/// The frustum is a box of `2 * half_extent` around `center`, viewed from
/// `distance` units back along the light direction.
#[derive(Resource, ExtractResource, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectionalShadowConfig {
    /// Center of the shadowed region (scene bounds center).
    pub center: Vec3,
    /// Half-width of the orthographic frustum in world units.
    pub half_extent: f32,
    pub near: f32,
    pub far: f32,
    /// Distance from `center` to the light camera.
    pub distance: f32,
}

impl Default for DirectionalShadowConfig {
    fn default() -> Self {
        Self {
            center: Vec3::ZERO,
            half_extent: 20.0,
            near: 1.0,
            far: 50.0,
            distance: 30.0,
        }
    }
}

impl DirectionalShadowConfig {
    /// Light-space view matrix for a light travelling along `direction`.
    pub fn light_view_matrix(&self, direction: Vec3) -> Mat4 {
        let direction = direction.normalize_or(Vec3::NEG_Y);
        let eye = self.center - direction * self.distance;
        // look_at degenerates when the light points straight along Y.
        let up = if direction.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };
        Mat4::look_at_rh(eye, self.center, up)
    }

    pub fn light_projection_matrix(&self) -> Mat4 {
        Mat4::orthographic_rh(
            -self.half_extent,
            self.half_extent,
            -self.half_extent,
            self.half_extent,
            self.near,
            self.far,
        )
    }

    /// Combined light-space view-projection.
    pub fn light_clip_from_world(&self, direction: Vec3) -> Mat4 {
        self.light_projection_matrix() * self.light_view_matrix(direction)
    }
}

/// Map a world position into shadow-map space: xy in texture coordinates
/// (y down), z the light-space depth. Mirrors `shadow_map_coords` in
/// `deferred_lighting.wgsl`.
pub fn shadow_map_coords(light_clip_from_world: Mat4, world_position: Vec3) -> Vec3 {
    let clip = light_clip_from_world * world_position.extend(1.0);
    let ndc = clip.truncate() / clip.w;
    Vec3::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5, ndc.z)
}

/// Uniform for the shadow depth pass.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct ShadowViewUniform {
    pub light_clip_from_world: [[f32; 4]; 4],
}

/// Resource containing the directional shadow pipeline.
#[derive(Resource)]
pub struct ShadowPipeline {
    pub pipeline_id: CachedRenderPipelineId,
    /// Bind group layout for the light-space matrix.
    pub view_layout: BindGroupLayout,
}

/// Initialize the shadow pipeline.
pub fn init_shadow_pipeline(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    pipeline_cache: Res<PipelineCache>,
    asset_server: Res<AssetServer>,
    layouts: Res<DeferredLayouts>,
    existing: Option<Res<ShadowPipeline>>,
) {
    if existing.is_some() {
        return;
    }

    let view_layout = render_device.create_bind_group_layout(
        "shadow_view_layout",
        &[BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStages::VERTEX,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }],
    );

    let shader = asset_server.load("shaders/shadow_depth.wgsl");

    // Depth-only: no fragment stage.
    let pipeline_id = pipeline_cache.queue_render_pipeline(RenderPipelineDescriptor {
        label: Some("shadow_depth_pipeline".into()),
        layout: vec![view_layout.clone(), layouts.mesh.clone()],
        push_constant_ranges: vec![],
        vertex: VertexState {
            shader,
            shader_defs: vec![],
            entry_point: Some("vs_main".into()),
            buffers: vec![deferred_mesh_vertex_layout()],
        },
        primitive: PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            // Back faces write depth, which keeps acne off lit front faces.
            cull_mode: Some(wgpu::Face::Front),
            unclipped_depth: false,
            polygon_mode: wgpu::PolygonMode::Fill,
            conservative: false,
        },
        depth_stencil: Some(DepthStencilState {
            format: SHADOW_DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: CompareFunction::LessEqual,
            stencil: StencilState::default(),
            bias: Default::default(),
        }),
        multisample: Default::default(),
        fragment: None,
        zero_initialize_workgroup_memory: false,
    });

    commands.insert_resource(ShadowPipeline {
        pipeline_id,
        view_layout,
    });

    info!(
        "ShadowPipeline initialized ({}x{} shadow map)",
        SHADOW_MAP_SIZE, SHADOW_MAP_SIZE
    );
}

/// Directional shadow map and light-space matrix for a camera.
#[derive(Component)]
pub struct ViewDirectionalShadow {
    pub depth: CachedTexture,
    #[allow(dead_code)]
    pub buffer: Buffer, // Kept alive to back the bind group
    pub bind_group: BindGroup,
    pub light_clip_from_world: Mat4,
    /// False when no directional light casts shadows; the map is only cleared.
    pub active: bool,
}

/// Prepare the shadow map texture and light-space matrix.
pub fn prepare_directional_shadow(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    mut texture_cache: ResMut<TextureCache>,
    pipeline: Option<Res<ShadowPipeline>>,
    config: Res<DirectionalShadowConfig>,
    lights: Option<Res<ExtractedLights>>,
    cameras: Query<Entity, With<DeferredCamera>>,
) {
    let Some(pipeline) = pipeline else {
        return;
    };

    let direction = lights.as_ref().and_then(|lights| lights.shadow_direction());
    let light_clip_from_world = direction
        .map(|direction| config.light_clip_from_world(direction))
        .unwrap_or(Mat4::IDENTITY);

    let shadow_uniform = ShadowViewUniform {
        light_clip_from_world: light_clip_from_world.to_cols_array_2d(),
    };

    for entity in cameras.iter() {
        let depth = texture_cache.get(
            &render_device,
            TextureDescriptor {
                label: Some("directional_shadow_map"),
                size: Extent3d {
                    width: SHADOW_MAP_SIZE,
                    height: SHADOW_MAP_SIZE,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: TextureDimension::D2,
                format: SHADOW_DEPTH_FORMAT,
                usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            },
        );

        let buffer = render_device.create_buffer_with_data(&BufferInitDescriptor {
            label: Some("shadow_view_uniform"),
            contents: bytemuck::bytes_of(&shadow_uniform),
            usage: BufferUsages::UNIFORM,
        });

        let bind_group = render_device.create_bind_group(
            Some("shadow_view_bind_group"),
            &pipeline.view_layout,
            &[BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        );

        commands.entity(entity).insert(ViewDirectionalShadow {
            depth,
            buffer,
            bind_group,
            light_clip_from_world,
            active: direction.is_some(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shading::{directional_shadow_pcf, ShadowDepthGrid};

    #[test]
    fn test_center_maps_to_middle_of_map() {
        let config = DirectionalShadowConfig::default();
        let matrix = config.light_clip_from_world(Vec3::new(0.3, -1.0, 0.2));
        let coords = shadow_map_coords(matrix, config.center);
        assert!((coords.x - 0.5).abs() < 1e-4);
        assert!((coords.y - 0.5).abs() < 1e-4);
        // distance 30 inside [1, 50]
        let expected = (30.0 - 1.0) / (50.0 - 1.0);
        assert!((coords.z - expected).abs() < 1e-4);
    }

    #[test]
    fn test_closer_to_light_is_shallower() {
        let config = DirectionalShadowConfig::default();
        let direction = Vec3::new(0.0, -1.0, 0.3).normalize();
        let matrix = config.light_clip_from_world(direction);
        let ground = shadow_map_coords(matrix, Vec3::ZERO);
        let occluder = shadow_map_coords(matrix, -direction * 5.0);
        assert!(occluder.z < ground.z);
    }

    #[test]
    fn test_vertical_light_has_valid_matrix() {
        let config = DirectionalShadowConfig::default();
        let matrix = config.light_clip_from_world(Vec3::NEG_Y);
        assert!(matrix.is_finite());
        let coords = shadow_map_coords(matrix, Vec3::new(5.0, 0.0, -5.0));
        assert!(coords.is_finite());
    }

    #[test]
    fn test_beyond_far_plane_is_never_shadowed() {
        let config = DirectionalShadowConfig::default();
        let direction = Vec3::NEG_Y;
        let matrix = config.light_clip_from_world(direction);
        // 30 units below the center sits 60 units from the light, past far = 50.
        let coords = shadow_map_coords(matrix, Vec3::new(0.0, -30.0, 0.0));
        assert!(coords.z > 1.0);

        let occluding_everything = ShadowDepthGrid::filled(64, 0.0);
        assert_eq!(directional_shadow_pcf(coords, 0.0005, &occluding_everything), 0.0);
    }

    #[test]
    fn test_config_json_defaults_missing_fields() {
        let config: DirectionalShadowConfig = serde_json::from_str(r#"{"half_extent": 8.0}"#).unwrap();
        assert_eq!(config.half_extent, 8.0);
        assert_eq!(config.far, 50.0);
    }
}
