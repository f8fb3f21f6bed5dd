//! G-Buffer geometry rendering.
//!
//! Owns the bind group layouts every mesh-drawing pass shares, the per-view
//! camera uniform, and the MRT pipeline that writes position, normal and
//! albedo+specular for each rasterized fragment. No lighting happens here.

use bevy::prelude::*;
use bevy::render::{
    camera::ExtractedCamera,
    render_resource::{
        BindGroup, BindGroupEntry, BindGroupLayout, BindGroupLayoutEntry, BindingType, Buffer,
        BufferBindingType, BufferInitDescriptor, BufferUsages, CachedRenderPipelineId,
        ColorTargetState, ColorWrites, CompareFunction, DepthStencilState, FragmentState,
        MultisampleState, PipelineCache, PrimitiveState, RenderPipelineDescriptor, ShaderStages,
        StencilState, VertexState,
    },
    renderer::RenderDevice,
    view::ExtractedView,
};
use bevy_mesh::{VertexBufferLayout, VertexFormat};
use bytemuck::{Pod, Zeroable};

use super::gbuffer::{
    DeferredCamera, GBUFFER_ALBEDO_SPEC_FORMAT, GBUFFER_DEPTH_FORMAT, GBUFFER_NORMAL_FORMAT,
    GBUFFER_POSITION_FORMAT,
};

/// Vertex layout of Bevy's built-in primitives: position, normal, uv.
///
/// Only meshes with exactly these attributes are drawn; the shaders read
/// locations 0 and 1.
pub fn deferred_mesh_vertex_layout() -> VertexBufferLayout {
    VertexBufferLayout::from_vertex_formats(
        wgpu::VertexStepMode::Vertex,
        [
            VertexFormat::Float32x3, // Position
            VertexFormat::Float32x3, // Normal
            VertexFormat::Float32x2, // UV
        ],
    )
}

/// View uniform data shared by the geometry, lighting and light sphere passes.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct DeferredViewUniform {
    pub clip_from_world: [[f32; 4]; 4],
    pub world_position: [f32; 3],
    pub _padding: f32,
    pub viewport: [f32; 4],
}

/// Per-mesh transform and material.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct DeferredMeshUniform {
    pub world_from_local: [[f32; 4]; 4],
    /// Inverse transpose of `world_from_local`, for normals.
    pub normal_from_local: [[f32; 4]; 4],
    /// RGB = albedo, A = specular intensity
    pub albedo_spec: [f32; 4],
}

impl DeferredMeshUniform {
    pub fn new(world_from_local: Mat4, albedo_spec: [f32; 4]) -> Self {
        Self {
            world_from_local: world_from_local.to_cols_array_2d(),
            normal_from_local: world_from_local.inverse().transpose().to_cols_array_2d(),
            albedo_spec,
        }
    }
}

fn uniform_layout_entry(binding: u32, visibility: ShaderStages) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Bind group layouts shared by every pass that draws scene meshes.
#[derive(Resource, Clone)]
pub struct DeferredLayouts {
    /// group 0 of the geometry and light sphere passes: [`DeferredViewUniform`]
    pub view: BindGroupLayout,
    /// group 1 of the geometry and shadow passes: [`DeferredMeshUniform`]
    pub mesh: BindGroupLayout,
}

impl FromWorld for DeferredLayouts {
    fn from_world(world: &mut World) -> Self {
        let render_device = world.resource::<RenderDevice>();
        Self {
            view: render_device.create_bind_group_layout(
                "deferred_view_layout",
                &[uniform_layout_entry(0, ShaderStages::VERTEX_FRAGMENT)],
            ),
            mesh: render_device.create_bind_group_layout(
                "deferred_mesh_layout",
                &[uniform_layout_entry(0, ShaderStages::VERTEX_FRAGMENT)],
            ),
        }
    }
}

/// Resource containing the G-buffer geometry pipeline.
#[derive(Resource)]
pub struct GBufferGeometryPipeline {
    pub pipeline_id: CachedRenderPipelineId,
}

/// System to initialize the G-buffer geometry pipeline.
pub fn init_gbuffer_geometry_pipeline(
    mut commands: Commands,
    pipeline_cache: Res<PipelineCache>,
    asset_server: Res<AssetServer>,
    layouts: Res<DeferredLayouts>,
    existing: Option<Res<GBufferGeometryPipeline>>,
) {
    if existing.is_some() {
        return;
    }

    let shader = asset_server.load("shaders/gbuffer.wgsl");

    let pipeline_id = pipeline_cache.queue_render_pipeline(RenderPipelineDescriptor {
        label: Some("gbuffer_geometry_pipeline".into()),
        layout: vec![layouts.view.clone(), layouts.mesh.clone()],
        push_constant_ranges: vec![],
        vertex: VertexState {
            shader: shader.clone(),
            shader_defs: vec![],
            entry_point: Some("vertex".into()),
            buffers: vec![deferred_mesh_vertex_layout()],
        },
        primitive: PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: Some(wgpu::Face::Back),
            unclipped_depth: false,
            polygon_mode: wgpu::PolygonMode::Fill,
            conservative: false,
        },
        depth_stencil: Some(DepthStencilState {
            format: GBUFFER_DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: CompareFunction::GreaterEqual, // Reverse-Z
            stencil: StencilState::default(),
            bias: Default::default(),
        }),
        multisample: MultisampleState::default(),
        fragment: Some(FragmentState {
            shader,
            shader_defs: vec![],
            entry_point: Some("fragment".into()),
            targets: vec![
                Some(ColorTargetState {
                    format: GBUFFER_POSITION_FORMAT,
                    blend: None,
                    write_mask: ColorWrites::ALL,
                }),
                Some(ColorTargetState {
                    format: GBUFFER_NORMAL_FORMAT,
                    blend: None,
                    write_mask: ColorWrites::ALL,
                }),
                Some(ColorTargetState {
                    format: GBUFFER_ALBEDO_SPEC_FORMAT,
                    blend: None,
                    write_mask: ColorWrites::ALL,
                }),
            ],
        }),
        zero_initialize_workgroup_memory: false,
    });

    commands.insert_resource(GBufferGeometryPipeline { pipeline_id });
    info!("GBufferGeometryPipeline initialized");
}

/// Per-view uniform buffer and bind group.
#[derive(Component)]
pub struct ViewDeferredUniforms {
    #[allow(dead_code)]
    pub buffer: Buffer, // Kept alive to back the bind group
    pub bind_group: BindGroup,
    pub world_position: Vec3,
}

/// System to prepare view uniforms for each deferred camera.
pub fn prepare_deferred_view_uniforms(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    layouts: Res<DeferredLayouts>,
    cameras: Query<(Entity, &ExtractedCamera, &ExtractedView), With<DeferredCamera>>,
) {
    for (entity, camera, view) in cameras.iter() {
        let Some(viewport_size) = camera.physical_viewport_size else {
            continue;
        };

        let world_from_view = view.world_from_view.to_matrix();
        let clip_from_world = view
            .clip_from_world
            .unwrap_or(view.clip_from_view * world_from_view.inverse());
        let world_position = view.world_from_view.translation();

        let view_uniform = DeferredViewUniform {
            clip_from_world: clip_from_world.to_cols_array_2d(),
            world_position: world_position.to_array(),
            _padding: 0.0,
            viewport: [0.0, 0.0, viewport_size.x as f32, viewport_size.y as f32],
        };

        let buffer = render_device.create_buffer_with_data(&BufferInitDescriptor {
            label: Some("deferred_view_uniform"),
            contents: bytemuck::bytes_of(&view_uniform),
            usage: BufferUsages::UNIFORM,
        });

        let bind_group = render_device.create_bind_group(
            Some("deferred_view_bind_group"),
            &layouts.view,
            &[BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        );

        commands.entity(entity).insert(ViewDeferredUniforms {
            buffer,
            bind_group,
            world_position,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_sizes_match_wgsl() {
        // struct View { mat4x4, vec3 (+pad), vec4 }
        assert_eq!(std::mem::size_of::<DeferredViewUniform>(), 96);
        // struct Mesh { mat4x4, mat4x4, vec4 }
        assert_eq!(std::mem::size_of::<DeferredMeshUniform>(), 144);
    }

    #[test]
    fn test_normal_matrix_undoes_non_uniform_scale() {
        let world_from_local = Mat4::from_scale(Vec3::new(4.0, 1.0, 1.0));
        let uniform = DeferredMeshUniform::new(world_from_local, [1.0; 4]);
        let normal_from_local = Mat4::from_cols_array_2d(&uniform.normal_from_local);

        // A 45 degree slope stretched along X must tilt its normal toward Y.
        let normal = normal_from_local
            .transform_vector3(Vec3::new(1.0, 1.0, 0.0).normalize())
            .normalize();
        assert!(normal.y > normal.x);
    }

    #[test]
    fn test_vertex_layout_matches_builtin_meshes() {
        let layout = deferred_mesh_vertex_layout();
        assert_eq!(layout.array_stride, 32);
        assert_eq!(layout.attributes[1].offset, 12);
        assert_eq!(layout.attributes[1].shader_location, 1);
    }
}
