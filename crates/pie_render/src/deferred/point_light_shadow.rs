//! Point light shadow mapping using cube shadow maps.
//!
//! Each shadow-casting point light renders the scene 6 times (one per cube face)
//! from the light's position. Faces store the normalized distance from the
//! light to the nearest surface, `distance / far`.
//!
//! ## Architecture
//!
//! ```text
//! One depth texture, 6 layers per registry slot:
//!   layer = slot * 6 + face   (face order +X, -X, +Y, -Y, +Z, -Z)
//!   rendered through per-layer 2D views
//!   sampled through a single cube-array view
//!
//! In lighting pass:
//!   Sample cube slot using direction from light to fragment
//!   Compare fragment distance vs stored distance * far
//! ```

use bevy::prelude::*;
use bevy::render::{
    render_resource::{
        BindGroup, BindGroupEntry, BindGroupLayout, BindGroupLayoutEntry, BindingType, Buffer,
        BufferBindingType, BufferInitDescriptor, BufferUsages, CachedRenderPipelineId,
        CompareFunction, DepthStencilState, Extent3d, FragmentState, PipelineCache,
        PrimitiveState, RenderPipelineDescriptor, ShaderStages, StencilState, TextureDescriptor,
        TextureDimension, TextureFormat, TextureUsages, TextureView, TextureViewDescriptor,
        TextureViewDimension, VertexState,
    },
    renderer::RenderDevice,
    texture::{CachedTexture, TextureCache},
};
use bytemuck::{Pod, Zeroable};

use super::gbuffer_geometry::{deferred_mesh_vertex_layout, DeferredLayouts};
use super::light::{ExtractedLights, LightKind};
use super::shadow_registry::PointShadowCapacity;

/// Resolution of each cube face.
pub const POINT_SHADOW_MAP_SIZE: u32 = 1024;

/// Depth format for point light shadow maps.
pub const POINT_SHADOW_DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// Near plane of every cube face projection.
pub const POINT_SHADOW_NEAR: f32 = 0.1;

/// Far plane for a light of `radius`. Matches `point_shadow_far` in
/// `deferred_lighting.wgsl`.
pub fn point_shadow_far(radius: f32) -> f32 {
    radius.max(2.0 * POINT_SHADOW_NEAR)
}

/// Array layer holding `face` of the cube in `slot`.
pub fn face_layer(slot: u32, face: usize) -> u32 {
    slot * 6 + face as u32
}

/// Look direction and up vector per face, in cube map layer order.
///
/// The view space is right-handed, so the +Z layer looks down -Z. The
/// lighting shader flips z on the lookup direction to compensate.
pub const CUBE_FACES: [(Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::Y),
    (Vec3::NEG_X, Vec3::Y),
    (Vec3::Y, Vec3::Z),
    (Vec3::NEG_Y, Vec3::NEG_Z),
    (Vec3::NEG_Z, Vec3::Y),
    (Vec3::Z, Vec3::Y),
];

/// View-projection matrices for rendering all 6 faces of a cube shadow map.
///
/// Each face has a 90° FOV perspective projection looking outward from the
/// light position.
#[derive(Clone, Copy, Debug)]
pub struct CubeFaceMatrices {
    pub clip_from_world: [Mat4; 6],
}

impl CubeFaceMatrices {
    pub fn new(light_position: Vec3, near: f32, far: f32) -> Self {
        let projection = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, near, far);
        let clip_from_world = CUBE_FACES.map(|(direction, up)| {
            projection * Mat4::look_to_rh(light_position, direction, up)
        });
        Self { clip_from_world }
    }
}

/// Uniform for one cube face render.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct PointShadowUniform {
    pub clip_from_world: [[f32; 4]; 4],
    /// Light position (xyz) and far plane (w).
    pub light_position_far: [f32; 4],
}

/// Pipeline for rendering point light shadow depth.
#[derive(Resource)]
pub struct PointShadowPipeline {
    pub pipeline_id: CachedRenderPipelineId,
    /// Bind group layout for [`PointShadowUniform`].
    pub view_layout: BindGroupLayout,
}

/// Initialize the point light shadow pipeline.
pub fn init_point_shadow_pipeline(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    pipeline_cache: Res<PipelineCache>,
    asset_server: Res<AssetServer>,
    layouts: Res<DeferredLayouts>,
    existing: Option<Res<PointShadowPipeline>>,
) {
    if existing.is_some() {
        return;
    }

    let view_layout = render_device.create_bind_group_layout(
        "point_shadow_view_layout",
        &[BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStages::VERTEX_FRAGMENT,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }],
    );

    let shader = asset_server.load("shaders/point_shadow_depth.wgsl");

    // Fragment stage writes normalized distance to frag_depth; no color targets.
    let pipeline_id = pipeline_cache.queue_render_pipeline(RenderPipelineDescriptor {
        label: Some("point_shadow_depth_pipeline".into()),
        layout: vec![view_layout.clone(), layouts.mesh.clone()],
        push_constant_ranges: vec![],
        vertex: VertexState {
            shader: shader.clone(),
            shader_defs: vec![],
            entry_point: Some("vs_main".into()),
            buffers: vec![deferred_mesh_vertex_layout()],
        },
        primitive: PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            unclipped_depth: false,
            polygon_mode: wgpu::PolygonMode::Fill,
            conservative: false,
        },
        depth_stencil: Some(DepthStencilState {
            format: POINT_SHADOW_DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: CompareFunction::LessEqual,
            stencil: StencilState::default(),
            bias: Default::default(),
        }),
        multisample: Default::default(),
        fragment: Some(FragmentState {
            shader,
            shader_defs: vec![],
            entry_point: Some("fs_main".into()),
            targets: vec![],
        }),
        zero_initialize_workgroup_memory: false,
    });

    commands.insert_resource(PointShadowPipeline {
        pipeline_id,
        view_layout,
    });

    info!(
        "PointShadowPipeline initialized ({}x{} per face)",
        POINT_SHADOW_MAP_SIZE, POINT_SHADOW_MAP_SIZE
    );
}

/// One cube face render: target layer plus its uniforms.
pub struct PointShadowFacePass {
    pub layer: u32,
    #[allow(dead_code)]
    pub buffer: Buffer, // Kept alive to back the bind group
    pub bind_group: BindGroup,
}

/// Cube shadow maps for all registry slots.
#[derive(Resource)]
pub struct PointShadowMaps {
    pub texture: CachedTexture,
    /// Cube-array view sampled by the lighting pass.
    pub cube_array_view: TextureView,
    /// One 2D view per array layer, rendered by the shadow pass.
    pub layer_views: Vec<TextureView>,
    /// Faces to render this frame.
    pub passes: Vec<PointShadowFacePass>,
    /// Slots whose cube maps are valid this frame.
    pub rendered_slots: Vec<u32>,
}

impl PointShadowMaps {
    pub fn has_slot(&self, slot: u32) -> bool {
        self.rendered_slots.contains(&slot)
    }
}

/// Prepare the cube map array and per-face uniforms.
///
/// The array always holds at least one cube so the lighting pass has
/// something to bind when no slots are configured.
pub fn prepare_point_shadow_maps(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    mut texture_cache: ResMut<TextureCache>,
    pipeline: Option<Res<PointShadowPipeline>>,
    capacity: Option<Res<PointShadowCapacity>>,
    lights: Option<Res<ExtractedLights>>,
) {
    let Some(pipeline) = pipeline else {
        return;
    };
    let capacity = capacity.map(|c| c.0).unwrap_or(0);
    let cube_count = capacity.max(1);

    let texture = texture_cache.get(
        &render_device,
        TextureDescriptor {
            label: Some("point_shadow_maps"),
            size: Extent3d {
                width: POINT_SHADOW_MAP_SIZE,
                height: POINT_SHADOW_MAP_SIZE,
                depth_or_array_layers: cube_count * 6,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: POINT_SHADOW_DEPTH_FORMAT,
            usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        },
    );

    let cube_array_view = texture.texture.create_view(&TextureViewDescriptor {
        label: Some("point_shadow_cube_array_view"),
        dimension: Some(TextureViewDimension::CubeArray),
        array_layer_count: Some(cube_count * 6),
        ..default()
    });

    let layer_views = (0..cube_count * 6)
        .map(|layer| {
            texture.texture.create_view(&TextureViewDescriptor {
                label: Some("point_shadow_face_view"),
                dimension: Some(TextureViewDimension::D2),
                base_array_layer: layer,
                array_layer_count: Some(1),
                ..default()
            })
        })
        .collect();

    let mut passes = Vec::new();
    let mut rendered_slots = Vec::new();

    for (slot, light) in lights
        .iter()
        .flat_map(|lights| lights.shadow_casting_points(capacity))
    {
        let LightKind::Point { radius } = light.kind else {
            continue;
        };
        let far = point_shadow_far(radius);
        let matrices = CubeFaceMatrices::new(light.position, POINT_SHADOW_NEAR, far);

        for (face, clip_from_world) in matrices.clip_from_world.iter().enumerate() {
            let uniform = PointShadowUniform {
                clip_from_world: clip_from_world.to_cols_array_2d(),
                light_position_far: light.position.extend(far).to_array(),
            };

            let buffer = render_device.create_buffer_with_data(&BufferInitDescriptor {
                label: Some("point_shadow_view_uniform"),
                contents: bytemuck::bytes_of(&uniform),
                usage: BufferUsages::UNIFORM,
            });

            let bind_group = render_device.create_bind_group(
                Some("point_shadow_view_bind_group"),
                &pipeline.view_layout,
                &[BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                }],
            );

            passes.push(PointShadowFacePass {
                layer: face_layer(slot, face),
                buffer,
                bind_group,
            });
        }
        rendered_slots.push(slot);
    }

    if !rendered_slots.is_empty() {
        debug!("Rendering {} point light shadow cubes", rendered_slots.len());
    }

    commands.insert_resource(PointShadowMaps {
        texture,
        cube_array_view,
        layer_views,
        passes,
        rendered_slots,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_ndc(clip_from_world: Mat4, point: Vec3) -> Vec3 {
        clip_from_world.project_point3(point)
    }

    fn in_frustum(ndc: Vec3) -> bool {
        ndc.x.abs() <= 1.0 && ndc.y.abs() <= 1.0 && (0.0..=1.0).contains(&ndc.z)
    }

    #[test]
    fn test_each_face_centers_its_direction() {
        let light = Vec3::new(2.0, 3.0, -1.0);
        let matrices = CubeFaceMatrices::new(light, POINT_SHADOW_NEAR, 20.0);

        for (face, (direction, _)) in CUBE_FACES.iter().enumerate() {
            let ndc = to_ndc(matrices.clip_from_world[face], light + *direction * 5.0);
            assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4, "face {face}: {ndc:?}");
            assert!(in_frustum(ndc), "face {face}: {ndc:?}");
        }
    }

    /// Hardware cube lookup: layer index and texel uv for direction `l`.
    fn cube_lookup(l: Vec3) -> (usize, Vec2) {
        let a = l.abs();
        let (face, sc, tc, ma) = if a.x >= a.y && a.x >= a.z {
            if l.x > 0.0 {
                (0, -l.z, -l.y, a.x)
            } else {
                (1, l.z, -l.y, a.x)
            }
        } else if a.y >= a.z {
            if l.y > 0.0 {
                (2, l.x, l.z, a.y)
            } else {
                (3, l.x, -l.z, a.y)
            }
        } else if l.z > 0.0 {
            (4, l.x, -l.y, a.z)
        } else {
            (5, -l.x, -l.y, a.z)
        };
        (face, 0.5 * (Vec2::new(sc, tc) / ma + Vec2::ONE))
    }

    #[test]
    fn test_lighting_lookup_hits_rendered_texel() {
        let light = Vec3::new(-1.0, 2.0, 4.0);
        let matrices = CubeFaceMatrices::new(light, POINT_SHADOW_NEAR, 20.0);
        let offset = Vec3::new(0.3, -0.2, 0.25);

        for (face, (direction, _)) in CUBE_FACES.iter().enumerate() {
            let d = *direction + offset - *direction * offset.dot(*direction);

            let ndc = to_ndc(matrices.clip_from_world[face], light + d * 3.0);
            assert!(in_frustum(ndc), "face {face}: {ndc:?}");
            let rendered_uv = Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);

            // deferred_lighting.wgsl samples with z flipped
            let (sampled_face, sampled_uv) = cube_lookup(Vec3::new(d.x, d.y, -d.z));
            assert_eq!(sampled_face, face, "direction {d:?}");
            assert!(
                sampled_uv.abs_diff_eq(rendered_uv, 1e-4),
                "face {face}: sampled {sampled_uv:?}, rendered {rendered_uv:?}"
            );
        }
    }

    #[test]
    fn test_faces_cover_every_direction() {
        let light = Vec3::ZERO;
        let matrices = CubeFaceMatrices::new(light, POINT_SHADOW_NEAR, 20.0);
        let directions = [
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::new(-1.0, 0.3, 0.2),
            Vec3::new(0.1, -1.0, 0.9),
            Vec3::new(0.7, 0.2, -0.6),
            Vec3::new(-0.4, -0.4, -1.0),
        ];

        for direction in directions {
            let point = direction.normalize() * 5.0;
            let covered = matrices
                .clip_from_world
                .iter()
                .any(|m| in_frustum(to_ndc(*m, point)));
            assert!(covered, "{direction:?} not covered by any face");
        }
    }

    #[test]
    fn test_far_plane_never_below_twice_near() {
        assert_eq!(point_shadow_far(12.0), 12.0);
        assert!((point_shadow_far(0.05) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_face_layers_are_contiguous_per_slot() {
        assert_eq!(face_layer(0, 0), 0);
        assert_eq!(face_layer(0, 5), 5);
        assert_eq!(face_layer(3, 2), 20);
    }

    #[test]
    fn test_uniform_size_matches_wgsl() {
        assert_eq!(std::mem::size_of::<PointShadowUniform>(), 80);
    }
}
