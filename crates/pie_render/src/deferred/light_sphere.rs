//! Emissive marker spheres for point lights.
//!
//! Drawn into the HDR buffer after lighting, depth-tested against the
//! G-buffer depth, so bright lights feed into bloom. One instanced draw of
//! a shared icosphere covers every point light.

use bevy::prelude::*;
use bevy::render::{
    extract_resource::ExtractResource,
    render_resource::{
        Buffer, BufferInitDescriptor, BufferUsages, CachedRenderPipelineId, ColorTargetState,
        ColorWrites, CompareFunction, DepthStencilState, FragmentState, IndexFormat,
        MultisampleState, PipelineCache, PrimitiveState, RenderPipelineDescriptor, StencilState,
        VertexState,
    },
    renderer::RenderDevice,
};
use bevy_mesh::{VertexBufferLayout, VertexFormat};
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use super::gbuffer::GBUFFER_DEPTH_FORMAT;
use super::gbuffer_geometry::DeferredLayouts;
use super::light::{ExtractedLights, LightKind};
use super::lighting::HDR_FORMAT;
use crate::primitives::{icosphere, positions_and_indices, LIGHT_SPHERE_RADIUS};

/// Icosphere subdivision level of the marker mesh.
pub const LIGHT_SPHERE_SUBDIVISIONS: u32 = 2;

/// Light sphere configuration.
#[derive(Resource, ExtractResource, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightSphereConfig {
    pub enabled: bool,
    /// Sphere scale per unit of light radius.
    pub scale_factor: f32,
    /// Emissive intensity per unit of sphere scale.
    pub intensity_per_unit_scale: f32,
}

impl Default for LightSphereConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scale_factor: 0.2,
            intensity_per_unit_scale: 20.0,
        }
    }
}

/// Per-instance data (32 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct LightSphereInstance {
    /// xyz = light position, w = scale
    pub center_scale: [f32; 4],
    /// rgb = color * intensity, a = 1
    pub emissive: [f32; 4],
}

/// One marker per point light. Directional lights have no position to mark.
pub fn light_sphere_instances(
    lights: &ExtractedLights,
    config: &LightSphereConfig,
) -> Vec<LightSphereInstance> {
    lights
        .lights
        .iter()
        .filter_map(|light| match light.kind {
            LightKind::Point { radius } => {
                let scale = radius * config.scale_factor;
                let intensity = scale * config.intensity_per_unit_scale;
                Some(LightSphereInstance {
                    center_scale: light.position.extend(scale).to_array(),
                    emissive: (light.color * intensity).extend(1.0).to_array(),
                })
            }
            LightKind::Directional { .. } => None,
        })
        .collect()
}

/// Index format of [`LightSphereMesh::index_buffer`].
pub const LIGHT_SPHERE_INDEX_FORMAT: IndexFormat = IndexFormat::Uint32;

/// GPU copy of the marker icosphere.
pub struct LightSphereMesh {
    pub vertex_buffer: Buffer,
    pub index_buffer: Buffer,
    pub index_count: u32,
}

#[derive(Resource)]
pub struct LightSpherePipeline {
    pub pipeline_id: CachedRenderPipelineId,
    /// None if the mesh could not be built; the pass is then skipped.
    pub mesh: Option<LightSphereMesh>,
}

fn upload_sphere_mesh(render_device: &RenderDevice) -> Option<LightSphereMesh> {
    let mesh = icosphere(LIGHT_SPHERE_SUBDIVISIONS, LIGHT_SPHERE_RADIUS)
        .and_then(|mesh| positions_and_indices(&mesh));
    let (positions, indices) = match mesh {
        Ok(data) => data,
        Err(err) => {
            warn!("Light spheres disabled: {}", err);
            return None;
        }
    };

    let vertex_buffer = render_device.create_buffer_with_data(&BufferInitDescriptor {
        label: Some("light_sphere_vertices"),
        contents: bytemuck::cast_slice(&positions),
        usage: BufferUsages::VERTEX,
    });
    let index_buffer = render_device.create_buffer_with_data(&BufferInitDescriptor {
        label: Some("light_sphere_indices"),
        contents: bytemuck::cast_slice(&indices),
        usage: BufferUsages::INDEX,
    });

    Some(LightSphereMesh {
        vertex_buffer,
        index_buffer,
        index_count: indices.len() as u32,
    })
}

pub fn init_light_sphere_pipeline(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    pipeline_cache: Res<PipelineCache>,
    asset_server: Res<AssetServer>,
    layouts: Res<DeferredLayouts>,
    existing: Option<Res<LightSpherePipeline>>,
) {
    if existing.is_some() {
        return;
    }

    let shader = asset_server.load("shaders/light_sphere.wgsl");

    let position_layout = VertexBufferLayout::from_vertex_formats(
        wgpu::VertexStepMode::Vertex,
        [VertexFormat::Float32x3],
    );
    let mut instance_layout = VertexBufferLayout::from_vertex_formats(
        wgpu::VertexStepMode::Instance,
        [VertexFormat::Float32x4, VertexFormat::Float32x4],
    );
    // Instance attributes follow the position at location 0.
    for (location, attribute) in instance_layout.attributes.iter_mut().enumerate() {
        attribute.shader_location = location as u32 + 1;
    }

    let pipeline_id = pipeline_cache.queue_render_pipeline(RenderPipelineDescriptor {
        label: Some("light_sphere_pipeline".into()),
        layout: vec![layouts.view.clone()],
        push_constant_ranges: vec![],
        vertex: VertexState {
            shader: shader.clone(),
            shader_defs: vec![],
            entry_point: Some("vs_main".into()),
            buffers: vec![position_layout, instance_layout],
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
            depth_compare: CompareFunction::GreaterEqual, // Reverse-Z, same as geometry
            stencil: StencilState::default(),
            bias: Default::default(),
        }),
        multisample: MultisampleState::default(),
        fragment: Some(FragmentState {
            shader,
            shader_defs: vec![],
            entry_point: Some("fs_main".into()),
            targets: vec![Some(ColorTargetState {
                format: HDR_FORMAT,
                blend: None,
                write_mask: ColorWrites::ALL,
            })],
        }),
        zero_initialize_workgroup_memory: false,
    });

    commands.insert_resource(LightSpherePipeline {
        pipeline_id,
        mesh: upload_sphere_mesh(&render_device),
    });
    info!("LightSpherePipeline initialized");
}

/// Instance buffer for this frame's markers.
#[derive(Resource, Default)]
pub struct LightSphereInstances {
    pub buffer: Option<Buffer>,
    pub count: u32,
}

pub fn prepare_light_sphere_instances(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    config: Res<LightSphereConfig>,
    lights: Option<Res<ExtractedLights>>,
) {
    let instances = match (&lights, config.enabled) {
        (Some(lights), true) => light_sphere_instances(lights, &config),
        _ => Vec::new(),
    };

    if instances.is_empty() {
        commands.insert_resource(LightSphereInstances::default());
        return;
    }

    let buffer = render_device.create_buffer_with_data(&BufferInitDescriptor {
        label: Some("light_sphere_instances"),
        contents: bytemuck::cast_slice(&instances),
        usage: BufferUsages::VERTEX,
    });

    commands.insert_resource(LightSphereInstances {
        buffer: Some(buffer),
        count: instances.len() as u32,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::light::ExtractedLight;

    fn light(kind: LightKind, color: Vec3) -> ExtractedLight {
        ExtractedLight {
            kind,
            position: Vec3::new(1.0, 2.0, 3.0),
            color,
            casts_shadow: false,
            shadow_slot: None,
        }
    }

    #[test]
    fn test_marker_scale_and_intensity_follow_radius() {
        let lights = ExtractedLights::from_lights([light(
            LightKind::Point { radius: 10.0 },
            Vec3::new(1.0, 0.5, 0.0),
        )]);
        let instances = light_sphere_instances(&lights, &LightSphereConfig::default());

        assert_eq!(instances.len(), 1);
        // scale = 10 * 0.2 = 2, intensity = 2 * 20 = 40
        assert_eq!(instances[0].center_scale, [1.0, 2.0, 3.0, 2.0]);
        assert_eq!(instances[0].emissive, [40.0, 20.0, 0.0, 1.0]);
    }

    #[test]
    fn test_directional_lights_have_no_marker() {
        let lights = ExtractedLights::from_lights([
            light(LightKind::Directional { direction: Vec3::NEG_Y }, Vec3::ONE),
            light(LightKind::Point { radius: 5.0 }, Vec3::ONE),
        ]);
        let instances = light_sphere_instances(&lights, &LightSphereConfig::default());
        assert_eq!(instances.len(), 1);
    }
}
