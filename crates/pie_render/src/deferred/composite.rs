//! Final composite: HDR + bloom, tone mapping, gamma.
//!
//! The composite pass writes a gamma-encoded 8-bit image, then the present
//! pass copies it into the camera's view target.

use bevy::image::BevyDefault;
use bevy::prelude::*;
use bevy::render::{
    camera::ExtractedCamera,
    extract_resource::ExtractResource,
    render_resource::{
        BindGroupLayout, BindGroupLayoutEntry, BindingType, Buffer, BufferBindingType,
        BufferInitDescriptor, BufferUsages, CachedRenderPipelineId, ColorTargetState, ColorWrites,
        FragmentState, MultisampleState, PipelineCache, PrimitiveState, RenderPipelineDescriptor,
        ShaderStages, TextureFormat, TextureSampleType, TextureViewDimension, VertexState,
    },
    renderer::RenderDevice,
    texture::{CachedTexture, TextureCache},
};
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use super::bloom::BloomConfig;
use super::gbuffer::{screen_texture, view_texture_size, DeferredCamera};
use crate::shading::ToneMapping;

/// Display-ready image format, already gamma encoded.
pub const FINAL_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

#[derive(Resource, ExtractResource, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeConfig {
    pub tone_mapping: ToneMapping,
    /// Only used by [`ToneMapping::Filmic`].
    pub exposure: f32,
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            tone_mapping: ToneMapping::Filmic,
            exposure: 1.0,
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct CompositeUniform {
    pub bloom_intensity: f32,
    pub exposure: f32,
    /// [`ToneMapping::shader_index`]
    pub mode: u32,
    pub _padding: u32,
}

impl CompositeUniform {
    pub fn new(composite: &CompositeConfig, bloom: &BloomConfig) -> Self {
        Self {
            bloom_intensity: bloom.intensity,
            exposure: composite.exposure,
            mode: composite.tone_mapping.shader_index(),
            _padding: 0,
        }
    }
}

#[derive(Component)]
pub struct ViewFinalTexture {
    pub texture: CachedTexture,
}

pub fn prepare_final_textures(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    mut texture_cache: ResMut<TextureCache>,
    cameras: Query<(Entity, &ExtractedCamera), With<DeferredCamera>>,
) {
    for (entity, camera) in cameras.iter() {
        let Some(size) = view_texture_size(camera) else {
            continue;
        };
        let texture = screen_texture(&render_device, &mut texture_cache, "final_color", size, FINAL_FORMAT);
        commands.entity(entity).insert(ViewFinalTexture { texture });
    }
}

/// This frame's composite parameters.
#[derive(Resource)]
pub struct CompositeUniformBuffer {
    pub buffer: Buffer,
}

pub fn prepare_composite_uniforms(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    composite: Res<CompositeConfig>,
    bloom: Res<BloomConfig>,
) {
    let uniform = CompositeUniform::new(&composite, &bloom);
    let buffer = render_device.create_buffer_with_data(&BufferInitDescriptor {
        label: Some("composite_uniform"),
        contents: bytemuck::bytes_of(&uniform),
        usage: BufferUsages::UNIFORM,
    });
    commands.insert_resource(CompositeUniformBuffer { buffer });
}

fn texture_entry(binding: u32) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::FRAGMENT,
        ty: BindingType::Texture {
            sample_type: TextureSampleType::Float { filterable: false },
            view_dimension: TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

/// Composite and present pipelines.
#[derive(Resource)]
pub struct CompositePipeline {
    pub composite_pipeline_id: CachedRenderPipelineId,
    pub present_pipeline_id: CachedRenderPipelineId,
    /// HDR, bloom, [`CompositeUniform`]
    pub composite_layout: BindGroupLayout,
    /// Final image
    pub present_layout: BindGroupLayout,
}

/// Format the present pass writes; the view target of a non-HDR camera.
pub fn present_format() -> TextureFormat {
    TextureFormat::bevy_default()
}

fn fullscreen_pipeline(
    label: &'static str,
    shader: Handle<Shader>,
    layout: BindGroupLayout,
    format: TextureFormat,
) -> RenderPipelineDescriptor {
    RenderPipelineDescriptor {
        label: Some(label.into()),
        layout: vec![layout],
        push_constant_ranges: vec![],
        vertex: VertexState {
            shader: shader.clone(),
            shader_defs: vec![],
            entry_point: Some("vs_main".into()),
            buffers: vec![],
        },
        primitive: PrimitiveState::default(),
        depth_stencil: None,
        multisample: MultisampleState::default(),
        fragment: Some(FragmentState {
            shader,
            shader_defs: vec![],
            entry_point: Some("fs_main".into()),
            targets: vec![Some(ColorTargetState {
                format,
                blend: None,
                write_mask: ColorWrites::ALL,
            })],
        }),
        zero_initialize_workgroup_memory: false,
    }
}

pub fn init_composite_pipeline(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    pipeline_cache: Res<PipelineCache>,
    asset_server: Res<AssetServer>,
    existing: Option<Res<CompositePipeline>>,
) {
    if existing.is_some() {
        return;
    }

    let composite_layout = render_device.create_bind_group_layout(
        "composite_layout",
        &[
            texture_entry(0),
            texture_entry(1),
            BindGroupLayoutEntry {
                binding: 2,
                visibility: ShaderStages::FRAGMENT,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
    );
    let present_layout = render_device.create_bind_group_layout("present_layout", &[texture_entry(0)]);

    let composite_pipeline_id = pipeline_cache.queue_render_pipeline(fullscreen_pipeline(
        "composite_pipeline",
        asset_server.load("shaders/composite.wgsl"),
        composite_layout.clone(),
        FINAL_FORMAT,
    ));
    let present_pipeline_id = pipeline_cache.queue_render_pipeline(fullscreen_pipeline(
        "present_pipeline",
        asset_server.load("shaders/present.wgsl"),
        present_layout.clone(),
        present_format(),
    ));

    commands.insert_resource(CompositePipeline {
        composite_pipeline_id,
        present_pipeline_id,
        composite_layout,
        present_layout,
    });
    info!("CompositePipeline initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_carries_bloom_intensity_and_mode() {
        let bloom = BloomConfig {
            intensity: 0.75,
            ..default()
        };
        let composite = CompositeConfig {
            tone_mapping: ToneMapping::Reinhard,
            exposure: 2.0,
        };
        let uniform = CompositeUniform::new(&composite, &bloom);
        assert_eq!(uniform.bloom_intensity, 0.75);
        assert_eq!(uniform.exposure, 2.0);
        assert_eq!(uniform.mode, 0);
        assert_eq!(std::mem::size_of::<CompositeUniform>(), 16);
    }

    #[test]
    fn test_defaults_use_filmic() {
        let uniform = CompositeUniform::new(&CompositeConfig::default(), &BloomConfig::default());
        assert_eq!(uniform.mode, ToneMapping::Filmic.shader_index());
        assert_eq!(uniform.exposure, 1.0);
    }
}
