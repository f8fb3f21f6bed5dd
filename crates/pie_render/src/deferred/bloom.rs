//! Bloom post-processing for deferred rendering.
//!
//! Implements a separable Gaussian bloom:
//! 1. Bright pass: keep pixels whose luminance is above the threshold
//! 2. Blur: `iterations` x (horizontal into ping, vertical into pong)
//! 3. The composite pass adds the result onto the HDR image
//!
//! All bloom targets are full viewport resolution.

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

use super::gbuffer::{screen_texture, view_texture_size, DeferredCamera};

/// Format of the bright and blur targets.
pub const BLOOM_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

/// Bloom configuration.
#[derive(Resource, ExtractResource, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomConfig {
    /// When false the bloom buffer is cleared to black.
    pub enabled: bool,
    /// Luminance a pixel must exceed to bloom
    pub threshold: f32,
    /// Bloom intensity multiplier in the composite pass
    pub intensity: f32,
    /// Horizontal + vertical blur pairs
    pub iterations: u32,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.3,
            intensity: 1.0,
            iterations: 5,
        }
    }
}

/// The three bloom render targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BloomTarget {
    Bright,
    Ping,
    Pong,
}

/// One blur pass of the ping-pong chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlurStep {
    pub source: BloomTarget,
    pub target: BloomTarget,
    pub horizontal: bool,
}

/// Blur passes for `iterations` rounds. The first round reads the bright
/// pass, later rounds read the previous vertical result.
pub fn blur_steps(iterations: u32) -> Vec<BlurStep> {
    (0..iterations)
        .flat_map(|round| {
            let source = if round == 0 {
                BloomTarget::Bright
            } else {
                BloomTarget::Pong
            };
            [
                BlurStep {
                    source,
                    target: BloomTarget::Ping,
                    horizontal: true,
                },
                BlurStep {
                    source: BloomTarget::Ping,
                    target: BloomTarget::Pong,
                    horizontal: false,
                },
            ]
        })
        .collect()
}

/// Target the composite pass reads bloom from.
///
/// Disabled bloom clears pong to black, so pong is the answer unless bloom
/// runs with no blur at all.
pub fn bloom_output(config: &BloomConfig) -> BloomTarget {
    if config.enabled && config.iterations == 0 {
        BloomTarget::Bright
    } else {
        BloomTarget::Pong
    }
}

/// What the bloom node does for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BloomWork {
    /// Clear the texture the composite reads, so it adds nothing.
    Clear(BloomTarget),
    /// Bright pass then blur.
    Run,
}

/// Bloom runs only when enabled and its pipelines have compiled. Otherwise the
/// composite input is cleared instead of left holding a stale frame.
pub fn bloom_work(config: &BloomConfig, pipelines_ready: bool) -> BloomWork {
    if config.enabled && pipelines_ready {
        BloomWork::Run
    } else {
        BloomWork::Clear(bloom_output(config))
    }
}

/// Bloom textures for a camera view.
#[derive(Component)]
pub struct ViewBloomTextures {
    pub bright: CachedTexture,
    pub ping: CachedTexture,
    pub pong: CachedTexture,
}

impl ViewBloomTextures {
    pub fn get(&self, target: BloomTarget) -> &CachedTexture {
        match target {
            BloomTarget::Bright => &self.bright,
            BloomTarget::Ping => &self.ping,
            BloomTarget::Pong => &self.pong,
        }
    }
}

/// Prepare bloom textures for cameras.
pub fn prepare_bloom_textures(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    mut texture_cache: ResMut<TextureCache>,
    cameras: Query<(Entity, &ExtractedCamera), With<DeferredCamera>>,
) {
    for (entity, camera) in cameras.iter() {
        let Some(size) = view_texture_size(camera) else {
            continue;
        };

        let mut texture =
            |label| screen_texture(&render_device, &mut texture_cache, label, size, BLOOM_FORMAT);
        let bloom_textures = ViewBloomTextures {
            bright: texture("bloom_bright"),
            ping: texture("bloom_ping"),
            pong: texture("bloom_pong"),
        };

        commands.entity(entity).insert(bloom_textures);
    }
}

/// Uniform shared by the bloom shaders.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct BloomUniform {
    /// Bright pass: x = threshold. Blur: xy = texel step direction.
    pub params: [f32; 4],
}

/// Bloom pipeline resources.
#[derive(Resource)]
pub struct BloomPipeline {
    pub extract_pipeline_id: CachedRenderPipelineId,
    pub blur_pipeline_id: CachedRenderPipelineId,
    /// Source texture + [`BloomUniform`]
    pub source_layout: BindGroupLayout,
    pub horizontal: Buffer,
    pub vertical: Buffer,
}

impl BloomPipeline {
    pub fn direction(&self, horizontal: bool) -> &Buffer {
        if horizontal {
            &self.horizontal
        } else {
            &self.vertical
        }
    }
}

fn uniform_buffer(render_device: &RenderDevice, label: &'static str, params: [f32; 4]) -> Buffer {
    render_device.create_buffer_with_data(&BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::bytes_of(&BloomUniform { params }),
        usage: BufferUsages::UNIFORM,
    })
}

fn fullscreen_pipeline(label: &'static str, shader: Handle<Shader>, layout: BindGroupLayout) -> RenderPipelineDescriptor {
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
                format: BLOOM_FORMAT,
                blend: None,
                write_mask: ColorWrites::ALL,
            })],
        }),
        zero_initialize_workgroup_memory: false,
    }
}

/// Initialize the bloom pipelines.
pub fn init_bloom_pipeline(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    pipeline_cache: Res<PipelineCache>,
    asset_server: Res<AssetServer>,
    existing: Option<Res<BloomPipeline>>,
) {
    if existing.is_some() {
        return;
    }

    let source_layout = render_device.create_bind_group_layout(
        "bloom_source_layout",
        &[
            BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::FRAGMENT,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: false },
                    view_dimension: TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            BindGroupLayoutEntry {
                binding: 1,
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

    let extract_shader = asset_server.load("shaders/bloom_extract.wgsl");
    let blur_shader = asset_server.load("shaders/bloom_blur.wgsl");

    let extract_pipeline_id = pipeline_cache.queue_render_pipeline(fullscreen_pipeline(
        "bloom_extract_pipeline",
        extract_shader,
        source_layout.clone(),
    ));
    let blur_pipeline_id = pipeline_cache.queue_render_pipeline(fullscreen_pipeline(
        "bloom_blur_pipeline",
        blur_shader,
        source_layout.clone(),
    ));

    commands.insert_resource(BloomPipeline {
        extract_pipeline_id,
        blur_pipeline_id,
        source_layout,
        horizontal: uniform_buffer(&render_device, "bloom_blur_horizontal", [1.0, 0.0, 0.0, 0.0]),
        vertical: uniform_buffer(&render_device, "bloom_blur_vertical", [0.0, 1.0, 0.0, 0.0]),
    });
    info!("BloomPipeline initialized");
}

/// Bright pass threshold for this frame.
#[derive(Resource)]
pub struct BloomThresholdUniform {
    pub buffer: Buffer,
}

pub fn prepare_bloom_uniforms(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    config: Res<BloomConfig>,
) {
    let buffer = uniform_buffer(
        &render_device,
        "bloom_threshold",
        [config.threshold, 0.0, 0.0, 0.0],
    );
    commands.insert_resource(BloomThresholdUniform { buffer });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blur_chain_alternates_and_ends_in_pong() {
        let steps = blur_steps(3);
        assert_eq!(steps.len(), 6);
        assert_eq!(steps[0].source, BloomTarget::Bright);
        for pair in steps.chunks(2) {
            assert!(pair[0].horizontal && pair[0].target == BloomTarget::Ping);
            assert!(!pair[1].horizontal && pair[1].source == BloomTarget::Ping);
            assert_eq!(pair[1].target, BloomTarget::Pong);
        }
        assert_eq!(steps[2].source, BloomTarget::Pong);
    }

    #[test]
    fn test_no_step_reads_its_own_target() {
        for step in blur_steps(5) {
            assert_ne!(step.source, step.target);
        }
    }

    #[test]
    fn test_unready_pipelines_clear_composite_input() {
        let mut config = BloomConfig::default();
        assert_eq!(bloom_work(&config, true), BloomWork::Run);
        assert_eq!(bloom_work(&config, false), BloomWork::Clear(BloomTarget::Pong));

        config.iterations = 0;
        assert_eq!(bloom_work(&config, false), BloomWork::Clear(BloomTarget::Bright));

        config.enabled = false;
        assert_eq!(bloom_work(&config, true), BloomWork::Clear(BloomTarget::Pong));
    }

    #[test]
    fn test_output_target() {
        let mut config = BloomConfig::default();
        assert_eq!(bloom_output(&config), BloomTarget::Pong);

        config.iterations = 0;
        assert_eq!(bloom_output(&config), BloomTarget::Bright);
        assert!(blur_steps(0).is_empty());

        config.enabled = false;
        assert_eq!(bloom_output(&config), BloomTarget::Pong);
    }
}
