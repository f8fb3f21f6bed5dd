//! Deferred lighting render graph node.
//!
//! This node performs a fullscreen pass that:
//! 1. Reads the G-buffer textures (position, normal, albedo+specular)
//! 2. Computes ambient + Blinn-Phong lighting for every light
//! 3. Attenuates by the directional PCF and point cube shadows
//! 4. Outputs unclamped HDR color

use bevy::prelude::*;
use bevy::render::{
    render_graph::{NodeRunError, RenderGraphContext, ViewNode},
    render_resource::{
        BindGroupEntry, BindGroupLayout, BindGroupLayoutEntry, BindingResource, BindingType,
        BufferBindingType, CachedRenderPipelineId, ColorTargetState, ColorWrites, FilterMode,
        FragmentState, LoadOp, MultisampleState, Operations, PipelineCache, PrimitiveState,
        RenderPassColorAttachment, RenderPassDescriptor, RenderPipelineDescriptor, Sampler,
        SamplerBindingType, SamplerDescriptor, ShaderStages, StoreOp, TextureSampleType,
        TextureViewDimension, VertexState,
    },
    renderer::{RenderContext, RenderDevice},
};

use super::gbuffer::ViewGBufferTextures;
use super::lighting::{ViewHdrTexture, ViewLightingUniforms, HDR_FORMAT};
use super::point_light_shadow::PointShadowMaps;
use super::shadow::ViewDirectionalShadow;

fn texture_entry(
    binding: u32,
    sample_type: TextureSampleType,
    view_dimension: TextureViewDimension,
) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::FRAGMENT,
        ty: BindingType::Texture {
            sample_type,
            view_dimension,
            multisampled: false,
        },
        count: None,
    }
}

/// Render graph node that performs deferred lighting.
///
/// Draws a fullscreen triangle into the view's HDR texture.
#[derive(Default)]
pub struct LightingPassNode;

impl ViewNode for LightingPassNode {
    type ViewQuery = (
        &'static ViewGBufferTextures,
        &'static ViewHdrTexture,
        &'static ViewLightingUniforms,
        &'static ViewDirectionalShadow,
    );

    fn run<'w>(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext<'w>,
        (gbuffer, hdr, uniforms, directional_shadow): bevy::ecs::query::QueryItem<
            'w,
            '_,
            Self::ViewQuery,
        >,
        world: &'w World,
    ) -> Result<(), NodeRunError> {
        let pipeline_cache = world.resource::<PipelineCache>();
        let Some(lighting_pipeline) = world.get_resource::<LightingPipeline>() else {
            return Ok(());
        };
        let Some(pipeline) = pipeline_cache.get_render_pipeline(lighting_pipeline.pipeline_id)
        else {
            return Ok(());
        };
        let Some(point_shadows) = world.get_resource::<PointShadowMaps>() else {
            return Ok(());
        };

        let gbuffer_bind_group = render_context.render_device().create_bind_group(
            "lighting_gbuffer_bind_group",
            &lighting_pipeline.gbuffer_layout,
            &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(&gbuffer.position.default_view),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(&gbuffer.normal.default_view),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: BindingResource::TextureView(&gbuffer.albedo_spec.default_view),
                },
            ],
        );

        let shadow_bind_group = render_context.render_device().create_bind_group(
            "lighting_shadow_bind_group",
            &lighting_pipeline.shadow_layout,
            &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(&directional_shadow.depth.default_view),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(&point_shadows.cube_array_view),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: BindingResource::Sampler(&lighting_pipeline.shadow_sampler),
                },
            ],
        );

        let mut render_pass = render_context.begin_tracked_render_pass(RenderPassDescriptor {
            label: Some("lighting_pass"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: &hdr.texture.default_view,
                resolve_target: None,
                ops: Operations {
                    load: LoadOp::Clear(wgpu::Color::BLACK),
                    store: StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        render_pass.set_render_pipeline(pipeline);
        render_pass.set_bind_group(0, &gbuffer_bind_group, &[]);
        render_pass.set_bind_group(1, &uniforms.bind_group, &[]);
        render_pass.set_bind_group(2, &shadow_bind_group, &[]);
        render_pass.draw(0..3, 0..1);

        Ok(())
    }
}

/// Pipeline resources for deferred lighting.
#[derive(Resource)]
pub struct LightingPipeline {
    pub pipeline_id: CachedRenderPipelineId,
    /// group 0: G-buffer textures
    pub gbuffer_layout: BindGroupLayout,
    /// group 1: [`super::lighting::LightingUniform`]
    pub uniform_layout: BindGroupLayout,
    /// group 2: directional map, point cube array, sampler
    pub shadow_layout: BindGroupLayout,
    pub shadow_sampler: Sampler,
}

/// System to initialize the lighting pipeline on first run.
pub fn init_lighting_pipeline(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    pipeline_cache: Res<PipelineCache>,
    asset_server: Res<AssetServer>,
    existing: Option<Res<LightingPipeline>>,
) {
    if existing.is_some() {
        return;
    }

    // G-buffer texels are read with textureLoad, so no sampler here.
    let unfiltered = TextureSampleType::Float { filterable: false };
    let gbuffer_layout = render_device.create_bind_group_layout(
        "lighting_gbuffer_layout",
        &[
            texture_entry(0, unfiltered, TextureViewDimension::D2),
            texture_entry(1, unfiltered, TextureViewDimension::D2),
            texture_entry(2, unfiltered, TextureViewDimension::D2),
        ],
    );

    let uniform_layout = render_device.create_bind_group_layout(
        "lighting_uniform_layout",
        &[BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStages::FRAGMENT,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }],
    );

    let shadow_layout = render_device.create_bind_group_layout(
        "lighting_shadow_layout",
        &[
            texture_entry(0, TextureSampleType::Depth, TextureViewDimension::D2),
            texture_entry(1, TextureSampleType::Depth, TextureViewDimension::CubeArray),
            BindGroupLayoutEntry {
                binding: 2,
                visibility: ShaderStages::FRAGMENT,
                ty: BindingType::Sampler(SamplerBindingType::NonFiltering),
                count: None,
            },
        ],
    );

    let shadow_sampler = render_device.create_sampler(&SamplerDescriptor {
        label: Some("point_shadow_sampler"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: FilterMode::Nearest,
        min_filter: FilterMode::Nearest,
        ..default()
    });

    let shader = asset_server.load("shaders/deferred_lighting.wgsl");

    let pipeline_id = pipeline_cache.queue_render_pipeline(RenderPipelineDescriptor {
        label: Some("deferred_lighting_pipeline".into()),
        layout: vec![
            gbuffer_layout.clone(),
            uniform_layout.clone(),
            shadow_layout.clone(),
        ],
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
                format: HDR_FORMAT,
                blend: None,
                write_mask: ColorWrites::ALL,
            })],
        }),
        zero_initialize_workgroup_memory: false,
    });

    commands.insert_resource(LightingPipeline {
        pipeline_id,
        gbuffer_layout,
        uniform_layout,
        shadow_layout,
        shadow_sampler,
    });
    info!("LightingPipeline initialized");
}
