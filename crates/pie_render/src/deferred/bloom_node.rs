//! Bloom render graph node.
//!
//! Runs after the light spheres so emissive markers bloom too:
//! 1. Bright pass from the HDR image into `bright`
//! 2. Ping-pong Gaussian blur between `ping` and `pong`
//!
//! With bloom disabled, or its pipelines still compiling, only the texture the
//! composite reads is cleared, so it adds nothing.

use bevy::prelude::*;
use bevy::render::{
    render_graph::{NodeRunError, RenderGraphContext, ViewNode},
    render_resource::{
        BindGroup, BindGroupEntry, BindingResource, Buffer, LoadOp, Operations, PipelineCache,
        RenderPassColorAttachment, RenderPassDescriptor, RenderPipeline, StoreOp, TextureView,
    },
    renderer::{RenderContext, RenderDevice},
};

use super::bloom::{
    bloom_work, blur_steps, BloomConfig, BloomPipeline, BloomThresholdUniform, BloomWork,
    ViewBloomTextures,
};
use super::lighting::ViewHdrTexture;

fn source_bind_group(
    device: &RenderDevice,
    pipeline: &BloomPipeline,
    source: &TextureView,
    uniform: &Buffer,
) -> BindGroup {
    device.create_bind_group(
        "bloom_source_bind_group",
        &pipeline.source_layout,
        &[
            BindGroupEntry {
                binding: 0,
                resource: BindingResource::TextureView(source),
            },
            BindGroupEntry {
                binding: 1,
                resource: uniform.as_entire_binding(),
            },
        ],
    )
}

/// Draw a fullscreen triangle into `target`. With no pipeline the target is
/// only cleared.
fn fullscreen_pass(
    render_context: &mut RenderContext,
    label: &'static str,
    target: &TextureView,
    draw: Option<(&RenderPipeline, &BindGroup)>,
) {
    let mut render_pass = render_context.begin_tracked_render_pass(RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(RenderPassColorAttachment {
            view: target,
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

    if let Some((pipeline, bind_group)) = draw {
        render_pass.set_render_pipeline(pipeline);
        render_pass.set_bind_group(0, bind_group, &[]);
        render_pass.draw(0..3, 0..1);
    }
}

/// Render graph node for bloom post-processing.
#[derive(Default)]
pub struct BloomNode;

impl ViewNode for BloomNode {
    type ViewQuery = (&'static ViewHdrTexture, &'static ViewBloomTextures);

    fn run<'w>(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext<'w>,
        (hdr, bloom_textures): bevy::ecs::query::QueryItem<'w, '_, Self::ViewQuery>,
        world: &'w World,
    ) -> Result<(), NodeRunError> {
        let bloom_config = world
            .get_resource::<BloomConfig>()
            .cloned()
            .unwrap_or_default();

        let pipeline_cache = world.resource::<PipelineCache>();
        let resources = world
            .get_resource::<BloomPipeline>()
            .zip(world.get_resource::<BloomThresholdUniform>())
            .and_then(|(bloom_pipeline, threshold)| {
                let extract = pipeline_cache.get_render_pipeline(bloom_pipeline.extract_pipeline_id)?;
                let blur = pipeline_cache.get_render_pipeline(bloom_pipeline.blur_pipeline_id)?;
                Some((bloom_pipeline, threshold, extract, blur))
            });

        if let BloomWork::Clear(target) = bloom_work(&bloom_config, resources.is_some()) {
            fullscreen_pass(
                render_context,
                "bloom_clear",
                &bloom_textures.get(target).default_view,
                None,
            );
            return Ok(());
        }
        let Some((bloom_pipeline, threshold, extract_pipeline, blur_pipeline)) = resources else {
            return Ok(());
        };

        let device = render_context.render_device().clone();

        let extract_bind_group = source_bind_group(
            &device,
            bloom_pipeline,
            &hdr.texture.default_view,
            &threshold.buffer,
        );
        fullscreen_pass(
            render_context,
            "bloom_extract_pass",
            &bloom_textures.bright.default_view,
            Some((extract_pipeline, &extract_bind_group)),
        );

        for step in blur_steps(bloom_config.iterations) {
            let bind_group = source_bind_group(
                &device,
                bloom_pipeline,
                &bloom_textures.get(step.source).default_view,
                bloom_pipeline.direction(step.horizontal),
            );
            fullscreen_pass(
                render_context,
                "bloom_blur_pass",
                &bloom_textures.get(step.target).default_view,
                Some((blur_pipeline, &bind_group)),
            );
        }

        Ok(())
    }
}
