//! Composite and present render graph nodes.

use bevy::prelude::*;
use bevy::render::{
    camera::ExtractedCamera,
    render_graph::{NodeRunError, RenderGraphContext, ViewNode},
    render_resource::{
        BindGroupEntry, BindingResource, LoadOp, Operations, PipelineCache,
        RenderPassColorAttachment, RenderPassDescriptor, StoreOp,
    },
    renderer::RenderContext,
    view::ViewTarget,
};

use super::bloom::{bloom_output, BloomConfig, ViewBloomTextures};
use super::composite::{present_format, CompositePipeline, CompositeUniformBuffer, ViewFinalTexture};
use super::lighting::ViewHdrTexture;

/// Tone maps HDR + bloom into the final 8-bit image.
#[derive(Default)]
pub struct CompositeNode;

impl ViewNode for CompositeNode {
    type ViewQuery = (
        &'static ViewHdrTexture,
        &'static ViewBloomTextures,
        &'static ViewFinalTexture,
    );

    fn run<'w>(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext<'w>,
        (hdr, bloom_textures, final_texture): bevy::ecs::query::QueryItem<'w, '_, Self::ViewQuery>,
        world: &'w World,
    ) -> Result<(), NodeRunError> {
        let pipeline_cache = world.resource::<PipelineCache>();
        let Some(composite_pipeline) = world.get_resource::<CompositePipeline>() else {
            return Ok(());
        };
        let Some(uniform) = world.get_resource::<CompositeUniformBuffer>() else {
            return Ok(());
        };
        let Some(pipeline) =
            pipeline_cache.get_render_pipeline(composite_pipeline.composite_pipeline_id)
        else {
            return Ok(());
        };
        let bloom_config = world
            .get_resource::<BloomConfig>()
            .cloned()
            .unwrap_or_default();
        let bloom = bloom_textures.get(bloom_output(&bloom_config));

        let bind_group = render_context.render_device().create_bind_group(
            "composite_bind_group",
            &composite_pipeline.composite_layout,
            &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(&hdr.texture.default_view),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(&bloom.default_view),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: uniform.buffer.as_entire_binding(),
                },
            ],
        );

        let mut render_pass = render_context.begin_tracked_render_pass(RenderPassDescriptor {
            label: Some("composite_pass"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: &final_texture.texture.default_view,
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
        render_pass.set_bind_group(0, &bind_group, &[]);
        render_pass.draw(0..3, 0..1);

        Ok(())
    }
}

/// Copies the final image into the camera's view target.
///
/// The view target is sRGB, so the shader decodes the display gamma first
/// and the hardware encode restores the composite output.
#[derive(Default)]
pub struct PresentNode;

impl ViewNode for PresentNode {
    type ViewQuery = (
        &'static ExtractedCamera,
        &'static ViewTarget,
        &'static ViewFinalTexture,
    );

    fn run<'w>(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext<'w>,
        (camera, target, final_texture): bevy::ecs::query::QueryItem<'w, '_, Self::ViewQuery>,
        world: &'w World,
    ) -> Result<(), NodeRunError> {
        if target.main_texture_format() != present_format() {
            warn_once!(
                "Deferred camera target is {:?}, expected {:?}; disable HDR on the camera",
                target.main_texture_format(),
                present_format()
            );
            return Ok(());
        }

        let pipeline_cache = world.resource::<PipelineCache>();
        let Some(composite_pipeline) = world.get_resource::<CompositePipeline>() else {
            return Ok(());
        };
        let Some(pipeline) =
            pipeline_cache.get_render_pipeline(composite_pipeline.present_pipeline_id)
        else {
            return Ok(());
        };

        let bind_group = render_context.render_device().create_bind_group(
            "present_bind_group",
            &composite_pipeline.present_layout,
            &[BindGroupEntry {
                binding: 0,
                resource: BindingResource::TextureView(&final_texture.texture.default_view),
            }],
        );

        let mut render_pass = render_context.begin_tracked_render_pass(RenderPassDescriptor {
            label: Some("present_pass"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: target.main_texture_view(),
                resolve_target: None,
                ops: Operations {
                    load: LoadOp::Load,
                    store: StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        // Composite textures are viewport sized.
        if let Some(viewport) = &camera.viewport {
            render_pass.set_camera_viewport(viewport);
        }
        render_pass.set_render_pipeline(pipeline);
        render_pass.set_bind_group(0, &bind_group, &[]);
        render_pass.draw(0..3, 0..1);

        Ok(())
    }
}
