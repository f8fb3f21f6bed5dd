//! G-Buffer render graph node.
//!
//! Renders every deferred mesh into the G-buffer using MRT:
//! - gPosition: XYZ = world position, W = 1
//! - gNormal: XYZ = world-space normal
//! - gAlbedoSpec: RGB = albedo, A = specular intensity
//!
//! All targets are cleared to zero first, so previous frames never leak through.

use bevy::prelude::*;
use bevy::render::{
    render_graph::{NodeRunError, RenderGraphContext, ViewNode},
    render_resource::{
        LoadOp, Operations, PipelineCache, RenderPassColorAttachment,
        RenderPassDepthStencilAttachment, RenderPassDescriptor, StoreOp, TextureView,
    },
    renderer::RenderContext,
};

use super::extract::{draw_deferred_meshes, DeferredMeshBatch};
use super::gbuffer::ViewGBufferTextures;
use super::gbuffer_geometry::{GBufferGeometryPipeline, ViewDeferredUniforms};

fn cleared(view: &TextureView) -> Option<RenderPassColorAttachment<'_>> {
    Some(RenderPassColorAttachment {
        view,
        resolve_target: None,
        ops: Operations {
            load: LoadOp::Clear(wgpu::Color::TRANSPARENT),
            store: StoreOp::Store,
        },
        depth_slice: None,
    })
}

/// Render graph node that renders geometry to G-buffer textures.
#[derive(Default)]
pub struct GBufferPassNode;

impl ViewNode for GBufferPassNode {
    type ViewQuery = (
        &'static ViewGBufferTextures,
        &'static ViewDeferredUniforms,
    );

    fn run<'w>(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext<'w>,
        (gbuffer, view_uniforms): bevy::ecs::query::QueryItem<'w, '_, Self::ViewQuery>,
        world: &'w World,
    ) -> Result<(), NodeRunError> {
        let pipeline_cache = world.resource::<PipelineCache>();
        let Some(geometry_pipeline) = world.get_resource::<GBufferGeometryPipeline>() else {
            return Ok(());
        };
        let Some(batch) = world.get_resource::<DeferredMeshBatch>() else {
            return Ok(());
        };

        let color_attachments = [
            cleared(&gbuffer.position.default_view),
            cleared(&gbuffer.normal.default_view),
            cleared(&gbuffer.albedo_spec.default_view),
        ];

        let mut render_pass = render_context.begin_tracked_render_pass(RenderPassDescriptor {
            label: Some("gbuffer_pass"),
            color_attachments: &color_attachments,
            depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                view: &gbuffer.depth.default_view,
                depth_ops: Some(Operations {
                    load: LoadOp::Clear(0.0), // Reverse-Z: 0 is the far plane
                    store: StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        // Still compiling: the cleared G-buffer reads as "no geometry".
        let Some(pipeline) = pipeline_cache.get_render_pipeline(geometry_pipeline.pipeline_id)
        else {
            return Ok(());
        };

        render_pass.set_render_pipeline(pipeline);
        render_pass.set_bind_group(0, &view_uniforms.bind_group, &[]);
        draw_deferred_meshes(&mut render_pass, world, batch, 1);

        Ok(())
    }
}
