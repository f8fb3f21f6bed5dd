//! Light sphere render graph node.
//!
//! Adds emissive point light markers to the lit HDR image, reusing the
//! G-buffer depth so markers hide behind scene geometry.

use bevy::prelude::*;
use bevy::render::{
    render_graph::{NodeRunError, RenderGraphContext, ViewNode},
    render_resource::{
        LoadOp, Operations, PipelineCache, RenderPassColorAttachment,
        RenderPassDepthStencilAttachment, RenderPassDescriptor, StoreOp,
    },
    renderer::RenderContext,
};

use super::gbuffer::ViewGBufferTextures;
use super::gbuffer_geometry::ViewDeferredUniforms;
use super::light_sphere::{LightSphereInstances, LightSpherePipeline, LIGHT_SPHERE_INDEX_FORMAT};
use super::lighting::ViewHdrTexture;

#[derive(Default)]
pub struct LightSpherePassNode;

impl ViewNode for LightSpherePassNode {
    type ViewQuery = (
        &'static ViewHdrTexture,
        &'static ViewGBufferTextures,
        &'static ViewDeferredUniforms,
    );

    fn run<'w>(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext<'w>,
        (hdr, gbuffer, view_uniforms): bevy::ecs::query::QueryItem<'w, '_, Self::ViewQuery>,
        world: &'w World,
    ) -> Result<(), NodeRunError> {
        let Some(instances) = world.get_resource::<LightSphereInstances>() else {
            return Ok(());
        };
        let Some(instance_buffer) = &instances.buffer else {
            return Ok(());
        };
        let Some(sphere_pipeline) = world.get_resource::<LightSpherePipeline>() else {
            return Ok(());
        };
        let Some(mesh) = &sphere_pipeline.mesh else {
            return Ok(());
        };
        let pipeline_cache = world.resource::<PipelineCache>();
        let Some(pipeline) = pipeline_cache.get_render_pipeline(sphere_pipeline.pipeline_id) else {
            return Ok(());
        };

        let mut render_pass = render_context.begin_tracked_render_pass(RenderPassDescriptor {
            label: Some("light_sphere_pass"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: &hdr.texture.default_view,
                resolve_target: None,
                ops: Operations {
                    load: LoadOp::Load,
                    store: StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                view: &gbuffer.depth.default_view,
                depth_ops: Some(Operations {
                    load: LoadOp::Load,
                    store: StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        render_pass.set_render_pipeline(pipeline);
        render_pass.set_bind_group(0, &view_uniforms.bind_group, &[]);
        render_pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
        render_pass.set_vertex_buffer(1, instance_buffer.slice(..));
        render_pass.set_index_buffer(mesh.index_buffer.slice(..), 0, LIGHT_SPHERE_INDEX_FORMAT);
        render_pass.draw_indexed(0..mesh.index_count, 0, 0..instances.count);

        Ok(())
    }
}
