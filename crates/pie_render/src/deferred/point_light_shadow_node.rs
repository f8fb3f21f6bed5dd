//! Point light shadow pass render graph node.
//!
//! For each shadow-casting light, renders 6 depth passes (one per cube face)
//! into the light's slot of the cube map array.

use bevy::prelude::*;
use bevy::render::{
    render_graph::{NodeRunError, RenderGraphContext, ViewNode},
    render_resource::{
        LoadOp, Operations, PipelineCache, RenderPassDepthStencilAttachment,
        RenderPassDescriptor, StoreOp,
    },
    renderer::RenderContext,
};

use super::extract::{draw_deferred_meshes, DeferredMeshBatch};
use super::gbuffer::ViewGBufferTextures;
use super::point_light_shadow::{PointShadowMaps, PointShadowPipeline};

/// Render graph node for point light shadow passes.
#[derive(Default)]
pub struct PointShadowPassNode;

impl ViewNode for PointShadowPassNode {
    type ViewQuery = &'static ViewGBufferTextures;

    fn run<'w>(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext<'w>,
        _gbuffer: bevy::ecs::query::QueryItem<'w, '_, Self::ViewQuery>,
        world: &'w World,
    ) -> Result<(), NodeRunError> {
        let pipeline_cache = world.resource::<PipelineCache>();
        let Some(pipeline) = world.get_resource::<PointShadowPipeline>() else {
            return Ok(());
        };
        let Some(render_pipeline) = pipeline_cache.get_render_pipeline(pipeline.pipeline_id)
        else {
            return Ok(());
        };
        let Some(shadow_maps) = world.get_resource::<PointShadowMaps>() else {
            return Ok(());
        };
        let Some(batch) = world.get_resource::<DeferredMeshBatch>() else {
            return Ok(());
        };

        for pass in &shadow_maps.passes {
            let Some(layer_view) = shadow_maps.layer_views.get(pass.layer as usize) else {
                continue;
            };

            let mut render_pass = render_context.begin_tracked_render_pass(RenderPassDescriptor {
                label: Some("point_shadow_pass"),
                color_attachments: &[],
                depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                    view: layer_view,
                    depth_ops: Some(Operations {
                        load: LoadOp::Clear(1.0), // Farthest normalized distance
                        store: StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            render_pass.set_render_pipeline(render_pipeline);
            render_pass.set_bind_group(0, &pass.bind_group, &[]);
            draw_deferred_meshes(&mut render_pass, world, batch, 1);
        }

        Ok(())
    }
}
