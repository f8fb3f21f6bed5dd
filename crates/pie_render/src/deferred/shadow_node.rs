//! Directional shadow pass render graph node.
//!
//! Renders scene depth from the light's orthographic view into the shadow map.
//! The map is cleared to the far plane even when no directional light casts
//! shadows, so the lighting pass always reads it as fully lit.

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
use super::shadow::{ShadowPipeline, ViewDirectionalShadow};

/// Render graph node that renders the scene to the directional shadow map.
#[derive(Default)]
pub struct DirectionalShadowPassNode;

impl ViewNode for DirectionalShadowPassNode {
    type ViewQuery = &'static ViewDirectionalShadow;

    fn run<'w>(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext<'w>,
        shadow: bevy::ecs::query::QueryItem<'w, '_, Self::ViewQuery>,
        world: &'w World,
    ) -> Result<(), NodeRunError> {
        let pipeline_cache = world.resource::<PipelineCache>();

        // Depth-only pass
        let mut render_pass = render_context.begin_tracked_render_pass(RenderPassDescriptor {
            label: Some("directional_shadow_pass"),
            color_attachments: &[],
            depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                view: &shadow.depth.default_view,
                depth_ops: Some(Operations {
                    load: LoadOp::Clear(1.0), // Standard depth, not reverse-Z
                    store: StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        if !shadow.active {
            return Ok(());
        }

        let Some(shadow_pipeline) = world.get_resource::<ShadowPipeline>() else {
            return Ok(());
        };
        let Some(pipeline) = pipeline_cache.get_render_pipeline(shadow_pipeline.pipeline_id)
        else {
            return Ok(());
        };
        let Some(batch) = world.get_resource::<DeferredMeshBatch>() else {
            return Ok(());
        };

        render_pass.set_render_pipeline(pipeline);
        render_pass.set_bind_group(0, &shadow.bind_group, &[]);
        draw_deferred_meshes(&mut render_pass, world, batch, 1);

        Ok(())
    }
}
