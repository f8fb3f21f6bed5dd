//! Deferred rendering plugin for Bevy.
//!
//! This plugin sets up the full custom render graph for deferred rendering.

use bevy::core_pipeline::core_3d::graph::{Core3d, Node3d};
use bevy::prelude::*;
use bevy::render::{
    extract_component::ExtractComponentPlugin,
    extract_resource::ExtractResourcePlugin,
    render_graph::{RenderGraphExt, ViewNodeRunner},
    ExtractSchedule, Render, RenderApp, RenderSystems,
};

use super::bloom::{init_bloom_pipeline, prepare_bloom_textures, prepare_bloom_uniforms, BloomConfig};
use super::bloom_node::BloomNode;
use super::composite::{
    init_composite_pipeline, prepare_composite_uniforms, prepare_final_textures, CompositeConfig,
};
use super::composite_node::{CompositeNode, PresentNode};
use super::extract::{extract_deferred_meshes, prepare_deferred_meshes};
use super::gbuffer::{prepare_gbuffer_textures, DeferredCamera};
use super::gbuffer_geometry::{
    init_gbuffer_geometry_pipeline, prepare_deferred_view_uniforms, DeferredLayouts,
};
use super::gbuffer_node::GBufferPassNode;
use super::labels::DeferredLabel;
use super::light::extract_lights;
use super::light_sphere::{
    init_light_sphere_pipeline, prepare_light_sphere_instances, LightSphereConfig,
};
use super::light_sphere_node::LightSpherePassNode;
use super::lighting::{prepare_hdr_textures, prepare_lighting_uniforms, DeferredLightingConfig};
use super::lighting_node::{init_lighting_pipeline, LightingPassNode};
use super::point_light_shadow::{init_point_shadow_pipeline, prepare_point_shadow_maps};
use super::point_light_shadow_node::PointShadowPassNode;
use super::shadow::{init_shadow_pipeline, prepare_directional_shadow, DirectionalShadowConfig};
use super::shadow_node::DirectionalShadowPassNode;
use super::shadow_registry::{
    extract_point_shadow_capacity, release_removed_shadow_slots, PointShadowRegistry,
    ShadowConfigError, MAX_SHADOW_CASTING_POINT_LIGHTS,
};

/// Plugin that enables deferred rendering.
///
/// This sets up a full custom render graph with:
/// - G-Buffer pass (MRT rendering to position/normal/albedo+specular)
/// - Directional and point light shadow passes
/// - Lighting pass (fullscreen triangle, HDR output)
/// - Light spheres, bloom, composite and present
///
/// ## Usage
///
/// ```rust,ignore
/// app.add_plugins(DeferredRenderingPlugin::default());
///
/// // Mark cameras for deferred rendering
/// commands.spawn((
///     Camera3d::default(),
///     Msaa::Off,
///     DeferredCamera,
/// ));
/// ```
pub struct DeferredRenderingPlugin {
    /// Point shadow slots configured at startup. `None` leaves the registry
    /// unconfigured so the app can call [`PointShadowRegistry::configure`].
    pub point_shadow_slots: Option<usize>,
}

impl Default for DeferredRenderingPlugin {
    fn default() -> Self {
        Self {
            point_shadow_slots: Some(MAX_SHADOW_CASTING_POINT_LIGHTS),
        }
    }
}

impl DeferredRenderingPlugin {
    /// Plugin with `count` point shadow slots, rejecting counts above
    /// [`MAX_SHADOW_CASTING_POINT_LIGHTS`] up front.
    pub fn with_point_shadow_slots(count: usize) -> Result<Self, ShadowConfigError> {
        if count > MAX_SHADOW_CASTING_POINT_LIGHTS {
            return Err(ShadowConfigError::CountExceedsMaximum {
                requested: count,
                maximum: MAX_SHADOW_CASTING_POINT_LIGHTS,
            });
        }
        Ok(Self {
            point_shadow_slots: Some(count),
        })
    }

    fn shadow_registry(&self) -> PointShadowRegistry {
        let Some(count) = self.point_shadow_slots else {
            return PointShadowRegistry::default();
        };
        match PointShadowRegistry::with_slots(count) {
            Ok(registry) => registry,
            Err(err) => {
                error!("Point light shadows disabled: {}", err);
                PointShadowRegistry::default()
            }
        }
    }
}

impl Plugin for DeferredRenderingPlugin {
    fn build(&self, app: &mut App) {
        // Main app resources
        app.init_resource::<DeferredLightingConfig>();
        app.init_resource::<DirectionalShadowConfig>();
        app.init_resource::<LightSphereConfig>();
        app.init_resource::<BloomConfig>();
        app.init_resource::<CompositeConfig>();
        app.insert_resource(self.shadow_registry());

        app.add_systems(Last, release_removed_shadow_slots);

        app.add_plugins(ExtractComponentPlugin::<DeferredCamera>::default());
        app.add_plugins((
            ExtractResourcePlugin::<DeferredLightingConfig>::default(),
            ExtractResourcePlugin::<DirectionalShadowConfig>::default(),
            ExtractResourcePlugin::<LightSphereConfig>::default(),
            ExtractResourcePlugin::<BloomConfig>::default(),
            ExtractResourcePlugin::<CompositeConfig>::default(),
        ));

        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            warn!("RenderApp not found - deferred rendering disabled");
            return;
        };

        render_app.add_systems(
            ExtractSchedule,
            (
                extract_deferred_meshes,
                extract_lights,
                extract_point_shadow_capacity,
            ),
        );

        // Pipeline initialization systems
        render_app.add_systems(
            Render,
            (
                init_gbuffer_geometry_pipeline.in_set(RenderSystems::Prepare),
                init_shadow_pipeline.in_set(RenderSystems::Prepare),
                init_point_shadow_pipeline.in_set(RenderSystems::Prepare),
                init_lighting_pipeline.in_set(RenderSystems::Prepare),
                init_light_sphere_pipeline.in_set(RenderSystems::Prepare),
                init_bloom_pipeline.in_set(RenderSystems::Prepare),
                init_composite_pipeline.in_set(RenderSystems::Prepare),
            ),
        );

        // Per-frame textures, uniforms and draw lists
        render_app.add_systems(
            Render,
            (
                prepare_gbuffer_textures.in_set(RenderSystems::PrepareResources),
                prepare_deferred_view_uniforms.in_set(RenderSystems::PrepareResources),
                prepare_deferred_meshes.in_set(RenderSystems::PrepareResources),
                prepare_directional_shadow
                    .in_set(RenderSystems::PrepareResources)
                    .after(init_shadow_pipeline),
                prepare_point_shadow_maps
                    .in_set(RenderSystems::PrepareResources)
                    .after(init_point_shadow_pipeline),
                prepare_hdr_textures.in_set(RenderSystems::PrepareResources),
                prepare_light_sphere_instances.in_set(RenderSystems::PrepareResources),
                prepare_bloom_textures.in_set(RenderSystems::PrepareResources),
                prepare_bloom_uniforms.in_set(RenderSystems::PrepareResources),
                prepare_final_textures.in_set(RenderSystems::PrepareResources),
                prepare_composite_uniforms.in_set(RenderSystems::PrepareResources),
            ),
        );

        // Needs the shadow resources inserted above.
        render_app.add_systems(
            Render,
            prepare_lighting_uniforms
                .in_set(RenderSystems::PrepareBindGroups)
                .after(init_lighting_pipeline),
        );

        render_app
            .add_render_graph_node::<ViewNodeRunner<GBufferPassNode>>(
                Core3d,
                DeferredLabel::GBufferPass,
            )
            .add_render_graph_node::<ViewNodeRunner<DirectionalShadowPassNode>>(
                Core3d,
                DeferredLabel::DirectionalShadowPass,
            )
            .add_render_graph_node::<ViewNodeRunner<PointShadowPassNode>>(
                Core3d,
                DeferredLabel::PointShadowPass,
            )
            .add_render_graph_node::<ViewNodeRunner<LightingPassNode>>(
                Core3d,
                DeferredLabel::LightingPass,
            )
            .add_render_graph_node::<ViewNodeRunner<LightSpherePassNode>>(
                Core3d,
                DeferredLabel::LightSpherePass,
            )
            .add_render_graph_node::<ViewNodeRunner<BloomNode>>(Core3d, DeferredLabel::BloomPass)
            .add_render_graph_node::<ViewNodeRunner<CompositeNode>>(
                Core3d,
                DeferredLabel::CompositePass,
            )
            .add_render_graph_node::<ViewNodeRunner<PresentNode>>(
                Core3d,
                DeferredLabel::PresentPass,
            );

        // One ordered chain after Bevy's main passes; tonemapping is a no-op
        // on the non-HDR deferred camera.
        render_app.add_render_graph_edges(
            Core3d,
            (
                Node3d::EndMainPass,
                DeferredLabel::GBufferPass,
                DeferredLabel::DirectionalShadowPass,
                DeferredLabel::PointShadowPass,
                DeferredLabel::LightingPass,
                DeferredLabel::LightSpherePass,
                DeferredLabel::BloomPass,
                DeferredLabel::CompositePass,
                DeferredLabel::PresentPass,
                Node3d::Tonemapping,
            ),
        );

        info!("DeferredRenderingPlugin: render graph configured");
    }

    fn finish(&self, app: &mut App) {
        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            return;
        };
        render_app.init_resource::<DeferredLayouts>();
    }
}
