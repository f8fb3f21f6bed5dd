//! Render graph labels for the deferred rendering pipeline.

use bevy::render::render_graph::RenderLabel;

/// Labels for deferred rendering nodes in the render graph, in execution order.
#[derive(Debug, Hash, PartialEq, Eq, Clone, RenderLabel)]
pub enum DeferredLabel {
    /// G-Buffer pass: renders geometry to MRT (position, normal, albedo+specular)
    GBufferPass,
    /// Directional shadow pass: scene depth from the sun's orthographic view
    DirectionalShadowPass,
    /// Point light shadow pass: cube shadow maps for slotted point lights
    PointShadowPass,
    /// Lighting pass: fullscreen triangle that computes HDR lighting from the G-buffer
    LightingPass,
    /// Emissive spheres marking point lights
    LightSpherePass,
    /// Bright pass + ping-pong blur
    BloomPass,
    /// Tone mapping + gamma into the final image
    CompositePass,
    /// Copy of the final image into the view target
    PresentPass,
}
