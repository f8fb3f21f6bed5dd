//! Deferred rendering pipeline.
//!
//! This module implements a full custom render graph for deferred rendering:
//!
//! ## Pipeline Overview
//!
//! ```text
//! ┌─────────────────┐
//! │  G-Buffer Pass  │  ← Renders geometry to MRT (position, normal, albedo+spec)
//! └────────┬────────┘
//! ┌────────▼────────┐
//! │  Shadow Passes  │  ← Directional 2D map + point light cube array
//! └────────┬────────┘
//! ┌────────▼────────┐
//! │  Lighting Pass  │  ← Fullscreen triangle, reads G-buffer + shadows, HDR out
//! └────────┬────────┘
//! ┌────────▼────────┐
//! │  Light Spheres  │  ← Emissive markers, depth tested against the G-buffer
//! └────────┬────────┘
//! ┌────────▼────────┐
//! │      Bloom      │  ← Bright pass + ping-pong Gaussian blur
//! └────────┬────────┘
//! ┌────────▼────────┐
//! │    Composite    │  ← HDR + bloom, tone mapping, gamma
//! └────────┬────────┘
//! ┌────────▼────────┐
//! │     Present     │  ← Written to ViewTarget
//! └─────────────────┘
//! ```
//!
//! ## G-Buffer Layout
//!
//! - **gPosition** (RGBA32F): XYZ = world position, W = 1 where geometry exists
//! - **gNormal** (RGBA16F): XYZ = world-space normal (normalized)
//! - **gAlbedoSpec** (RGBA8): RGB = albedo, A = specular intensity
//!
//! ## Usage
//!
//! ```rust,ignore
//! app.add_plugins(DeferredRenderingPlugin::default());
//!
//! commands.spawn((
//!     Camera3d::default(),
//!     Msaa::Off,
//!     DeferredCamera,
//! ));
//! ```

mod bloom;
mod bloom_node;
mod composite;
mod composite_node;
mod extract;
mod gbuffer;
mod gbuffer_geometry;
mod gbuffer_node;
mod labels;
mod light;
mod light_sphere;
mod light_sphere_node;
mod lighting;
mod lighting_node;
mod material;
mod plugin;
mod point_light_shadow;
mod point_light_shadow_node;
mod shadow;
mod shadow_node;
mod shadow_registry;

pub use bloom::*;
pub use bloom_node::*;
pub use composite::*;
pub use composite_node::*;
pub use extract::*;
pub use gbuffer::*;
pub use gbuffer_geometry::*;
pub use gbuffer_node::*;
pub use labels::*;
pub use light::*;
pub use light_sphere::*;
pub use light_sphere_node::*;
pub use lighting::*;
pub use lighting_node::*;
pub use material::*;
pub use plugin::*;
pub use point_light_shadow::*;
pub use point_light_shadow_node::*;
pub use shadow::*;
pub use shadow_node::*;
pub use shadow_registry::*;
