//! Deferred renderer for pie studio scenes.
//!
//! This crate provides:
//! - Deferred rendering pipeline with directional and point light shadows
//! - Bloom and tone-mapped composite
//! - CPU mirror of the shading math for tests
//! - Mesh primitives, fly camera and frame control for host apps
//! - Render settings file I/O

use bevy::prelude::*;

pub mod deferred;
pub mod fly_camera;
pub mod frame;
pub mod primitives;
pub mod settings;
pub mod shading;

pub use deferred::{
    BloomConfig, CompositeConfig, DeferredCamera, DeferredLabel, DeferredLight,
    DeferredLightingConfig, DeferredRenderable, DeferredRenderingPlugin, DirectionalShadowConfig,
    LightKind, LightSphereConfig, PointShadowRegistry, ShadowConfigError, ShadowSlot,
    SolidMaterial, MAX_LIGHTS,
};
pub use fly_camera::{FlyCamera, FlyCameraPlugin};
pub use frame::{FrameControl, FrameControlPlugin};
pub use primitives::{icosphere, unit_cube, unit_plane, PrimitiveError};
pub use settings::{
    apply_settings_file, load_render_settings, save_render_settings, RenderSettings,
    SettingsError,
};
pub use shading::ToneMapping;

/// Everything a pie studio app needs: deferred rendering, fly camera and
/// frame control.
///
/// ```rust,ignore
/// App::new()
///     .add_plugins(DefaultPlugins)
///     .add_plugins(PieRenderPlugins::default())
///     .run();
/// ```
#[derive(Default)]
pub struct PieRenderPlugins {
    pub deferred: DeferredRenderingPlugin,
}

impl Plugin for PieRenderPlugins {
    fn build(&self, app: &mut App) {
        app.add_plugins(DeferredRenderingPlugin {
            point_shadow_slots: self.deferred.point_shadow_slots,
        });
        app.add_plugins((FlyCameraPlugin, FrameControlPlugin));
    }
}
