//! Plugin defaults and settings files in a headless app.

use bevy::prelude::*;
use pie_render::{
    apply_settings_file, BloomConfig, CompositeConfig, DeferredRenderingPlugin,
    PointShadowRegistry, RenderSettings, ShadowConfigError, ToneMapping,
};
use std::io::Write;
use tempfile::NamedTempFile;

fn headless_app(plugin: DeferredRenderingPlugin) -> App {
    let mut app = App::new();
    app.add_plugins(MinimalPlugins);
    app.add_plugins(plugin);
    app
}

#[test]
fn test_plugin_configures_default_slots() {
    let app = headless_app(DeferredRenderingPlugin::default());
    let registry = app.world().resource::<PointShadowRegistry>();
    assert!(registry.is_configured());
    assert_eq!(registry.capacity(), 8);
    assert_eq!(app.world().resource::<BloomConfig>(), &BloomConfig::default());
}

#[test]
fn test_plugin_without_slots_leaves_registry_unconfigured() {
    let app = headless_app(DeferredRenderingPlugin {
        point_shadow_slots: None,
    });
    assert!(!app.world().resource::<PointShadowRegistry>().is_configured());
}

#[test]
fn test_oversized_slot_count_falls_back_to_unconfigured() {
    let app = headless_app(DeferredRenderingPlugin {
        point_shadow_slots: Some(64),
    });
    assert_eq!(app.world().resource::<PointShadowRegistry>().capacity(), 0);
}

#[test]
fn test_slot_builder_rejects_oversized_count() {
    let Err(err) = DeferredRenderingPlugin::with_point_shadow_slots(64) else {
        panic!("64 slots should be rejected");
    };
    assert_eq!(
        err,
        ShadowConfigError::CountExceedsMaximum {
            requested: 64,
            maximum: 8
        }
    );

    let plugin = match DeferredRenderingPlugin::with_point_shadow_slots(3) {
        Ok(plugin) => plugin,
        Err(err) => panic!("3 slots should be accepted: {err}"),
    };
    let app = headless_app(plugin);
    assert_eq!(app.world().resource::<PointShadowRegistry>().capacity(), 3);
}

#[test]
fn test_settings_file_overrides_plugin_defaults() {
    let mut app = headless_app(DeferredRenderingPlugin::default());

    let mut file = NamedTempFile::with_suffix(".json").unwrap();
    let json = serde_json::json!({
        "bloom": { "enabled": false },
        "composite": { "tone_mapping": "Reinhard" }
    });
    write!(file, "{}", json).unwrap();

    apply_settings_file(app.world_mut(), file.path());

    let settings = RenderSettings::from_world(app.world());
    assert!(!settings.bloom.enabled);
    assert_eq!(settings.bloom.threshold, BloomConfig::default().threshold);
    assert_eq!(settings.composite.tone_mapping, ToneMapping::Reinhard);
    assert_eq!(settings.composite.exposure, CompositeConfig::default().exposure);
}

#[test]
fn test_broken_settings_file_keeps_current_values() {
    let mut app = headless_app(DeferredRenderingPlugin::default());
    app.world_mut().resource_mut::<BloomConfig>().intensity = 3.0;

    let mut file = NamedTempFile::with_suffix(".json").unwrap();
    write!(file, "{{ \"bloom\": ").unwrap();
    apply_settings_file(app.world_mut(), file.path());

    assert_eq!(app.world().resource::<BloomConfig>().intensity, 3.0);
}
