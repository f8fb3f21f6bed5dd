//! Render settings file I/O.
//!
//! All tunables of the deferred pipeline in one JSON document. Missing fields
//! take their defaults, so a file can hold only the values it overrides.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::deferred::{
    BloomConfig, CompositeConfig, DeferredLightingConfig, DirectionalShadowConfig,
    LightSphereConfig,
};

/// Errors from reading or writing a settings file.
#[derive(Debug)]
pub enum SettingsError {
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::Io(e) => write!(f, "IO error: {}", e),
            SettingsError::Json(e) => write!(f, "JSON error: {}", e),
        }
    }
}

impl std::error::Error for SettingsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SettingsError::Io(e) => Some(e),
            SettingsError::Json(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for SettingsError {
    fn from(e: std::io::Error) -> Self {
        SettingsError::Io(e)
    }
}

impl From<serde_json::Error> for SettingsError {
    fn from(e: serde_json::Error) -> Self {
        SettingsError::Json(e)
    }
}

pub type SettingsResult<T> = Result<T, SettingsError>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub lighting: DeferredLightingConfig,
    pub directional_shadow: DirectionalShadowConfig,
    pub light_spheres: LightSphereConfig,
    pub bloom: BloomConfig,
    pub composite: CompositeConfig,
}

impl RenderSettings {
    /// Snapshot the config resources currently in `world`.
    pub fn from_world(world: &World) -> Self {
        Self {
            lighting: world.get_resource().cloned().unwrap_or_default(),
            directional_shadow: world.get_resource().cloned().unwrap_or_default(),
            light_spheres: world.get_resource().cloned().unwrap_or_default(),
            bloom: world.get_resource().cloned().unwrap_or_default(),
            composite: world.get_resource().cloned().unwrap_or_default(),
        }
    }

    /// Replace the config resources in `world`.
    pub fn apply(self, world: &mut World) {
        world.insert_resource(self.lighting);
        world.insert_resource(self.directional_shadow);
        world.insert_resource(self.light_spheres);
        world.insert_resource(self.bloom);
        world.insert_resource(self.composite);
    }
}

/// Save settings as pretty-printed JSON.
pub fn save_render_settings<P: AsRef<Path>>(
    settings: &RenderSettings,
    path: P,
) -> SettingsResult<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, settings)?;
    Ok(())
}

/// Load settings from JSON.
pub fn load_render_settings<P: AsRef<Path>>(path: P) -> SettingsResult<RenderSettings> {
    let reader = BufReader::new(File::open(path)?);
    let settings = serde_json::from_reader(reader)?;
    Ok(settings)
}

/// Apply the settings file at `path` if it exists. A missing file keeps the
/// defaults; any other failure is logged and ignored.
pub fn apply_settings_file<P: AsRef<Path>>(world: &mut World, path: P) {
    let path = path.as_ref();
    if !path.exists() {
        debug!("No render settings at {}", path.display());
        return;
    }
    match load_render_settings(path) {
        Ok(settings) => {
            info!("Loaded render settings from {}", path.display());
            settings.apply(world);
        }
        Err(err) => warn!("Ignoring render settings {}: {}", path.display(), err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shading::ToneMapping;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_save_load_json() {
        let mut settings = RenderSettings::default();
        settings.bloom.enabled = false;
        settings.bloom.threshold = 0.6;
        settings.composite.tone_mapping = ToneMapping::Reinhard;
        settings.directional_shadow.half_extent = 35.0;

        let temp_file = NamedTempFile::with_suffix(".json").unwrap();
        save_render_settings(&settings, temp_file.path()).unwrap();
        let loaded = load_render_settings(temp_file.path()).unwrap();

        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        write!(temp_file, r#"{{ "bloom": {{ "iterations": 2 }} }}"#).unwrap();

        let loaded = load_render_settings(temp_file.path()).unwrap();

        assert_eq!(loaded.bloom.iterations, 2);
        assert_eq!(loaded.bloom.threshold, BloomConfig::default().threshold);
        assert_eq!(loaded.composite, CompositeConfig::default());
    }

    #[test]
    fn test_invalid_json() {
        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        write!(temp_file, "not json").unwrap();

        let result = load_render_settings(temp_file.path());
        assert!(matches!(result, Err(SettingsError::Json(_))));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_render_settings(dir.path().join("missing.json"));
        assert!(matches!(result, Err(SettingsError::Io(_))));
    }

    #[test]
    fn test_apply_replaces_resources() {
        let mut world = World::new();
        world.insert_resource(BloomConfig::default());

        let mut settings = RenderSettings::default();
        settings.bloom.intensity = 2.5;
        settings.light_spheres.enabled = false;
        settings.apply(&mut world);

        assert_eq!(world.resource::<BloomConfig>().intensity, 2.5);
        assert!(!world.resource::<LightSphereConfig>().enabled);
        assert_eq!(RenderSettings::from_world(&world).bloom.intensity, 2.5);
    }
}
