//! Volume preferences and the durable store they are written to.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};

/// Keys restored from storage; anything else in a saved map is ignored.
pub const DEFAULT_VOLUME_KEYS: [&str; 3] = ["master", "sfx", "music"];

/// Bus name → volume in `[0, 1]`, plus `master`.
#[derive(Clone, Debug, PartialEq)]
pub struct VolumePreferences {
    volumes: BTreeMap<String, f32>,
}

impl Default for VolumePreferences {
    fn default() -> Self {
        Self {
            volumes: DEFAULT_VOLUME_KEYS
                .iter()
                .map(|k| (k.to_string(), 1.0))
                .collect(),
        }
    }
}

impl VolumePreferences {
    pub fn get(&self, bus: &str) -> Option<f32> {
        self.volumes.get(bus).copied()
    }

    pub fn set(&mut self, bus: &str, value: f32) -> f32 {
        let value = clamp_volume(value);
        self.volumes.insert(bus.to_string(), value);
        value
    }

    /// Apply a saved JSON map over the defaults: known keys only, bad values skipped.
    pub fn merge_saved(&mut self, raw: &str) -> Result<()> {
        let saved: HashMap<String, serde_json::Value> =
            serde_json::from_str(raw).context("parse saved volumes")?;
        for key in DEFAULT_VOLUME_KEYS {
            if let Some(value) = saved.get(key).and_then(serde_json::Value::as_f64) {
                self.set(key, value as f32);
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(&self.volumes).context("encode volumes")
    }
}

fn clamp_volume(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        1.0
    }
}

/// Durable key/value storage for engine preferences.
pub trait PreferenceStore: Send {
    fn load(&self, key: &str) -> Result<Option<String>>;
    fn save(&self, key: &str, value: &str) -> Result<()>;
}

/// One `<key>.json` file per key under a directory.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

impl PreferenceStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("read {:?}", path)),
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create {:?}", self.dir))?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value).with_context(|| format!("write {:?}", tmp))?;
        std::fs::rename(&tmp, &path).with_context(|| format!("rename {:?}", path))?;
        Ok(())
    }
}

/// In-memory store. Clones share the same map, so a fresh engine built with a
/// clone sees what the previous one saved.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

impl PreferenceStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get(key))
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_master_and_default_buses() {
        let prefs = VolumePreferences::default();
        assert_eq!(prefs.get("master"), Some(1.0));
        assert_eq!(prefs.get("sfx"), Some(1.0));
        assert_eq!(prefs.get("music"), Some(1.0));
        assert_eq!(prefs.get("ambience"), None);
    }

    #[test]
    fn merge_saved_applies_known_keys_only() {
        let mut prefs = VolumePreferences::default();
        prefs
            .merge_saved(r#"{"master":0.0,"music":0.4,"ambience":0.2,"sfx":"loud"}"#)
            .unwrap();
        assert_eq!(prefs.get("master"), Some(0.0));
        assert!((prefs.get("music").unwrap() - 0.4).abs() < 1e-6);
        assert_eq!(prefs.get("sfx"), Some(1.0));
        assert_eq!(prefs.get("ambience"), None);
    }

    #[test]
    fn merge_saved_rejects_malformed_json() {
        let mut prefs = VolumePreferences::default();
        assert!(prefs.merge_saved("not json").is_err());
        assert_eq!(prefs, VolumePreferences::default());
    }

    #[test]
    fn set_clamps_values() {
        let mut prefs = VolumePreferences::default();
        assert_eq!(prefs.set("sfx", 3.0), 1.0);
        assert_eq!(prefs.set("sfx", -1.0), 0.0);
        assert_eq!(prefs.set("sfx", f32::NAN), 1.0);
    }

    #[test]
    fn json_roundtrip_through_memory_store() {
        let store = MemoryStore::new();
        let mut prefs = VolumePreferences::default();
        prefs.set("master", 0.25);
        store.save("volumes", &prefs.to_json().unwrap()).unwrap();

        let other = store.clone();
        let raw = other.load("volumes").unwrap().unwrap();
        let mut restored = VolumePreferences::default();
        restored.merge_saved(&raw).unwrap();
        assert_eq!(restored.get("master"), Some(0.25));
    }

    #[test]
    fn file_store_roundtrip() {
        let dir = std::env::temp_dir().join(format!("orka-prefs-{}", std::process::id()));
        let store = FileStore::new(&dir);
        assert!(store.load("orka_audio_volumes").unwrap().is_none());
        store.save("orka_audio_volumes", "{\"master\":0.5}").unwrap();
        assert_eq!(
            store.load("orka_audio_volumes").unwrap().as_deref(),
            Some("{\"master\":0.5}")
        );
        let _ = std::fs::remove_dir_all(&dir);
    }
}
