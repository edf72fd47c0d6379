//! Externally-owned configuration.
//!
//! The host owns persistence; this crate only reads the values through a
//! shared handle and never writes them back to disk. Everything here derives
//! serde so the host can store settings however it likes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::providers::ProviderKind;

/// Cloud synthesis credentials and tuning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAiSettings {
    pub api_key: String,
    /// Synthesis model; `tts-1` unless the host overrides it.
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_model() -> String {
    "tts-1".to_string()
}

/// All values the narration pipeline reads at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Master switch. When off, events are dropped and queued audio is
    /// discarded undecoded.
    pub enabled: bool,
    /// Which speech provider synthesizes narration.
    pub provider: ProviderKind,
    pub base_speed: f32,
    pub base_volume: f32,
    /// Lexicons to apply, in application order.
    pub enabled_lexicons: Vec<String>,
    /// Persisted speaker → voice assignments, seeded into the voice cache at
    /// startup.
    pub speaker_voices: HashMap<String, String>,
    pub openai: OpenAiSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: ProviderKind::OpenAi,
            base_speed: 1.0,
            base_volume: 1.0,
            enabled_lexicons: Vec::new(),
            speaker_voices: HashMap::new(),
            openai: OpenAiSettings::default(),
        }
    }
}

/// Shared read handle over [`Settings`].
///
/// The host mutates settings from its own UI/config layer; the pipeline
/// takes cheap snapshots at decision points so a mid-flight change never
/// tears a single request's view of the world.
#[derive(Clone)]
pub struct SharedSettings(Arc<RwLock<Settings>>);

impl SharedSettings {
    pub fn new(settings: Settings) -> Self {
        Self(Arc::new(RwLock::new(settings)))
    }

    /// Snapshot the current settings.
    pub fn get(&self) -> Settings {
        self.0.read().expect("settings lock poisoned").clone()
    }

    /// Apply a mutation. Exposed for the host's configuration layer and for
    /// tests; the pipeline itself never calls this.
    pub fn update(&self, f: impl FnOnce(&mut Settings)) {
        let mut guard = self.0.write().expect("settings lock poisoned");
        f(&mut guard);
    }
}

impl Default for SharedSettings {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::{Settings, SharedSettings};

    #[test]
    fn defaults_are_enabled_at_unit_speed() {
        let s = Settings::default();
        assert!(s.enabled);
        assert_eq!(s.base_speed, 1.0);
        assert_eq!(s.base_volume, 1.0);
        assert!(s.enabled_lexicons.is_empty());
    }

    #[test]
    fn update_is_visible_to_later_snapshots() {
        let shared = SharedSettings::default();
        shared.update(|s| s.enabled = false);
        assert!(!shared.get().enabled);
    }

    #[test]
    fn settings_round_trip_through_serde() {
        let mut s = Settings::default();
        s.enabled_lexicons.push("eorzea".into());
        s.speaker_voices.insert("Tataru".into(), "shimmer".into());
        let json = serde_json::to_string(&s).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.enabled_lexicons, vec!["eorzea".to_string()]);
        assert_eq!(back.speaker_voices["Tataru"], "shimmer");
    }
}
