//! Voice catalogues and persistent per-speaker voice assignment.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::Gender;

/// A provider's voices partitioned into gender pools.
///
/// The full list doubles as the unconditioned default pool: it is sampled
/// whenever the detected gender is unknown and the neutral pool is empty, or
/// when a gender's own pool has no entries.
#[derive(Debug, Clone, Default)]
pub struct VoiceCatalog {
    pub masculine: Vec<String>,
    pub feminine: Vec<String>,
    pub neutral: Vec<String>,
}

impl VoiceCatalog {
    /// Every voice in the catalog, pool order preserved.
    pub fn all(&self) -> Vec<&str> {
        self.masculine
            .iter()
            .chain(self.feminine.iter())
            .chain(self.neutral.iter())
            .map(|s| s.as_str())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.masculine.is_empty() && self.feminine.is_empty() && self.neutral.is_empty()
    }

    /// Pick a uniformly random voice for `gender`.
    ///
    /// Falls back to the full catalog when the gender-specific pool is
    /// empty; returns `None` only when no voices exist at all.
    pub fn sample(&self, gender: Gender, rng: &mut impl Rng) -> Option<String> {
        let pool = match gender {
            Gender::Male => &self.masculine,
            Gender::Female => &self.feminine,
            Gender::Unknown => &self.neutral,
        };
        if let Some(voice) = pool.choose(rng) {
            return Some(voice.clone());
        }
        let all = self.all();
        all.choose(rng).map(|s| s.to_string())
    }
}

/// Speaker-name → voice-id map, first-seen-wins.
///
/// Once a speaker has a voice it never changes except through [`forget`];
/// re-detected genders or freshly sampled voices on later requests are
/// ignored. The host persists the map externally and mutates it only through
/// these accessors.
///
/// [`forget`]: VoiceCache::forget
pub struct VoiceCache {
    inner: Mutex<HashMap<String, String>>,
}

impl VoiceCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Pre-populate the cache from externally persisted assignments, such as
    /// the configuration's per-speaker voice overrides. Existing entries are
    /// not overwritten.
    pub fn seed(&self, assignments: &HashMap<String, String>) {
        let mut map = self.inner.lock().expect("voice cache poisoned");
        for (speaker, voice) in assignments {
            map.entry(speaker.clone()).or_insert_with(|| voice.clone());
        }
    }

    /// Resolve the voice for `speaker`: on a hit the cached voice wins and
    /// `sampled` is discarded; on a miss `sampled` seeds the cache and is
    /// returned.
    pub fn resolve(&self, speaker: &str, sampled: String) -> String {
        let mut map = self.inner.lock().expect("voice cache poisoned");
        map.entry(speaker.to_string()).or_insert(sampled).clone()
    }

    /// Explicitly drop a speaker's assignment so the next request samples a
    /// fresh voice.
    pub fn forget(&self, speaker: &str) {
        let mut map = self.inner.lock().expect("voice cache poisoned");
        map.remove(speaker);
    }

    /// Current assignments, for external persistence.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.inner.lock().expect("voice cache poisoned").clone()
    }
}

impl Default for VoiceCache {
    fn default() -> Self {
        Self::new()
    }
}
