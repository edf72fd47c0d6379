//! Correlating native voice-line playback with narration.
//!
//! The host plays its own pre-recorded voice acting for some dialogue. When
//! that happens the pipeline should stay quiet instead of reading the same
//! line a second time. Two host functions are observed: sound-resource loads
//! (keyed by file path) and play-specific-sound calls (keyed by in-memory
//! resource address). A load whose path classifies as a voice line registers
//! its address; a later play of that address timestamps "a native line just
//! played", which the dedup gate consumes.
//!
//! Everything here is heuristic and best-effort. False positives and
//! negatives are tolerated; the worst outcome is a narrated line that was
//! also voiced, or a suppressed one that was not.

pub mod hooks;

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;

/// Opaque address inside the host process. Core code never dereferences it;
/// all reads go through [`ForeignMemory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceAddress(pub u64);

impl ResourceAddress {
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Typed read accessors over fixed offsets into opaque host addresses.
///
/// The host-integration layer implements this over real process memory;
/// tests implement it over hash maps. Core code only ever sees parsed
/// values, never raw pointers.
pub trait ForeignMemory: Send + Sync {
    /// Read a pointer-sized value at `base + offset` as an opaque address.
    fn read_address(&self, base: ResourceAddress, offset: usize) -> Option<ResourceAddress>;
    /// Read a NUL-terminated string at `base + offset`.
    fn read_string(&self, base: ResourceAddress, offset: usize) -> Option<String>;
}

/// Offset of the file-name field inside a sound resource handle.
pub const RESOURCE_NAME_OFFSET: usize = 0x48;
/// Offset of the loaded-data pointer, just past the resource handle header.
pub const RESOURCE_DATA_OFFSET: usize = 0xb0;
/// Offset of the sound-data pointer inside a playback payload.
pub const SOUND_DATA_OFFSET: usize = 0x8;

const SOUND_CONTAINER_SUFFIX: &str = ".scd";

/// Paths that are never narration-relevant: background, music, ambient and
/// combat noise.
static IGNORED_SOUND_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(bgcommon|music|sound/(battle|foot|instruments|strm|vfx|voice/Vo_Emote|zingle))/")
        .expect("valid regex")
});

/// Paths carrying cutscene/voice audio.
static VOICE_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^cut/.*/(vo_|voice)").expect("valid regex"));

/// Timestamp of the most recent native voice-line playback.
pub struct NativeLineClock {
    last: Mutex<Option<Instant>>,
}

impl NativeLineClock {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(None),
        }
    }

    pub fn mark(&self) {
        self.mark_at(Instant::now());
    }

    pub(crate) fn mark_at(&self, when: Instant) {
        *self.last.lock().expect("clock lock poisoned") = Some(when);
    }

    /// True when a native line played within the last `window`.
    pub fn recent_within(&self, window: Duration) -> bool {
        self.last
            .lock()
            .expect("clock lock poisoned")
            .map(|t| t.elapsed() < window)
            .unwrap_or(false)
    }
}

impl Default for NativeLineClock {
    fn default() -> Self {
        Self::new()
    }
}

/// In-flight native resource addresses classified as candidate voice lines,
/// pending a play signal. Mutated from hook callbacks on arbitrary host
/// threads; membership operations are atomic behind the lock.
struct VoiceLineRegistry {
    addrs: Mutex<HashSet<ResourceAddress>>,
}

impl VoiceLineRegistry {
    fn new() -> Self {
        Self {
            addrs: Mutex::new(HashSet::new()),
        }
    }

    fn insert(&self, addr: ResourceAddress) {
        self.addrs.lock().expect("registry lock poisoned").insert(addr);
    }

    fn remove(&self, addr: ResourceAddress) -> bool {
        self.addrs.lock().expect("registry lock poisoned").remove(&addr)
    }

    fn len(&self) -> usize {
        self.addrs.lock().expect("registry lock poisoned").len()
    }
}

/// Watches host sound loads and plays, recording when a native voice line
/// is rendered.
pub struct SoundCorrelator {
    memory: Arc<dyn ForeignMemory>,
    registry: VoiceLineRegistry,
    clock: Arc<NativeLineClock>,
}

impl SoundCorrelator {
    pub fn new(memory: Arc<dyn ForeignMemory>, clock: Arc<NativeLineClock>) -> Self {
        Self {
            memory,
            registry: VoiceLineRegistry::new(),
            clock,
        }
    }

    /// Handle a resource-load observation.
    ///
    /// Candidate voice lines are registered by their data address. A
    /// non-voice-line load at a registered address evicts the stale entry:
    /// the host allocator reuses addresses, so an old registration may now
    /// describe a completely different sound.
    pub fn on_sound_loaded(&self, resource: ResourceAddress) {
        let Some(file_name) = self.memory.read_string(resource, RESOURCE_NAME_OFFSET) else {
            return;
        };
        if !file_name.ends_with(SOUND_CONTAINER_SUFFIX) {
            return;
        }
        let Some(data) = self.memory.read_address(resource, RESOURCE_DATA_OFFSET) else {
            return;
        };
        if data.is_null() {
            return;
        }

        let mut is_voice_line = false;
        if !IGNORED_SOUND_RE.is_match(&file_name) {
            log::debug!("Loaded sound: {file_name}");
            if VOICE_LINE_RE.is_match(&file_name) {
                is_voice_line = true;
            }
        }

        if is_voice_line {
            log::debug!("Discovered voice line at address {data}");
            self.registry.insert(data);
        } else if self.registry.remove(data) {
            log::debug!("Cleared voice line from address {data} (address reused by: {file_name})");
        }
    }

    /// Handle a play-specific-sound observation.
    ///
    /// A voice line is assumed to play at most once after loading, so the
    /// registry is pruned as lines are played.
    pub fn on_sound_played(&self, sound: ResourceAddress) {
        let Some(data) = self.memory.read_address(sound, SOUND_DATA_OFFSET) else {
            return;
        };
        if self.registry.remove(data) {
            log::debug!("Caught playback of known voice line at address {data}");
            self.clock.mark();
        }
    }

    /// Number of registered, not-yet-played candidate voice lines.
    pub fn pending(&self) -> usize {
        self.registry.len()
    }
}
