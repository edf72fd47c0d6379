//! # voxline
//!
//! A Rust library that narrates in-game dialogue and chat as speech.
//!
//! ## Features
//!
//! - **Event pipeline**: chat-log, dialogue-poll and synthetic text events
//!   flow through a dedup gate, a Unicode-aware normalizer and
//!   user-configurable pronunciation lexicons before synthesis
//! - **Native-line suppression**: host audio hooks correlate pre-recorded
//!   voice-line playback so already-voiced dialogue is not narrated twice
//! - **Pluggable providers**: cloud synthesis (OpenAI) and a local
//!   espeak-ng engine behind one trait, with persistent, gender-aware
//!   per-speaker voice assignment
//! - **Serialized playback**: finished audio is queued and rendered strictly
//!   one line at a time
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::path::Path;
//! use voxline::{ChatEvent, ChatSource, Narrator, NarratorConfig, SharedSettings};
//!
//! let settings = SharedSettings::default();
//! let narrator = Narrator::start(NarratorConfig::new(settings), Path::new("Lexicons"));
//!
//! narrator.handle().send(ChatEvent {
//!     source: ChatSource::ChatLog,
//!     speaker: "Tataru".to_string(),
//!     text: "Welcome back!".to_string(),
//!     entity: None,
//! });
//! ```

pub mod config;
pub mod lexicon;
pub mod native;
pub mod pipeline;
pub mod playback;
pub mod providers;
pub mod queue;
pub mod text;
pub mod voice;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

pub use config::{Settings, SharedSettings};
pub use pipeline::{ChatEvent, Narrator, NarratorConfig, NarratorHandle};
pub use providers::{ProviderKind, SpeechProvider};
pub use queue::{AudioItem, Codec, SoundQueue};

/// Detected gender of a speaking entity, used only to pick a plausible
/// voice pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Unknown,
    Male,
    Female,
}

/// Where a text event came from. Dialogue-poll events are read by repeated
/// polling of the dialogue box and need extra deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatSource {
    DialoguePoll,
    ChatLog,
    Synthetic,
}

/// Opaque handle to a live in-game entity, resolved by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

/// One fully-resolved synthesis request.
///
/// Created for each event that survives the dedup gate, handed to a
/// provider, and destroyed after its audio is enqueued or on error.
#[derive(Debug, Clone, Builder)]
pub struct SpeechRequest {
    /// Speaker display name; keys the voice cache.
    pub speaker: String,
    #[builder(default = "Gender::Unknown")]
    pub gender: Gender,
    /// Text to speak: plain for providers without markup support, speech
    /// markup otherwise.
    pub text: String,
    /// Resolved voice id, after cache lookup.
    pub voice: String,
    #[builder(default = "1.0")]
    pub speed: f32,
    #[builder(default = "1.0")]
    pub volume: f32,
}

impl SpeechRequest {
    pub fn builder() -> SpeechRequestBuilder {
        SpeechRequestBuilder::default()
    }
}

#[cfg(test)]
mod tests {
    use super::{Gender, SpeechRequest};

    #[test]
    fn builder_fills_defaults() {
        let req = SpeechRequest::builder()
            .speaker("Tataru".to_string())
            .text("hello".to_string())
            .voice("shimmer".to_string())
            .build()
            .unwrap();
        assert_eq!(req.gender, Gender::Unknown);
        assert_eq!(req.speed, 1.0);
        assert_eq!(req.volume, 1.0);
    }
}
