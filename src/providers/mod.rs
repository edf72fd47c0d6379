//! Speech synthesis providers.
//!
//! A provider turns a resolved [`SpeechRequest`] into raw audio bytes. Two
//! interchangeable implementations exist: networked cloud synthesis
//! ([`openai`]) and a local engine ([`espeak`]). Synthesis calls against one
//! provider instance are mutually exclusive; requests to different providers
//! run independently.

pub mod espeak;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::queue::AudioItem;
use crate::voice::VoiceCatalog;
use crate::SpeechRequest;

pub use espeak::EspeakProvider;
pub use openai::OpenAiProvider;

#[derive(thiserror::Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("synthesis request rejected with status {0}")]
    Status(reqwest::StatusCode),
    #[error(
        "espeak-ng not found. Install: Linux: `sudo apt-get install espeak-ng`, \
         macOS: `brew install espeak-ng`, Windows: https://espeak-ng.org/download"
    )]
    EngineNotFound,
    #[error("synthesis engine failed: {0}")]
    EngineFailed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("engine produced unusable audio: {0}")]
    BadAudio(String),
    #[error("no voices installed")]
    NoVoices,
}

/// Which provider the configuration selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderKind {
    OpenAi,
    Espeak,
}

/// Common interface for speech synthesis providers.
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// The provider's voices, partitioned into gender pools.
    fn catalog(&self) -> &VoiceCatalog;

    /// Whether [`synthesize`] accepts phonetic speech markup rather than
    /// plain text.
    ///
    /// [`synthesize`]: SpeechProvider::synthesize
    fn speaks_markup(&self) -> bool {
        false
    }

    /// Turn (text, voice, speed, volume) into a finished audio item.
    async fn synthesize(&self, request: &SpeechRequest) -> Result<AudioItem, ProviderError>;
}

/// Look up the provider matching the configured kind.
pub fn select<'a>(
    providers: &'a [Arc<dyn SpeechProvider>],
    kind: ProviderKind,
) -> Option<&'a Arc<dyn SpeechProvider>> {
    providers.iter().find(|p| p.kind() == kind)
}
