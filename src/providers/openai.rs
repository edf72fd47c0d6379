//! Cloud synthesis via the OpenAI speech API.

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ProviderError, ProviderKind, SpeechProvider};
use crate::config::SharedSettings;
use crate::queue::{AudioItem, Codec};
use crate::voice::VoiceCatalog;
use crate::SpeechRequest;

const SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";

/// The API's fixed voice roster, split by how the voices read.
fn builtin_catalog() -> VoiceCatalog {
    VoiceCatalog {
        masculine: vec!["echo".into(), "onyx".into()],
        feminine: vec![
            "alloy".into(),
            "fable".into(),
            "nova".into(),
            "shimmer".into(),
        ],
        neutral: vec![],
    }
}

/// Networked speech provider. Produces mp3 audio; does not accept speech
/// markup (the API takes plain text only).
pub struct OpenAiProvider {
    http: reqwest::Client,
    settings: SharedSettings,
    catalog: VoiceCatalog,
    /// At most one request in flight against the API at a time.
    gate: Mutex<()>,
}

impl OpenAiProvider {
    pub fn new(http: reqwest::Client, settings: SharedSettings) -> Self {
        Self {
            http,
            settings,
            catalog: builtin_catalog(),
            gate: Mutex::new(()),
        }
    }
}

#[async_trait]
impl SpeechProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn catalog(&self) -> &VoiceCatalog {
        &self.catalog
    }

    async fn synthesize(&self, request: &SpeechRequest) -> Result<AudioItem, ProviderError> {
        let _in_flight = self.gate.lock().await;

        let cfg = self.settings.get();
        let body = serde_json::json!({
            "model": cfg.openai.model,
            "input": request.text,
            "voice": request.voice.to_lowercase(),
            "response_format": "mp3",
            "speed": request.speed,
        });
        log::debug!("[OpenAI][{}] {body}", request.voice);

        let res = self
            .http
            .post(SPEECH_URL)
            .bearer_auth(&cfg.openai.api_key)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(ProviderError::Status(res.status()));
        }

        let bytes = res.bytes().await?;
        Ok(AudioItem {
            data: bytes.to_vec(),
            codec: Codec::Mp3,
            volume: request.volume,
        })
    }
}
