//! Local synthesis via a spawned espeak-ng process.
//!
//! The engine is queried for its installed voices once at startup, and each
//! synthesis call pipes speech markup through `espeak-ng -m` and reads the
//! WAV it writes to stdout. No network involved; useful where cloud
//! synthesis is unavailable or undesired.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ProviderError, ProviderKind, SpeechProvider};
use crate::queue::{AudioItem, Codec};
use crate::voice::VoiceCatalog;
use crate::SpeechRequest;

/// Baseline speaking rate in words per minute at speed 1.0.
const BASE_WPM: f32 = 160.0;

fn find_in_path(bin: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&paths) {
        let candidate = dir.join(bin);
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

/// Parse the table printed by `espeak-ng --voices=<lang>` into gender pools.
///
/// Columns are `Pty Language Age/Gender VoiceName File ...`; the gender is
/// the last character of the Age/Gender column (`M`, `F`, or `-`).
fn parse_voice_listing(listing: &str) -> VoiceCatalog {
    let mut catalog = VoiceCatalog::default();
    for line in listing.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let voice = fields[3].to_string();
        match fields[2].chars().last() {
            Some('M') => catalog.masculine.push(voice),
            Some('F') => catalog.feminine.push(voice),
            _ => catalog.neutral.push(voice),
        }
    }
    catalog
}

/// Local speech provider backed by the espeak-ng binary.
pub struct EspeakProvider {
    bin: PathBuf,
    catalog: VoiceCatalog,
    /// Serializes engine invocations; espeak-ng is cheap but not reentrant
    /// enough to be worth racing against itself.
    gate: Mutex<()>,
}

impl EspeakProvider {
    /// Locate espeak-ng on PATH and query its voice catalog.
    pub fn discover() -> Result<Self, ProviderError> {
        let bin = find_in_path("espeak-ng").ok_or(ProviderError::EngineNotFound)?;
        Self::with_binary(bin)
    }

    /// Use an explicit espeak-ng binary, e.g. one bundled with the host.
    pub fn with_binary(bin: PathBuf) -> Result<Self, ProviderError> {
        let output = Command::new(&bin).arg("--voices=en").output()?;
        if !output.status.success() {
            return Err(ProviderError::EngineFailed(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        let catalog = parse_voice_listing(&String::from_utf8_lossy(&output.stdout));
        if catalog.is_empty() {
            log::warn!("espeak-ng reported no voices");
        } else {
            log::info!("Loaded {} espeak-ng voices", catalog.all().len());
        }
        Ok(Self {
            bin,
            catalog,
            gate: Mutex::new(()),
        })
    }
}

fn synth_blocking(bin: &Path, request: &SpeechRequest) -> Result<AudioItem, ProviderError> {
    let wpm = (BASE_WPM * request.speed).round().clamp(80.0, 450.0) as i32;

    let mut cmd = Command::new(bin);
    cmd.args(["-m", "--stdin", "--stdout"])
        .args(["-v", &request.voice])
        .args(["-s", &wpm.to_string()])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    log::debug!("[espeak][{}] {}", request.voice, request.text);

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ProviderError::EngineNotFound
        } else {
            ProviderError::Io(e)
        }
    })?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(request.text.as_bytes())?;
        stdin.write_all(b"\n")?;
    }
    let output = child.wait_with_output()?;
    if !output.status.success() {
        return Err(ProviderError::EngineFailed(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }

    // espeak-ng streams to stdout with a placeholder RIFF length, so read
    // samples until the payload runs out rather than trusting the header.
    let mut reader = hound::WavReader::new(Cursor::new(output.stdout))
        .map_err(|e| ProviderError::BadAudio(e.to_string()))?;
    let spec = reader.spec();
    let mut data = Vec::new();
    for sample in reader.samples::<i16>() {
        match sample {
            Ok(v) => data.extend_from_slice(&v.to_le_bytes()),
            Err(_) => break,
        }
    }
    if data.is_empty() {
        return Err(ProviderError::BadAudio("no samples produced".into()));
    }

    Ok(AudioItem {
        data,
        codec: Codec::Pcm {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
        },
        volume: request.volume,
    })
}

#[async_trait]
impl SpeechProvider for EspeakProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Espeak
    }

    fn catalog(&self) -> &VoiceCatalog {
        &self.catalog
    }

    fn speaks_markup(&self) -> bool {
        true
    }

    async fn synthesize(&self, request: &SpeechRequest) -> Result<AudioItem, ProviderError> {
        let _in_flight = self.gate.lock().await;

        let bin = self.bin.clone();
        let request = request.clone();
        tokio::task::spawn_blocking(move || synth_blocking(&bin, &request))
            .await
            .map_err(|e| ProviderError::EngineFailed(e.to_string()))?
    }
}
