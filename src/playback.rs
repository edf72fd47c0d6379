//! Audio decoding and output devices.
//!
//! Queued audio arrives either as an mp3 container (cloud synthesis) or raw
//! PCM (local engine). Both are decoded to a normalized f32 sample stream,
//! scaled by the item's volume, and handed to an [`AudioDevice`]. The device
//! contract is deliberately blocking: `play` returns only once the output
//! device signals that playback stopped, which is what serializes lines.

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use rodio::buffer::SamplesBuffer;
use rodio::{Decoder, OutputStream, Sink, Source};

use crate::queue::{AudioItem, Codec};

#[derive(thiserror::Error, Debug)]
pub enum PlaybackError {
    #[error("failed to decode audio: {0}")]
    Decode(#[from] rodio::decoder::DecoderError),
    #[error("audio output stream unavailable: {0}")]
    Stream(#[from] rodio::StreamError),
    #[error("audio output rejected playback: {0}")]
    Play(#[from] rodio::PlayError),
    #[error("malformed PCM payload: {0}")]
    MalformedPcm(String),
}

/// A decoded, volume-scaled sample stream ready for an output device.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Decode an [`AudioItem`] by its codec tag and apply its volume scalar.
pub fn decode(item: &AudioItem) -> Result<DecodedAudio, PlaybackError> {
    let mut audio = match &item.codec {
        Codec::Mp3 => {
            let decoder = Decoder::new(Cursor::new(item.data.clone()))?;
            let sample_rate = decoder.sample_rate();
            let channels = decoder.channels();
            DecodedAudio {
                samples: decoder.convert_samples::<f32>().collect(),
                sample_rate,
                channels,
            }
        }
        Codec::Pcm {
            sample_rate,
            channels,
        } => {
            if item.data.len() % 2 != 0 {
                return Err(PlaybackError::MalformedPcm(format!(
                    "odd byte length {}",
                    item.data.len()
                )));
            }
            let samples = item
                .data
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / i16::MAX as f32)
                .collect();
            DecodedAudio {
                samples,
                sample_rate: *sample_rate,
                channels: *channels,
            }
        }
    };

    if (item.volume - 1.0).abs() > f32::EPSILON {
        for sample in &mut audio.samples {
            *sample *= item.volume;
        }
    }
    Ok(audio)
}

/// Host audio output.
///
/// `play` blocks the calling thread until the device reports that playback
/// stopped; `stop` releases a thread currently blocked in `play`, which is
/// how shutdown unsticks the queue driver.
pub trait AudioDevice: Send + Sync {
    fn play(&self, audio: &DecodedAudio) -> Result<(), PlaybackError>;
    fn stop(&self);
}

/// Default output device backed by rodio.
///
/// Only one sink exists at a time; the handle is kept so [`stop`] can reach
/// a render in progress.
///
/// [`stop`]: AudioDevice::stop
pub struct RodioDevice {
    current: Mutex<Option<Arc<Sink>>>,
}

impl RodioDevice {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }
}

impl Default for RodioDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDevice for RodioDevice {
    fn play(&self, audio: &DecodedAudio) -> Result<(), PlaybackError> {
        // The output stream must outlive the sink and stays on this thread
        // for the duration of the render.
        let (_stream, handle) = OutputStream::try_default()?;
        let sink = Arc::new(Sink::try_new(&handle)?);
        sink.append(SamplesBuffer::new(
            audio.channels,
            audio.sample_rate,
            audio.samples.clone(),
        ));

        {
            let mut current = self.current.lock().expect("sink lock poisoned");
            *current = Some(Arc::clone(&sink));
        }

        // Returns when the samples drain or stop() halts the sink.
        sink.sleep_until_end();

        let mut current = self.current.lock().expect("sink lock poisoned");
        *current = None;
        Ok(())
    }

    fn stop(&self) {
        let mut current = self.current.lock().expect("sink lock poisoned");
        if let Some(sink) = current.take() {
            sink.stop();
        }
    }
}
