//! The playback queue and its single-consumer driver.
//!
//! Synthesis tasks finish in whatever order providers answer; the queue puts
//! the results back into a strict line-at-a-time order. Any number of
//! producers may enqueue concurrently, but exactly one driver task dequeues,
//! and it does not pick up the next item until the output device reports the
//! previous one stopped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::SharedSettings;
use crate::playback::{self, AudioDevice};

/// How the payload of an [`AudioItem`] is encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Codec {
    Mp3,
    Pcm { sample_rate: u32, channels: u16 },
}

/// One finished piece of narration audio, owned by the queue from enqueue
/// until the driver consumes it.
#[derive(Debug, Clone)]
pub struct AudioItem {
    pub data: Vec<u8>,
    pub codec: Codec,
    pub volume: f32,
}

/// FIFO of finished audio. Producers only enqueue; only the driver dequeues.
pub struct SoundQueue {
    items: Mutex<VecDeque<AudioItem>>,
}

impl SoundQueue {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    pub fn enqueue(&self, item: AudioItem) {
        self.items.lock().expect("queue lock poisoned").push_back(item);
    }

    pub fn dequeue(&self) -> Option<AudioItem> {
        self.items.lock().expect("queue lock poisoned").pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().expect("queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SoundQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll interval of the driver when the queue is empty.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Single consumer loop rendering queued audio one item at a time.
pub struct QueueDriver;

impl QueueDriver {
    /// Spawn the driver task. It runs until `shutdown` flips to `true`.
    pub fn spawn(
        queue: Arc<SoundQueue>,
        device: Arc<dyn AudioDevice>,
        settings: SharedSettings,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }

                if let Some(item) = queue.dequeue() {
                    if !settings.get().enabled {
                        log::debug!("Narration disabled; discarding queued audio undecoded");
                    } else {
                        let device = Arc::clone(&device);
                        let played = tokio::task::spawn_blocking(move || {
                            let audio = playback::decode(&item)?;
                            device.play(&audio)
                        })
                        .await;
                        match played {
                            Ok(Ok(())) => {}
                            Ok(Err(err)) => log::error!("Failed to play sound: {err}"),
                            Err(err) => log::error!("Playback task panicked: {err}"),
                        }
                    }
                }

                tokio::select! {
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                    _ = shutdown.changed() => {}
                }
            }
            log::debug!("Queue driver stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{AudioItem, Codec, QueueDriver, SoundQueue};
    use crate::config::SharedSettings;
    use crate::playback::{AudioDevice, DecodedAudio, PlaybackError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::watch;

    struct CountingDevice {
        plays: AtomicUsize,
    }

    impl CountingDevice {
        fn new() -> Self {
            Self {
                plays: AtomicUsize::new(0),
            }
        }
    }

    impl AudioDevice for CountingDevice {
        fn play(&self, _audio: &DecodedAudio) -> Result<(), PlaybackError> {
            self.plays.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&self) {}
    }

    struct FailingDevice {
        attempts: AtomicUsize,
    }

    impl AudioDevice for FailingDevice {
        fn play(&self, _audio: &DecodedAudio) -> Result<(), PlaybackError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(PlaybackError::MalformedPcm("boom".into()))
            } else {
                Ok(())
            }
        }

        fn stop(&self) {}
    }

    fn pcm_item() -> AudioItem {
        AudioItem {
            data: vec![0u8; 64],
            codec: Codec::Pcm {
                sample_rate: 44100,
                channels: 1,
            },
            volume: 1.0,
        }
    }

    async fn drain(queue: &SoundQueue) {
        for _ in 0..200 {
            if queue.is_empty() {
                // One extra tick so the in-flight item finishes playing.
                tokio::time::sleep(Duration::from_millis(60)).await;
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("queue never drained");
    }

    #[tokio::test]
    async fn queue_is_fifo() {
        let queue = SoundQueue::new();
        for volume in [1.0f32, 2.0, 3.0] {
            let mut item = pcm_item();
            item.volume = volume;
            queue.enqueue(item);
        }
        assert_eq!(queue.dequeue().unwrap().volume, 1.0);
        assert_eq!(queue.dequeue().unwrap().volume, 2.0);
        assert_eq!(queue.dequeue().unwrap().volume, 3.0);
        assert!(queue.dequeue().is_none());
    }

    #[tokio::test]
    async fn disabled_items_are_discarded_then_enabled_items_play() {
        let queue = Arc::new(SoundQueue::new());
        let device = Arc::new(CountingDevice::new());
        let settings = SharedSettings::default();
        settings.update(|s| s.enabled = false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let driver = QueueDriver::spawn(
            Arc::clone(&queue),
            device.clone() as Arc<dyn AudioDevice>,
            settings.clone(),
            shutdown_rx,
        );

        for _ in 0..5 {
            queue.enqueue(pcm_item());
        }
        drain(&queue).await;
        assert_eq!(device.plays.load(Ordering::SeqCst), 0, "disabled items must not reach the device");

        settings.update(|s| s.enabled = true);
        queue.enqueue(pcm_item());
        drain(&queue).await;
        assert_eq!(device.plays.load(Ordering::SeqCst), 1, "exactly the newly enqueued item plays");

        shutdown_tx.send(true).unwrap();
        driver.await.unwrap();
    }

    #[tokio::test]
    async fn playback_error_does_not_stall_the_driver() {
        let queue = Arc::new(SoundQueue::new());
        let device = Arc::new(FailingDevice {
            attempts: AtomicUsize::new(0),
        });
        let settings = SharedSettings::default();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let driver = QueueDriver::spawn(
            Arc::clone(&queue),
            device.clone() as Arc<dyn AudioDevice>,
            settings,
            shutdown_rx,
        );

        queue.enqueue(pcm_item());
        queue.enqueue(pcm_item());
        drain(&queue).await;
        assert_eq!(
            device.attempts.load(Ordering::SeqCst),
            2,
            "the item after a failed one still plays"
        );

        shutdown_tx.send(true).unwrap();
        driver.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let queue = Arc::new(SoundQueue::new());
        let device = Arc::new(CountingDevice::new());
        let settings = SharedSettings::default();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let driver = QueueDriver::spawn(
            Arc::clone(&queue),
            device as Arc<dyn AudioDevice>,
            settings,
            shutdown_rx,
        );
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), driver)
            .await
            .expect("driver must exit promptly on shutdown")
            .unwrap();
    }
}
