//! The narration pipeline: from captured text event to queued audio.
//!
//! The host's capture layer (chat-log subscription, dialogue-box polling)
//! pushes [`ChatEvent`]s into a channel; a single dispatcher task runs each
//! event through the dedup gate, the normalizer, lexicon rewriting and voice
//! selection, then spawns a synthesis task against the selected provider.
//! Finished audio lands in the [`SoundQueue`] for the driver to render.
//!
//! Every way an event can die here is deliberate and logged: duplicate
//! polls, natively voiced lines, disabled state, unspeakable text, missing
//! provider or voices, and provider failures. None of them disturb the rest
//! of the pipeline.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};

use crate::config::SharedSettings;
use crate::lexicon::LexiconStore;
use crate::native::hooks::{CodeScanner, DetourBackend, SoundHooks};
use crate::native::{ForeignMemory, NativeLineClock, SoundCorrelator};
use crate::playback::{AudioDevice, RodioDevice};
use crate::providers::{self, EspeakProvider, OpenAiProvider, SpeechProvider};
use crate::queue::{QueueDriver, SoundQueue};
use crate::text;
use crate::voice::VoiceCache;
use crate::{ChatSource, EntityId, Gender, SpeechRequest};

/// How long after a native voice line dialogue-poll events stay suppressed.
const NATIVE_LINE_WINDOW: Duration = Duration::from_secs(1);

/// One captured text event, as pushed by the host's capture mechanism.
#[derive(Debug, Clone)]
pub struct ChatEvent {
    pub source: ChatSource,
    pub speaker: String,
    pub text: String,
    /// Live entity handle when the capture layer already has one; otherwise
    /// the pipeline asks the identity resolver.
    pub entity: Option<EntityId>,
}

/// Maps a speaker name to a live entity handle, if one exists right now.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<EntityId>;
}

/// Reads the gender of a live entity.
pub trait GenderResolver: Send + Sync {
    fn gender_of(&self, entity: EntityId) -> Gender;
}

/// Resolver that knows nothing; every speaker stays ungendered.
pub struct NullResolver;

impl IdentityResolver for NullResolver {
    fn resolve(&self, _name: &str) -> Option<EntityId> {
        None
    }
}

impl GenderResolver for NullResolver {
    fn gender_of(&self, _entity: EntityId) -> Gender {
        Gender::Unknown
    }
}

/// Why the dedup gate dropped (or kept) an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Forward,
    DuplicatePoll,
    NativelyVoiced,
}

/// Drops pipeline-duplicate and native-audio-shadowed events.
pub struct DedupGate {
    /// The immediately prior dialogue-poll observation. The dialogue box is
    /// read by repeated polling, so the same line arrives over and over
    /// until it changes.
    last_poll: Mutex<Option<(String, String)>>,
    clock: Arc<NativeLineClock>,
}

impl DedupGate {
    pub fn new(clock: Arc<NativeLineClock>) -> Self {
        Self {
            last_poll: Mutex::new(None),
            clock,
        }
    }

    /// Gate rules, in order: a dialogue-poll repeat of the previous
    /// (speaker, text) is a duplicate; a dialogue-poll arriving within the
    /// native-line window is already being voiced by the host. Everything
    /// else forwards.
    pub fn admit(&self, event: &ChatEvent) -> Verdict {
        if event.source != ChatSource::DialoguePoll {
            return Verdict::Forward;
        }

        let observation = (event.speaker.clone(), event.text.clone());
        {
            let mut last = self.last_poll.lock().expect("gate lock poisoned");
            if last.as_ref() == Some(&observation) {
                return Verdict::DuplicatePoll;
            }
            *last = Some(observation);
        }

        if self.clock.recent_within(NATIVE_LINE_WINDOW) {
            return Verdict::NativelyVoiced;
        }
        Verdict::Forward
    }
}

struct PipelineShared {
    settings: SharedSettings,
    providers: Vec<Arc<dyn SpeechProvider>>,
    lexicons: LexiconStore,
    voice_cache: Arc<VoiceCache>,
    queue: Arc<SoundQueue>,
    gate: DedupGate,
    identity: Arc<dyn IdentityResolver>,
    gender: Arc<dyn GenderResolver>,
}

impl PipelineShared {
    /// Run an event through every synchronous stage. Returns the provider
    /// and fully-resolved request for the asynchronous synthesis step, or
    /// `None` when the event was (deliberately) dropped.
    fn prepare(&self, event: &ChatEvent) -> Option<(Arc<dyn SpeechProvider>, SpeechRequest)> {
        match self.gate.admit(event) {
            Verdict::DuplicatePoll => {
                log::debug!("Duplicate dialogue poll: {} - {}", event.speaker, event.text);
                return None;
            }
            Verdict::NativelyVoiced => {
                log::info!("Skipping natively voiced line: {} - {}", event.speaker, event.text);
                return None;
            }
            Verdict::Forward => {}
        }

        let settings = self.settings.get();
        if !settings.enabled {
            log::debug!("Narration disabled; skipping line: {} - {}", event.speaker, event.text);
            return None;
        }

        let clean = text::clean_text(&event.text);
        if text::is_unspeakable(&clean) {
            log::debug!("Cleaned text is empty: {}", event.text);
            return None;
        }

        let Some(provider) = providers::select(&self.providers, settings.provider) else {
            log::info!("No speech provider registered for {:?}", settings.provider);
            return None;
        };

        let entity = event.entity.or_else(|| self.identity.resolve(&event.speaker));
        let gender = entity
            .map(|e| self.gender.gender_of(e))
            .unwrap_or(Gender::Unknown);

        let Some(sampled) = provider.catalog().sample(gender, &mut rand::thread_rng()) else {
            log::info!("No voices installed for provider {:?}", settings.provider);
            return None;
        };
        let speaker_key = if event.speaker.is_empty() {
            "Unknown"
        } else {
            event.speaker.as_str()
        };
        let voice = self.voice_cache.resolve(speaker_key, sampled);

        let spoken = if provider.speaks_markup() {
            self.lexicons.to_markup(&clean, &settings.enabled_lexicons)
        } else {
            clean
        };

        let request = SpeechRequest {
            speaker: speaker_key.to_string(),
            gender,
            text: spoken,
            voice,
            speed: settings.base_speed,
            volume: settings.base_volume,
        };
        log::debug!("Queueing line: {} - {}", event.speaker, event.text);
        Some((Arc::clone(provider), request))
    }
}

async fn synthesize_into_queue(
    provider: Arc<dyn SpeechProvider>,
    request: SpeechRequest,
    queue: Arc<SoundQueue>,
) {
    match provider.synthesize(&request).await {
        Ok(item) => queue.enqueue(item),
        Err(err) => {
            // No retry: during a provider outage the backlog must not grow.
            log::error!("Synthesis failed for {}: {err}", request.speaker);
        }
    }
}

async fn dispatch_loop(
    shared: Arc<PipelineShared>,
    mut events: mpsc::UnboundedReceiver<ChatEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut in_flight: JoinSet<()> = JoinSet::new();
    loop {
        tokio::select! {
            maybe_event = events.recv() => {
                let Some(event) = maybe_event else { break };
                if let Some((provider, request)) = shared.prepare(&event) {
                    let queue = Arc::clone(&shared.queue);
                    in_flight.spawn(synthesize_into_queue(provider, request, queue));
                }
                // Reap whatever already finished; never block on the rest.
                while in_flight.try_join_next().is_some() {}
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    // Abandon in-flight synthesis without waiting on it.
    in_flight.abort_all();
    log::debug!("Event dispatcher stopped");
}

/// Everything [`Narrator::start`] needs besides the lexicon directory.
///
/// `new` fills in production defaults (both providers, rodio output, null
/// resolvers); hosts and tests override fields as needed.
pub struct NarratorConfig {
    pub settings: SharedSettings,
    pub providers: Vec<Arc<dyn SpeechProvider>>,
    pub device: Arc<dyn AudioDevice>,
    pub identity: Arc<dyn IdentityResolver>,
    pub gender: Arc<dyn GenderResolver>,
}

impl NarratorConfig {
    pub fn new(settings: SharedSettings) -> Self {
        let mut providers: Vec<Arc<dyn SpeechProvider>> = vec![Arc::new(OpenAiProvider::new(
            reqwest::Client::new(),
            settings.clone(),
        ))];
        match EspeakProvider::discover() {
            Ok(espeak) => providers.push(Arc::new(espeak)),
            Err(err) => log::info!("Local synthesis unavailable: {err}"),
        }
        Self {
            settings,
            providers,
            device: Arc::new(RodioDevice::new()),
            identity: Arc::new(NullResolver),
            gender: Arc::new(NullResolver),
        }
    }
}

/// Capture-side sender for pushing events into the pipeline.
#[derive(Clone)]
pub struct NarratorHandle {
    tx: mpsc::UnboundedSender<ChatEvent>,
}

impl NarratorHandle {
    pub fn send(&self, event: ChatEvent) {
        if self.tx.send(event).is_err() {
            log::warn!("Narrator is shut down; dropping event");
        }
    }
}

/// The assembled narration subsystem.
///
/// Owns the dispatcher task, the queue driver, the native-line clock and
/// (optionally) the installed audio hooks. Must be created inside a tokio
/// runtime.
pub struct Narrator {
    handle: NarratorHandle,
    voice_cache: Arc<VoiceCache>,
    clock: Arc<NativeLineClock>,
    device: Arc<dyn AudioDevice>,
    hooks: Mutex<Option<SoundHooks>>,
    shutdown_tx: watch::Sender<bool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Narrator {
    /// Load lexicons from `lexicon_dir` and start the background tasks.
    ///
    /// An unreadable lexicon directory degrades to "no pronunciation
    /// rewriting" with an error log; it does not fail startup.
    pub fn start(config: NarratorConfig, lexicon_dir: &Path) -> Self {
        let lexicons = match LexiconStore::load_dir(lexicon_dir) {
            Ok(store) => store,
            Err(err) => {
                log::error!("Failed to load lexicons from {}: {err}", lexicon_dir.display());
                LexiconStore::new(Vec::new())
            }
        };
        Self::start_with_lexicons(config, lexicons)
    }

    /// Start with an already-built lexicon store.
    pub fn start_with_lexicons(config: NarratorConfig, lexicons: LexiconStore) -> Self {
        let voice_cache = Arc::new(VoiceCache::new());
        voice_cache.seed(&config.settings.get().speaker_voices);

        let clock = Arc::new(NativeLineClock::new());
        let queue = Arc::new(SoundQueue::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (tx, rx) = mpsc::unbounded_channel();

        let shared = Arc::new(PipelineShared {
            settings: config.settings.clone(),
            providers: config.providers,
            lexicons,
            voice_cache: Arc::clone(&voice_cache),
            queue: Arc::clone(&queue),
            gate: DedupGate::new(Arc::clone(&clock)),
            identity: config.identity,
            gender: config.gender,
        });

        let dispatcher = tokio::spawn(dispatch_loop(shared, rx, shutdown_rx.clone()));
        let driver = QueueDriver::spawn(
            queue,
            Arc::clone(&config.device),
            config.settings,
            shutdown_rx,
        );

        Self {
            handle: NarratorHandle { tx },
            voice_cache,
            clock,
            device: config.device,
            hooks: Mutex::new(None),
            shutdown_tx,
            dispatcher: Mutex::new(Some(dispatcher)),
            driver: Mutex::new(Some(driver)),
        }
    }

    pub fn handle(&self) -> NarratorHandle {
        self.handle.clone()
    }

    /// Current speaker → voice assignments, for external persistence.
    pub fn voice_cache(&self) -> &Arc<VoiceCache> {
        &self.voice_cache
    }

    /// Install the native audio hooks so dialogue already voiced by the
    /// host is suppressed. Safe to skip entirely; narration then simply
    /// never suppresses.
    pub fn attach_hooks(
        &self,
        scanner: &dyn CodeScanner,
        backend: &dyn DetourBackend,
        memory: Arc<dyn ForeignMemory>,
    ) {
        let correlator = Arc::new(SoundCorrelator::new(memory, Arc::clone(&self.clock)));
        let hooks = SoundHooks::install(scanner, backend, correlator);
        *self.hooks.lock().expect("hooks lock poisoned") = Some(hooks);
    }

    /// Stop everything: the driver loop, any thread blocked on playback
    /// completion, both hooks, and all in-flight synthesis (abandoned, not
    /// awaited).
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.device.stop();
        if let Some(mut hooks) = self.hooks.lock().expect("hooks lock poisoned").take() {
            hooks.detach();
        }

        let dispatcher = self.dispatcher.lock().expect("task lock poisoned").take();
        if let Some(task) = dispatcher {
            let _ = task.await;
        }
        let driver = self.driver.lock().expect("task lock poisoned").take();
        if let Some(task) = driver {
            let _ = task.await;
        }
        log::info!("Narrator shut down");
    }
}
