use super::locale::locale_for_language;
use super::script::speakable_script;
use super::types::{PlayRejected, PlaybackError, PlaybackMode, PlaybackState, PlaybackView};
use super::{AudioOutput, SpeechSynthesizer};
use crate::events::EventSink;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

static NEXT_PLAY: AtomicU64 = AtomicU64::new(1);

/// What a listening question offers for playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSource {
    pub question_id: String,
    pub audio_url: Option<String>,
    pub script: Option<String>,
    pub language: Option<String>,
    pub max_plays: u32,
}

/// Completion signals from a running play, tagged with the play they belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Ended { play: u64 },
    LoadFailed { play: u64, reason: String },
    SynthesisFailed { play: u64, reason: String },
}

/// Bounded-replay playback for one listening question at a time.
///
/// A play counts only when its ended signal arrives. A network asset that
/// fails to load downgrades the question to synthesized speech for good.
pub struct AudioPlaybackEngine {
    output: Option<Arc<dyn AudioOutput>>,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    events: EventSink<PlaybackEvent>,
    source: Option<PlaybackSource>,
    state: PlaybackState,
    current_play: Option<u64>,
    task: Option<JoinHandle<()>>,
}

impl AudioPlaybackEngine {
    pub fn new(
        output: Option<Arc<dyn AudioOutput>>,
        synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
        events: EventSink<PlaybackEvent>,
    ) -> Self {
        Self {
            output,
            synthesizer,
            events,
            source: None,
            state: PlaybackState {
                play_count: 0,
                max_plays: 0,
                mode: PlaybackMode::SynthesizedSpeech,
            },
            current_play: None,
            task: None,
        }
    }

    /// Attach a question. Counters reset only when the question identity changes.
    pub fn load(&mut self, source: PlaybackSource) {
        if let Some(current) = &self.source {
            if current.question_id == source.question_id {
                debug!("Playback already loaded for question {}", source.question_id);
                return;
            }
        }

        self.stop();
        let mode = if source.audio_url.is_some() && self.output.is_some() {
            PlaybackMode::NetworkAudio
        } else {
            PlaybackMode::SynthesizedSpeech
        };
        self.state = PlaybackState {
            play_count: 0,
            max_plays: source.max_plays.max(1),
            mode,
        };
        info!(
            "Playback loaded for question {} ({:?}, {} plays)",
            source.question_id, mode, self.state.max_plays
        );
        self.source = Some(source);
    }

    /// Fill in assets that arrived after `load`, without touching the counters.
    /// A provided script replaces the current one. A question already
    /// downgraded to synthesis never goes back to the network.
    pub fn supplement(&mut self, question_id: &str, audio_url: Option<String>, script: Option<String>) {
        let Some(source) = self.source.as_mut() else {
            return;
        };
        if source.question_id != question_id {
            return;
        }
        if script.is_some() {
            source.script = script;
        }
        let untouched = self.state.play_count == 0 && self.current_play.is_none();
        if source.audio_url.is_none() && untouched {
            if let Some(url) = audio_url {
                source.audio_url = Some(url);
                if self.output.is_some() {
                    self.state.mode = PlaybackMode::NetworkAudio;
                }
            }
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn plays_remaining(&self) -> u32 {
        self.state.plays_remaining()
    }

    pub fn is_playing(&self) -> bool {
        self.current_play.is_some()
    }

    pub fn is_available(&self) -> bool {
        let Some(source) = &self.source else {
            return false;
        };
        match self.state.mode {
            PlaybackMode::NetworkAudio => self.output.is_some() && source.audio_url.is_some(),
            PlaybackMode::SynthesizedSpeech => self.synthesis_ready(source),
        }
    }

    fn synthesis_ready(&self, source: &PlaybackSource) -> bool {
        let has_script = source
            .script
            .as_deref()
            .map(|s| !speakable_script(s).is_empty())
            .unwrap_or(false);
        has_script
            && self
                .synthesizer
                .as_ref()
                .map(|s| s.is_available())
                .unwrap_or(false)
    }

    pub fn play(&mut self) -> Result<(), PlayRejected> {
        if self.source.is_none() {
            return Err(PlayRejected::NotLoaded);
        }
        if self.state.play_count >= self.state.max_plays {
            debug!("Play budget exhausted");
            return Err(PlayRejected::Exhausted);
        }
        if self.current_play.is_some() {
            return Err(PlayRejected::AlreadyPlaying);
        }
        if !self.is_available() {
            return Err(PlayRejected::Unavailable);
        }
        self.launch();
        Ok(())
    }

    fn launch(&mut self) {
        let Some(source) = self.source.clone() else {
            return;
        };
        let play = NEXT_PLAY.fetch_add(1, Ordering::Relaxed);
        let events = self.events.clone();
        self.current_play = Some(play);

        let task = match (self.state.mode, &self.output, &source.audio_url) {
            (PlaybackMode::NetworkAudio, Some(output), Some(url)) => {
                let output = output.clone();
                let url = url.clone();
                info!("Playing audio asset via {} (play {})", output.name(), play);
                tokio::spawn(async move {
                    match output.play(&url).await {
                        Ok(()) => events(PlaybackEvent::Ended { play }),
                        Err(e) => events(PlaybackEvent::LoadFailed {
                            play,
                            reason: e.to_string(),
                        }),
                    }
                })
            }
            _ => {
                let Some(synthesizer) = self.synthesizer.clone() else {
                    self.current_play = None;
                    return;
                };
                let text = speakable_script(source.script.as_deref().unwrap_or_default());
                let locale = locale_for_language(source.language.as_deref().unwrap_or_default());
                info!("Speaking script in {} (play {})", locale, play);
                tokio::spawn(async move {
                    match synthesizer.speak(&text, &locale).await {
                        Ok(()) => events(PlaybackEvent::Ended { play }),
                        Err(e) => events(PlaybackEvent::SynthesisFailed {
                            play,
                            reason: e.to_string(),
                        }),
                    }
                })
            }
        };
        self.task = Some(task);
    }

    /// Apply a completion signal. Returns an error worth showing inline.
    pub fn handle(&mut self, event: PlaybackEvent) -> Option<PlaybackError> {
        let play = match &event {
            PlaybackEvent::Ended { play }
            | PlaybackEvent::LoadFailed { play, .. }
            | PlaybackEvent::SynthesisFailed { play, .. } => *play,
        };
        if self.current_play != Some(play) {
            debug!("Ignoring signal from stale play {}", play);
            return None;
        }
        self.current_play = None;
        self.task = None;

        match event {
            PlaybackEvent::Ended { .. } => {
                self.state.play_count = (self.state.play_count + 1).min(self.state.max_plays);
                info!(
                    "Play finished ({}/{})",
                    self.state.play_count, self.state.max_plays
                );
                None
            }
            PlaybackEvent::LoadFailed { reason, .. } => {
                warn!("Audio asset failed to load, switching to synthesis: {}", reason);
                self.state.mode = PlaybackMode::SynthesizedSpeech;
                if self.is_available() {
                    self.launch();
                    None
                } else {
                    Some(PlaybackError::Unavailable)
                }
            }
            PlaybackEvent::SynthesisFailed { reason, .. } => {
                warn!("Speech synthesis failed: {}", reason);
                Some(PlaybackError::SynthesisFailed(reason))
            }
        }
    }

    /// Interrupt the running play. An interrupted play does not count.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if self.current_play.take().is_some() {
            debug!("Playback interrupted");
        }
    }

    pub fn teardown(&mut self) {
        self.stop();
        self.source = None;
    }

    pub fn view(&self) -> PlaybackView {
        let available = self.is_available();
        PlaybackView {
            state: self.state,
            plays_remaining: self.plays_remaining(),
            playing: self.is_playing(),
            available,
            can_play: available && self.plays_remaining() > 0 && !self.is_playing(),
        }
    }
}

impl Drop for AudioPlaybackEngine {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::channel_sink;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    struct FakeOutput {
        fail: bool,
        started: AtomicUsize,
    }

    #[async_trait]
    impl AudioOutput for FakeOutput {
        async fn play(&self, _url: &str) -> Result<(), PlaybackError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(PlaybackError::LoadFailed("404".into()))
            } else {
                Ok(())
            }
        }

        fn name(&self) -> &str {
            "fake-output"
        }
    }

    struct FakeSynthesizer {
        available: bool,
        spoken: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl SpeechSynthesizer for FakeSynthesizer {
        fn is_available(&self) -> bool {
            self.available
        }

        async fn speak(&self, text: &str, locale: &str) -> Result<(), PlaybackError> {
            self.spoken
                .lock()
                .unwrap()
                .push((text.to_string(), locale.to_string()));
            Ok(())
        }
    }

    fn output(fail: bool) -> Arc<FakeOutput> {
        Arc::new(FakeOutput {
            fail,
            started: AtomicUsize::new(0),
        })
    }

    fn synthesizer(available: bool) -> Arc<FakeSynthesizer> {
        Arc::new(FakeSynthesizer {
            available,
            spoken: Mutex::new(Vec::new()),
        })
    }

    fn source(id: &str, audio_url: Option<&str>, max_plays: u32) -> PlaybackSource {
        PlaybackSource {
            question_id: id.to_string(),
            audio_url: audio_url.map(str::to_string),
            script: Some("Good morning [pause] everyone.".to_string()),
            language: Some("fr".to_string()),
            max_plays,
        }
    }

    fn engine(
        output: Option<Arc<FakeOutput>>,
        synthesizer: Option<Arc<FakeSynthesizer>>,
    ) -> (AudioPlaybackEngine, mpsc::UnboundedReceiver<PlaybackEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let output = output.map(|o| o as Arc<dyn AudioOutput>);
        let synthesizer = synthesizer.map(|s| s as Arc<dyn SpeechSynthesizer>);
        (
            AudioPlaybackEngine::new(output, synthesizer, channel_sink(tx, |e| e)),
            rx,
        )
    }

    #[tokio::test]
    async fn budget_of_two_then_no_op() {
        let out = output(false);
        let (mut engine, mut rx) = engine(Some(out.clone()), None);
        engine.load(source("q1", Some("https://cdn/q1.mp3"), 2));

        for expected in 1..=2 {
            engine.play().unwrap();
            assert_eq!(engine.state().play_count, expected - 1);
            let event = rx.recv().await.unwrap();
            assert!(engine.handle(event).is_none());
            assert_eq!(engine.state().play_count, expected);
        }

        assert_eq!(engine.play(), Err(PlayRejected::Exhausted));
        assert_eq!(engine.plays_remaining(), 0);
        assert!(!engine.view().can_play);
        assert_eq!(out.started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn interrupted_play_does_not_count() {
        let (mut engine, mut rx) = engine(Some(output(false)), None);
        engine.load(source("q1", Some("https://cdn/q1.mp3"), 1));

        engine.play().unwrap();
        assert_eq!(engine.play(), Err(PlayRejected::AlreadyPlaying));
        engine.stop();
        tokio::task::yield_now().await;
        while let Ok(event) = rx.try_recv() {
            engine.handle(event);
        }
        assert_eq!(engine.state().play_count, 0);
        assert!(engine.play().is_ok());
    }

    #[tokio::test]
    async fn load_error_downgrades_to_synthesis_once() {
        let out = output(true);
        let synth = synthesizer(true);
        let (mut engine, mut rx) = engine(Some(out.clone()), Some(synth.clone()));
        engine.load(source("q1", Some("https://cdn/missing.mp3"), 2));
        assert_eq!(engine.state().mode, PlaybackMode::NetworkAudio);

        engine.play().unwrap();
        let failed = rx.recv().await.unwrap();
        assert!(matches!(failed, PlaybackEvent::LoadFailed { .. }));
        assert!(engine.handle(failed).is_none());
        assert_eq!(engine.state().mode, PlaybackMode::SynthesizedSpeech);
        assert_eq!(engine.state().play_count, 0);
        assert!(engine.is_playing());

        let ended = rx.recv().await.unwrap();
        engine.handle(ended);
        assert_eq!(engine.state().play_count, 1);

        engine.play().unwrap();
        engine.handle(rx.recv().await.unwrap());
        assert_eq!(engine.state().play_count, 2);
        assert_eq!(out.started.load(Ordering::SeqCst), 1);

        let spoken = synth.spoken.lock().unwrap();
        assert_eq!(spoken.len(), 2);
        assert_eq!(spoken[0], ("Good morning everyone.".to_string(), "fr-FR".to_string()));
    }

    #[tokio::test]
    async fn nothing_to_play_is_unavailable() {
        let (mut engine, _rx) = engine(None, Some(synthesizer(false)));
        engine.load(source("q1", None, 2));
        assert!(!engine.is_available());
        assert_eq!(engine.play(), Err(PlayRejected::Unavailable));
        assert!(!engine.view().available);
    }

    #[tokio::test]
    async fn counters_reset_only_on_new_question() {
        let (mut engine, mut rx) = engine(None, Some(synthesizer(true)));
        engine.load(source("q1", None, 2));
        engine.play().unwrap();
        engine.handle(rx.recv().await.unwrap());
        assert_eq!(engine.state().play_count, 1);

        engine.load(source("q1", None, 2));
        assert_eq!(engine.state().play_count, 1);

        engine.load(source("q2", None, 3));
        assert_eq!(engine.state().play_count, 0);
        assert_eq!(engine.plays_remaining(), 3);
    }

    #[tokio::test]
    async fn late_audio_url_is_adopted_before_first_play() {
        let (mut engine, _rx) = engine(Some(output(false)), None);
        engine.load(PlaybackSource {
            script: None,
            ..source("q1", None, 2)
        });
        assert!(!engine.is_available());

        engine.supplement("q1", Some("https://cdn/tts/q1.mp3".into()), None);
        assert_eq!(engine.state().mode, PlaybackMode::NetworkAudio);
        assert!(engine.is_available());

        engine.supplement("other", None, Some("ignored".into()));
        assert!(engine.is_available());
    }
}
