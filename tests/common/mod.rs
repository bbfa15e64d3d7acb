#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use section_runtime::audio::{
    AudioFormat, CaptureError, CaptureHints, ChunkBuffer, InputStream, Microphone, RecordingBlob,
    SharedChunks, StreamInfo,
};
use section_runtime::gateway::{
    AnswerVerdict, GatewayError, NextQuestion, Question, QuestionOption, QuestionType, Rubric,
    Section, SectionRef, SectionStatus, Skill, SubmissionGateway, TtsAudio, UploadedAudio,
};
use section_runtime::media::MediaHandles;
use section_runtime::playback::{AudioOutput, PlaybackError, SpeechSynthesizer};
use section_runtime::session::{SessionController, SessionDeps, SessionSettings};
use section_runtime::timer::{Clock, Thresholds};
use section_runtime::RuntimeConfig;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
}

pub fn section(skill: Skill, expires_in_secs: i64) -> Section {
    Section {
        id: "s1".to_string(),
        skill,
        expires_at: epoch() + ChronoDuration::seconds(expires_in_secs),
        status: SectionStatus::InProgress,
    }
}

fn base_question(id: &str, skill: Skill, question_type: QuestionType) -> Question {
    Question {
        id: id.to_string(),
        skill,
        question_type,
        prompt: Some(format!("Prompt for {}", id)),
        passage: None,
        script: None,
        audio_url: None,
        language: None,
        level: None,
        options: Vec::new(),
        rubric: None,
        max_plays: None,
    }
}

pub fn capital_question(id: &str) -> Question {
    let mut question = base_question(id, Skill::Reading, QuestionType::MultipleChoice);
    question.prompt = Some("What is the capital of the United Kingdom?".to_string());
    question.options = ["Paris", "London"]
        .iter()
        .map(|v| QuestionOption {
            label: v.to_string(),
            value: v.to_string(),
        })
        .collect();
    question
}

pub fn essay_question(id: &str, min_words: u32, max_words: u32) -> Question {
    let mut question = base_question(id, Skill::Writing, QuestionType::Essay);
    question.rubric = Some(Rubric {
        min_words: Some(min_words),
        max_words: Some(max_words),
        ..Rubric::default()
    });
    question
}

pub fn listening_question(id: &str, max_plays: u32) -> Question {
    let mut question = base_question(id, Skill::Listening, QuestionType::Listening);
    question.audio_url = Some(format!("https://cdn.test/{}.mp3", id));
    question.script = Some("The train leaves at nine.".to_string());
    question.max_plays = Some(max_plays);
    question.options = ["nine", "ten"]
        .iter()
        .map(|v| QuestionOption {
            label: v.to_string(),
            value: v.to_string(),
        })
        .collect();
    question
}

/// A listening item whose audio only arrives through pre-synthesis.
pub fn unvoiced_listening_question(id: &str) -> Question {
    let mut question = listening_question(id, 2);
    question.audio_url = None;
    question.script = None;
    question
}

pub fn speaking_question(id: &str) -> Question {
    base_question(id, Skill::Speaking, QuestionType::Speaking)
}

pub fn words(n: usize) -> String {
    vec!["word"; n].join(" ")
}

/// Scripted gateway. Questions are served in order, then `Complete`.
pub struct FakeGateway {
    section: Mutex<Result<Section, GatewayError>>,
    questions: Mutex<VecDeque<Question>>,
    answer_key: Mutex<HashMap<String, String>>,
    submit_failures: Mutex<VecDeque<GatewayError>>,
    auto_complete_on: Mutex<Option<String>>,
    gate: Mutex<Option<Arc<Notify>>>,
    tts_reply: Mutex<Result<TtsAudio, GatewayError>>,
    tts_gate: Mutex<Option<Arc<Notify>>>,
    completion_failure: Mutex<Option<GatewayError>>,
    pub answers: Mutex<Vec<(String, String)>>,
    pub essays: Mutex<Vec<(String, String)>>,
    pub uploads: Mutex<Vec<usize>>,
    pub speaking: Mutex<Vec<(String, String, u32)>>,
    pub completions: AtomicUsize,
    pub tts_lookups: AtomicUsize,
}

impl FakeGateway {
    pub fn new(section: Section, questions: Vec<Question>) -> Self {
        Self {
            section: Mutex::new(Ok(section)),
            questions: Mutex::new(questions.into()),
            answer_key: Mutex::new(HashMap::new()),
            submit_failures: Mutex::new(VecDeque::new()),
            auto_complete_on: Mutex::new(None),
            gate: Mutex::new(None),
            tts_reply: Mutex::new(Ok(TtsAudio::default())),
            tts_gate: Mutex::new(None),
            completion_failure: Mutex::new(None),
            answers: Mutex::new(Vec::new()),
            essays: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            speaking: Mutex::new(Vec::new()),
            completions: AtomicUsize::new(0),
            tts_lookups: AtomicUsize::new(0),
        }
    }

    pub fn failing_start(error: GatewayError) -> Self {
        let gateway = Self::new(section(Skill::Reading, 600), Vec::new());
        *gateway.section.lock().unwrap() = Err(error);
        gateway
    }

    pub fn with_answer(self, question_id: &str, correct: &str) -> Self {
        self.answer_key
            .lock()
            .unwrap()
            .insert(question_id.to_string(), correct.to_string());
        self
    }

    pub fn fail_next_submission(&self, error: GatewayError) {
        self.submit_failures.lock().unwrap().push_back(error);
    }

    pub fn auto_complete_on(self, question_id: &str) -> Self {
        *self.auto_complete_on.lock().unwrap() = Some(question_id.to_string());
        self
    }

    /// Hold scored submissions until the returned gate is notified.
    pub fn hold_submissions(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn with_tts(self, reply: Result<TtsAudio, GatewayError>) -> Self {
        *self.tts_reply.lock().unwrap() = reply;
        self
    }

    /// Hold pre-synthesis lookups until the returned gate is notified.
    pub fn hold_tts(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.tts_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Every completion call fails with `error`.
    pub fn failing_completion(self, error: GatewayError) -> Self {
        *self.completion_failure.lock().unwrap() = Some(error);
        self
    }

    pub fn tts_lookups(&self) -> usize {
        self.tts_lookups.load(Ordering::SeqCst)
    }

    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> Option<GatewayError> {
        self.submit_failures.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl SubmissionGateway for FakeGateway {
    async fn start_section(&self, _section: &SectionRef) -> Result<Section, GatewayError> {
        self.section.lock().unwrap().clone()
    }

    async fn get_next_question(&self, _section: &SectionRef) -> Result<NextQuestion, GatewayError> {
        let next = self.questions.lock().unwrap().pop_front();
        Ok(match next {
            Some(question) => NextQuestion::Question {
                question,
                progress: None,
            },
            None => NextQuestion::Complete,
        })
    }

    async fn submit_answer(
        &self,
        _section: &SectionRef,
        question_id: &str,
        answer: &str,
    ) -> Result<AnswerVerdict, GatewayError> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        self.answers
            .lock()
            .unwrap()
            .push((question_id.to_string(), answer.to_string()));

        let correct = self.answer_key.lock().unwrap().get(question_id).cloned();
        let is_correct = correct.as_deref() == Some(answer);
        let should_auto_complete =
            self.auto_complete_on.lock().unwrap().as_deref() == Some(question_id);
        Ok(AnswerVerdict {
            is_correct,
            correct_answer: if is_correct { None } else { correct },
            should_auto_complete,
            expired: false,
        })
    }

    async fn submit_writing(
        &self,
        _section: &SectionRef,
        question_id: &str,
        text: &str,
    ) -> Result<(), GatewayError> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        self.essays
            .lock()
            .unwrap()
            .push((question_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn upload_audio(&self, blob: &RecordingBlob) -> Result<UploadedAudio, GatewayError> {
        self.uploads.lock().unwrap().push(blob.len());
        Ok(UploadedAudio {
            audio_url: "https://cdn.test/answer.webm".to_string(),
        })
    }

    async fn submit_speaking(
        &self,
        _section: &SectionRef,
        question_id: &str,
        audio_url: &str,
        duration_secs: u32,
    ) -> Result<(), GatewayError> {
        self.speaking.lock().unwrap().push((
            question_id.to_string(),
            audio_url.to_string(),
            duration_secs,
        ));
        Ok(())
    }

    async fn complete_section(&self, _section: &SectionRef) -> Result<(), GatewayError> {
        self.completions.fetch_add(1, Ordering::SeqCst);
        match self.completion_failure.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn get_tts_audio(&self, _question_id: &str) -> Result<TtsAudio, GatewayError> {
        self.tts_lookups.fetch_add(1, Ordering::SeqCst);
        let gate = self.tts_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.tts_reply.lock().unwrap().clone()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum MicMode {
    Grant,
    Deny,
}

pub struct FakeMicrophone {
    mode: MicMode,
    pub live: Arc<AtomicUsize>,
    pub acquisitions: AtomicUsize,
}

impl FakeMicrophone {
    pub fn new(mode: MicMode) -> Self {
        Self {
            mode,
            live: Arc::new(AtomicUsize::new(0)),
            acquisitions: AtomicUsize::new(0),
        }
    }

    pub fn live_streams(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

struct FakeStream {
    chunks: SharedChunks,
    live: Arc<AtomicUsize>,
    released: bool,
}

impl InputStream for FakeStream {
    fn begin(&mut self, _format: Option<&AudioFormat>, slice: Duration) -> Result<(), CaptureError> {
        let mut guard = self.chunks.lock().unwrap();
        guard.configure(16000, 1, slice);
        guard.push_chunk(vec![1, 2, 3, 4]);
        Ok(())
    }

    fn chunks(&self) -> SharedChunks {
        self.chunks.clone()
    }

    fn info(&self) -> StreamInfo {
        StreamInfo {
            sample_rate: 16000,
            channels: 1,
        }
    }

    fn level(&self) -> f32 {
        0.3
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_live(&self) -> bool {
        !self.released
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl Microphone for FakeMicrophone {
    async fn acquire(&self, _hints: CaptureHints) -> Result<Box<dyn InputStream>, CaptureError> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            MicMode::Deny => Err(CaptureError::PermissionDenied),
            MicMode::Grant => {
                self.live.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(FakeStream {
                    chunks: Arc::new(Mutex::new(ChunkBuffer::new(16000, 1))),
                    live: self.live.clone(),
                    released: false,
                }))
            }
        }
    }

    fn supports_format(&self, format: &AudioFormat) -> bool {
        format.mime() == "audio/webm"
    }

    fn name(&self) -> &str {
        "fake microphone"
    }
}

/// Output whose plays end immediately.
#[derive(Default)]
pub struct InstantOutput {
    pub plays: AtomicUsize,
    pub urls: Mutex<Vec<String>>,
}

impl InstantOutput {
    pub fn played(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioOutput for InstantOutput {
    async fn play(&self, url: &str) -> Result<(), PlaybackError> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        Ok(())
    }

    fn name(&self) -> &str {
        "instant"
    }
}

/// Synthesizer whose utterances end immediately, keeping what it was asked
/// to say.
#[derive(Default)]
pub struct SilentSynthesizer {
    pub spoken: Mutex<Vec<(String, String)>>,
}

impl SilentSynthesizer {
    pub fn spoken(&self) -> Vec<(String, String)> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for SilentSynthesizer {
    fn is_available(&self) -> bool {
        true
    }

    async fn speak(&self, text: &str, locale: &str) -> Result<(), PlaybackError> {
        self.spoken
            .lock()
            .unwrap()
            .push((text.to_string(), locale.to_string()));
        Ok(())
    }
}

pub struct Harness {
    pub controller: SessionController,
    pub gateway: Arc<FakeGateway>,
    pub microphone: Arc<FakeMicrophone>,
    pub output: Arc<InstantOutput>,
    pub synthesizer: Arc<SilentSynthesizer>,
    pub handles: MediaHandles,
    pub clock: Clock,
}

pub fn settings() -> SessionSettings {
    SessionSettings {
        section: SectionRef::new("a1", "s1"),
        feedback_dwell: Duration::from_millis(1500),
        max_recording_attempts: 3,
        default_max_plays: 2,
        thresholds: Thresholds::default(),
        chunk_slice: Duration::from_secs(1),
        default_language: "en".to_string(),
        completion_retries: RuntimeConfig::default().completion_retries,
        tick_period: Duration::from_secs(1),
    }
}

pub fn harness(gateway: FakeGateway, mic: MicMode) -> Harness {
    let gateway = Arc::new(gateway);
    let microphone = Arc::new(FakeMicrophone::new(mic));
    let output = Arc::new(InstantOutput::default());
    let synthesizer = Arc::new(SilentSynthesizer::default());
    let handles = MediaHandles::new();
    let clock = Clock::manual(epoch());
    let controller = SessionController::new(
        SessionDeps {
            gateway: gateway.clone(),
            microphone: microphone.clone(),
            audio_output: Some(output.clone()),
            synthesizer: Some(synthesizer.clone()),
            clock: clock.clone(),
            handles: handles.clone(),
        },
        settings(),
    );
    Harness {
        controller,
        gateway,
        microphone,
        output,
        synthesizer,
        handles,
        clock,
    }
}

/// Feed events until `done` holds. Panics if the session settles first.
pub async fn step_until<F>(controller: &mut SessionController, done: F)
where
    F: Fn(&SessionController) -> bool,
{
    for _ in 0..1000 {
        if done(controller) {
            return;
        }
        if !controller.step().await {
            break;
        }
    }
    assert!(
        done(controller),
        "condition never held; phase {:?}",
        controller.phase()
    );
}

/// Drive until the completion call has come back.
pub async fn settle(controller: &mut SessionController) {
    for _ in 0..1000 {
        if !controller.step().await {
            return;
        }
    }
    panic!("session never settled; phase {:?}", controller.phase());
}
