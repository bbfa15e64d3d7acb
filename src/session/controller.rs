use super::events::{GatewayReply, SessionEvent, SubmitOutcome, UserAction};
use super::snapshot::SessionSnapshot;
use super::state::{CompletionReason, Feedback, SessionPhase};
use crate::audio::{AudioCaptureEngine, CaptureEvent, CaptureSettings, CaptureState, Microphone};
use crate::config::RuntimeConfig;
use crate::dispatch::{
    word_count, AnswerDraft, CaptureMode, DraftInputs, DraftRejected, QuestionDispatcher,
    Submission,
};
use crate::error::SessionError;
use crate::events::channel_sink;
use crate::gateway::{
    AnswerVerdict, GatewayError, NextQuestion, Progress, Question, RetryPolicy, Section,
    SectionRef, SectionStatus, SubmissionGateway,
};
use crate::media::MediaHandles;
use crate::playback::{
    AudioOutput, AudioPlaybackEngine, PlayRejected, PlaybackSource, SpeechSynthesizer,
};
use crate::timer::{Clock, Countdown, CountdownTimer, Thresholds, TimeLevel, TimerEvent};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Collaborators injected into a session.
pub struct SessionDeps {
    pub gateway: Arc<dyn SubmissionGateway>,
    pub microphone: Arc<dyn Microphone>,
    pub audio_output: Option<Arc<dyn AudioOutput>>,
    pub synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    pub clock: Clock,
    pub handles: MediaHandles,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub section: SectionRef,
    pub feedback_dwell: Duration,
    pub max_recording_attempts: u32,
    pub default_max_plays: u32,
    pub thresholds: Thresholds,
    pub chunk_slice: Duration,
    pub default_language: String,
    pub completion_retries: u8,
    pub tick_period: Duration,
}

impl From<&RuntimeConfig> for SessionSettings {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            section: SectionRef::new(config.assessment_id.clone(), config.section_id.clone()),
            feedback_dwell: config.feedback_dwell(),
            max_recording_attempts: config.max_recording_attempts,
            default_max_plays: config.default_max_plays,
            thresholds: Thresholds {
                warning_secs: config.warning_threshold_secs,
                critical_secs: config.critical_threshold_secs,
            },
            chunk_slice: config.chunk_slice(),
            default_language: config.default_language.clone(),
            completion_retries: config.completion_retries,
            tick_period: Duration::from_secs(1),
        }
    }
}

struct ActiveQuestion {
    question: Question,
    mode: CaptureMode,
    draft: AnswerDraft,
    capture: Option<AudioCaptureEngine>,
}

enum Input {
    Event(SessionEvent),
    Action(Option<UserAction>),
}

/// Drives one timed section: start, fetch, render, submit, feedback and
/// completion.
///
/// All state lives here and changes only on this task. Gateway calls, audio
/// work and timers run as spawned tasks that post a [`SessionEvent`] back;
/// [`step`](Self::step) or [`run`](Self::run) feed those events in. The
/// countdown can end the section at any point. A submission already in
/// flight is allowed to settle first, and its feedback is then dropped.
pub struct SessionController {
    gateway: Arc<dyn SubmissionGateway>,
    microphone: Arc<dyn Microphone>,
    clock: Clock,
    handles: MediaHandles,
    settings: SessionSettings,
    tx: mpsc::UnboundedSender<SessionEvent>,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
    snapshots: watch::Sender<SessionSnapshot>,
    phase: SessionPhase,
    started: bool,
    section: Option<Section>,
    countdown: Option<Countdown>,
    remaining_secs: Option<u64>,
    time_level: TimeLevel,
    current: Option<ActiveQuestion>,
    playback: AudioPlaybackEngine,
    progress: Option<Progress>,
    feedback: Option<Feedback>,
    complete_after_feedback: bool,
    notice: Option<String>,
    fatal: Option<SessionError>,
    submission_in_flight: bool,
    pending_completion: Option<CompletionReason>,
    completion_started: bool,
    completion_in_flight: bool,
    dwell: Option<JoinHandle<()>>,
    tts_pending: Option<String>,
    review_output: Option<Arc<dyn AudioOutput>>,
    review: Option<JoinHandle<()>>,
}

impl SessionController {
    pub fn new(deps: SessionDeps, settings: SessionSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let review_output = deps.audio_output.clone();
        let playback = AudioPlaybackEngine::new(
            deps.audio_output,
            deps.synthesizer,
            channel_sink(tx.clone(), SessionEvent::Playback),
        );
        let (snapshots, _) = watch::channel(SessionSnapshot::initial(&settings.section.section_id));

        Self {
            gateway: deps.gateway,
            microphone: deps.microphone,
            clock: deps.clock,
            handles: deps.handles,
            settings,
            tx,
            rx,
            snapshots,
            phase: SessionPhase::Loading,
            started: false,
            section: None,
            countdown: None,
            remaining_secs: None,
            time_level: TimeLevel::Normal,
            current: None,
            playback,
            progress: None,
            feedback: None,
            complete_after_feedback: false,
            notice: None,
            fatal: None,
            submission_in_flight: false,
            pending_completion: None,
            completion_started: false,
            completion_in_flight: false,
            dwell: None,
            tts_pending: None,
            review_output,
            review: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn completion_reason(&self) -> Option<CompletionReason> {
        match self.phase {
            SessionPhase::Complete(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn section(&self) -> Option<&Section> {
        self.section.as_ref()
    }

    /// The failure that put the session into `Error`, if any.
    pub fn fatal_error(&self) -> Option<&SessionError> {
        self.fatal.as_ref()
    }

    /// Complete and the completion call has come back.
    pub fn is_settled(&self) -> bool {
        self.phase.is_complete() && !self.completion_in_flight
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn start(&mut self) {
        if self.started {
            debug!("Section already started");
            return;
        }
        self.started = true;

        let gateway = self.gateway.clone();
        let section = self.settings.section.clone();
        info!(
            "Starting section {}/{} via {}",
            section.assessment_id,
            section.section_id,
            gateway.name()
        );
        self.spawn_reply(async move {
            GatewayReply::SectionStarted(gateway.start_section(&section).await)
        });
        self.publish();
    }

    /// Apply one user action. Rejections leave the session unchanged.
    pub fn act(&mut self, action: UserAction) -> Result<(), SessionError> {
        debug!("User action: {}", action_label(&action));
        let result = self.apply(action);
        self.publish();
        result
    }

    /// End the section on the candidate's request. Safe to call repeatedly.
    pub fn finish(&mut self) {
        if self.completion_started {
            debug!("Finish ignored, section already complete");
            return;
        }
        info!("Candidate finished the section");
        self.request_completion(CompletionReason::Finished);
        self.publish();
    }

    /// Wait for and apply the next internal event. Returns false once the
    /// session has settled.
    pub async fn step(&mut self) -> bool {
        if self.is_settled() {
            return false;
        }
        if let Some(event) = self.rx.recv().await {
            self.handle(event);
        }
        !self.is_settled()
    }

    /// Drive the section to completion, taking user actions from `actions`.
    /// A closed action channel finishes the section.
    pub async fn run(&mut self, mut actions: mpsc::Receiver<UserAction>) -> CompletionReason {
        self.start();
        let mut actions_open = true;

        while !self.is_settled() {
            let input = tokio::select! {
                Some(event) = self.rx.recv() => Input::Event(event),
                action = actions.recv(), if actions_open => Input::Action(action),
            };
            match input {
                Input::Event(event) => self.handle(event),
                Input::Action(Some(action)) => {
                    if let Err(e) = self.act(action) {
                        debug!("Action rejected: {}", e);
                        self.notice = Some(e.user_message());
                        self.publish();
                    }
                }
                Input::Action(None) => {
                    info!("Input closed, finishing section");
                    actions_open = false;
                    self.finish();
                }
            }
        }

        self.completion_reason().unwrap_or(CompletionReason::Finished)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let current = self.current.as_ref();
        let listening = current
            .map(|c| QuestionDispatcher::requires_playback(&c.question))
            .unwrap_or(false);

        let (can_submit, submit_blocker) = match current {
            Some(c) if self.phase == SessionPhase::Active && !self.submission_in_flight => {
                match self.normalize(c) {
                    Ok(_) => (true, None),
                    Err(reason) => (false, Some(reason.to_string())),
                }
            }
            _ => (false, None),
        };

        SessionSnapshot {
            phase: self.phase,
            section_id: self.settings.section.section_id.clone(),
            skill: self.section.as_ref().map(|s| s.skill),
            question: current.map(|c| {
                let mut question = c.question.clone();
                if listening {
                    question.script = None;
                }
                question
            }),
            capture_mode: current.map(|c| c.mode),
            draft: current.map(|c| c.draft.clone()),
            word_count: current.map(|c| word_count(&c.draft.text)).unwrap_or(0),
            can_submit,
            submit_blocker,
            remaining_secs: self.remaining_secs,
            time_level: self.time_level,
            feedback: self.feedback.clone(),
            progress: self.progress.clone(),
            capture: current.and_then(|c| c.capture.as_ref()).map(|c| c.view()),
            playback: listening.then(|| self.playback.view()),
            notice: self.notice.clone(),
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.snapshot());
    }

    fn spawn_reply<F>(&self, call: F)
    where
        F: Future<Output = GatewayReply> + Send + 'static,
    {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let reply = call.await;
            if tx.send(SessionEvent::Gateway(reply)).is_err() {
                debug!("Gateway reply dropped: session gone");
            }
        });
    }

    fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Timer(event) => self.on_timer(event),
            SessionEvent::Capture(event) => self.on_capture(event),
            SessionEvent::Playback(event) => {
                if let Some(e) = self.playback.handle(event) {
                    self.notice = Some(SessionError::from(e).user_message());
                }
            }
            SessionEvent::Gateway(reply) => self.on_gateway(reply),
            SessionEvent::DwellElapsed { question_id } => self.on_dwell_elapsed(question_id),
            SessionEvent::ReviewEnded(result) => {
                self.review = None;
                if let Err(e) = result {
                    warn!("Recording playback failed: {}", e);
                    self.notice = Some(SessionError::from(e).user_message());
                }
            }
        }
        self.publish();
    }

    fn on_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::Tick {
                remaining_secs,
                level,
            } => {
                self.remaining_secs = Some(remaining_secs);
                self.time_level = level;
            }
            TimerEvent::Expired => {
                self.remaining_secs = Some(0);
                self.time_level = TimeLevel::Expired;
                self.request_completion(CompletionReason::Expired);
            }
        }
    }

    fn on_capture(&mut self, event: CaptureEvent) {
        match self.current.as_mut().and_then(|c| c.capture.as_mut()) {
            Some(capture) => capture.handle(event),
            None => {
                if let CaptureEvent::Acquired {
                    result: Ok(mut stream),
                    ..
                } = event
                {
                    debug!("Releasing stream acquired after its question ended");
                    stream.release();
                }
            }
        }
    }

    fn on_gateway(&mut self, reply: GatewayReply) {
        match reply {
            GatewayReply::SectionStarted(result) => self.on_section_started(result),
            GatewayReply::NextQuestion(result) => self.on_next_question(result),
            GatewayReply::Submitted {
                question_id,
                outcome,
            } => self.on_submitted(question_id, outcome),
            GatewayReply::TtsAudio {
                question_id,
                result,
            } => {
                if self.tts_pending.as_deref() == Some(question_id.as_str()) {
                    self.tts_pending = None;
                }
                match result {
                    Ok(tts) => {
                        debug!(
                            "Pre-synthesis for {}: audio={}, script={}",
                            question_id,
                            tts.audio_url.is_some(),
                            tts.tts_script.is_some()
                        );
                        self.playback
                            .supplement(&question_id, tts.audio_url, tts.tts_script);
                    }
                    Err(e) => warn!("Pre-synthesis lookup for {} failed: {}", question_id, e),
                }
            }
            GatewayReply::Completed(result) => {
                self.completion_in_flight = false;
                match result {
                    Ok(()) => info!("Section completion acknowledged"),
                    Err(e) => error!("Section completion call failed: {}", e),
                }
            }
        }
    }

    fn on_section_started(&mut self, result: Result<Section, GatewayError>) {
        if self.phase.is_complete() {
            debug!("Section start settled after completion");
            return;
        }
        let section = match result {
            Ok(section) => section,
            Err(e) => {
                self.fail(e.into());
                return;
            }
        };

        info!(
            "Section {} started: skill={:?}, expires_at={}",
            section.id, section.skill, section.expires_at
        );
        let timer = CountdownTimer::new(section.expires_at, self.settings.thresholds);
        let remaining = timer.remaining_secs(self.clock.now());
        self.remaining_secs = Some(remaining);
        self.time_level = self.settings.thresholds.level(remaining);
        self.countdown = Some(Countdown::start(
            timer,
            self.clock.clone(),
            self.settings.tick_period,
            channel_sink(self.tx.clone(), SessionEvent::Timer),
        ));

        let status = section.status;
        self.section = Some(section);
        match status {
            SectionStatus::Completed => self.complete(CompletionReason::Finished),
            SectionStatus::Expired => self.complete(CompletionReason::Expired),
            _ => self.request_next_question(),
        }
    }

    fn request_next_question(&mut self) {
        self.phase = SessionPhase::Loading;
        let gateway = self.gateway.clone();
        let section = self.settings.section.clone();
        self.spawn_reply(async move {
            GatewayReply::NextQuestion(gateway.get_next_question(&section).await)
        });
    }

    fn on_next_question(&mut self, result: Result<NextQuestion, GatewayError>) {
        if self.phase != SessionPhase::Loading {
            debug!("Discarding question fetched in phase {:?}", self.phase);
            return;
        }
        match result {
            Ok(NextQuestion::Complete) => {
                info!("Gateway reports no more questions");
                self.complete(CompletionReason::Exhausted);
            }
            Ok(NextQuestion::Question { question, progress }) => {
                if progress.is_some() {
                    self.progress = progress;
                }
                self.install(question);
            }
            Err(e) => self.fail(e.into()),
        }
    }

    fn install(&mut self, question: Question) {
        self.release_question();

        let mode = QuestionDispatcher::capture_mode(&question);
        info!(
            "Question {} ready: {:?}/{:?} as {:?}",
            question.id, question.skill, question.question_type, mode
        );
        let capture = QuestionDispatcher::requires_capture(&question)
            .then(|| self.capture_engine(&question));
        if QuestionDispatcher::requires_playback(&question) {
            self.load_playback(&question);
        }

        self.current = Some(ActiveQuestion {
            question,
            mode,
            draft: AnswerDraft::default(),
            capture,
        });
        self.feedback = None;
        self.notice = None;
        self.phase = SessionPhase::Active;
    }

    fn capture_engine(&self, question: &Question) -> AudioCaptureEngine {
        let rubric = question.rubric();
        let settings = CaptureSettings {
            max_attempts: rubric
                .max_attempts
                .unwrap_or(self.settings.max_recording_attempts),
            slice: self.settings.chunk_slice,
            max_duration_secs: rubric.max_duration_seconds,
            ..CaptureSettings::default()
        };
        AudioCaptureEngine::new(
            self.microphone.clone(),
            self.handles.clone(),
            settings,
            channel_sink(self.tx.clone(), SessionEvent::Capture),
        )
    }

    fn load_playback(&mut self, question: &Question) {
        let language = question
            .language
            .clone()
            .unwrap_or_else(|| self.settings.default_language.clone());
        self.playback.load(PlaybackSource {
            question_id: question.id.clone(),
            audio_url: question.audio_url.clone(),
            script: question.script.clone(),
            language: Some(language),
            max_plays: question.max_plays.unwrap_or(self.settings.default_max_plays),
        });

        if question.audio_url.is_some() {
            return;
        }
        let gateway = self.gateway.clone();
        let question_id = question.id.clone();
        self.tts_pending = Some(question_id.clone());
        let policy = RetryPolicy::new(1);
        self.spawn_reply(async move {
            let result = {
                let gateway = &gateway;
                let id = &question_id;
                policy
                    .run("getTtsAudio", move || gateway.get_tts_audio(id))
                    .await
            };
            GatewayReply::TtsAudio {
                question_id,
                result,
            }
        });
    }

    fn release_question(&mut self) {
        if let Some(mut current) = self.current.take() {
            if let Some(capture) = current.capture.as_mut() {
                capture.teardown();
            }
        }
        self.abort_review();
        self.tts_pending = None;
        self.playback.teardown();
    }

    fn apply(&mut self, action: UserAction) -> Result<(), SessionError> {
        match action {
            UserAction::Finish => {
                self.finish();
                return Ok(());
            }
            UserAction::DismissNotice => {
                self.notice = None;
                return Ok(());
            }
            _ => {}
        }
        if self.phase.is_complete() {
            return Err(SessionError::SectionComplete);
        }

        match action {
            UserAction::Submit => self.submit(),
            UserAction::Select(value) => {
                let current = self.editable()?;
                if current.mode != CaptureMode::SingleChoice {
                    return Err(SessionError::InvalidState("this question has no options"));
                }
                current.draft.selected = Some(value);
                Ok(())
            }
            UserAction::EditText(text) => {
                let current = self.editable()?;
                if !matches!(
                    current.mode,
                    CaptureMode::FreeText | CaptureMode::Dictation | CaptureMode::Essay { .. }
                ) {
                    return Err(SessionError::InvalidState("this question takes no text"));
                }
                current.draft.text = text;
                Ok(())
            }
            UserAction::PlayAudio => self.play_audio(),
            UserAction::StopAudio => {
                self.playback.stop();
                Ok(())
            }
            UserAction::StartRecording => {
                let capture = self.capture()?;
                if !capture.start() {
                    debug!("Recording not started in state {:?}", capture.state());
                }
                Ok(())
            }
            UserAction::StopRecording => {
                let capture = self.capture()?;
                capture.stop().map_err(SessionError::from)
            }
            UserAction::ResetRecording => {
                let capture = self.capture()?;
                if matches!(capture.state(), CaptureState::Error(_)) {
                    capture.dismiss_error();
                    Ok(())
                } else if capture.reset() {
                    Ok(())
                } else {
                    Err(SessionError::InvalidState("there is no recording to discard"))
                }
            }
            UserAction::ReviewRecording => self.review_recording(),
            UserAction::Finish | UserAction::DismissNotice => Ok(()),
        }
    }

    fn blocked(&self) -> SessionError {
        match self.phase {
            SessionPhase::Submitting => SessionError::SubmissionInFlight,
            SessionPhase::Complete(_) => SessionError::SectionComplete,
            SessionPhase::Error => SessionError::InvalidState("the section stopped after an error"),
            SessionPhase::Feedback => SessionError::InvalidState("the answer was already scored"),
            _ => SessionError::InvalidState("no question is active"),
        }
    }

    fn editable(&mut self) -> Result<&mut ActiveQuestion, SessionError> {
        if self.phase != SessionPhase::Active {
            return Err(self.blocked());
        }
        self.current
            .as_mut()
            .ok_or(SessionError::InvalidState("no question is active"))
    }

    fn capture(&mut self) -> Result<&mut AudioCaptureEngine, SessionError> {
        self.editable()?
            .capture
            .as_mut()
            .ok_or(SessionError::InvalidState("this question is not answered by recording"))
    }

    fn play_audio(&mut self) -> Result<(), SessionError> {
        let current = self.editable()?;
        if !QuestionDispatcher::requires_playback(&current.question) {
            return Err(SessionError::InvalidState("this question has no audio"));
        }
        match self.playback.play() {
            Ok(()) => Ok(()),
            Err(PlayRejected::Exhausted) | Err(PlayRejected::AlreadyPlaying) => {
                debug!("Play ignored: {} plays remaining", self.playback.plays_remaining());
                Ok(())
            }
            Err(PlayRejected::Unavailable) => Err(SessionError::PlaybackUnavailable),
            Err(PlayRejected::NotLoaded) => Err(SessionError::InvalidState("audio is not loaded")),
        }
    }

    fn review_recording(&mut self) -> Result<(), SessionError> {
        let handle = self
            .capture()?
            .view()
            .playback_handle
            .ok_or(SessionError::InvalidState("there is no recording to play back"))?;
        let output = self
            .review_output
            .clone()
            .ok_or(SessionError::PlaybackUnavailable)?;
        let url = self
            .handles
            .data_url(&handle)
            .ok_or(SessionError::InvalidState("the recording is no longer available"))?;

        self.abort_review();
        info!("Playing back recording {} via {}", handle, output.name());
        let tx = self.tx.clone();
        self.review = Some(tokio::spawn(async move {
            let result = output.play(&url).await;
            let _ = tx.send(SessionEvent::ReviewEnded(result));
        }));
        Ok(())
    }

    fn abort_review(&mut self) {
        if let Some(task) = self.review.take() {
            task.abort();
        }
    }

    /// Audio that cannot be played does not gate submission, unless the
    /// pre-synthesis lookup may still make it playable.
    fn listened(&self) -> bool {
        if self.playback.state().play_count > 0 {
            return true;
        }
        self.tts_pending.is_none() && !self.playback.is_available()
    }

    fn normalize(&self, current: &ActiveQuestion) -> Result<Submission, DraftRejected> {
        QuestionDispatcher::normalize(
            &current.question,
            DraftInputs {
                draft: &current.draft,
                recording: current.capture.as_ref().and_then(|c| c.recording()),
                listened: self.listened(),
            },
        )
    }

    fn submit(&mut self) -> Result<(), SessionError> {
        if self.submission_in_flight {
            return Err(SessionError::SubmissionInFlight);
        }
        if self.countdown.as_ref().map(Countdown::has_fired).unwrap_or(false) {
            self.request_completion(CompletionReason::Expired);
            return Err(SessionError::SectionExpired);
        }
        if self.phase != SessionPhase::Active {
            return Err(self.blocked());
        }
        let current = self
            .current
            .as_ref()
            .ok_or(SessionError::InvalidState("no question is active"))?;
        let submission = self.normalize(current)?;
        let question_id = current.question.id.clone();

        self.playback.stop();
        self.submission_in_flight = true;
        self.phase = SessionPhase::Submitting;
        self.notice = None;
        info!(
            "Submitting question {} ({})",
            question_id,
            submission_label(&submission)
        );

        let gateway = self.gateway.clone();
        let section = self.settings.section.clone();
        self.spawn_reply(async move {
            let outcome = send_submission(gateway.as_ref(), &section, &question_id, submission).await;
            GatewayReply::Submitted {
                question_id,
                outcome,
            }
        });
        Ok(())
    }

    fn on_submitted(&mut self, question_id: String, outcome: Result<SubmitOutcome, GatewayError>) {
        self.submission_in_flight = false;

        if let Some(reason) = self.pending_completion.take() {
            match &outcome {
                Ok(SubmitOutcome::Scored(_)) => {
                    debug!("Discarding feedback for {}: section already ended", question_id)
                }
                Ok(SubmitOutcome::Acknowledged) => {}
                Err(e) => warn!("Submission for {} failed as the section ended: {}", question_id, e),
            }
            self.complete(reason);
            return;
        }
        if self.phase.is_complete() {
            return;
        }
        let is_current = self
            .current
            .as_ref()
            .map(|c| c.question.id == question_id)
            .unwrap_or(false);
        if !is_current {
            warn!("Submission result for question {} is not current", question_id);
            return;
        }

        match outcome {
            Ok(SubmitOutcome::Scored(verdict)) => self.show_feedback(question_id, verdict),
            Ok(SubmitOutcome::Acknowledged) => {
                info!("Question {} acknowledged", question_id);
                if let Some(capture) = self.current.as_mut().and_then(|c| c.capture.as_mut()) {
                    capture.take_recording();
                }
                self.release_question();
                self.request_next_question();
            }
            Err(GatewayError::SectionClosed) => {
                info!("Gateway reports the section closed");
                self.complete(CompletionReason::Expired);
            }
            Err(e) => {
                warn!("Submission for {} failed: {}", question_id, e);
                self.phase = SessionPhase::Active;
                self.notice = Some(SessionError::SubmissionFailure(e).user_message());
            }
        }
    }

    fn show_feedback(&mut self, question_id: String, verdict: AnswerVerdict) {
        if verdict.expired {
            info!("Gateway reports the section expired");
            self.complete(CompletionReason::Expired);
            return;
        }
        info!("Question {} scored: correct={}", question_id, verdict.is_correct);
        self.feedback = Some(Feedback {
            is_correct: verdict.is_correct,
            correct_answer: verdict.correct_answer,
        });
        self.complete_after_feedback = verdict.should_auto_complete;
        self.phase = SessionPhase::Feedback;

        self.abort_dwell();
        let tx = self.tx.clone();
        let dwell = self.settings.feedback_dwell;
        self.dwell = Some(tokio::spawn(async move {
            tokio::time::sleep(dwell).await;
            let _ = tx.send(SessionEvent::DwellElapsed { question_id });
        }));
    }

    fn on_dwell_elapsed(&mut self, question_id: String) {
        self.dwell = None;
        let is_current = self
            .current
            .as_ref()
            .map(|c| c.question.id == question_id)
            .unwrap_or(false);
        if self.phase != SessionPhase::Feedback || !is_current {
            return;
        }
        self.feedback = None;
        if std::mem::take(&mut self.complete_after_feedback) {
            self.complete(CompletionReason::AutoCompleted);
        } else {
            self.release_question();
            self.request_next_question();
        }
    }

    fn abort_dwell(&mut self) {
        if let Some(task) = self.dwell.take() {
            task.abort();
        }
    }

    /// Complete now, or once the in-flight submission settles. Expiry wins
    /// over any other pending reason.
    fn request_completion(&mut self, reason: CompletionReason) {
        if self.completion_started {
            debug!("Completion already under way, {:?} ignored", reason);
            return;
        }
        if self.submission_in_flight {
            let reason = match self.pending_completion {
                Some(CompletionReason::Expired) => CompletionReason::Expired,
                _ => reason,
            };
            info!("Completion ({:?}) deferred until the submission settles", reason);
            self.pending_completion = Some(reason);
            return;
        }
        self.complete(reason);
    }

    fn complete(&mut self, reason: CompletionReason) {
        if self.completion_started {
            return;
        }
        self.completion_started = true;
        self.pending_completion = None;
        self.phase = SessionPhase::Complete(reason);
        self.feedback = None;
        self.complete_after_feedback = false;
        self.abort_dwell();
        self.release_question();
        self.countdown = None;
        if reason == CompletionReason::Expired {
            self.remaining_secs = Some(0);
            self.time_level = TimeLevel::Expired;
            self.notice = Some(SessionError::SectionExpired.user_message());
        }
        info!("Section complete: {:?}", reason);

        self.completion_in_flight = true;
        let gateway = self.gateway.clone();
        let section = self.settings.section.clone();
        let policy = RetryPolicy::new(self.settings.completion_retries);
        self.spawn_reply(async move {
            let result = {
                let gateway = &gateway;
                let section = &section;
                policy
                    .run("completeSection", move || gateway.complete_section(section))
                    .await
            };
            GatewayReply::Completed(result)
        });
    }

    fn fail(&mut self, error: SessionError) {
        if error == SessionError::SectionExpired {
            self.request_completion(CompletionReason::Expired);
            return;
        }
        error!("Section stopped: {}", error);
        self.abort_dwell();
        self.release_question();
        self.feedback = None;
        self.notice = Some(error.user_message());
        self.fatal = Some(error);
        self.phase = SessionPhase::Error;
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.abort_dwell();
        self.release_question();
    }
}

async fn send_submission(
    gateway: &dyn SubmissionGateway,
    section: &SectionRef,
    question_id: &str,
    submission: Submission,
) -> Result<SubmitOutcome, GatewayError> {
    match submission {
        Submission::Choice(answer) | Submission::ShortText(answer) => gateway
            .submit_answer(section, question_id, &answer)
            .await
            .map(SubmitOutcome::Scored),
        Submission::Essay(text) => {
            gateway.submit_writing(section, question_id, &text).await?;
            Ok(SubmitOutcome::Acknowledged)
        }
        Submission::Audio(recording) => {
            let uploaded = gateway.upload_audio(&recording.blob).await?;
            gateway
                .submit_speaking(
                    section,
                    question_id,
                    &uploaded.audio_url,
                    recording.duration_secs,
                )
                .await?;
            Ok(SubmitOutcome::Acknowledged)
        }
    }
}

fn submission_label(submission: &Submission) -> String {
    match submission {
        Submission::Choice(_) => "choice".to_string(),
        Submission::ShortText(text) => format!("text, {} chars", text.chars().count()),
        Submission::Essay(text) => format!("essay, {} words", word_count(text)),
        Submission::Audio(recording) => format!(
            "audio, {}s, {} bytes",
            recording.duration_secs,
            recording.blob.len()
        ),
    }
}

fn action_label(action: &UserAction) -> &'static str {
    match action {
        UserAction::Select(_) => "select",
        UserAction::EditText(_) => "edit-text",
        UserAction::PlayAudio => "play",
        UserAction::StopAudio => "stop-audio",
        UserAction::StartRecording => "start-recording",
        UserAction::StopRecording => "stop-recording",
        UserAction::ResetRecording => "reset-recording",
        UserAction::ReviewRecording => "review-recording",
        UserAction::DismissNotice => "dismiss",
        UserAction::Submit => "submit",
        UserAction::Finish => "finish",
    }
}
