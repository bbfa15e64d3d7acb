use super::device::{InputStream, Microphone};
use super::format::{finalize_chunks, negotiate_format, AudioFormat};
use super::types::{
    CaptureError, CaptureHints, CaptureStatus, CaptureView, Recording,
};
use crate::events::EventSink;
use crate::media::MediaHandles;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

static NEXT_TICKET: AtomicU64 = AtomicU64::new(1);

fn next_ticket() -> u64 {
    NEXT_TICKET.fetch_add(1, Ordering::Relaxed)
}

/// Inputs delivered back to the engine from its own background work.
pub enum CaptureEvent {
    Acquired {
        ticket: u64,
        result: Result<Box<dyn InputStream>, CaptureError>,
    },
    Elapsed {
        ticket: u64,
        seconds: u32,
    },
}

impl fmt::Debug for CaptureEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureEvent::Acquired { ticket, result } => f
                .debug_struct("Acquired")
                .field("ticket", ticket)
                .field("ok", &result.is_ok())
                .finish(),
            CaptureEvent::Elapsed { ticket, seconds } => f
                .debug_struct("Elapsed")
                .field("ticket", ticket)
                .field("seconds", seconds)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub max_attempts: u32,
    pub slice: Duration,
    pub max_duration_secs: Option<u32>,
    pub hints: CaptureHints,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            slice: Duration::from_secs(1),
            max_duration_secs: None,
            hints: CaptureHints::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    RequestingPermission,
    Recording,
    Stopped,
    Submitted,
    Error(CaptureError),
}

/// Recording lifecycle for one speaking question.
///
/// Idle -> RequestingPermission -> Recording -> Stopped -> (Idle | Submitted).
/// The device stream is held only while `Recording`; dropping the engine
/// releases the stream, aborts its timers and revokes the playable handle.
pub struct AudioCaptureEngine {
    microphone: Arc<dyn Microphone>,
    handles: MediaHandles,
    events: EventSink<CaptureEvent>,
    settings: CaptureSettings,
    state: CaptureState,
    remaining_attempts: u32,
    recordings_made: u32,
    ticket: u64,
    stream: Option<Box<dyn InputStream>>,
    format: Option<AudioFormat>,
    started_at: Option<Instant>,
    elapsed_secs: u32,
    acquire_task: Option<JoinHandle<()>>,
    ticker: Option<JoinHandle<()>>,
    recording: Option<Recording>,
}

impl AudioCaptureEngine {
    pub fn new(
        microphone: Arc<dyn Microphone>,
        handles: MediaHandles,
        settings: CaptureSettings,
        events: EventSink<CaptureEvent>,
    ) -> Self {
        let max_attempts = settings.max_attempts.max(1);
        Self {
            microphone,
            handles,
            events,
            settings: CaptureSettings {
                max_attempts,
                ..settings
            },
            state: CaptureState::Idle,
            remaining_attempts: max_attempts,
            recordings_made: 0,
            ticket: 0,
            stream: None,
            format: None,
            started_at: None,
            elapsed_secs: 0,
            acquire_task: None,
            ticker: None,
            recording: None,
        }
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    pub fn remaining_attempts(&self) -> u32 {
        self.remaining_attempts
    }

    pub fn recordings_made(&self) -> u32 {
        self.recordings_made
    }

    pub fn recording(&self) -> Option<&Recording> {
        self.recording.as_ref()
    }

    pub fn is_holding_device(&self) -> bool {
        self.stream.is_some()
    }

    pub fn can_start(&self) -> bool {
        self.remaining_attempts > 0
            && matches!(self.state, CaptureState::Idle | CaptureState::Error(_))
    }

    /// Ask for the microphone. Returns false, doing nothing, once attempts are
    /// exhausted or while another recording is in progress.
    pub fn start(&mut self) -> bool {
        if self.remaining_attempts == 0 {
            debug!("Recording attempts exhausted, start ignored");
            return false;
        }
        if !self.can_start() {
            debug!("Start ignored in state {:?}", self.state);
            return false;
        }

        self.ticket = next_ticket();
        self.state = CaptureState::RequestingPermission;

        let ticket = self.ticket;
        let microphone = self.microphone.clone();
        let hints = self.settings.hints;
        let events = self.events.clone();
        info!(
            "Requesting microphone '{}' (attempt {}/{})",
            microphone.name(),
            self.recordings_made + 1,
            self.settings.max_attempts
        );
        self.acquire_task = Some(tokio::spawn(async move {
            let result = microphone.acquire(hints).await;
            events(CaptureEvent::Acquired { ticket, result });
        }));
        true
    }

    /// Feed back an event produced by this engine's background work.
    pub fn handle(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Acquired { ticket, result } => self.on_acquired(ticket, result),
            CaptureEvent::Elapsed { ticket, seconds } => self.on_elapsed(ticket, seconds),
        }
    }

    fn on_acquired(&mut self, ticket: u64, result: Result<Box<dyn InputStream>, CaptureError>) {
        self.acquire_task = None;
        if ticket != self.ticket || self.state != CaptureState::RequestingPermission {
            if let Ok(mut stale) = result {
                debug!("Releasing stream acquired for a stale request");
                stale.release();
            }
            return;
        }

        let mut stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Microphone acquisition failed: {}", e);
                self.state = CaptureState::Error(e);
                return;
            }
        };

        let format = negotiate_format(self.microphone.as_ref());
        if let Err(e) = stream.begin(format.as_ref(), self.settings.slice) {
            warn!("Recorder failed to start: {}", e);
            stream.release();
            self.state = CaptureState::Error(e);
            return;
        }

        self.format = format;
        self.stream = Some(stream);
        self.started_at = Some(Instant::now());
        self.elapsed_secs = 0;
        self.state = CaptureState::Recording;
        self.spawn_ticker(ticket);
        info!("Recording started");
    }

    fn spawn_ticker(&mut self, ticket: u64) {
        let events = self.events.clone();
        self.ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.tick().await;
            let mut seconds = 0u32;
            loop {
                interval.tick().await;
                seconds += 1;
                events(CaptureEvent::Elapsed { ticket, seconds });
            }
        }));
    }

    fn on_elapsed(&mut self, ticket: u64, seconds: u32) {
        if ticket != self.ticket || self.state != CaptureState::Recording {
            return;
        }
        self.elapsed_secs = self.elapsed_secs.max(seconds);

        if let Some(fault) = self.stream.as_deref().and_then(stream_fault) {
            self.fail(CaptureError::CaptureFailure(fault));
            return;
        }

        if let Some(max) = self.settings.max_duration_secs {
            if self.elapsed_secs >= max {
                info!("Maximum duration of {}s reached, stopping", max);
                if let Err(e) = self.stop() {
                    warn!("Automatic stop failed: {}", e);
                }
            }
        }
    }

    /// Finalize the recording. Cancels a pending permission request; a no-op
    /// in any other state.
    pub fn stop(&mut self) -> Result<(), CaptureError> {
        match self.state {
            CaptureState::RequestingPermission => {
                self.cancel_acquire();
                self.state = CaptureState::Idle;
                return Ok(());
            }
            CaptureState::Recording => {}
            _ => return Ok(()),
        }

        self.stop_ticker();
        let Some(mut stream) = self.stream.take() else {
            self.state = CaptureState::Idle;
            return Ok(());
        };

        let chunks = stream.chunks();
        let info = stream.info();
        stream.release();

        let (sealed, fault) = match chunks.lock() {
            Ok(mut guard) => (guard.take_chunks(), guard.fault().map(str::to_string)),
            Err(_) => (Vec::new(), Some("chunk buffer poisoned".to_string())),
        };

        let measured = self
            .started_at
            .take()
            .map(|t| t.elapsed().as_secs() as u32)
            .unwrap_or(0);
        let duration_secs = self.elapsed_secs.max(measured);

        if let Some(fault) = fault {
            let error = CaptureError::CaptureFailure(fault);
            self.state = CaptureState::Error(error.clone());
            return Err(error);
        }

        let blob = finalize_chunks(self.format.as_ref(), info, sealed);
        if blob.is_empty() {
            let error = CaptureError::CaptureFailure("no audio captured".to_string());
            self.state = CaptureState::Error(error.clone());
            return Err(error);
        }

        let handle = self.handles.register(blob.bytes.clone(), blob.mime.clone());
        self.recordings_made += 1;
        info!(
            "Recording stopped: {}s, {} bytes, attempt {}",
            duration_secs,
            blob.len(),
            self.recordings_made
        );
        self.recording = Some(Recording {
            blob,
            duration_secs,
            attempt_index: self.recordings_made,
            handle,
        });
        self.state = CaptureState::Stopped;
        Ok(())
    }

    /// Discard the stopped recording and spend one attempt.
    pub fn reset(&mut self) -> bool {
        if self.state != CaptureState::Stopped {
            debug!("Reset ignored in state {:?}", self.state);
            return false;
        }
        self.discard_recording();
        self.remaining_attempts = self.remaining_attempts.saturating_sub(1);
        self.elapsed_secs = 0;
        self.state = CaptureState::Idle;
        info!("Recording reset, {} attempts left", self.remaining_attempts);
        true
    }

    /// Clear an error so the record control can be used again.
    pub fn dismiss_error(&mut self) {
        if matches!(self.state, CaptureState::Error(_)) {
            self.state = CaptureState::Idle;
        }
    }

    /// Hand the stopped recording over to submission. Its playable handle is
    /// revoked and the engine locks in `Submitted`.
    pub fn take_recording(&mut self) -> Option<Recording> {
        if self.state != CaptureState::Stopped {
            return None;
        }
        let recording = self.recording.take()?;
        self.handles.revoke(&recording.handle);
        self.state = CaptureState::Submitted;
        Some(recording)
    }

    /// Release everything this engine holds.
    pub fn teardown(&mut self) {
        self.cancel_acquire();
        self.stop_ticker();
        if let Some(mut stream) = self.stream.take() {
            info!("Releasing microphone on teardown");
            stream.release();
        }
        self.started_at = None;
        self.discard_recording();
        if !matches!(self.state, CaptureState::Submitted) {
            self.state = CaptureState::Idle;
        }
    }

    pub fn view(&self) -> CaptureView {
        let (status, error) = match &self.state {
            CaptureState::Idle => (CaptureStatus::Idle, None),
            CaptureState::RequestingPermission => (CaptureStatus::RequestingPermission, None),
            CaptureState::Recording => (CaptureStatus::Recording, None),
            CaptureState::Stopped => (CaptureStatus::Stopped, None),
            CaptureState::Submitted => (CaptureStatus::Submitted, None),
            CaptureState::Error(e) => (
                CaptureStatus::Error,
                Some(format!("{}. {}", e, e.remediation())),
            ),
        };
        CaptureView {
            status,
            elapsed_secs: self
                .recording
                .as_ref()
                .map(|r| r.duration_secs)
                .unwrap_or(self.elapsed_secs),
            max_duration_secs: self.settings.max_duration_secs,
            remaining_attempts: self.remaining_attempts,
            max_attempts: self.settings.max_attempts,
            level: self.stream.as_ref().map(|s| s.level()).unwrap_or(0.0),
            playback_handle: self.recording.as_ref().map(|r| r.handle.clone()),
            error,
            can_start: self.can_start(),
        }
    }

    fn fail(&mut self, error: CaptureError) {
        warn!("Recording failed: {}", error);
        self.stop_ticker();
        if let Some(mut stream) = self.stream.take() {
            stream.release();
        }
        self.started_at = None;
        self.state = CaptureState::Error(error);
    }

    fn cancel_acquire(&mut self) {
        // Bumping the ticket makes any in-flight acquisition stale.
        self.ticket = next_ticket();
        if let Some(task) = self.acquire_task.take() {
            task.abort();
        }
    }

    fn stop_ticker(&mut self) {
        if let Some(task) = self.ticker.take() {
            task.abort();
        }
    }

    fn discard_recording(&mut self) {
        if let Some(recording) = self.recording.take() {
            self.handles.revoke(&recording.handle);
        }
    }
}

fn stream_fault(stream: &dyn InputStream) -> Option<String> {
    let chunks = stream.chunks();
    let guard = chunks.lock().ok()?;
    guard.fault().map(str::to_string)
}

impl Drop for AudioCaptureEngine {
    fn drop(&mut self) {
        self.teardown();
    }
}
