use super::state::{Feedback, SessionPhase};
use crate::audio::CaptureView;
use crate::dispatch::{AnswerDraft, CaptureMode};
use crate::gateway::{Progress, Question, Skill};
use crate::playback::PlaybackView;
use crate::timer::TimeLevel;
use serde::Serialize;

/// Render-ready picture of the session, published on every transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub section_id: String,
    pub skill: Option<Skill>,
    /// Listening scripts are withheld.
    pub question: Option<Question>,
    pub capture_mode: Option<CaptureMode>,
    pub draft: Option<AnswerDraft>,
    pub word_count: usize,
    pub can_submit: bool,
    pub submit_blocker: Option<String>,
    pub remaining_secs: Option<u64>,
    pub time_level: TimeLevel,
    pub feedback: Option<Feedback>,
    pub progress: Option<Progress>,
    pub capture: Option<CaptureView>,
    pub playback: Option<PlaybackView>,
    pub notice: Option<String>,
}

impl SessionSnapshot {
    pub fn initial(section_id: &str) -> Self {
        Self {
            phase: SessionPhase::Loading,
            section_id: section_id.to_string(),
            skill: None,
            question: None,
            capture_mode: None,
            draft: None,
            word_count: 0,
            can_submit: false,
            submit_blocker: None,
            remaining_secs: None,
            time_level: TimeLevel::Normal,
            feedback: None,
            progress: None,
            capture: None,
            playback: None,
            notice: None,
        }
    }

    pub fn question_id(&self) -> Option<&str> {
        self.question.as_ref().map(|q| q.id.as_str())
    }
}
