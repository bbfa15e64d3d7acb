//! Picks the capture strategy for a question and turns whatever the candidate
//! produced into one of the four submission shapes.

use crate::audio::Recording;
use crate::gateway::{Question, QuestionType, Skill};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CaptureMode {
    SingleChoice,
    FreeText,
    /// Free text holding an exact transcription of played audio.
    Dictation,
    #[serde(rename_all = "camelCase")]
    Essay {
        min_words: Option<u32>,
        max_words: Option<u32>,
    },
    SpokenResponse,
}

/// What the candidate has entered so far for the current question.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnswerDraft {
    pub selected: Option<String>,
    pub text: String,
}

/// Everything normalization looks at besides the question itself.
#[derive(Debug, Clone, Copy)]
pub struct DraftInputs<'a> {
    pub draft: &'a AnswerDraft,
    pub recording: Option<&'a Recording>,
    /// At least one play finished, or playback is unavailable altogether.
    pub listened: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Choice(String),
    ShortText(String),
    Essay(String),
    Audio(Recording),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DraftRejected {
    #[error("Select an option")]
    NoSelection,
    #[error("'{0}' is not one of the options")]
    UnknownOption(String),
    #[error("Enter an answer")]
    EmptyText,
    #[error("Write at least {min} words ({count} so far)")]
    TooFewWords { count: usize, min: u32 },
    #[error("Write at most {max} words ({count} so far)")]
    TooManyWords { count: usize, max: u32 },
    #[error("Record an answer first")]
    NoRecording,
    #[error("Listen to the audio first")]
    NotListened,
}

/// Non-empty whitespace-separated tokens.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

pub struct QuestionDispatcher;

impl QuestionDispatcher {
    pub fn capture_mode(question: &Question) -> CaptureMode {
        match question.skill {
            Skill::Reading => match question.question_type {
                QuestionType::MultipleChoice | QuestionType::Reading => CaptureMode::SingleChoice,
                QuestionType::FillBlank | QuestionType::ShortAnswer => CaptureMode::FreeText,
                _ if question.options.is_empty() => CaptureMode::FreeText,
                _ => CaptureMode::SingleChoice,
            },
            Skill::Listening => match question.question_type {
                QuestionType::Dictation => CaptureMode::Dictation,
                _ => CaptureMode::SingleChoice,
            },
            Skill::Writing => {
                let rubric = question.rubric();
                CaptureMode::Essay {
                    min_words: rubric.min_words,
                    max_words: rubric.max_words,
                }
            }
            Skill::Speaking => CaptureMode::SpokenResponse,
        }
    }

    pub fn requires_playback(question: &Question) -> bool {
        question.skill == Skill::Listening
    }

    pub fn requires_capture(question: &Question) -> bool {
        Self::capture_mode(question) == CaptureMode::SpokenResponse
    }

    pub fn normalize(question: &Question, inputs: DraftInputs<'_>) -> Result<Submission, DraftRejected> {
        if Self::requires_playback(question) && !inputs.listened {
            return Err(DraftRejected::NotListened);
        }

        match Self::capture_mode(question) {
            CaptureMode::SingleChoice => {
                let value = inputs
                    .draft
                    .selected
                    .as_deref()
                    .filter(|v| !v.is_empty())
                    .ok_or(DraftRejected::NoSelection)?;
                if !question.options.is_empty() && !question.has_option(value) {
                    return Err(DraftRejected::UnknownOption(value.to_string()));
                }
                Ok(Submission::Choice(value.to_string()))
            }
            CaptureMode::FreeText | CaptureMode::Dictation => {
                let text = inputs.draft.text.trim();
                if text.is_empty() {
                    return Err(DraftRejected::EmptyText);
                }
                Ok(Submission::ShortText(text.to_string()))
            }
            CaptureMode::Essay {
                min_words,
                max_words,
            } => {
                let text = inputs.draft.text.trim();
                let count = word_count(text);
                if count == 0 {
                    return Err(DraftRejected::EmptyText);
                }
                if let Some(min) = min_words {
                    if count < min as usize {
                        return Err(DraftRejected::TooFewWords { count, min });
                    }
                }
                if let Some(max) = max_words {
                    if count > max as usize {
                        return Err(DraftRejected::TooManyWords { count, max });
                    }
                }
                Ok(Submission::Essay(text.to_string()))
            }
            CaptureMode::SpokenResponse => inputs
                .recording
                .filter(|r| !r.blob.is_empty())
                .cloned()
                .map(Submission::Audio)
                .ok_or(DraftRejected::NoRecording),
        }
    }

    pub fn can_submit(question: &Question, inputs: DraftInputs<'_>) -> bool {
        Self::normalize(question, inputs).is_ok()
    }
}
