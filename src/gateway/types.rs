use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Skill {
    Reading,
    Listening,
    Writing,
    Speaking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SectionStatus {
    NotStarted,
    #[default]
    InProgress,
    Completed,
    Expired,
    #[serde(other)]
    Unknown,
}

/// Server-owned section. `expires_at` never changes for one section instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    pub skill: Skill,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub status: SectionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    MultipleChoice,
    Reading,
    FillBlank,
    ShortAnswer,
    Listening,
    Dictation,
    Essay,
    Writing,
    Speaking,
    ReadAloud,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
    pub value: String,
}

/// Constraints attached to a question. Every bound is optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Rubric {
    pub min_words: Option<u32>,
    pub max_words: Option<u32>,
    pub max_duration_seconds: Option<u32>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub skill: Skill,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub passage: Option<String>,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    #[serde(default)]
    pub rubric: Option<Rubric>,
    #[serde(default)]
    pub max_plays: Option<u32>,
}

impl Question {
    pub fn rubric(&self) -> Rubric {
        self.rubric.unwrap_or_default()
    }

    pub fn has_option(&self, value: &str) -> bool {
        self.options.iter().any(|o| o.value == value)
    }
}

/// Informational only.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    #[serde(default)]
    pub answered: u32,
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub current_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextQuestion {
    Question {
        question: Question,
        progress: Option<Progress>,
    },
    Complete,
}

/// Wire shape of `getNextQuestion`: `{ question, progress }` or `{ isComplete: true }`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NextQuestionWire {
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default)]
    pub question: Option<Question>,
    #[serde(default)]
    pub progress: Option<Progress>,
}

impl TryFrom<NextQuestionWire> for NextQuestion {
    type Error = GatewayError;

    fn try_from(wire: NextQuestionWire) -> Result<Self, Self::Error> {
        if wire.is_complete {
            return Ok(NextQuestion::Complete);
        }
        match wire.question {
            Some(question) => Ok(NextQuestion::Question {
                question,
                progress: wire.progress,
            }),
            None => Err(GatewayError::Decode(
                "response carries neither a question nor isComplete".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerVerdict {
    pub is_correct: bool,
    #[serde(default)]
    pub correct_answer: Option<String>,
    #[serde(default)]
    pub should_auto_complete: bool,
    #[serde(default)]
    pub expired: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedAudio {
    pub audio_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsAudio {
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub tts_script: Option<String>,
}

/// Which section of which assessment a call targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SectionRef {
    pub assessment_id: String,
    pub section_id: String,
}

impl SectionRef {
    pub fn new(assessment_id: impl Into<String>, section_id: impl Into<String>) -> Self {
        Self {
            assessment_id: assessment_id.into(),
            section_id: section_id.into(),
        }
    }
}

/// Gateway errors with retry classification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Not authorized")]
    Unauthorized,

    #[error("Section is closed")]
    SectionClosed,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Decode(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Network(_) | GatewayError::Timeout | GatewayError::RateLimited => true,
            GatewayError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
