pub mod http;
pub mod retry;
pub mod types;

pub use http::HttpGateway;
pub use retry::RetryPolicy;
pub use types::{
    AnswerVerdict, GatewayError, NextQuestion, Progress, Question, QuestionOption, QuestionType,
    Rubric, Section, SectionRef, SectionStatus, Skill, TtsAudio, UploadedAudio,
};

use crate::audio::RecordingBlob;
use async_trait::async_trait;

/// The server side of a section. Scoring and next-question selection happen
/// behind this seam; the runtime only requests, renders and relays.
#[async_trait]
pub trait SubmissionGateway: Send + Sync {
    async fn start_section(&self, section: &SectionRef) -> Result<Section, GatewayError>;

    async fn get_next_question(&self, section: &SectionRef) -> Result<NextQuestion, GatewayError>;

    /// Scored path for reading and listening answers.
    async fn submit_answer(
        &self,
        section: &SectionRef,
        question_id: &str,
        answer: &str,
    ) -> Result<AnswerVerdict, GatewayError>;

    async fn submit_writing(
        &self,
        section: &SectionRef,
        question_id: &str,
        text: &str,
    ) -> Result<(), GatewayError>;

    async fn upload_audio(&self, blob: &RecordingBlob) -> Result<UploadedAudio, GatewayError>;

    async fn submit_speaking(
        &self,
        section: &SectionRef,
        question_id: &str,
        audio_url: &str,
        duration_secs: u32,
    ) -> Result<(), GatewayError>;

    /// Must be safe to call on an already completed section.
    async fn complete_section(&self, section: &SectionRef) -> Result<(), GatewayError>;

    async fn get_tts_audio(&self, question_id: &str) -> Result<TtsAudio, GatewayError>;

    fn name(&self) -> &str;
}
