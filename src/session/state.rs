use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CompletionReason {
    /// The gateway ran out of questions.
    Exhausted,
    /// The candidate chose to finish.
    Finished,
    Expired,
    /// The gateway asked for completion alongside a verdict.
    AutoCompleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "reason", rename_all = "camelCase")]
pub enum SessionPhase {
    Loading,
    Active,
    Submitting,
    Feedback,
    Complete(CompletionReason),
    /// A collaborator failed. Only completion leaves this state.
    Error,
}

impl SessionPhase {
    pub fn is_complete(&self) -> bool {
        matches!(self, SessionPhase::Complete(_))
    }
}

/// Correctness shown for a scored answer during the dwell interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub is_correct: bool,
    pub correct_answer: Option<String>,
}
