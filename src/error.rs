use crate::audio::CaptureError;
use crate::dispatch::DraftRejected;
use crate::gateway::GatewayError;
use crate::playback::PlaybackError;
use thiserror::Error;

/// Everything a session can report to the candidate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Microphone permission denied")]
    PermissionDenied,

    #[error("No microphone available")]
    DeviceUnavailable,

    #[error("Recording failed: {0}")]
    CaptureFailure(String),

    #[error("Audio playback unavailable")]
    PlaybackUnavailable,

    #[error("Submission failed: {0}")]
    SubmissionFailure(GatewayError),

    #[error("Section time has expired")]
    SectionExpired,

    #[error("A submission is already in progress")]
    SubmissionInFlight,

    #[error("Answer not ready: {0}")]
    NotSubmittable(DraftRejected),

    #[error("Section is already complete")]
    SectionComplete,

    #[error("Action not available: {0}")]
    InvalidState(&'static str),
}

impl SessionError {
    pub fn user_message(&self) -> String {
        match self {
            SessionError::PermissionDenied => with_remedy(CaptureError::PermissionDenied),
            SessionError::DeviceUnavailable => with_remedy(CaptureError::DeviceUnavailable),
            SessionError::CaptureFailure(_) => {
                "The recording was interrupted. Please record again.".to_string()
            }
            SessionError::PlaybackUnavailable => {
                "Audio cannot be played on this device.".to_string()
            }
            SessionError::SubmissionFailure(e) if e.is_retryable() => {
                "Your answer could not be sent. Check your connection and submit again.".to_string()
            }
            SessionError::SubmissionFailure(_) => {
                "Your answer was not accepted. Please submit again.".to_string()
            }
            SessionError::SectionExpired => "Time is up. This section has ended.".to_string(),
            SessionError::NotSubmittable(reason) => reason.to_string(),
            other => other.to_string(),
        }
    }
}

fn with_remedy(error: CaptureError) -> String {
    format!("{}. {}", error, error.remediation())
}

impl From<CaptureError> for SessionError {
    fn from(error: CaptureError) -> Self {
        match error {
            CaptureError::PermissionDenied => SessionError::PermissionDenied,
            CaptureError::DeviceUnavailable => SessionError::DeviceUnavailable,
            CaptureError::CaptureFailure(reason) | CaptureError::Other(reason) => {
                SessionError::CaptureFailure(reason)
            }
        }
    }
}

impl From<PlaybackError> for SessionError {
    fn from(_: PlaybackError) -> Self {
        SessionError::PlaybackUnavailable
    }
}

impl From<GatewayError> for SessionError {
    fn from(error: GatewayError) -> Self {
        match error {
            GatewayError::SectionClosed => SessionError::SectionExpired,
            other => SessionError::SubmissionFailure(other),
        }
    }
}

impl From<DraftRejected> for SessionError {
    fn from(reason: DraftRejected) -> Self {
        SessionError::NotSubmittable(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_errors_explain_the_remedy() {
        let denied: SessionError = CaptureError::PermissionDenied.into();
        assert!(denied.user_message().contains("Allow microphone access"));
        let absent: SessionError = CaptureError::DeviceUnavailable.into();
        assert!(absent.user_message().contains("Connect a microphone"));
    }

    #[test]
    fn closed_section_maps_to_expiry() {
        assert_eq!(
            SessionError::from(GatewayError::SectionClosed),
            SessionError::SectionExpired
        );
        assert!(matches!(
            SessionError::from(GatewayError::Timeout),
            SessionError::SubmissionFailure(GatewayError::Timeout)
        ));
    }

    #[test]
    fn draft_reasons_pass_through() {
        let error = SessionError::from(DraftRejected::TooFewWords { count: 79, min: 80 });
        assert_eq!(error.user_message(), "Write at least 80 words (79 so far)");
    }
}
