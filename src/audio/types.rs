use crate::media::MediaHandle;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Capture failures, classified so the front-end can explain the remedy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("Microphone permission denied")]
    PermissionDenied,

    #[error("No microphone available")]
    DeviceUnavailable,

    #[error("Recording failed: {0}")]
    CaptureFailure(String),

    #[error("Microphone error: {0}")]
    Other(String),
}

impl CaptureError {
    /// Short human-readable hint shown next to the record control.
    pub fn remediation(&self) -> &'static str {
        match self {
            CaptureError::PermissionDenied => {
                "Allow microphone access in your system settings, then try again."
            }
            CaptureError::DeviceUnavailable => "Connect a microphone, then try again.",
            CaptureError::CaptureFailure(_) => "The recording was interrupted. Please record again.",
            CaptureError::Other(_) => "The microphone could not be started. Please try again.",
        }
    }
}

/// Processing hints requested when the microphone is acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureHints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl Default for CaptureHints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Finalized audio payload, ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingBlob {
    pub bytes: Arc<Vec<u8>>,
    /// Container type. `None` when the recorder was started without an explicit type.
    pub mime: Option<String>,
}

impl RecordingBlob {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// One finished attempt at a speaking answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recording {
    pub blob: RecordingBlob,
    pub duration_secs: u32,
    /// 1-based attempt that produced this recording.
    pub attempt_index: u32,
    /// Playable handle for listening back before submitting.
    pub handle: MediaHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CaptureStatus {
    Idle,
    RequestingPermission,
    Recording,
    Stopped,
    Submitted,
    Error,
}

/// Render-ready view of the capture engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureView {
    pub status: CaptureStatus,
    pub elapsed_secs: u32,
    pub max_duration_secs: Option<u32>,
    pub remaining_attempts: u32,
    pub max_attempts: u32,
    pub level: f32,
    pub playback_handle: Option<MediaHandle>,
    pub error: Option<String>,
    pub can_start: bool,
}
