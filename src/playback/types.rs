use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("Audio could not be loaded: {0}")]
    LoadFailed(String),

    #[error("Speech synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("Audio playback is unavailable")]
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackMode {
    NetworkAudio,
    SynthesizedSpeech,
}

/// Per-question play budget. `play_count` only grows, and only when a play
/// has fully ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub play_count: u32,
    pub max_plays: u32,
    pub mode: PlaybackMode,
}

impl PlaybackState {
    pub fn plays_remaining(&self) -> u32 {
        self.max_plays.saturating_sub(self.play_count)
    }
}

/// Why a `play()` request did not start anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayRejected {
    NotLoaded,
    Exhausted,
    AlreadyPlaying,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackView {
    pub state: PlaybackState,
    pub plays_remaining: u32,
    pub playing: bool,
    pub available: bool,
    pub can_play: bool,
}
