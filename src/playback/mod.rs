pub mod command;
pub mod engine;
pub mod locale;
pub mod script;
pub mod types;

pub use command::{CommandAudioOutput, CommandSynthesizer};
pub use engine::{AudioPlaybackEngine, PlaybackEvent, PlaybackSource};
pub use locale::locale_for_language;
pub use types::{PlayRejected, PlaybackError, PlaybackMode, PlaybackState, PlaybackView};

use async_trait::async_trait;

/// Plays a server-delivered audio asset.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Resolve once playback has fully ended. Load problems are `LoadFailed`.
    async fn play(&self, url: &str) -> Result<(), PlaybackError>;

    fn name(&self) -> &str;
}

/// On-device text-to-speech, injected rather than assumed.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn is_available(&self) -> bool;

    /// Resolve once the utterance has fully ended.
    async fn speak(&self, text: &str, locale: &str) -> Result<(), PlaybackError>;
}
