use super::buffer::ChunkBuffer;
use super::format::AudioFormat;
use super::types::{CaptureError, CaptureHints, StreamInfo};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type SharedChunks = Arc<Mutex<ChunkBuffer>>;

/// Source of microphone streams. Acquisition is where permission prompts and
/// missing devices surface.
#[async_trait]
pub trait Microphone: Send + Sync {
    async fn acquire(&self, hints: CaptureHints) -> Result<Box<dyn InputStream>, CaptureError>;

    /// Whether the recorder can produce the given container.
    fn supports_format(&self, format: &AudioFormat) -> bool;

    fn name(&self) -> &str;
}

/// An acquired device stream. Holding one means holding the device;
/// `release` must stop every underlying track.
pub trait InputStream: Send {
    /// Start delivering audio into `chunks`, sealed every `slice`.
    fn begin(&mut self, format: Option<&AudioFormat>, slice: Duration) -> Result<(), CaptureError>;

    fn chunks(&self) -> SharedChunks;

    fn info(&self) -> StreamInfo;

    /// Current input level in 0.0..=1.0.
    fn level(&self) -> f32;

    fn release(&mut self);

    fn is_live(&self) -> bool;
}
