pub mod buffer;
pub mod capture;
pub mod device;
pub mod engine;
pub mod format;
pub mod types;

pub use buffer::ChunkBuffer;
pub use capture::CpalMicrophone;
pub use device::{InputStream, Microphone, SharedChunks};
pub use engine::{AudioCaptureEngine, CaptureEvent, CaptureSettings, CaptureState};
pub use format::{negotiate_format, AudioFormat, PREFERRED_FORMATS};
pub use types::{
    CaptureError, CaptureHints, CaptureStatus, CaptureView, Recording, RecordingBlob, StreamInfo,
};
