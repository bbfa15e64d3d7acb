use super::device::Microphone;
use super::types::{RecordingBlob, StreamInfo};
use std::fmt;
use std::sync::Arc;

/// Container preference, most compact first. A recorder that supports none
/// of these is started without an explicit type.
pub const PREFERRED_FORMATS: &[&str] = &[
    "audio/webm;codecs=opus",
    "audio/webm",
    "audio/ogg;codecs=opus",
    "audio/mp4",
    "audio/wav",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AudioFormat(String);

impl AudioFormat {
    pub fn new(mime: impl Into<String>) -> Self {
        Self(mime.into())
    }

    pub fn mime(&self) -> &str {
        &self.0
    }

    /// MIME without codec parameters, e.g. `audio/webm`.
    pub fn essence(&self) -> &str {
        self.0.split(';').next().unwrap_or_default().trim()
    }

    pub fn is_wav(&self) -> bool {
        matches!(self.essence(), "audio/wav" | "audio/x-wav" | "audio/wave")
    }

    pub fn extension(&self) -> &'static str {
        extension_for_mime(self.essence())
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime.split(';').next().unwrap_or_default().trim() {
        "audio/webm" => "webm",
        "audio/ogg" => "ogg",
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => "m4a",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        _ => "bin",
    }
}

/// Probe the preference list against what the microphone's recorder accepts.
pub fn negotiate_format(microphone: &dyn Microphone) -> Option<AudioFormat> {
    let chosen = PREFERRED_FORMATS
        .iter()
        .map(|mime| AudioFormat::new(*mime))
        .find(|format| microphone.supports_format(format));

    match &chosen {
        Some(format) => tracing::debug!("Negotiated recording format {}", format),
        None => tracing::debug!("No preferred format supported, recording without explicit type"),
    }
    chosen
}

/// Join the sealed chunks into one payload. Raw PCM chunks are wrapped in a
/// WAV container when the negotiated format asks for one.
pub fn finalize_chunks(
    format: Option<&AudioFormat>,
    info: StreamInfo,
    chunks: Vec<Vec<u8>>,
) -> RecordingBlob {
    let data_len: usize = chunks.iter().map(Vec::len).sum();

    match format {
        Some(format) if format.is_wav() => {
            let mut bytes = wav_header(info, data_len);
            bytes.reserve(data_len);
            for chunk in chunks {
                bytes.extend_from_slice(&chunk);
            }
            RecordingBlob {
                bytes: Arc::new(bytes),
                mime: Some("audio/wav".to_string()),
            }
        }
        _ => {
            let mut bytes = Vec::with_capacity(data_len);
            for chunk in chunks {
                bytes.extend_from_slice(&chunk);
            }
            RecordingBlob {
                bytes: Arc::new(bytes),
                mime: format.map(|f| f.essence().to_string()),
            }
        }
    }
}

/// 44-byte RIFF header for 16-bit little-endian PCM.
pub fn wav_header(info: StreamInfo, data_len: usize) -> Vec<u8> {
    let channels = info.channels.max(1);
    let sample_rate = info.sample_rate;
    let mut wav = Vec::with_capacity(44);

    // RIFF header
    wav.extend_from_slice(b"RIFF");
    let file_size = (36 + data_len) as u32;
    wav.extend_from_slice(&file_size.to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    // fmt chunk
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes()); // chunk size
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM format
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    let byte_rate = sample_rate * channels as u32 * 2;
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&(channels * 2).to_le_bytes()); // block align
    wav.extend_from_slice(&16u16.to_le_bytes()); // bits per sample

    // data chunk
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&(data_len as u32).to_le_bytes());

    wav
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::InputStream;
    use crate::audio::types::{CaptureError, CaptureHints};
    use async_trait::async_trait;

    struct Supports(&'static [&'static str]);

    #[async_trait]
    impl Microphone for Supports {
        async fn acquire(&self, _hints: CaptureHints) -> Result<Box<dyn InputStream>, CaptureError> {
            Err(CaptureError::DeviceUnavailable)
        }

        fn supports_format(&self, format: &AudioFormat) -> bool {
            self.0.contains(&format.mime())
        }

        fn name(&self) -> &str {
            "test"
        }
    }

    #[test]
    fn prefers_compressed_container() {
        let mic = Supports(&["audio/wav", "audio/webm"]);
        assert_eq!(negotiate_format(&mic).unwrap().mime(), "audio/webm");
    }

    #[test]
    fn falls_back_to_no_explicit_type() {
        let mic = Supports(&["audio/flac"]);
        assert!(negotiate_format(&mic).is_none());
    }

    #[test]
    fn wav_payload_has_consistent_sizes() {
        let info = StreamInfo {
            sample_rate: 16000,
            channels: 1,
        };
        let blob = finalize_chunks(
            Some(&AudioFormat::new("audio/wav")),
            info,
            vec![vec![0; 6], vec![0; 4]],
        );
        let bytes = blob.bytes.as_slice();

        assert_eq!(blob.mime.as_deref(), Some("audio/wav"));
        assert_eq!(bytes.len(), 54);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 46);
        assert_eq!(u32::from_le_bytes(bytes[40..44].try_into().unwrap()), 10);
    }

    #[test]
    fn encoded_chunks_concatenate_under_essence_mime() {
        let info = StreamInfo {
            sample_rate: 48000,
            channels: 2,
        };
        let blob = finalize_chunks(
            Some(&AudioFormat::new("audio/webm;codecs=opus")),
            info,
            vec![vec![1, 2], vec![3]],
        );
        assert_eq!(blob.bytes.as_slice(), &[1, 2, 3]);
        assert_eq!(blob.mime.as_deref(), Some("audio/webm"));
    }

    #[test]
    fn extension_table() {
        assert_eq!(extension_for_mime("audio/ogg;codecs=opus"), "ogg");
        assert_eq!(extension_for_mime("audio/x-wav"), "wav");
        assert_eq!(extension_for_mime("video/whatever"), "bin");
    }
}
