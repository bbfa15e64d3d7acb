use super::buffer::ChunkBuffer;
use super::device::{InputStream, Microphone, SharedChunks};
use super::format::AudioFormat;
use super::types::{CaptureError, CaptureHints, StreamInfo};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{
    atomic::{AtomicU32, Ordering},
    mpsc, Arc, Mutex,
};
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

const RMS_BOOST: f32 = 2.5;

/// Microphone backed by the default cpal host. The cpal stream lives on its
/// own worker thread; the handle handed out only sends it commands.
pub struct CpalMicrophone {
    preferred_device: Option<String>,
}

impl CpalMicrophone {
    pub fn new(preferred_device: Option<String>) -> Self {
        let preferred_device = preferred_device
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        Self { preferred_device }
    }

    pub fn list_input_devices() -> Result<Vec<String>, CaptureError> {
        let host = cpal::default_host();
        let mut devices = host
            .input_devices()
            .map_err(|e| classify_backend_message(&e.to_string()))?
            .map(|device| device_display_name(&device))
            .collect::<Vec<_>>();
        devices.sort();
        devices.dedup();
        Ok(devices)
    }
}

#[async_trait]
impl Microphone for CpalMicrophone {
    async fn acquire(&self, hints: CaptureHints) -> Result<Box<dyn InputStream>, CaptureError> {
        // cpal exposes no processing switches; the hints only reach the log.
        info!(
            "Acquiring microphone (echo_cancellation={}, noise_suppression={})",
            hints.echo_cancellation, hints.noise_suppression
        );
        let stream = CpalInputStream::open(self.preferred_device.clone()).await?;
        Ok(Box::new(stream))
    }

    fn supports_format(&self, format: &AudioFormat) -> bool {
        format.is_wav()
    }

    fn name(&self) -> &str {
        "cpal"
    }
}

enum WorkerCommand {
    Play,
    Release,
}

pub struct CpalInputStream {
    commands: Option<mpsc::Sender<WorkerCommand>>,
    worker: Option<thread::JoinHandle<()>>,
    chunks: SharedChunks,
    level: Arc<AtomicU32>,
    info: StreamInfo,
}

impl CpalInputStream {
    async fn open(preferred_device: Option<String>) -> Result<Self, CaptureError> {
        let chunks: SharedChunks = Arc::new(Mutex::new(ChunkBuffer::new(16000, 1)));
        let level = Arc::new(AtomicU32::new(0.0f32.to_bits()));
        let (ready_tx, ready_rx) = oneshot::channel();
        let (command_tx, command_rx) = mpsc::channel();

        let worker_chunks = chunks.clone();
        let worker_level = level.clone();
        let worker = thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let stream = match build_stream(
                    preferred_device.as_deref(),
                    &worker_chunks,
                    &worker_level,
                ) {
                    Ok((stream, info)) => {
                        let _ = ready_tx.send(Ok(info));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                for command in command_rx {
                    match command {
                        WorkerCommand::Play => {
                            if let Err(e) = stream.play() {
                                error!("Failed to start input stream: {}", e);
                                if let Ok(mut guard) = worker_chunks.lock() {
                                    guard.record_fault(e.to_string());
                                }
                            }
                        }
                        WorkerCommand::Release => break,
                    }
                }
                drop(stream);
                info!("Input stream released");
            })
            .map_err(|e| CaptureError::Other(e.to_string()))?;

        let info = match ready_rx.await {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(e);
            }
            Err(_) => return Err(CaptureError::Other("capture worker exited".to_string())),
        };

        Ok(Self {
            commands: Some(command_tx),
            worker: Some(worker),
            chunks,
            level,
            info,
        })
    }
}

impl InputStream for CpalInputStream {
    fn begin(&mut self, format: Option<&AudioFormat>, slice: Duration) -> Result<(), CaptureError> {
        if let Some(format) = format {
            if !format.is_wav() {
                return Err(CaptureError::Other(format!("unsupported format {}", format)));
            }
        }
        if let Ok(mut guard) = self.chunks.lock() {
            guard.configure(self.info.sample_rate, self.info.channels, slice);
        }
        let commands = self
            .commands
            .as_ref()
            .ok_or_else(|| CaptureError::Other("stream already released".to_string()))?;
        commands
            .send(WorkerCommand::Play)
            .map_err(|_| CaptureError::CaptureFailure("capture worker exited".to_string()))
    }

    fn chunks(&self) -> SharedChunks {
        self.chunks.clone()
    }

    fn info(&self) -> StreamInfo {
        self.info
    }

    fn level(&self) -> f32 {
        f32::from_bits(self.level.load(Ordering::Relaxed))
    }

    fn release(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(WorkerCommand::Release);
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.level.store(0.0f32.to_bits(), Ordering::Relaxed);
    }

    fn is_live(&self) -> bool {
        self.commands.is_some()
    }
}

impl Drop for CpalInputStream {
    fn drop(&mut self) {
        self.release();
    }
}

fn build_stream(
    preferred_device: Option<&str>,
    chunks: &SharedChunks,
    level: &Arc<AtomicU32>,
) -> Result<(cpal::Stream, StreamInfo), CaptureError> {
    let host = cpal::default_host();
    let device = pick_input_device(&host, preferred_device).ok_or(CaptureError::DeviceUnavailable)?;
    info!("Input device: {}", device_display_name(&device));

    let config = device
        .default_input_config()
        .map_err(|e| classify_backend_message(&e.to_string()))?;
    let info = StreamInfo {
        sample_rate: config.sample_rate(),
        channels: config.channels(),
    };

    let buffer_clone = chunks.clone();
    let level_clone = level.clone();
    let fault_chunks = chunks.clone();
    let err_fn = move |err: cpal::StreamError| {
        error!("an error occurred on stream: {}", err);
        if let Ok(mut guard) = fault_chunks.lock() {
            guard.record_fault(err.to_string());
        }
    };

    let stream = match config.sample_format() {
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config.into(),
            move |data: &[i16], _: &_| write_input_data(data, &buffer_clone, &level_clone),
            err_fn,
            None,
        ),
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config.into(),
            move |data: &[f32], _: &_| write_input_data_f32(data, &buffer_clone, &level_clone),
            err_fn,
            None,
        ),
        other => {
            return Err(CaptureError::Other(format!(
                "Unsupported sample format {:?}",
                other
            )))
        }
    }
    .map_err(|e| classify_backend_message(&e.to_string()))?;

    Ok((stream, info))
}

/// Map a backend error message onto the capture taxonomy.
pub fn classify_backend_message(message: &str) -> CaptureError {
    let lower = message.to_ascii_lowercase();
    if ["permission", "denied", "not authorized", "not allowed", "access"]
        .iter()
        .any(|p| lower.contains(p))
    {
        return CaptureError::PermissionDenied;
    }
    if ["not available", "no device", "no such device", "disconnected", "not found"]
        .iter()
        .any(|p| lower.contains(p))
    {
        return CaptureError::DeviceUnavailable;
    }
    CaptureError::Other(message.to_string())
}

fn pick_input_device(host: &cpal::Host, preferred_name: Option<&str>) -> Option<cpal::Device> {
    if let Some(name) = preferred_name {
        if let Ok(mut devices) = host.input_devices() {
            if let Some(device) = devices.find(|d| device_display_name(d) == name) {
                return Some(device);
            }
        }
        warn!(
            "Preferred input device '{}' not found, falling back to default",
            name
        );
    }
    let default_device = host.default_input_device()?;

    let default_name = device_display_name(&default_device);
    if !looks_like_loopback(&default_name) {
        return Some(default_device);
    }

    warn!(
        "Default device '{}' looks like loopback, trying to pick a microphone input",
        default_name
    );

    if let Ok(mut devices) = host.input_devices() {
        if let Some(alternative) = devices.find(|d| !looks_like_loopback(&device_display_name(d))) {
            return Some(alternative);
        }
    }

    Some(default_device)
}

fn device_display_name(device: &cpal::Device) -> String {
    device
        .name()
        .or_else(|_| device.description().map(|d| d.name().to_string()))
        .unwrap_or_else(|_| "Unknown input".to_string())
}

fn looks_like_loopback(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    let patterns = [
        "stereo mix",
        "what u hear",
        "wave out",
        "loopback",
        "monitor",
    ];
    patterns.iter().any(|p| lower.contains(p))
}

fn write_input_data(input: &[i16], chunks: &SharedChunks, level: &Arc<AtomicU32>) {
    if let Ok(mut guard) = chunks.lock() {
        guard.append_samples(input);
    }

    let normalized = (rms_i16(input) * RMS_BOOST).clamp(0.0, 1.0);
    level.store(normalized.to_bits(), Ordering::Relaxed);
}

fn write_input_data_f32(input: &[f32], chunks: &SharedChunks, level: &Arc<AtomicU32>) {
    let normalized = (rms_f32(input) * RMS_BOOST).clamp(0.0, 1.0);
    level.store(normalized.to_bits(), Ordering::Relaxed);

    let samples: Vec<i16> = input
        .iter()
        .map(|&x| (x.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect();
    if let Ok(mut guard) = chunks.lock() {
        guard.append_samples(&samples);
    }
}

fn rms_i16(input: &[i16]) -> f32 {
    if input.is_empty() {
        return 0.0;
    }
    let sum: f32 = input
        .iter()
        .map(|&s| {
            let v = s as f32 / i16::MAX as f32;
            v * v
        })
        .sum();
    (sum / input.len() as f32).sqrt()
}

fn rms_f32(input: &[f32]) -> f32 {
    if input.is_empty() {
        return 0.0;
    }
    let sum: f32 = input.iter().map(|&s| s * s).sum();
    (sum / input.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_backend_messages() {
        assert_eq!(
            classify_backend_message("Permission denied by the operating system"),
            CaptureError::PermissionDenied
        );
        assert_eq!(
            classify_backend_message("The requested device is no longer available."),
            CaptureError::DeviceUnavailable
        );
        assert!(matches!(
            classify_backend_message("buffer underrun"),
            CaptureError::Other(_)
        ));
    }

    #[test]
    fn loopback_names_are_detected() {
        assert!(looks_like_loopback("Monitor of Built-in Audio"));
        assert!(looks_like_loopback("Stereo Mix (Realtek)"));
        assert!(!looks_like_loopback("USB Microphone"));
    }

    #[test]
    fn level_is_normalized() {
        assert_eq!(rms_i16(&[]), 0.0);
        let chunks: SharedChunks = Arc::new(Mutex::new(ChunkBuffer::new(16000, 1)));
        let level = Arc::new(AtomicU32::new(0));
        write_input_data_f32(&[1.0; 64], &chunks, &level);
        assert_eq!(f32::from_bits(level.load(Ordering::Relaxed)), 1.0);
        assert_eq!(chunks.lock().unwrap().byte_len(), 128);
    }
}
