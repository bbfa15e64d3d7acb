use std::time::Duration;

/// Recorded audio held as time-sliced chunks. A chunk is sealed once it
/// covers one slice, so a crash loses at most the unsealed tail.
#[derive(Debug, Clone)]
pub struct ChunkBuffer {
    pub sample_rate: u32,
    pub channels: u16,
    chunks: Vec<Vec<u8>>,
    pending: Vec<i16>,
    slice_samples: usize,
    fault: Option<String>,
}

impl ChunkBuffer {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        let mut buffer = Self {
            sample_rate,
            channels,
            chunks: Vec::new(),
            pending: Vec::new(),
            slice_samples: 0,
            fault: None,
        };
        buffer.set_slice(Duration::from_secs(1));
        buffer
    }

    /// Recalculate how many interleaved samples make up one slice.
    pub fn set_slice(&mut self, slice: Duration) {
        let per_sec = self.sample_rate as u64 * self.channels.max(1) as u64;
        let samples = per_sec.saturating_mul(slice.as_millis() as u64) / 1000;
        self.slice_samples = (samples as usize).max(1);
    }

    pub fn configure(&mut self, sample_rate: u32, channels: u16, slice: Duration) {
        self.sample_rate = sample_rate;
        self.channels = channels;
        self.set_slice(slice);
        self.clear();
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.pending.clear();
        self.fault = None;
    }

    /// Append interleaved PCM, sealing every full slice.
    pub fn append_samples(&mut self, data: &[i16]) {
        self.pending.extend_from_slice(data);
        while self.pending.len() >= self.slice_samples {
            let rest = self.pending.split_off(self.slice_samples);
            let full = std::mem::replace(&mut self.pending, rest);
            self.chunks.push(pcm_bytes(&full));
        }
    }

    /// Append an already encoded chunk as delivered by the recorder.
    pub fn push_chunk(&mut self, chunk: Vec<u8>) {
        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
    }

    /// Seal whatever is pending into a final, possibly short, chunk.
    pub fn seal(&mut self) {
        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            self.chunks.push(pcm_bytes(&tail));
        }
    }

    pub fn take_chunks(&mut self) -> Vec<Vec<u8>> {
        self.seal();
        std::mem::take(&mut self.chunks)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn byte_len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum::<usize>() + self.pending.len() * 2
    }

    pub fn record_fault(&mut self, message: impl Into<String>) {
        if self.fault.is_none() {
            self.fault = Some(message.into());
        }
    }

    pub fn fault(&self) -> Option<&str> {
        self.fault.as_deref()
    }
}

fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}
