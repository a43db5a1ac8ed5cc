use std::sync::Arc;

use crate::session::{EqParams, NoiseGateParams};

/// Decoded audio data stored entirely in memory.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioData {
    /// Interleaved samples normalized to [-1.0, 1.0].
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Duration in seconds.
    pub duration: f64,
}

impl AudioData {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        let channels = channels.max(1);
        let frames = samples.len() / channels as usize;
        let duration = if sample_rate > 0 {
            frames as f64 / sample_rate as f64
        } else {
            0.0
        };
        Self {
            samples,
            sample_rate,
            channels,
            duration,
        }
    }

    /// Total number of frames (samples per channel).
    pub fn num_frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Frame index for a normalized position, clamped to the buffer.
    pub fn frame_at(&self, position: f64) -> usize {
        let frames = self.num_frames();
        ((position.clamp(0.0, 1.0) * frames as f64).round() as usize).min(frames)
    }

    /// Interleaved samples for the frame range `[start, end)`.
    pub fn frames(&self, start: usize, end: usize) -> &[f32] {
        let ch = self.channels as usize;
        let end = end.min(self.num_frames());
        let start = start.min(end);
        &self.samples[start * ch..end * ch]
    }

    /// Mix down to mono, returning one sample per frame.
    pub fn to_mono(&self) -> Vec<f32> {
        let ch = self.channels as usize;
        if ch == 1 {
            return self.samples.clone();
        }
        self.samples
            .chunks_exact(ch)
            .map(|frame| frame.iter().sum::<f32>() / ch as f32)
            .collect()
    }
}

/// Identifies one started source so stale end notifications can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SourceId(pub u64);

/// A span of a buffer to play on the audio thread.
#[derive(Debug, Clone)]
pub struct PlayCommand {
    pub source: SourceId,
    pub audio: Arc<AudioData>,
    pub start_frame: usize,
    pub end_frame: usize,
    pub looping: bool,
    pub rate: f32,
}

/// Commands sent from the UI thread to the audio thread.
#[derive(Debug, Clone)]
pub enum AudioCommand {
    Play(PlayCommand),
    Stop { fade: bool },
    SetEq(EqParams),
    SetNoiseGate(NoiseGateParams),
}

/// Events sent from the audio thread to the UI thread.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioEvent {
    /// A non-looping source reached the end of its span.
    SourceFinished(SourceId),
    Error(String),
}

/// Current playback status as seen by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Stopped,
    Playing,
    /// The previous source was stopped and a restart is waiting out the grace delay.
    RestartPending,
}
