//! Error types
//!
//! Missing resources (no sample, no buffer, no backend) are not errors: the
//! playback layer treats them as guarded no-ops. Everything here is either an
//! invariant violation caught at the session boundary or a failure reported by
//! a decoder, the audio device, or an offline processing job.

use thiserror::Error;

use crate::session::{ChopId, SampleId};

/// Rejected mutations of the editable session state
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Region bounds outside [0, 1] or start >= end
    #[error("Invalid region: start={start:.4} end={end:.4}")]
    InvalidRegion { start: f64, end: f64 },

    /// A chop with an empty or out-of-range span
    #[error("Invalid chop {id}: start={start:.4} end={end:.4}")]
    InvalidChop { id: ChopId, start: f64, end: f64 },

    /// Linked chops with a gap or an overlap between neighbours
    #[error("Linked chops {left} and {right} are not contiguous")]
    ChopsNotContiguous { left: ChopId, right: ChopId },

    #[error("Unknown sample: {0}")]
    UnknownSample(SampleId),

    #[error("Unknown chop: {0}")]
    UnknownChop(ChopId),

    /// A processing job is already running on this sample
    #[error("Sample {0} is already being processed")]
    SampleBusy(SampleId),

    /// The sample has no decoded audio
    #[error("Sample {0} has no audio loaded")]
    NoAudio(SampleId),
}

/// Failures while decoding an audio file
#[derive(Error, Debug, Clone)]
pub enum DecodeError {
    #[error("Failed to open file: {0}")]
    Open(String),

    #[error("Unrecognized audio format: {0}")]
    Format(String),

    #[error("No default track found")]
    NoTrack,

    #[error("No sample rate in track")]
    NoSampleRate,

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("File contains no audio frames")]
    Empty,
}

/// Failures while starting the output engine
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("No audio output device found")]
    NoDevice,

    #[error("Failed to get output config: {0}")]
    Config(String),

    #[error("Failed to build output stream: {0}")]
    StreamBuild(String),

    #[error("Failed to start stream: {0}")]
    StreamPlay(String),

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),
}

/// Failures reported by offline processing jobs
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessingError {
    #[error("Selection contains no audio")]
    EmptySelection,

    #[error("Time-stretch ratio {0} is outside 0.25..=4.0")]
    InvalidRatio(f32),

    #[error("Invalid target sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("Sample is silent")]
    Silent,

    #[error("Sample rate conversion failed: {0}")]
    Resample(String),

    #[error(transparent)]
    Separation(#[from] SeparationError),

    #[error("Processing task failed: {0}")]
    Task(String),
}

/// Failures while splitting a sample into stems
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SeparationError {
    #[error("Sample has no frames to separate")]
    EmptyInput,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Separation failed with {backend}: {reason}")]
    Failed {
        backend: &'static str,
        reason: String,
    },
}
