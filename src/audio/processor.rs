//! Offline processing jobs
//!
//! Every job reads a buffer and produces a new one (or an analysis); none
//! of them touches what is playing. The async entry points move the work
//! onto tokio's blocking pool.

use std::sync::Arc;

use crossbeam_channel::Sender;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use super::stretcher;
use super::types::AudioData;
use crate::error::ProcessingError;
use crate::separation::SeparationService;
use crate::session::{ProcessingKind, Region, STRETCH_RATIO_MAX, STRETCH_RATIO_MIN};

/// Target peak for `normalize`.
pub const NORMALIZE_PEAK: f32 = 0.99;
/// Tempo range reported by `detect_bpm`.
pub const BPM_MIN: f64 = 60.0;
pub const BPM_MAX: f64 = 200.0;
/// Onsets closer than this are merged.
const MIN_ONSET_GAP_SECONDS: f64 = 0.05;
/// Analysis hop, 10 ms.
const HOPS_PER_SECOND: u32 = 100;

/// A job that yields a new sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Job {
    Crop(Region),
    Normalize,
    TimeStretch(f32),
    Resample(u32),
}

impl Job {
    pub fn kind(&self) -> ProcessingKind {
        match self {
            Job::Crop(_) => ProcessingKind::Crop,
            Job::Normalize => ProcessingKind::Normalize,
            Job::TimeStretch(_) => ProcessingKind::TimeStretch,
            Job::Resample(_) => ProcessingKind::Resample,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleAnalysis {
    pub duration: f64,
    pub peak: f32,
    pub rms: f32,
    pub sample_rate: u32,
    pub channels: u16,
}

// ─────────────────────────────────────────────────────────────────────────
// Async entry points
// ─────────────────────────────────────────────────────────────────────────

/// Run `job` on the blocking pool.
pub async fn run(
    audio: Arc<AudioData>,
    job: Job,
    progress: Option<Sender<f32>>,
) -> Result<AudioData, ProcessingError> {
    tokio::task::spawn_blocking(move || run_blocking(&audio, job, progress.as_ref()))
        .await
        .map_err(|e| ProcessingError::Task(e.to_string()))?
}

/// Onsets inside `region` as normalized buffer positions, optionally
/// snapped to the detected tempo grid.
pub async fn find_onsets(
    audio: Arc<AudioData>,
    region: Region,
    sensitivity: f32,
    snap_to_tempo: bool,
) -> Result<Vec<f64>, ProcessingError> {
    tokio::task::spawn_blocking(move || {
        let bpm = if snap_to_tempo { detect_bpm(&audio) } else { None };
        detect_transients(&audio, region, sensitivity, bpm)
    })
    .await
    .map_err(|e| ProcessingError::Task(e.to_string()))
}

/// Split into vocals and accompaniment on the blocking pool. Each output is
/// a stem name with its buffer.
pub async fn separate(
    audio: Arc<AudioData>,
    service: SeparationService,
    progress: Option<Sender<f32>>,
) -> Result<Vec<(String, AudioData)>, ProcessingError> {
    tokio::task::spawn_blocking(move || -> Result<_, ProcessingError> {
        let stems = service.separate(&audio, progress.as_ref())?;
        Ok(stems.into_outputs())
    })
    .await
    .map_err(|e| ProcessingError::Task(e.to_string()))?
}

pub fn run_blocking(
    audio: &AudioData,
    job: Job,
    progress: Option<&Sender<f32>>,
) -> Result<AudioData, ProcessingError> {
    let result = match job {
        Job::Crop(region) => crop(audio, region),
        Job::Normalize => normalize(audio),
        Job::TimeStretch(ratio) => time_stretch(audio, ratio, progress),
        Job::Resample(rate) => resample(audio, rate),
    };
    if let Some(tx) = progress {
        let _ = tx.try_send(1.0);
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────
// New-buffer jobs
// ─────────────────────────────────────────────────────────────────────────

pub fn crop(audio: &AudioData, region: Region) -> Result<AudioData, ProcessingError> {
    let start = audio.frame_at(region.start);
    let end = audio.frame_at(region.end);
    if end <= start {
        return Err(ProcessingError::EmptySelection);
    }
    Ok(AudioData::new(
        audio.frames(start, end).to_vec(),
        audio.sample_rate,
        audio.channels,
    ))
}

pub fn normalize(audio: &AudioData) -> Result<AudioData, ProcessingError> {
    let peak = peak(&audio.samples);
    if peak <= f32::EPSILON {
        return Err(ProcessingError::Silent);
    }
    let gain = NORMALIZE_PEAK / peak;
    let samples = audio.samples.iter().map(|s| s * gain).collect();
    Ok(AudioData::new(samples, audio.sample_rate, audio.channels))
}

/// Bake a time-stretch: the result is `ratio` times as long, same pitch.
pub fn time_stretch(
    audio: &AudioData,
    ratio: f32,
    progress: Option<&Sender<f32>>,
) -> Result<AudioData, ProcessingError> {
    if !ratio.is_finite() || !(STRETCH_RATIO_MIN..=STRETCH_RATIO_MAX).contains(&ratio) {
        return Err(ProcessingError::InvalidRatio(ratio));
    }
    if audio.num_frames() == 0 {
        return Err(ProcessingError::EmptySelection);
    }
    if (ratio - 1.0).abs() < f32::EPSILON {
        return Ok(audio.clone());
    }
    Ok(stretcher::stretch_offline(audio, ratio, progress))
}

/// Input frames per resampler call.
const RESAMPLE_CHUNK: usize = 1024;

/// Band-limited sample rate conversion (windowed sinc).
///
/// The output keeps the input's duration: `round(frames * target / source)`
/// frames, with the filter delay trimmed from the front.
pub fn resample(audio: &AudioData, target_rate: u32) -> Result<AudioData, ProcessingError> {
    if !(1000..=384_000).contains(&target_rate) {
        return Err(ProcessingError::InvalidSampleRate(target_rate));
    }
    let frames = audio.num_frames();
    if frames == 0 {
        return Err(ProcessingError::EmptySelection);
    }
    if target_rate == audio.sample_rate {
        return Ok(audio.clone());
    }

    let ch = audio.channels.max(1) as usize;
    let ratio = target_rate as f64 / audio.sample_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, ch)
        .map_err(|e| ProcessingError::Resample(e.to_string()))?;

    let planar: Vec<Vec<f32>> = (0..ch)
        .map(|c| audio.samples.iter().skip(c).step_by(ch).copied().collect())
        .collect();
    let expected = ((frames as f64) * ratio).round().max(1.0) as usize;
    let delay = resampler.output_delay();
    let mut out: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); ch];
    let append = |out: &mut Vec<Vec<f32>>, block: Vec<Vec<f32>>| {
        for (dst, src) in out.iter_mut().zip(block) {
            dst.extend_from_slice(&src);
        }
    };

    let mut pos = 0;
    while pos + resampler.input_frames_next() <= frames {
        let n = resampler.input_frames_next();
        let chunk: Vec<&[f32]> = planar.iter().map(|p| &p[pos..pos + n]).collect();
        let block = resampler
            .process(&chunk, None)
            .map_err(|e| ProcessingError::Resample(e.to_string()))?;
        append(&mut out, block);
        pos += n;
    }
    if pos < frames {
        let tail: Vec<&[f32]> = planar.iter().map(|p| &p[pos..]).collect();
        let block = resampler
            .process_partial(Some(tail.as_slice()), None)
            .map_err(|e| ProcessingError::Resample(e.to_string()))?;
        append(&mut out, block);
    }
    // Push the filter delay out with silence
    while out[0].len() < expected + delay {
        let block = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(|e| ProcessingError::Resample(e.to_string()))?;
        if block.first().map_or(true, |b| b.is_empty()) {
            break;
        }
        append(&mut out, block);
    }

    let mut samples = Vec::with_capacity(expected * ch);
    for i in delay..delay + expected {
        for channel in &out {
            samples.push(channel.get(i).copied().unwrap_or(0.0));
        }
    }
    Ok(AudioData::new(samples, target_rate, audio.channels))
}

// ─────────────────────────────────────────────────────────────────────────
// Analysis
// ─────────────────────────────────────────────────────────────────────────

pub fn analyze(audio: &AudioData) -> SampleAnalysis {
    let rms = if audio.samples.is_empty() {
        0.0
    } else {
        let sum: f64 = audio.samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (sum / audio.samples.len() as f64).sqrt() as f32
    };
    SampleAnalysis {
        duration: audio.duration,
        peak: peak(&audio.samples),
        rms,
        sample_rate: audio.sample_rate,
        channels: audio.channels,
    }
}

fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0_f32, |m, s| m.max(s.abs()))
}

/// Frames per analysis hop.
fn hop_size(sample_rate: u32) -> usize {
    (sample_rate / HOPS_PER_SECOND).max(1) as usize
}

/// Positive energy difference between consecutive hops of `mono`.
fn energy_flux(mono: &[f32], hop: usize) -> Vec<f32> {
    let energies: Vec<f32> = mono
        .chunks(hop)
        .map(|c| c.iter().map(|s| s * s).sum::<f32>() / c.len() as f32)
        .collect();
    let mut flux = Vec::with_capacity(energies.len());
    let mut prev = 0.0;
    for e in energies {
        flux.push((e - prev).max(0.0));
        prev = e;
    }
    flux
}

/// Hop indices of flux peaks above an adaptive threshold.
///
/// `sensitivity` in 0..1; higher finds more onsets.
fn pick_onsets(flux: &[f32], sensitivity: f32, min_gap: usize) -> Vec<usize> {
    if flux.is_empty() {
        return Vec::new();
    }
    let n = flux.len() as f32;
    let mean = flux.iter().sum::<f32>() / n;
    let var = flux.iter().map(|f| (f - mean) * (f - mean)).sum::<f32>() / n;
    let k = 0.5 + 2.5 * (1.0 - sensitivity.clamp(0.0, 1.0));
    let threshold = (mean + k * var.sqrt()).max(1e-8);

    let mut onsets: Vec<usize> = Vec::new();
    for i in 0..flux.len() {
        let prev = if i > 0 { flux[i - 1] } else { 0.0 };
        let next = flux.get(i + 1).copied().unwrap_or(0.0);
        if flux[i] < threshold || flux[i] < prev || flux[i] <= next {
            continue;
        }
        match onsets.last() {
            Some(&last) if i - last < min_gap => {}
            _ => onsets.push(i),
        }
    }
    onsets
}

/// Onsets strictly inside `region`, as normalized buffer positions.
///
/// With a tempo, each onset moves to the nearest sixteenth of the beat
/// grid anchored at the region start; duplicates are dropped.
pub fn detect_transients(
    audio: &AudioData,
    region: Region,
    sensitivity: f32,
    bpm: Option<f64>,
) -> Vec<f64> {
    let total = audio.num_frames();
    let start = audio.frame_at(region.start);
    let end = audio.frame_at(region.end);
    if end <= start || total == 0 {
        return Vec::new();
    }

    let mono = AudioData::new(audio.frames(start, end).to_vec(), audio.sample_rate, audio.channels)
        .to_mono();
    let hop = hop_size(audio.sample_rate);
    let min_gap = ((MIN_ONSET_GAP_SECONDS * audio.sample_rate as f64) as usize / hop).max(1);
    let flux = energy_flux(&mono, hop);

    let mut frames: Vec<usize> = pick_onsets(&flux, sensitivity, min_gap)
        .into_iter()
        .map(|i| start + i * hop)
        .collect();

    if let Some(bpm) = bpm.filter(|b| b.is_finite() && *b > 0.0) {
        let grid = audio.sample_rate as f64 * 60.0 / bpm / 4.0;
        for f in frames.iter_mut() {
            let steps = ((*f - start) as f64 / grid).round();
            *f = start + (steps * grid).round() as usize;
        }
        frames.dedup();
    }

    frames
        .into_iter()
        .filter(|&f| f > start && f < end)
        .map(|f| f as f64 / total as f64)
        .collect()
}

/// Tempo from the inter-onset interval histogram, folded into 60..=200.
pub fn detect_bpm(audio: &AudioData) -> Option<f64> {
    let mono = audio.to_mono();
    let hop = hop_size(audio.sample_rate);
    let min_gap = ((MIN_ONSET_GAP_SECONDS * audio.sample_rate as f64) as usize / hop).max(1);
    let onsets = pick_onsets(&energy_flux(&mono, hop), 0.5, min_gap);
    if onsets.len() < 3 {
        return None;
    }

    let hop_seconds = hop as f64 / audio.sample_rate as f64;
    let bins = (BPM_MAX - BPM_MIN) as usize + 1;
    let mut histogram = vec![0.0_f64; bins];
    for (i, &a) in onsets.iter().enumerate() {
        // Farther pairs vote less so multiples of the beat do not win.
        for (j, &b) in onsets[i + 1..].iter().take(4).enumerate() {
            let weight = 1.0 / (j + 1) as f64;
            let interval = (b - a) as f64 * hop_seconds;
            if interval <= 0.0 || interval > 2.0 {
                continue;
            }
            let mut bpm = 60.0 / interval;
            while bpm < BPM_MIN {
                bpm *= 2.0;
            }
            while bpm > BPM_MAX {
                bpm /= 2.0;
            }
            let bin = ((bpm - BPM_MIN).round() as usize).min(bins - 1);
            histogram[bin] += weight;
            // Spread into neighbours so jittered intervals still vote together.
            if bin > 0 {
                histogram[bin - 1] += weight * 0.5;
            }
            if bin + 1 < bins {
                histogram[bin + 1] += weight * 0.5;
            }
        }
    }

    let (best, votes) = histogram
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))?;
    if *votes <= 0.0 {
        return None;
    }
    let bpm = BPM_MIN + best as f64;
    log::debug!("detect_bpm: {bpm:.1} ({votes:.1} votes, {} onsets)", onsets.len());
    Some(bpm)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Clicks every `interval` seconds at 8 kHz, mono.
    fn click_train(seconds: f64, interval: f64) -> AudioData {
        let sr = 8000;
        let frames = (seconds * sr as f64) as usize;
        let every = (interval * sr as f64) as usize;
        let mut samples = vec![0.0; frames];
        for start in (every..frames).step_by(every) {
            for i in 0..400.min(frames - start) {
                let decay = 1.0 - i as f32 / 400.0;
                samples[start + i] = 0.8 * decay * if i % 2 == 0 { 1.0 } else { -1.0 };
            }
        }
        AudioData::new(samples, sr, 1)
    }

    #[test]
    fn test_crop_copies_region() {
        let audio = AudioData::new((0..100).map(|i| i as f32).collect(), 100, 1);
        let out = crop(&audio, Region::new(0.25, 0.5).unwrap()).unwrap();
        assert_eq!(out.num_frames(), 25);
        assert_eq!(out.samples[0], 25.0);
        assert_eq!(out.sample_rate, 100);
    }

    #[test]
    fn test_crop_rejects_empty_selection() {
        let audio = AudioData::new(vec![0.0; 10], 100, 1);
        let err = crop(&audio, Region { start: 0.5, end: 0.51 }).unwrap_err();
        assert_eq!(err, ProcessingError::EmptySelection);
    }

    #[test]
    fn test_normalize_hits_target_peak() {
        let audio = AudioData::new(vec![0.1, -0.25, 0.2], 100, 1);
        let out = normalize(&audio).unwrap();
        assert!((peak(&out.samples) - NORMALIZE_PEAK).abs() < 1e-6);
        assert!(out.samples[1] < 0.0);
        assert_eq!(normalize(&AudioData::new(vec![0.0; 8], 100, 1)), Err(ProcessingError::Silent));
    }

    #[test]
    fn test_time_stretch_validates_ratio() {
        let audio = AudioData::new(vec![0.0; 100], 100, 1);
        assert_eq!(
            time_stretch(&audio, 8.0, None).unwrap_err(),
            ProcessingError::InvalidRatio(8.0)
        );
        assert!(time_stretch(&audio, f32::NAN, None).is_err());
        assert_eq!(time_stretch(&audio, 1.0, None).unwrap(), audio);
    }

    #[test]
    fn test_time_stretch_changes_length() {
        let samples: Vec<f32> = (0..44_100)
            .map(|i| (i as f32 * 0.05).sin() * 0.5)
            .collect();
        let audio = AudioData::new(samples, 44_100, 1);
        let (tx, rx) = crossbeam_channel::unbounded();
        let out = run_blocking(&audio, Job::TimeStretch(2.0), Some(&tx)).unwrap();
        assert!((out.duration - 2.0).abs() < 0.05, "got {}", out.duration);
        let reports: Vec<f32> = rx.try_iter().collect();
        assert_eq!(reports.last(), Some(&1.0));
        assert!(reports.windows(2).all(|w| w[0] <= w[1]));
    }

    fn sine(freq: f32, sample_rate: u32, seconds: f32) -> AudioData {
        let frames = (sample_rate as f32 * seconds) as usize;
        let samples = (0..frames)
            .map(|i| (std::f32::consts::TAU * freq * i as f32 / sample_rate as f32).sin() * 0.5)
            .collect();
        AudioData::new(samples, sample_rate, 1)
    }

    /// RMS over the middle half, away from the filter's edges.
    fn middle_rms(audio: &AudioData) -> f32 {
        let n = audio.samples.len();
        let mid = &audio.samples[n / 4..3 * n / 4];
        (mid.iter().map(|s| s * s).sum::<f32>() / mid.len() as f32).sqrt()
    }

    #[test]
    fn test_resample_length_and_rate() {
        let audio = sine(440.0, 48_000, 1.0);
        let out = resample(&audio, 44_100).unwrap();
        assert_eq!(out.sample_rate, 44_100);
        assert_eq!(out.channels, 1);
        assert_eq!(out.num_frames(), 44_100);
        assert!((out.duration - audio.duration).abs() < 1e-3);

        let stereo = AudioData::new(vec![0.25; 2 * 22_050], 22_050, 2);
        let up = resample(&stereo, 44_100).unwrap();
        assert_eq!(up.num_frames(), 44_100);
        assert_eq!(up.channels, 2);

        assert!(resample(&audio, 0).is_err());
        assert_eq!(resample(&audio, 48_000).unwrap(), audio);
    }

    #[test]
    fn test_resample_keeps_passband_and_rejects_alias() {
        // 1 kHz survives the conversion
        let low = resample(&sine(1000.0, 48_000, 0.5), 44_100).unwrap();
        let rms = middle_rms(&low);
        assert!((rms - 0.5 / 2f32.sqrt()).abs() < 0.02, "passband rms {rms}");

        // 23 kHz is above the new Nyquist and must not fold back to 21.1 kHz
        let high = resample(&sine(23_000.0, 48_000, 0.5), 44_100).unwrap();
        let rms = middle_rms(&high);
        assert!(rms < 0.02, "alias rms {rms}");
    }

    #[test]
    fn test_transients_find_clicks_inside_region() {
        let audio = click_train(4.0, 0.5);
        let onsets = detect_transients(&audio, Region::FULL, 0.5, None);
        assert_eq!(onsets.len(), 7, "{onsets:?}");
        for (i, o) in onsets.iter().enumerate() {
            let expected = (i + 1) as f64 * 0.125;
            assert!((o - expected).abs() < 0.01, "onset {i} at {o}");
        }

        let half = detect_transients(&audio, Region::new(0.0, 0.5).unwrap(), 0.5, None);
        assert_eq!(half.len(), 3);
    }

    #[test]
    fn test_transients_snap_to_grid() {
        let audio = click_train(4.0, 0.5);
        let onsets = detect_transients(&audio, Region::FULL, 0.5, Some(120.0));
        let grid = 0.125 / 4.0;
        for o in onsets {
            let steps = o / grid;
            assert!((steps - steps.round()).abs() < 1e-3);
        }
    }

    #[test]
    fn test_silence_has_no_transients_or_tempo() {
        let audio = AudioData::new(vec![0.0; 8000], 8000, 1);
        assert!(detect_transients(&audio, Region::FULL, 1.0, None).is_empty());
        assert_eq!(detect_bpm(&audio), None);
    }

    #[test]
    fn test_bpm_of_click_train() {
        let audio = click_train(8.0, 0.5);
        let bpm = detect_bpm(&audio).unwrap();
        assert!((bpm - 120.0).abs() <= 1.0, "got {bpm}");
    }

    #[test]
    fn test_analyze() {
        let audio = AudioData::new(vec![0.5, -0.5, 0.5, -0.5], 4, 1);
        let a = analyze(&audio);
        assert_eq!(a.duration, 1.0);
        assert_eq!(a.peak, 0.5);
        assert!((a.rms - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_job_kinds() {
        assert_eq!(Job::TimeStretch(2.0).kind(), ProcessingKind::TimeStretch);
        assert!(Job::TimeStretch(2.0).kind().bakes_effects());
        assert!(!Job::Normalize.kind().bakes_effects());
    }
}
