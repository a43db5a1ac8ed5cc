//! Separation backends
//!
//! Both DSP backends estimate a vocal signal per frame and write it to every
//! channel; the accompaniment is whatever is left, so the two stems always
//! sum back to the input.

use crossbeam_channel::Sender;

use crate::audio::dsp::BandPass;
use crate::audio::types::AudioData;
use crate::config::SeparationConfig;
use crate::error::SeparationError;

/// Progress is reported about this often, in frames.
const PROGRESS_EVERY: usize = 8192;

/// Separated stems, interleaved with the input's channel count
#[derive(Debug, Clone)]
pub struct StemData {
    pub sample_rate: u32,
    pub channels: u16,
    pub vocals: Vec<f32>,
    pub accompaniment: Vec<f32>,
}

impl StemData {
    /// Stem name and buffer for every stem, ready to land as samples.
    pub fn into_outputs(self) -> Vec<(String, AudioData)> {
        vec![
            (
                "vocals".to_string(),
                AudioData::new(self.vocals, self.sample_rate, self.channels),
            ),
            (
                "accompaniment".to_string(),
                AudioData::new(self.accompaniment, self.sample_rate, self.channels),
            ),
        ]
    }
}

/// A way of splitting a mix into vocals and accompaniment
pub trait SeparationBackend: Send + Sync {
    /// Separate `audio`, sending progress in 0..1 when a channel is given.
    fn separate(
        &self,
        audio: &AudioData,
        config: &SeparationConfig,
        progress: Option<&Sender<f32>>,
    ) -> Result<StemData, SeparationError>;

    /// Backend name for logs and status messages
    fn name(&self) -> &'static str;
}

/// Run `vocal` over every frame and split the input around it.
fn split_frames(
    audio: &AudioData,
    progress: Option<&Sender<f32>>,
    mut vocal: impl FnMut(&[f32]) -> f32,
) -> Result<StemData, SeparationError> {
    let total = audio.num_frames();
    if total == 0 {
        return Err(SeparationError::EmptyInput);
    }
    let channels = audio.channels.max(1) as usize;
    let mut vocals = Vec::with_capacity(audio.samples.len());
    let mut accompaniment = Vec::with_capacity(audio.samples.len());

    for (index, frame) in audio.samples.chunks_exact(channels).enumerate() {
        let v = vocal(frame);
        for &sample in frame {
            vocals.push(v);
            accompaniment.push(sample - v);
        }
        if let Some(tx) = progress {
            if index % PROGRESS_EVERY == 0 {
                let _ = tx.try_send(index as f32 / total as f32);
            }
        }
    }

    Ok(StemData {
        sample_rate: audio.sample_rate,
        channels: audio.channels,
        vocals,
        accompaniment,
    })
}

fn mid(frame: &[f32]) -> f32 {
    frame.iter().sum::<f32>() / frame.len() as f32
}

// ─────────────────────────────────────────────────────────────────────────
// Center band
// ─────────────────────────────────────────────────────────────────────────

/// Vocals are the mid channel band-limited to the configured vocal range.
/// Anything panned away from center or outside the band stays in the
/// accompaniment.
pub struct CenterBackend;

impl SeparationBackend for CenterBackend {
    fn separate(
        &self,
        audio: &AudioData,
        config: &SeparationConfig,
        progress: Option<&Sender<f32>>,
    ) -> Result<StemData, SeparationError> {
        if !(config.vocal_low_hz > 0.0 && config.vocal_low_hz < config.vocal_high_hz) {
            return Err(SeparationError::InvalidConfig(format!(
                "vocal band {}..{} Hz is empty",
                config.vocal_low_hz, config.vocal_high_hz
            )));
        }
        let mut band = BandPass::new(config.vocal_low_hz, config.vocal_high_hz, audio.sample_rate);
        split_frames(audio, progress, |frame| band.process(mid(frame)))
    }

    fn name(&self) -> &'static str {
        "center band"
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Mid/side
// ─────────────────────────────────────────────────────────────────────────

/// Vocals are the full mid channel and the accompaniment is the side
/// channel. A mono input goes entirely to vocals.
pub struct MidSideBackend;

impl SeparationBackend for MidSideBackend {
    fn separate(
        &self,
        audio: &AudioData,
        _config: &SeparationConfig,
        progress: Option<&Sender<f32>>,
    ) -> Result<StemData, SeparationError> {
        split_frames(audio, progress, mid)
    }

    fn name(&self) -> &'static str {
        "mid/side"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 44_100;

    /// One second of a stereo tone, `right_sign` = -1 puts it fully in the side.
    fn stereo_tone(freq: f32, right_sign: f32) -> AudioData {
        let samples = (0..SR as usize)
            .flat_map(|i| {
                let s = 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin();
                [s, right_sign * s]
            })
            .collect();
        AudioData::new(samples, SR, 2)
    }

    fn rms(buf: &[f32]) -> f32 {
        (buf.iter().map(|s| s * s).sum::<f32>() / buf.len() as f32).sqrt()
    }

    /// Skip the first half second while the filters settle.
    fn settled(buf: &[f32]) -> &[f32] {
        &buf[buf.len() / 2..]
    }

    #[test]
    fn test_stems_sum_to_input() {
        let audio = stereo_tone(440.0, 0.3);
        let stems = CenterBackend
            .separate(&audio, &SeparationConfig::default(), None)
            .unwrap();
        assert_eq!(stems.vocals.len(), audio.samples.len());
        for ((v, a), x) in stems.vocals.iter().zip(&stems.accompaniment).zip(&audio.samples) {
            assert!((v + a - x).abs() < 1e-5);
        }
    }

    #[test]
    fn test_center_tone_in_vocal_band_goes_to_vocals() {
        let audio = stereo_tone(1000.0, 1.0);
        let stems = CenterBackend
            .separate(&audio, &SeparationConfig::default(), None)
            .unwrap();
        let input = rms(settled(&audio.samples));
        assert!(rms(settled(&stems.vocals)) > 0.9 * input);
        assert!(rms(settled(&stems.accompaniment)) < 0.15 * input);
    }

    #[test]
    fn test_center_bass_stays_in_accompaniment() {
        let audio = stereo_tone(50.0, 1.0);
        let stems = CenterBackend
            .separate(&audio, &SeparationConfig::default(), None)
            .unwrap();
        let input = rms(settled(&audio.samples));
        assert!(rms(settled(&stems.vocals)) < 0.2 * input);
        assert!(rms(settled(&stems.accompaniment)) > 0.8 * input);
    }

    #[test]
    fn test_side_signal_has_silent_vocals() {
        let audio = stereo_tone(1000.0, -1.0);
        for backend in [&CenterBackend as &dyn SeparationBackend, &MidSideBackend] {
            let stems = backend
                .separate(&audio, &SeparationConfig::default(), None)
                .unwrap();
            assert!(stems.vocals.iter().all(|s| s.abs() < 1e-6), "{}", backend.name());
            assert_eq!(stems.accompaniment, audio.samples);
        }
    }

    #[test]
    fn test_mid_side_mono_is_all_vocals() {
        let audio = AudioData::new(vec![0.25, -0.5, 0.75], 1000, 1);
        let stems = MidSideBackend
            .separate(&audio, &SeparationConfig::default(), None)
            .unwrap();
        assert_eq!(stems.vocals, audio.samples);
        assert!(stems.accompaniment.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_rejects_empty_input_and_band() {
        let empty = AudioData::new(Vec::new(), SR, 2);
        let config = SeparationConfig::default();
        assert_eq!(
            CenterBackend.separate(&empty, &config, None).unwrap_err(),
            SeparationError::EmptyInput
        );

        let inverted = SeparationConfig {
            vocal_low_hz: 5000.0,
            vocal_high_hz: 200.0,
            ..SeparationConfig::default()
        };
        let audio = stereo_tone(440.0, 1.0);
        assert!(matches!(
            CenterBackend.separate(&audio, &inverted, None),
            Err(SeparationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_outputs_are_named_stems() {
        let audio = stereo_tone(440.0, 1.0);
        let outputs = MidSideBackend
            .separate(&audio, &SeparationConfig::default(), None)
            .unwrap()
            .into_outputs();
        let names: Vec<&str> = outputs.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["vocals", "accompaniment"]);
        assert!(outputs.iter().all(|(_, a)| a.channels == 2 && a.sample_rate == SR));
    }
}
