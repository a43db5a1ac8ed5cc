use crate::audio::types::AudioData;

/// Min and max sample value over a range of frames.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Peak {
    pub min: f32,
    pub max: f32,
}

/// Mono peaks at a few resolutions, so redrawing at any width only touches
/// a few thousand entries.
#[derive(Clone, Debug)]
pub struct WaveformPeaks {
    /// (frames per peak, peaks), finest first
    levels: Vec<(usize, Vec<Peak>)>,
    total_frames: usize,
}

/// Frames per peak for each level.
const RESOLUTIONS: &[usize] = &[64, 256, 1024, 4096];

impl WaveformPeaks {
    pub fn compute(audio: &AudioData) -> Self {
        let mono = audio.to_mono();
        let levels = RESOLUTIONS
            .iter()
            .map(|&fpp| (fpp, peaks_at_resolution(&mono, fpp)))
            .collect();
        WaveformPeaks {
            levels,
            total_frames: mono.len(),
        }
    }

    /// One peak per pixel column.
    pub fn columns(&self, width: usize) -> Vec<Peak> {
        if self.total_frames == 0 || width == 0 {
            return Vec::new();
        }
        let frames_per_column = self.total_frames as f64 / width as f64;

        // Coarsest level that still has at least one peak per column
        let base = self
            .levels
            .iter()
            .rev()
            .find(|(fpp, _)| (*fpp as f64) <= frames_per_column)
            .or(self.levels.first())
            .map(|(_, peaks)| peaks.as_slice())
            .unwrap_or(&[]);
        if base.is_empty() {
            return Vec::new();
        }

        (0..width)
            .map(|i| {
                let from = i * base.len() / width;
                let to = ((i + 1) * base.len() / width).clamp(from + 1, base.len());
                if from >= base.len() {
                    return Peak { min: 0.0, max: 0.0 };
                }
                base[from..to].iter().fold(
                    Peak {
                        min: f32::MAX,
                        max: f32::MIN,
                    },
                    |acc, p| Peak {
                        min: acc.min.min(p.min),
                        max: acc.max.max(p.max),
                    },
                )
            })
            .collect()
    }
}

fn peaks_at_resolution(mono: &[f32], frames_per_peak: usize) -> Vec<Peak> {
    mono.chunks(frames_per_peak)
        .map(|chunk| {
            chunk.iter().fold(
                Peak {
                    min: f32::MAX,
                    max: f32::MIN,
                },
                |acc, &s| Peak {
                    min: acc.min.min(s),
                    max: acc.max.max(s),
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_columns_cover_extremes() {
        let mut samples = vec![0.0; 10_000];
        samples[100] = 0.9;
        samples[9_500] = -0.7;
        let peaks = WaveformPeaks::compute(&AudioData::new(samples, 1000, 1));

        let cols = peaks.columns(10);
        assert_eq!(cols.len(), 10);
        assert_eq!(cols[0].max, 0.9);
        assert_eq!(cols[9].min, -0.7);
        assert_eq!(cols[5], Peak { min: 0.0, max: 0.0 });
    }

    #[test]
    fn test_empty_audio_has_no_columns() {
        let peaks = WaveformPeaks::compute(&AudioData::new(Vec::new(), 1000, 1));
        assert!(peaks.columns(100).is_empty());
    }
}
