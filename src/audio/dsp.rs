//! Realtime processing chain run on the audio thread: three-band EQ and a
//! noise gate. Both work on interleaved buffers with any channel count and
//! never allocate after construction.

use crate::session::{EqParams, NoiseGateParams};

/// Biquad filter coefficients (RBJ cookbook, normalized by a0)
#[derive(Debug, Clone, Copy)]
struct BiquadCoeffs {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl BiquadCoeffs {
    fn passthrough() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }

    fn low_shelf(freq: f32, gain_db: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let (cos_w0, sin_w0) = Self::angle(freq, sample_rate);
        // Shelf slope S = 1
        let alpha = sin_w0 / 2.0 * std::f32::consts::SQRT_2;
        let sqrt_a = a.sqrt();

        let a0 = (a + 1.0) + (a - 1.0) * cos_w0 + 2.0 * sqrt_a * alpha;
        Self {
            b0: (a * ((a + 1.0) - (a - 1.0) * cos_w0 + 2.0 * sqrt_a * alpha)) / a0,
            b1: (2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0)) / a0,
            b2: (a * ((a + 1.0) - (a - 1.0) * cos_w0 - 2.0 * sqrt_a * alpha)) / a0,
            a1: (-2.0 * ((a - 1.0) + (a + 1.0) * cos_w0)) / a0,
            a2: ((a + 1.0) + (a - 1.0) * cos_w0 - 2.0 * sqrt_a * alpha) / a0,
        }
    }

    fn peaking(freq: f32, gain_db: f32, q: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let (cos_w0, sin_w0) = Self::angle(freq, sample_rate);
        let alpha = sin_w0 / (2.0 * q.max(0.01));

        let a0 = 1.0 + alpha / a;
        Self {
            b0: (1.0 + alpha * a) / a0,
            b1: (-2.0 * cos_w0) / a0,
            b2: (1.0 - alpha * a) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha / a) / a0,
        }
    }

    fn high_shelf(freq: f32, gain_db: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let (cos_w0, sin_w0) = Self::angle(freq, sample_rate);
        let alpha = sin_w0 / 2.0 * std::f32::consts::SQRT_2;
        let sqrt_a = a.sqrt();

        let a0 = (a + 1.0) - (a - 1.0) * cos_w0 + 2.0 * sqrt_a * alpha;
        Self {
            b0: (a * ((a + 1.0) + (a - 1.0) * cos_w0 + 2.0 * sqrt_a * alpha)) / a0,
            b1: (-2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0)) / a0,
            b2: (a * ((a + 1.0) + (a - 1.0) * cos_w0 - 2.0 * sqrt_a * alpha)) / a0,
            a1: (2.0 * ((a - 1.0) - (a + 1.0) * cos_w0)) / a0,
            a2: ((a + 1.0) - (a - 1.0) * cos_w0 - 2.0 * sqrt_a * alpha) / a0,
        }
    }

    /// Butterworth (Q = 1/sqrt 2)
    fn highpass(freq: f32, sample_rate: f32) -> Self {
        let (cos_w0, sin_w0) = Self::angle(freq, sample_rate);
        let alpha = sin_w0 * std::f32::consts::FRAC_1_SQRT_2;

        let a0 = 1.0 + alpha;
        Self {
            b0: ((1.0 + cos_w0) / 2.0) / a0,
            b1: (-(1.0 + cos_w0)) / a0,
            b2: ((1.0 + cos_w0) / 2.0) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    /// Butterworth (Q = 1/sqrt 2)
    fn lowpass(freq: f32, sample_rate: f32) -> Self {
        let (cos_w0, sin_w0) = Self::angle(freq, sample_rate);
        let alpha = sin_w0 * std::f32::consts::FRAC_1_SQRT_2;

        let a0 = 1.0 + alpha;
        Self {
            b0: ((1.0 - cos_w0) / 2.0) / a0,
            b1: (1.0 - cos_w0) / a0,
            b2: ((1.0 - cos_w0) / 2.0) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    fn angle(freq: f32, sample_rate: f32) -> (f32, f32) {
        // Keep the corner below Nyquist for low output rates.
        let freq = freq.clamp(10.0, sample_rate * 0.45);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        (w0.cos(), w0.sin())
    }
}

/// Direct form I history for one channel
#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, input: f32, c: &BiquadCoeffs) -> f32 {
        let out = c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = out;
        out
    }
}

/// Highpass into lowpass on a single channel. Offline use only: it keeps
/// one band of a mono signal, such as the vocal range of a mid channel.
pub struct BandPass {
    coeffs: [BiquadCoeffs; 2],
    state: [BiquadState; 2],
}

impl BandPass {
    pub fn new(low_hz: f32, high_hz: f32, sample_rate: u32) -> Self {
        let sample_rate = sample_rate.max(1) as f32;
        Self {
            coeffs: [
                BiquadCoeffs::highpass(low_hz, sample_rate),
                BiquadCoeffs::lowpass(high_hz, sample_rate),
            ],
            state: [BiquadState::default(); 2],
        }
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let high = self.state[0].process(input, &self.coeffs[0]);
        self.state[1].process(high, &self.coeffs[1])
    }
}

/// Low shelf, mid peak, high shelf in series
pub struct Equalizer {
    sample_rate: f32,
    channels: usize,
    params: EqParams,
    coeffs: [BiquadCoeffs; 3],
    /// `[band * channels + channel]`
    state: Vec<BiquadState>,
}

impl Equalizer {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        let channels = channels.max(1) as usize;
        let mut eq = Self {
            sample_rate: sample_rate.max(1) as f32,
            channels,
            params: EqParams::default(),
            coeffs: [BiquadCoeffs::passthrough(); 3],
            state: vec![BiquadState::default(); 3 * channels],
        };
        eq.set_params(EqParams::default());
        eq
    }

    pub fn params(&self) -> &EqParams {
        &self.params
    }

    /// Gains and corners change in place; filter history is kept so a
    /// live tweak does not click.
    pub fn set_params(&mut self, params: EqParams) {
        let sr = self.sample_rate;
        self.coeffs = [
            BiquadCoeffs::low_shelf(params.low.freq, params.low.gain_db, sr),
            BiquadCoeffs::peaking(params.mid.freq, params.mid.gain_db, params.mid_q, sr),
            BiquadCoeffs::high_shelf(params.high.freq, params.high.gain_db, sr),
        ];
        self.params = params;
    }

    pub fn reset(&mut self) {
        self.state.fill(BiquadState::default());
    }

    /// Filter an interleaved buffer in place. Disabled means untouched.
    pub fn process(&mut self, buffer: &mut [f32]) {
        if !self.params.enabled {
            return;
        }
        let ch = self.channels;
        for frame in buffer.chunks_exact_mut(ch) {
            for (c, sample) in frame.iter_mut().enumerate() {
                let mut s = *sample;
                for band in 0..3 {
                    s = self.state[band * ch + c].process(s, &self.coeffs[band]);
                }
                *sample = s;
            }
        }
    }
}

/// Envelope-following downward gate
///
/// Sensitivity maps to an open threshold from -20 dBFS (0.0) down to
/// -80 dBFS (1.0). While closed, the signal is attenuated by `amount`.
pub struct NoiseGate {
    params: NoiseGateParams,
    channels: usize,
    threshold: f32,
    envelope: f32,
    gain: f32,
    attack: f32,
    release: f32,
    hold_frames: usize,
    hold_left: usize,
}

impl NoiseGate {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        let sr = sample_rate.max(1) as f32;
        let coeff = |seconds: f32| (-1.0 / (seconds * sr)).exp();
        let mut gate = Self {
            params: NoiseGateParams::default(),
            channels: channels.max(1) as usize,
            threshold: 0.0,
            envelope: 0.0,
            gain: 1.0,
            attack: coeff(0.001),
            release: coeff(0.05),
            hold_frames: (sr * 0.02) as usize,
            hold_left: 0,
        };
        gate.set_params(NoiseGateParams::default());
        gate
    }

    pub fn params(&self) -> &NoiseGateParams {
        &self.params
    }

    pub fn set_params(&mut self, params: NoiseGateParams) {
        let db = -20.0 - 60.0 * params.sensitivity.clamp(0.0, 1.0);
        self.threshold = 10.0_f32.powf(db / 20.0);
        self.params = params;
    }

    pub fn reset(&mut self) {
        self.envelope = 0.0;
        self.gain = 1.0;
        self.hold_left = 0;
    }

    pub fn is_open(&self) -> bool {
        self.gain > 0.5
    }

    pub fn process(&mut self, buffer: &mut [f32]) {
        if !self.params.enabled {
            return;
        }
        let floor = 1.0 - self.params.amount.clamp(0.0, 1.0);
        for frame in buffer.chunks_exact_mut(self.channels) {
            let peak = frame.iter().fold(0.0_f32, |m, s| m.max(s.abs()));
            let coeff = if peak > self.envelope { self.attack } else { self.release };
            self.envelope = peak + coeff * (self.envelope - peak);

            let target = if self.envelope >= self.threshold {
                self.hold_left = self.hold_frames;
                1.0
            } else if self.hold_left > 0 {
                self.hold_left -= 1;
                1.0
            } else {
                floor
            };
            let coeff = if target > self.gain { self.attack } else { self.release };
            self.gain = target + coeff * (self.gain - target);

            for sample in frame.iter_mut() {
                *sample *= self.gain;
            }
        }
    }
}
