//! Global live-effect parameters
//!
//! These are not stored per sample: switching samples or baking an effect
//! into a new sample resets them to defaults. The loop flag lives next to
//! them but is a user preference and survives every reset.

/// Allowed time-stretch ratio range
pub const STRETCH_RATIO_MIN: f32 = 0.25;
pub const STRETCH_RATIO_MAX: f32 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EqBand {
    pub gain_db: f32,
    pub freq: f32,
}

impl EqBand {
    fn clamped(self) -> Self {
        Self {
            gain_db: self.gain_db.clamp(-24.0, 24.0),
            freq: self.freq.clamp(20.0, 20_000.0),
        }
    }
}

/// Three-band equalizer: low shelf, mid peak, high shelf
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EqParams {
    pub enabled: bool,
    pub low: EqBand,
    pub mid: EqBand,
    pub high: EqBand,
    pub mid_q: f32,
}

impl Default for EqParams {
    fn default() -> Self {
        Self {
            enabled: false,
            low: EqBand { gain_db: 0.0, freq: 320.0 },
            mid: EqBand { gain_db: 0.0, freq: 1000.0 },
            high: EqBand { gain_db: 0.0, freq: 3200.0 },
            mid_q: 1.0,
        }
    }
}

impl EqParams {
    fn clamped(self) -> Self {
        Self {
            enabled: self.enabled,
            low: self.low.clamped(),
            mid: self.mid.clamped(),
            high: self.high.clamped(),
            mid_q: self.mid_q.clamp(0.1, 10.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeStretchParams {
    /// Output length / input length. 2.0 plays twice as long.
    pub ratio: f32,
    pub enabled: bool,
}

impl Default for TimeStretchParams {
    fn default() -> Self {
        Self {
            ratio: 1.0,
            enabled: false,
        }
    }
}

impl TimeStretchParams {
    /// Playback rate implied by these parameters.
    pub fn rate(&self) -> f64 {
        if self.enabled {
            1.0 / self.ratio as f64
        } else {
            1.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseGateParams {
    pub enabled: bool,
    /// 0..1, higher opens the gate for quieter material
    pub sensitivity: f32,
    /// 0..1, attenuation applied while the gate is closed
    pub amount: f32,
}

impl Default for NoiseGateParams {
    fn default() -> Self {
        Self {
            enabled: false,
            sensitivity: 0.5,
            amount: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EffectParameters {
    pub eq: EqParams,
    pub time_stretch: TimeStretchParams,
    pub noise_gate: NoiseGateParams,
}

#[derive(Debug, Clone)]
pub struct EffectParameterStore {
    params: EffectParameters,
    loop_enabled: bool,
}

impl EffectParameterStore {
    pub fn new(loop_enabled: bool) -> Self {
        Self {
            params: EffectParameters::default(),
            loop_enabled,
        }
    }

    pub fn params(&self) -> &EffectParameters {
        &self.params
    }

    pub fn eq(&self) -> &EqParams {
        &self.params.eq
    }

    pub fn time_stretch(&self) -> &TimeStretchParams {
        &self.params.time_stretch
    }

    pub fn noise_gate(&self) -> &NoiseGateParams {
        &self.params.noise_gate
    }

    pub fn effective_rate(&self) -> f64 {
        self.params.time_stretch.rate()
    }

    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled
    }

    /// Returns whether the EQ stage was switched on or off.
    pub fn set_eq(&mut self, eq: EqParams) -> bool {
        let toggled = self.params.eq.enabled != eq.enabled;
        self.params.eq = eq.clamped();
        toggled
    }

    /// Returns whether the effective playback rate changed.
    pub fn set_time_stretch(&mut self, ratio: f32, enabled: bool) -> bool {
        let before = self.effective_rate();
        let ratio = if ratio.is_finite() {
            ratio.clamp(STRETCH_RATIO_MIN, STRETCH_RATIO_MAX)
        } else {
            1.0
        };
        self.params.time_stretch = TimeStretchParams { ratio, enabled };
        (self.effective_rate() - before).abs() > f64::EPSILON
    }

    /// Returns whether the gate stage was switched on or off.
    pub fn set_noise_gate(&mut self, enabled: bool, sensitivity: f32, amount: f32) -> bool {
        let toggled = self.params.noise_gate.enabled != enabled;
        self.params.noise_gate = NoiseGateParams {
            enabled,
            sensitivity: sensitivity.clamp(0.0, 1.0),
            amount: amount.clamp(0.0, 1.0),
        };
        toggled
    }

    pub fn set_loop(&mut self, enabled: bool) {
        self.loop_enabled = enabled;
    }

    /// Back to defaults, keeping the loop flag.
    pub fn reset(&mut self) {
        self.params = EffectParameters::default();
    }
}
