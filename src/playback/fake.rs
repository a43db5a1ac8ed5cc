//! Deterministic in-memory backend for playback tests
//!
//! The clock only moves when a test moves it. A one-shot source ends by
//! itself once the clock passes its effective length, like the real engine.

use std::sync::Arc;

use super::backend::{AudioBackend, PlayRequest};
use crate::audio::types::AudioData;
use crate::session::EqParams;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayCall {
    pub at: f64,
    pub request: PlayRequest,
    pub buffer_duration: f64,
}

impl PlayCall {
    /// Buffer seconds where playback started.
    pub fn start_seconds(&self) -> f64 {
        self.request.start * self.buffer_duration
    }

    fn ends_at(&self) -> f64 {
        let span = (self.request.end - self.request.start) * self.buffer_duration;
        self.at + span / self.request.rate
    }
}

#[derive(Debug, Default)]
pub struct FakeBackend {
    now: f64,
    active: Option<PlayCall>,
    pub plays: Vec<PlayCall>,
    pub stops: usize,
    /// `play` calls made while a source was still active
    pub overlaps: usize,
    notifications: bool,
    ended_pending: bool,
    pub natural_ends: usize,
    pub eq: Option<EqParams>,
    pub gate: Option<(bool, f32, f32)>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            notifications: true,
            ..Self::default()
        }
    }

    pub fn last_play(&self) -> Option<&PlayCall> {
        self.plays.last()
    }

    /// Move the clock forward, ending a one-shot source whose span ran out.
    pub fn advance(&mut self, seconds: f64) {
        self.set_now(self.now + seconds);
    }

    pub fn set_now(&mut self, now: f64) {
        self.now = now;
        if let Some(call) = self.active {
            if !call.request.looping && now >= call.ends_at() {
                self.active = None;
                if self.notifications {
                    self.ended_pending = true;
                    self.natural_ends += 1;
                }
            }
        }
    }
}

impl AudioBackend for FakeBackend {
    fn play(&mut self, audio: &Arc<AudioData>, request: PlayRequest) {
        if self.active.is_some() {
            self.overlaps += 1;
        }
        let call = PlayCall {
            at: self.now,
            request,
            buffer_duration: audio.duration,
        };
        self.active = Some(call);
        self.plays.push(call);
    }

    fn stop(&mut self, _fade_out: bool) {
        self.stops += 1;
        self.active = None;
    }

    fn set_end_notifications(&mut self, enabled: bool) {
        self.notifications = enabled;
        if !enabled {
            self.ended_pending = false;
        }
    }

    fn poll_natural_end(&mut self) -> bool {
        std::mem::take(&mut self.ended_pending)
    }

    fn now(&self) -> f64 {
        self.now
    }

    fn source_started_at(&self) -> Option<f64> {
        self.active.map(|c| c.at)
    }

    fn source_rate(&self) -> Option<f64> {
        self.active.map(|c| c.request.rate)
    }

    fn is_active(&self) -> bool {
        self.active.is_some()
    }

    fn set_eq(&mut self, eq: &EqParams) {
        self.eq = Some(*eq);
    }

    fn set_noise_gate(&mut self, enabled: bool, sensitivity: f32, amount: f32) {
        self.gate = Some((enabled, sensitivity, amount));
    }
}
