//! The audio backend contract consumed by the playback controller
//!
//! The primitive is deliberately poor: it cannot seek, change rate in place
//! or pause. It can start a span of a buffer (optionally looping) and stop
//! whatever is playing. Everything else is built on top in the controller.

use std::sync::Arc;

use crate::audio::types::AudioData;
use crate::session::EqParams;

/// One playback request: a normalized span at a fixed rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayRequest {
    pub start: f64,
    pub end: f64,
    pub looping: bool,
    pub rate: f64,
}

pub trait AudioBackend {
    /// Start playing `audio` between the normalized positions of `request`.
    fn play(&mut self, audio: &Arc<AudioData>, request: PlayRequest);

    /// Halt the active source, optionally with a short fade.
    fn stop(&mut self, fade_out: bool);

    /// Gate natural-end notifications. Disabled while a restart is in
    /// flight so the stopped source cannot report an end.
    fn set_end_notifications(&mut self, enabled: bool);

    /// True once for each non-looping source that reached its end while
    /// notifications were enabled.
    fn poll_natural_end(&mut self) -> bool;

    /// Backend clock in seconds.
    fn now(&self) -> f64;

    /// Backend time at which the active source started.
    fn source_started_at(&self) -> Option<f64>;

    /// Rate of the active source.
    fn source_rate(&self) -> Option<f64>;

    fn is_active(&self) -> bool;

    /// Live parameter push; applies to the running source.
    fn set_eq(&mut self, eq: &EqParams);

    /// Live parameter push; applies to the running source.
    fn set_noise_gate(&mut self, enabled: bool, sensitivity: f32, amount: f32);
}
