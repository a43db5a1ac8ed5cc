//! Playback controller
//!
//! The façade the UI talks to and the only caller of the audio backend.
//! It owns the session state, forwards edits to it, and decides after each
//! edit whether the sounding source must be restarted:
//!
//! - Stopped: edits only change state; the next `play` picks them up.
//! - Playing / RestartPending: a change to the boundary, the effective rate
//!   or the processing chain stops the source and schedules one restart.
//!
//! ```text
//! Stopped ──play──▶ Playing ──change──▶ RestartPending ──grace──▶ Playing
//!    ▲                 │ natural end (loop off)      ▲ change (reschedule)
//!    └──────stop───────┴─────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use super::backend::{AudioBackend, PlayRequest};
use super::clock::{self, ActiveSource, PlaybackTime};
use super::coordinator::{RestartCause, RestartCoordinator, RestartPlan};
use crate::audio::types::{AudioData, PlaybackStatus};
use crate::config::PlaybackConfig;
use crate::error::{ProcessingError, SessionError};
use crate::session::{
    Chop, ChopEdge, ChopId, EditMode, EqParams, ProcessingKind, ProcessingTicket, Region,
    SampleId, Session,
};

pub struct PlaybackController<B: AudioBackend> {
    backend: B,
    session: Session,
    coordinator: RestartCoordinator,
    status: PlaybackStatus,
    /// The source we started and have not stopped, if any
    source: Option<ActiveSource>,
    fade_out: bool,
    /// Last readout while Playing, held through a pending restart
    last_time: PlaybackTime,
}

impl<B: AudioBackend> PlaybackController<B> {
    pub fn new(backend: B, session: Session, config: &PlaybackConfig) -> Self {
        let mut controller = Self {
            backend,
            session,
            coordinator: RestartCoordinator::new(config.grace_delay()),
            status: PlaybackStatus::Stopped,
            source: None,
            fade_out: config.fade_out_on_stop,
            last_time: PlaybackTime::default(),
        };
        controller.push_live_effects();
        controller
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn is_playing(&self) -> bool {
        self.status != PlaybackStatus::Stopped
    }

    /// Time until a pending restart is due.
    pub fn restart_due_in(&self) -> Option<Duration> {
        self.coordinator.remaining(self.backend.now())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────────────

    /// Play the governing boundary from its start.
    pub fn play(&mut self) {
        let (Some(audio), Some(boundary)) =
            (self.session.active_audio().cloned(), self.session.boundary())
        else {
            log::debug!("play: no active sample with audio, ignoring");
            return;
        };
        self.coordinator.cancel();
        if self.source.is_some() || self.backend.is_active() {
            self.backend.stop(false);
            self.source = None;
        }
        let looping = self.session.loop_enabled();
        let rate = self.session.effective_rate();
        self.start_source(&audio, boundary, 0.0, looping, rate);
    }

    pub fn stop(&mut self) {
        self.coordinator.cancel();
        self.backend.stop(self.fade_out);
        self.backend.set_end_notifications(true);
        self.source = None;
        self.status = PlaybackStatus::Stopped;
        self.last_time = self.idle_time();
    }

    /// Flip the global loop flag.
    ///
    /// Turning loop off under a looping source restarts a single pass from
    /// where the audio is now; the backend would otherwise loop forever.
    /// Turning it on takes effect at the next natural end or restart.
    pub fn toggle_loop(&mut self) {
        let enabled = !self.session.loop_enabled();
        self.session.set_loop(enabled);
        if enabled {
            return;
        }
        match self.status {
            PlaybackStatus::Playing if self.source.is_some_and(|s| s.looping) => {
                self.request_restart(RestartCause::LoopDisabled);
            }
            PlaybackStatus::RestartPending => {
                self.request_restart(RestartCause::LoopDisabled);
            }
            _ => {}
        }
    }

    /// A one-shot source reached its end.
    pub fn on_backend_playback_ended(&mut self) {
        if self.status != PlaybackStatus::Playing {
            log::debug!("playback ended: ignored while {:?}", self.status);
            return;
        }
        self.source = None;
        if self.session.loop_enabled() {
            self.status = PlaybackStatus::RestartPending;
            let now = self.backend.now();
            self.coordinator.schedule(RestartCause::NaturalEnd, now, None);
        } else {
            self.status = PlaybackStatus::Stopped;
            self.last_time = self.idle_time();
        }
    }

    /// Per-frame work: pick up natural ends, fire a due restart, and
    /// return the time readout.
    pub fn tick(&mut self) -> PlaybackTime {
        if self.backend.poll_natural_end() {
            self.on_backend_playback_ended();
        }
        self.fire_due_restart();
        let time = self.playback_time();
        if self.status == PlaybackStatus::Playing {
            self.last_time = time;
        }
        time
    }

    /// Run the pending restart if its grace delay has passed.
    pub fn fire_due_restart(&mut self) -> bool {
        let now = self.backend.now();
        match self.coordinator.poll(now) {
            Some(plan) => {
                self.fire_restart(plan);
                true
            }
            None => false,
        }
    }

    pub fn playback_time(&self) -> PlaybackTime {
        match (self.status, &self.source) {
            (PlaybackStatus::Playing, Some(src)) => src.time(self.backend.now()),
            (PlaybackStatus::RestartPending, _) => self.last_time,
            _ => self.idle_time(),
        }
    }

    /// Normalized playhead within the whole buffer, for the waveform.
    pub fn playhead(&self) -> Option<f64> {
        let src = self.source.as_ref()?;
        if self.status != PlaybackStatus::Playing || src.buffer_duration <= 0.0 {
            return None;
        }
        let pos = src.position(self.backend.now());
        Some(src.boundary.start + pos / src.buffer_duration)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Boundary edits
    // ─────────────────────────────────────────────────────────────────────

    pub fn apply_region_change(&mut self, region: Region) -> Result<(), SessionError> {
        self.edit_boundary(|s| s.set_region(region).map(|_| ()))
    }

    pub fn apply_chop_selection(&mut self, chop: Option<ChopId>) -> Result<(), SessionError> {
        self.edit_boundary(|s| s.set_active_chop(chop).map(|_| ()))
    }

    pub fn set_edit_mode(&mut self, mode: EditMode) {
        // Mode changes cannot fail.
        let _ = self.edit_boundary(|s| {
            s.set_edit_mode(mode);
            Ok(())
        });
    }

    pub fn set_chops(&mut self, chops: Vec<Chop>) -> Result<(), SessionError> {
        self.edit_boundary(|s| s.set_chops(chops))
    }

    pub fn chop_evenly(&mut self, count: usize) -> Result<usize, SessionError> {
        self.edit_boundary(|s| s.chop_evenly(count))
    }

    pub fn chop_at_onsets(&mut self, onsets: &[f64]) -> Result<usize, SessionError> {
        self.edit_boundary(|s| s.chop_at_onsets(onsets))
    }

    pub fn move_chop_edge(
        &mut self,
        chop: ChopId,
        edge: ChopEdge,
        position: f64,
    ) -> Result<(), SessionError> {
        self.edit_boundary(|s| s.move_chop_edge(chop, edge, position))
    }

    pub fn set_chops_linked(&mut self, linked: bool) -> Result<(), SessionError> {
        self.edit_boundary(|s| s.set_chops_linked(linked))
    }

    /// Select the chop mapped to `note` and play it from its start.
    /// While something is sounding the switch goes through the restart
    /// path. Returns false when no chop carries that note.
    pub fn trigger_note(&mut self, note: u8) -> bool {
        let Some(chop) = self.session.chop_for_note(note) else {
            return false;
        };
        self.session.set_edit_mode(EditMode::Chops);
        if self.session.set_active_chop(Some(chop)).is_err() {
            return false;
        }
        if self.is_playing() {
            self.request_restart(RestartCause::BoundaryChanged);
        } else {
            self.play();
        }
        true
    }

    fn edit_boundary<T>(
        &mut self,
        edit: impl FnOnce(&mut Session) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        let before = self.session.boundary();
        let out = edit(&mut self.session)?;
        if self.session.boundary() != before {
            self.request_restart(RestartCause::BoundaryChanged);
        }
        Ok(out)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Live effects
    // ─────────────────────────────────────────────────────────────────────

    pub fn set_time_stretch(&mut self, ratio: f32, enabled: bool) {
        if self.session.set_time_stretch(ratio, enabled) {
            self.request_restart(RestartCause::RateChanged);
        }
    }

    /// Gains and frequencies apply live; switching the stage restarts.
    pub fn set_eq(&mut self, eq: EqParams) {
        let toggled = self.session.set_eq(eq);
        self.backend.set_eq(self.session.effects().eq());
        if toggled {
            self.request_restart(RestartCause::ChainChanged);
        }
    }

    /// Sensitivity and amount apply live; switching the stage restarts.
    pub fn set_noise_gate(&mut self, enabled: bool, sensitivity: f32, amount: f32) {
        let toggled = self.session.set_noise_gate(enabled, sensitivity, amount);
        let gate = *self.session.effects().noise_gate();
        self.backend
            .set_noise_gate(gate.enabled, gate.sensitivity, gate.amount);
        if toggled {
            self.request_restart(RestartCause::ChainChanged);
        }
    }

    fn push_live_effects(&mut self) {
        let effects = *self.session.effects().params();
        self.backend.set_eq(&effects.eq);
        self.backend.set_noise_gate(
            effects.noise_gate.enabled,
            effects.noise_gate.sensitivity,
            effects.noise_gate.amount,
        );
    }

    // ─────────────────────────────────────────────────────────────────────
    // Samples
    // ─────────────────────────────────────────────────────────────────────

    pub fn add_sample(&mut self, name: impl Into<String>, audio: Option<Arc<AudioData>>) -> SampleId {
        self.session.add_sample(name, audio)
    }

    /// Switch the active sample, stopping playback first.
    pub fn select_sample(&mut self, id: SampleId) -> Result<bool, SessionError> {
        if self.session.sample(id).is_none() {
            return Err(SessionError::UnknownSample(id));
        }
        if self.session.active_sample_id() == Some(id) {
            return Ok(false);
        }
        if self.is_playing() || self.backend.is_active() {
            self.stop();
        }
        let switched = self.session.select_sample(id)?;
        self.push_live_effects();
        self.last_time = self.idle_time();
        Ok(switched)
    }

    pub fn begin_processing(
        &mut self,
        id: SampleId,
        kind: ProcessingKind,
    ) -> Result<ProcessingTicket, SessionError> {
        self.session.begin_processing(id, kind)
    }

    /// Land an offline job. Baking resets the live effects, which restarts
    /// the sounding source if that changes the rate or the chain.
    pub fn finish_processing(
        &mut self,
        ticket: ProcessingTicket,
        result: Result<AudioData, ProcessingError>,
    ) -> Result<SampleId, String> {
        self.land(|session| session.finish_processing(ticket, result))
    }

    /// Land a job with several outputs, such as stem separation.
    pub fn finish_processing_outputs(
        &mut self,
        ticket: ProcessingTicket,
        result: Result<Vec<(String, AudioData)>, ProcessingError>,
    ) -> Result<Vec<SampleId>, String> {
        self.land(|session| session.finish_processing_outputs(ticket, result))
    }

    fn land<T>(&mut self, finish: impl FnOnce(&mut Session) -> T) -> T {
        let before = *self.session.effects().params();
        let outcome = finish(&mut self.session);
        let after = *self.session.effects().params();
        if after != before {
            self.push_live_effects();
            let rate_changed = after.time_stretch.rate() != before.time_stretch.rate();
            let chain_changed = after.eq.enabled != before.eq.enabled
                || after.noise_gate.enabled != before.noise_gate.enabled;
            if rate_changed {
                self.request_restart(RestartCause::RateChanged);
            } else if chain_changed {
                self.request_restart(RestartCause::ChainChanged);
            }
        }
        outcome
    }

    // ─────────────────────────────────────────────────────────────────────
    // Restart plumbing
    // ─────────────────────────────────────────────────────────────────────

    /// Stop the sounding source and (re)schedule the single restart.
    fn request_restart(&mut self, cause: RestartCause) {
        if self.status == PlaybackStatus::Stopped {
            return;
        }
        let now = self.backend.now();
        if self.status == PlaybackStatus::Playing {
            self.last_time = self.playback_time();
        }
        self.coordinator.schedule(cause, now, self.source.as_ref());
        if self.source.is_some() || self.backend.is_active() {
            self.backend.set_end_notifications(false);
            self.backend.stop(self.fade_out);
        }
        self.source = None;
        self.status = PlaybackStatus::RestartPending;
    }

    /// Start again with whatever the session says now.
    fn fire_restart(&mut self, plan: RestartPlan) {
        let (Some(audio), Some(boundary)) =
            (self.session.active_audio().cloned(), self.session.boundary())
        else {
            log::debug!("restart: nothing to play any more, stopping");
            self.stop();
            return;
        };
        let looping = self.session.loop_enabled();
        let rate = self.session.effective_rate();
        let boundary_seconds = boundary.seconds(audio.duration);

        let offset = match plan.resume_offset {
            Some(offset) if !looping => offset.clamp(0.0, boundary_seconds),
            _ => 0.0,
        };
        if offset >= boundary_seconds {
            log::debug!("restart: resume point at boundary end, stopping");
            self.stop();
            return;
        }

        self.start_source(&audio, boundary, offset, looping, rate);
    }

    fn start_source(
        &mut self,
        audio: &Arc<AudioData>,
        boundary: Region,
        offset: f64,
        looping: bool,
        rate: f64,
    ) {
        if self.backend.is_active() {
            log::warn!("restart: a source is still active before play, stopping it again");
            self.backend.stop(false);
        }

        let start = if audio.duration > 0.0 {
            boundary.start + offset / audio.duration
        } else {
            boundary.start
        };
        self.backend.play(
            audio,
            PlayRequest {
                start,
                end: boundary.end,
                looping,
                rate,
            },
        );
        self.backend.set_end_notifications(true);

        let now = self.backend.now();
        self.source = Some(ActiveSource {
            started_at: self.backend.source_started_at().unwrap_or(now),
            rate: self.backend.source_rate().unwrap_or(rate),
            boundary,
            buffer_duration: audio.duration,
            looping,
            offset,
        });
        self.status = PlaybackStatus::Playing;
        log::debug!(
            "play: {:.4}..{:.4} loop={} rate={:.3}",
            start,
            boundary.end,
            looping,
            rate
        );
    }

    fn idle_time(&self) -> PlaybackTime {
        match (self.session.active_audio(), self.session.boundary()) {
            (Some(audio), Some(boundary)) => {
                clock::idle_time(boundary, audio.duration, self.session.effective_rate())
            }
            _ => PlaybackTime::default(),
        }
    }
}
