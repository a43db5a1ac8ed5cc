//! Session state: the sample library, per-sample edits and live effects
//!
//! `Session` is the single state container the playback controller is
//! handed. Every mutation goes through a method here, bumps the version
//! counter and is published to subscribers as a `SessionEvent`. Observers
//! (the UI, tests) read events from a channel instead of polling fields.

mod effects;
mod region;
mod registry;

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

pub use effects::{
    EffectParameterStore, EffectParameters, EqBand, EqParams, NoiseGateParams,
    TimeStretchParams, STRETCH_RATIO_MAX, STRETCH_RATIO_MIN,
};
pub use region::{
    equal_spans, onset_spans, Chop, ChopEdge, ChopId, Region, MIN_CHOP_LENGTH,
};
pub use registry::{EditableSampleRegistry, SampleEdits};

use crate::audio::types::AudioData;
use crate::config::Config;
use crate::error::{ProcessingError, SessionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SampleId(pub u64);

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct SampleEntry {
    pub id: SampleId,
    pub name: String,
    pub audio: Option<Arc<AudioData>>,
    /// An offline job is running on this sample
    pub processing: bool,
}

/// Which span the user is editing, and therefore which span plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditMode {
    #[default]
    Region,
    Chops,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionChange {
    SampleAdded(SampleId),
    SampleSelected(SampleId),
    RegionChanged(SampleId),
    ChopsChanged(SampleId),
    ActiveChopChanged(SampleId),
    EditModeChanged(EditMode),
    EffectsChanged,
    EffectsReset,
    LoopChanged(bool),
    ProcessingChanged { sample: SampleId, processing: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub version: u64,
    pub change: SessionChange,
}

/// Offline operations that produce a new sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingKind {
    Crop,
    Normalize,
    TimeStretch,
    Resample,
    /// One new sample per stem
    Separate,
}

impl ProcessingKind {
    pub fn label(&self) -> &'static str {
        match self {
            ProcessingKind::Crop => "cropped",
            ProcessingKind::Normalize => "normalized",
            ProcessingKind::TimeStretch => "stretched",
            ProcessingKind::Resample => "resampled",
            ProcessingKind::Separate => "stems",
        }
    }

    /// The live effect is rendered into the result, so the live parameters
    /// go back to defaults once it lands.
    pub fn bakes_effects(&self) -> bool {
        matches!(self, ProcessingKind::TimeStretch)
    }
}

/// Proof that a sample's processing flag is set. Hand it back to
/// `Session::finish_processing` exactly once.
#[derive(Debug)]
pub struct ProcessingTicket {
    sample: SampleId,
    kind: ProcessingKind,
}

impl ProcessingTicket {
    pub fn sample(&self) -> SampleId {
        self.sample
    }

    pub fn kind(&self) -> ProcessingKind {
        self.kind
    }
}

pub struct Session {
    samples: Vec<SampleEntry>,
    next_sample_id: u64,
    active: Option<SampleId>,
    mode: EditMode,
    registry: EditableSampleRegistry,
    effects: EffectParameterStore,
    base_note: u8,
    version: u64,
    subscribers: Vec<Sender<SessionEvent>>,
}

impl Session {
    pub fn new(config: &Config) -> Self {
        Self {
            samples: Vec::new(),
            next_sample_id: 1,
            active: None,
            mode: EditMode::default(),
            registry: EditableSampleRegistry::new(config.chops.linked),
            effects: EffectParameterStore::new(config.playback.loop_by_default),
            base_note: config.chops.base_note,
            version: 0,
            subscribers: Vec::new(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Observation
    // ─────────────────────────────────────────────────────────────────────

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Receive every change made after this call.
    pub fn subscribe(&mut self) -> Receiver<SessionEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    fn publish(&mut self, change: SessionChange) {
        self.version += 1;
        let event = SessionEvent {
            version: self.version,
            change,
        };
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sample library
    // ─────────────────────────────────────────────────────────────────────

    pub fn samples(&self) -> &[SampleEntry] {
        &self.samples
    }

    pub fn sample(&self, id: SampleId) -> Option<&SampleEntry> {
        self.samples.iter().find(|s| s.id == id)
    }

    fn sample_mut(&mut self, id: SampleId) -> Option<&mut SampleEntry> {
        self.samples.iter_mut().find(|s| s.id == id)
    }

    pub fn active_sample_id(&self) -> Option<SampleId> {
        self.active
    }

    pub fn active_sample(&self) -> Option<&SampleEntry> {
        self.active.and_then(|id| self.sample(id))
    }

    pub fn active_audio(&self) -> Option<&Arc<AudioData>> {
        self.active_sample().and_then(|s| s.audio.as_ref())
    }

    pub fn add_sample(&mut self, name: impl Into<String>, audio: Option<Arc<AudioData>>) -> SampleId {
        let id = SampleId(self.next_sample_id);
        self.next_sample_id += 1;
        self.samples.push(SampleEntry {
            id,
            name: name.into(),
            audio,
            processing: false,
        });
        self.publish(SessionChange::SampleAdded(id));
        id
    }

    /// Make `id` the active sample.
    ///
    /// The previous sample's edits stay as they are, a never-seen sample
    /// gets default edits, and the live effects reset (loop flag kept).
    /// Returns whether the active sample changed. Stopping playback first is
    /// the controller's job.
    pub fn select_sample(&mut self, id: SampleId) -> Result<bool, SessionError> {
        if self.sample(id).is_none() {
            return Err(SessionError::UnknownSample(id));
        }
        if self.active == Some(id) {
            return Ok(false);
        }
        if !self.registry.contains(id) {
            log::debug!("first visit to {id}, starting with a full region");
            self.registry.ensure(id);
        }
        self.active = Some(id);
        self.effects.reset();
        self.publish(SessionChange::SampleSelected(id));
        self.publish(SessionChange::EffectsReset);
        Ok(true)
    }

    pub fn begin_processing(
        &mut self,
        id: SampleId,
        kind: ProcessingKind,
    ) -> Result<ProcessingTicket, SessionError> {
        let entry = self.sample_mut(id).ok_or(SessionError::UnknownSample(id))?;
        if entry.processing {
            return Err(SessionError::SampleBusy(id));
        }
        if entry.audio.is_none() {
            return Err(SessionError::NoAudio(id));
        }
        entry.processing = true;
        self.publish(SessionChange::ProcessingChanged {
            sample: id,
            processing: true,
        });
        Ok(ProcessingTicket { sample: id, kind })
    }

    /// Land the result of an offline job.
    ///
    /// The processing flag is cleared on every path. On success the result
    /// becomes a new sample (the active selection is left alone); on failure
    /// the returned error is the user-facing message.
    pub fn finish_processing(
        &mut self,
        ticket: ProcessingTicket,
        result: Result<AudioData, ProcessingError>,
    ) -> Result<SampleId, String> {
        let label = ticket.kind.label();
        let ids =
            self.finish_processing_outputs(ticket, result.map(|audio| vec![(label.to_string(), audio)]))?;
        ids.first()
            .copied()
            .ok_or_else(|| format!("Could not create {label} sample: no output"))
    }

    /// Land a job with several named outputs. Each becomes a sample called
    /// `"<source> (<output name>)"`, in order.
    pub fn finish_processing_outputs(
        &mut self,
        ticket: ProcessingTicket,
        result: Result<Vec<(String, AudioData)>, ProcessingError>,
    ) -> Result<Vec<SampleId>, String> {
        let name = match self.sample_mut(ticket.sample) {
            Some(entry) => {
                entry.processing = false;
                entry.name.clone()
            }
            None => String::from("sample"),
        };
        self.publish(SessionChange::ProcessingChanged {
            sample: ticket.sample,
            processing: false,
        });

        match result {
            Ok(outputs) => {
                let ids: Vec<SampleId> = outputs
                    .into_iter()
                    .map(|(label, audio)| {
                        self.add_sample(format!("{name} ({label})"), Some(Arc::new(audio)))
                    })
                    .collect();
                if ticket.kind.bakes_effects() {
                    self.effects.reset();
                    self.publish(SessionChange::EffectsReset);
                }
                log::info!(
                    "finish_processing: {} {} -> {:?}",
                    ticket.sample,
                    ticket.kind.label(),
                    ids
                );
                Ok(ids)
            }
            Err(e) => {
                log::warn!(
                    "finish_processing: {} failed on {}: {}",
                    ticket.kind.label(),
                    ticket.sample,
                    e
                );
                Err(format!("Could not create {} sample: {}", ticket.kind.label(), e))
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Editing state of the active sample
    // ─────────────────────────────────────────────────────────────────────

    pub fn registry(&self) -> &EditableSampleRegistry {
        &self.registry
    }

    pub fn edit_mode(&self) -> EditMode {
        self.mode
    }

    /// Returns whether the mode changed.
    pub fn set_edit_mode(&mut self, mode: EditMode) -> bool {
        if self.mode == mode {
            return false;
        }
        self.mode = mode;
        self.publish(SessionChange::EditModeChanged(mode));
        true
    }

    /// The span that governs playback right now: the active chop in chops
    /// mode when one is selected, the sample's region otherwise.
    pub fn boundary(&self) -> Option<Region> {
        let id = self.active?;
        if self.mode == EditMode::Chops {
            if let Some(chop) = self.registry.active_chop(id) {
                return Some(chop.boundary());
            }
        }
        Some(self.registry.region(id))
    }

    /// `Ok(None)` without an active sample, an error when it has no audio.
    fn active_frames(&self) -> Result<Option<(SampleId, usize)>, SessionError> {
        let Some(entry) = self.active_sample() else {
            return Ok(None);
        };
        match &entry.audio {
            Some(audio) => Ok(Some((entry.id, audio.num_frames()))),
            None => Err(SessionError::NoAudio(entry.id)),
        }
    }

    /// Returns whether the region changed. No-op without an active sample.
    pub fn set_region(&mut self, region: Region) -> Result<bool, SessionError> {
        let Some(id) = self.active else {
            return Ok(false);
        };
        let changed = self.registry.set_region(id, region)?;
        if changed {
            self.publish(SessionChange::RegionChanged(id));
        }
        Ok(changed)
    }

    pub fn set_chops(&mut self, chops: Vec<Chop>) -> Result<(), SessionError> {
        let Some((id, frames)) = self.active_frames()? else {
            return Ok(());
        };
        let had_active = self.registry.active_chop_id(id).is_some();
        self.registry.set_chops(id, chops, frames)?;
        self.publish(SessionChange::ChopsChanged(id));
        if had_active {
            self.publish(SessionChange::ActiveChopChanged(id));
        }
        Ok(())
    }

    /// Replace the chops with `count` equal slices of the region.
    pub fn chop_evenly(&mut self, count: usize) -> Result<usize, SessionError> {
        let Some((id, _)) = self.active_frames()? else {
            return Ok(0);
        };
        let spans = equal_spans(self.registry.region(id), count);
        self.replace_chops(&spans)
    }

    /// Replace the chops with slices cut at `onsets` inside the region.
    pub fn chop_at_onsets(&mut self, onsets: &[f64]) -> Result<usize, SessionError> {
        let Some((id, _)) = self.active_frames()? else {
            return Ok(0);
        };
        let spans = onset_spans(self.registry.region(id), onsets);
        self.replace_chops(&spans)
    }

    fn replace_chops(&mut self, spans: &[(f64, f64)]) -> Result<usize, SessionError> {
        let Some((id, frames)) = self.active_frames()? else {
            return Ok(0);
        };
        let had_active = self.registry.active_chop_id(id).is_some();
        let count = self
            .registry
            .replace_with_spans(id, spans, frames, self.base_note)?
            .len();
        self.publish(SessionChange::ChopsChanged(id));
        if had_active {
            self.publish(SessionChange::ActiveChopChanged(id));
        }
        Ok(count)
    }

    /// Returns whether the selection changed. No-op without an active sample.
    pub fn set_active_chop(&mut self, chop: Option<ChopId>) -> Result<bool, SessionError> {
        let Some(id) = self.active else {
            return Ok(false);
        };
        let changed = self.registry.set_active_chop(id, chop)?;
        if changed {
            self.publish(SessionChange::ActiveChopChanged(id));
        }
        Ok(changed)
    }

    pub fn move_chop_edge(
        &mut self,
        chop: ChopId,
        edge: ChopEdge,
        position: f64,
    ) -> Result<(), SessionError> {
        let Some((id, frames)) = self.active_frames()? else {
            return Ok(());
        };
        self.registry.move_chop_edge(id, chop, edge, position, frames)?;
        self.publish(SessionChange::ChopsChanged(id));
        Ok(())
    }

    pub fn set_chops_linked(&mut self, linked: bool) -> Result<(), SessionError> {
        let Some(id) = self.active else {
            return Ok(());
        };
        self.registry.set_chops_linked(id, linked)?;
        self.publish(SessionChange::ChopsChanged(id));
        Ok(())
    }

    pub fn chop_for_note(&self, note: u8) -> Option<ChopId> {
        self.registry.chop_for_note(self.active?, note)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Live effects and loop flag
    // ─────────────────────────────────────────────────────────────────────

    pub fn effects(&self) -> &EffectParameterStore {
        &self.effects
    }

    pub fn loop_enabled(&self) -> bool {
        self.effects.loop_enabled()
    }

    pub fn set_loop(&mut self, enabled: bool) {
        if self.effects.loop_enabled() != enabled {
            self.effects.set_loop(enabled);
            self.publish(SessionChange::LoopChanged(enabled));
        }
    }

    pub fn effective_rate(&self) -> f64 {
        self.effects.effective_rate()
    }

    /// Returns whether the effective rate changed.
    pub fn set_time_stretch(&mut self, ratio: f32, enabled: bool) -> bool {
        let changed = self.effects.set_time_stretch(ratio, enabled);
        self.publish(SessionChange::EffectsChanged);
        changed
    }

    /// Returns whether the EQ stage was switched on or off.
    pub fn set_eq(&mut self, eq: EqParams) -> bool {
        let toggled = self.effects.set_eq(eq);
        self.publish(SessionChange::EffectsChanged);
        toggled
    }

    /// Returns whether the gate stage was switched on or off.
    pub fn set_noise_gate(&mut self, enabled: bool, sensitivity: f32, amount: f32) -> bool {
        let toggled = self.effects.set_noise_gate(enabled, sensitivity, amount);
        self.publish(SessionChange::EffectsChanged);
        toggled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio(frames: usize) -> Option<Arc<AudioData>> {
        Some(Arc::new(AudioData::new(vec![0.0; frames], 1000, 1)))
    }

    fn session() -> Session {
        Session::new(&Config::default())
    }

    #[test]
    fn test_switching_samples_keeps_previous_edits() {
        let mut s = session();
        let a = s.add_sample("a", audio(1000));
        let b = s.add_sample("b", audio(1000));

        s.select_sample(a).unwrap();
        s.set_region(Region::new(0.2, 0.4).unwrap()).unwrap();
        s.chop_evenly(4).unwrap();

        s.select_sample(b).unwrap();
        assert_eq!(s.boundary(), Some(Region::FULL));
        assert!(s.registry().chops(b).is_empty());

        s.select_sample(a).unwrap();
        assert_eq!(s.boundary(), Some(Region::new(0.2, 0.4).unwrap()));
        assert_eq!(s.registry().chops(a).len(), 4);
    }

    #[test]
    fn test_switching_resets_effects_but_not_loop() {
        let mut s = session();
        let a = s.add_sample("a", audio(1000));
        let b = s.add_sample("b", audio(1000));
        s.select_sample(a).unwrap();
        s.set_loop(true);
        s.set_time_stretch(2.0, true);
        s.set_noise_gate(true, 0.7, 0.7);

        s.select_sample(b).unwrap();
        assert_eq!(s.effects().params(), &EffectParameters::default());
        assert!(s.loop_enabled());
    }

    #[test]
    fn test_boundary_follows_mode_and_active_chop() {
        let mut s = session();
        let a = s.add_sample("a", audio(1000));
        s.select_sample(a).unwrap();
        s.chop_evenly(2).unwrap();
        let second = s.registry().chops(a)[1].id;
        s.set_active_chop(Some(second)).unwrap();

        assert_eq!(s.boundary(), Some(Region::FULL));
        s.set_edit_mode(EditMode::Chops);
        assert_eq!(s.boundary(), Some(Region::new(0.5, 1.0).unwrap()));
        s.set_active_chop(None).unwrap();
        assert_eq!(s.boundary(), Some(Region::FULL));
    }

    #[test]
    fn test_mutations_publish_versioned_events() {
        let mut s = session();
        let rx = s.subscribe();
        let a = s.add_sample("a", audio(1000));
        s.select_sample(a).unwrap();
        s.set_loop(true);

        let events: Vec<SessionEvent> = rx.try_iter().collect();
        assert_eq!(events[0].change, SessionChange::SampleAdded(a));
        assert_eq!(events[1].change, SessionChange::SampleSelected(a));
        assert_eq!(events.last().map(|e| &e.change), Some(&SessionChange::LoopChanged(true)));
        assert!(events.windows(2).all(|w| w[1].version == w[0].version + 1));
        assert_eq!(s.version(), events.last().unwrap().version);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let mut s = session();
        let rx = s.subscribe();
        drop(rx);
        s.add_sample("a", None);
        assert!(s.subscribers.is_empty());
    }

    #[test]
    fn test_region_without_active_sample_is_noop() {
        let mut s = session();
        assert_eq!(s.set_region(Region::new(0.1, 0.2).unwrap()), Ok(false));
        assert_eq!(s.boundary(), None);
    }

    #[test]
    fn test_chops_need_audio() {
        let mut s = session();
        let a = s.add_sample("empty", None);
        s.select_sample(a).unwrap();
        assert_eq!(s.chop_evenly(4), Err(SessionError::NoAudio(a)));
    }

    #[test]
    fn test_processing_success_adds_sample_and_keeps_selection() {
        let mut s = session();
        let a = s.add_sample("kick", audio(1000));
        s.select_sample(a).unwrap();
        s.set_time_stretch(2.0, true);

        let ticket = s.begin_processing(a, ProcessingKind::TimeStretch).unwrap();
        assert!(s.sample(a).unwrap().processing);
        assert_eq!(
            s.begin_processing(a, ProcessingKind::Crop).unwrap_err(),
            SessionError::SampleBusy(a)
        );

        let new_id = s
            .finish_processing(ticket, Ok(AudioData::new(vec![0.0; 2000], 1000, 1)))
            .unwrap();
        assert!(!s.sample(a).unwrap().processing);
        assert_eq!(s.sample(new_id).unwrap().name, "kick (stretched)");
        assert_eq!(s.active_sample_id(), Some(a));
        assert_eq!(s.effective_rate(), 1.0);
    }

    #[test]
    fn test_processing_failure_clears_flag_and_reports() {
        let mut s = session();
        let a = s.add_sample("kick", audio(1000));
        s.select_sample(a).unwrap();
        let ticket = s.begin_processing(a, ProcessingKind::Normalize).unwrap();

        let message = s
            .finish_processing(ticket, Err(ProcessingError::Silent))
            .unwrap_err();
        assert!(message.contains("Sample is silent"));
        assert!(!s.sample(a).unwrap().processing);
        assert_eq!(s.samples().len(), 1);
        assert_eq!(s.active_sample_id(), Some(a));
    }

    #[test]
    fn test_stems_land_as_separate_samples() {
        let mut s = session();
        let a = s.add_sample("loop", audio(1000));
        s.select_sample(a).unwrap();
        s.set_time_stretch(2.0, true);
        let ticket = s.begin_processing(a, ProcessingKind::Separate).unwrap();

        let stem = || AudioData::new(vec![0.0; 1000], 1000, 1);
        let ids = s
            .finish_processing_outputs(
                ticket,
                Ok(vec![("vocals".into(), stem()), ("accompaniment".into(), stem())]),
            )
            .unwrap();

        let names: Vec<&str> = ids.iter().map(|id| s.sample(*id).unwrap().name.as_str()).collect();
        assert_eq!(names, ["loop (vocals)", "loop (accompaniment)"]);
        assert!(!s.sample(a).unwrap().processing);
        assert_eq!(s.samples().len(), 3);
        assert_eq!(s.active_sample_id(), Some(a));
        // Separation renders nothing live, so the stretch stays on.
        assert_eq!(s.effective_rate(), 0.5);
    }

    #[test]
    fn test_processing_requires_audio() {
        let mut s = session();
        let a = s.add_sample("empty", None);
        assert_eq!(
            s.begin_processing(a, ProcessingKind::Crop).unwrap_err(),
            SessionError::NoAudio(a)
        );
    }
}
