//! Per-sample editing state: region, chop list and active chop
//!
//! State for a sample is created with defaults (`{0, 1}`, no chops) the
//! first time it is touched and then lives as long as the registry. Reads
//! for a sample that was never touched return the defaults without creating
//! an entry.

use std::collections::HashMap;

use super::region::{self, Chop, ChopEdge, ChopId, Region};
use super::SampleId;
use crate::error::SessionError;

#[derive(Debug, Clone, PartialEq)]
pub struct SampleEdits {
    pub region: Region,
    /// Sorted by start
    pub chops: Vec<Chop>,
    pub active_chop: Option<ChopId>,
    pub chops_linked: bool,
    next_chop_id: u32,
}

impl SampleEdits {
    fn new(chops_linked: bool) -> Self {
        Self {
            region: Region::FULL,
            chops: Vec::new(),
            active_chop: None,
            chops_linked,
            next_chop_id: 1,
        }
    }

    fn allocate_chop_id(&mut self) -> ChopId {
        let id = ChopId(self.next_chop_id);
        self.next_chop_id += 1;
        id
    }
}

#[derive(Debug, Clone)]
pub struct EditableSampleRegistry {
    edits: HashMap<SampleId, SampleEdits>,
    linked_by_default: bool,
}

impl EditableSampleRegistry {
    pub fn new(linked_by_default: bool) -> Self {
        Self {
            edits: HashMap::new(),
            linked_by_default,
        }
    }

    /// Create default state for `sample` if it has none yet.
    pub fn ensure(&mut self, sample: SampleId) -> &mut SampleEdits {
        let linked = self.linked_by_default;
        self.edits
            .entry(sample)
            .or_insert_with(|| SampleEdits::new(linked))
    }

    pub fn contains(&self, sample: SampleId) -> bool {
        self.edits.contains_key(&sample)
    }

    pub fn region(&self, sample: SampleId) -> Region {
        self.edits
            .get(&sample)
            .map(|e| e.region)
            .unwrap_or_default()
    }

    /// Store a new region. Returns whether it differs from the old one.
    pub fn set_region(&mut self, sample: SampleId, region: Region) -> Result<bool, SessionError> {
        let region = Region::new(region.start, region.end)?;
        let edits = self.ensure(sample);
        let changed = edits.region != region;
        edits.region = region;
        Ok(changed)
    }

    pub fn chops(&self, sample: SampleId) -> &[Chop] {
        self.edits
            .get(&sample)
            .map(|e| e.chops.as_slice())
            .unwrap_or(&[])
    }

    /// Replace the chop list wholesale. Clears the active chop.
    pub fn set_chops(
        &mut self,
        sample: SampleId,
        chops: Vec<Chop>,
        total_frames: usize,
    ) -> Result<(), SessionError> {
        let linked = self
            .edits
            .get(&sample)
            .map(|e| e.chops_linked)
            .unwrap_or(self.linked_by_default);
        let chops = region::normalize_chops(chops, linked, total_frames)?;

        let edits = self.ensure(sample);
        let max_id = chops.iter().map(|c| c.id.0).max().unwrap_or(0);
        edits.next_chop_id = edits.next_chop_id.max(max_id + 1);
        edits.chops = chops;
        edits.active_chop = None;
        Ok(())
    }

    /// Build a fresh chop list from spans, numbering keyboard notes upwards
    /// from `base_note`. Clears the active chop.
    pub fn replace_with_spans(
        &mut self,
        sample: SampleId,
        spans: &[(f64, f64)],
        total_frames: usize,
        base_note: u8,
    ) -> Result<&[Chop], SessionError> {
        let edits = self.ensure(sample);
        let mut chops = Vec::with_capacity(spans.len());
        for (i, &(start, end)) in spans.iter().enumerate() {
            let note = base_note.saturating_add(i.min(u8::MAX as usize) as u8).min(127);
            chops.push(Chop::new(edits.allocate_chop_id(), start, end, total_frames, note));
        }
        let linked = edits.chops_linked;
        edits.chops = region::normalize_chops(chops, linked, total_frames)?;
        edits.active_chop = None;
        Ok(&edits.chops)
    }

    pub fn active_chop_id(&self, sample: SampleId) -> Option<ChopId> {
        self.edits.get(&sample).and_then(|e| e.active_chop)
    }

    pub fn active_chop(&self, sample: SampleId) -> Option<&Chop> {
        let edits = self.edits.get(&sample)?;
        let id = edits.active_chop?;
        edits.chops.iter().find(|c| c.id == id)
    }

    /// Select a chop (or none). Returns whether the selection changed.
    pub fn set_active_chop(
        &mut self,
        sample: SampleId,
        chop: Option<ChopId>,
    ) -> Result<bool, SessionError> {
        if let Some(id) = chop {
            if !self.chops(sample).iter().any(|c| c.id == id) {
                return Err(SessionError::UnknownChop(id));
            }
        }
        let edits = self.ensure(sample);
        let changed = edits.active_chop != chop;
        edits.active_chop = chop;
        Ok(changed)
    }

    pub fn chops_linked(&self, sample: SampleId) -> bool {
        self.edits
            .get(&sample)
            .map(|e| e.chops_linked)
            .unwrap_or(self.linked_by_default)
    }

    /// Linking fails when the current list has gaps or overlaps.
    pub fn set_chops_linked(&mut self, sample: SampleId, linked: bool) -> Result<(), SessionError> {
        let edits = self.ensure(sample);
        if linked {
            region::normalize_chops(edits.chops.clone(), true, 0)?;
        }
        edits.chops_linked = linked;
        Ok(())
    }

    pub fn move_chop_edge(
        &mut self,
        sample: SampleId,
        chop: ChopId,
        edge: ChopEdge,
        position: f64,
        total_frames: usize,
    ) -> Result<(), SessionError> {
        let edits = self.ensure(sample);
        let linked = edits.chops_linked;
        region::move_chop_edge(&mut edits.chops, chop, edge, position, linked, total_frames)
    }

    pub fn chop_for_note(&self, sample: SampleId, note: u8) -> Option<ChopId> {
        self.chops(sample)
            .iter()
            .find(|c| c.keyboard_note == note)
            .map(|c| c.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: SampleId = SampleId(1);
    const B: SampleId = SampleId(2);

    #[test]
    fn test_unseen_sample_reads_defaults_without_creating() {
        let reg = EditableSampleRegistry::new(true);
        assert_eq!(reg.region(A), Region::FULL);
        assert!(reg.chops(A).is_empty());
        assert_eq!(reg.active_chop_id(A), None);
        assert!(!reg.contains(A));
    }

    #[test]
    fn test_samples_keep_independent_state() {
        let mut reg = EditableSampleRegistry::new(true);
        reg.set_region(A, Region::new(0.1, 0.6).unwrap()).unwrap();
        reg.set_region(B, Region::new(0.3, 0.4).unwrap()).unwrap();
        assert_eq!(reg.region(A), Region::new(0.1, 0.6).unwrap());
        assert_eq!(reg.region(B), Region::new(0.3, 0.4).unwrap());
    }

    #[test]
    fn test_set_region_reports_change() {
        let mut reg = EditableSampleRegistry::new(true);
        let r = Region::new(0.2, 0.8).unwrap();
        assert!(reg.set_region(A, r).unwrap());
        assert!(!reg.set_region(A, r).unwrap());
    }

    #[test]
    fn test_set_region_rejects_invalid() {
        let mut reg = EditableSampleRegistry::new(true);
        let bad = Region { start: 0.7, end: 0.3 };
        assert!(reg.set_region(A, bad).is_err());
        assert_eq!(reg.region(A), Region::FULL);
    }

    #[test]
    fn test_replacing_chops_clears_active_chop() {
        let mut reg = EditableSampleRegistry::new(true);
        let spans = region::equal_spans(Region::FULL, 4);
        let first = reg.replace_with_spans(A, &spans, 1000, 36).unwrap()[0].id;
        reg.set_active_chop(A, Some(first)).unwrap();
        assert_eq!(reg.active_chop(A).map(|c| c.id), Some(first));

        reg.replace_with_spans(A, &spans, 1000, 36).unwrap();
        assert_eq!(reg.active_chop_id(A), None);
    }

    #[test]
    fn test_generated_chops_get_fresh_ids_and_notes() {
        let mut reg = EditableSampleRegistry::new(true);
        let spans = region::equal_spans(Region::FULL, 2);
        let ids: Vec<ChopId> = reg
            .replace_with_spans(A, &spans, 1000, 60)
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        let again: Vec<ChopId> = reg
            .replace_with_spans(A, &spans, 1000, 60)
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert!(ids.iter().all(|id| !again.contains(id)));
        assert_eq!(reg.chop_for_note(A, 61), Some(again[1]));
    }

    #[test]
    fn test_select_unknown_chop_fails() {
        let mut reg = EditableSampleRegistry::new(true);
        assert_eq!(
            reg.set_active_chop(A, Some(ChopId(3))),
            Err(SessionError::UnknownChop(ChopId(3)))
        );
    }

    #[test]
    fn test_linking_gapped_chops_fails() {
        let mut reg = EditableSampleRegistry::new(false);
        let chops = vec![
            Chop::new(ChopId(1), 0.0, 0.3, 100, 36),
            Chop::new(ChopId(2), 0.5, 1.0, 100, 37),
        ];
        reg.set_chops(A, chops, 100).unwrap();
        assert!(reg.set_chops_linked(A, true).is_err());
        assert!(!reg.chops_linked(A));
    }
}
