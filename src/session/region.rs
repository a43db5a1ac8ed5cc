//! Regions, chops and the chop editing tools
//!
//! All positions are fractions of the sample's total duration. Chops also
//! carry the same boundaries in frames; those are recomputed from the
//! fractions whenever the list is stored so the two never drift apart.

use std::fmt;

use crate::error::SessionError;

/// Smallest chop length a drag may shrink a chop to
pub const MIN_CHOP_LENGTH: f64 = 0.001;

/// Tolerance when checking that linked chops touch
const CONTIGUITY_EPSILON: f64 = 1e-9;

/// A playable span `{start, end}` with `0 <= start < end <= 1`.
///
/// Used both for the per-sample region and for the boundary currently
/// governing playback (region or active chop).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub start: f64,
    pub end: f64,
}

impl Default for Region {
    fn default() -> Self {
        Self::FULL
    }
}

impl Region {
    pub const FULL: Region = Region { start: 0.0, end: 1.0 };

    /// Clamp both ends into [0, 1], then reject empty or reversed spans.
    pub fn new(start: f64, end: f64) -> Result<Self, SessionError> {
        if !start.is_finite() || !end.is_finite() {
            return Err(SessionError::InvalidRegion { start, end });
        }
        let (s, e) = (start.clamp(0.0, 1.0), end.clamp(0.0, 1.0));
        if s >= e {
            return Err(SessionError::InvalidRegion { start, end });
        }
        Ok(Self { start: s, end: e })
    }

    pub fn length(&self) -> f64 {
        self.end - self.start
    }

    /// Length in buffer seconds for a buffer of `buffer_duration` seconds.
    pub fn seconds(&self, buffer_duration: f64) -> f64 {
        self.length() * buffer_duration
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChopId(pub u32);

impl fmt::Display for ChopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One independently playable sub-span of a sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Chop {
    pub id: ChopId,
    pub start: f64,
    pub end: f64,
    pub start_frame: usize,
    pub end_frame: usize,
    /// MIDI note that triggers this chop from the keyboard
    pub keyboard_note: u8,
}

impl Chop {
    pub fn new(id: ChopId, start: f64, end: f64, total_frames: usize, keyboard_note: u8) -> Self {
        let mut chop = Self {
            id,
            start,
            end,
            start_frame: 0,
            end_frame: 0,
            keyboard_note,
        };
        chop.sync_frames(total_frames);
        chop
    }

    pub fn boundary(&self) -> Region {
        Region {
            start: self.start,
            end: self.end,
        }
    }

    pub fn sync_frames(&mut self, total_frames: usize) {
        self.start_frame = frame_for(self.start, total_frames);
        self.end_frame = frame_for(self.end, total_frames);
    }
}

fn frame_for(position: f64, total_frames: usize) -> usize {
    (position * total_frames as f64).round() as usize
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChopEdge {
    Start,
    End,
}

/// Sort, validate and re-derive frames for a chop list.
///
/// Linked lists must be contiguous: each chop ends exactly where the next
/// one starts.
pub fn normalize_chops(
    mut chops: Vec<Chop>,
    linked: bool,
    total_frames: usize,
) -> Result<Vec<Chop>, SessionError> {
    for chop in &chops {
        let valid = chop.start.is_finite()
            && chop.end.is_finite()
            && chop.start >= 0.0
            && chop.end <= 1.0
            && chop.start < chop.end;
        if !valid {
            return Err(SessionError::InvalidChop {
                id: chop.id,
                start: chop.start,
                end: chop.end,
            });
        }
    }

    chops.sort_by(|a, b| a.start.total_cmp(&b.start));

    if linked {
        for pair in chops.windows(2) {
            if (pair[0].end - pair[1].start).abs() > CONTIGUITY_EPSILON {
                return Err(SessionError::ChopsNotContiguous {
                    left: pair[0].id,
                    right: pair[1].id,
                });
            }
        }
    }

    for chop in &mut chops {
        chop.sync_frames(total_frames);
    }
    Ok(chops)
}

/// Split `region` into `count` equal, contiguous spans.
pub fn equal_spans(region: Region, count: usize) -> Vec<(f64, f64)> {
    let count = count.max(1);
    let step = region.length() / count as f64;
    (0..count)
        .map(|i| {
            let start = region.start + step * i as f64;
            let end = if i + 1 == count {
                region.end
            } else {
                region.start + step * (i + 1) as f64
            };
            (start, end)
        })
        .collect()
}

/// Split `region` at every onset strictly inside it.
///
/// Onsets closer than `MIN_CHOP_LENGTH` to a previous cut are dropped.
pub fn onset_spans(region: Region, onsets: &[f64]) -> Vec<(f64, f64)> {
    let mut cuts: Vec<f64> = onsets
        .iter()
        .copied()
        .filter(|&o| o > region.start && o < region.end)
        .collect();
    cuts.sort_by(f64::total_cmp);

    let mut spans = Vec::with_capacity(cuts.len() + 1);
    let mut start = region.start;
    for cut in cuts {
        if cut - start < MIN_CHOP_LENGTH || region.end - cut < MIN_CHOP_LENGTH {
            continue;
        }
        spans.push((start, cut));
        start = cut;
    }
    spans.push((start, region.end));
    spans
}

/// Move one edge of chop `id` to `position`.
///
/// The edge is clamped so the chop keeps at least `MIN_CHOP_LENGTH`. When
/// linked, the neighbour sharing the edge moves with it and is kept at
/// least `MIN_CHOP_LENGTH` long as well. `chops` must be sorted by start
/// and stays sorted: an unlinked chop dragged past its neighbour is moved
/// to its new place in the list, keeping its id and note.
pub fn move_chop_edge(
    chops: &mut [Chop],
    id: ChopId,
    edge: ChopEdge,
    position: f64,
    linked: bool,
    total_frames: usize,
) -> Result<(), SessionError> {
    let idx = chops
        .iter()
        .position(|c| c.id == id)
        .ok_or(SessionError::UnknownChop(id))?;
    if !position.is_finite() {
        let chop = &chops[idx];
        let (start, end) = match edge {
            ChopEdge::Start => (position, chop.end),
            ChopEdge::End => (chop.start, position),
        };
        return Err(SessionError::InvalidChop { id, start, end });
    }

    match edge {
        ChopEdge::Start => {
            let lower = match (linked, idx.checked_sub(1)) {
                (true, Some(prev)) => chops[prev].start + MIN_CHOP_LENGTH,
                _ => 0.0,
            };
            let upper = chops[idx].end - MIN_CHOP_LENGTH;
            let pos = position.clamp(lower, upper.max(lower));
            chops[idx].start = pos;
            chops[idx].sync_frames(total_frames);
            if linked && idx > 0 {
                chops[idx - 1].end = pos;
                chops[idx - 1].sync_frames(total_frames);
            }
        }
        ChopEdge::End => {
            let next = idx + 1;
            let upper = if linked && next < chops.len() {
                chops[next].end - MIN_CHOP_LENGTH
            } else {
                1.0
            };
            let lower = chops[idx].start + MIN_CHOP_LENGTH;
            let pos = position.clamp(lower.min(upper), upper);
            chops[idx].end = pos;
            chops[idx].sync_frames(total_frames);
            if linked && next < chops.len() {
                chops[next].start = pos;
                chops[next].sync_frames(total_frames);
            }
        }
    }
    if !linked {
        chops.sort_by(|a, b| a.start.total_cmp(&b.start));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chop(id: u32, start: f64, end: f64) -> Chop {
        Chop::new(ChopId(id), start, end, 1000, 36 + id as u8)
    }

    #[test]
    fn test_region_rejects_reversed_and_clamps() {
        assert!(Region::new(0.5, 0.5).is_err());
        assert!(Region::new(0.8, 0.2).is_err());
        assert!(Region::new(f64::NAN, 0.2).is_err());
        assert_eq!(Region::new(-0.5, 1.5).unwrap(), Region::FULL);
    }

    #[test]
    fn test_chop_frames_follow_fractions() {
        let c = Chop::new(ChopId(1), 0.25, 0.5, 48_000, 36);
        assert_eq!(c.start_frame, 12_000);
        assert_eq!(c.end_frame, 24_000);
    }

    #[test]
    fn test_normalize_sorts_and_checks_contiguity() {
        let chops = vec![chop(2, 0.5, 1.0), chop(1, 0.0, 0.5)];
        let sorted = normalize_chops(chops, true, 1000).unwrap();
        assert_eq!(sorted[0].id, ChopId(1));

        let gap = vec![chop(1, 0.0, 0.4), chop(2, 0.5, 1.0)];
        assert_eq!(
            normalize_chops(gap.clone(), true, 1000),
            Err(SessionError::ChopsNotContiguous {
                left: ChopId(1),
                right: ChopId(2)
            })
        );
        assert!(normalize_chops(gap, false, 1000).is_ok());
    }

    #[test]
    fn test_normalize_rejects_empty_chop() {
        let chops = vec![chop(1, 0.3, 0.3)];
        assert!(matches!(
            normalize_chops(chops, false, 1000),
            Err(SessionError::InvalidChop { .. })
        ));
    }

    #[test]
    fn test_normalize_resyncs_frames_for_new_length() {
        let chops = vec![chop(1, 0.0, 0.5)];
        let resynced = normalize_chops(chops, false, 2000).unwrap();
        assert_eq!(resynced[0].end_frame, 1000);
    }

    #[test]
    fn test_equal_spans_cover_region() {
        let spans = equal_spans(Region::new(0.2, 0.8).unwrap(), 3);
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0].0, 0.2);
        assert_eq!(spans[2].1, 0.8);
        assert_eq!(spans[0].1, spans[1].0);
        assert_eq!(spans[1].1, spans[2].0);
    }

    #[test]
    fn test_onset_spans_ignore_outside_and_close_onsets() {
        let spans = onset_spans(Region::FULL, &[0.5, 0.25, 1.5, 0.2505, 0.0]);
        assert_eq!(spans, vec![(0.0, 0.25), (0.25, 0.5), (0.5, 1.0)]);
    }

    #[test]
    fn test_move_linked_edge_drags_neighbour() {
        let mut chops = vec![chop(1, 0.0, 0.5), chop(2, 0.5, 1.0)];
        move_chop_edge(&mut chops, ChopId(2), ChopEdge::Start, 0.4, true, 1000).unwrap();
        assert_eq!(chops[0].end, 0.4);
        assert_eq!(chops[1].start, 0.4);
        assert_eq!(chops[0].end_frame, 400);
    }

    #[test]
    fn test_move_linked_edge_clamped_by_neighbour() {
        let mut chops = vec![chop(1, 0.0, 0.5), chop(2, 0.5, 1.0)];
        move_chop_edge(&mut chops, ChopId(1), ChopEdge::End, 2.0, true, 1000).unwrap();
        assert!((chops[0].end - (1.0 - MIN_CHOP_LENGTH)).abs() < 1e-12);
        assert_eq!(chops[1].start, chops[0].end);
    }

    #[test]
    fn test_move_unlinked_edge_leaves_neighbour() {
        let mut chops = vec![chop(1, 0.0, 0.5), chop(2, 0.5, 1.0)];
        move_chop_edge(&mut chops, ChopId(1), ChopEdge::End, 0.7, false, 1000).unwrap();
        assert_eq!(chops[0].end, 0.7);
        assert_eq!(chops[1].start, 0.5);
    }

    #[test]
    fn test_move_unknown_chop() {
        let mut chops = vec![chop(1, 0.0, 1.0)];
        assert_eq!(
            move_chop_edge(&mut chops, ChopId(9), ChopEdge::End, 0.5, true, 1000),
            Err(SessionError::UnknownChop(ChopId(9)))
        );
    }

    #[test]
    fn test_move_edge_rejects_non_finite_position() {
        let mut chops = vec![chop(1, 0.0, 0.5), chop(2, 0.5, 1.0)];
        let before = chops.clone();
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = move_chop_edge(&mut chops, ChopId(1), ChopEdge::End, bad, true, 1000);
            assert!(matches!(err, Err(SessionError::InvalidChop { id: ChopId(1), .. })));
            let err = move_chop_edge(&mut chops, ChopId(2), ChopEdge::Start, bad, false, 1000);
            assert!(err.is_err());
        }
        assert_eq!(chops, before);
    }

    #[test]
    fn test_unlinked_move_keeps_list_sorted_by_start() {
        let mut chops = vec![chop(1, 0.0, 0.5), chop(2, 0.5, 1.0)];
        move_chop_edge(&mut chops, ChopId(1), ChopEdge::End, 0.9, false, 1000).unwrap();
        move_chop_edge(&mut chops, ChopId(1), ChopEdge::Start, 0.8, false, 1000).unwrap();

        let ids: Vec<ChopId> = chops.iter().map(|c| c.id).collect();
        assert_eq!(ids, [ChopId(2), ChopId(1)]);
        assert!(chops.windows(2).all(|w| w[0].start <= w[1].start));
        assert_eq!(chops[1].keyboard_note, 37);
        assert_eq!(chops[1].start_frame, 800);
    }
}
