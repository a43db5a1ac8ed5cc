//! Playhead position derived from the backend clock
//!
//! Nothing here holds state. The position is recomputed from the source's
//! start time every frame, so it never drifts from what the backend plays.

use crate::session::Region;

/// Display-only time readout, in seconds of output.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlaybackTime {
    pub current: f64,
    pub total: f64,
}

/// What the clock needs to know about the sounding source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveSource {
    /// Backend time the source started
    pub started_at: f64,
    pub rate: f64,
    pub boundary: Region,
    /// Length of the whole buffer in seconds
    pub buffer_duration: f64,
    pub looping: bool,
    /// Buffer seconds into the boundary where the source started
    pub offset: f64,
}

impl ActiveSource {
    pub fn boundary_seconds(&self) -> f64 {
        self.boundary.seconds(self.buffer_duration)
    }

    /// Buffer seconds into the boundary at backend time `now`.
    pub fn position(&self, now: f64) -> f64 {
        position_in_boundary(
            now - self.started_at,
            self.rate,
            self.offset,
            self.boundary_seconds(),
            self.looping,
        )
    }

    pub fn time(&self, now: f64) -> PlaybackTime {
        let rate = sane_rate(self.rate);
        PlaybackTime {
            current: self.position(now) / rate,
            total: effective_duration(self.boundary_seconds(), rate),
        }
    }
}

fn sane_rate(rate: f64) -> f64 {
    if rate.is_finite() && rate > 0.0 {
        rate
    } else {
        1.0
    }
}

/// Buffer seconds into a boundary of `boundary_seconds`.
///
/// `elapsed_wall` is scaled by `rate` and added to the starting `offset`.
/// A looping source wraps (the backend may have looped any number of
/// times); a one-shot source clamps to the boundary.
pub fn position_in_boundary(
    elapsed_wall: f64,
    rate: f64,
    offset: f64,
    boundary_seconds: f64,
    looping: bool,
) -> f64 {
    if !(boundary_seconds > 0.0) {
        return 0.0;
    }
    let travelled = offset + elapsed_wall.max(0.0) * sane_rate(rate);
    if looping {
        travelled.rem_euclid(boundary_seconds)
    } else {
        travelled.clamp(0.0, boundary_seconds)
    }
}

/// Output seconds needed to play `boundary_seconds` of buffer at `rate`.
pub fn effective_duration(boundary_seconds: f64, rate: f64) -> f64 {
    boundary_seconds.max(0.0) / sane_rate(rate)
}

/// Readout while nothing sounds: zero position, expected duration.
pub fn idle_time(boundary: Region, buffer_duration: f64, rate: f64) -> PlaybackTime {
    PlaybackTime {
        current: 0.0,
        total: effective_duration(boundary.seconds(buffer_duration), rate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(rate: f64, looping: bool) -> ActiveSource {
        ActiveSource {
            started_at: 0.0,
            rate,
            boundary: Region::new(0.2, 0.8).unwrap(),
            buffer_duration: 10.0,
            looping,
            offset: 0.0,
        }
    }

    #[test]
    fn test_looping_position_wraps() {
        let src = source(1.0, true);
        assert!((src.position(1.5) - 1.5).abs() < 1e-9);
        assert!((src.position(7.5) - 1.5).abs() < 1e-9);
        assert!((src.position(13.5) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_one_shot_position_clamps() {
        let src = source(1.0, false);
        assert!((src.position(7.5) - 6.0).abs() < 1e-9);
        assert_eq!(src.position(-3.0), 0.0);
    }

    #[test]
    fn test_rate_scales_position_not_total_buffer() {
        let src = source(2.0, false);
        let t = src.time(1.0);
        assert!((t.current - 1.0).abs() < 1e-9);
        assert!((t.total - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_offset_resumes_inside_boundary() {
        let mut src = source(1.0, false);
        src.offset = 1.5;
        src.started_at = 4.0;
        assert!((src.position(5.0) - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_current_stays_inside_boundary() {
        for &rate in &[0.25, 0.5, 1.0, 1.7, 4.0] {
            for &looping in &[false, true] {
                for &(start, end) in &[(0.0, 1.0), (0.2, 0.8), (0.9, 0.91)] {
                    let src = ActiveSource {
                        started_at: 3.0,
                        rate,
                        boundary: Region::new(start, end).unwrap(),
                        buffer_duration: 8.0,
                        looping,
                        offset: 0.0,
                    };
                    for step in 0..400 {
                        let now = step as f64 * 0.137;
                        let t = src.time(now);
                        assert!(t.current >= 0.0, "negative at {now}");
                        assert!(t.current <= t.total + 1e-9, "past end at {now}");
                        let pos = src.position(now);
                        assert!(pos >= 0.0 && pos <= src.boundary_seconds() + 1e-9);
                    }
                }
            }
        }
    }

    #[test]
    fn test_idle_time_reports_expected_duration() {
        let t = idle_time(Region::FULL, 8.0, 0.5);
        assert_eq!(t.current, 0.0);
        assert!((t.total - 16.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(position_in_boundary(1.0, 1.0, 0.0, 0.0, true), 0.0);
        assert_eq!(effective_duration(4.0, 0.0), 4.0);
        assert_eq!(effective_duration(4.0, f64::NAN), 4.0);
    }
}
