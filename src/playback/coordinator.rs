//! Restart coordination for changes that arrive while audio is sounding
//!
//! The backend cannot change a running source, so every such change becomes
//! stop, wait out the grace delay, play again. This module owns the waiting
//! part: one deferred restart at a time, rescheduled by each new change, and
//! the resume point for the one case that resumes mid-boundary (loop turned
//! off). It never talks to the backend; the controller does that.
//!
//! Restarts re-enter at the boundary start except after loop-off. Resuming
//! a looping source near the boundary start would make the backend loop the
//! tiny remaining span, which is far worse than an audible jump.

use std::time::Duration;

use super::clock::ActiveSource;
use super::deferred::DeferredTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartCause {
    /// Loop turned off while a looping source played
    LoopDisabled,
    RateChanged,
    BoundaryChanged,
    /// A processing stage was switched on or off
    ChainChanged,
    /// A one-shot source ended with the loop flag on
    NaturalEnd,
}

/// What to do when a restart comes due. Parameters are not part of the
/// plan: the controller reads them fresh at fire time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestartPlan {
    pub cause: RestartCause,
    /// Buffer seconds into the boundary to resume from, if resuming
    pub resume_offset: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct RestartCoordinator {
    timer: DeferredTask,
    grace: Duration,
    cause: Option<RestartCause>,
    resume_offset: Option<f64>,
}

impl RestartCoordinator {
    pub fn new(grace: Duration) -> Self {
        Self {
            timer: DeferredTask::new(),
            grace,
            cause: None,
            resume_offset: None,
        }
    }

    pub fn remaining(&self, now: f64) -> Option<Duration> {
        self.timer.remaining(now)
    }

    /// Register a change and (re)schedule the single pending restart.
    ///
    /// `sounding` is the source about to be stopped, if one still plays.
    /// For loop-off it supplies the resume point; once a restart is pending
    /// nothing sounds, so a later loop-off keeps the point captured earlier.
    /// Every other cause restarts from the boundary start.
    pub fn schedule(&mut self, cause: RestartCause, now: f64, sounding: Option<&ActiveSource>) {
        match (cause, sounding) {
            (RestartCause::LoopDisabled, Some(src)) => {
                self.resume_offset = Some(src.position(now));
            }
            (RestartCause::LoopDisabled, None) => {}
            _ => self.resume_offset = None,
        }

        let superseded = self.timer.is_pending();
        let generation = self.timer.schedule(now, self.grace);
        self.cause = Some(cause);

        log::debug!(
            "restart: scheduled #{} for {:?} (resume {:?}){}",
            generation,
            cause,
            self.resume_offset,
            if superseded { ", replacing pending restart" } else { "" }
        );
    }

    /// Drop any pending restart. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        self.resume_offset = None;
        self.cause = None;
        let cancelled = self.timer.cancel();
        if cancelled {
            log::debug!("restart: cancelled #{}", self.timer.generation());
        }
        cancelled
    }

    /// The restart plan, once, when the grace delay has passed.
    pub fn poll(&mut self, now: f64) -> Option<RestartPlan> {
        if !self.timer.poll(now) {
            return None;
        }
        let plan = RestartPlan {
            cause: self.cause.take().unwrap_or(RestartCause::BoundaryChanged),
            resume_offset: self.resume_offset.take(),
        };
        log::debug!("restart: firing #{} {:?}", self.timer.generation(), plan);
        Some(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Region;

    const GRACE: Duration = Duration::from_millis(10);

    fn looping_source() -> ActiveSource {
        ActiveSource {
            started_at: 0.0,
            rate: 1.0,
            boundary: Region::new(0.2, 0.8).unwrap(),
            buffer_duration: 10.0,
            looping: true,
            offset: 0.0,
        }
    }

    #[test]
    fn test_loop_off_captures_resume_point() {
        let mut coord = RestartCoordinator::new(GRACE);
        coord.schedule(RestartCause::LoopDisabled, 7.5, Some(&looping_source()));
        assert!(coord.poll(7.505).is_none());
        let plan = coord.poll(7.52).unwrap();
        assert_eq!(plan.cause, RestartCause::LoopDisabled);
        assert!((plan.resume_offset.unwrap() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_other_causes_restart_from_boundary_start() {
        let mut coord = RestartCoordinator::new(GRACE);
        coord.schedule(RestartCause::RateChanged, 3.0, Some(&looping_source()));
        let plan = coord.poll(3.02).unwrap();
        assert_eq!(plan.resume_offset, None);
    }

    #[test]
    fn test_later_change_discards_resume_point() {
        let mut coord = RestartCoordinator::new(GRACE);
        coord.schedule(RestartCause::LoopDisabled, 1.5, Some(&looping_source()));
        coord.schedule(RestartCause::BoundaryChanged, 1.505, None);
        assert!(coord.poll(1.512).is_none(), "first deadline must be cancelled");
        let plan = coord.poll(1.516).unwrap();
        assert_eq!(plan.cause, RestartCause::BoundaryChanged);
        assert_eq!(plan.resume_offset, None);
    }

    #[test]
    fn test_repeated_loop_off_keeps_first_resume_point() {
        let mut coord = RestartCoordinator::new(GRACE);
        coord.schedule(RestartCause::LoopDisabled, 1.5, Some(&looping_source()));
        coord.schedule(RestartCause::LoopDisabled, 1.505, None);
        let plan = coord.poll(1.52).unwrap();
        assert!((plan.resume_offset.unwrap() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_cancel_drops_everything() {
        let mut coord = RestartCoordinator::new(GRACE);
        coord.schedule(RestartCause::LoopDisabled, 1.5, Some(&looping_source()));
        assert!(coord.cancel());
        assert_eq!(coord.remaining(1.5), None);
        assert!(coord.poll(10.0).is_none());
        coord.schedule(RestartCause::NaturalEnd, 11.0, None);
        assert_eq!(coord.poll(11.02).unwrap().resume_offset, None);
    }
}
