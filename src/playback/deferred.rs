//! Cancellable deferred task on the backend clock
//!
//! At most one task is outstanding. Scheduling replaces whatever was
//! pending, so "cancel previous, schedule new" is a single call. The task
//! never runs by itself: the owner polls it with the current time and acts
//! when it comes due.

use std::time::Duration;

/// Slack for comparing clock values built from float sums
const DUE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Default)]
pub struct DeferredTask {
    due_at: Option<f64>,
    generation: u64,
}

impl DeferredTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule for `now + delay`, cancelling any pending run.
    /// Returns the generation of the new schedule.
    pub fn schedule(&mut self, now: f64, delay: Duration) -> u64 {
        self.generation += 1;
        self.due_at = Some(now + delay.as_secs_f64());
        self.generation
    }

    /// Returns whether something was pending.
    pub fn cancel(&mut self) -> bool {
        self.due_at.take().is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.due_at.is_some()
    }

    /// Incremented by every `schedule`.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Time left until the task is due, zero if overdue.
    pub fn remaining(&self, now: f64) -> Option<Duration> {
        self.due_at
            .map(|due| Duration::from_secs_f64((due - now).max(0.0)))
    }

    /// Consume the task if it is due at `now`.
    pub fn poll(&mut self, now: f64) -> bool {
        match self.due_at {
            Some(due) if now + DUE_EPSILON >= due => {
                self.due_at = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEN_MS: Duration = Duration::from_millis(10);

    #[test]
    fn test_fires_once_when_due() {
        let mut task = DeferredTask::new();
        task.schedule(1.0, TEN_MS);
        assert!(!task.poll(1.005));
        assert!(task.poll(1.01));
        assert!(!task.poll(1.02));
        assert!(!task.is_pending());
    }

    #[test]
    fn test_reschedule_replaces_pending() {
        let mut task = DeferredTask::new();
        let first = task.schedule(0.0, TEN_MS);
        let second = task.schedule(0.008, TEN_MS);
        assert!(second > first);
        assert!(!task.poll(0.012));
        assert!(task.poll(0.018));
    }

    #[test]
    fn test_cancel() {
        let mut task = DeferredTask::new();
        assert!(!task.cancel());
        task.schedule(0.0, TEN_MS);
        assert!(task.cancel());
        assert!(!task.poll(1.0));
    }

    #[test]
    fn test_remaining() {
        let mut task = DeferredTask::new();
        assert_eq!(task.remaining(0.0), None);
        task.schedule(0.0, TEN_MS);
        assert_eq!(task.remaining(0.5), Some(Duration::ZERO));
        let left = task.remaining(0.004).unwrap();
        assert!(left > Duration::from_millis(5) && left <= Duration::from_millis(6));
    }
}
