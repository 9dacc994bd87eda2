//! Host side of `setTimeout`
//!
//! The queue only tracks ids and due times. Callbacks stay inside the
//! script context and are fired through the harness by id.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Largest delay accepted, matching the 32-bit limit scripts expect
const MAX_DELAY_MS: f64 = 2_147_483_647.0;

#[derive(Debug, Default)]
struct Inner {
    next_id: u32,
    pending: BinaryHeap<Reverse<(Instant, u32)>>,
}

#[derive(Debug, Clone, Default)]
pub struct TimerQueue {
    inner: Rc<RefCell<Inner>>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a timer and return its id
    ///
    /// Negative, non-finite and missing delays fire as soon as possible.
    pub fn schedule(&self, delay_ms: f64) -> u32 {
        let delay = if delay_ms.is_finite() {
            delay_ms.clamp(0.0, MAX_DELAY_MS)
        } else {
            0.0
        };

        let mut inner = self.inner.borrow_mut();
        inner.next_id = inner.next_id.wrapping_add(1).max(1);
        let id = inner.next_id;
        let due = Instant::now() + Duration::from_micros((delay * 1000.0) as u64);
        inner.pending.push(Reverse((due, id)));
        id
    }

    /// Due time of the earliest timer
    pub fn next_due(&self) -> Option<Instant> {
        self.inner
            .borrow()
            .pending
            .peek()
            .map(|Reverse((due, _))| *due)
    }

    /// Remove and return a timer that is due at `now`
    pub fn pop_due(&self, now: Instant) -> Option<u32> {
        let mut inner = self.inner.borrow_mut();
        match inner.pending.peek() {
            Some(Reverse((due, _))) if *due <= now => inner.pending.pop().map(|Reverse((_, id))| id),
            _ => None,
        }
    }

    /// Forget a pending timer; returns whether it was still queued
    pub fn cancel(&self, id: u32) -> bool {
        let mut inner = self.inner.borrow_mut();
        let before = inner.pending.len();
        inner.pending.retain(|Reverse((_, pending))| *pending != id);
        inner.pending.len() != before
    }

    /// Drop every pending timer
    pub fn clear(&self) {
        self.inner.borrow_mut().pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timers_fire_in_due_order() {
        let queue = TimerQueue::new();
        let late = queue.schedule(50.0);
        let early = queue.schedule(0.0);

        let now = Instant::now() + Duration::from_millis(100);
        assert_eq!(queue.pop_due(now), Some(early));
        assert_eq!(queue.pop_due(now), Some(late));
        assert_eq!(queue.pop_due(now), None);
    }

    #[test]
    fn test_future_timer_is_not_due() {
        let queue = TimerQueue::new();
        queue.schedule(60_000.0);

        assert_eq!(queue.pop_due(Instant::now()), None);
        assert!(queue.next_due().is_some());
    }

    #[test]
    fn test_invalid_delays_are_clamped() {
        let queue = TimerQueue::new();
        queue.schedule(f64::NAN);
        queue.schedule(-10.0);

        let now = Instant::now();
        assert!(queue.pop_due(now).is_some());
        assert!(queue.pop_due(now).is_some());
    }

    #[test]
    fn test_clear_discards_pending() {
        let queue = TimerQueue::new();
        let first = queue.schedule(1.0);
        queue.clear();
        let second = queue.schedule(1.0);

        assert_ne!(first, second);
        let later = Instant::now() + Duration::from_millis(10);
        assert_eq!(queue.pop_due(later), Some(second));
        assert_eq!(queue.pop_due(later), None);
    }

    #[test]
    fn test_cancelled_timer_is_forgotten() {
        let queue = TimerQueue::new();
        let kept = queue.schedule(5.0);
        let cancelled = queue.schedule(600_000.0);

        assert!(queue.cancel(cancelled));
        assert!(!queue.cancel(cancelled));
        assert!(queue.next_due().is_some_and(|due| due < Instant::now() + Duration::from_secs(1)));

        assert!(queue.cancel(kept));
        assert_eq!(queue.next_due(), None);
    }
}
