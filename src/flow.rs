//! Flow-control counter gating `read`/`write` against queue capacity.
//!
//! Semaphore-like: the completion handler signals from interrupt context,
//! the application takes from thread context with a bounded wait. For RX
//! the counter holds completed-and-queued blocks (initially zero); for TX
//! it holds free queue slots (initially the ceiling).
//!
//! There is no blocking inside; the waiting loop lives in the device and
//! polls [`try_take`](FlowControl::try_take). The `epoch` counter lets a
//! STOP/DROP release waiters: every queue drop bumps it, and a waiter that
//! observes a bump gives up instead of waiting out its timeout.

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Bounded counting signal shared between interrupt and thread context.
pub struct FlowControl {
    count: AtomicUsize,
    ceiling: AtomicUsize,
    epoch: AtomicU32,
}

impl FlowControl {
    pub const fn new() -> Self {
        FlowControl {
            count: AtomicUsize::new(0),
            ceiling: AtomicUsize::new(0),
            epoch: AtomicU32::new(0),
        }
    }

    /// Set the initial count and ceiling for a new configuration.
    pub fn configure(&self, initial: usize, ceiling: usize) {
        debug_assert!(initial <= ceiling);
        self.ceiling.store(ceiling, Ordering::Release);
        self.count.store(initial.min(ceiling), Ordering::Release);
    }

    /// Increment the counter, saturating at the ceiling. Interrupt-safe.
    pub fn signal(&self) {
        let ceiling = self.ceiling.load(Ordering::Acquire);
        let _ = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                (c < ceiling).then_some(c + 1)
            });
    }

    /// Take one unit if available. Never blocks.
    pub fn try_take(&self) -> bool {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                c.checked_sub(1)
            })
            .is_ok()
    }

    /// Force the count (clamped to the ceiling) and release any waiter by
    /// bumping the epoch.
    pub fn reset(&self, count: usize) {
        let ceiling = self.ceiling.load(Ordering::Acquire);
        self.count.store(count.min(ceiling), Ordering::Release);
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Reset to the full ceiling (all slots free). Releases waiters.
    pub fn reset_to_ceiling(&self) {
        self.reset(self.ceiling.load(Ordering::Acquire));
    }

    /// Current count.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Configured ceiling.
    pub fn ceiling(&self) -> usize {
        self.ceiling.load(Ordering::Acquire)
    }

    /// Snapshot for waiters; compare against later values to detect a
    /// reset that happened mid-wait.
    pub fn epoch(&self) -> u32 {
        self.epoch.load(Ordering::Acquire)
    }
}

impl Default for FlowControl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_fails_when_empty() {
        let flow = FlowControl::new();
        flow.configure(0, 4);
        assert!(!flow.try_take());
    }

    #[test]
    fn take_consumes_signals_one_for_one() {
        let flow = FlowControl::new();
        flow.configure(0, 4);
        flow.signal();
        flow.signal();
        assert!(flow.try_take());
        assert!(flow.try_take());
        assert!(!flow.try_take());
    }

    #[test]
    fn signal_saturates_at_ceiling() {
        let flow = FlowControl::new();
        flow.configure(0, 2);
        for _ in 0..5 {
            flow.signal();
        }
        assert_eq!(flow.count(), 2);
    }

    #[test]
    fn initial_count_respected() {
        let flow = FlowControl::new();
        flow.configure(3, 3);
        assert!(flow.try_take());
        assert!(flow.try_take());
        assert!(flow.try_take());
        assert!(!flow.try_take());
    }

    #[test]
    fn reset_bumps_epoch() {
        let flow = FlowControl::new();
        flow.configure(0, 4);
        let before = flow.epoch();
        flow.reset(0);
        assert_ne!(flow.epoch(), before);
        assert_eq!(flow.count(), 0);
    }

    #[test]
    fn reset_to_ceiling_frees_all_slots() {
        let flow = FlowControl::new();
        flow.configure(4, 4);
        assert!(flow.try_take());
        assert!(flow.try_take());
        flow.reset_to_ceiling();
        assert_eq!(flow.count(), 4);
    }
}
