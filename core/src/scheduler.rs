//! Deferred-work abstraction. Maps the "reschedule in N ms" pattern onto a
//! trait so the mixer core never depends on a concrete timer/executor:
//! firmware wires it to embassy timers, tests wire it to a virtual clock.

/// Opaque identity for one piece of deferred work. At most one deadline is
/// pending per handle at any time; scheduling again replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WorkHandle {
    FeedbackOff,
    FeedbackPatternStep,
    FeedbackCooldownEnd,
    TwistHistoryCleanup,
    DirectionFilterCleanup,
    SettingsSave,
}

/// A cooperative, rescheduling-safe deferred-work queue.
///
/// Implementations must guarantee: scheduling a handle that already has a
/// pending deadline replaces that deadline rather than adding a second one;
/// canceling a handle with no pending deadline is a no-op; callbacks run on
/// the same cooperative context as event intake, never interleaved with a
/// partially-updated intake call.
pub trait Scheduler {
    /// Schedule `handle` to fire after `after_ms`, replacing any pending
    /// deadline already registered for it.
    fn schedule(&mut self, handle: WorkHandle, after_ms: u64);

    /// Cancel any pending deadline for `handle`. Safe to call unconditionally.
    fn cancel(&mut self, handle: WorkHandle);

    /// Current uptime in milliseconds, as seen by the scheduler's clock.
    fn now_ms(&self) -> u64;
}

/// An in-memory fake scheduler for host tests: records scheduled deadlines
/// against a virtual clock and reports which ones are due as the clock is
/// advanced by the test.
#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::{Scheduler, WorkHandle};

    pub struct FakeScheduler {
        now: u64,
        deadlines: heapless::FnvIndexMap<WorkHandle, u64, 8>,
        fired: heapless::Vec<WorkHandle, 32>,
    }

    impl FakeScheduler {
        pub fn new() -> Self {
            Self {
                now: 0,
                deadlines: heapless::FnvIndexMap::new(),
                fired: heapless::Vec::new(),
            }
        }

        /// Advances the virtual clock and returns the handles whose
        /// deadline fell at or before the new time, in the order they
        /// became due.
        pub fn advance(&mut self, by_ms: u64) -> heapless::Vec<WorkHandle, 32> {
            self.now += by_ms;
            self.fired.clear();
            let due: heapless::Vec<WorkHandle, 8> = self
                .deadlines
                .iter()
                .filter(|(_, &deadline)| deadline <= self.now)
                .map(|(&h, _)| h)
                .collect();
            for h in due {
                self.deadlines.remove(&h);
                let _ = self.fired.push(h);
            }
            self.fired.clone()
        }

        pub fn is_pending(&self, handle: WorkHandle) -> bool {
            self.deadlines.contains_key(&handle)
        }
    }

    impl Default for FakeScheduler {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Scheduler for FakeScheduler {
        fn schedule(&mut self, handle: WorkHandle, after_ms: u64) {
            let _ = self.deadlines.insert(handle, self.now + after_ms);
        }

        fn cancel(&mut self, handle: WorkHandle) {
            let _ = self.deadlines.remove(&handle);
        }

        fn now_ms(&self) -> u64 {
            self.now
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn rescheduling_replaces_prior_deadline() {
            let mut s = FakeScheduler::new();
            s.schedule(WorkHandle::FeedbackOff, 100);
            s.schedule(WorkHandle::FeedbackOff, 50);
            let fired = s.advance(60);
            assert_eq!(fired.as_slice(), &[WorkHandle::FeedbackOff]);
        }

        #[test]
        fn cancel_is_safe_when_not_pending() {
            let mut s = FakeScheduler::new();
            s.cancel(WorkHandle::SettingsSave);
            assert!(!s.is_pending(WorkHandle::SettingsSave));
        }
    }
}
