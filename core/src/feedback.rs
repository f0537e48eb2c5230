//! Haptic feedback scheduling: simple pulses, multi-step wrap patterns, and
//! the twist-scroll accumulator that pulses every `threshold` wheel units
//! while enforcing a max-continuous-duration cooldown.

use heapless::Vec as HVec;

use crate::config::MAX_FEEDBACK_PATTERN_LEN;
use crate::scheduler::{Scheduler, WorkHandle};

/// Level a GPIO line should be driven to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinLevel {
    Low,
    High,
}

/// Adapter the firmware implements to actually toggle GPIOs. Kept separate
/// from [`FeedbackController`] so the scheduling logic is host-testable
/// without real pins.
pub trait FeedbackPins {
    fn set_primary(&mut self, level: PinLevel);
    fn set_secondary(&mut self, level: PinLevel);
    fn secondary_level(&self) -> PinLevel;
}

/// A board with no haptic feedback GPIO wired up.
#[derive(Default)]
pub struct NoFeedbackPins;

impl FeedbackPins for NoFeedbackPins {
    fn set_primary(&mut self, _level: PinLevel) {}
    fn set_secondary(&mut self, _level: PinLevel) {}
    fn secondary_level(&self) -> PinLevel {
        PinLevel::Low
    }
}

pub struct FeedbackController {
    pattern: HVec<u32, MAX_FEEDBACK_PATTERN_LEN>,
    pattern_step: usize,
    saved_secondary: PinLevel,
    twist_accumulator: u32,
    twist_last_sign: i32,
    continuous_start_ms: Option<u64>,
    in_cooldown: bool,
}

impl Default for FeedbackController {
    fn default() -> Self {
        Self {
            pattern: HVec::new(),
            pattern_step: 0,
            saved_secondary: PinLevel::Low,
            twist_accumulator: 0,
            twist_last_sign: 0,
            continuous_start_ms: None,
            in_cooldown: false,
        }
    }
}

impl FeedbackController {
    pub fn in_cooldown(&self) -> bool {
        self.in_cooldown
    }

    /// Fires a simple timed pulse: secondary saved and driven high, primary
    /// driven high, scheduled to turn off after `duration_ms`.
    pub fn pulse<P: FeedbackPins, S: Scheduler>(
        &mut self,
        pins: &mut P,
        scheduler: &mut S,
        duration_ms: u32,
        now: u64,
        max_continuous_ms: u64,
        cooldown_ms: u64,
    ) {
        if self.in_cooldown {
            return;
        }
        if self.continuous_start_ms.is_none() {
            self.continuous_start_ms = Some(now);
        }
        if let Some(start) = self.continuous_start_ms {
            if now.saturating_sub(start) >= max_continuous_ms {
                self.force_off(pins);
                self.in_cooldown = true;
                scheduler.schedule(WorkHandle::FeedbackCooldownEnd, cooldown_ms);
                return;
            }
        }
        self.saved_secondary = pins.secondary_level();
        pins.set_secondary(PinLevel::High);
        pins.set_primary(PinLevel::High);
        scheduler.schedule(WorkHandle::FeedbackOff, duration_ms as u64);
    }

    /// Scheduled-work callback for `WorkHandle::FeedbackOff`.
    pub fn on_feedback_off<P: FeedbackPins>(&mut self, pins: &mut P) {
        pins.set_primary(PinLevel::Low);
        pins.set_secondary(self.saved_secondary);
        self.continuous_start_ms = None;
    }

    /// Starts a multi-step wrap pattern (index 0 is the initial on-duration).
    pub fn start_pattern<P: FeedbackPins, S: Scheduler>(
        &mut self,
        pins: &mut P,
        scheduler: &mut S,
        pattern: &HVec<u32, MAX_FEEDBACK_PATTERN_LEN>,
    ) {
        if pattern.is_empty() || self.in_cooldown {
            return;
        }
        self.pattern = pattern.clone();
        self.pattern_step = 0;
        self.saved_secondary = pins.secondary_level();
        pins.set_primary(PinLevel::High);
        scheduler.schedule(
            WorkHandle::FeedbackPatternStep,
            self.pattern[0] as u64,
        );
    }

    /// Scheduled-work callback for `WorkHandle::FeedbackPatternStep`.
    pub fn on_pattern_step<P: FeedbackPins, S: Scheduler>(&mut self, pins: &mut P, scheduler: &mut S) {
        self.pattern_step += 1;
        if self.pattern_step >= self.pattern.len() {
            pins.set_primary(PinLevel::Low);
            pins.set_secondary(self.saved_secondary);
            self.pattern.clear();
            return;
        }
        let level = if self.pattern_step % 2 == 0 {
            PinLevel::High
        } else {
            PinLevel::Low
        };
        pins.set_primary(level);
        scheduler.schedule(
            WorkHandle::FeedbackPatternStep,
            self.pattern[self.pattern_step] as u64,
        );
    }

    fn force_off<P: FeedbackPins>(&mut self, pins: &mut P) {
        pins.set_primary(PinLevel::Low);
        pins.set_secondary(PinLevel::Low);
        self.continuous_start_ms = None;
    }

    /// Scheduled-work callback for `WorkHandle::FeedbackCooldownEnd`.
    pub fn on_cooldown_end(&mut self) {
        self.in_cooldown = false;
    }

    /// Accumulates a wheel delta; returns true once the accumulated
    /// magnitude crosses `threshold`, resetting the accumulator.
    pub fn accrue_twist(&mut self, wheel_delta: i32, threshold: u32) -> bool {
        self.twist_accumulator = self.twist_accumulator.saturating_add(wheel_delta.unsigned_abs());
        if self.twist_accumulator >= threshold {
            self.twist_accumulator = 0;
            true
        } else {
            false
        }
    }

    /// As [`Self::accrue_twist`], but also fires (and resets the
    /// accumulator) the moment the twist direction reverses, even if the
    /// threshold hasn't been crossed yet — per §4.5, a direction reversal is
    /// itself a significant event worth a pulse.
    pub fn accrue_twist_with_direction(&mut self, wheel_delta: i32, threshold: u32) -> bool {
        if wheel_delta == 0 {
            return false;
        }
        let sign = wheel_delta.signum();
        if self.twist_last_sign != 0 && sign != self.twist_last_sign {
            self.twist_accumulator = 0;
            self.twist_last_sign = sign;
            return true;
        }
        self.twist_last_sign = sign;
        self.accrue_twist(wheel_delta, threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::fake::FakeScheduler;

    #[derive(Default)]
    struct FakePins {
        primary: Option<PinLevel>,
        secondary: PinLevel,
    }
    impl Default for PinLevel {
        fn default() -> Self {
            PinLevel::Low
        }
    }
    impl FeedbackPins for FakePins {
        fn set_primary(&mut self, level: PinLevel) {
            self.primary = Some(level);
        }
        fn set_secondary(&mut self, level: PinLevel) {
            self.secondary = level;
        }
        fn secondary_level(&self) -> PinLevel {
            self.secondary
        }
    }

    #[test]
    fn pulse_then_off_restores_secondary() {
        let mut fb = FeedbackController::default();
        let mut pins = FakePins::default();
        let mut sched = FakeScheduler::new();
        pins.secondary = PinLevel::High;
        fb.pulse(&mut pins, &mut sched, 20, 0, 400, 600);
        assert_eq!(pins.primary, Some(PinLevel::High));
        fb.on_feedback_off(&mut pins);
        assert_eq!(pins.primary, Some(PinLevel::Low));
        assert_eq!(pins.secondary, PinLevel::High);
    }

    #[test]
    fn max_continuous_enters_cooldown() {
        let mut fb = FeedbackController::default();
        let mut pins = FakePins::default();
        let mut sched = FakeScheduler::new();
        fb.pulse(&mut pins, &mut sched, 20, 0, 100, 600);
        fb.pulse(&mut pins, &mut sched, 20, 150, 100, 600);
        assert!(fb.in_cooldown());
        assert_eq!(pins.primary, Some(PinLevel::Low));
    }

    #[test]
    fn accrue_twist_fires_at_threshold() {
        let mut fb = FeedbackController::default();
        assert!(!fb.accrue_twist(3, 10));
        assert!(!fb.accrue_twist(4, 10));
        assert!(fb.accrue_twist(5, 10));
    }

    #[test]
    fn accrue_twist_fires_on_direction_reversal() {
        let mut fb = FeedbackController::default();
        assert!(!fb.accrue_twist_with_direction(2, 50));
        assert!(!fb.accrue_twist_with_direction(2, 50));
        assert!(fb.accrue_twist_with_direction(-1, 50));
    }
}
