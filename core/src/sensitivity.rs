//! Runtime-mutable sensitivity/acceleration state, with the interface
//! behaviors (shell, keymap actions) mutate it through. Decoupling the
//! interface from `Mixer` lets tests substitute a plain struct instead of
//! routing every assertion through the full fusion pipeline.

use crate::config::BehaviorConfig;
use crate::error::MixerError;
use crate::log::warn;
use crate::scheduler::{Scheduler, WorkHandle};
use crate::{Direction, Scope, ToggleAction};

/// Getter/setter surface over the mixer's persisted coefficients, as used
/// by shell commands and keymap-bound behaviors. Implemented by [`Mixer`](crate::Mixer).
pub trait SensitivityStore {
    fn get_move_coef(&self) -> f32;
    fn set_move_coef(&mut self, v: f32);
    fn get_twist_coef(&self) -> f32;
    fn set_twist_coef(&mut self, v: f32);
    fn get_twist_accel_value(&self) -> f32;
    fn set_twist_accel_value(&mut self, v: f32);

    fn is_twist_enabled(&self) -> bool;
    fn toggle_twist(&mut self);
    fn is_twist_reversed(&self) -> bool;
    fn toggle_twist_reversed(&mut self);
    fn is_accel_enabled(&self) -> bool;
    fn set_accel_enabled(&mut self, action: ToggleAction);
}

/// The coefficients and flags themselves, independent of how they're stored.
#[derive(Debug, Clone, Copy)]
pub struct SensitivityState {
    pub move_coef: f32,
    pub twist_coef: f32,
    pub twist_enabled: bool,
    pub twist_reversed: bool,
    pub twist_accel_enabled: bool,
    pub twist_accel_value: f32,
}

impl Default for SensitivityState {
    fn default() -> Self {
        Self {
            move_coef: 1.0,
            twist_coef: 1.0,
            twist_enabled: true,
            twist_reversed: false,
            twist_accel_enabled: false,
            twist_accel_value: 1.0,
        }
    }
}

/// Snaps `current` to the nearest multiple of `one_step` if it has drifted
/// by more than `threshold` from that multiple. Drift accumulates from
/// repeated float save/reload cycles.
pub fn drift_correct(current: f32, one_step: f32, threshold: f32, min: f32) -> f32 {
    if one_step <= 0.0 {
        return current;
    }
    let nearest_multiple = crate::math::roundf(current / one_step) * one_step;
    if (current - nearest_multiple).abs() > threshold {
        let snapped = nearest_multiple.max(min);
        warn!(
            "sensitivity: drift-corrected {} -> {} (nearest step multiple)",
            current, snapped
        );
        snapped
    } else {
        current
    }
}

/// Applies one press of an inc/dec behavior to `current`, returning the new
/// value and whether the value wrapped (crossed a limit back to the other end).
pub fn apply_behavior_step(
    current: f32,
    behavior: &BehaviorConfig,
    tunables_drift_threshold_tenths: u32,
    direction: Direction,
    steps: u32,
) -> (f32, bool) {
    let one_step = behavior.one_step();
    let min = behavior.min();
    let max = behavior.max();

    let threshold = tunables_drift_threshold_tenths as f32 / 1000.0;
    let current = if (one_step * 200.0) as u32 >= tunables_drift_threshold_tenths {
        drift_correct(current, one_step, threshold, min)
    } else {
        current
    };

    let delta = one_step * steps as f32;
    let mut new = match direction {
        Direction::Inc => current + delta,
        Direction::Dec => current - delta,
    };

    let mut wrapped = false;
    if behavior.wrap {
        if new > max {
            // A large multi-step press can overshoot max starting from a
            // value already pinned at min; wrapping back to min again would
            // make repeated increase presses look stuck there.
            new = if (current - min).abs() <= 1e-6 { max } else { min };
            wrapped = true;
        } else if new < min {
            new = max;
            wrapped = true;
        }
    } else {
        if new > max {
            new = max;
        }
        if new < min {
            new = min;
        }
    }
    (new, wrapped)
}

/// Drives the sensitivity/acceleration adjust commands of §6.2 against a
/// [`SensitivityStore`], scheduling the debounced settings save.
pub fn adjust<S: SensitivityStore, SCH: Scheduler>(
    store: &mut S,
    scheduler: &mut SCH,
    behavior: &BehaviorConfig,
    drift_threshold_tenths: u32,
    settings_save_delay_ms: u64,
    scope: Scope,
    direction: Direction,
    steps: u32,
) -> bool {
    let current = match scope {
        Scope::Pointer => store.get_move_coef(),
        Scope::Scroll => store.get_twist_coef(),
    };
    let (new, wrapped) = apply_behavior_step(current, behavior, drift_threshold_tenths, direction, steps);
    match scope {
        Scope::Pointer => store.set_move_coef(new),
        Scope::Scroll => store.set_twist_coef(new),
    }
    scheduler.schedule(WorkHandle::SettingsSave, settings_save_delay_ms);
    wrapped
}

/// Drives the acceleration-value adjust command, same algorithm applied to
/// `twist_accel_value` instead of a sensitivity coefficient.
pub fn adjust_accel<S: SensitivityStore, SCH: Scheduler>(
    store: &mut S,
    scheduler: &mut SCH,
    behavior: &BehaviorConfig,
    drift_threshold_tenths: u32,
    settings_save_delay_ms: u64,
    direction: Direction,
    steps: u32,
) -> bool {
    let current = store.get_twist_accel_value();
    let (new, wrapped) = apply_behavior_step(current, behavior, drift_threshold_tenths, direction, steps);
    store.set_twist_accel_value(new);
    scheduler.schedule(WorkHandle::SettingsSave, settings_save_delay_ms);
    wrapped
}

pub(crate) fn toggle_action(current: bool, action: ToggleAction) -> bool {
    match action {
        ToggleAction::Enable => true,
        ToggleAction::Disable => false,
        ToggleAction::Toggle => !current,
    }
}

/// Ensures every fallible accessor returns a deterministic default instead
/// of propagating an error over the event-bus-facing surface.
pub fn guard_initialized<T: Default>(initialized: bool, value: T) -> Result<T, MixerError> {
    if initialized {
        Ok(value)
    } else {
        Err(MixerError::NotInitialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::fake::FakeScheduler;
    use heapless::Vec as HVec;

    fn behavior() -> BehaviorConfig {
        BehaviorConfig {
            step: 10,
            min_step: 1,
            max_step: 100,
            max_multiplier: 1.0,
            wrap: true,
            feedback_on_limit: false,
            feedback_duration_ms: 0,
            feedback_wrap_pattern: HVec::new(),
            scroll: false,
            display_name: "test",
        }
    }

    struct TestStore(SensitivityState);
    impl SensitivityStore for TestStore {
        fn get_move_coef(&self) -> f32 {
            self.0.move_coef
        }
        fn set_move_coef(&mut self, v: f32) {
            self.0.move_coef = v;
        }
        fn get_twist_coef(&self) -> f32 {
            self.0.twist_coef
        }
        fn set_twist_coef(&mut self, v: f32) {
            self.0.twist_coef = v;
        }
        fn get_twist_accel_value(&self) -> f32 {
            self.0.twist_accel_value
        }
        fn set_twist_accel_value(&mut self, v: f32) {
            self.0.twist_accel_value = v;
        }
        fn is_twist_enabled(&self) -> bool {
            self.0.twist_enabled
        }
        fn toggle_twist(&mut self) {
            self.0.twist_enabled = !self.0.twist_enabled;
        }
        fn is_twist_reversed(&self) -> bool {
            self.0.twist_reversed
        }
        fn toggle_twist_reversed(&mut self) {
            self.0.twist_reversed = !self.0.twist_reversed;
        }
        fn is_accel_enabled(&self) -> bool {
            self.0.twist_accel_enabled
        }
        fn set_accel_enabled(&mut self, action: ToggleAction) {
            self.0.twist_accel_enabled = toggle_action(self.0.twist_accel_enabled, action);
        }
    }

    #[test]
    fn wrap_at_max_goes_to_min_then_steps_up() {
        let b = behavior();
        let mut store = TestStore(SensitivityState {
            move_coef: 1.0,
            ..Default::default()
        });
        let mut sched = FakeScheduler::new();
        adjust(&mut store, &mut sched, &b, 20, 500, Scope::Pointer, Direction::Inc, 1);
        assert_eq!(store.get_move_coef(), 0.01);
        adjust(&mut store, &mut sched, &b, 20, 500, Scope::Pointer, Direction::Inc, 1);
        assert!((store.get_move_coef() - 0.02).abs() < 1e-6);
    }

    #[test]
    fn clamp_mode_stays_at_max() {
        let mut b = behavior();
        b.wrap = false;
        let mut store = TestStore(SensitivityState {
            move_coef: 1.0,
            ..Default::default()
        });
        let mut sched = FakeScheduler::new();
        adjust(&mut store, &mut sched, &b, 20, 500, Scope::Pointer, Direction::Inc, 3);
        assert_eq!(store.get_move_coef(), 1.0);
    }

    #[test]
    fn drift_snap_then_step() {
        let b = behavior();
        let mut store = TestStore(SensitivityState {
            move_coef: 0.999 - 0.0025,
            ..Default::default()
        });
        let mut sched = FakeScheduler::new();
        adjust(&mut store, &mut sched, &b, 20, 500, Scope::Pointer, Direction::Inc, 1);
        // snaps to 1.00 then wraps to min since 1.00 > max(1.0)? max==1.0 so equality, not >.
        // with one_step=0.01, nearest multiple of 0.9965 is 1.00; +0.01 = 1.01 > max=1.0 -> wraps to min.
        assert_eq!(store.get_move_coef(), 0.01);
    }

    #[test]
    fn double_toggle_is_identity() {
        let mut store = TestStore(SensitivityState::default());
        let before = store.is_twist_reversed();
        store.toggle_twist_reversed();
        store.toggle_twist_reversed();
        assert_eq!(store.is_twist_reversed(), before);
    }
}
