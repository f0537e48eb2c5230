//! Twist detection: distinguishes a deliberate rotation of the ball about
//! its vertical axis from ordinary translation, through a strict pipeline
//! of filters over a bounded history of recent dataframes. Any filter that
//! triggers discards the tick; only a tick that survives every filter in
//! order produces a scroll delta.

use heapless::Vec as HVec;

use crate::accumulator::Accumulator;
use crate::config::Tunables;
use crate::log::trace;
use crate::scheduler::{Scheduler, WorkHandle};

/// Bound on the circular dataframe history. Sized generously; actual
/// capacity used at runtime is `ceil(window/scroll_report) + 1`, enforced
/// by `TwistDetector::history_capacity`.
pub const MAX_HISTORY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TwistDirection {
    None,
    Forward,
    Reverse,
}

pub struct TwistDetector {
    history: HVec<u64, MAX_HISTORY>,
    history_capacity: usize,
    last_direction: TwistDirection,
    ema_delta_y: f32,
    ema_translation: f32,
    ema_initialized: bool,
    last_twist_ms: u64,
    debounce_start_ms: u64,
    last_significant_movement_ms: Option<u64>,
}

impl TwistDetector {
    pub fn new(tunables: &Tunables) -> Self {
        let capacity = ((tunables.twist_interference_window_ms as f64
            / tunables.sync_scroll_report_ms.max(1) as f64)
            .ceil() as usize
            + 1)
        .min(MAX_HISTORY);
        Self {
            history: HVec::new(),
            history_capacity: capacity.max(1),
            last_direction: TwistDirection::None,
            ema_delta_y: 0.0,
            ema_translation: 0.0,
            ema_initialized: false,
            last_twist_ms: 0,
            debounce_start_ms: 0,
            last_significant_movement_ms: None,
        }
    }

    pub fn note_significant_movement(&mut self, now: u64) {
        self.last_significant_movement_ms = Some(now);
    }

    fn clear_history_and_ema(&mut self) {
        self.history.clear();
        self.ema_initialized = false;
        self.ema_delta_y = 0.0;
        self.ema_translation = 0.0;
    }

    fn push_history(&mut self, now: u64, window_ms: u64) {
        self.history.retain(|&t| now.saturating_sub(t) < window_ms);
        if self.history.len() >= self.history_capacity {
            self.history.remove(0);
        }
        let _ = self.history.push(now);
    }

    /// Runs one scroll tick. `acc` supplies and is drained of the
    /// post-rotation dataframe for both sensors. Returns the accepted
    /// twist magnitude (signed, pre-coefficient), or 0 if every filter
    /// rejected the tick.
    pub fn tick<S: Scheduler>(
        &mut self,
        acc: &mut Accumulator,
        tunables: &Tunables,
        scheduler: &mut S,
        now: u64,
    ) -> f32 {
        let (s1, s2) = acc.take_twist();
        let (s1x, s1y, s2x, s2y) = (s1.x, s1.y, s2.x, s2.y);

        if s1x == 0.0 && s1y == 0.0 && s2x == 0.0 && s2y == 0.0 {
            return 0.0;
        }

        // 4.3.1 threshold filter
        if s1y.abs() < tunables.twist_thres || s2y.abs() < tunables.twist_thres {
            trace!("twist: rejected by threshold filter");
            return 0.0;
        }

        // 4.3.2 significant-translation hard gate
        let translation_allowed = tunables.twist_interference_thres * tunables.significant_movement_mul;
        if (s1x + s2x).abs() > translation_allowed || (s1y + s2y).abs() > translation_allowed {
            trace!("twist: rejected by significant-translation gate");
            return 0.0;
        }

        // 4.3.3 direction filter
        let dir = if s1y < s2y {
            TwistDirection::Forward
        } else {
            TwistDirection::Reverse
        };
        if tunables.direction_filter_enabled {
            if self.last_direction != TwistDirection::None && self.last_direction != dir {
                trace!("twist: direction flip, resetting window");
                self.last_direction = dir;
                self.debounce_start_ms = now;
                self.clear_history_and_ema();
                return 0.0;
            }
            self.last_direction = dir;
        }

        // 4.3.4 history accrual & warmup
        self.push_history(now, tunables.twist_interference_window_ms);
        let cutoff = now.saturating_sub(tunables.twist_interference_window_ms);
        let valid = self.history.iter().filter(|&&t| t >= cutoff).count();
        let required =
            (tunables.twist_interference_window_ms / tunables.sync_scroll_report_ms.max(1)) as usize;
        if valid < required {
            trace!("twist: warming up ({} / {})", valid, required);
            return 0.0;
        }

        // 4.3.5 EMA smoothing
        let forward = dir == TwistDirection::Forward;
        let delta_y = if forward { s2y - s1y } else { s1y - s2y }.abs();
        let translation = (s1x + s2x).abs() + (s1y + s2y).abs();
        let alpha = tunables.ema_alpha_pct as f32 / 100.0;
        if !self.ema_initialized {
            self.ema_delta_y = delta_y;
            self.ema_translation = translation;
            self.ema_initialized = true;
        } else {
            self.ema_delta_y = alpha * delta_y + (1.0 - alpha) * self.ema_delta_y;
            self.ema_translation = alpha * translation + (1.0 - alpha) * self.ema_translation;
        }

        // 4.3.6 shape gate
        let avg_dy = crate::math::floorf(self.ema_delta_y);
        let avg_tr = crate::math::floorf(self.ema_translation);
        let max_mag = avg_tr * tunables.dy_over_trans_num as f32 / tunables.dy_over_trans_den as f32;

        if avg_tr > translation_allowed {
            trace!("twist: rejected by shape gate (translation over hard limit)");
            self.clear_history_and_ema();
            return 0.0;
        }

        let raw_result = if avg_dy - tunables.twist_thres > max_mag {
            avg_dy - avg_tr
        } else {
            0.0
        };
        let sign = if s1y > s2y { -1.0 } else { 1.0 };
        let result = raw_result * sign;

        if result.abs() < tunables.twist_thres || result.abs() > tunables.twist_max_value {
            trace!("twist: rejected by shape gate (magnitude out of range)");
            return 0.0;
        }
        if avg_tr > tunables.twist_interference_thres {
            trace!("twist: rejected by shape gate (soft interference)");
            return 0.0;
        }

        // 4.3.7 temporal gates
        if now.saturating_sub(self.debounce_start_ms) < tunables.twist_filter_debounce_ms {
            trace!("twist: rejected by debounce");
            return 0.0;
        }
        if now.saturating_sub(self.last_twist_ms) > tunables.twist_filter_ttl_ms {
            trace!("twist: idle too long, re-arming debounce");
            self.debounce_start_ms = now;
            self.last_twist_ms = now;
            return 0.0;
        }
        if let Some(last_move) = self.last_significant_movement_ms {
            if now.saturating_sub(last_move) < tunables.steady_cooldown_ms {
                trace!("twist: rejected by steady-movement cooldown");
                return 0.0;
            }
        }

        // 4.3.8 accept
        self.last_twist_ms = now;
        self.last_direction = dir;
        scheduler.schedule(
            WorkHandle::TwistHistoryCleanup,
            tunables.twist_interference_window_ms,
        );
        scheduler.schedule(
            WorkHandle::DirectionFilterCleanup,
            tunables.direction_filter_ttl_ms,
        );

        result
    }

    /// Scheduled-work callback: clears the dataframe history after a period
    /// of twist inactivity.
    pub fn on_history_cleanup(&mut self) {
        self.clear_history_and_ema();
    }

    /// Scheduled-work callback: resets the direction filter so the next
    /// twist, in either direction, is accepted without being treated as a flip.
    pub fn on_direction_filter_cleanup(&mut self) {
        self.last_direction = TwistDirection::None;
    }
}

/// Applies `twist_coef` (and the optional acceleration multiplier) to an
/// accepted twist magnitude, carries the fractional remainder, and returns
/// the integer wheel delta to emit (0 if nothing crossed an integer yet).
pub fn emit(
    wheel_remainder: &mut f32,
    last_twist_emit_ms: &mut u64,
    accepted: f32,
    twist_coef: f32,
    accel_multiplier: f32,
    now: u64,
    twist_remainder_ttl_ms: u64,
    twist_reversed: bool,
) -> i32 {
    let scaled = accepted * twist_coef * accel_multiplier;
    if now.saturating_sub(*last_twist_emit_ms) > twist_remainder_ttl_ms {
        *wheel_remainder = scaled;
    } else {
        *wheel_remainder += scaled;
    }
    let out = crate::math::truncf(*wheel_remainder);
    *wheel_remainder -= out;
    *last_twist_emit_ms = now;
    let v = out as i32;
    if twist_reversed {
        -v
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::fake::FakeScheduler;
    use crate::SensorId;

    fn feed(acc: &mut Accumulator, s1y: f32, s2y: f32) {
        acc.twist[0].y += s1y;
        acc.twist[1].y += s2y;
    }

    #[test]
    fn quiet_dataframe_produces_no_twist() {
        let t = Tunables::default();
        let mut det = TwistDetector::new(&t);
        let mut acc = Accumulator::default();
        let mut sched = FakeScheduler::new();
        assert_eq!(det.tick(&mut acc, &t, &mut sched, 0), 0.0);
    }

    #[test]
    fn below_threshold_is_rejected() {
        let t = Tunables::default();
        let mut det = TwistDetector::new(&t);
        let mut acc = Accumulator::default();
        let mut sched = FakeScheduler::new();
        feed(&mut acc, 5.0, -5.0);
        assert_eq!(det.tick(&mut acc, &t, &mut sched, 0), 0.0);
    }

    #[test]
    fn large_translation_rejects_twist() {
        let t = Tunables::default();
        let mut det = TwistDetector::new(&t);
        let mut acc = Accumulator::default();
        let mut sched = FakeScheduler::new();
        acc.twist[0].x = 50.0;
        acc.twist[1].x = 50.0;
        feed(&mut acc, 40.0, -40.0);
        assert_eq!(det.tick(&mut acc, &t, &mut sched, 0), 0.0);
    }

    #[test]
    fn sustained_clean_twist_warms_up_then_emits() {
        let t = Tunables::default();
        let mut det = TwistDetector::new(&t);
        let mut sched = FakeScheduler::new();
        let mut last = 0.0;
        let mut now = 0u64;
        for _ in 0..6 {
            let mut acc = Accumulator::default();
            feed(&mut acc, 40.0, -40.0);
            last = det.tick(&mut acc, &t, &mut sched, now);
            now += t.sync_scroll_report_ms;
        }
        assert!(last != 0.0, "expected a twist to be accepted after warmup");
    }

    #[test]
    fn direction_flip_clears_history_and_requires_rewarmup() {
        let t = Tunables::default();
        let mut det = TwistDetector::new(&t);
        let mut sched = FakeScheduler::new();
        let mut now = 0u64;
        for _ in 0..6 {
            let mut acc = Accumulator::default();
            feed(&mut acc, 40.0, -40.0);
            det.tick(&mut acc, &t, &mut sched, now);
            now += t.sync_scroll_report_ms;
        }
        let mut acc = Accumulator::default();
        feed(&mut acc, -40.0, 40.0);
        let flipped = det.tick(&mut acc, &t, &mut sched, now);
        assert_eq!(flipped, 0.0);
        assert!(det.history.is_empty());
    }

    #[test]
    fn emit_carries_fractional_remainder() {
        let mut remainder = 0.0;
        let mut last_emit = 0u64;
        let v1 = emit(&mut remainder, &mut last_emit, 10.0, 0.15, 1.0, 0, 150, false);
        assert_eq!(v1, 1); // 1.5 -> trunc 1, remainder 0.5
        let v2 = emit(&mut remainder, &mut last_emit, 10.0, 0.15, 1.0, 10, 150, false);
        assert_eq!(v2, 2); // 0.5 + 1.5 = 2.0 -> trunc 2
    }

    #[test]
    fn emit_reverses_sign_when_twist_reversed() {
        let mut remainder = 0.0;
        let mut last_emit = 0u64;
        let v = emit(&mut remainder, &mut last_emit, 10.0, 1.0, 1.0, 0, 150, true);
        assert_eq!(v, -10);
    }
}
