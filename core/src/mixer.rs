//! The mixer: composes geometry, accumulation, pointer/twist pipelines,
//! feedback and sensitivity state into the single entry point firmware
//! drives per incoming sensor report. Everything else in this crate is a
//! pure function or a small state machine; this is where they're wired
//! together.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::accumulator::Accumulator;
use crate::config::{BallConfig, BehaviorConfig, Tunables};
use crate::error::MixerError;
use crate::feedback::{FeedbackController, FeedbackPins};
use crate::log::{error, info, trace, warn};
use crate::persistence::{PersistedAccel, PersistedSensitivity, PersistenceStore};
use crate::pointer;
use crate::scheduler::{Scheduler, WorkHandle};
use crate::sensitivity::{self, SensitivityState, SensitivityStore};
use crate::twist::{self, TwistDetector};
use crate::{Axis, Direction, OutAxis, Scope, SensorId, ToggleAction};

/// Output collaborator the mixer emits relative motion/scroll events
/// through, mirroring the `input_report_rel` / `input_sync` pairing of
/// §6.3: `sync` marks the final event of a coalesced report and tells the
/// receiving side the report is complete.
pub trait EventSink {
    fn emit_rel(&mut self, axis: OutAxis, value: i32, sync: bool);
}

static MIXER_CLAIMED: AtomicBool = AtomicBool::new(false);

/// Proof of exclusive ownership of the process-global mixer slot (§5, §9):
/// only one ball mixer is supported live at a time. Obtained from
/// [`claim_singleton`]; dropping it releases the claim for a future retry.
#[derive(Debug)]
pub struct MixerClaim(());

impl Drop for MixerClaim {
    fn drop(&mut self) {
        MIXER_CLAIMED.store(false, Ordering::SeqCst);
    }
}

/// Claims the process-global mixer slot. A second call before the first
/// claim is dropped returns [`MixerError::AlreadyInitialized`]; the
/// existing instance keeps serving events uninterrupted.
pub fn claim_singleton() -> Result<MixerClaim, MixerError> {
    if MIXER_CLAIMED.swap(true, Ordering::SeqCst) {
        Err(MixerError::AlreadyInitialized)
    } else {
        Ok(MixerClaim(()))
    }
}

/// Accessor guard for firmware adapters that hold the mixer behind an
/// `Option` until boot/pairing completes: calls `f` against it if present,
/// else returns [`MixerError::NotInitialized`] instead of panicking (§7).
pub fn guarded<T: Default>(mixer: &Option<Mixer>, f: impl FnOnce(&Mixer) -> T) -> Result<T, MixerError> {
    match mixer {
        Some(m) => sensitivity::guard_initialized(true, f(m)),
        None => sensitivity::guard_initialized(false, T::default()),
    }
}

/// The fusion core for one trackball's pair of sensors.
pub struct Mixer {
    ball: BallConfig,
    tunables: Tunables,
    acc: Accumulator,
    twist: TwistDetector,
    feedback: FeedbackController,
    sensitivity: SensitivityState,
}

impl Mixer {
    pub fn new(ball: BallConfig, tunables: Tunables) -> Self {
        info!("mixer: initialized, radius={}", ball.radius);
        Self {
            twist: TwistDetector::new(&tunables),
            ball,
            tunables,
            acc: Accumulator::default(),
            feedback: FeedbackController::default(),
            sensitivity: SensitivityState::default(),
        }
    }

    /// Intake for one raw relative-motion report from either sensor (§4.1,
    /// §6.1). `value`/`sync` are taken by mutable reference and zeroed
    /// out/cleared: the raw sensor event is consumed into the accumulator
    /// rather than forwarded, and the caller emits only what `sink` receives
    /// from the pointer/twist ticks this call may trigger.
    pub fn on_event<Sink: EventSink, Sch: Scheduler, Pins: FeedbackPins>(
        &mut self,
        sensor: SensorId,
        axis: Axis,
        value: &mut i32,
        sync: &mut bool,
        sink: &mut Sink,
        scheduler: &mut Sch,
        pins: &mut Pins,
    ) {
        let now = scheduler.now_ms();
        self.acc.add_raw(sensor, axis, *value, now);
        *value = 0;
        *sync = false;

        if self.acc.enforce_sync_window(self.tunables.sync_window_ms) {
            trace!("mixer: sync window exceeded, accumulators cleared");
            return;
        }

        if now.saturating_sub(self.acc.last_emit_ms) >= self.tunables.sync_report_ms {
            self.pointer_tick(now, sink);
        }

        if self.sensitivity.twist_enabled
            && now.saturating_sub(self.acc.last_twist_emit_ms) >= self.tunables.sync_scroll_report_ms
        {
            self.twist_tick(now, sink, scheduler, pins);
        }
    }

    fn pointer_tick<Sink: EventSink>(&mut self, now: u64, sink: &mut Sink) {
        let out = pointer::tick(
            &mut self.acc,
            &self.ball,
            self.sensitivity.move_coef,
            now,
            self.tunables.remainder_ttl_ms,
        );

        if out.x.abs() > self.tunables.steady_thres || out.y.abs() > self.tunables.steady_thres {
            self.twist.note_significant_movement(now);
        }

        if self.tunables.scroll_suppresses_pointer
            && now.saturating_sub(self.acc.last_twist_emit_ms)
                < self.tunables.pointer_after_scroll_activation_ms
        {
            trace!("mixer: pointer suppressed, recent scroll activity");
            return;
        }

        if out.x != 0 {
            sink.emit_rel(OutAxis::RelX, out.x, out.y == 0);
        }
        if out.y != 0 {
            sink.emit_rel(OutAxis::RelY, out.y, true);
        }
    }

    fn twist_tick<Sink: EventSink, Sch: Scheduler, Pins: FeedbackPins>(
        &mut self,
        now: u64,
        sink: &mut Sink,
        scheduler: &mut Sch,
        pins: &mut Pins,
    ) {
        let accepted = self.twist.tick(&mut self.acc, &self.tunables, scheduler, now);
        if accepted == 0.0 {
            return;
        }

        let accel_multiplier = if self.sensitivity.twist_accel_enabled {
            self.sensitivity.twist_accel_value
        } else {
            1.0
        };
        let wheel = twist::emit(
            &mut self.acc.wheel_remainder,
            &mut self.acc.last_twist_emit_ms,
            accepted,
            self.sensitivity.twist_coef,
            accel_multiplier,
            now,
            self.tunables.twist_remainder_ttl_ms,
            self.sensitivity.twist_reversed,
        );
        if wheel == 0 {
            return;
        }
        sink.emit_rel(OutAxis::RelWheel, wheel, true);

        if let Some(spec) = self.ball.twist_feedback {
            if self.feedback.accrue_twist_with_direction(wheel, spec.threshold) {
                self.feedback.pulse(
                    pins,
                    scheduler,
                    spec.duration_ms,
                    now,
                    self.tunables.feedback_max_continuous_ms,
                    self.tunables.feedback_cooldown_ms,
                );
            }
        }
    }

    /// §6.2 sensitivity/scroll-coefficient adjust command, driving the
    /// behavior-wrap haptic feedback of §4.4 step 6 off the result.
    pub fn adjust_sensitivity<Sch: Scheduler, Pins: FeedbackPins>(
        &mut self,
        scheduler: &mut Sch,
        pins: &mut Pins,
        behavior: &BehaviorConfig,
        scope: Scope,
        direction: Direction,
        steps: u32,
    ) -> bool {
        let now = scheduler.now_ms();
        let wrapped = sensitivity::adjust(
            self,
            scheduler,
            behavior,
            self.tunables.drift_correction_tenths,
            self.tunables.settings_save_delay_ms,
            scope,
            direction,
            steps,
        );
        self.drive_behavior_feedback(pins, scheduler, behavior, wrapped, now);
        wrapped
    }

    /// §6.2 acceleration-multiplier adjust command.
    pub fn adjust_accel<Sch: Scheduler, Pins: FeedbackPins>(
        &mut self,
        scheduler: &mut Sch,
        pins: &mut Pins,
        behavior: &BehaviorConfig,
        direction: Direction,
        steps: u32,
    ) -> bool {
        let now = scheduler.now_ms();
        let wrapped = sensitivity::adjust_accel(
            self,
            scheduler,
            behavior,
            self.tunables.drift_correction_tenths,
            self.tunables.settings_save_delay_ms,
            direction,
            steps,
        );
        self.drive_behavior_feedback(pins, scheduler, behavior, wrapped, now);
        wrapped
    }

    pub fn toggle_accel(&mut self, action: ToggleAction) {
        SensitivityStore::set_accel_enabled(self, action);
    }

    pub fn toggle_twist(&mut self) {
        SensitivityStore::toggle_twist(self);
    }

    pub fn toggle_twist_reverse(&mut self) {
        SensitivityStore::toggle_twist_reversed(self);
    }

    /// `feedback_on_limit = false` fires the simple pulse on every adjust
    /// that has a nonzero `feedback_duration_ms`; `true` narrows that to
    /// only the presses that actually wrapped. A wrap additionally prefers
    /// the multi-step pattern over the plain pulse when one is configured.
    fn drive_behavior_feedback<Sch: Scheduler, Pins: FeedbackPins>(
        &mut self,
        pins: &mut Pins,
        scheduler: &mut Sch,
        behavior: &BehaviorConfig,
        wrapped: bool,
        now: u64,
    ) {
        if behavior.feedback_duration_ms == 0 {
            return;
        }
        if behavior.feedback_on_limit && !wrapped {
            return;
        }
        if wrapped && !behavior.feedback_wrap_pattern.is_empty() {
            self.feedback
                .start_pattern(pins, scheduler, &behavior.feedback_wrap_pattern);
        } else {
            self.feedback.pulse(
                pins,
                scheduler,
                behavior.feedback_duration_ms,
                now,
                self.tunables.feedback_max_continuous_ms,
                self.tunables.feedback_cooldown_ms,
            );
        }
    }

    /// §6.4 load: best-effort, falls back to defaults and logs on a miss
    /// rather than failing.
    pub fn load_from_store<Store: PersistenceStore>(&mut self, store: &mut Store) {
        match store.load_sensitivity() {
            Some(p) => {
                self.sensitivity.move_coef = p.move_coef;
                self.sensitivity.twist_coef = p.twist_coef;
                self.sensitivity.twist_reversed = p.twist_reversed;
                info!("mixer: sensitivity restored from persistence");
            }
            None => {
                warn!("mixer: no persisted sensitivity, keeping defaults");
            }
        }
        match store.load_accel() {
            Some(a) => {
                self.sensitivity.twist_accel_enabled = a.enabled;
                self.sensitivity.twist_accel_value = a.value;
            }
            None => {
                warn!("mixer: no persisted acceleration, keeping defaults");
            }
        }
    }

    /// §6.4 save, triggered by `WorkHandle::SettingsSave`. A failure is
    /// logged and otherwise ignored: the in-memory value stays authoritative.
    pub fn save_to_store<Store: PersistenceStore>(&mut self, store: &mut Store) {
        let sens = PersistedSensitivity {
            move_coef: self.sensitivity.move_coef,
            twist_coef: self.sensitivity.twist_coef,
            twist_reversed: self.sensitivity.twist_reversed,
        };
        if store.save_sensitivity(sens).is_err() {
            error!("mixer: failed to persist sensitivity");
        }
        let accel = PersistedAccel {
            enabled: self.sensitivity.twist_accel_enabled,
            value: self.sensitivity.twist_accel_value,
        };
        if store.save_accel(accel).is_err() {
            error!("mixer: failed to persist acceleration");
        }
    }

    /// Dispatches one fired [`WorkHandle`] to the component that owns it.
    pub fn on_work<Pins: FeedbackPins, Sch: Scheduler, Store: PersistenceStore>(
        &mut self,
        handle: WorkHandle,
        pins: &mut Pins,
        scheduler: &mut Sch,
        store: &mut Store,
    ) {
        match handle {
            WorkHandle::FeedbackOff => self.feedback.on_feedback_off(pins),
            WorkHandle::FeedbackPatternStep => self.feedback.on_pattern_step(pins, scheduler),
            WorkHandle::FeedbackCooldownEnd => self.feedback.on_cooldown_end(),
            WorkHandle::TwistHistoryCleanup => self.twist.on_history_cleanup(),
            WorkHandle::DirectionFilterCleanup => self.twist.on_direction_filter_cleanup(),
            WorkHandle::SettingsSave => self.save_to_store(store),
        }
    }
}

impl SensitivityStore for Mixer {
    fn get_move_coef(&self) -> f32 {
        self.sensitivity.move_coef
    }

    fn set_move_coef(&mut self, v: f32) {
        self.sensitivity.move_coef = v;
    }

    fn get_twist_coef(&self) -> f32 {
        self.sensitivity.twist_coef
    }

    fn set_twist_coef(&mut self, v: f32) {
        self.sensitivity.twist_coef = v;
    }

    fn get_twist_accel_value(&self) -> f32 {
        self.sensitivity.twist_accel_value
    }

    fn set_twist_accel_value(&mut self, v: f32) {
        self.sensitivity.twist_accel_value = v;
    }

    fn is_twist_enabled(&self) -> bool {
        self.sensitivity.twist_enabled
    }

    fn toggle_twist(&mut self) {
        self.sensitivity.twist_enabled = !self.sensitivity.twist_enabled;
        info!("mixer: twist {}", self.sensitivity.twist_enabled);
    }

    fn is_twist_reversed(&self) -> bool {
        self.sensitivity.twist_reversed
    }

    fn toggle_twist_reversed(&mut self) {
        self.sensitivity.twist_reversed = !self.sensitivity.twist_reversed;
        info!("mixer: twist reversed {}", self.sensitivity.twist_reversed);
    }

    fn is_accel_enabled(&self) -> bool {
        self.sensitivity.twist_accel_enabled
    }

    fn set_accel_enabled(&mut self, action: ToggleAction) {
        self.sensitivity.twist_accel_enabled =
            sensitivity::toggle_action(self.sensitivity.twist_accel_enabled, action);
        info!("mixer: twist acceleration {}", self.sensitivity.twist_accel_enabled);
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use heapless::Vec as HVec;

    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct EmittedEvent {
        pub axis: OutAxis,
        pub value: i32,
        pub sync: bool,
    }

    /// Records every emitted event in order, for test assertions.
    #[derive(Default)]
    pub struct FakeSink {
        pub events: HVec<EmittedEvent, 64>,
    }

    impl FakeSink {
        pub fn wheel_total(&self) -> i32 {
            self.events
                .iter()
                .filter(|e| e.axis == OutAxis::RelWheel)
                .map(|e| e.value)
                .sum()
        }
    }

    impl EventSink for FakeSink {
        fn emit_rel(&mut self, axis: OutAxis, value: i32, sync: bool) {
            let _ = self.events.push(EmittedEvent { axis, value, sync });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeSink;
    use super::*;
    use crate::feedback::NoFeedbackPins;
    use crate::geometry::Vec3;
    use crate::persistence::fake::FakeStore;
    use crate::scheduler::fake::FakeScheduler;

    fn identity_ball() -> BallConfig {
        BallConfig::new(
            10.0,
            Vec3 { x: 0.0, y: 0.0, z: -1.0 },
            Vec3 { x: 1.0, y: 0.0, z: 0.0 },
        )
        .unwrap()
    }

    /// Both mounts lie on the same ball-center ray (only their distance
    /// differs, so `BallConfig::new`'s coincidence check still passes).
    /// Both surface points then normalize to the same "down" direction, so
    /// both sensors get an identity rotation — raw deltas pass through to
    /// the twist pipeline unchanged, letting a test drive it with the same
    /// numbers the detector's own unit tests use.
    fn dual_identity_ball() -> BallConfig {
        BallConfig::new(
            10.0,
            Vec3 { x: 0.0, y: 0.0, z: -5.0 },
            Vec3 { x: 0.0, y: 0.0, z: -20.0 },
        )
        .unwrap()
    }

    fn mixer() -> Mixer {
        Mixer::new(identity_ball(), Tunables::default())
    }

    fn behavior() -> BehaviorConfig {
        BehaviorConfig::new(10, 1, 100, 1.0, true, false).unwrap()
    }

    #[test]
    fn pure_translation_emits_pointer_events_only() {
        let mut m = mixer();
        let mut sink = FakeSink::default();
        let mut sched = FakeScheduler::new();
        let mut pins = NoFeedbackPins;
        let step = Tunables::default().sync_report_ms;

        for _ in 0..6 {
            let mut value = 5;
            let mut sync = true;
            m.on_event(
                SensorId::One,
                Axis::X,
                &mut value,
                &mut sync,
                &mut sink,
                &mut sched,
                &mut pins,
            );
            sched.advance(step);
        }

        assert!(sink.events.iter().any(|e| e.axis == OutAxis::RelX));
        assert!(sink.events.iter().all(|e| e.axis != OutAxis::RelWheel));
    }

    #[test]
    fn sustained_clean_twist_eventually_emits_wheel() {
        let mut m = Mixer::new(dual_identity_ball(), Tunables::default());
        let mut sink = FakeSink::default();
        let mut sched = FakeScheduler::new();
        let mut pins = NoFeedbackPins;
        // Must stay within `sync_window_ms` (10ms) of each other or the sync
        // guard wipes both accumulators before twist detection ever sees
        // sensor One's contribution.
        let step = Tunables::default().sync_window_ms;

        for _ in 0..48 {
            let mut v1 = 40;
            let mut s1 = true;
            m.on_event(SensorId::One, Axis::Y, &mut v1, &mut s1, &mut sink, &mut sched, &mut pins);
            let mut v2 = -40;
            let mut s2 = true;
            m.on_event(SensorId::Two, Axis::Y, &mut v2, &mut s2, &mut sink, &mut sched, &mut pins);
            sched.advance(step);
        }

        assert!(
            sink.events.iter().any(|e| e.axis == OutAxis::RelWheel),
            "expected at least one wheel event from a sustained clean twist"
        );
    }

    #[test]
    fn large_translation_never_produces_a_twist() {
        let mut m = mixer();
        let mut sink = FakeSink::default();
        let mut sched = FakeScheduler::new();
        let mut pins = NoFeedbackPins;
        let step = Tunables::default().sync_scroll_report_ms;

        for _ in 0..12 {
            let mut v1 = 4000;
            let mut s1 = true;
            m.on_event(SensorId::One, Axis::X, &mut v1, &mut s1, &mut sink, &mut sched, &mut pins);
            let mut v2 = 40;
            let mut s2 = true;
            m.on_event(SensorId::One, Axis::Y, &mut v2, &mut s2, &mut sink, &mut sched, &mut pins);
            let mut v3 = 4000;
            let mut s3 = true;
            m.on_event(SensorId::Two, Axis::X, &mut v3, &mut s3, &mut sink, &mut sched, &mut pins);
            let mut v4 = -40;
            let mut s4 = true;
            m.on_event(SensorId::Two, Axis::Y, &mut v4, &mut s4, &mut sink, &mut sched, &mut pins);
            sched.advance(step);
        }

        assert!(sink.events.iter().all(|e| e.axis != OutAxis::RelWheel));
    }

    #[test]
    fn twist_disabled_gate_blocks_any_wheel_emission() {
        let mut m = Mixer::new(dual_identity_ball(), Tunables::default());
        let mut sink = FakeSink::default();
        let mut sched = FakeScheduler::new();
        let mut pins = NoFeedbackPins;
        let step = Tunables::default().sync_scroll_report_ms;

        m.toggle_twist();
        assert!(!m.is_twist_enabled());

        for _ in 0..24 {
            let mut v1 = 40;
            let mut s1 = true;
            m.on_event(SensorId::One, Axis::Y, &mut v1, &mut s1, &mut sink, &mut sched, &mut pins);
            let mut v2 = -40;
            let mut s2 = true;
            m.on_event(SensorId::Two, Axis::Y, &mut v2, &mut s2, &mut sink, &mut sched, &mut pins);
            sched.advance(step);
        }

        assert!(
            sink.events.iter().all(|e| e.axis != OutAxis::RelWheel),
            "twist_enabled=false must suppress the twist tick entirely"
        );
    }

    #[test]
    fn adjust_sensitivity_schedules_a_debounced_save() {
        let mut m = mixer();
        let mut sched = FakeScheduler::new();
        let mut pins = NoFeedbackPins;
        let b = behavior();
        m.adjust_sensitivity(&mut sched, &mut pins, &b, Scope::Pointer, Direction::Dec, 1);
        assert!(sched.is_pending(WorkHandle::SettingsSave));
    }

    #[test]
    fn save_then_load_round_trips_through_a_fresh_mixer() {
        let mut m = mixer();
        m.set_move_coef(0.42);
        m.set_twist_coef(0.3);
        let mut store = FakeStore::default();
        m.save_to_store(&mut store);

        let mut m2 = mixer();
        m2.load_from_store(&mut store);
        assert!((m2.get_move_coef() - 0.42).abs() < 1e-6);
        assert!((m2.get_twist_coef() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn load_with_no_persisted_value_keeps_defaults() {
        let mut m = mixer();
        let mut store = FakeStore::default();
        m.load_from_store(&mut store);
        assert_eq!(m.get_move_coef(), SensitivityState::default().move_coef);
    }

    #[test]
    fn toggle_twist_flips_enabled_state() {
        let mut m = mixer();
        let before = m.is_twist_enabled();
        m.toggle_twist();
        assert_eq!(m.is_twist_enabled(), !before);
    }

    #[test]
    fn toggle_accel_respects_explicit_action() {
        let mut m = mixer();
        m.toggle_accel(ToggleAction::Enable);
        assert!(m.is_accel_enabled());
        m.toggle_accel(ToggleAction::Disable);
        assert!(!m.is_accel_enabled());
    }

    #[test]
    fn claiming_the_singleton_twice_fails_until_dropped() {
        let claim = claim_singleton().unwrap();
        assert_eq!(claim_singleton().unwrap_err(), MixerError::AlreadyInitialized);
        drop(claim);
        assert!(claim_singleton().is_ok());
    }

    #[test]
    fn guarded_reports_not_initialized_on_none() {
        let none: Option<Mixer> = None;
        let err = guarded(&none, |m| m.get_move_coef()).unwrap_err();
        assert_eq!(err, MixerError::NotInitialized);
    }

    #[test]
    fn guarded_reads_through_to_the_mixer_when_present() {
        let some = Some(mixer());
        let v = guarded(&some, |m| m.get_move_coef()).unwrap();
        assert_eq!(v, SensitivityState::default().move_coef);
    }
}
