//! Layered configuration: immutable per-device geometry, compile-time
//! tunables, and the validated, runtime-mutable behavior descriptors that
//! drive sensitivity adjustment.

use crate::error::{ConfigField, MixerError};
use crate::geometry::{self, Mat2, Vec3};
use crate::log::{error, info, warn};
use crate::SensorId;

/// Optional per-ball haptic feedback wiring for twist-scroll pulses (§4.5,
/// §6.6). Boards without a feedback GPIO simply never call
/// [`BallConfig::with_twist_feedback`].
#[derive(Debug, Clone, Copy)]
pub struct TwistFeedbackSpec {
    pub duration_ms: u32,
    pub threshold: u32,
    pub delay_ms: u32,
}

/// Immutable per-device ball geometry, validated once at construction.
#[derive(Debug, Clone, Copy)]
pub struct BallConfig {
    pub radius: f32,
    pub sensor1_pos: Vec3,
    pub sensor2_pos: Vec3,
    pub twist_feedback: Option<TwistFeedbackSpec>,
    /// Rotation matrix mapping sensor 1's surface-point frame to ball-frame.
    pub(crate) rot1: Mat2,
    /// Rotation matrix mapping sensor 2's surface-point frame to ball-frame.
    pub(crate) rot2: Mat2,
}

impl BallConfig {
    /// Build a ball configuration from raw device-tree-resolved values.
    ///
    /// `sensor_pos` components are already de-biased (i.e. the vector from
    /// ball center to the sensor mount, not the raw `0..=255` devicetree
    /// encoding — that bias subtraction is the firmware adapter's job).
    pub fn new(radius: f32, sensor1_pos: Vec3, sensor2_pos: Vec3) -> Result<Self, MixerError> {
        if !(radius > 0.0 && radius <= 127.0) {
            error!("ball config: radius {} out of range (0, 127]", radius);
            return Err(MixerError::ConfigInvalid(ConfigField::BallRadius));
        }
        if sensor1_pos == sensor2_pos {
            error!("ball config: both sensors mounted at the same position");
            return Err(MixerError::ConfigInvalid(
                ConfigField::SensorPositionsCoincide,
            ));
        }

        let surface1 = geometry::line_sphere_intersection(radius, sensor1_pos);
        let surface2 = geometry::line_sphere_intersection(radius, sensor2_pos);
        let down = Vec3 {
            x: 0.0,
            y: 0.0,
            z: -1.0,
        };
        let (rot1, degenerate1) = surface1
            .map(|p| geometry::rotation_between_checked(p, down))
            .unwrap_or((Mat2::IDENTITY, true));
        let (rot2, degenerate2) = surface2
            .map(|p| geometry::rotation_between_checked(p, down))
            .unwrap_or((Mat2::IDENTITY, true));
        if degenerate1 {
            warn!("ball config: degenerate geometry for sensor 1, leaving rotation as identity");
        }
        if degenerate2 {
            warn!("ball config: degenerate geometry for sensor 2, leaving rotation as identity");
        }

        info!(
            "ball config: radius={} rot1=[{},{},{},{}] rot2=[{},{},{},{}]",
            radius, rot1.m00, rot1.m01, rot1.m10, rot1.m11, rot2.m00, rot2.m01, rot2.m10, rot2.m11
        );

        Ok(Self {
            radius,
            sensor1_pos,
            sensor2_pos,
            twist_feedback: None,
            rot1,
            rot2,
        })
    }

    /// Attaches the haptic feedback wiring for twist-scroll pulses.
    pub fn with_twist_feedback(mut self, spec: TwistFeedbackSpec) -> Self {
        self.twist_feedback = Some(spec);
        self
    }

    pub(crate) fn rotation_for(&self, sensor: SensorId) -> Mat2 {
        match sensor {
            SensorId::One => self.rot1,
            SensorId::Two => self.rot2,
        }
    }
}

/// Compile-time tunables with the defaults named in the design notes.
/// A product integration overrides a subset rather than forking the crate.
#[derive(Debug, Clone, Copy)]
pub struct Tunables {
    pub sync_report_ms: u64,
    pub sync_scroll_report_ms: u64,
    pub sync_window_ms: u64,
    pub remainder_ttl_ms: u64,
    pub twist_remainder_ttl_ms: u64,
    pub twist_filter_ttl_ms: u64,
    pub twist_filter_debounce_ms: u64,
    pub direction_filter_ttl_ms: u64,
    pub steady_thres: i32,
    pub steady_cooldown_ms: u64,
    pub significant_movement_mul: f32,
    pub ema_alpha_pct: u32,
    pub dy_over_trans_num: i32,
    pub dy_over_trans_den: i32,
    pub twist_max_value: f32,
    pub settings_save_delay_ms: u64,
    pub feedback_max_continuous_ms: u64,
    pub feedback_cooldown_ms: u64,
    pub drift_correction_tenths: u32,
    pub twist_thres: f32,
    pub twist_interference_thres: f32,
    pub twist_interference_window_ms: u64,
    pub direction_filter_enabled: bool,
    pub pointer_after_scroll_activation_ms: u64,
    pub scroll_suppresses_pointer: bool,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            sync_report_ms: 8,
            sync_scroll_report_ms: 20,
            sync_window_ms: 10,
            remainder_ttl_ms: 200,
            twist_remainder_ttl_ms: 150,
            twist_filter_ttl_ms: 120,
            twist_filter_debounce_ms: 40,
            direction_filter_ttl_ms: 200,
            steady_thres: 3,
            steady_cooldown_ms: 80,
            significant_movement_mul: 5.0,
            ema_alpha_pct: 25,
            dy_over_trans_num: 3,
            dy_over_trans_den: 2,
            twist_max_value: 5000.0,
            settings_save_delay_ms: 500,
            feedback_max_continuous_ms: 400,
            feedback_cooldown_ms: 600,
            drift_correction_tenths: 20,
            twist_thres: 30.0,
            twist_interference_thres: 8.0,
            twist_interference_window_ms: 60,
            direction_filter_enabled: true,
            pointer_after_scroll_activation_ms: 0,
            scroll_suppresses_pointer: false,
        }
    }
}

/// Bound on the number of steps a feedback wrap pattern may carry.
pub const MAX_FEEDBACK_PATTERN_LEN: usize = 8;

/// A validated, persisted, cycle-by-step sensitivity/acceleration behavior.
#[derive(Debug, Clone)]
pub struct BehaviorConfig {
    /// Step size, in thousandths (10 => 0.010).
    pub step: u32,
    pub min_step: u32,
    pub max_step: u32,
    pub max_multiplier: f32,
    pub wrap: bool,
    pub feedback_on_limit: bool,
    pub feedback_duration_ms: u32,
    pub feedback_wrap_pattern: heapless::Vec<u32, MAX_FEEDBACK_PATTERN_LEN>,
    /// Whether this behavior governs a coefficient capped at 1.0 (pointer)
    /// or may exceed it up to `max_multiplier` (scroll/accel).
    pub scroll: bool,
    /// Human-readable name for shell/keymap-UI introspection.
    pub display_name: &'static str,
}

impl BehaviorConfig {
    pub fn new(
        step: u32,
        min_step: u32,
        max_step: u32,
        max_multiplier: f32,
        wrap: bool,
        scroll: bool,
    ) -> Result<Self, MixerError> {
        if step == 0 {
            error!("behavior config: step must be non-zero");
            return Err(MixerError::ConfigInvalid(ConfigField::BehaviorStep));
        }
        if min_step == 0 {
            error!("behavior config: min_step must be non-zero");
            return Err(MixerError::ConfigInvalid(ConfigField::BehaviorMinStep));
        }
        if max_step == 0 {
            error!("behavior config: max_step must be non-zero");
            return Err(MixerError::ConfigInvalid(ConfigField::BehaviorMaxStep));
        }
        if max_multiplier <= 0.0 {
            error!("behavior config: max_multiplier must be positive");
            return Err(MixerError::ConfigInvalid(
                ConfigField::BehaviorMaxMultiplier,
            ));
        }
        if min_step >= max_step {
            error!("behavior config: min_step must be below max_step");
            return Err(MixerError::ConfigInvalid(ConfigField::BehaviorMinGeMax));
        }
        Ok(Self {
            step,
            min_step,
            max_step,
            max_multiplier,
            wrap,
            feedback_on_limit: false,
            feedback_duration_ms: 0,
            feedback_wrap_pattern: heapless::Vec::new(),
            scroll,
            display_name: "",
        })
    }

    /// Attaches a display name and, optionally, the feedback-on-limit
    /// behavior used by shell introspection (§6.5, §10.5).
    pub fn with_display_name(mut self, name: &'static str) -> Self {
        self.display_name = name;
        self
    }

    /// Attaches the haptic feedback settings for this behavior (§4.4 step 6).
    pub fn with_feedback(
        mut self,
        on_limit: bool,
        duration_ms: u32,
        wrap_pattern: &[u32],
    ) -> Self {
        self.feedback_on_limit = on_limit;
        self.feedback_duration_ms = duration_ms;
        self.feedback_wrap_pattern = heapless::Vec::from_slice(wrap_pattern).unwrap_or_default();
        self
    }

    pub fn one_step(&self) -> f32 {
        self.step as f32 / 1000.0
    }

    pub fn min(&self) -> f32 {
        self.min_step as f32 * self.one_step()
    }

    pub fn max(&self) -> f32 {
        let by_step = self.max_step as f32 * self.one_step();
        let capped = if self.scroll {
            by_step.min(self.max_multiplier)
        } else {
            by_step.min(self.max_multiplier).min(1.0)
        };
        capped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ball_config_rejects_radius_over_127() {
        let v = Vec3 {
            x: 1.0,
            y: 0.0,
            z: 0.0,
        };
        let v2 = Vec3 {
            x: -1.0,
            y: 0.0,
            z: 0.0,
        };
        let err = BallConfig::new(128.0, v, v2).unwrap_err();
        assert_eq!(err, MixerError::ConfigInvalid(ConfigField::BallRadius));
    }

    #[test]
    fn ball_config_rejects_coincident_sensors() {
        let v = Vec3 {
            x: 1.0,
            y: 0.0,
            z: 0.0,
        };
        let err = BallConfig::new(10.0, v, v).unwrap_err();
        assert_eq!(
            err,
            MixerError::ConfigInvalid(ConfigField::SensorPositionsCoincide)
        );
    }

    #[test]
    fn behavior_min_must_be_below_max() {
        let err = BehaviorConfig::new(10, 50, 50, 2.0, true, true).unwrap_err();
        assert_eq!(err, MixerError::ConfigInvalid(ConfigField::BehaviorMinGeMax));
    }

    #[test]
    fn behavior_bounds_respect_scroll_flag() {
        let pointer = BehaviorConfig::new(10, 1, 200, 2.0, true, false).unwrap();
        assert_eq!(pointer.max(), 1.0);
        let scroll = BehaviorConfig::new(10, 1, 200, 2.0, true, true).unwrap();
        assert_eq!(scroll.max(), 2.0);
    }
}
