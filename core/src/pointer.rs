//! The pointer pipeline: rotates each sensor's raw deltas into ball-frame,
//! scales by the move coefficient, and quantizes with a carried fractional
//! remainder so slow, sub-pixel motion isn't dropped.

use crate::accumulator::Accumulator;
use crate::config::BallConfig;
use crate::SensorId;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PointerEmit {
    pub x: i32,
    pub y: i32,
}

/// Runs one pointer tick: rotates and scales both sensors' pending raw
/// deltas, accrues the ball-frame result into the twist accumulator, and
/// returns the quantized (x, y) to emit (zero components are simply not
/// emitted by the caller).
pub fn tick(
    acc: &mut Accumulator,
    ball: &BallConfig,
    move_coef: f32,
    now: u64,
    remainder_ttl_ms: u64,
) -> PointerEmit {
    let mut rx_total = 0.0f32;
    let mut ry_total = 0.0f32;

    for sensor in [SensorId::One, SensorId::Two] {
        let idx = crate::accumulator::sensor_idx(sensor);
        let raw = acc.raw[idx];
        if raw.x == 0 && raw.y == 0 {
            continue;
        }
        let rot = ball.rotation_for(sensor);
        let (rx, ry) = rot.apply(raw.x as f32, raw.y as f32);

        acc.twist[idx].x += rx;
        acc.twist[idx].y += ry;

        rx_total += rx * move_coef;
        ry_total += ry * move_coef;

        acc.clear_raw(sensor);
    }

    if now.saturating_sub(acc.last_emit_ms) > remainder_ttl_ms {
        acc.x_remainder = rx_total;
        acc.y_remainder = ry_total;
    } else {
        acc.x_remainder += rx_total;
        acc.y_remainder += ry_total;
    }

    let out_x = crate::math::truncf(acc.x_remainder);
    let out_y = crate::math::truncf(acc.y_remainder);
    acc.x_remainder -= out_x;
    acc.y_remainder -= out_y;
    acc.last_emit_ms = now;

    PointerEmit {
        x: out_x as i32,
        y: out_y as i32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Vec3;
    use crate::{Axis, SensorId};

    /// Sensor 1 mounted so its surface point already points "down", giving
    /// it an identity rotation matrix; sensor 2's exact orientation doesn't
    /// matter for these tests.
    fn identity_ball() -> BallConfig {
        BallConfig::new(
            10.0,
            Vec3 {
                x: 0.0,
                y: 0.0,
                z: -1.0,
            },
            Vec3 {
                x: 1.0,
                y: 0.0,
                z: 0.0,
            },
        )
        .unwrap()
    }

    #[test]
    fn remainder_never_exceeds_unit_magnitude() {
        let ball = identity_ball();
        let mut acc = Accumulator::default();
        acc.add_raw(SensorId::One, Axis::X, 3, 0);
        acc.add_raw(SensorId::Two, Axis::X, 3, 0);
        let _ = tick(&mut acc, &ball, 0.33, 10, 200);
        assert!(acc.x_remainder.abs() < 1.0);
        assert!(acc.y_remainder.abs() < 1.0);
    }

    #[test]
    fn stale_remainder_is_replaced_not_accumulated() {
        let ball = identity_ball();
        let mut acc = Accumulator::default();
        acc.x_remainder = 0.9;
        acc.last_emit_ms = 0;
        acc.add_raw(SensorId::One, Axis::X, 1, 500);
        let out = tick(&mut acc, &ball, 1.0, 500, 200);
        // stale remainder (age 500ms > ttl 200ms) discarded, not added to fresh 1.0
        assert_eq!(out.x, 1);
    }
}
