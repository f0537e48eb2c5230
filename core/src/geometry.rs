//! Line-sphere intersection and the Rodrigues rotation matrix between two
//! unit vectors. Only the top-left 2x2 submatrix of the rotation is ever
//! applied at runtime, since the z-component of a sensor delta is always
//! zero; the full 3x3 is not worth carrying.

use crate::math::sqrtf;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    fn length(self) -> f32 {
        sqrtf(self.x * self.x + self.y * self.y + self.z * self.z)
    }

    fn normalize(self) -> Option<Self> {
        let len = self.length();
        if len < 1e-6 {
            None
        } else {
            Some(Self {
                x: self.x / len,
                y: self.y / len,
                z: self.z / len,
            })
        }
    }

    fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    fn cross(self, other: Self) -> Self {
        Self {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }
}

/// The 2x2 submatrix of a 3x3 rotation actually used at runtime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mat2 {
    pub m00: f32,
    pub m01: f32,
    pub m10: f32,
    pub m11: f32,
}

impl Mat2 {
    pub const IDENTITY: Mat2 = Mat2 {
        m00: 1.0,
        m01: 0.0,
        m10: 0.0,
        m11: 1.0,
    };

    pub fn apply(self, x: f32, y: f32) -> (f32, f32) {
        (self.m00 * x + self.m01 * y, self.m10 * x + self.m11 * y)
    }
}

/// Intersects the ray from the origin through `dir` with the sphere of
/// radius `r` centered at the origin, returning the point on the sphere.
/// Returns `None` if `dir` is (near) the zero vector.
pub fn line_sphere_intersection(r: f32, dir: Vec3) -> Option<Vec3> {
    let d = dir.length();
    if d < 1e-6 {
        return None;
    }
    let scale = r / d;
    Some(Vec3 {
        x: dir.x * scale,
        y: dir.y * scale,
        z: dir.z * scale,
    })
}

/// Builds the rotation matrix mapping unit vector `from` onto unit vector
/// `to` via the Rodrigues formula `R = cI + s[a]x + (1-c)(a a^T)`. Returns
/// `Mat2::IDENTITY` (a caller-visible no-op) if the two vectors are
/// (anti)parallel, since the rotation axis is then undefined; this is a
/// configuration problem (sensor mounted on the ball-frame axis), not a
/// runtime condition to recover from.
pub fn rotation_between(from: Vec3, to: Vec3) -> Mat2 {
    rotation_between_checked(from, to).0
}

/// As [`rotation_between`], but also reports whether the fallback identity
/// was taken because the geometry is degenerate (antiparallel or a
/// zero-length input) — used by `BallConfig::new` to log
/// `MixerError::DegenerateGeometry` without failing construction.
pub fn rotation_between_checked(from: Vec3, to: Vec3) -> (Mat2, bool) {
    let (Some(from), Some(to)) = (from.normalize(), to.normalize()) else {
        return (Mat2::IDENTITY, true);
    };
    let axis = from.cross(to);
    let axis_len = axis.length();
    if axis_len < 1e-6 {
        return (Mat2::IDENTITY, true);
    }
    let a = Vec3 {
        x: axis.x / axis_len,
        y: axis.y / axis_len,
        z: axis.z / axis_len,
    };
    let c = from.dot(to);
    let s = sqrtf((1.0 - c * c).max(0.0));

    // Skew-symmetric cross-product matrix [a]x, rows (only what we need).
    let skew = [
        [0.0, -a.z, a.y],
        [a.z, 0.0, -a.x],
        [-a.y, a.x, 0.0],
    ];
    let outer = [
        [a.x * a.x, a.x * a.y],
        [a.y * a.x, a.y * a.y],
    ];

    let m00 = c + s * skew[0][0] + (1.0 - c) * outer[0][0];
    let m01 = s * skew[0][1] + (1.0 - c) * outer[0][1];
    let m10 = s * skew[1][0] + (1.0 - c) * outer[1][0];
    let m11 = c + s * skew[1][1] + (1.0 - c) * outer[1][1];

    (Mat2 { m00, m01, m10, m11 }, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_sphere_scales_to_radius() {
        let p = line_sphere_intersection(
            10.0,
            Vec3 {
                x: 3.0,
                y: 0.0,
                z: 4.0,
            },
        )
        .unwrap();
        assert!((p.length() - 10.0).abs() < 1e-3);
    }

    #[test]
    fn line_sphere_rejects_zero_vector() {
        assert!(line_sphere_intersection(
            10.0,
            Vec3 {
                x: 0.0,
                y: 0.0,
                z: 0.0
            }
        )
        .is_none());
    }

    #[test]
    fn rotation_identity_for_equal_vectors() {
        let v = Vec3 {
            x: 0.0,
            y: 0.0,
            z: -1.0,
        };
        let r = rotation_between(v, v);
        assert!((r.m00 - 1.0).abs() < 1e-4);
        assert!((r.m11 - 1.0).abs() < 1e-4);
        assert!(r.m01.abs() < 1e-4);
    }

    #[test]
    fn rotation_maps_x_to_down() {
        let from = Vec3 {
            x: 1.0,
            y: 0.0,
            z: 0.0,
        };
        let to = Vec3 {
            x: 0.0,
            y: 0.0,
            z: -1.0,
        };
        let r = rotation_between(from, to);
        // Only the top-left 2x2 is meaningful here; sanity check it's not identity.
        assert!((r.m00 - 1.0).abs() > 1e-3 || (r.m11 - 1.0).abs() > 1e-3 || r.m01.abs() > 1e-3);
    }

    #[test]
    fn rotation_antiparallel_falls_back_to_identity() {
        let from = Vec3 {
            x: 0.0,
            y: 0.0,
            z: 1.0,
        };
        let to = Vec3 {
            x: 0.0,
            y: 0.0,
            z: -1.0,
        };
        assert_eq!(rotation_between(from, to), Mat2::IDENTITY);
    }
}
