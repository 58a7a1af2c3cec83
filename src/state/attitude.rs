//! Orientation representations and conversions.
//!
//! Quaternions, direction-cosine matrices, eigen-axis/angle, and all twelve
//! rotation sequences convert into one another. The quaternion is the pivot
//! representation; every rotation here maps child-frame components into
//! parent-frame components, matching [`crate::frames::Transform`].
//!
//! Round trips are accurate to better than 1e-9 rad away from sequence
//! singularities. At a singularity (gimbal lock) only the sum or difference
//! of the first and third angles is observable; extraction pins the third
//! angle to zero and folds the rest into the first, which reproduces the
//! original rotation exactly.

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Unit, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};

/// Sine/cosine margin inside which a sequence is treated as locked.
const LOCK_TOL: f64 = 1e-9;

/// The twelve rotation sequences (intrinsic, body-axis order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EulerSequence {
    /// Tait-Bryan X-Y-Z.
    Xyz,
    /// Tait-Bryan X-Z-Y.
    Xzy,
    /// Tait-Bryan Y-X-Z.
    Yxz,
    /// Tait-Bryan Y-Z-X.
    Yzx,
    /// Tait-Bryan Z-X-Y.
    Zxy,
    /// Tait-Bryan Z-Y-X (yaw-pitch-roll).
    Zyx,
    /// Proper Euler X-Y-X.
    Xyx,
    /// Proper Euler X-Z-X.
    Xzx,
    /// Proper Euler Y-X-Y.
    Yxy,
    /// Proper Euler Y-Z-Y.
    Yzy,
    /// Proper Euler Z-X-Z (classical orbital).
    Zxz,
    /// Proper Euler Z-Y-Z.
    Zyz,
}

impl EulerSequence {
    /// All sequences.
    pub fn all() -> &'static [EulerSequence] {
        use EulerSequence::*;
        &[Xyz, Xzy, Yxz, Yzx, Zxy, Zyx, Xyx, Xzx, Yxy, Yzy, Zxz, Zyz]
    }

    /// The three rotation axes in order (0 = X, 1 = Y, 2 = Z).
    pub fn axes(&self) -> [usize; 3] {
        use EulerSequence::*;
        match self {
            Xyz => [0, 1, 2],
            Xzy => [0, 2, 1],
            Yxz => [1, 0, 2],
            Yzx => [1, 2, 0],
            Zxy => [2, 0, 1],
            Zyx => [2, 1, 0],
            Xyx => [0, 1, 0],
            Xzx => [0, 2, 0],
            Yxy => [1, 0, 1],
            Yzy => [1, 2, 1],
            Zxz => [2, 0, 2],
            Zyz => [2, 1, 2],
        }
    }

    /// Whether the first and third axes repeat (proper Euler sequence).
    pub fn is_symmetric(&self) -> bool {
        let [i, _, k] = self.axes();
        i == k
    }

    /// Display name, e.g. `"ZYX"`.
    pub fn name(&self) -> &'static str {
        use EulerSequence::*;
        match self {
            Xyz => "XYZ",
            Xzy => "XZY",
            Yxz => "YXZ",
            Yzx => "YZX",
            Zxy => "ZXY",
            Zyx => "ZYX",
            Xyx => "XYX",
            Xzx => "XZX",
            Yxy => "YXY",
            Yzy => "YZY",
            Zxz => "ZXZ",
            Zyz => "ZYZ",
        }
    }
}

impl std::fmt::Display for EulerSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn basis(axis: usize) -> Unit<Vector3<f64>> {
    match axis {
        0 => Vector3::x_axis(),
        1 => Vector3::y_axis(),
        _ => Vector3::z_axis(),
    }
}

/// +1 for a cyclic axis triple (XYZ, YZX, ZXY), −1 otherwise.
fn parity(i: usize, j: usize) -> f64 {
    if (j + 3 - i) % 3 == 1 {
        1.0
    } else {
        -1.0
    }
}

/// Build a quaternion from three intrinsic rotations.
pub fn quaternion_from_euler(sequence: EulerSequence, angles: [f64; 3]) -> UnitQuaternion<f64> {
    let axes = sequence.axes();
    UnitQuaternion::from_axis_angle(&basis(axes[0]), angles[0])
        * UnitQuaternion::from_axis_angle(&basis(axes[1]), angles[1])
        * UnitQuaternion::from_axis_angle(&basis(axes[2]), angles[2])
}

/// Extract the three angles of a rotation sequence from a quaternion.
pub fn euler_from_quaternion(sequence: EulerSequence, q: &UnitQuaternion<f64>) -> [f64; 3] {
    let m = q.to_rotation_matrix();
    let m = m.matrix();
    let [i, j, k] = sequence.axes();

    if sequence.is_symmetric() {
        // Third "axis index" for the formulas is the one not in {i, j}.
        let w = 3 - i - j;
        let eps = parity(i, j);
        let cos_b = m[(i, i)].clamp(-1.0, 1.0);
        if cos_b.abs() > 1.0 - LOCK_TOL {
            let b = if cos_b > 0.0 { 0.0 } else { std::f64::consts::PI };
            return locked_angles(m, i, j, b);
        }
        let b = cos_b.acos();
        let a = f64::atan2(m[(j, i)], -eps * m[(w, i)]);
        let c = f64::atan2(m[(i, j)], eps * m[(i, w)]);
        [a, b, c]
    } else {
        let eps = parity(i, j);
        let sin_b = (eps * m[(i, k)]).clamp(-1.0, 1.0);
        if sin_b.abs() > 1.0 - LOCK_TOL {
            let b = sin_b.signum() * std::f64::consts::FRAC_PI_2;
            return locked_angles(m, i, j, b);
        }
        let b = sin_b.asin();
        let a = f64::atan2(-eps * m[(j, k)], m[(k, k)]);
        let c = f64::atan2(-eps * m[(i, j)], m[(i, i)]);
        [a, b, c]
    }
}

/// Gimbal-locked extraction: with the middle angle pinned at `b`, only the
/// combination of the outer angles is observable. Factor the middle
/// rotation out on the right and read the remaining rotation about the
/// first axis; the third angle is reported as zero.
fn locked_angles(m: &Matrix3<f64>, i: usize, j: usize, b: f64) -> [f64; 3] {
    let mid = Rotation3::from_axis_angle(&basis(j), b);
    let residual = m * mid.matrix().transpose();
    // residual is (numerically) a rotation about axis i.
    let u = (i + 1) % 3;
    let w = (i + 2) % 3;
    let a = f64::atan2(residual[(w, u)], residual[(u, u)]);
    [a, b, 0.0]
}

/// Direction-cosine matrix (child-to-parent) for a quaternion.
pub fn dcm_from_quaternion(q: &UnitQuaternion<f64>) -> Matrix3<f64> {
    *q.to_rotation_matrix().matrix()
}

/// Quaternion for a direction-cosine matrix.
///
/// The matrix must be orthonormal with determinant +1 within `1e-6`;
/// anything else is rejected rather than silently re-normalized.
pub fn quaternion_from_dcm(m: &Matrix3<f64>) -> SimResult<UnitQuaternion<f64>> {
    let should_be_identity = m * m.transpose();
    let defect = (should_be_identity - Matrix3::identity()).norm();
    if defect > 1e-6 || (m.determinant() - 1.0).abs() > 1e-6 {
        return Err(SimError::InvalidState(format!(
            "matrix is not a rotation (orthonormality defect {defect:.3e})"
        )));
    }
    Ok(UnitQuaternion::from_rotation_matrix(
        &Rotation3::from_matrix_unchecked(*m),
    ))
}

/// Eigen-axis and rotation angle of a quaternion. The identity rotation
/// reports the +X axis with zero angle.
pub fn axis_angle_from_quaternion(q: &UnitQuaternion<f64>) -> (Vector3<f64>, f64) {
    match q.axis_angle() {
        Some((axis, angle)) => (axis.into_inner(), angle),
        None => (Vector3::x(), 0.0),
    }
}

/// Quaternion for an eigen-axis rotation. The axis need not be normalized
/// but must be nonzero.
pub fn quaternion_from_axis_angle(axis: &Vector3<f64>, angle: f64) -> SimResult<UnitQuaternion<f64>> {
    let norm = axis.norm();
    if norm < 1e-12 {
        return Err(SimError::InvalidState(
            "eigen-axis rotation requires a nonzero axis".into(),
        ));
    }
    Ok(UnitQuaternion::from_axis_angle(
        &Unit::new_normalize(*axis),
        angle,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn angle_between(a: &UnitQuaternion<f64>, b: &UnitQuaternion<f64>) -> f64 {
        a.angle_to(b)
    }

    #[test]
    fn euler_round_trip_all_sequences() {
        // Middle angles chosen inside each sequence's valid range.
        let tb_angles = [0.41, -0.73, 1.9];
        let sym_angles = [0.41, 0.73, 1.9];
        for &seq in EulerSequence::all() {
            let angles = if seq.is_symmetric() {
                sym_angles
            } else {
                tb_angles
            };
            let q = quaternion_from_euler(seq, angles);
            let out = euler_from_quaternion(seq, &q);
            let q2 = quaternion_from_euler(seq, out);
            assert!(
                angle_between(&q, &q2) < 1e-9,
                "sequence {seq} failed: {angles:?} -> {out:?}"
            );
        }
    }

    #[test]
    fn gimbal_lock_still_reproduces_rotation() {
        for &seq in EulerSequence::all() {
            let lock_cases: [f64; 2] = if seq.is_symmetric() {
                [0.0, PI]
            } else {
                [FRAC_PI_2, -FRAC_PI_2]
            };
            for b in lock_cases {
                let q = quaternion_from_euler(seq, [0.6, b, -0.35]);
                let out = euler_from_quaternion(seq, &q);
                let q2 = quaternion_from_euler(seq, out);
                assert!(
                    angle_between(&q, &q2) < 1e-7,
                    "lock case {seq} b={b}: {out:?}"
                );
            }
        }
    }

    #[test]
    fn dcm_round_trip() {
        let q = UnitQuaternion::from_euler_angles(0.3, -1.1, 2.2);
        let m = dcm_from_quaternion(&q);
        let q2 = quaternion_from_dcm(&m).unwrap();
        assert!(angle_between(&q, &q2) < 1e-12);
    }

    #[test]
    fn bad_dcm_rejected() {
        let mut m = Matrix3::identity();
        m[(0, 0)] = 2.0;
        assert!(quaternion_from_dcm(&m).is_err());
        // Determinant -1 (reflection) must also be rejected.
        let refl = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, -1.0));
        assert!(quaternion_from_dcm(&refl).is_err());
    }

    #[test]
    fn axis_angle_round_trip() {
        let axis = Vector3::new(1.0, 2.0, -0.5);
        let q = quaternion_from_axis_angle(&axis, 0.9).unwrap();
        let (out_axis, out_angle) = axis_angle_from_quaternion(&q);
        assert_relative_eq!(out_angle, 0.9, epsilon = 1e-12);
        assert_relative_eq!(
            (out_axis - axis.normalize()).norm(),
            0.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn zyx_matches_nalgebra_convention() {
        // nalgebra's from_euler_angles is roll(X), pitch(Y), yaw(Z) applied
        // as Rz * Ry * Rx, which is the ZYX sequence with reversed angle
        // order.
        let (roll, pitch, yaw) = (0.2, -0.4, 1.3);
        let q_na = UnitQuaternion::from_euler_angles(roll, pitch, yaw);
        let q_seq = quaternion_from_euler(EulerSequence::Zyx, [yaw, pitch, roll]);
        assert!(angle_between(&q_na, &q_seq) < 1e-12);
    }
}
