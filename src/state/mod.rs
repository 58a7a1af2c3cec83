//! Translational and rotational state of a body, and its packed layout in
//! an integration state vector.

pub mod attitude;
pub mod elements;

use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

pub use attitude::EulerSequence;
pub use elements::{AnomalyKind, ClassicalElements};

/// Translational state relative to an integration frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransState {
    /// Position (m).
    pub position: Vector3<f64>,
    /// Velocity (m/s).
    pub velocity: Vector3<f64>,
}

impl TransState {
    /// Zero state.
    pub fn zero() -> Self {
        Self {
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
        }
    }
}

/// Rotational state relative to an integration frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RotState {
    /// Attitude quaternion, body-to-frame.
    pub attitude: UnitQuaternion<f64>,
    /// Angular velocity of the body w.r.t. the frame, body coordinates
    /// (rad/s).
    pub body_rate: Vector3<f64>,
}

impl RotState {
    /// Identity attitude, zero rate.
    pub fn identity() -> Self {
        Self {
            attitude: UnitQuaternion::identity(),
            body_rate: Vector3::zeros(),
        }
    }
}

/// Full dynamic state of one body in its integration frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BodyState {
    /// Translational part.
    pub trans: TransState,
    /// Rotational part.
    pub rot: RotState,
}

impl BodyState {
    /// At-rest state at the frame origin.
    pub fn at_rest() -> Self {
        Self {
            trans: TransState::zero(),
            rot: RotState::identity(),
        }
    }
}

/// Number of scalar slots one body occupies in a loop's state vector:
/// position (3), velocity (3), attitude quaternion (4, w first), body
/// rate (3).
pub const SLOTS_PER_BODY: usize = 13;

impl BodyState {
    /// Write this state into a 13-slot window of a state vector.
    pub fn write_slots(&self, slots: &mut [f64]) {
        debug_assert_eq!(slots.len(), SLOTS_PER_BODY);
        slots[0..3].copy_from_slice(self.trans.position.as_slice());
        slots[3..6].copy_from_slice(self.trans.velocity.as_slice());
        let q = self.rot.attitude.quaternion();
        slots[6] = q.w;
        slots[7] = q.i;
        slots[8] = q.j;
        slots[9] = q.k;
        slots[10..13].copy_from_slice(self.rot.body_rate.as_slice());
    }

    /// Read a state back out of a 13-slot window, renormalizing the
    /// quaternion (integration drifts it off the unit sphere).
    pub fn read_slots(slots: &[f64]) -> Self {
        debug_assert_eq!(slots.len(), SLOTS_PER_BODY);
        Self {
            trans: TransState {
                position: Vector3::new(slots[0], slots[1], slots[2]),
                velocity: Vector3::new(slots[3], slots[4], slots[5]),
            },
            rot: RotState {
                attitude: UnitQuaternion::from_quaternion(Quaternion::new(
                    slots[6], slots[7], slots[8], slots[9],
                )),
                body_rate: Vector3::new(slots[10], slots[11], slots[12]),
            },
        }
    }
}

/// Quaternion kinematics: time derivative of a body-to-frame attitude
/// quaternion under a body-frame angular velocity.
pub fn attitude_rate(
    attitude: &UnitQuaternion<f64>,
    body_rate: &Vector3<f64>,
) -> Quaternion<f64> {
    // q_dot = 1/2 q ⊗ (0, ω)
    attitude.quaternion() * Quaternion::from_imag(*body_rate) * 0.5
}
