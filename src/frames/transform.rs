//! Rigid-frame transforms with first derivatives.
//!
//! A [`Transform`] is the state of a child frame relative to a parent frame:
//! where the child origin sits, how child axes map into parent axes, and how
//! both are changing. Conventions, used consistently everywhere:
//!
//! - `translation`: child origin position, parent coordinates
//! - `rotation`: maps vector components child → parent
//! - `velocity`: child origin velocity, parent coordinates
//! - `angular_velocity`: child w.r.t. parent, child coordinates

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// State of one frame relative to another. See module docs for conventions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Child origin in parent coordinates.
    pub translation: Vector3<f64>,
    /// Child-to-parent coordinate rotation.
    pub rotation: UnitQuaternion<f64>,
    /// Child origin velocity in parent coordinates.
    pub velocity: Vector3<f64>,
    /// Angular velocity of child w.r.t. parent, child coordinates.
    pub angular_velocity: Vector3<f64>,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    /// The identity transform: coincident, co-moving frames.
    pub fn identity() -> Self {
        Self {
            translation: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
            velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
        }
    }

    /// A static transform: fixed offset and orientation, no rates.
    pub fn rigid(translation: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        Self {
            translation,
            rotation,
            velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
        }
    }

    /// A pure rotation (structure-to-body style).
    pub fn rotation_only(rotation: UnitQuaternion<f64>) -> Self {
        Self::rigid(Vector3::zeros(), rotation)
    }

    /// Chain transforms: `self` is "B in A", `inner` is "C in B"; the result
    /// is "C in A".
    pub fn compose(&self, inner: &Transform) -> Transform {
        Transform {
            translation: self.translation + self.rotation * inner.translation,
            rotation: self.rotation * inner.rotation,
            velocity: self.velocity
                + self.rotation
                    * (inner.velocity + self.angular_velocity.cross(&inner.translation)),
            angular_velocity: inner.rotation.inverse() * self.angular_velocity
                + inner.angular_velocity,
        }
    }

    /// Invert: if `self` is "C in P", the result is "P in C".
    pub fn inverse(&self) -> Transform {
        let q_inv = self.rotation.inverse();
        let t_inv = -(q_inv * self.translation);
        Transform {
            translation: t_inv,
            rotation: q_inv,
            velocity: -(q_inv * self.velocity) - self.angular_velocity.cross(&t_inv),
            angular_velocity: -(self.rotation * self.angular_velocity),
        }
    }

    /// Map a position from child coordinates to parent coordinates.
    pub fn map_position(&self, p_child: &Vector3<f64>) -> Vector3<f64> {
        self.translation + self.rotation * p_child
    }

    /// Map a free vector (no origin shift) from child to parent coordinates.
    pub fn map_vector(&self, v_child: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * v_child
    }

    /// Map a point's velocity from child to parent coordinates, accounting
    /// for frame motion and rotation.
    pub fn map_velocity(&self, p_child: &Vector3<f64>, v_child: &Vector3<f64>) -> Vector3<f64> {
        self.velocity + self.rotation * (v_child + self.angular_velocity.cross(p_child))
    }

    /// Map an attitude quaternion (body-to-child) into body-to-parent.
    pub fn map_attitude(&self, q_body: &UnitQuaternion<f64>) -> UnitQuaternion<f64> {
        self.rotation * q_body
    }

    /// Map a body angular velocity (body coordinates, measured w.r.t. the
    /// child frame) into one measured w.r.t. the parent frame.
    pub fn map_body_rate(
        &self,
        q_body: &UnitQuaternion<f64>,
        w_body: &Vector3<f64>,
    ) -> Vector3<f64> {
        w_body + q_body.inverse() * self.angular_velocity
    }
}
