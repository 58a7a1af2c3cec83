//! Gravity-gradient torque.

use nalgebra::{UnitQuaternion, Vector3};

use crate::body::MassProperties;

use super::GravitySource;

/// Torque on a body from the gradient of a point-mass field across its
/// inertia distribution:
///
/// ```text
/// τ = 3μ/r⁵ · r_b × (I r_b)
/// ```
///
/// with `r_b` the planet-to-body vector in body axes and `I` the composite
/// inertia about the center of mass. Vanishes when a principal axis is
/// radial.
pub fn gravity_gradient_torque(
    source: &GravitySource,
    position: &Vector3<f64>,
    attitude: &UnitQuaternion<f64>,
    mass: &MassProperties,
) -> Vector3<f64> {
    let rel = position - source.center;
    let r = rel.norm();
    if r < 1.0 {
        return Vector3::zeros();
    }
    let r_body = attitude.inverse() * rel;
    (3.0 * source.mu / r.powi(5)) * r_body.cross(&(mass.inertia * r_body))
}
