//! Mass properties and composite combination.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::frames::Transform;

/// Mass, center of mass, and inertia of a body, expressed in its structural
/// frame (inertia about the center of mass, structure axes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MassProperties {
    /// Mass (kg).
    pub mass: f64,
    /// Center of mass in structure coordinates (m).
    pub com: Vector3<f64>,
    /// Inertia tensor about the center of mass, structure axes (kg m²).
    pub inertia: Matrix3<f64>,
}

impl MassProperties {
    /// A point mass at the structure origin.
    pub fn point_mass(mass: f64) -> Self {
        Self {
            mass,
            com: Vector3::zeros(),
            inertia: Matrix3::zeros(),
        }
    }

    /// Validate physical plausibility: positive mass, symmetric inertia
    /// with non-negative diagonal.
    pub fn validate(&self, body: &str) -> SimResult<()> {
        if !(self.mass > 0.0) {
            return Err(SimError::Configuration(format!(
                "body '{body}' has non-positive mass {}",
                self.mass
            )));
        }
        let asym = (self.inertia - self.inertia.transpose()).norm();
        if asym > 1e-9 * self.inertia.norm().max(1.0) {
            return Err(SimError::Configuration(format!(
                "body '{body}' inertia tensor is not symmetric (defect {asym:.3e})"
            )));
        }
        if self.inertia.diagonal().iter().any(|&d| d < 0.0) {
            return Err(SimError::Configuration(format!(
                "body '{body}' inertia tensor has a negative diagonal term"
            )));
        }
        Ok(())
    }

    /// Combine this set with another body's, where `other_in_self` places
    /// the other body's structure frame relative to this one's.
    ///
    /// The result is expressed in this body's structure frame: combined
    /// mass, combined center of mass, and combined inertia about the new
    /// center of mass (rotation into these axes plus the parallel-axis
    /// shift for both constituents).
    pub fn combine(&self, other: &MassProperties, other_in_self: &Transform) -> MassProperties {
        let total = self.mass + other.mass;
        let other_com = other_in_self.map_position(&other.com);
        let com = (self.com * self.mass + other_com * other.mass) / total;

        let r = other_in_self.rotation.to_rotation_matrix();
        let other_inertia = r.matrix() * other.inertia * r.matrix().transpose();

        let inertia = shift_inertia(&self.inertia, self.mass, &(self.com - com))
            + shift_inertia(&other_inertia, other.mass, &(other_com - com));

        MassProperties {
            mass: total,
            com,
            inertia,
        }
    }
}

/// Parallel-axis shift: inertia about a point displaced by `d` from the
/// center of mass.
fn shift_inertia(inertia: &Matrix3<f64>, mass: f64, d: &Vector3<f64>) -> Matrix3<f64> {
    inertia + mass * (Matrix3::identity() * d.norm_squared() - d * d.transpose())
}
