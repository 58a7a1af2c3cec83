//! Typed simulation configuration.
//!
//! Everything a run needs arrives through these structs (deserializable
//! from any serde format the caller prefers) and is validated once, at
//! [`crate::sim::Simulation::build`] time. There is no runtime code
//! generation and no stringly-typed assignment surface: a bad name or a
//! physically impossible value fails construction, before any stepping.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{SimError, SimResult};
use crate::forces::{GravityControl, HarmonicField, PlanetRotation, ShadowModel};
use crate::integ::IntegratorMethod;
use crate::state::attitude::{quaternion_from_axis_angle, quaternion_from_dcm, quaternion_from_euler};
use crate::state::{ClassicalElements, EulerSequence};
use crate::time::TimeConfig;

/// An orientation given in any supported representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RotationSpec {
    /// No rotation.
    Identity,
    /// Quaternion `[w, x, y, z]`.
    Quaternion([f64; 4]),
    /// Euler sequence and angles (rad).
    Euler {
        /// Rotation sequence.
        sequence: EulerSequence,
        /// The three angles.
        angles: [f64; 3],
    },
    /// Direction-cosine matrix (child-to-parent), rows.
    Matrix([[f64; 3]; 3]),
    /// Eigen-axis and angle (rad).
    AxisAngle {
        /// Rotation axis (need not be unit).
        axis: [f64; 3],
        /// Rotation angle.
        angle: f64,
    },
}

impl Default for RotationSpec {
    fn default() -> Self {
        Self::Identity
    }
}

impl RotationSpec {
    /// Resolve to a quaternion, validating matrix inputs.
    pub fn to_quaternion(&self) -> SimResult<nalgebra::UnitQuaternion<f64>> {
        match self {
            Self::Identity => Ok(nalgebra::UnitQuaternion::identity()),
            Self::Quaternion([w, x, y, z]) => {
                let q = nalgebra::Quaternion::new(*w, *x, *y, *z);
                if q.norm() < 1e-12 {
                    return Err(SimError::InvalidState(
                        "zero-norm quaternion in configuration".into(),
                    ));
                }
                Ok(nalgebra::UnitQuaternion::from_quaternion(q))
            }
            Self::Euler { sequence, angles } => Ok(quaternion_from_euler(*sequence, *angles)),
            Self::Matrix(rows) => {
                let m = Matrix3::from_row_slice(&rows.concat());
                quaternion_from_dcm(&m)
            }
            Self::AxisAngle { axis, angle } => {
                quaternion_from_axis_angle(&Vector3::from_row_slice(axis), *angle)
            }
        }
    }
}

/// Mass property configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MassConfig {
    /// Mass (kg).
    pub mass: f64,
    /// Center of mass in structure coordinates (m).
    #[serde(default)]
    pub com: [f64; 3],
    /// Inertia tensor about the com, structure axes, rows (kg m²).
    #[serde(default)]
    pub inertia: [[f64; 3]; 3],
}

impl MassConfig {
    pub(crate) fn to_properties(&self) -> crate::body::MassProperties {
        crate::body::MassProperties {
            mass: self.mass,
            com: Vector3::from_row_slice(&self.com),
            inertia: Matrix3::from_row_slice(&self.inertia.concat()),
        }
    }
}

/// A named hard point on a body's structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachPointConfig {
    /// Location in structure coordinates (m).
    pub position: [f64; 3],
    /// Orientation relative to structure.
    #[serde(default)]
    pub orientation: RotationSpec,
}

/// Translational initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TransInit {
    /// Cartesian position/velocity in the state's frame.
    Cartesian {
        /// Position (m).
        position: [f64; 3],
        /// Velocity (m/s).
        velocity: [f64; 3],
    },
    /// Classical orbital elements around a gravity source.
    Elements {
        /// The source supplying μ.
        source: String,
        /// The element set.
        elements: ClassicalElements,
    },
}

/// Rotational initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotInit {
    /// Attitude of the body relative to the state's frame.
    #[serde(default)]
    pub orientation: RotationSpec,
    /// Body rates (rad/s).
    #[serde(default)]
    pub body_rate: [f64; 3],
}

impl Default for RotInit {
    fn default() -> Self {
        Self {
            orientation: RotationSpec::Identity,
            body_rate: [0.0; 3],
        }
    }
}

/// A full initial (or re-initialized) body state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialStateConfig {
    /// Frame the values are expressed in (any connected frame; the state
    /// is transformed into the body's integration frame).
    pub frame: String,
    /// Translational part.
    pub translation: TransInit,
    /// Rotational part.
    #[serde(default)]
    pub rotation: RotInit,
}

/// A planet: gravity source plus its frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanetConfig {
    /// Planet name; frames are registered as `<name>.inertial` and
    /// `<name>.pfix`.
    pub name: String,
    /// Gravitational parameter (m³/s²).
    pub mu: f64,
    /// Reference radius (m).
    pub radius: f64,
    /// Rotation model for the planet-fixed frame.
    #[serde(default = "default_rotation")]
    pub rotation: PlanetRotation,
    /// Zonal coefficients J2, J3, … building a zonal-only field.
    #[serde(default)]
    pub zonals: Vec<f64>,
    /// Full coefficient set; wins over `zonals` when present.
    #[serde(default)]
    pub field: Option<HarmonicField>,
    /// Offset of the planet center from the first planet's inertial frame;
    /// nonzero makes this a fixed third-body source.
    #[serde(default)]
    pub center: [f64; 3],
}

fn default_rotation() -> PlanetRotation {
    PlanetRotation::None
}

/// Drag configuration for one body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DragConfig {
    /// Cd times reference area (m²).
    pub cd_area: f64,
    /// The planet whose atmosphere applies.
    pub source: String,
    /// Atmosphere override; the planet-sized default applies otherwise.
    #[serde(default)]
    pub atmosphere: Option<crate::forces::ExponentialAtmosphere>,
}

/// Radiation-pressure configuration for one body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadiationConfig {
    /// Cr times reference area (m²).
    pub cr_area: f64,
    /// Sun position in the root frame (m).
    pub sun_position: [f64; 3],
    /// Shadow handling.
    #[serde(default = "default_shadow")]
    pub shadow: ShadowModel,
    /// Planet casting the shadow.
    pub occulting_source: String,
}

fn default_shadow() -> ShadowModel {
    ShadowModel::Cylindrical
}

/// One body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyConfig {
    /// Body name; frames are registered as `<name>.composite_body` and
    /// `<name>.structure`.
    pub name: String,
    /// Mass properties.
    pub mass: MassConfig,
    /// Named hard points.
    #[serde(default)]
    pub attach_points: BTreeMap<String, AttachPointConfig>,
    /// Initial state.
    pub initial_state: InitialStateConfig,
    /// Frame the body integrates in; defaults to the initial-state frame.
    /// Must be an inertial (non-rotating) frame.
    #[serde(default)]
    pub integ_frame: Option<String>,
    /// Gravity controls, one per source this body responds to.
    #[serde(default)]
    pub gravity: Vec<GravityControl>,
    /// Aerodynamic drag, if any.
    #[serde(default)]
    pub drag: Option<DragConfig>,
    /// Radiation pressure, if any.
    #[serde(default)]
    pub radiation: Option<RadiationConfig>,
    /// Advance the translational state.
    #[serde(default = "default_true")]
    pub integrate_translation: bool,
    /// Advance the rotational state.
    #[serde(default = "default_true")]
    pub integrate_rotation: bool,
    /// The integration loop this body belongs to.
    pub integ_loop: String,
}

fn default_true() -> bool {
    true
}

/// One integration loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Loop name.
    pub name: String,
    /// Driver seconds per step.
    pub step_size: f64,
    /// Integration method.
    pub method: IntegratorMethod,
}

/// The complete simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Time base.
    #[serde(default)]
    pub time: TimeConfig,
    /// Planets; the first is the root of the frame tree.
    pub planets: Vec<PlanetConfig>,
    /// Integration loops.
    pub loops: Vec<LoopConfig>,
    /// Bodies.
    pub bodies: Vec<BodyConfig>,
}

impl SimConfig {
    /// Structural validation that does not need the built world: name
    /// uniqueness and cross-references. Value-level checks (mass, inertia,
    /// frame kinds) happen during build.
    pub fn validate(&self) -> SimResult<()> {
        if self.planets.is_empty() {
            return Err(SimError::Configuration(
                "at least one planet is required".into(),
            ));
        }
        check_unique(self.planets.iter().map(|p| p.name.as_str()), "planet")?;
        check_unique(self.loops.iter().map(|l| l.name.as_str()), "loop")?;
        check_unique(self.bodies.iter().map(|b| b.name.as_str()), "body")?;

        for body in &self.bodies {
            if !self.loops.iter().any(|l| l.name == body.integ_loop) {
                return Err(SimError::Configuration(format!(
                    "body '{}' references unknown loop '{}'",
                    body.name, body.integ_loop
                )));
            }
            for control in &body.gravity {
                if !self.planets.iter().any(|p| p.name == control.source) {
                    return Err(SimError::Configuration(format!(
                        "body '{}' gravity control references unknown planet '{}'",
                        body.name, control.source
                    )));
                }
            }
            if let Some(drag) = &body.drag {
                if !self.planets.iter().any(|p| p.name == drag.source) {
                    return Err(SimError::Configuration(format!(
                        "body '{}' drag references unknown planet '{}'",
                        body.name, drag.source
                    )));
                }
            }
            if let Some(rad) = &body.radiation {
                if !self.planets.iter().any(|p| p.name == rad.occulting_source) {
                    return Err(SimError::Configuration(format!(
                        "body '{}' radiation references unknown planet '{}'",
                        body.name, rad.occulting_source
                    )));
                }
            }
        }
        Ok(())
    }
}

fn check_unique<'a>(names: impl Iterator<Item = &'a str>, what: &str) -> SimResult<()> {
    let mut seen = std::collections::BTreeSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(SimError::Configuration(format!(
                "duplicate {what} name '{name}'"
            )));
        }
    }
    Ok(())
}
