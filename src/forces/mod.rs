//! Force and torque aggregation.
//!
//! Each contributor adds its share of translational acceleration and body
//! torque into a [`Derivatives`] accumulator. Contributors are independent,
//! order-insensitive, and side-effect free: `compute_derivatives` takes the
//! candidate kinematic state by value reference and never touches stored
//! simulation state, so an integrator can re-evaluate it as many times per
//! step as its stages or corrector iterations need.

pub mod applied;
pub mod drag;
pub mod gravity;
pub mod gravity_torque;
pub mod srp;

use nalgebra::Vector3;
use std::collections::BTreeMap;

use crate::body::MassProperties;
use crate::error::{SimError, SimResult};
use crate::state::BodyState;
use crate::time::TimeManager;

pub use applied::{AppliedForce, AppliedFrame};
pub use drag::{AtmosphericDrag, ExponentialAtmosphere};
pub use gravity::{GravityControl, GravitySource, HarmonicField, PlanetRotation};
pub use gravity_torque::gravity_gradient_torque;
pub use srp::{RadiationPressure, ShadowModel};

/// Accumulated translational acceleration (integration frame) and torque
/// (body frame) for one body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Derivatives {
    /// Acceleration of the composite center of mass (m/s²).
    pub acceleration: Vector3<f64>,
    /// Torque about the composite center of mass, body axes (N·m).
    pub torque: Vector3<f64>,
}

impl Derivatives {
    /// Zero accumulator.
    pub fn zero() -> Self {
        Self {
            acceleration: Vector3::zeros(),
            torque: Vector3::zeros(),
        }
    }
}

/// Read-only evaluation context handed to every contributor.
pub struct ForceContext<'a> {
    /// The time base, for scale conversions at stage times.
    pub time: &'a TimeManager,
    /// Candidate root-clock time of the evaluation (may sit inside a step).
    pub dyn_time: f64,
    /// Composite mass properties of the body being evaluated.
    pub mass: &'a MassProperties,
}

/// A non-gravitational force/torque contributor.
///
/// Implementations must be pure functions of `(state, ctx)`: no interior
/// mutability that changes results between evaluations at the same inputs.
pub trait ForceModel: Send + Sync {
    /// Accumulate this contributor's share into `out`.
    fn contribute(
        &self,
        state: &BodyState,
        ctx: &ForceContext<'_>,
        out: &mut Derivatives,
    ) -> SimResult<()>;

    /// Contributor name for logging.
    fn name(&self) -> &'static str;

    /// Disabled contributors are skipped without being removed.
    fn enabled(&self) -> bool {
        true
    }
}

/// Per-body force configuration: gravity controls plus contributors.
#[derive(Default)]
pub struct BodyForces {
    /// One control per gravity source this body responds to.
    pub gravity: Vec<GravityControl>,
    /// Drag, radiation pressure, contact, and other contributors.
    pub contributors: Vec<Box<dyn ForceModel>>,
}

/// The aggregator: gravity sources shared across bodies, plus per-body
/// contributor sets.
#[derive(Default)]
pub struct ForceAggregator {
    sources: BTreeMap<String, GravitySource>,
    per_body: BTreeMap<String, BodyForces>,
}

impl ForceAggregator {
    /// An empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gravity source (planet).
    pub fn add_source(&mut self, source: GravitySource) -> SimResult<()> {
        if self.sources.contains_key(&source.name) {
            return Err(SimError::Configuration(format!(
                "gravity source '{}' is already registered",
                source.name
            )));
        }
        log::debug!("registered gravity source '{}'", source.name);
        self.sources.insert(source.name.clone(), source);
        Ok(())
    }

    /// Borrow a gravity source.
    pub fn source(&self, name: &str) -> SimResult<&GravitySource> {
        self.sources.get(name).ok_or_else(|| {
            SimError::Configuration(format!("unknown gravity source '{name}'"))
        })
    }

    /// Install the force configuration for a body, replacing any previous
    /// one. Controls must reference registered sources.
    pub fn set_body_forces(&mut self, body: &str, forces: BodyForces) -> SimResult<()> {
        for control in &forces.gravity {
            if !self.sources.contains_key(&control.source) {
                return Err(SimError::Configuration(format!(
                    "body '{body}' references unknown gravity source '{}'",
                    control.source
                )));
            }
        }
        self.per_body.insert(body.to_string(), forces);
        Ok(())
    }

    /// Mutable access to a body's force set (enable/disable at runtime).
    pub fn body_forces_mut(&mut self, body: &str) -> SimResult<&mut BodyForces> {
        self.per_body
            .get_mut(body)
            .ok_or_else(|| SimError::UnknownBody(body.to_string()))
    }

    /// Sum all active contributions for one body at a candidate state.
    ///
    /// `state` is the body's kinematic state in its integration frame,
    /// assumed centered on the primary gravity source's planet. The sum is
    /// commutative; nothing here mutates aggregator or simulation state.
    pub fn compute_derivatives(
        &self,
        body: &str,
        state: &BodyState,
        ctx: &ForceContext<'_>,
    ) -> SimResult<Derivatives> {
        let forces = self
            .per_body
            .get(body)
            .ok_or_else(|| SimError::UnknownBody(body.to_string()))?;

        let mut out = Derivatives::zero();

        for control in forces.gravity.iter().filter(|c| c.active) {
            let source = self.source(&control.source)?;
            out.acceleration += source.acceleration(&state.trans.position, control, ctx)?;
            if control.gradient {
                out.torque += gravity_gradient_torque(
                    source,
                    &state.trans.position,
                    &state.rot.attitude,
                    ctx.mass,
                );
            }
        }

        for contributor in forces.contributors.iter().filter(|f| f.enabled()) {
            contributor.contribute(state, ctx, &mut out)?;
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{RotState, TransState};
    use crate::time::{TimeConfig, TimeManager};
    use approx::assert_relative_eq;

    const MU_EARTH: f64 = 3.986_004_418e14;

    #[test]
    fn gravity_sum_is_order_independent() {
        let time = TimeManager::from_config(&TimeConfig::default()).unwrap();
        let mass = MassProperties::point_mass(100.0);
        let ctx = ForceContext {
            time: &time,
            dyn_time: 0.0,
            mass: &mass,
        };

        let earth = GravitySource::spherical("Earth", MU_EARTH, 6.378_137e6);
        let moonish = GravitySource::third_body(
            "Moon",
            4.902_8e12,
            1.737_4e6,
            Vector3::new(3.844e8, 0.0, 0.0),
        );

        let state = BodyState {
            trans: TransState {
                position: Vector3::new(7.0e6, 0.0, 0.0),
                velocity: Vector3::new(0.0, 7.5e3, 0.0),
            },
            rot: RotState::identity(),
        };

        let build = |order_flip: bool| {
            let mut agg = ForceAggregator::new();
            agg.add_source(earth.clone()).unwrap();
            agg.add_source(moonish.clone()).unwrap();
            let mut controls = vec![
                GravityControl::spherical("Earth"),
                GravityControl::spherical("Moon"),
            ];
            if order_flip {
                controls.reverse();
            }
            agg.set_body_forces(
                "sat",
                BodyForces {
                    gravity: controls,
                    contributors: Vec::new(),
                },
            )
            .unwrap();
            agg.compute_derivatives("sat", &state, &ctx).unwrap()
        };

        let forward = build(false);
        let reversed = build(true);
        assert_relative_eq!(
            (forward.acceleration - reversed.acceleration).norm(),
            0.0,
            epsilon = 1e-18
        );
    }

    #[test]
    fn repeated_evaluation_is_stable() {
        let time = TimeManager::from_config(&TimeConfig::default()).unwrap();
        let mass = MassProperties::point_mass(250.0);
        let ctx = ForceContext {
            time: &time,
            dyn_time: 0.0,
            mass: &mass,
        };

        let mut agg = ForceAggregator::new();
        agg.add_source(GravitySource::spherical("Earth", MU_EARTH, 6.378_137e6))
            .unwrap();
        agg.set_body_forces(
            "sat",
            BodyForces {
                gravity: vec![GravityControl::spherical("Earth")],
                contributors: vec![Box::new(AtmosphericDrag::new(
                    2.2,
                    ExponentialAtmosphere::standard(),
                    "Earth".to_string(),
                    7.292_115e-5,
                ))],
            },
        )
        .unwrap();

        let state = BodyState {
            trans: TransState {
                position: Vector3::new(6.778e6, 0.0, 0.0),
                velocity: Vector3::new(0.0, 7.7e3, 0.0),
            },
            rot: RotState::identity(),
        };

        let first = agg.compute_derivatives("sat", &state, &ctx).unwrap();
        for _ in 0..5 {
            let again = agg.compute_derivatives("sat", &state, &ctx).unwrap();
            assert_eq!(first, again);
        }
    }

    #[test]
    fn unknown_source_rejected() {
        let mut agg = ForceAggregator::new();
        let err = agg
            .set_body_forces(
                "sat",
                BodyForces {
                    gravity: vec![GravityControl::spherical("Krypton")],
                    contributors: Vec::new(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, SimError::Configuration(_)));
    }
}
