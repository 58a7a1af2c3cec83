//! Externally applied forces and torques.
//!
//! The seam where contact models, thrusters, and other effectors feed the
//! aggregator: whatever computes them writes the resulting force/torque
//! here between steps, and the contributor folds them into the derivative
//! like any other model. Values persist until changed or cleared.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::SimResult;
use crate::state::BodyState;

use super::{Derivatives, ForceContext, ForceModel};

/// Which axes an applied force is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppliedFrame {
    /// The body's own axes (rotates with the body).
    Body,
    /// The integration frame's axes.
    Integration,
}

/// A constant (between updates) applied force and torque.
///
/// Interior mutability is limited to the stored set-point; within a step the
/// contributor is a pure function of `(state, set-point)`, so re-evaluation
/// by multi-stage integrators stays safe. Changing the set-point is a
/// between-steps operation, like any other state mutation.
pub struct AppliedForce {
    force: [AtomicU64; 3],
    torque: [AtomicU64; 3],
    /// Axes the force vector is expressed in.
    pub frame: AppliedFrame,
    enabled: bool,
}

fn store(cell: &[AtomicU64; 3], v: &Vector3<f64>) {
    for (slot, value) in cell.iter().zip(v.iter()) {
        slot.store(value.to_bits(), Ordering::Relaxed);
    }
}

fn load(cell: &[AtomicU64; 3]) -> Vector3<f64> {
    Vector3::new(
        f64::from_bits(cell[0].load(Ordering::Relaxed)),
        f64::from_bits(cell[1].load(Ordering::Relaxed)),
        f64::from_bits(cell[2].load(Ordering::Relaxed)),
    )
}

impl AppliedForce {
    /// A zero-valued effector expressed in the given axes.
    pub fn new(frame: AppliedFrame) -> Self {
        Self {
            force: Default::default(),
            torque: Default::default(),
            frame,
            enabled: true,
        }
    }

    /// Create disabled; contributions are skipped until re-enabled by
    /// replacement.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Update the force set-point (N). Call only between steps.
    pub fn set_force(&self, force: Vector3<f64>) {
        store(&self.force, &force);
    }

    /// Update the torque set-point (N·m, body axes). Call only between
    /// steps.
    pub fn set_torque(&self, torque: Vector3<f64>) {
        store(&self.torque, &torque);
    }

    /// Current force set-point.
    pub fn force(&self) -> Vector3<f64> {
        load(&self.force)
    }

    /// Current torque set-point.
    pub fn torque(&self) -> Vector3<f64> {
        load(&self.torque)
    }
}

impl ForceModel for AppliedForce {
    fn contribute(
        &self,
        state: &BodyState,
        ctx: &ForceContext<'_>,
        out: &mut Derivatives,
    ) -> SimResult<()> {
        let force = self.force();
        let force_in_frame = match self.frame {
            AppliedFrame::Integration => force,
            AppliedFrame::Body => state.rot.attitude * force,
        };
        out.acceleration += force_in_frame / ctx.mass.mass;
        out.torque += self.torque();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "applied force"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }
}

/// The usual wiring: the driver keeps one `Arc` handle to steer the
/// set-point and registers a clone as the contributor.
impl ForceModel for std::sync::Arc<AppliedForce> {
    fn contribute(
        &self,
        state: &BodyState,
        ctx: &ForceContext<'_>,
        out: &mut Derivatives,
    ) -> SimResult<()> {
        self.as_ref().contribute(state, ctx, out)
    }

    fn name(&self) -> &'static str {
        self.as_ref().name()
    }

    fn enabled(&self) -> bool {
        self.as_ref().enabled()
    }
}
