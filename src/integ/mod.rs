//! Numerical integration: methods, the loop state machine, and multi-rate
//! loop membership.
//!
//! An [`Integrator`] advances a flat state vector by `dt`, calling the
//! supplied derivative function as many times as its stages or corrector
//! iterations require. Implementations never touch simulation state; the
//! derivative closure is their only window into the world, which is what
//! makes re-evaluation inside a step safe.
//!
//! An [`IntegrationLoop`] owns an integrator, a step size, and the set of
//! member bodies it advances. Its lifecycle follows
//! `Unconfigured -> Configured -> Running -> {Paused, Completed}`;
//! membership and method changes happen only between steps.

pub mod abm;
pub mod gauss_jackson;
pub mod lsode;
pub mod multistep;
pub mod rk;
pub mod rkf78;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};

pub use abm::Abm4;
pub use gauss_jackson::GaussJackson;
pub use lsode::Lsode;
pub use rk::{Rk2, Rk4};
pub use rkf78::Rkf78;

/// Derivative function signature: `f(t, y) -> dy/dt`, where `t` is the
/// root-clock time of the evaluation.
pub type DerivFn<'a> = dyn Fn(f64, &DVector<f64>) -> SimResult<DVector<f64>> + 'a;

/// Result of one accepted step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// State after the step.
    pub y: DVector<f64>,
    /// Method-specific local error estimate, if the method produces one.
    pub error_estimate: Option<f64>,
    /// Derivative evaluations consumed.
    pub evaluations: usize,
}

/// Serializable integrator internals, enough to resume a run identically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IntegratorSnapshot {
    /// Stateless method.
    None,
    /// Adaptive single-step method: the carried step suggestion.
    Adaptive {
        /// Suggested substep (signed seconds).
        h: f64,
    },
    /// Multi-step method: the derivative history.
    Multistep {
        /// History spacing (signed seconds).
        h: f64,
        /// Working order at snapshot time.
        order: usize,
        /// Sample times, oldest first.
        times: Vec<f64>,
        /// Derivative samples matching `times`.
        derivs: Vec<Vec<f64>>,
        /// Whether the last step met its corrector tolerance.
        last_converged: bool,
    },
}

/// A numerical integration method instance.
pub trait Integrator: Send {
    /// Advance `y` from `t` by exactly `dt` (negative `dt` integrates
    /// backward). Adaptive methods substep internally.
    fn step(
        &mut self,
        t: f64,
        dt: f64,
        y: &DVector<f64>,
        deriv: &DerivFn,
    ) -> SimResult<StepOutcome>;

    /// Discard internal memory (multi-step history, step suggestions).
    /// Called on method switches and state discontinuities.
    fn reset(&mut self);

    /// Method name for logging.
    fn name(&self) -> &'static str;

    /// Nominal order of accuracy.
    fn order(&self) -> u8;

    /// Whether the most recent step met its internal tolerance. Methods
    /// without a corrector always report true.
    fn last_step_converged(&self) -> bool {
        true
    }

    /// Capture internals for checkpointing.
    fn snapshot(&self) -> IntegratorSnapshot;

    /// Restore internals captured by [`Integrator::snapshot`].
    fn restore(&mut self, snapshot: &IntegratorSnapshot);
}

/// Selectable integration method with its tuning parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum IntegratorMethod {
    /// Second-order fixed-step Runge-Kutta.
    Rk2,
    /// Fourth-order fixed-step Runge-Kutta.
    Rk4,
    /// Embedded Fehlberg 7(8) with adaptive substeps.
    Rkf78 {
        /// Relative error tolerance.
        rel_tol: f64,
    },
    /// Fourth-order Adams-Bashforth-Moulton PECE.
    Abm4,
    /// Gauss-Jackson style fixed-order predictor-corrector.
    GaussJackson {
        /// Even order, 2 to 8.
        order: u32,
    },
    /// Variable-step variable-order Adams (nonstiff LSODE mode).
    Lsode {
        /// Relative error tolerance.
        rel_tol: f64,
        /// Absolute error floor.
        abs_tol: f64,
    },
}

impl IntegratorMethod {
    /// Display name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rk2 => "RK2",
            Self::Rk4 => "RK4",
            Self::Rkf78 { .. } => "RKF 7(8)",
            Self::Abm4 => "ABM4",
            Self::GaussJackson { .. } => "Gauss-Jackson",
            Self::Lsode { .. } => "LSODE (Adams)",
        }
    }

    /// Instantiate the method.
    pub fn build(&self) -> SimResult<Box<dyn Integrator>> {
        Ok(match *self {
            Self::Rk2 => Box::new(Rk2),
            Self::Rk4 => Box::new(Rk4),
            Self::Rkf78 { rel_tol } => Box::new(Rkf78::new(rel_tol)),
            Self::Abm4 => Box::new(Abm4::new()),
            Self::GaussJackson { order } => Box::new(GaussJackson::new(order)?),
            Self::Lsode { rel_tol, abs_tol } => Box::new(Lsode::new(rel_tol, abs_tol)),
        })
    }
}

/// Lifecycle of an integration loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopPhase {
    /// Created; no method selected yet.
    Unconfigured,
    /// Method selected; not yet stepping.
    Configured,
    /// Actively stepping.
    Running,
    /// Temporarily stopped; may resume.
    Paused,
    /// Finished; will not step again.
    Completed,
}

/// One integration loop: a method, a step size, and member bodies.
///
/// Several loops with different rates coexist in a simulation; bodies move
/// between them only at loop boundaries.
pub struct IntegrationLoop {
    name: String,
    /// Driver seconds per step (the loop's rate).
    step_size: f64,
    method: Option<IntegratorMethod>,
    integrator: Option<Box<dyn Integrator>>,
    members: Vec<String>,
    phase: LoopPhase,
    /// Driver time the member bodies are currently integrated to.
    current_sim: f64,
    /// Root-clock time matching `current_sim`.
    current_dyn: f64,
}

impl IntegrationLoop {
    /// Create an unconfigured loop.
    pub fn new(name: &str, step_size: f64) -> SimResult<Self> {
        if !(step_size > 0.0) {
            return Err(SimError::Configuration(format!(
                "loop '{name}' step size must be positive, got {step_size}"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            step_size,
            method: None,
            integrator: None,
            members: Vec::new(),
            phase: LoopPhase::Unconfigured,
            current_sim: 0.0,
            current_dyn: 0.0,
        })
    }

    /// Loop name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Driver seconds per step.
    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    /// Selected method, if configured.
    pub fn method(&self) -> Option<IntegratorMethod> {
        self.method
    }

    /// Member body names.
    pub fn members(&self) -> &[String] {
        &self.members
    }

    /// Driver time the members are integrated to.
    pub fn current_sim(&self) -> f64 {
        self.current_sim
    }

    /// Root-clock time matching [`IntegrationLoop::current_sim`].
    pub fn current_dyn(&self) -> f64 {
        self.current_dyn
    }

    /// Driver time of the next step boundary.
    pub fn next_due(&self) -> f64 {
        self.current_sim + self.step_size
    }

    /// Record that a step completed up to the given clocks.
    pub(crate) fn mark_stepped(&mut self, sim: f64, dyn_time: f64) {
        self.current_sim = sim;
        self.current_dyn = dyn_time;
    }

    /// Overwrite the clock bookkeeping (checkpoint restore).
    pub(crate) fn set_clocks(&mut self, sim: f64, dyn_time: f64) {
        self.current_sim = sim;
        self.current_dyn = dyn_time;
    }

    /// Overwrite the lifecycle phase (checkpoint restore).
    pub(crate) fn set_phase(&mut self, phase: LoopPhase) {
        self.phase = phase;
    }

    /// Select (or re-select) the integration method. Valid before the loop
    /// runs; use [`IntegrationLoop::switch_method`] mid-run.
    pub fn configure(&mut self, method: IntegratorMethod) -> SimResult<()> {
        match self.phase {
            LoopPhase::Unconfigured | LoopPhase::Configured | LoopPhase::Paused => {
                self.integrator = Some(method.build()?);
                self.method = Some(method);
                if self.phase == LoopPhase::Unconfigured {
                    self.phase = LoopPhase::Configured;
                }
                Ok(())
            }
            phase => Err(SimError::InvalidState(format!(
                "loop '{}' cannot be configured while {phase:?}",
                self.name
            ))),
        }
    }

    /// Replace the method at a loop boundary. Any multi-step history is
    /// discarded; the new method re-enters its own bootstrap.
    pub fn switch_method(&mut self, method: IntegratorMethod) -> SimResult<()> {
        if self.phase == LoopPhase::Unconfigured {
            return self.configure(method);
        }
        log::info!(
            "loop '{}': switching integrator {} -> {}",
            self.name,
            self.method.map(|m| m.name()).unwrap_or("none"),
            method.name()
        );
        self.integrator = Some(method.build()?);
        self.method = Some(method);
        Ok(())
    }

    /// Move to `Running`, anchoring the loop's clocks to the present.
    /// Resuming from `Paused` skips the paused interval rather than
    /// integrating across it.
    pub fn start(&mut self, now_sim: f64, now_dyn: f64) -> SimResult<()> {
        match self.phase {
            LoopPhase::Configured | LoopPhase::Paused => {
                if self.phase == LoopPhase::Paused {
                    log::info!("loop '{}' resuming at t = {now_sim}", self.name);
                }
                self.phase = LoopPhase::Running;
                self.current_sim = now_sim;
                self.current_dyn = now_dyn;
                Ok(())
            }
            LoopPhase::Running => Ok(()),
            phase => Err(SimError::InvalidState(format!(
                "loop '{}' cannot start from {phase:?}",
                self.name
            ))),
        }
    }

    /// Move to `Paused`; the loop is skipped until resumed.
    pub fn pause(&mut self) -> SimResult<()> {
        if self.phase != LoopPhase::Running {
            return Err(SimError::InvalidState(format!(
                "loop '{}' is not running",
                self.name
            )));
        }
        self.phase = LoopPhase::Paused;
        Ok(())
    }

    /// Move to `Completed`; terminal.
    pub fn complete(&mut self) {
        self.phase = LoopPhase::Completed;
    }

    /// Add a body at a loop boundary (callers queue this through the action
    /// system; it must never run mid-step).
    pub fn add_member(&mut self, body: &str) -> SimResult<()> {
        if self.members.iter().any(|m| m == body) {
            return Err(SimError::Configuration(format!(
                "body '{body}' is already in loop '{}'",
                self.name
            )));
        }
        self.members.push(body.to_string());
        // Membership changes the state-vector layout: old multi-step
        // history no longer lines up.
        if let Some(integ) = self.integrator.as_mut() {
            integ.reset();
        }
        log::debug!("loop '{}': added body '{body}'", self.name);
        Ok(())
    }

    /// Remove a body at a loop boundary.
    pub fn remove_member(&mut self, body: &str) -> SimResult<()> {
        let before = self.members.len();
        self.members.retain(|m| m != body);
        if self.members.len() == before {
            return Err(SimError::Configuration(format!(
                "body '{body}' is not in loop '{}'",
                self.name
            )));
        }
        if let Some(integ) = self.integrator.as_mut() {
            integ.reset();
        }
        log::debug!("loop '{}': removed body '{body}'", self.name);
        Ok(())
    }

    /// Whether the most recent step's corrector met tolerance.
    pub fn last_step_converged(&self) -> bool {
        self.integrator
            .as_ref()
            .map(|i| i.last_step_converged())
            .unwrap_or(true)
    }

    /// Borrow the integrator for stepping. Errors unless `Running`.
    pub(crate) fn integrator_for_step(&mut self) -> SimResult<&mut Box<dyn Integrator>> {
        if self.phase != LoopPhase::Running {
            return Err(SimError::InvalidState(format!(
                "loop '{}' asked to step while {:?}",
                self.name, self.phase
            )));
        }
        self.integrator.as_mut().ok_or_else(|| {
            SimError::InvalidState(format!("loop '{}' has no integrator", self.name))
        })
    }

    /// Reset integrator memory (after state discontinuities on members).
    pub fn reset_integrator(&mut self) {
        if let Some(integ) = self.integrator.as_mut() {
            integ.reset();
        }
    }

    /// Snapshot for checkpointing.
    pub fn integrator_snapshot(&self) -> IntegratorSnapshot {
        self.integrator
            .as_ref()
            .map(|i| i.snapshot())
            .unwrap_or(IntegratorSnapshot::None)
    }

    /// Restore a checkpointed snapshot into the integrator.
    pub fn restore_integrator(&mut self, snapshot: &IntegratorSnapshot) {
        if let Some(integ) = self.integrator.as_mut() {
            integ.restore(snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_machine_enforced() {
        let mut lp = IntegrationLoop::new("fast", 0.5).unwrap();
        assert_eq!(lp.phase(), LoopPhase::Unconfigured);
        // Cannot start unconfigured.
        assert!(lp.start(0.0, 0.0).is_err());

        lp.configure(IntegratorMethod::Rk4).unwrap();
        assert_eq!(lp.phase(), LoopPhase::Configured);
        lp.start(0.0, 0.0).unwrap();
        assert_eq!(lp.phase(), LoopPhase::Running);

        lp.pause().unwrap();
        assert_eq!(lp.phase(), LoopPhase::Paused);
        lp.start(5.0, 5.0).unwrap();
        assert_eq!(lp.phase(), LoopPhase::Running);
        assert_eq!(lp.next_due(), 5.5);

        lp.complete();
        assert!(lp.start(0.0, 0.0).is_err());
    }

    #[test]
    fn membership_changes_reset_history() {
        let mut lp = IntegrationLoop::new("loop", 1.0).unwrap();
        lp.configure(IntegratorMethod::Abm4).unwrap();
        lp.add_member("sat-a").unwrap();
        assert!(lp.add_member("sat-a").is_err());
        lp.add_member("sat-b").unwrap();
        lp.remove_member("sat-a").unwrap();
        assert!(lp.remove_member("sat-a").is_err());
        assert_eq!(lp.members(), &["sat-b".to_string()]);
    }

    #[test]
    fn invalid_method_parameters_rejected() {
        let mut lp = IntegrationLoop::new("loop", 1.0).unwrap();
        assert!(lp
            .configure(IntegratorMethod::GaussJackson { order: 9 })
            .is_err());
        assert_eq!(lp.phase(), LoopPhase::Unconfigured);
    }

    #[test]
    fn zero_step_size_rejected() {
        assert!(IntegrationLoop::new("bad", 0.0).is_err());
    }
}
