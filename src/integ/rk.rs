//! Fixed-step explicit Runge-Kutta methods.

use nalgebra::DVector;

use crate::error::SimResult;

use super::{DerivFn, Integrator, IntegratorSnapshot, StepOutcome};

/// One classic RK4 step; shared with the multi-step bootstrap. Returns the
/// advanced state and the evaluation count.
pub(crate) fn rk4_raw(
    t: f64,
    dt: f64,
    y: &DVector<f64>,
    deriv: &DerivFn,
) -> SimResult<(DVector<f64>, usize)> {
    let k1 = deriv(t, y)?;
    let k2 = deriv(t + dt / 2.0, &(y + &k1 * (dt / 2.0)))?;
    let k3 = deriv(t + dt / 2.0, &(y + &k2 * (dt / 2.0)))?;
    let k4 = deriv(t + dt, &(y + &k3 * dt))?;

    let y_next = y + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (dt / 6.0);
    Ok((y_next, 4))
}

/// Second-order Runge-Kutta (Heun's method).
#[derive(Debug, Default)]
pub struct Rk2;

impl Integrator for Rk2 {
    fn step(
        &mut self,
        t: f64,
        dt: f64,
        y: &DVector<f64>,
        deriv: &DerivFn,
    ) -> SimResult<StepOutcome> {
        let k1 = deriv(t, y)?;
        let k2 = deriv(t + dt, &(y + &k1 * dt))?;
        Ok(StepOutcome {
            y: y + (k1 + k2) * (dt / 2.0),
            error_estimate: None,
            evaluations: 2,
        })
    }

    fn reset(&mut self) {}

    fn name(&self) -> &'static str {
        "RK2 (Heun)"
    }

    fn order(&self) -> u8 {
        2
    }

    fn snapshot(&self) -> IntegratorSnapshot {
        IntegratorSnapshot::None
    }

    fn restore(&mut self, _snapshot: &IntegratorSnapshot) {}
}

/// Classic fourth-order Runge-Kutta.
#[derive(Debug, Default)]
pub struct Rk4;

impl Integrator for Rk4 {
    fn step(
        &mut self,
        t: f64,
        dt: f64,
        y: &DVector<f64>,
        deriv: &DerivFn,
    ) -> SimResult<StepOutcome> {
        let (y_next, evaluations) = rk4_raw(t, dt, y, deriv)?;
        Ok(StepOutcome {
            y: y_next,
            error_estimate: None,
            evaluations,
        })
    }

    fn reset(&mut self) {}

    fn name(&self) -> &'static str {
        "RK4"
    }

    fn order(&self) -> u8 {
        4
    }

    fn snapshot(&self) -> IntegratorSnapshot {
        IntegratorSnapshot::None
    }

    fn restore(&mut self, _snapshot: &IntegratorSnapshot) {}
}
