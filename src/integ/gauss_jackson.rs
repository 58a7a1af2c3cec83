//! Gauss-Jackson style fixed-order predictor-corrector.
//!
//! An even-order (2 to 8, default 8) multi-step method in ordinate form:
//! Adams-Bashforth prediction, Adams-Moulton correction iterated to
//! tolerance with a bounded iteration budget. A fresh instance, a method
//! switch, or a step-size change enters a bootstrap phase driven by
//! single-step RK4 until the derivative history is full.
//!
//! Whether the most recent corrector iteration met tolerance is exposed via
//! [`Integrator::last_step_converged`]; exhausting the budget aborts the
//! step with a convergence error instead of accepting a bad state.

use nalgebra::DVector;

use crate::error::{SimError, SimResult};

use super::multistep::AdamsPc;
use super::{DerivFn, Integrator, IntegratorSnapshot, StepOutcome};

/// Default corrector iteration budget.
pub const DEFAULT_MAX_ITERATIONS: usize = 12;
/// Default corrector convergence tolerance (scaled residual).
pub const DEFAULT_TOLERANCE: f64 = 1e-12;

/// Fixed-order Gauss-Jackson style predictor-corrector.
#[derive(Debug)]
pub struct GaussJackson {
    core: AdamsPc,
    order: u32,
}

impl GaussJackson {
    /// Build at the given even order between 2 and 8.
    pub fn new(order: u32) -> SimResult<Self> {
        if !(2..=8).contains(&order) || order % 2 != 0 {
            return Err(SimError::Configuration(format!(
                "Gauss-Jackson order must be even and within 2..=8, got {order}"
            )));
        }
        Ok(Self {
            core: AdamsPc::new(
                order as usize,
                true,
                DEFAULT_MAX_ITERATIONS,
                DEFAULT_TOLERANCE,
                "Gauss-Jackson",
            ),
            order,
        })
    }

    /// Default order-8 configuration.
    pub fn order8() -> Self {
        Self::new(8).expect("8 is a valid order")
    }

    /// Whether the method is still priming its history.
    pub fn in_bootstrap(&self) -> bool {
        self.core.in_bootstrap()
    }
}

impl Integrator for GaussJackson {
    fn step(
        &mut self,
        t: f64,
        dt: f64,
        y: &DVector<f64>,
        deriv: &DerivFn,
    ) -> SimResult<StepOutcome> {
        self.core.step(t, dt, y, deriv)
    }

    fn reset(&mut self) {
        self.core.reset();
    }

    fn name(&self) -> &'static str {
        "Gauss-Jackson"
    }

    fn order(&self) -> u8 {
        self.order as u8
    }

    fn last_step_converged(&self) -> bool {
        self.core.last_converged()
    }

    fn snapshot(&self) -> IntegratorSnapshot {
        self.core.snapshot()
    }

    fn restore(&mut self, snapshot: &IntegratorSnapshot) {
        self.core.restore(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn oscillator(_t: f64, y: &DVector<f64>) -> SimResult<DVector<f64>> {
        Ok(DVector::from_vec(vec![y[1], -y[0]]))
    }

    #[test]
    fn odd_or_large_order_rejected() {
        assert!(GaussJackson::new(7).is_err());
        assert!(GaussJackson::new(10).is_err());
        assert!(GaussJackson::new(8).is_ok());
    }

    #[test]
    fn bootstrap_then_high_accuracy() {
        let mut gj = GaussJackson::order8();
        assert!(gj.in_bootstrap());

        let mut y = DVector::from_vec(vec![1.0, 0.0]);
        let dt = std::f64::consts::TAU / 200.0;
        let mut t = 0.0;
        for _ in 0..200 {
            let out = gj.step(t, dt, &y, &oscillator).unwrap();
            y = out.y;
            t += dt;
        }
        assert!(!gj.in_bootstrap());
        assert!(gj.last_step_converged());
        // One full period of the unit oscillator; the RK4 bootstrap steps
        // dominate the residual error.
        assert_relative_eq!(y[0], 1.0, epsilon = 1e-7);
        assert_relative_eq!(y[1], 0.0, epsilon = 1e-7);
    }

    #[test]
    fn beats_rk4_at_same_step() {
        use super::super::rk::Rk4;

        let dt = std::f64::consts::TAU / 100.0;
        let steps = 300;

        let run = |integ: &mut dyn Integrator| {
            let mut y = DVector::from_vec(vec![1.0, 0.0]);
            let mut t = 0.0;
            for _ in 0..steps {
                y = integ.step(t, dt, &y, &oscillator).unwrap().y;
                t += dt;
            }
            let exact = (t.cos(), -t.sin());
            ((y[0] - exact.0).powi(2) + (y[1] - exact.1).powi(2)).sqrt()
        };

        let rk4_err = run(&mut Rk4);
        let gj_err = run(&mut GaussJackson::order8());
        assert!(
            gj_err < rk4_err,
            "expected multi-step win: gj {gj_err:.3e} vs rk4 {rk4_err:.3e}"
        );
    }

    #[test]
    fn nonconvergence_is_reported() {
        // A corrector budget of zero... use an impossible tolerance with a
        // tiny budget instead: force the iteration to run out.
        let mut gj = GaussJackson {
            core: AdamsPc::new(2, true, 1, 0.0, "Gauss-Jackson"),
            order: 2,
        };
        let mut y = DVector::from_vec(vec![1.0, 0.0]);
        let mut t = 0.0;
        let dt = 0.1;
        let mut failed = false;
        for _ in 0..5 {
            match gj.step(t, dt, &y, &oscillator) {
                Ok(out) => {
                    y = out.y;
                    t += dt;
                }
                Err(SimError::Convergence { .. }) => {
                    failed = true;
                    break;
                }
                Err(other) => panic!("unexpected error {other}"),
            }
        }
        assert!(failed);
        assert!(!gj.last_step_converged());
    }
}
