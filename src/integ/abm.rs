//! Fourth-order Adams-Bashforth-Moulton predictor-corrector (PECE).

use nalgebra::DVector;

use crate::error::SimResult;

use super::multistep::AdamsPc;
use super::{DerivFn, Integrator, IntegratorSnapshot, StepOutcome};

/// Classic ABM4: AB4 predictor, one AM4 corrector application, RK4
/// bootstrap. The predictor-corrector difference is reported as the local
/// error estimate.
#[derive(Debug)]
pub struct Abm4 {
    core: AdamsPc,
}

impl Default for Abm4 {
    fn default() -> Self {
        Self::new()
    }
}

impl Abm4 {
    /// Build a fresh ABM4.
    pub fn new() -> Self {
        Self {
            core: AdamsPc::new(4, false, 1, 0.0, "ABM4"),
        }
    }

    /// Whether the method is still priming its history.
    pub fn in_bootstrap(&self) -> bool {
        self.core.in_bootstrap()
    }
}

impl Integrator for Abm4 {
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
        "ABM4"
    }

    fn order(&self) -> u8 {
        4
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

    #[test]
    fn fourth_order_on_decay() {
        let deriv =
            |_t: f64, y: &DVector<f64>| -> SimResult<DVector<f64>> { Ok(-y.clone()) };
        let run = |dt: f64| {
            let mut abm = Abm4::new();
            let mut y = DVector::from_vec(vec![1.0]);
            let mut t = 0.0;
            while t < 2.0 - 1e-12 {
                y = abm.step(t, dt, &y, &deriv).unwrap().y;
                t += dt;
            }
            (y[0] - (-2.0f64).exp()).abs()
        };
        let ratio = run(0.02) / run(0.01);
        // Fourth order: halving h cuts error ~16x (bootstrap blurs it a bit).
        assert!(ratio > 10.0, "order ratio {ratio}");
    }

    #[test]
    fn reports_error_estimate_after_bootstrap() {
        let deriv =
            |_t: f64, y: &DVector<f64>| -> SimResult<DVector<f64>> { Ok(-y.clone()) };
        let mut abm = Abm4::new();
        let mut y = DVector::from_vec(vec![1.0]);
        let mut t = 0.0;
        let mut last = None;
        for _ in 0..6 {
            let out = abm.step(t, 0.05, &y, &deriv).unwrap();
            y = out.y;
            last = out.error_estimate;
            t += 0.05;
        }
        assert!(!abm.in_bootstrap());
        let estimate = last.unwrap();
        assert!(estimate > 0.0 && estimate < 1e-6);
        assert_relative_eq!(y[0], (-0.3f64).exp(), epsilon = 1e-7);
    }
}
