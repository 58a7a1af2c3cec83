//! Variable-step, variable-order Adams integrator (nonstiff LSODE mode).
//!
//! Order climbs from 1 toward a configurable maximum as the derivative
//! history fills; the predictor-corrector difference drives acceptance and
//! the next internal step size. Because Adams coefficients assume uniform
//! spacing, any step-size change restarts the memory at order 1 rather
//! than rescaling the history.

use nalgebra::DVector;

use crate::error::{SimError, SimResult};

use super::multistep::{adams_bashforth, adams_moulton};
use super::{DerivFn, Integrator, IntegratorSnapshot, StepOutcome};

/// Highest Adams order the controller will climb to.
const MAX_ORDER: usize = 5;

/// Variable-step, variable-order Adams PECE.
#[derive(Debug)]
pub struct Lsode {
    /// Relative error tolerance per component.
    pub rel_tol: f64,
    /// Absolute error floor per component.
    pub abs_tol: f64,
    /// Smallest internal step magnitude before giving up (s).
    pub min_step: f64,
    /// Per-order coefficient tables, index = order.
    ab: Vec<Vec<f64>>,
    am: Vec<Vec<f64>>,
    order: usize,
    h: f64,
    times: Vec<f64>,
    derivs: Vec<DVector<f64>>,
    last_converged: bool,
}

impl Lsode {
    /// Build with the given tolerances.
    pub fn new(rel_tol: f64, abs_tol: f64) -> Self {
        let mut ab = vec![Vec::new()];
        let mut am = vec![Vec::new()];
        for k in 1..=MAX_ORDER {
            ab.push(adams_bashforth(k));
            am.push(adams_moulton(k));
        }
        Self {
            rel_tol,
            abs_tol,
            min_step: 1e-9,
            ab,
            am,
            order: 1,
            h: 0.0,
            times: Vec::new(),
            derivs: Vec::new(),
            last_converged: true,
        }
    }

    /// Current working order.
    pub fn current_order(&self) -> usize {
        self.order
    }

    fn restart(&mut self, h: f64) {
        if !self.derivs.is_empty() {
            log::debug!("LSODE memory restart at order 1, h = {h:.3e}");
        }
        self.order = 1;
        self.h = h;
        self.times.clear();
        self.derivs.clear();
    }

    fn scaled_error(&self, diff: &DVector<f64>, y: &DVector<f64>) -> f64 {
        let mut norm_sq = 0.0;
        for i in 0..y.len() {
            let scale = self.abs_tol + self.rel_tol * y[i].abs();
            let e = diff[i] / scale;
            norm_sq += e * e;
        }
        (norm_sq / y.len() as f64).sqrt()
    }

    /// One internal Adams PECE step at the current order. Returns the new
    /// state and scaled error.
    fn internal_step(
        &mut self,
        t: f64,
        y: &DVector<f64>,
        deriv: &DerivFn,
    ) -> SimResult<(DVector<f64>, f64, usize)> {
        let h = self.h;
        let k = self.order.min(self.derivs.len() + 1);

        let f_now = deriv(t, y)?;
        let mut evaluations = 1;

        // Predictor over f_now and the stored history.
        let mut y_pred = y.clone();
        for (j, &b) in self.ab[k].iter().enumerate() {
            let f = if j == 0 {
                &f_now
            } else {
                &self.derivs[self.derivs.len() - j]
            };
            y_pred.axpy(h * b, f, 1.0);
        }

        // Single corrector pass.
        let f_next = deriv(t + h, &y_pred)?;
        evaluations += 1;
        let mut y_corr = y.clone();
        for (j, &b) in self.am[k].iter().enumerate() {
            let f = if j == 0 {
                &f_next
            } else if j == 1 {
                &f_now
            } else {
                &self.derivs[self.derivs.len() - (j - 1)]
            };
            y_corr.axpy(h * b, f, 1.0);
        }

        let err = self.scaled_error(&(&y_corr - &y_pred), &y_corr);
        if err <= 1.0 {
            self.times.push(t);
            self.derivs.push(f_now);
            let keep = MAX_ORDER;
            if self.derivs.len() > keep {
                self.times.remove(0);
                self.derivs.remove(0);
            }
        }
        Ok((y_corr, err, evaluations))
    }
}

impl Integrator for Lsode {
    fn step(
        &mut self,
        t: f64,
        dt: f64,
        y: &DVector<f64>,
        deriv: &DerivFn,
    ) -> SimResult<StepOutcome> {
        if dt == 0.0 {
            return Err(SimError::InvalidState("integration step of zero".into()));
        }
        let direction = dt.signum();
        let t_end = t + dt;

        if self.h == 0.0 || self.h.signum() != direction {
            self.restart(dt);
        }

        let mut t_now = t;
        let mut y_now = y.clone();
        let mut evaluations = 0;
        let mut worst_error: f64 = 0.0;

        while (t_end - t_now) * direction > 1e-12 * dt.abs() {
            let remaining = t_end - t_now;
            if self.h.abs() > remaining.abs() {
                // Tail step: the spacing changes, so the memory restarts.
                self.restart(remaining);
            }

            let (y_new, err, evals) = self.internal_step(t_now, &y_now, deriv)?;
            evaluations += evals;

            if err <= 1.0 {
                t_now += self.h;
                y_now = y_new;
                worst_error = worst_error.max(err);

                // Order climbs while the history supports it and the error
                // has headroom; the step grows only via restart.
                if self.order < MAX_ORDER && self.derivs.len() >= self.order && err < 0.1 {
                    self.order += 1;
                } else if err < 1e-3 && remaining.abs() > 2.0 * self.h.abs() {
                    let h = self.h * 2.0;
                    self.restart(h);
                }
            } else {
                self.last_converged = false;
                let h = self.h * 0.5;
                if h.abs() < self.min_step {
                    return Err(SimError::Convergence {
                        iterations: 0,
                        residual: err,
                        tolerance: 1.0,
                    });
                }
                self.restart(h);
            }
        }

        self.last_converged = true;
        Ok(StepOutcome {
            y: y_now,
            error_estimate: Some(worst_error),
            evaluations,
        })
    }

    fn reset(&mut self) {
        self.restart(0.0);
        self.h = 0.0;
    }

    fn name(&self) -> &'static str {
        "LSODE (Adams)"
    }

    fn order(&self) -> u8 {
        self.order as u8
    }

    fn last_step_converged(&self) -> bool {
        self.last_converged
    }

    fn snapshot(&self) -> IntegratorSnapshot {
        IntegratorSnapshot::Multistep {
            h: self.h,
            order: self.order,
            times: self.times.clone(),
            derivs: self.derivs.iter().map(|d| d.as_slice().to_vec()).collect(),
            last_converged: self.last_converged,
        }
    }

    fn restore(&mut self, snapshot: &IntegratorSnapshot) {
        if let IntegratorSnapshot::Multistep {
            h,
            order,
            times,
            derivs,
            last_converged,
        } = snapshot
        {
            self.h = *h;
            self.order = (*order).clamp(1, MAX_ORDER);
            self.times = times.clone();
            self.derivs = derivs.iter().map(|d| DVector::from_vec(d.clone())).collect();
            self.last_converged = *last_converged;
        }
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
    fn order_climbs_from_one() {
        let mut lsode = Lsode::new(1e-10, 1e-12);
        assert_eq!(lsode.current_order(), 1);
        let y = DVector::from_vec(vec![1.0, 0.0]);
        lsode.step(0.0, 1.0, &y, &oscillator).unwrap();
        assert!(lsode.current_order() > 1);
    }

    #[test]
    fn meets_tolerance_over_period() {
        let mut lsode = Lsode::new(1e-9, 1e-11);
        let mut y = DVector::from_vec(vec![1.0, 0.0]);
        let period = std::f64::consts::TAU;
        let chunks = 8;
        let mut t = 0.0;
        for _ in 0..chunks {
            let out = lsode.step(t, period / chunks as f64, &y, &oscillator).unwrap();
            y = out.y;
            t += period / chunks as f64;
        }
        assert!(lsode.last_step_converged());
        assert_relative_eq!(y[0], 1.0, epsilon = 1e-5);
        assert_relative_eq!(y[1], 0.0, epsilon = 1e-5);
    }
}
