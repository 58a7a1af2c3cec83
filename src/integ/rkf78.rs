//! Embedded Runge-Kutta-Fehlberg 7(8) with adaptive step control.
//!
//! The 13-stage coefficient set is Fehlberg's (NASA TR R-287). A `step(dt)`
//! call consumes the whole interval with internal substeps: each substep is
//! accepted against a scaled error norm built from the embedded 7th/8th
//! order difference, and the suggested substep carries over between calls.
//! Step-size underflow during rejection is reported as a convergence
//! failure rather than looping forever.

use nalgebra::DVector;

use crate::error::{SimError, SimResult};

use super::{DerivFn, Integrator, IntegratorSnapshot, StepOutcome};

const STAGES: usize = 13;

/// Stage nodes c_i.
#[rustfmt::skip]
const C: [f64; STAGES] = [
    0.0, 2.0 / 27.0, 1.0 / 9.0, 1.0 / 6.0, 5.0 / 12.0, 0.5, 5.0 / 6.0,
    1.0 / 6.0, 2.0 / 3.0, 1.0 / 3.0, 1.0, 0.0, 1.0,
];

/// Coupling coefficients a_ij (row i, columns j < i).
#[rustfmt::skip]
const A: [[f64; 12]; STAGES] = [
    [0.0; 12],
    [2.0/27.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [1.0/36.0, 1.0/12.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [1.0/24.0, 0.0, 1.0/8.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [5.0/12.0, 0.0, -25.0/16.0, 25.0/16.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [1.0/20.0, 0.0, 0.0, 1.0/4.0, 1.0/5.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [-25.0/108.0, 0.0, 0.0, 125.0/108.0, -65.0/27.0, 125.0/54.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [31.0/300.0, 0.0, 0.0, 0.0, 61.0/225.0, -2.0/9.0, 13.0/900.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [2.0, 0.0, 0.0, -53.0/6.0, 704.0/45.0, -107.0/9.0, 67.0/90.0, 3.0, 0.0, 0.0, 0.0, 0.0],
    [-91.0/108.0, 0.0, 0.0, 23.0/108.0, -976.0/135.0, 311.0/54.0, -19.0/60.0, 17.0/6.0, -1.0/12.0, 0.0, 0.0, 0.0],
    [2383.0/4100.0, 0.0, 0.0, -341.0/164.0, 4496.0/1025.0, -301.0/82.0, 2133.0/4100.0, 45.0/82.0, 45.0/164.0, 18.0/41.0, 0.0, 0.0],
    [3.0/205.0, 0.0, 0.0, 0.0, 0.0, -6.0/41.0, -3.0/205.0, -3.0/41.0, 3.0/41.0, 6.0/41.0, 0.0, 0.0],
    [-1777.0/4100.0, 0.0, 0.0, -341.0/164.0, 4496.0/1025.0, -289.0/82.0, 2193.0/4100.0, 51.0/82.0, 33.0/164.0, 12.0/41.0, 0.0, 1.0],
];

/// 8th-order solution weights.
#[rustfmt::skip]
const B8: [f64; STAGES] = [
    0.0, 0.0, 0.0, 0.0, 0.0, 34.0/105.0, 9.0/35.0, 9.0/35.0,
    9.0/280.0, 9.0/280.0, 0.0, 41.0/840.0, 41.0/840.0,
];

/// The truncation-error combination: err = h·41/840·(k0 + k10 − k11 − k12).
const ERR_WEIGHT: f64 = 41.0 / 840.0;

/// Embedded RKF 7(8) integrator.
#[derive(Debug)]
pub struct Rkf78 {
    /// Relative error tolerance per component.
    pub rel_tol: f64,
    /// Absolute error floor per component.
    pub abs_tol: f64,
    /// Smallest substep magnitude before giving up (s).
    pub min_step: f64,
    safety: f64,
    max_growth: f64,
    max_shrink: f64,
    /// Suggested substep carried between calls (signed).
    h_suggest: f64,
}

impl Rkf78 {
    /// Build with a relative tolerance; the absolute floor defaults three
    /// decades tighter.
    pub fn new(rel_tol: f64) -> Self {
        Self {
            rel_tol,
            abs_tol: rel_tol * 1e-3,
            min_step: 1e-6,
            safety: 0.9,
            max_growth: 5.0,
            max_shrink: 0.2,
            h_suggest: 0.0,
        }
    }

    /// One trial substep: the 8th-order solution and the error norm scaled
    /// so that 1.0 sits exactly on tolerance.
    fn trial(
        &self,
        t: f64,
        h: f64,
        y: &DVector<f64>,
        deriv: &DerivFn,
    ) -> SimResult<(DVector<f64>, f64)> {
        let mut k: Vec<DVector<f64>> = Vec::with_capacity(STAGES);
        for i in 0..STAGES {
            let mut yi = y.clone();
            for (j, kj) in k.iter().enumerate() {
                let a = A[i][j];
                if a != 0.0 {
                    yi.axpy(h * a, kj, 1.0);
                }
            }
            k.push(deriv(t + C[i] * h, &yi)?);
        }

        let mut y_next = y.clone();
        for (i, ki) in k.iter().enumerate() {
            if B8[i] != 0.0 {
                y_next.axpy(h * B8[i], ki, 1.0);
            }
        }

        let err_vec = (&k[0] + &k[10] - &k[11] - &k[12]) * (h * ERR_WEIGHT);
        let mut norm_sq = 0.0;
        for i in 0..y.len() {
            let scale = self.abs_tol + self.rel_tol * y[i].abs().max(y_next[i].abs());
            let e = err_vec[i] / scale;
            norm_sq += e * e;
        }
        let err_norm = (norm_sq / y.len() as f64).sqrt();

        Ok((y_next, err_norm))
    }
}

impl Integrator for Rkf78 {
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

        if self.h_suggest == 0.0 || self.h_suggest.signum() != direction {
            self.h_suggest = dt;
        }

        let mut t_now = t;
        let mut y_now = y.clone();
        let mut evaluations = 0;
        let mut worst_error: f64 = 0.0;
        let mut rejections = 0usize;

        while (t_end - t_now) * direction > 1e-12 * dt.abs() {
            let remaining = t_end - t_now;
            let mut h = if self.h_suggest.abs() > remaining.abs() {
                remaining
            } else {
                self.h_suggest
            };

            loop {
                let (y_trial, err) = self.trial(t_now, h, &y_now, deriv)?;
                evaluations += STAGES;

                if err <= 1.0 || h.abs() <= self.min_step {
                    if err > 1.0 {
                        log::warn!(
                            "RKF78 accepting minimum-size substep with scaled error {err:.3}"
                        );
                    }
                    worst_error = worst_error.max(err);
                    t_now += h;
                    y_now = y_trial;

                    // Grow or shrink the next suggestion (8th-order scaling).
                    let factor = if err > 0.0 {
                        (self.safety * err.powf(-0.125))
                            .clamp(self.max_shrink, self.max_growth)
                    } else {
                        self.max_growth
                    };
                    self.h_suggest = h * factor;
                    break;
                }

                rejections += 1;
                if rejections > 1000 {
                    return Err(SimError::Convergence {
                        iterations: rejections,
                        residual: err,
                        tolerance: 1.0,
                    });
                }
                let factor =
                    (self.safety * err.powf(-0.125)).clamp(self.max_shrink, 1.0);
                h *= factor;
                if h.abs() < self.min_step {
                    h = self.min_step * direction;
                }
            }
        }

        Ok(StepOutcome {
            y: y_now,
            error_estimate: Some(worst_error),
            evaluations,
        })
    }

    fn reset(&mut self) {
        self.h_suggest = 0.0;
    }

    fn name(&self) -> &'static str {
        "RKF 7(8)"
    }

    fn order(&self) -> u8 {
        8
    }

    fn snapshot(&self) -> IntegratorSnapshot {
        IntegratorSnapshot::Adaptive { h: self.h_suggest }
    }

    fn restore(&mut self, snapshot: &IntegratorSnapshot) {
        if let IntegratorSnapshot::Adaptive { h } = snapshot {
            self.h_suggest = *h;
        }
    }
}
