//! Shared machinery for multi-step (Adams family) integrators.
//!
//! Predictor/corrector ordinate coefficients are generated at construction
//! by integrating the Lagrange basis polynomials over one step, carried out
//! in exact rational arithmetic so every coefficient is correct to the last
//! bit of its `f64` rounding. A uniform-spacing derivative history buffer
//! and the predict-evaluate-correct loop live here; the public integrators
//! wrap this core with their correction policies.

use nalgebra::DVector;
use std::collections::VecDeque;

use crate::error::{SimError, SimResult};

use super::rk::rk4_raw;
use super::{DerivFn, IntegratorSnapshot, StepOutcome};

// ---------------------------------------------------------------------------
// Exact rational coefficient generation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Frac {
    num: i128,
    den: i128,
}

impl Frac {
    fn new(num: i128, den: i128) -> Self {
        debug_assert!(den != 0);
        let sign = if den < 0 { -1 } else { 1 };
        let g = gcd(num.unsigned_abs(), den.unsigned_abs()).max(1) as i128;
        Self {
            num: sign * num / g,
            den: sign * den / g,
        }
    }

    const ZERO: Frac = Frac { num: 0, den: 1 };

    fn add(self, other: Frac) -> Frac {
        Frac::new(self.num * other.den + other.num * self.den, self.den * other.den)
    }

    fn mul(self, other: Frac) -> Frac {
        Frac::new(self.num * other.num, self.den * other.den)
    }

    fn div_int(self, k: i128) -> Frac {
        Frac::new(self.num, self.den * k)
    }

    fn to_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

/// ∫₀¹ ℓ_j(s) ds for the Lagrange basis over integer `nodes`.
fn basis_integral(nodes: &[i64], j: usize) -> Frac {
    // Numerator polynomial Π_{i≠j} (s - x_i), ascending coefficients.
    let mut poly = vec![Frac::new(1, 1)];
    let mut denom: i128 = 1;
    for (i, &x) in nodes.iter().enumerate() {
        if i == j {
            continue;
        }
        denom *= (nodes[j] - x) as i128;
        let mut next = vec![Frac::ZERO; poly.len() + 1];
        for (p, &c) in poly.iter().enumerate() {
            // c * (s - x): contributes c to s^{p+1} and -c*x to s^p.
            next[p + 1] = next[p + 1].add(c);
            next[p] = next[p].add(c.mul(Frac::new(-(x as i128), 1)));
        }
        poly = next;
    }

    let mut integral = Frac::ZERO;
    for (p, &c) in poly.iter().enumerate() {
        integral = integral.add(c.div_int(p as i128 + 1));
    }
    Frac::new(integral.num, integral.den * denom)
}

/// Adams-Bashforth ordinate coefficients for a `k`-step predictor:
/// `y_{n+1} = y_n + h Σ β_j f_{n-j}`.
pub(crate) fn adams_bashforth(k: usize) -> Vec<f64> {
    let nodes: Vec<i64> = (0..k).map(|i| -(i as i64)).collect();
    (0..k).map(|j| basis_integral(&nodes, j).to_f64()).collect()
}

/// Adams-Moulton ordinate coefficients for a `k`-node corrector:
/// `y_{n+1} = y_n + h (β*_0 f_{n+1} + Σ_{j≥1} β*_j f_{n+1-j})`.
pub(crate) fn adams_moulton(k: usize) -> Vec<f64> {
    let nodes: Vec<i64> = (0..k).map(|i| 1 - i as i64).collect();
    (0..k).map(|j| basis_integral(&nodes, j).to_f64()).collect()
}

// ---------------------------------------------------------------------------
// Derivative history
// ---------------------------------------------------------------------------

/// Uniformly spaced derivative samples, newest last.
#[derive(Debug, Clone, Default)]
pub(crate) struct HistoryBuffer {
    h: f64,
    times: VecDeque<f64>,
    derivs: VecDeque<DVector<f64>>,
    capacity: usize,
}

impl HistoryBuffer {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            h: 0.0,
            times: VecDeque::new(),
            derivs: VecDeque::new(),
            capacity,
        }
    }

    fn clear(&mut self) {
        self.h = 0.0;
        self.times.clear();
        self.derivs.clear();
    }

    fn len(&self) -> usize {
        self.derivs.len()
    }

    /// Whether a sample at `t` with spacing `dt` continues this history.
    fn continues(&self, t: f64, dt: f64, dim: usize) -> bool {
        if self.derivs.is_empty() {
            return true;
        }
        let scale = dt.abs().max(1e-12);
        let back = *self.times.back().expect("non-empty");
        (dt - self.h).abs() <= 1e-9 * scale
            && (t - (back + self.h)).abs() <= 1e-6 * scale
            && self.derivs.back().map(|d| d.len()) == Some(dim)
    }

    fn push(&mut self, t: f64, dt: f64, f: DVector<f64>) {
        if self.derivs.is_empty() {
            self.h = dt;
        }
        self.times.push_back(t);
        self.derivs.push_back(f);
        while self.derivs.len() > self.capacity {
            self.times.pop_front();
            self.derivs.pop_front();
        }
    }

    /// Derivative `j` steps back from the newest sample.
    fn from_newest(&self, j: usize) -> &DVector<f64> {
        &self.derivs[self.derivs.len() - 1 - j]
    }
}

// ---------------------------------------------------------------------------
// Predict-evaluate-correct core
// ---------------------------------------------------------------------------

/// Fixed-order Adams predictor-corrector over a uniform step, bootstrapped
/// with single-step RK4 until the history is deep enough.
#[derive(Debug)]
pub(crate) struct AdamsPc {
    steps: usize,
    ab: Vec<f64>,
    am: Vec<f64>,
    history: HistoryBuffer,
    /// Iterate the corrector to tolerance (true) or apply one PECE pass.
    iterate: bool,
    max_iterations: usize,
    tolerance: f64,
    last_converged: bool,
    name: &'static str,
}

impl AdamsPc {
    pub(crate) fn new(
        steps: usize,
        iterate: bool,
        max_iterations: usize,
        tolerance: f64,
        name: &'static str,
    ) -> Self {
        Self {
            steps,
            ab: adams_bashforth(steps),
            am: adams_moulton(steps),
            history: HistoryBuffer::with_capacity(steps),
            iterate,
            max_iterations,
            tolerance,
            last_converged: true,
            name,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn order(&self) -> u8 {
        self.steps as u8
    }

    pub(crate) fn last_converged(&self) -> bool {
        self.last_converged
    }

    pub(crate) fn reset(&mut self) {
        if self.history.len() > 0 {
            log::debug!("{}: history discarded, re-entering bootstrap", self.name);
        }
        self.history.clear();
    }

    pub(crate) fn in_bootstrap(&self) -> bool {
        self.history.len() < self.steps
    }

    pub(crate) fn step(
        &mut self,
        t: f64,
        dt: f64,
        y: &DVector<f64>,
        deriv: &DerivFn,
    ) -> SimResult<StepOutcome> {
        if dt == 0.0 {
            return Err(SimError::InvalidState("integration step of zero".into()));
        }
        if !self.history.continues(t, dt, y.len()) {
            self.reset();
        }

        let f_now = deriv(t, y)?;
        self.history.push(t, dt, f_now);
        let mut evaluations = 1;

        if self.history.len() < self.steps {
            // Not enough history yet: single-step bootstrap.
            let (y_next, evals) = rk4_raw(t, dt, y, deriv)?;
            self.last_converged = true;
            return Ok(StepOutcome {
                y: y_next,
                error_estimate: None,
                evaluations: evaluations + evals,
            });
        }

        // Predictor.
        let mut y_pred = y.clone();
        for (j, &b) in self.ab.iter().enumerate() {
            y_pred.axpy(dt * b, self.history.from_newest(j), 1.0);
        }

        // Corrector: one pass (PECE) or iterate to tolerance.
        let mut y_new = y_pred.clone();
        let mut iterations = 0;
        let error_estimate;
        loop {
            let f_next = deriv(t + dt, &y_new)?;
            evaluations += 1;
            let mut y_corr = y.clone();
            y_corr.axpy(dt * self.am[0], &f_next, 1.0);
            for j in 1..self.steps {
                y_corr.axpy(dt * self.am[j], self.history.from_newest(j - 1), 1.0);
            }

            let residual = (&y_corr - &y_new).norm() / (1.0 + y_corr.norm());
            y_new = y_corr;
            iterations += 1;

            if !self.iterate {
                error_estimate = Some((&y_new - &y_pred).norm());
                break;
            }
            if residual < self.tolerance {
                error_estimate = Some(residual);
                break;
            }
            if iterations >= self.max_iterations {
                self.last_converged = false;
                return Err(SimError::Convergence {
                    iterations,
                    residual,
                    tolerance: self.tolerance,
                });
            }
        }

        self.last_converged = true;
        Ok(StepOutcome {
            y: y_new,
            error_estimate,
            evaluations,
        })
    }

    pub(crate) fn snapshot(&self) -> IntegratorSnapshot {
        IntegratorSnapshot::Multistep {
            h: self.history.h,
            order: self.steps,
            times: self.history.times.iter().copied().collect(),
            derivs: self
                .history
                .derivs
                .iter()
                .map(|d| d.as_slice().to_vec())
                .collect(),
            last_converged: self.last_converged,
        }
    }

    pub(crate) fn restore(&mut self, snapshot: &IntegratorSnapshot) {
        self.history.clear();
        if let IntegratorSnapshot::Multistep {
            h,
            times,
            derivs,
            last_converged,
            ..
        } = snapshot
        {
            self.history.h = *h;
            for (t, d) in times.iter().zip(derivs) {
                self.history.times.push_back(*t);
                self.history.derivs.push_back(DVector::from_vec(d.clone()));
            }
            self.last_converged = *last_converged;
        }
    }
}
