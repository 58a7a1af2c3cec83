//! Classical orbital elements and their Cartesian conversions.
//!
//! Elements are defined for elliptical and hyperbolic orbits; parabolic
//! orbits (|e − 1| below threshold) are rejected rather than approximated.
//!
//! # Degenerate-orbit policy
//!
//! Near-circular and near-equatorial orbits leave some angles undefined.
//! The tie-break is deterministic and NaN-free:
//!
//! - `e < 1e-11`: argument of periapsis is pinned to zero and the anomaly
//!   reported is the argument of latitude (angle from the ascending node).
//! - `sin i < 1e-11`: the ascending node is pinned to zero (node = +X).
//! - both: anomaly degenerates to the true longitude (angle from +X).

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

use crate::error::{SimError, SimResult};

/// Eccentricity below which the orbit is treated as circular.
pub const CIRCULAR_TOL: f64 = 1e-11;
/// `sin(i)` below which the orbit is treated as equatorial.
pub const EQUATORIAL_TOL: f64 = 1e-11;
/// |e − 1| below which the conic is (unsupported) parabolic.
const PARABOLIC_TOL: f64 = 1e-9;
/// Kepler-solver iteration budget and tolerance.
const KEPLER_MAX_ITER: usize = 50;
const KEPLER_TOL: f64 = 1e-13;

/// Which angle-like sixth element an element set carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnomalyKind {
    /// True anomaly (rad).
    True,
    /// Mean anomaly (rad).
    Mean,
    /// Eccentric anomaly (elliptic) or hyperbolic anomaly (rad).
    Eccentric,
    /// Time since periapsis passage (s).
    TimeSincePeriapsis,
    /// Argument of latitude, ω + ν (rad).
    ArgumentOfLatitude,
}

/// Classical (Keplerian) orbital elements.
///
/// Lengths in meters, angles in radians. `a` is negative for hyperbolic
/// orbits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClassicalElements {
    /// Semi-major axis (m).
    pub a: f64,
    /// Eccentricity.
    pub e: f64,
    /// Inclination (rad).
    pub i: f64,
    /// Right ascension of the ascending node (rad).
    pub raan: f64,
    /// Argument of periapsis (rad).
    pub aop: f64,
    /// The sixth element; interpretation given by `kind`.
    pub anomaly: f64,
    /// Which anomaly `anomaly` holds.
    pub kind: AnomalyKind,
}

impl ClassicalElements {
    /// Extract elements from a Cartesian state. The returned set carries a
    /// true anomaly (or its degenerate substitute, per the module policy).
    pub fn from_cartesian(
        position: &Vector3<f64>,
        velocity: &Vector3<f64>,
        mu: f64,
    ) -> SimResult<Self> {
        let r = position.norm();
        let v2 = velocity.norm_squared();
        if r < 1.0 {
            return Err(SimError::InvalidState(
                "orbital elements require a nonzero position".into(),
            ));
        }

        let h_vec = position.cross(velocity);
        let h = h_vec.norm();
        if h < 1e-6 {
            return Err(SimError::InvalidState(
                "orbital elements are undefined for rectilinear trajectories".into(),
            ));
        }

        let energy = 0.5 * v2 - mu / r;
        if energy.abs() < 1e-12 {
            return Err(SimError::InvalidState(
                "parabolic orbits are not supported".into(),
            ));
        }
        let a = -mu / (2.0 * energy);

        let e_vec = ((v2 - mu / r) * position - position.dot(velocity) * velocity) / mu;
        let e = e_vec.norm();
        if (e - 1.0).abs() < PARABOLIC_TOL {
            return Err(SimError::InvalidState(
                "parabolic orbits are not supported".into(),
            ));
        }

        let i = (h_vec.z / h).clamp(-1.0, 1.0).acos();
        let node = Vector3::z().cross(&h_vec);
        let n = node.norm();

        let circular = e < CIRCULAR_TOL;
        let equatorial = i.sin().abs() < EQUATORIAL_TOL;

        let (raan, aop, nu) = match (circular, equatorial) {
            (false, false) => {
                let raan = wrap(f64::atan2(node.y, node.x));
                let mut aop = ((node.dot(&e_vec)) / (n * e)).clamp(-1.0, 1.0).acos();
                if e_vec.z < 0.0 {
                    aop = TAU - aop;
                }
                let mut nu = (e_vec.dot(position) / (e * r)).clamp(-1.0, 1.0).acos();
                if position.dot(velocity) < 0.0 {
                    nu = TAU - nu;
                }
                (raan, aop, nu)
            }
            (true, false) => {
                // Circular inclined: anomaly is the argument of latitude.
                let raan = wrap(f64::atan2(node.y, node.x));
                let mut u = (node.dot(position) / (n * r)).clamp(-1.0, 1.0).acos();
                if position.z < 0.0 {
                    u = TAU - u;
                }
                (raan, 0.0, u)
            }
            (false, true) => {
                // Equatorial non-circular: node pinned to +X, so the
                // "argument" of periapsis is the longitude of periapsis.
                let mut aop = wrap(f64::atan2(e_vec.y, e_vec.x));
                if h_vec.z < 0.0 {
                    aop = wrap(TAU - aop);
                }
                let mut nu = (e_vec.dot(position) / (e * r)).clamp(-1.0, 1.0).acos();
                if position.dot(velocity) < 0.0 {
                    nu = TAU - nu;
                }
                (0.0, aop, nu)
            }
            (true, true) => {
                // Fully degenerate: anomaly is the true longitude.
                let mut l = wrap(f64::atan2(position.y, position.x));
                if h_vec.z < 0.0 {
                    l = wrap(TAU - l);
                }
                (0.0, 0.0, l)
            }
        };

        Ok(Self {
            a,
            e,
            i,
            raan,
            aop,
            anomaly: nu,
            kind: AnomalyKind::True,
        })
    }

    /// Build the Cartesian state for these elements.
    pub fn to_cartesian(&self, mu: f64) -> SimResult<(Vector3<f64>, Vector3<f64>)> {
        let nu = self.anomaly_as(AnomalyKind::True, mu)?;
        let p = self.a * (1.0 - self.e * self.e);
        if p <= 0.0 {
            return Err(SimError::InvalidState(format!(
                "non-positive semi-latus rectum (a = {}, e = {})",
                self.a, self.e
            )));
        }

        let denom = 1.0 + self.e * nu.cos();
        if denom < 1e-12 {
            return Err(SimError::InvalidState(
                "true anomaly outside the hyperbolic asymptote limit".into(),
            ));
        }
        let r = p / denom;

        let (sin_nu, cos_nu) = nu.sin_cos();
        let r_pf = Vector3::new(r * cos_nu, r * sin_nu, 0.0);
        let v_scale = (mu / p).sqrt();
        let v_pf = Vector3::new(-v_scale * sin_nu, v_scale * (self.e + cos_nu), 0.0);

        let (sin_o, cos_o) = self.raan.sin_cos();
        let (sin_i, cos_i) = self.i.sin_cos();
        let (sin_w, cos_w) = self.aop.sin_cos();

        // Perifocal -> inertial: Rz(raan) Rx(i) Rz(aop), written out.
        let rot = nalgebra::Matrix3::new(
            cos_o * cos_w - sin_o * sin_w * cos_i,
            -cos_o * sin_w - sin_o * cos_w * cos_i,
            sin_o * sin_i,
            sin_o * cos_w + cos_o * sin_w * cos_i,
            -sin_o * sin_w + cos_o * cos_w * cos_i,
            -cos_o * sin_i,
            sin_w * sin_i,
            cos_w * sin_i,
            cos_i,
        );

        Ok((rot * r_pf, rot * v_pf))
    }

    /// These elements with the sixth element re-expressed in another form.
    pub fn with_anomaly(&self, kind: AnomalyKind, mu: f64) -> SimResult<Self> {
        Ok(Self {
            anomaly: self.anomaly_as(kind, mu)?,
            kind,
            ..*self
        })
    }

    /// The sixth element converted to the requested kind.
    pub fn anomaly_as(&self, kind: AnomalyKind, mu: f64) -> SimResult<f64> {
        if self.kind == kind {
            return Ok(self.anomaly);
        }
        let nu = self.to_true_anomaly(mu)?;
        Ok(match kind {
            AnomalyKind::True => nu,
            AnomalyKind::ArgumentOfLatitude => wrap(self.aop + nu),
            AnomalyKind::Eccentric => true_to_eccentric(nu, self.e),
            AnomalyKind::Mean => eccentric_to_mean(true_to_eccentric(nu, self.e), self.e),
            AnomalyKind::TimeSincePeriapsis => {
                let m = eccentric_to_mean(true_to_eccentric(nu, self.e), self.e);
                m / self.mean_motion(mu)
            }
        })
    }

    /// Mean motion (rad/s), defined for elliptic and hyperbolic orbits.
    pub fn mean_motion(&self, mu: f64) -> f64 {
        (mu / self.a.abs().powi(3)).sqrt()
    }

    /// Orbital period, elliptic orbits only.
    pub fn period(&self, mu: f64) -> Option<f64> {
        (self.a > 0.0).then(|| TAU / self.mean_motion(mu))
    }

    fn to_true_anomaly(&self, mu: f64) -> SimResult<f64> {
        match self.kind {
            AnomalyKind::True => Ok(self.anomaly),
            AnomalyKind::ArgumentOfLatitude => Ok(wrap(self.anomaly - self.aop)),
            AnomalyKind::Eccentric => Ok(eccentric_to_true(self.anomaly, self.e)),
            AnomalyKind::Mean => {
                Ok(eccentric_to_true(solve_kepler(self.anomaly, self.e)?, self.e))
            }
            AnomalyKind::TimeSincePeriapsis => {
                let m = self.anomaly * self.mean_motion(mu);
                Ok(eccentric_to_true(solve_kepler(m, self.e)?, self.e))
            }
        }
    }
}

fn wrap(angle: f64) -> f64 {
    angle.rem_euclid(TAU)
}

/// True anomaly -> eccentric (elliptic) or hyperbolic anomaly.
fn true_to_eccentric(nu: f64, e: f64) -> f64 {
    if e < 1.0 {
        let half = ((1.0 - e) / (1.0 + e)).sqrt() * (nu / 2.0).tan();
        wrap(2.0 * half.atan())
    } else {
        // tanh(H/2) = sqrt((e-1)/(e+1)) tan(nu/2)
        let t = ((e - 1.0) / (e + 1.0)).sqrt() * (nu / 2.0).tan();
        2.0 * t.atanh()
    }
}

/// Eccentric (or hyperbolic) anomaly -> true anomaly.
fn eccentric_to_true(ecc_anom: f64, e: f64) -> f64 {
    if e < 1.0 {
        let half = ((1.0 + e) / (1.0 - e)).sqrt() * (ecc_anom / 2.0).tan();
        wrap(2.0 * half.atan())
    } else {
        let t = ((e + 1.0) / (e - 1.0)).sqrt() * (ecc_anom / 2.0).tanh();
        2.0 * t.atan()
    }
}

/// Eccentric (or hyperbolic) anomaly -> mean anomaly.
fn eccentric_to_mean(ecc_anom: f64, e: f64) -> f64 {
    if e < 1.0 {
        wrap(ecc_anom - e * ecc_anom.sin())
    } else {
        e * ecc_anom.sinh() - ecc_anom
    }
}

/// Solve Kepler's equation for the eccentric (or hyperbolic) anomaly by
/// Newton iteration with a bounded budget.
fn solve_kepler(mean_anom: f64, e: f64) -> SimResult<f64> {
    if e < 1.0 {
        let m = wrap(mean_anom);
        // Standard starter: M for small e, pi for large.
        let mut ecc = if e < 0.8 { m } else { std::f64::consts::PI };
        for _ in 0..KEPLER_MAX_ITER {
            let f = ecc - e * ecc.sin() - m;
            let fp = 1.0 - e * ecc.cos();
            let step = f / fp;
            ecc -= step;
            if step.abs() < KEPLER_TOL {
                return Ok(ecc);
            }
        }
        Err(SimError::Convergence {
            iterations: KEPLER_MAX_ITER,
            residual: (ecc - e * ecc.sin() - m).abs(),
            tolerance: KEPLER_TOL,
        })
    } else {
        let m = mean_anom;
        let mut h = (m / e).asinh();
        for _ in 0..KEPLER_MAX_ITER {
            let f = e * h.sinh() - h - m;
            let fp = e * h.cosh() - 1.0;
            let step = f / fp;
            h -= step;
            if step.abs() < KEPLER_TOL {
                return Ok(h);
            }
        }
        Err(SimError::Convergence {
            iterations: KEPLER_MAX_ITER,
            residual: (e * h.sinh() - h - m).abs(),
            tolerance: KEPLER_TOL,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const MU: f64 = 3.986_004_418e14;

    #[test]
    fn round_trip_generic_orbit() {
        let elements = ClassicalElements {
            a: 7.2e6,
            e: 0.05,
            i: 0.9,
            raan: 1.2,
            aop: 2.4,
            anomaly: 0.7,
            kind: AnomalyKind::True,
        };
        let (r, v) = elements.to_cartesian(MU).unwrap();
        let back = ClassicalElements::from_cartesian(&r, &v, MU).unwrap();

        assert_relative_eq!(back.a, elements.a, max_relative = 1e-10);
        assert_relative_eq!(back.e, elements.e, epsilon = 1e-9);
        assert_relative_eq!(back.i, elements.i, epsilon = 1e-10);
        assert_relative_eq!(back.raan, elements.raan, epsilon = 1e-10);
        assert_relative_eq!(back.aop, elements.aop, epsilon = 1e-8);
        assert_relative_eq!(back.anomaly, elements.anomaly, epsilon = 1e-8);
    }

    #[test]
    fn anomaly_kind_round_trips() {
        let elements = ClassicalElements {
            a: 8.0e6,
            e: 0.3,
            i: 0.5,
            raan: 0.4,
            aop: 1.0,
            anomaly: 2.1,
            kind: AnomalyKind::True,
        };
        for kind in [
            AnomalyKind::Mean,
            AnomalyKind::Eccentric,
            AnomalyKind::TimeSincePeriapsis,
            AnomalyKind::ArgumentOfLatitude,
        ] {
            let converted = elements.with_anomaly(kind, MU).unwrap();
            let back = converted.anomaly_as(AnomalyKind::True, MU).unwrap();
            assert_relative_eq!(back, elements.anomaly, epsilon = 1e-9);
        }
    }

    #[test]
    fn circular_orbit_uses_argument_of_latitude() {
        // Exactly circular inclined orbit built directly from geometry.
        let r_mag = 7.0e6;
        let v_mag = (MU / r_mag).sqrt();
        let inc: f64 = 0.6;
        let position = Vector3::new(r_mag, 0.0, 0.0);
        let velocity = Vector3::new(0.0, v_mag * inc.cos(), v_mag * inc.sin());

        let e = ClassicalElements::from_cartesian(&position, &velocity, MU).unwrap();
        assert!(e.e < CIRCULAR_TOL * 1e3);
        assert_eq!(e.aop, 0.0);
        // Position on the ascending node: argument of latitude zero.
        assert!(e.anomaly < 1e-6 || (TAU - e.anomaly) < 1e-6);
        assert!(e.aop.is_finite() && e.anomaly.is_finite());
    }

    #[test]
    fn equatorial_orbit_pins_node() {
        let elements = ClassicalElements {
            a: 7.5e6,
            e: 0.1,
            i: 0.0,
            raan: 0.0,
            aop: 0.8,
            anomaly: 0.3,
            kind: AnomalyKind::True,
        };
        let (r, v) = elements.to_cartesian(MU).unwrap();
        let back = ClassicalElements::from_cartesian(&r, &v, MU).unwrap();
        assert_eq!(back.raan, 0.0);
        // Longitude of periapsis absorbs raan + aop.
        assert_relative_eq!(back.aop, 0.8, epsilon = 1e-9);
        assert_relative_eq!(back.anomaly, 0.3, epsilon = 1e-9);
    }

    #[test]
    fn hyperbolic_round_trip() {
        let elements = ClassicalElements {
            a: -1.2e7,
            e: 1.5,
            i: 0.4,
            raan: 2.0,
            aop: 0.9,
            anomaly: 0.5,
            kind: AnomalyKind::True,
        };
        let (r, v) = elements.to_cartesian(MU).unwrap();
        let back = ClassicalElements::from_cartesian(&r, &v, MU).unwrap();
        assert_relative_eq!(back.a, elements.a, max_relative = 1e-9);
        assert_relative_eq!(back.e, elements.e, epsilon = 1e-9);

        // Mean <-> true round trip through the hyperbolic Kepler equation.
        let mean = elements.with_anomaly(AnomalyKind::Mean, MU).unwrap();
        let nu = mean.anomaly_as(AnomalyKind::True, MU).unwrap();
        assert_relative_eq!(nu, elements.anomaly, epsilon = 1e-9);
    }

    #[test]
    fn parabolic_rejected() {
        let elements = ClassicalElements {
            a: 7.0e6,
            e: 1.0,
            i: 0.1,
            raan: 0.0,
            aop: 0.0,
            anomaly: 0.0,
            kind: AnomalyKind::True,
        };
        assert!(elements.to_cartesian(MU).is_err());
    }
}
