//! Time scale identifiers and scale-specific formulas.

use serde::{Deserialize, Serialize};

use super::calendar::SECONDS_PER_DAY;

/// Fixed offset TT − TAI, seconds.
pub const TT_TAI_OFFSET: f64 = 32.184;

/// The time scales the manager knows how to relate.
///
/// `Dyn` is the root clock that `advance` moves directly; every other scale
/// recomputes from its declared update parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TimeScaleId {
    /// Dynamic (simulation) time, seconds. The designated root.
    Dyn,
    /// International Atomic Time, seconds past J2000 TAI.
    Tai,
    /// Terrestrial Time, seconds past J2000 TT.
    Tt,
    /// Coordinated Universal Time, seconds past J2000 UTC.
    Utc,
    /// UT1, seconds past J2000 UT1.
    Ut1,
    /// Greenwich Mean Sidereal Time, sidereal seconds (unwrapped).
    Gmst,
}

impl TimeScaleId {
    /// Display name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Dyn => "Dyn",
            Self::Tai => "TAI",
            Self::Tt => "TT",
            Self::Utc => "UTC",
            Self::Ut1 => "UT1",
            Self::Gmst => "GMST",
        }
    }

    /// All scale identifiers.
    pub fn all() -> &'static [TimeScaleId] {
        &[
            Self::Dyn,
            Self::Tai,
            Self::Tt,
            Self::Utc,
            Self::Ut1,
            Self::Gmst,
        ]
    }
}

impl std::fmt::Display for TimeScaleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Greenwich Mean Sidereal Time from UT1, IAU 1982 model.
///
/// Input is UT1 seconds past J2000; the result is GMST in sidereal seconds,
/// unwrapped (not reduced modulo a day) so the scale stays monotonic under
/// forward or backward stepping. Reduce with [`gmst_to_angle`] when an angle
/// is needed.
pub fn gmst_seconds(ut1_seconds: f64) -> f64 {
    let tu = ut1_seconds / SECONDS_PER_DAY / 36_525.0;
    67_310.548_41
        + (876_600.0 * 3600.0 + 8_640_184.812_866) * tu
        + 0.093_104 * tu * tu
        - 6.2e-6 * tu * tu * tu
}

/// Reduce a GMST seconds value to a rotation angle in radians, [0, 2π).
pub fn gmst_to_angle(gmst_secs: f64) -> f64 {
    let frac = (gmst_secs / SECONDS_PER_DAY).rem_euclid(1.0);
    frac * std::f64::consts::TAU
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gmst_at_j2000_matches_reference() {
        // GMST at J2000 (UT1) is 18h 41m 50.548s ≈ 67310.548 s of day.
        let g = gmst_seconds(0.0);
        let day_secs = g.rem_euclid(SECONDS_PER_DAY);
        assert!((day_secs - 67_310.548_41).abs() < 1e-6);
    }

    #[test]
    fn gmst_rate_is_sidereal() {
        // One solar day advances GMST by ~86636.6 sidereal seconds
        // (a solar day is ~3m 56.6s longer than a sidereal day).
        let g0 = gmst_seconds(0.0);
        let g1 = gmst_seconds(SECONDS_PER_DAY);
        let rate = g1 - g0;
        assert!((rate - 86_636.555).abs() < 0.01, "rate {rate}");
    }

    #[test]
    fn gmst_angle_in_range() {
        for &t in &[-1.0e8, 0.0, 3.0e7, 9.9e8] {
            let a = gmst_to_angle(gmst_seconds(t));
            assert!((0.0..std::f64::consts::TAU).contains(&a));
        }
    }
}
