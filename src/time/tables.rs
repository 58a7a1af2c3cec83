//! Time-conversion data tables: TAI−UTC leap seconds and UT1−UTC offsets.
//!
//! Lookups outside a table's valid range are an error unless an explicit
//! override value has been supplied; falling back to the override is logged
//! so no recovery is silent.

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};

/// TAI−UTC offset table, keyed by UTC Modified Julian Date.
///
/// Each entry is `(mjd, tai_minus_utc_seconds)`, effective from that MJD
/// until the next entry. The built-in table covers the leap-second era
/// (1972-01-01 onward) up to a fixed horizon beyond the last announced leap
/// second; later dates need either a replacement table or an override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeapSecondTable {
    entries: Vec<(f64, f64)>,
    horizon_mjd: f64,
}

impl Default for LeapSecondTable {
    fn default() -> Self {
        Self {
            entries: BUILTIN_LEAP_SECONDS.to_vec(),
            horizon_mjd: 61_771.0, // 2028-01-01
        }
    }
}

impl LeapSecondTable {
    /// Build from explicit `(mjd, offset)` entries. Entries must be sorted.
    pub fn new(entries: Vec<(f64, f64)>, horizon_mjd: f64) -> SimResult<Self> {
        if entries.is_empty() {
            return Err(SimError::Configuration(
                "leap-second table must have at least one entry".into(),
            ));
        }
        if entries.windows(2).any(|w| w[0].0 >= w[1].0) {
            return Err(SimError::Configuration(
                "leap-second table entries must be strictly increasing in MJD".into(),
            ));
        }
        Ok(Self {
            entries,
            horizon_mjd,
        })
    }

    /// TAI−UTC at the given UTC MJD.
    ///
    /// Outside the table range this returns the `override_value` if one is
    /// supplied (logged), otherwise [`SimError::TableRange`].
    pub fn offset_at(&self, utc_mjd: f64, override_value: Option<f64>) -> SimResult<f64> {
        let min = self.entries[0].0;
        if utc_mjd < min || utc_mjd >= self.horizon_mjd {
            return match override_value {
                Some(v) => {
                    log::warn!(
                        "UTC MJD {utc_mjd:.3} outside leap-second table \
                         [{min:.1}, {:.1}); using override TAI-UTC = {v} s",
                        self.horizon_mjd
                    );
                    Ok(v)
                }
                None => Err(SimError::TableRange {
                    table: "TAI-UTC leap seconds",
                    value: utc_mjd,
                    min,
                    max: self.horizon_mjd,
                }),
            };
        }

        let idx = self
            .entries
            .partition_point(|&(mjd, _)| mjd <= utc_mjd)
            .saturating_sub(1);
        Ok(self.entries[idx].1)
    }
}

/// UT1−UTC offset table, keyed by UTC Modified Julian Date, linearly
/// interpolated between entries.
///
/// There is no built-in table: Earth-orientation data is external input. A
/// constant override (commonly 0.0, UT1 tracking UTC) stands in when no
/// table is loaded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ut1Table {
    entries: Vec<(f64, f64)>,
}

impl Ut1Table {
    /// Build from `(mjd, ut1_minus_utc)` samples. Entries must be sorted.
    pub fn new(entries: Vec<(f64, f64)>) -> SimResult<Self> {
        if entries.windows(2).any(|w| w[0].0 >= w[1].0) {
            return Err(SimError::Configuration(
                "UT1-UTC table entries must be strictly increasing in MJD".into(),
            ));
        }
        Ok(Self { entries })
    }

    /// Whether any samples are loaded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// UT1−UTC at the given UTC MJD, interpolated.
    ///
    /// With no table loaded, or outside the loaded span, the override value
    /// is used if supplied (logged on the out-of-range path), otherwise
    /// [`SimError::TableRange`].
    pub fn offset_at(&self, utc_mjd: f64, override_value: Option<f64>) -> SimResult<f64> {
        if self.entries.is_empty() {
            return override_value.ok_or(SimError::TableRange {
                table: "UT1-UTC",
                value: utc_mjd,
                min: f64::NAN,
                max: f64::NAN,
            });
        }

        let min = self.entries[0].0;
        let max = self.entries[self.entries.len() - 1].0;
        if utc_mjd < min || utc_mjd > max {
            return match override_value {
                Some(v) => {
                    log::warn!(
                        "UTC MJD {utc_mjd:.3} outside UT1-UTC table \
                         [{min:.1}, {max:.1}]; using override UT1-UTC = {v} s"
                    );
                    Ok(v)
                }
                None => Err(SimError::TableRange {
                    table: "UT1-UTC",
                    value: utc_mjd,
                    min,
                    max,
                }),
            };
        }

        let hi = self.entries.partition_point(|&(mjd, _)| mjd < utc_mjd);
        if hi == 0 {
            return Ok(self.entries[0].1);
        }
        let (m0, v0) = self.entries[hi - 1];
        let (m1, v1) = self.entries[hi.min(self.entries.len() - 1)];
        if (m1 - m0).abs() < f64::EPSILON {
            return Ok(v0);
        }
        Ok(v0 + (v1 - v0) * (utc_mjd - m0) / (m1 - m0))
    }
}

/// Leap seconds since the start of the leap-second era (IERS Bulletin C).
const BUILTIN_LEAP_SECONDS: &[(f64, f64)] = &[
    (41_317.0, 10.0), // 1972-01-01
    (41_499.0, 11.0), // 1972-07-01
    (41_683.0, 12.0), // 1973-01-01
    (42_048.0, 13.0), // 1974-01-01
    (42_413.0, 14.0), // 1975-01-01
    (42_778.0, 15.0), // 1976-01-01
    (43_144.0, 16.0), // 1977-01-01
    (43_509.0, 17.0), // 1978-01-01
    (43_874.0, 18.0), // 1979-01-01
    (44_239.0, 19.0), // 1980-01-01
    (44_786.0, 20.0), // 1981-07-01
    (45_151.0, 21.0), // 1982-07-01
    (45_516.0, 22.0), // 1983-07-01
    (46_247.0, 23.0), // 1985-07-01
    (47_161.0, 24.0), // 1988-01-01
    (47_892.0, 25.0), // 1990-01-01
    (48_257.0, 26.0), // 1991-01-01
    (48_804.0, 27.0), // 1992-07-01
    (49_169.0, 28.0), // 1993-07-01
    (49_534.0, 29.0), // 1994-07-01
    (50_083.0, 30.0), // 1996-01-01
    (50_630.0, 31.0), // 1997-07-01
    (51_179.0, 32.0), // 1999-01-01
    (53_736.0, 33.0), // 2006-01-01
    (54_832.0, 34.0), // 2009-01-01
    (56_109.0, 35.0), // 2012-07-01
    (57_204.0, 36.0), // 2015-07-01
    (57_754.0, 37.0), // 2017-01-01
];
