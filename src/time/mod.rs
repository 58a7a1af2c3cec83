//! Synchronized time scales.
//!
//! A [`TimeManager`] owns one root clock (`Dyn`, dynamic seconds) and a set
//! of derived scales (TAI, TT, UTC, UT1, GMST) related by a declared
//! update-from graph. `advance` moves only the root; every derived value is
//! recomputed deterministically from the root through the graph, so there is
//! no drift between scales and backward stepping needs no special casing.
//!
//! The update graph is validated at construction: exactly one root (`Dyn`),
//! every other scale has exactly one parent, no cycles, and every edge must
//! be one the manager has a conversion formula for.

pub mod calendar;
pub mod scale;
pub mod tables;

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use calendar::{
    j2000_seconds, j2000_seconds_from_jd, mjd_from_j2000_seconds, JD_J2000, MJD_OFFSET, TJD_OFFSET,
};
pub use scale::{gmst_to_angle, TimeScaleId, TT_TAI_OFFSET};
pub use tables::{LeapSecondTable, Ut1Table};

/// How an initial epoch is expressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EpochInit {
    /// Calendar fields in the initializer scale.
    Calendar {
        /// Year (Gregorian).
        year: i32,
        /// Month 1–12.
        month: u8,
        /// Day of month.
        day: u8,
        /// Hour 0–23.
        hour: u8,
        /// Minute 0–59.
        minute: u8,
        /// Seconds including fraction.
        second: f64,
    },
    /// Full Julian date.
    JulianDate(f64),
    /// Modified Julian Date (JD − 2400000.5).
    ModifiedJulianDate(f64),
    /// Truncated Julian Date (JD − 2440000.5).
    TruncatedJulianDate(f64),
    /// Seconds past J2000 in the initializer scale.
    SecondsSinceJ2000(f64),
}

impl EpochInit {
    /// Seconds past J2000 in the initializer's own scale.
    fn as_seconds(&self) -> f64 {
        match *self {
            Self::Calendar {
                year,
                month,
                day,
                hour,
                minute,
                second,
            } => j2000_seconds(year, month, day, hour, minute, second),
            Self::JulianDate(jd) => j2000_seconds_from_jd(jd),
            Self::ModifiedJulianDate(mjd) => j2000_seconds_from_jd(mjd + MJD_OFFSET),
            Self::TruncatedJulianDate(tjd) => j2000_seconds_from_jd(tjd + TJD_OFFSET),
            Self::SecondsSinceJ2000(s) => s,
        }
    }
}

/// Time-base configuration: initial epoch, rate, graph shape, table policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeConfig {
    /// Scale the initial epoch is expressed in.
    pub initializer: TimeScaleId,
    /// The initial epoch itself.
    pub epoch: EpochInit,
    /// Rate of the root clock relative to driver time. Negative runs the
    /// simulation backward.
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f64,
    /// Update-from edges as `(child, parent)`. `None` selects the standard
    /// chain TAI←Dyn, TT←TAI, UTC←TAI, UT1←UTC, GMST←UT1.
    #[serde(default)]
    pub updates: Option<Vec<(TimeScaleId, TimeScaleId)>>,
    /// TAI−UTC value to use when the leap-second table cannot answer.
    #[serde(default)]
    pub leap_override: Option<f64>,
    /// UT1−UTC value to use when no table is loaded or it cannot answer.
    /// Defaults to `Some(0.0)`: UT1 tracks UTC until real Earth-orientation
    /// data is supplied.
    #[serde(default = "default_ut1_override")]
    pub ut1_override: Option<f64>,
    /// Optional UT1−UTC samples `(utc_mjd, offset_seconds)`.
    #[serde(default)]
    pub ut1_table: Option<Vec<(f64, f64)>>,
}

fn default_scale_factor() -> f64 {
    1.0
}

fn default_ut1_override() -> Option<f64> {
    Some(0.0)
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            initializer: TimeScaleId::Tai,
            epoch: EpochInit::SecondsSinceJ2000(0.0),
            scale_factor: 1.0,
            updates: None,
            leap_override: None,
            ut1_override: Some(0.0),
            ut1_table: None,
        }
    }
}

fn standard_updates() -> Vec<(TimeScaleId, TimeScaleId)> {
    use TimeScaleId::*;
    vec![(Tai, Dyn), (Tt, Tai), (Utc, Tai), (Ut1, Utc), (Gmst, Ut1)]
}

/// The synchronized time base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeManager {
    dyn_seconds: f64,
    scale_factor: f64,
    /// TAI seconds past J2000 at `dyn_seconds == 0`.
    tai_at_dyn0: f64,
    /// Update edges `(child, parent)`, validated acyclic and convertible.
    updates: Vec<(TimeScaleId, TimeScaleId)>,
    leap: LeapSecondTable,
    ut1: Ut1Table,
    leap_override: Option<f64>,
    ut1_override: Option<f64>,
}

impl TimeManager {
    /// Build and validate a time base from configuration. Conversion of the
    /// initial epoch into the root representation happens here, exactly once.
    pub fn from_config(config: &TimeConfig) -> SimResult<Self> {
        let updates = config
            .updates
            .clone()
            .unwrap_or_else(standard_updates);
        validate_graph(&updates)?;

        let ut1 = match &config.ut1_table {
            Some(entries) => Ut1Table::new(entries.clone())?,
            None => Ut1Table::default(),
        };

        let mut manager = Self {
            dyn_seconds: 0.0,
            scale_factor: config.scale_factor,
            tai_at_dyn0: 0.0,
            updates,
            leap: LeapSecondTable::default(),
            ut1,
            leap_override: config.leap_override,
            ut1_override: config.ut1_override,
        };

        let init_seconds = config.epoch.as_seconds();
        match config.initializer {
            TimeScaleId::Dyn => {
                // Initializing on the root pins TAI to the J2000 anchor.
                manager.dyn_seconds = init_seconds;
            }
            scale => {
                manager.tai_at_dyn0 = manager.tai_from_initializer(scale, init_seconds)?;
            }
        }

        log::debug!(
            "time base initialized: TAI at dyn=0 is {:.6} s past J2000, scale factor {}",
            manager.tai_at_dyn0,
            manager.scale_factor
        );
        Ok(manager)
    }

    /// Advance the root clock by `dt` driver seconds (scaled by the current
    /// scale factor; both may be negative).
    pub fn advance(&mut self, dt: f64) {
        self.dyn_seconds += dt * self.scale_factor;
    }

    /// Current root-clock value, dynamic seconds.
    pub fn dyn_seconds(&self) -> f64 {
        self.dyn_seconds
    }

    /// Current scale factor.
    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    /// Change the root clock's rate, effective immediately. Sign flips
    /// reverse the direction of time mid-run.
    pub fn set_scale_factor(&mut self, factor: f64) {
        if factor.signum() != self.scale_factor.signum() {
            log::info!(
                "time direction change: scale factor {} -> {}",
                self.scale_factor,
                factor
            );
        }
        self.scale_factor = factor;
    }

    /// Current value of a scale, seconds past its J2000 epoch (sidereal
    /// seconds for GMST).
    pub fn seconds(&self, scale: TimeScaleId) -> SimResult<f64> {
        self.seconds_at(scale, self.dyn_seconds)
    }

    /// Value of a scale at a hypothetical root-clock value. Pure: does not
    /// move the clock. Integrators use this to evaluate time-dependent
    /// transforms at stage times inside a step.
    pub fn seconds_at(&self, scale: TimeScaleId, dyn_seconds: f64) -> SimResult<f64> {
        if scale == TimeScaleId::Dyn {
            return Ok(dyn_seconds);
        }
        let parent = self.parent_of(scale)?;
        let parent_value = self.seconds_at(parent, dyn_seconds)?;
        self.convert(parent, parent_value, scale)
    }

    /// GMST as a planet rotation angle (radians) at a hypothetical root
    /// clock value. Requires GMST to be in the update graph.
    pub fn gmst_angle_at(&self, dyn_seconds: f64) -> SimResult<f64> {
        Ok(gmst_to_angle(self.seconds_at(TimeScaleId::Gmst, dyn_seconds)?))
    }

    fn parent_of(&self, scale: TimeScaleId) -> SimResult<TimeScaleId> {
        self.updates
            .iter()
            .find(|(child, _)| *child == scale)
            .map(|&(_, parent)| parent)
            .ok_or_else(|| {
                SimError::Configuration(format!("scale {scale} is not in the update graph"))
            })
    }

    /// One conversion step along a declared edge, parent value to child value.
    fn convert(&self, parent: TimeScaleId, value: f64, child: TimeScaleId) -> SimResult<f64> {
        use TimeScaleId::*;
        match (parent, child) {
            (Dyn, Tai) => Ok(self.tai_at_dyn0 + value),
            (Tai, Tt) => Ok(value + TT_TAI_OFFSET),
            (Tt, Tai) => Ok(value - TT_TAI_OFFSET),
            (Tai, Utc) => {
                // TAI−UTC is keyed by UTC; two lookup passes converge since
                // the offset is piecewise constant.
                let guess = self.leap.offset_at(
                    mjd_from_j2000_seconds(value),
                    self.leap_override,
                )?;
                let offset = self.leap.offset_at(
                    mjd_from_j2000_seconds(value - guess),
                    self.leap_override,
                )?;
                Ok(value - offset)
            }
            (Utc, Tai) => {
                let offset = self
                    .leap
                    .offset_at(mjd_from_j2000_seconds(value), self.leap_override)?;
                Ok(value + offset)
            }
            (Utc, Ut1) => {
                let offset = self
                    .ut1
                    .offset_at(mjd_from_j2000_seconds(value), self.ut1_override)?;
                Ok(value + offset)
            }
            (Ut1, Utc) => {
                let offset = self
                    .ut1
                    .offset_at(mjd_from_j2000_seconds(value), self.ut1_override)?;
                Ok(value - offset)
            }
            (Ut1, Gmst) => Ok(scale::gmst_seconds(value)),
            (from, to) => Err(SimError::Configuration(format!(
                "no conversion from {from} to {to}"
            ))),
        }
    }

    /// Walk the initializer's value up the graph until TAI is known.
    fn tai_from_initializer(&self, scale: TimeScaleId, value: f64) -> SimResult<f64> {
        use TimeScaleId::*;
        let mut scale = scale;
        let mut value = value;
        loop {
            match scale {
                Tai => return Ok(value),
                Dyn => {
                    return Err(SimError::Configuration(
                        "initialization path reached the root without crossing TAI".into(),
                    ))
                }
                Gmst => {
                    return Err(SimError::Configuration(
                        "cannot initialize the time base from GMST".into(),
                    ))
                }
                _ => {}
            }
            let parent = self.parent_of(scale)?;
            // Invert the child's edge: recover the parent value.
            value = match (parent, scale) {
                (Tai, Tt) => value - TT_TAI_OFFSET,
                (Tai, Utc) => {
                    let offset = self
                        .leap
                        .offset_at(mjd_from_j2000_seconds(value), self.leap_override)?;
                    value + offset
                }
                (Utc, Ut1) => {
                    let offset = self
                        .ut1
                        .offset_at(mjd_from_j2000_seconds(value), self.ut1_override)?;
                    value - offset
                }
                (Tt, Tai) => value + TT_TAI_OFFSET,
                (Utc, Tai) => {
                    let guess = self
                        .leap
                        .offset_at(mjd_from_j2000_seconds(value), self.leap_override)?;
                    let offset = self.leap.offset_at(
                        mjd_from_j2000_seconds(value - guess),
                        self.leap_override,
                    )?;
                    value - offset
                }
                (from, to) => {
                    return Err(SimError::Configuration(format!(
                        "cannot invert conversion from {from} to {to} during initialization"
                    )))
                }
            };
            scale = parent;
        }
    }

    /// UTC calendar fields of the current instant, for display and logging.
    pub fn utc_calendar(&self) -> SimResult<(i32, u8, u8, u8, u8, f64)> {
        let utc = self.seconds(TimeScaleId::Utc)?;
        Ok(calendar::calendar_from_jd(
            JD_J2000 + utc / calendar::SECONDS_PER_DAY,
        ))
    }
}

/// Whether the manager has a conversion formula for a `(parent, child)`
/// update edge.
fn edge_supported(parent: TimeScaleId, child: TimeScaleId) -> bool {
    use TimeScaleId::*;
    matches!(
        (parent, child),
        (Dyn, Tai)
            | (Tai, Tt)
            | (Tt, Tai)
            | (Tai, Utc)
            | (Utc, Tai)
            | (Utc, Ut1)
            | (Ut1, Utc)
            | (Ut1, Gmst)
    )
}

/// Reject malformed update graphs: duplicate children, a parented root,
/// edges with no conversion formula, and cycles. Fails at setup, before
/// any stepping.
fn validate_graph(updates: &[(TimeScaleId, TimeScaleId)]) -> SimResult<()> {
    for (i, (child, parent)) in updates.iter().enumerate() {
        if *child == TimeScaleId::Dyn {
            return Err(SimError::Configuration(
                "Dyn is the root scale and cannot update from another scale".into(),
            ));
        }
        if child == parent {
            return Err(SimError::Configuration(format!(
                "scale {child} cannot update from itself"
            )));
        }
        if updates[..i].iter().any(|(c, _)| c == child) {
            return Err(SimError::Configuration(format!(
                "scale {child} has more than one update parent"
            )));
        }
        if !edge_supported(*parent, *child) {
            return Err(SimError::Configuration(format!(
                "no conversion from {parent} to {child}"
            )));
        }
    }

    // Each chain must terminate at Dyn within the scale count.
    for &(child, _) in updates {
        let mut current = child;
        let mut hops = 0;
        while current != TimeScaleId::Dyn {
            let next = updates
                .iter()
                .find(|(c, _)| *c == current)
                .map(|&(_, p)| p)
                .ok_or_else(|| {
                    SimError::Configuration(format!(
                        "scale {current} has no path to the root scale Dyn"
                    ))
                })?;
            hops += 1;
            if hops > TimeScaleId::all().len() {
                return Err(SimError::Configuration(format!(
                    "cyclic update relationship involving scale {child}"
                )));
            }
            current = next;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_at_2017() -> TimeManager {
        TimeManager::from_config(&TimeConfig {
            initializer: TimeScaleId::Utc,
            epoch: EpochInit::Calendar {
                year: 2017,
                month: 6,
                day: 1,
                hour: 0,
                minute: 0,
                second: 0.0,
            },
            ..TimeConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn standard_offsets_hold() {
        let tm = manager_at_2017();
        let tai = tm.seconds(TimeScaleId::Tai).unwrap();
        let tt = tm.seconds(TimeScaleId::Tt).unwrap();
        let utc = tm.seconds(TimeScaleId::Utc).unwrap();
        assert!((tt - tai - 32.184).abs() < 1e-9);
        // Mid-2017: TAI-UTC = 37 s.
        assert!((tai - utc - 37.0).abs() < 1e-9);
    }

    #[test]
    fn advance_moves_all_scales_together() {
        let mut tm = manager_at_2017();
        let tai0 = tm.seconds(TimeScaleId::Tai).unwrap();
        tm.advance(100.0);
        let tai1 = tm.seconds(TimeScaleId::Tai).unwrap();
        assert!((tai1 - tai0 - 100.0).abs() < 1e-9);
    }

    #[test]
    fn negative_scale_factor_reverses() {
        let mut tm = manager_at_2017();
        let utc0 = tm.seconds(TimeScaleId::Utc).unwrap();
        tm.advance(500.0);
        tm.set_scale_factor(-1.0);
        tm.advance(500.0);
        let utc1 = tm.seconds(TimeScaleId::Utc).unwrap();
        assert!((utc1 - utc0).abs() < 1e-9);
    }

    #[test]
    fn cyclic_graph_rejected() {
        use TimeScaleId::*;
        let err = TimeManager::from_config(&TimeConfig {
            updates: Some(vec![(Tai, Tt), (Tt, Tai)]),
            ..TimeConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, SimError::Configuration(_)));
    }

    #[test]
    fn double_parent_rejected() {
        use TimeScaleId::*;
        let err = TimeManager::from_config(&TimeConfig {
            updates: Some(vec![(Tai, Dyn), (Tt, Tai), (Tt, Dyn)]),
            ..TimeConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, SimError::Configuration(_)));
    }

    #[test]
    fn out_of_table_epoch_needs_override() {
        let config = TimeConfig {
            initializer: TimeScaleId::Utc,
            epoch: EpochInit::Calendar {
                year: 2060,
                month: 1,
                day: 1,
                hour: 0,
                minute: 0,
                second: 0.0,
            },
            ..TimeConfig::default()
        };
        assert!(matches!(
            TimeManager::from_config(&config).unwrap_err(),
            SimError::TableRange { .. }
        ));

        let with_override = TimeConfig {
            leap_override: Some(39.0),
            ..config
        };
        let tm = TimeManager::from_config(&with_override).unwrap();
        let tai = tm.seconds(TimeScaleId::Tai).unwrap();
        let utc = tm.seconds(TimeScaleId::Utc).unwrap();
        assert!((tai - utc - 39.0).abs() < 1e-9);
    }

    #[test]
    fn julian_initializers_agree() {
        let by_cal = TimeManager::from_config(&TimeConfig {
            initializer: TimeScaleId::Tai,
            epoch: EpochInit::Calendar {
                year: 2000,
                month: 1,
                day: 1,
                hour: 12,
                minute: 0,
                second: 0.0,
            },
            ..TimeConfig::default()
        })
        .unwrap();
        let by_jd = TimeManager::from_config(&TimeConfig {
            initializer: TimeScaleId::Tai,
            epoch: EpochInit::JulianDate(2_451_545.0),
            ..TimeConfig::default()
        })
        .unwrap();
        let by_mjd = TimeManager::from_config(&TimeConfig {
            initializer: TimeScaleId::Tai,
            epoch: EpochInit::ModifiedJulianDate(51_544.5),
            ..TimeConfig::default()
        })
        .unwrap();
        let a = by_cal.seconds(TimeScaleId::Tai).unwrap();
        let b = by_jd.seconds(TimeScaleId::Tai).unwrap();
        let c = by_mjd.seconds(TimeScaleId::Tai).unwrap();
        assert!((a - b).abs() < 1e-6 && (b - c).abs() < 1e-6);
    }

    #[test]
    fn gmst_available_through_chain() {
        let tm = manager_at_2017();
        let angle = tm.gmst_angle_at(tm.dyn_seconds()).unwrap();
        assert!((0.0..std::f64::consts::TAU).contains(&angle));
    }
}
