//! Solar radiation pressure (cannonball model).

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::SimResult;
use crate::state::BodyState;

use super::{Derivatives, ForceContext, ForceModel};

/// Radiation pressure at 1 AU (N/m²).
pub const SOLAR_PRESSURE_1AU: f64 = 4.56e-6;

/// Shadow handling for radiation pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShadowModel {
    /// Always sunlit.
    None,
    /// Cylindrical planet shadow.
    Cylindrical,
}

/// Cannonball radiation pressure: a = P · (Cr A / m) · ŝ, pushed away from
/// the light source, scaled by the shadow function.
///
/// The sun position is configuration input in the integration frame; a
/// live ephemeris is external data and out of scope here.
pub struct RadiationPressure {
    /// Reflectivity coefficient times area (m²).
    pub cr_area: f64,
    sun_position: Vector3<f64>,
    shadow: ShadowModel,
    planet_radius: f64,
    enabled: bool,
}

impl RadiationPressure {
    /// Build a radiation-pressure contributor.
    pub fn new(
        cr_area: f64,
        sun_position: Vector3<f64>,
        shadow: ShadowModel,
        planet_radius: f64,
    ) -> Self {
        Self {
            cr_area,
            sun_position,
            shadow,
            planet_radius,
            enabled: true,
        }
    }

    /// Shadow factor: 0 in umbra, 1 in sunlight.
    fn shadow_factor(&self, position: &Vector3<f64>) -> f64 {
        match self.shadow {
            ShadowModel::None => 1.0,
            ShadowModel::Cylindrical => {
                let sun_dir = self.sun_position.normalize();
                let along = position.dot(&sun_dir);
                if along > 0.0 {
                    return 1.0; // sunward side
                }
                let perp = position - along * sun_dir;
                if perp.norm() > self.planet_radius {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

impl ForceModel for RadiationPressure {
    fn contribute(
        &self,
        state: &BodyState,
        ctx: &ForceContext<'_>,
        out: &mut Derivatives,
    ) -> SimResult<()> {
        let shadow = self.shadow_factor(&state.trans.position);
        if shadow < 1e-6 {
            return Ok(());
        }

        let from_sun = state.trans.position - self.sun_position;
        let dist = from_sun.norm();
        if dist < 1.0 {
            return Ok(());
        }

        let pressure = SOLAR_PRESSURE_1AU * shadow;
        out.acceleration += pressure * (self.cr_area / ctx.mass.mass) * (from_sun / dist);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "radiation pressure"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }
}
