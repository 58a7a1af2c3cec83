//! Aerodynamic drag over an exponential atmosphere.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::SimResult;
use crate::state::BodyState;

use super::{Derivatives, ForceContext, ForceModel};

/// Exponential atmospheric density: ρ(h) = ρ₀ exp(−h / H).
///
/// Single scale height, no diurnal or solar-activity variation. Adequate
/// for drag-order perturbations; a higher-fidelity model slots in behind
/// the same contributor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExponentialAtmosphere {
    /// Density at the reference surface (kg/m³).
    pub rho0: f64,
    /// Surface radius the altitude is measured from (m).
    pub surface_radius: f64,
    /// Scale height (m).
    pub scale_height: f64,
    /// Altitude above which density is treated as zero (m).
    pub max_altitude: f64,
}

impl ExponentialAtmosphere {
    /// Earth-like defaults.
    pub fn standard() -> Self {
        Self {
            rho0: 1.225,
            surface_radius: 6.378_137e6,
            scale_height: 8_500.0,
            max_altitude: 1.0e6,
        }
    }

    /// Density at a geocentric distance (m).
    pub fn density(&self, radius: f64) -> f64 {
        let altitude = radius - self.surface_radius;
        if altitude < 0.0 {
            return self.rho0;
        }
        if altitude > self.max_altitude {
            return 0.0;
        }
        self.rho0 * (-altitude / self.scale_height).exp()
    }
}

/// Cannonball drag: a = −½ ρ |v_rel| v_rel · (Cd A / m).
///
/// The relative velocity subtracts the co-rotating atmosphere,
/// ω × r with the planet's spin rate about +z of the integration frame.
pub struct AtmosphericDrag {
    /// Drag coefficient times reference area (m²).
    pub cd_area: f64,
    atmosphere: ExponentialAtmosphere,
    source: String,
    spin_rate: f64,
    enabled: bool,
}

impl AtmosphericDrag {
    /// Build a drag contributor for a body around `source`.
    pub fn new(
        cd_area: f64,
        atmosphere: ExponentialAtmosphere,
        source: String,
        spin_rate: f64,
    ) -> Self {
        Self {
            cd_area,
            atmosphere,
            source,
            spin_rate,
            enabled: true,
        }
    }

    /// Disable without removing (builder style).
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// The gravity source name this drag model is tied to.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl ForceModel for AtmosphericDrag {
    fn contribute(
        &self,
        state: &BodyState,
        ctx: &ForceContext<'_>,
        out: &mut Derivatives,
    ) -> SimResult<()> {
        let r = state.trans.position.norm();
        let rho = self.atmosphere.density(r);
        if rho <= 0.0 {
            return Ok(());
        }

        let omega = Vector3::new(0.0, 0.0, self.spin_rate);
        let v_rel = state.trans.velocity - omega.cross(&state.trans.position);
        let speed = v_rel.norm();
        if speed < 1e-9 {
            return Ok(());
        }

        out.acceleration += -0.5 * rho * speed * (self.cd_area / ctx.mass.mass) * v_rel;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "atmospheric drag"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }
}
