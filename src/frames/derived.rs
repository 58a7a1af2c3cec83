//! Derived frames computed on demand.
//!
//! LVLH and NED are functions of a subject state, not members of the frame
//! tree: they are rebuilt from the current state whenever asked for and are
//! never stored or integrated.

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};

use crate::error::{SimError, SimResult};

use super::Transform;

/// Local-Vertical-Local-Horizontal frame for an orbiting state.
///
/// Axes, expressed in the frame `position`/`velocity` are given in
/// (typically a planet-centered inertial frame):
///
/// - z: toward the planet center (−r̂)
/// - y: opposite the orbital angular momentum (−ĥ)
/// - x: completes the right-handed set (≈ along-track)
///
/// The returned transform is the LVLH frame's state relative to that frame,
/// including the orbital-rate angular velocity, so velocities map correctly.
pub fn lvlh_transform(position: &Vector3<f64>, velocity: &Vector3<f64>) -> SimResult<Transform> {
    let r = position.norm();
    let h_vec = position.cross(velocity);
    let h = h_vec.norm();
    if r < 1.0 || h < 1e-9 {
        return Err(SimError::InvalidState(
            "LVLH is undefined for degenerate (radial or zero) orbits".into(),
        ));
    }

    let z_axis = -position / r;
    let y_axis = -h_vec / h;
    let x_axis = y_axis.cross(&z_axis);

    let rotation = rotation_from_axes(&x_axis, &y_axis, &z_axis);
    // Orbital rate n = h / r^2 about +h, which is -y in LVLH axes.
    let n = h / (r * r);

    Ok(Transform {
        translation: *position,
        rotation,
        velocity: *velocity,
        angular_velocity: Vector3::new(0.0, -n, 0.0),
    })
}

/// North-East-Down frame at a point fixed to a rotating planet.
///
/// `position` is in the planet-fixed frame; the result is the NED frame's
/// state relative to planet-fixed (spherical-planet down direction). NED is
/// undefined on the rotation axis.
pub fn ned_transform(position: &Vector3<f64>) -> SimResult<Transform> {
    let r = position.norm();
    if r < 1.0 {
        return Err(SimError::InvalidState(
            "NED is undefined at the planet center".into(),
        ));
    }
    let r_hat = position / r;
    let east = Vector3::z_axis().cross(&r_hat);
    let east_norm = east.norm();
    if east_norm < 1e-9 {
        return Err(SimError::InvalidState(
            "NED is undefined on the planet rotation axis".into(),
        ));
    }

    let down = -r_hat;
    let east = east / east_norm;
    let north = east.cross(&down);

    Ok(Transform::rigid(
        *position,
        rotation_from_axes(&north, &east, &down),
    ))
}

/// Quaternion whose columns (child axes in parent coordinates) are the
/// given orthonormal triad.
fn rotation_from_axes(
    x: &Vector3<f64>,
    y: &Vector3<f64>,
    z: &Vector3<f64>,
) -> UnitQuaternion<f64> {
    let m = Matrix3::from_columns(&[*x, *y, *z]);
    UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn lvlh_axes_for_equatorial_orbit() {
        // Circular equatorial orbit: r along +x, v along +y, h along +z.
        let pos = Vector3::new(7.0e6, 0.0, 0.0);
        let vel = Vector3::new(0.0, 7.5e3, 0.0);
        let t = lvlh_transform(&pos, &vel).unwrap();

        // LVLH x (along-track) maps to inertial +y, z (nadir) to -x.
        let x_in_parent = t.map_vector(&Vector3::x());
        let z_in_parent = t.map_vector(&Vector3::z());
        assert_relative_eq!((x_in_parent - Vector3::y()).norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!((z_in_parent + Vector3::x()).norm(), 0.0, epsilon = 1e-12);

        // Orbital rate magnitude h/r^2 = v/r for circular orbits.
        let n = 7.5e3 / 7.0e6;
        assert_relative_eq!(t.angular_velocity.norm(), n, epsilon = 1e-12);
    }

    #[test]
    fn ned_axes_on_equator() {
        let pos = Vector3::new(6.4e6, 0.0, 0.0);
        let t = ned_transform(&pos).unwrap();
        // North is +z, east is +y, down is -x.
        assert_relative_eq!(
            (t.map_vector(&Vector3::x()) - Vector3::z()).norm(),
            0.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            (t.map_vector(&Vector3::y()) - Vector3::y()).norm(),
            0.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            (t.map_vector(&Vector3::z()) + Vector3::x()).norm(),
            0.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn ned_undefined_at_pole() {
        let err = ned_transform(&Vector3::new(0.0, 0.0, 6.4e6)).unwrap_err();
        assert!(matches!(err, SimError::InvalidState(_)));
    }

    #[test]
    fn lvlh_rejects_radial_trajectory() {
        let pos = Vector3::new(7.0e6, 0.0, 0.0);
        let vel = Vector3::new(-1.0e3, 0.0, 0.0); // straight down
        assert!(lvlh_transform(&pos, &vel).is_err());
    }
}
