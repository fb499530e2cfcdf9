//! Euler angle conversions in the RELION ZYZ convention.
//!
//! Angles are (rot, tilt, psi) in radians. Matrices rotate from the
//! reference frame into the particle frame, as in RELION's
//! `Euler_angles2matrix`.

use nalgebra::Matrix3;

const EPSILON: f64 = f32::EPSILON as f64;

/// Rotation matrix for Euler angles in radians
pub fn euler2rot(rot: f64, tilt: f64, psi: f64) -> Matrix3<f64> {
    let (sa, ca) = rot.sin_cos();
    let (sb, cb) = tilt.sin_cos();
    let (sg, cg) = psi.sin_cos();

    let cc = cb * ca;
    let cs = cb * sa;
    let sc = sb * ca;
    let ss = sb * sa;

    Matrix3::new(
        cg * cc - sg * sa,
        cg * cs + sg * ca,
        -cg * sb,
        -sg * cc - cg * sa,
        -sg * cs + cg * ca,
        sg * sb,
        sc,
        ss,
        cb,
    )
}

/// Euler angles in radians for a rotation matrix.
///
/// Near the poles (tilt of 0 or 180 degrees) rot is fixed to 0 and the whole
/// in-plane rotation is assigned to psi.
pub fn rot2euler(r: &Matrix3<f64>) -> [f64; 3] {
    let abs_sb = (r[(0, 2)] * r[(0, 2)] + r[(1, 2)] * r[(1, 2)]).sqrt();

    if abs_sb > 16.0 * EPSILON {
        let gamma = r[(1, 2)].atan2(-r[(0, 2)]);
        let alpha = r[(2, 1)].atan2(r[(2, 0)]);
        let sign_sb = if gamma.sin().abs() < EPSILON {
            (-r[(0, 2)] / gamma.cos()).signum()
        } else if gamma.sin() > 0.0 {
            r[(1, 2)].signum()
        } else {
            -r[(1, 2)].signum()
        };
        let beta = (sign_sb * abs_sb).atan2(r[(2, 2)]);
        [alpha, beta, gamma]
    } else if r[(2, 2)] > 0.0 {
        [0.0, 0.0, (-r[(1, 0)]).atan2(r[(0, 0)])]
    } else {
        [0.0, std::f64::consts::PI, r[(1, 0)].atan2(-r[(0, 0)])]
    }
}

/// Batched [`euler2rot`] over many records
pub fn e2r_vec(angles: &[[f64; 3]]) -> Vec<Matrix3<f64>> {
    angles
        .iter()
        .map(|[rot, tilt, psi]| euler2rot(*rot, *tilt, *psi))
        .collect()
}

/// Batched [`rot2euler`] over many records
pub fn rot2euler_vec(rotations: &[Matrix3<f64>]) -> Vec<[f64; 3]> {
    rotations.iter().map(rot2euler).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_identity() {
        let r = euler2rot(0.0, 0.0, 0.0);
        assert_relative_eq!(r, Matrix3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn test_rotation_is_orthonormal() {
        let r = euler2rot(0.3, 1.1, -2.0);
        assert_relative_eq!(r * r.transpose(), Matrix3::identity(), epsilon = 1e-12);
        assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_round_trip_general_angles() {
        let angles = [0.4, 1.2, -0.7];
        let back = rot2euler(&euler2rot(angles[0], angles[1], angles[2]));
        for (a, b) in angles.iter().zip(back.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_pole_assigns_rotation_to_psi() {
        let r = euler2rot(0.5, 0.0, 0.25);
        let back = rot2euler(&r);
        assert_relative_eq!(back[0], 0.0);
        assert_relative_eq!(back[1], 0.0);
        assert_relative_eq!(back[2], 0.75, epsilon = 1e-9);
        assert_relative_eq!(euler2rot(back[0], back[1], back[2]), r, epsilon = 1e-9);
    }

    #[test]
    fn test_flipped_pole() {
        let r = euler2rot(0.0, std::f64::consts::PI, 0.3);
        let back = rot2euler(&r);
        assert_relative_eq!(back[1], std::f64::consts::PI);
        assert_relative_eq!(euler2rot(back[0], back[1], back[2]), r, epsilon = 1e-9);
    }

    #[test]
    fn test_batched_conversions() {
        let angles = vec![[0.1, 0.2, 0.3], [1.0, 2.0, 3.0]];
        let rots = e2r_vec(&angles);
        let back = rot2euler_vec(&rots);
        assert_eq!(back.len(), 2);
        assert_relative_eq!(e2r_vec(&back)[1], rots[1], epsilon = 1e-9);
    }
}
