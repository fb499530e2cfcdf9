//! Rigid-body transforms of particle orientations and origins.
//!
//! Every record's orientation is composed with a common rotation, and an
//! optional translation is expressed in each particle's frame and added to
//! its origin.

use crate::constants::relion;
use crate::error::{Result, StarError};
use crate::frame::{f64_dense, f64_values, has_column};
use crate::geom::{e2r_vec, rot2euler};
use crate::models::{TransformOptions, Translation};
use nalgebra::{DMatrix, Matrix3, Vector3};
use polars::prelude::*;
use std::borrow::Cow;
use tracing::{debug, warn};

/// Pixel size in Angstrom from the first record.
///
/// `10000 * detector pixel size (um) / magnification`. Returns `None` when
/// either field is missing or null.
pub fn calculate_apix(df: &DataFrame) -> Option<f64> {
    calculate_apix_at(df, 0)
}

/// Pixel size in Angstrom for a single record
pub fn calculate_apix_at(df: &DataFrame, row: usize) -> Option<f64> {
    let value_at = |name: &str| -> Option<f64> {
        f64_values(df, name).ok()?.get(row).copied().flatten()
    };
    let detector_pixel_size = value_at(relion::DETECTORPIXELSIZE)?;
    let magnification = value_at(relion::MAGNIFICATION)?;
    Some(10000.0 * detector_pixel_size / magnification)
}

/// Split a 3x3 or 3x4 matrix into rotation and optional translation
fn split_matrix(r: &DMatrix<f64>) -> Result<(Matrix3<f64>, Option<Translation>)> {
    if r.nrows() != 3 || !(r.ncols() == 3 || r.ncols() == 4) {
        return Err(StarError::validation(format!(
            "rotation must be 3x3 or 3x4, got {}x{}",
            r.nrows(),
            r.ncols()
        )));
    }
    let rotation = Matrix3::from_fn(|i, j| r[(i, j)]);
    let translation = (r.ncols() == 4)
        .then(|| Translation::Vector([r[(0, 3)], r[(1, 3)], r[(2, 3)]]));
    Ok((rotation, translation))
}

/// Orientation matrices from the angle columns (degrees)
fn record_rotations(df: &DataFrame) -> Result<Vec<Matrix3<f64>>> {
    let rot = f64_dense(df, relion::ANGLEROT)?;
    let tilt = f64_dense(df, relion::ANGLETILT)?;
    let psi = f64_dense(df, relion::ANGLEPSI)?;
    let angles: Vec<[f64; 3]> = rot
        .into_iter()
        .zip(tilt)
        .zip(psi)
        .map(|((rot, tilt), psi)| [rot.to_radians(), tilt.to_radians(), psi.to_radians()])
        .collect();
    Ok(e2r_vec(&angles))
}

/// Pixel size for a defocus adjustment, checking the defocus columns exist
fn defocus_pixel_size(df: &DataFrame) -> Result<f64> {
    if let Some(missing) = relion::DEFOCUS.iter().find(|name| !has_column(df, name)) {
        return Err(StarError::not_found(*missing));
    }
    calculate_apix(df).ok_or_else(|| {
        StarError::not_found(format!(
            "{} and {}",
            relion::DETECTORPIXELSIZE,
            relion::MAGNIFICATION
        ))
    })
}

/// Transform a table in place.
///
/// `r` is 3x3, or 3x4 with the translation in its last column (used only when
/// `options.translation` is `None`). `rots` may carry precomputed orientation
/// matrices, one per record, to skip the Euler conversion when chaining
/// transforms. On error the table is left as it was.
///
/// The defocus angle is recomputed as `atan2(V, V)` after a defocus
/// adjustment. This always yields 45 or -135 degrees.
// TODO: replace the defocus angle formula once the intended convention is confirmed.
pub fn transform_star_in_place(
    df: &mut DataFrame,
    r: &DMatrix<f64>,
    options: &TransformOptions,
    rots: Option<&[Matrix3<f64>]>,
) -> Result<()> {
    let (mut rotation, matrix_translation) = split_matrix(r)?;
    let translation = options
        .translation
        .or(matrix_translation)
        .filter(|t| t.norm() > 0.0);

    let apix = match translation {
        Some(_) if options.adjust_defocus => Some(defocus_pixel_size(df)?),
        _ => None,
    };

    let rots: Cow<'_, [Matrix3<f64>]> = match rots {
        Some(rots) if rots.len() != df.height() => {
            return Err(StarError::validation(format!(
                "expected {} precomputed rotations, got {}",
                df.height(),
                rots.len()
            )));
        }
        Some(rots) => Cow::Borrowed(rots),
        None => Cow::Owned(record_rotations(df)?),
    };

    if options.invert {
        rotation = rotation.transpose();
    }

    let newrots: Vec<Matrix3<f64>> = rots.iter().map(|q| q * rotation).collect();

    // Columns are built first and written together at the end
    let mut updates: Vec<Column> = Vec::new();

    if options.rotate {
        let mut columns = [Vec::new(), Vec::new(), Vec::new()];
        for angles in newrots.iter().map(rot2euler) {
            for (column, angle) in columns.iter_mut().zip(angles) {
                column.push(angle.to_degrees());
            }
        }
        for (name, values) in relion::ANGLES.iter().zip(columns) {
            updates.push(Column::new((*name).into(), values));
        }
    }

    if let Some(translation) = translation {
        let shifts: Vec<Vector3<f64>> = match translation {
            Translation::Scalar(distance) if options.invert => rots
                .iter()
                .map(|q| -(q.column(2) * distance))
                .collect(),
            Translation::Scalar(distance) => {
                newrots.iter().map(|q| q.column(2) * distance).collect()
            }
            Translation::Vector(v) if options.invert => {
                let v = Vector3::from(v);
                rots.iter().map(|q| -(q * v)).collect()
            }
            Translation::Vector(v) => {
                let v = Vector3::from(v);
                newrots.iter().map(|q| q * v).collect()
            }
        };

        for (axis, name) in relion::ORIGINS3D.iter().enumerate() {
            if !has_column(df, name) {
                continue;
            }
            let shifted: Vec<f64> = f64_dense(df, name)?
                .into_iter()
                .zip(&shifts)
                .map(|(origin, shift)| origin + shift[axis])
                .collect();
            updates.push(Column::new((*name).into(), shifted));
        }

        if let Some(apix) = apix {
            updates.extend(adjust_defocus(df, &shifts, apix)?);
        }
    }

    for column in updates {
        df.with_column(column)?;
    }

    debug!(
        "Transformed {} records (invert: {}, rotate: {}, translated: {})",
        df.height(),
        options.invert,
        options.rotate,
        translation.is_some()
    );
    Ok(())
}

/// Shifted defocus columns and the recomputed defocus angle
fn adjust_defocus(df: &DataFrame, shifts: &[Vector3<f64>], apix: f64) -> Result<Vec<Column>> {
    let mut columns = Vec::new();
    let mut defocus_v = Vec::new();
    for name in relion::DEFOCUS {
        let adjusted: Vec<f64> = f64_dense(df, name)?
            .into_iter()
            .zip(shifts)
            .map(|(defocus, shift)| defocus + shift.z * apix)
            .collect();
        if *name == relion::DEFOCUSV {
            defocus_v = adjusted.clone();
        }
        columns.push(Column::new((*name).into(), adjusted));
    }

    let angles: Vec<f64> = defocus_v
        .iter()
        .map(|v| v.atan2(*v).to_degrees())
        .collect();
    warn!("Defocus angles recomputed as atan2(V, V); angles are degenerate");
    columns.push(Column::new(relion::DEFOCUSANGLE.into(), angles));
    Ok(columns)
}

/// Transformed copy of `df`
pub fn transform_star(
    df: &DataFrame,
    r: &DMatrix<f64>,
    options: &TransformOptions,
    rots: Option<&[Matrix3<f64>]>,
) -> Result<DataFrame> {
    let mut out = df.clone();
    transform_star_in_place(&mut out, r, options, rots)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::euler2rot;
    use approx::assert_relative_eq;

    fn particles() -> DataFrame {
        DataFrame::new(vec![
            Column::new(relion::ANGLEROT.into(), vec![0.0f64, 30.0, -75.0]),
            Column::new(relion::ANGLETILT.into(), vec![0.0f64, 60.0, 120.0]),
            Column::new(relion::ANGLEPSI.into(), vec![0.0f64, 10.0, 170.0]),
            Column::new(relion::ORIGINX.into(), vec![0.0f64, 1.5, -2.0]),
            Column::new(relion::ORIGINY.into(), vec![0.0f64, -0.5, 3.0]),
        ])
        .unwrap()
    }

    fn as_dmatrix(m: &Matrix3<f64>) -> DMatrix<f64> {
        DMatrix::from_fn(3, 3, |i, j| m[(i, j)])
    }

    fn orientation(df: &DataFrame, row: usize) -> Matrix3<f64> {
        record_rotations(df).unwrap()[row]
    }

    #[test]
    fn test_identity_keeps_orientation() {
        let df = particles();
        let out = transform_star(
            &df,
            &DMatrix::identity(3, 3),
            &TransformOptions::default(),
            None,
        )
        .unwrap();
        for row in 0..df.height() {
            assert_relative_eq!(orientation(&out, row), orientation(&df, row), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_composition_matches_product() {
        let df = particles();
        let r1 = euler2rot(0.3, 0.9, -0.4);
        let r2 = euler2rot(-1.1, 0.2, 2.5);
        let options = TransformOptions::default();

        let twice = transform_star(&df, &as_dmatrix(&r1), &options, None).unwrap();
        let twice = transform_star(&twice, &as_dmatrix(&r2), &options, None).unwrap();
        let once = transform_star(&df, &as_dmatrix(&(r1 * r2)), &options, None).unwrap();

        for row in 0..df.height() {
            assert_relative_eq!(orientation(&twice, row), orientation(&once, row), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_invert_undoes_rotation() {
        let df = particles();
        let r = as_dmatrix(&euler2rot(0.7, 1.3, 0.1));
        let forward = transform_star(&df, &r, &TransformOptions::default(), None).unwrap();
        let back =
            transform_star(&forward, &r, &TransformOptions::default().inverted(), None).unwrap();
        for row in 0..df.height() {
            assert_relative_eq!(orientation(&back, row), orientation(&df, row), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_without_rotation_keeps_angles() {
        let df = particles();
        let r = as_dmatrix(&euler2rot(0.7, 1.3, 0.1));
        let out = transform_star(&df, &r, &TransformOptions::default().without_rotation(), None)
            .unwrap();
        assert!(out.equals_missing(&df));
    }

    #[test]
    fn test_scalar_translation_follows_z_axis() {
        let df = particles();
        let options = TransformOptions::default().with_translation(Translation::Scalar(2.0));
        let out = transform_star(&df, &DMatrix::identity(3, 3), &options, None).unwrap();

        let expected = orientation(&df, 1).column(2) * 2.0;
        let x = f64_dense(&out, relion::ORIGINX).unwrap();
        let y = f64_dense(&out, relion::ORIGINY).unwrap();
        assert_relative_eq!(x[1], 1.5 + expected.x, epsilon = 1e-9);
        assert_relative_eq!(y[1], -0.5 + expected.y, epsilon = 1e-9);
        // Record 0 has the identity orientation, so the shift is purely along Z
        assert_relative_eq!(x[0], 0.0, epsilon = 1e-12);
        assert!(!has_column(&out, relion::ORIGINZ));
    }

    #[test]
    fn test_vector_translation_from_3x4_matrix() {
        let df = particles();
        let mut r = DMatrix::identity(3, 4);
        r[(0, 3)] = 1.0;
        r[(1, 3)] = 2.0;
        let out = transform_star(&df, &r, &TransformOptions::default(), None).unwrap();

        let expected = orientation(&df, 2) * Vector3::new(1.0, 2.0, 0.0);
        let x = f64_dense(&out, relion::ORIGINX).unwrap();
        assert_relative_eq!(x[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(x[2], -2.0 + expected.x, epsilon = 1e-9);
    }

    #[test]
    fn test_explicit_translation_overrides_matrix_column() {
        let df = particles();
        let mut r = DMatrix::identity(3, 4);
        r[(0, 3)] = 5.0;
        let options =
            TransformOptions::default().with_translation(Translation::Vector([0.0, 1.0, 0.0]));
        let out = transform_star(&df, &r, &options, None).unwrap();
        let x = f64_dense(&out, relion::ORIGINX).unwrap();
        let y = f64_dense(&out, relion::ORIGINY).unwrap();
        assert_relative_eq!(x[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(y[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_inverted_translation_uses_old_orientation() {
        let df = particles();
        let r = as_dmatrix(&euler2rot(0.7, 1.3, 0.1));
        let options = TransformOptions::default()
            .inverted()
            .with_translation(Translation::Vector([1.0, 0.0, 0.0]));
        let out = transform_star(&df, &r, &options, None).unwrap();

        let expected = -(orientation(&df, 1) * Vector3::new(1.0, 0.0, 0.0));
        let x = f64_dense(&out, relion::ORIGINX).unwrap();
        assert_relative_eq!(x[1], 1.5 + expected.x, epsilon = 1e-9);
    }

    #[test]
    fn test_precomputed_rotations() {
        let df = particles();
        let rots = vec![Matrix3::identity(); 3];
        let out = transform_star(
            &df,
            &DMatrix::identity(3, 3),
            &TransformOptions::default(),
            Some(rots.as_slice()),
        )
        .unwrap();
        let tilt = f64_dense(&out, relion::ANGLETILT).unwrap();
        assert!(tilt.iter().all(|t| t.abs() < 1e-12));

        let short = vec![Matrix3::identity(); 2];
        let result = transform_star(
            &df,
            &DMatrix::identity(3, 3),
            &TransformOptions::default(),
            Some(short.as_slice()),
        );
        assert!(matches!(result, Err(StarError::Validation { .. })));
    }

    #[test]
    fn test_invalid_matrix_shape() {
        let result = transform_star(
            &particles(),
            &DMatrix::identity(2, 2),
            &TransformOptions::default(),
            None,
        );
        assert!(matches!(result, Err(StarError::Validation { .. })));
    }

    #[test]
    fn test_missing_angles_is_not_found() {
        let df = DataFrame::new(vec![Column::new(relion::ORIGINX.into(), vec![0.0f64])]).unwrap();
        let result = transform_star(
            &df,
            &DMatrix::identity(3, 3),
            &TransformOptions::default(),
            None,
        );
        assert!(matches!(result, Err(StarError::NotFound { .. })));
    }

    fn ctf_particles() -> DataFrame {
        let mut df = particles();
        df.with_column(Column::new(relion::DEFOCUSU.into(), vec![10000.0f64; 3]))
            .unwrap();
        df.with_column(Column::new(relion::DEFOCUSV.into(), vec![12000.0f64; 3]))
            .unwrap();
        df.with_column(Column::new(relion::DEFOCUSANGLE.into(), vec![12.0f64; 3]))
            .unwrap();
        df.with_column(Column::new(relion::DETECTORPIXELSIZE.into(), vec![5.0f64; 3]))
            .unwrap();
        df.with_column(Column::new(relion::MAGNIFICATION.into(), vec![50000.0f64; 3]))
            .unwrap();
        df
    }

    #[test]
    fn test_calculate_apix() {
        assert_relative_eq!(calculate_apix(&ctf_particles()).unwrap(), 1.0);
        assert_relative_eq!(calculate_apix_at(&ctf_particles(), 2).unwrap(), 1.0);
        assert_eq!(calculate_apix(&particles()), None);
        assert_eq!(calculate_apix_at(&ctf_particles(), 10), None);
    }

    #[test]
    fn test_adjust_defocus_pins_degenerate_angle() {
        let df = ctf_particles();
        let options = TransformOptions::default()
            .with_translation(Translation::Scalar(10.0))
            .with_defocus_adjustment();
        let out = transform_star(&df, &DMatrix::identity(3, 3), &options, None).unwrap();

        let defocus_u = f64_dense(&out, relion::DEFOCUSU).unwrap();
        let defocus_v = f64_dense(&out, relion::DEFOCUSV).unwrap();
        // Identity orientation: the whole shift is along Z, apix = 1
        assert_relative_eq!(defocus_u[0], 10010.0, epsilon = 1e-9);
        assert_relative_eq!(defocus_v[0], 12010.0, epsilon = 1e-9);

        let angles = f64_dense(&out, relion::DEFOCUSANGLE).unwrap();
        for angle in angles {
            assert_relative_eq!(angle, 45.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_adjust_defocus_requires_pixel_size() {
        let mut df = ctf_particles();
        df.drop_in_place(relion::MAGNIFICATION).unwrap();
        let options = TransformOptions::default()
            .with_translation(Translation::Scalar(1.0))
            .with_defocus_adjustment();
        let result = transform_star(&df, &DMatrix::identity(3, 3), &options, None);
        assert!(matches!(result, Err(StarError::NotFound { .. })));
    }

    #[test]
    fn test_failed_defocus_adjustment_leaves_table_unchanged() {
        let mut df = ctf_particles();
        df.drop_in_place(relion::DETECTORPIXELSIZE).unwrap();
        let original = df.clone();
        let options = TransformOptions::default()
            .with_translation(Translation::Scalar(2.0))
            .with_defocus_adjustment();
        let r = as_dmatrix(&euler2rot(0.7, 1.3, 0.1));

        let result = transform_star_in_place(&mut df, &r, &options, None);
        assert!(matches!(result, Err(StarError::NotFound { .. })));
        assert!(df.equals_missing(&original));

        let mut df = ctf_particles();
        df.drop_in_place(relion::DEFOCUSV).unwrap();
        let original = df.clone();
        match transform_star_in_place(&mut df, &r, &options, None) {
            Err(StarError::NotFound { field }) => assert_eq!(field, relion::DEFOCUSV),
            other => panic!("expected not found, got {:?}", other),
        }
        assert!(df.equals_missing(&original));
    }

    #[test]
    fn test_inverted_scalar_translation_uses_old_orientation() {
        let df = particles();
        let r = as_dmatrix(&euler2rot(0.7, 1.3, 0.1));
        let options = TransformOptions::default()
            .inverted()
            .with_translation(Translation::Scalar(2.0));
        let out = transform_star(&df, &r, &options, None).unwrap();

        let x = f64_dense(&out, relion::ORIGINX).unwrap();
        let y = f64_dense(&out, relion::ORIGINY).unwrap();
        for row in 0..df.height() {
            let expected = -(orientation(&df, row).column(2) * 2.0);
            let x0 = f64_dense(&df, relion::ORIGINX).unwrap()[row];
            let y0 = f64_dense(&df, relion::ORIGINY).unwrap()[row];
            assert_relative_eq!(x[row], x0 + expected.x, epsilon = 1e-9);
            assert_relative_eq!(y[row], y0 + expected.y, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_negative_defocus_angle() {
        let mut df = ctf_particles();
        df.with_column(Column::new(relion::DEFOCUSV.into(), vec![-12000.0f64; 3]))
            .unwrap();
        let options = TransformOptions::default()
            .with_translation(Translation::Scalar(1.0))
            .with_defocus_adjustment();
        let out = transform_star(&df, &DMatrix::identity(3, 3), &options, None).unwrap();

        for angle in f64_dense(&out, relion::DEFOCUSANGLE).unwrap() {
            assert_relative_eq!(angle, -135.0, epsilon = 1e-12);
        }
    }
}
