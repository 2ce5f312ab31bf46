//! Reorientation of an image array together with its affine.
//!
//! Only axis permutations and flips are involved, so no voxel value is
//! interpolated: each voxel keeps its physical position.

use nalgebra::{DMatrix, DVector};
use ndarray::{ArrayD, Axis};

use crate::affine::Affine;
use crate::error::GeometryError;
use crate::metadata::Metadata;
use crate::orientation::parse_axis_codes;

/// Mapping from a start orientation to an end orientation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrientationTransform {
    /// `source_axes[j]` is the start axis that becomes end axis `j`
    pub source_axes: Vec<usize>,
    /// whether end axis `j` runs opposite to its source axis
    pub flips: Vec<bool>,
}

impl OrientationTransform {
    /// # Errors
    ///
    /// Fails if either code is invalid or the two codes have different lengths.
    pub fn between(start: &str, end: &str) -> Result<Self, GeometryError> {
        let start_axes = parse_axis_codes(start)?;
        let end_axes = parse_axis_codes(end)?;
        if start_axes.len() != end_axes.len() {
            return Err(GeometryError::DimensionMismatch {
                context: "orientation code length",
                expected: start_axes.len(),
                found: end_axes.len(),
            });
        }

        let mut source_axes = Vec::with_capacity(end_axes.len());
        let mut flips = Vec::with_capacity(end_axes.len());
        for target in &end_axes {
            let source = start_axes
                .iter()
                .position(|ax| ax.axis() == target.axis())
                .ok_or_else(|| GeometryError::InvalidOrientationCode {
                    code: end.to_string(),
                    reason: "anatomical axis missing from the start orientation",
                })?;
            source_axes.push(source);
            flips.push(start_axes[source] != *target);
        }
        Ok(Self { source_axes, flips })
    }

    pub fn is_identity(&self) -> bool {
        self.flips.iter().all(|flip| !flip)
            && self.source_axes.iter().enumerate().all(|(j, &i)| i == j)
    }

    /// Affine of the transformed array, `shape` being the shape of the
    /// source array.
    pub fn apply_to_affine(&self, affine: &Affine, shape: &[usize]) -> Result<Affine, GeometryError> {
        let d = affine.dim();
        if self.source_axes.len() != d || shape.len() < d {
            return Err(GeometryError::DimensionMismatch {
                context: "reoriented axes",
                expected: d,
                found: self.source_axes.len().min(shape.len()),
            });
        }
        let old_direction = affine.direction();
        let old_spacing = affine.spacing();

        let mut direction = DMatrix::zeros(d, d);
        let mut spacing = DVector::zeros(d);
        let mut corner = DVector::zeros(d);
        for (j, (&i, &flip)) in self.source_axes.iter().zip(&self.flips).enumerate() {
            let sign = if flip { -1.0 } else { 1.0 };
            direction.set_column(j, &(old_direction.column(i) * sign));
            spacing[j] = old_spacing[i];
            if flip {
                corner[i] = shape[i].saturating_sub(1) as f64;
            }
        }
        let origin = affine.index_to_coord(&corner)?;
        Affine::new(direction, spacing, origin)
    }

    /// Permute and flip the leading axes of `array`; trailing axes (such as
    /// channels) stay in place.
    pub fn apply_to_array<A: Clone>(&self, array: ArrayD<A>) -> ArrayD<A> {
        let ndim = array.ndim();
        let mut axes = self.source_axes.clone();
        axes.extend(self.source_axes.len()..ndim);
        let mut array = array.permuted_axes(axes);
        for (j, &flip) in self.flips.iter().enumerate() {
            if flip {
                array.invert_axis(Axis(j));
            }
        }
        array.as_standard_layout().into_owned()
    }
}

/// Reorient `array` and its metadata to the `desired` orientation, given in
/// the metadata's coordinate system.
///
/// The returned metadata remembers the orientation the image had before, so
/// that it can be saved back in it.
pub fn reorient<A: Clone>(
    array: ArrayD<A>,
    metadata: &Metadata,
    desired: &str,
) -> Result<(ArrayD<A>, Metadata), GeometryError> {
    let current = metadata.ornt();
    let d = metadata.affine().dim();
    if array.ndim() < d {
        return Err(GeometryError::DimensionMismatch {
            context: "array dimensions for reorientation",
            expected: d,
            found: array.ndim(),
        });
    }
    let transform = OrientationTransform::between(current, desired)?;
    if transform.is_identity() {
        return Ok((array, metadata.clone()));
    }
    log::debug!("Reorienting image from {current} to {desired}");

    let affine = transform.apply_to_affine(metadata.affine(), array.shape())?;
    let orig_ornt = metadata.orig_ornt().unwrap_or(current).to_string();
    let reoriented = Metadata::new(
        affine,
        Some(orig_ornt),
        metadata.coord_sys(),
        metadata.header().cloned(),
    )?;
    Ok((transform.apply_to_array(array), reoriented))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::CoordSys;
    use crate::orientation::all_orientations;
    use approx::assert_abs_diff_eq;
    use ndarray::{Dimension, IxDyn};

    fn test_image(coord_sys: CoordSys) -> (ArrayD<f32>, Metadata) {
        let shape = [4, 3, 5];
        let array = ArrayD::from_shape_fn(IxDyn(&shape), |idx| {
            (idx[0] * 100 + idx[1] * 10 + idx[2]) as f32
        });
        let (s, c) = 0.2f64.sin_cos();
        let direction = DMatrix::from_row_slice(3, 3, &[c, -s, 0.0, s, c, 0.0, 0.0, 0.0, -1.0]);
        let affine = Affine::new(
            direction,
            DVector::from_vec(vec![0.5, 1.5, 3.0]),
            DVector::from_vec(vec![10.0, -20.0, 5.0]),
        )
        .unwrap();
        (array, Metadata::new(affine, None, coord_sys, None).unwrap())
    }

    fn index(idx: &[usize]) -> DVector<f64> {
        DVector::from_iterator(idx.len(), idx.iter().map(|&i| i as f64))
    }

    #[test]
    fn reoriented_image_has_requested_orientation() {
        for coord_sys in [CoordSys::Itk, CoordSys::Nib] {
            let (array, metadata) = test_image(coord_sys);
            for code in all_orientations() {
                let (_, reoriented) = reorient(array.clone(), &metadata, &code).unwrap();
                assert_eq!(reoriented.ornt(), code);
                assert_eq!(reoriented.orig_ornt(), Some(metadata.ornt()));
            }
        }
    }

    #[test]
    fn voxels_keep_their_physical_position() {
        let (array, metadata) = test_image(CoordSys::Itk);
        for code in all_orientations() {
            let (new_array, new_metadata) = reorient(array.clone(), &metadata, &code).unwrap();
            for (new_idx, &value) in new_array.indexed_iter() {
                let value = value as usize;
                let old_idx = [value / 100, (value / 10) % 10, value % 10];
                let old_coord = metadata.affine().index_to_coord(&index(&old_idx)).unwrap();
                let new_coord = new_metadata
                    .affine()
                    .index_to_coord(&index(new_idx.slice()))
                    .unwrap();
                assert_abs_diff_eq!(old_coord, new_coord, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn reorienting_back_restores_the_image() {
        let (array, metadata) = test_image(CoordSys::Nib);
        for code in all_orientations() {
            let (there, there_metadata) = reorient(array.clone(), &metadata, &code).unwrap();
            let back_code = there_metadata.orig_ornt().unwrap().to_string();
            let (back, back_metadata) = reorient(there, &there_metadata, &back_code).unwrap();
            assert_eq!(back, array);
            assert_abs_diff_eq!(
                back_metadata.affine().matrix().clone(),
                metadata.affine().matrix().clone(),
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn trailing_channels_are_kept() {
        let (array, metadata) = test_image(CoordSys::Itk);
        let rgb = ndarray::stack(Axis(3), &[array.view(), array.view(), array.view()]).unwrap();
        let (reoriented, _) = reorient(rgb, &metadata, "SPL").unwrap();
        assert_eq!(reoriented.shape(), &[5, 3, 4, 3]);
    }

    #[test]
    fn same_orientation_is_a_copy() {
        let (array, metadata) = test_image(CoordSys::Itk);
        let current = metadata.ornt().to_string();
        let (same, same_metadata) = reorient(array.clone(), &metadata, &current).unwrap();
        assert_eq!(same, array);
        assert_eq!(same_metadata.affine(), metadata.affine());
    }

    #[test]
    fn transform_between_codes() {
        let transform = OrientationTransform::between("RAI", "SLA").unwrap();
        assert_eq!(transform.source_axes, vec![2, 0, 1]);
        assert_eq!(transform.flips, vec![true, true, false]);
        assert!(OrientationTransform::between("RAI", "RA").is_err());
    }
}
