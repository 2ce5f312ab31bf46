use std::path::Path;

use ndarray::ArrayD;

use crate::error::ImageError;
use crate::metadata::Metadata;
use crate::read_save::{ReadOptions, ReadSaveError, SaveOptions, read_img, save_img};
use crate::slicing::{SliceArg, explicit_indices, slice_affine, slice_array};

/// An image array together with its metadata.
///
/// Operations on the array update the affine so that every voxel keeps its
/// physical position.
#[derive(Debug, Clone)]
pub struct MedImage {
    pub array: ArrayD<f32>,
    pub metadata: Metadata,
}

impl MedImage {
    pub fn new(array: ArrayD<f32>, metadata: Metadata) -> Self {
        Self { array, metadata }
    }

    pub fn read(path: impl AsRef<Path>, options: &ReadOptions) -> Result<Self, ReadSaveError> {
        let (array, metadata) = read_img(path, options)?;
        Ok(Self { array, metadata })
    }

    pub fn save(&self, path: impl AsRef<Path>, options: &SaveOptions) -> Result<(), ReadSaveError> {
        save_img(path, &self.array, &self.metadata, options)
    }

    /// Crop and subsample the image.
    ///
    /// ```
    /// # use medio::{affine::Affine, enums::CoordSys, metadata::Metadata};
    /// # use medio::{med_image::MedImage, slicing::SliceArg};
    /// # use ndarray::{ArrayD, IxDyn};
    /// let metadata = Metadata::new(Affine::identity(3)?, None, CoordSys::Itk, None)?;
    /// let image = MedImage::new(ArrayD::zeros(IxDyn(&[10, 10, 10])), metadata);
    /// let cropped = image.slice(&[
    ///     SliceArg::Full,
    ///     SliceArg::range(Some(4), Some(-4)),
    ///     SliceArg::step(3),
    /// ])?;
    /// assert_eq!(cropped.array.shape(), &[10, 2, 4]);
    /// assert_eq!(cropped.metadata.spacing().as_slice(), &[1.0, 1.0, 3.0]);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn slice(&self, args: &[SliceArg]) -> Result<Self, ImageError> {
        let indices = explicit_indices(args, self.array.shape())?;
        let array = slice_array(&self.array, &indices);
        let affine = slice_affine(self.metadata.affine(), &indices)?;
        // settles the original orientation of a never reoriented image
        self.metadata.ornt();
        let metadata = Metadata::new(
            affine,
            self.metadata.orig_ornt().map(str::to_string),
            self.metadata.coord_sys(),
            self.metadata.header().cloned(),
        )?;
        Ok(Self { array, metadata })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affine::Affine;
    use crate::enums::CoordSys;
    use approx::assert_abs_diff_eq;
    use nalgebra::{DMatrix, DVector};
    use ndarray::{Dimension, IxDyn};

    fn image() -> MedImage {
        let array = ArrayD::from_shape_fn(IxDyn(&[8, 6, 4]), |idx| (idx[0] * 100 + idx[1] * 10 + idx[2]) as f32);
        let affine = Affine::new(
            DMatrix::from_row_slice(3, 3, &[0.0, 1.0, 0.0, -1.0, 0.0, 0.0, 0.0, 0.0, 1.0]),
            DVector::from_vec(vec![0.5, 2.0, 3.0]),
            DVector::from_vec(vec![1.0, 2.0, 3.0]),
        )
        .unwrap();
        MedImage::new(array, Metadata::new(affine, None, CoordSys::Itk, None).unwrap())
    }

    fn coord(image: &MedImage, idx: &[usize]) -> DVector<f64> {
        let index = DVector::from_iterator(idx.len(), idx.iter().map(|&i| i as f64));
        image.metadata.affine().index_to_coord(&index).unwrap()
    }

    #[test]
    fn stride_moves_origin_and_scales_spacing() {
        let metadata = Metadata::new(Affine::identity(3).unwrap(), None, CoordSys::Itk, None).unwrap();
        let image = MedImage::new(ArrayD::zeros(IxDyn(&[10, 10, 10])), metadata);
        let key = [SliceArg::Range {
            start: Some(4),
            stop: None,
            step: 2,
        }];
        let sliced = image.slice(&key).unwrap();
        assert_eq!(sliced.array.shape(), &[3, 10, 10]);
        assert_abs_diff_eq!(
            sliced.metadata.affine().origin(),
            DVector::from_vec(vec![4.0, 0.0, 0.0])
        );
        assert_abs_diff_eq!(
            sliced.metadata.spacing().clone(),
            DVector::from_vec(vec![2.0, 1.0, 1.0])
        );
    }

    #[test]
    fn sliced_voxels_keep_their_position() {
        let image = image();
        let key = [
            SliceArg::Range {
                start: Some(-2),
                stop: None,
                step: -3,
            },
            SliceArg::Ellipsis,
            SliceArg::Index(1),
        ];
        let sliced = image.slice(&key).unwrap();
        assert_eq!(sliced.array.shape(), &[3, 6, 1]);
        for (idx, &value) in sliced.array.indexed_iter() {
            let value = value as usize;
            let source = [value / 100, (value / 10) % 10, value % 10];
            assert_abs_diff_eq!(
                coord(&sliced, idx.slice()),
                coord(&image, &source),
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn orientation_history_is_kept() {
        let image = image();
        let original = image.metadata.ornt().to_string();
        let flipped = image.slice(&[SliceArg::step(-1)]).unwrap();
        assert_eq!(flipped.metadata.orig_ornt(), Some(original.as_str()));
        assert_ne!(flipped.metadata.ornt(), original);
    }

    #[test]
    fn flipped_slice_remembers_the_unread_orientation() {
        // orientation never queried before slicing
        let image = image();
        let flipped = image.slice(&[SliceArg::Full, SliceArg::step(-1)]).unwrap();
        assert_eq!(flipped.metadata.orig_ornt(), Some(image.metadata.get_orientation().as_str()));
        assert_ne!(flipped.metadata.ornt(), image.metadata.get_orientation());
    }
}
