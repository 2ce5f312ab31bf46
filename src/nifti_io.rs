use crate::{
    affine::Affine,
    channels::move_axis,
    enums::{CoordSys, DType},
    error::{ArrayError, GeometryError},
    metadata::{Header, Metadata},
    reorient::reorient,
};

use nalgebra::DMatrix;
use ndarray::{ArrayD, Axis};
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions, writer::WriterOptions};
use std::path::Path;
use thiserror::Error;

/// sform code of affines written by this crate: aligned to another scan.
const SFORM_ALIGNED: i16 = 2;
/// `xyzt_units` for millimeters.
const UNITS_MM: u8 = 2;

#[derive(Debug, Error)]
pub enum NiftiIoError {
    #[error("NIfTI error: {0}")]
    Nifti(#[from] nifti::NiftiError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Array(#[from] ArrayError),
}

/// Reader and writer of NIfTI-1 files (`.nii`, `.nii.gz`), in the `nib`
/// convention.
pub struct NiftiIO;

impl NiftiIO {
    pub const COORD_SYS: CoordSys = CoordSys::Nib;

    /// Read a NIfTI file
    ///
    /// # Arguments
    ///
    /// * `path` - The file to read
    /// * `desired_ornt` - Orientation to return the image in, `nib` convention
    /// * `header` - Include the main header fields in the metadata
    ///
    /// The affine comes from the sform, else the qform, else the voxel sizes.
    /// Values are returned as `f32` with the intensity scaling applied.
    pub fn read_img(
        path: impl AsRef<Path>,
        desired_ornt: Option<&str>,
        header: bool,
    ) -> Result<(ArrayD<f32>, Metadata), NiftiIoError> {
        let path = path.as_ref();
        let object = ReaderOptions::new().read_file(path)?;
        let nifti_header = object.header().clone();
        let affine = Affine::from_matrix(Self::header_affine(&nifti_header))?;

        let mut array = object.into_volume().into_ndarray::<f32>()?;
        // planar images get a slice axis to match the 3D affine
        if array.ndim() == 2 {
            array.insert_axis_inplace(Axis(2));
        }

        let header = header.then(|| Self::header_fields(&nifti_header));
        let metadata = Metadata::new(affine, None, Self::COORD_SYS, header)?;
        // the orientation of the file, kept through any reorientation
        let file_ornt = metadata.ornt().to_string();
        log::debug!("Read NIfTI {} in orientation {file_ornt}", path.display());

        match desired_ornt {
            Some(desired) => Ok(reorient(array, &metadata, desired)?),
            None => Ok((array, metadata)),
        }
    }

    /// Save `array` as a NIfTI file, compressed for a `.gz` suffix
    ///
    /// # Arguments
    ///
    /// * `path` - Output file
    /// * `array` - Image array
    /// * `metadata` - Matching metadata, in any convention
    /// * `use_original_ornt` - Save in the orientation the image had before
    ///   it was reoriented
    /// * `channels_axis` - Axis of the channels of vector images, written
    ///   as the last axis of the file
    /// * `dtype` - Data type stored in the file, `float32` when `None`
    pub fn save_img(
        path: impl AsRef<Path>,
        array: &ArrayD<f32>,
        metadata: &Metadata,
        use_original_ornt: bool,
        channels_axis: Option<isize>,
        dtype: Option<DType>,
    ) -> Result<(), NiftiIoError> {
        let path = path.as_ref();
        let metadata = metadata.converted(Self::COORD_SYS)?;
        let array = match channels_axis {
            Some(axis) => move_axis(array.clone(), axis, -1)?,
            None => array.clone(),
        };
        let (array, metadata) = match metadata.orig_ornt().map(str::to_string) {
            Some(orig_ornt) if use_original_ornt => reorient(array, &metadata, &orig_ornt)?,
            _ => (array, metadata),
        };

        // the writer needs C order, moved channels are only a permuted view
        let array = if array.is_standard_layout() {
            array
        } else {
            array.as_standard_layout().into_owned()
        };

        let header = Self::build_header(metadata.affine());
        let dtype = dtype.unwrap_or(DType::F32);
        log::info!(
            "Saving NIfTI {} in orientation {} as {dtype}",
            path.display(),
            metadata.ornt()
        );
        let writer = WriterOptions::new(path).reference_header(&header);
        match dtype {
            DType::U8 => writer.write_nifti(&array.mapv(|value| value as u8))?,
            DType::I8 => writer.write_nifti(&array.mapv(|value| value as i8))?,
            DType::U16 => writer.write_nifti(&array.mapv(|value| value as u16))?,
            DType::I16 => writer.write_nifti(&array.mapv(|value| value as i16))?,
            DType::I32 => writer.write_nifti(&array.mapv(|value| value as i32))?,
            DType::F32 => writer.write_nifti(&array)?,
        }
        Ok(())
    }

    /// Homogeneous 4x4 affine of a header.
    pub fn header_affine(header: &NiftiHeader) -> DMatrix<f64> {
        let pixdim = |i: usize| {
            let size = header.pixdim[i] as f64;
            if size > 0.0 { size } else { 1.0 }
        };
        let mut matrix = DMatrix::identity(4, 4);
        if header.sform_code > 0 {
            for (i, row) in [header.srow_x, header.srow_y, header.srow_z].iter().enumerate() {
                for (j, &value) in row.iter().enumerate() {
                    matrix[(i, j)] = value as f64;
                }
            }
        } else if header.qform_code > 0 {
            let (b, c, d) = (
                header.quatern_b as f64,
                header.quatern_c as f64,
                header.quatern_d as f64,
            );
            let a = (1.0 - (b * b + c * c + d * d).min(1.0)).sqrt();
            let qfac = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
            let rotation = DMatrix::from_row_slice(
                3,
                3,
                &[
                    a * a + b * b - c * c - d * d,
                    2.0 * (b * c - a * d),
                    2.0 * (b * d + a * c),
                    2.0 * (b * c + a * d),
                    a * a + c * c - b * b - d * d,
                    2.0 * (c * d - a * b),
                    2.0 * (b * d - a * c),
                    2.0 * (c * d + a * b),
                    a * a + d * d - b * b - c * c,
                ],
            );
            let scale = [pixdim(1), pixdim(2), pixdim(3) * qfac];
            for i in 0..3 {
                for j in 0..3 {
                    matrix[(i, j)] = rotation[(i, j)] * scale[j];
                }
            }
            matrix[(0, 3)] = header.quatern_x as f64;
            matrix[(1, 3)] = header.quatern_y as f64;
            matrix[(2, 3)] = header.quatern_z as f64;
        } else {
            for i in 0..3 {
                matrix[(i, i)] = pixdim(i + 1);
            }
        }
        matrix
    }

    /// Header with the sform and voxel sizes of `affine`; planar affines are
    /// embedded in 3D.
    fn build_header(affine: &Affine) -> NiftiHeader {
        let d = affine.dim();
        let matrix = affine.matrix();
        let row = |i: usize| -> [f32; 4] {
            let mut row = [0.0; 4];
            if i < d {
                for j in 0..d {
                    row[j] = matrix[(i, j)] as f32;
                }
                row[3] = matrix[(i, d)] as f32;
            } else {
                row[i] = 1.0;
            }
            row
        };

        let mut header = NiftiHeader::default();
        header.sform_code = SFORM_ALIGNED;
        header.qform_code = 0;
        header.srow_x = row(0);
        header.srow_y = row(1);
        header.srow_z = row(2);
        header.pixdim[0] = 1.0;
        for (i, &spacing) in affine.spacing().iter().enumerate() {
            header.pixdim[i + 1] = spacing as f32;
        }
        if d == 2 {
            header.pixdim[3] = 1.0;
        }
        header.xyzt_units = UNITS_MM;
        header
    }

    /// The main scalar and vector fields of a header, as text.
    fn header_fields(header: &NiftiHeader) -> Header {
        let descrip = String::from_utf8_lossy(&header.descrip)
            .trim_end_matches('\0')
            .to_string();
        [
            ("dim", format!("{:?}", header.dim)),
            ("datatype", header.datatype.to_string()),
            ("bitpix", header.bitpix.to_string()),
            ("pixdim", format!("{:?}", header.pixdim)),
            ("scl_slope", header.scl_slope.to_string()),
            ("scl_inter", header.scl_inter.to_string()),
            ("cal_min", header.cal_min.to_string()),
            ("cal_max", header.cal_max.to_string()),
            ("xyzt_units", header.xyzt_units.to_string()),
            ("intent_code", header.intent_code.to_string()),
            ("qform_code", header.qform_code.to_string()),
            ("sform_code", header.sform_code.to_string()),
            ("srow_x", format!("{:?}", header.srow_x)),
            ("srow_y", format!("{:?}", header.srow_y)),
            ("srow_z", format!("{:?}", header.srow_z)),
            ("descrip", descrip),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
    }
}
