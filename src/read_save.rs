//! Backend independent reading and saving of images.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use ndarray::ArrayD;
use thiserror::Error;

use crate::convert::invert_axis_codes;
use crate::dicom_compat::DicomPixelType;
use crate::dicom_io::{DicomIO, DicomIoError, DicomReadOptions, DicomWriteOptions};
use crate::enums::{Backend, CoordSys, DType, SeriesSelector, SortBy};
use crate::error::{ArrayError, GeometryError};
use crate::files::is_nifti;
use crate::metadata::Metadata;
use crate::nifti_io::{NiftiIO, NiftiIoError};

#[derive(Debug, Error)]
pub enum ReadSaveError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Array(#[from] ArrayError),

    #[error(transparent)]
    Dicom(#[from] DicomIoError),

    #[error(transparent)]
    Nifti(#[from] NiftiIoError),
}

/// Options of [`read_img`].
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Orientation to return the image in, in the `coord_sys` convention
    pub desired_ornt: Option<String>,
    /// Reader, chosen by file suffix when `None`
    pub backend: Option<Backend>,
    /// Include the attributes read by the backend in the metadata
    pub header: bool,
    /// Where to put the channels of vector (e.g. RGB) images
    pub channels_axis: Option<isize>,
    /// Convention of `desired_ornt` and of the returned metadata; the
    /// backend's own when `None`
    pub coord_sys: Option<CoordSys>,
    /// Slice order of DICOM series
    pub sort_by: SortBy,
    /// Series to read from a DICOM directory holding more than one
    pub series: Option<SeriesSelector>,
    /// Default geometry for single DICOM files that lack it
    pub allow_default_affine: bool,
    /// Cast the values to this type
    pub dtype: Option<DType>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            desired_ornt: None,
            backend: None,
            header: false,
            channels_axis: Some(-1),
            coord_sys: Some(CoordSys::Itk),
            sort_by: SortBy::default(),
            series: None,
            allow_default_affine: false,
            dtype: None,
        }
    }
}

/// Options of [`save_img`] and [`save_dir`].
#[derive(Debug, Clone)]
pub struct SaveOptions {
    /// Save in the orientation the image had before it was reoriented
    pub use_original_ornt: bool,
    /// Writer, chosen by file suffix when `None`
    pub backend: Option<Backend>,
    /// Axis holding the channels of vector (e.g. RGB) images
    pub channels_axis: Option<isize>,
    /// Create the parent directory of the file
    pub mkdir: bool,
    /// Create the missing parents too, with `mkdir`, or of a DICOM series
    /// directory
    pub parents: bool,
    /// Accept an existing non-empty DICOM series directory
    pub exist_ok: bool,
    /// Flip the slice axis of a left-handed orientation when saving DICOM
    pub allow_dcm_reorient: bool,
    /// DICOM series file names, `{}` is replaced by the instance number
    pub pattern: String,
    /// DICOM attributes added or overridden, keyed as `gggg|eeee`
    pub metadata_dict: BTreeMap<String, String>,
    /// Data type stored in the file: any type for NIfTI, `uint8`, `int16`
    /// or `uint16` for DICOM. Chosen by the backend when `None`
    pub dtype: Option<DType>,
}

impl Default for SaveOptions {
    fn default() -> Self {
        let dicom = DicomWriteOptions::default();
        Self {
            use_original_ornt: dicom.use_original_ornt,
            backend: None,
            channels_axis: dicom.channels_axis,
            mkdir: false,
            parents: dicom.parents,
            exist_ok: dicom.exist_ok,
            allow_dcm_reorient: dicom.allow_dcm_reorient,
            pattern: dicom.pattern,
            metadata_dict: dicom.metadata_dict,
            dtype: None,
        }
    }
}

impl SaveOptions {
    fn dicom(&self) -> Result<DicomWriteOptions, ArrayError> {
        Ok(DicomWriteOptions {
            use_original_ornt: self.use_original_ornt,
            channels_axis: self.channels_axis,
            allow_dcm_reorient: self.allow_dcm_reorient,
            pattern: self.pattern.clone(),
            metadata_dict: self.metadata_dict.clone(),
            parents: self.parents,
            exist_ok: self.exist_ok,
            pixel_type: self.dtype.map(DicomPixelType::try_from).transpose()?,
        })
    }
}

/// Read a medical image file, or a DICOM series directory
///
/// The array is indexed `(x, y, z[, channels])` and its metadata is in
/// `options.coord_sys`.
///
/// ```no_run
/// # use medio::read_save::{read_img, ReadOptions};
/// let options = ReadOptions {
///     desired_ornt: Some("RAS".to_string()),
///     ..Default::default()
/// };
/// let (array, metadata) = read_img("scan.nii.gz", &options)?;
/// assert_eq!(metadata.ornt(), "RAS");
/// # Ok::<(), medio::read_save::ReadSaveError>(())
/// ```
pub fn read_img(
    path: impl AsRef<Path>,
    options: &ReadOptions,
) -> Result<(ArrayD<f32>, Metadata), ReadSaveError> {
    let path = path.as_ref();
    let backend = options.backend.unwrap_or_else(|| {
        if is_nifti(path, true) {
            Backend::Nifti
        } else {
            Backend::Dicom
        }
    });
    let reader_sys = backend.coord_sys();
    log::debug!("Reading {} with the {backend:?} backend", path.display());

    let desired_ornt = match (&options.desired_ornt, options.coord_sys) {
        (Some(desired), Some(coord_sys)) if coord_sys != reader_sys => Some(invert_axis_codes(desired)?),
        (desired, _) => desired.clone(),
    };

    let (mut array, mut metadata) = match backend {
        Backend::Nifti => NiftiIO::read_img(path, desired_ornt.as_deref(), options.header)?,
        Backend::Dicom => {
            let dicom_options = DicomReadOptions {
                sort_by: options.sort_by,
                series: options.series.clone(),
                header: options.header,
                allow_default_affine: options.allow_default_affine,
            };
            DicomIO::read_img(path, desired_ornt.as_deref(), options.channels_axis, &dicom_options)?
        }
    };

    if let Some(coord_sys) = options.coord_sys {
        metadata.convert(coord_sys)?;
    }
    if let Some(dtype) = options.dtype {
        array.mapv_inplace(|value| dtype.cast(value));
    }
    Ok((array, metadata))
}

/// Save an image to a file. The caller's metadata is not modified.
///
/// NIfTI files are chosen by their suffix, anything else is saved as a
/// single DICOM file.
pub fn save_img(
    path: impl AsRef<Path>,
    array: &ArrayD<f32>,
    metadata: &Metadata,
    options: &SaveOptions,
) -> Result<(), ReadSaveError> {
    let path = path.as_ref();
    let backend = options.backend.unwrap_or_else(|| {
        if is_nifti(path, false) {
            Backend::Nifti
        } else {
            Backend::Dicom
        }
    });
    if options.mkdir {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            if options.parents {
                fs::create_dir_all(parent)?;
            } else if !parent.is_dir() {
                fs::create_dir(parent)?;
            }
        }
    }
    log::debug!("Saving {} with the {backend:?} backend", path.display());

    match backend {
        Backend::Nifti => NiftiIO::save_img(
            path,
            array,
            metadata,
            options.use_original_ornt,
            options.channels_axis,
            options.dtype,
        )?,
        Backend::Dicom => DicomIO::save_img(path, array, metadata, &options.dicom()?)?,
    }
    Ok(())
}

/// Save a 3D image as a DICOM series directory.
pub fn save_dir(
    dirname: impl AsRef<Path>,
    array: &ArrayD<f32>,
    metadata: &Metadata,
    options: &SaveOptions,
) -> Result<(), ReadSaveError> {
    DicomIO::save_dcm_dir(dirname, array, metadata, &options.dicom()?)?;
    Ok(())
}
