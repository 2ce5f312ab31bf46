use crate::{
    affine::Affine,
    channels::{move_axis, move_channels_axis},
    dicom_compat::{DicomExportKind, DicomPixelType, resolve_dicom_orientation, select_dicom_pixel_type},
    enums::{CoordSys, SeriesSelector, SortBy},
    error::{ArrayError, GeometryError},
    files::{is_dicom, make_empty_dir},
    metadata::{Header, Metadata},
    reorient::reorient,
    uid::generate_uid,
};

use dicom::{
    core::{
        DataElement, PrimitiveValue, Tag, VR,
        value::DataSetSequence,
        dictionary::{DataDictionary, DataDictionaryEntry},
        header::Header as _,
    },
    object::{
        FileDicomObject, FileMetaTableBuilder, InMemDicomObject, StandardDataDictionary,
        OpenFileOptions, mem::InMemElement, open_file,
    },
    pixeldata::{ConvertOptions, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::{tags, uids};
use nalgebra::{DMatrix, DVector, Vector3};
use ndarray::{Array4, ArrayD, ArrayViewD, Axis, IxDyn, s};
use rayon::prelude::*;
use std::{
    collections::{BTreeMap, HashMap},
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// Samples are always interleaved in decoded frames, whatever the planar
/// configuration of the file, and end up in the last axis.
const DECODED_CHANNELS_AXES: (isize, isize) = (-1, -1);

const DEFAULT_MODALITY: &str = "CT";

#[derive(Debug, Error)]
pub enum DicomIoError {
    #[error("No such file or directory: {0}")]
    NotFound(PathBuf),

    #[error("No valid DICOM images found in {0}")]
    NoValidImages(PathBuf),

    #[error("The directory {path} contains more than one DICOM series, select one of {uids:?}")]
    MultipleSeries { path: PathBuf, uids: Vec<String> },

    #[error("Series {selector} not found, available series: {uids:?}")]
    SeriesNotFound { selector: String, uids: Vec<String> },

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("Array of shape {found:?} does not match the template shape {expected:?}")]
    TemplateShapeMismatch { expected: Vec<usize>, found: Vec<usize> },

    #[error("Missing attribute {0}")]
    MissingAttribute(&'static str),

    #[error("Invalid {name}: {reason}")]
    InvalidAttribute { name: &'static str, reason: String },

    #[error("Invalid tag key '{0}', expected 'gggg|eeee'")]
    InvalidTagKey(String),

    #[error("File name pattern '{0}' has no '{{}}' placeholder for the slice number")]
    InvalidPattern(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),

    #[error("Pixel data error: {0}")]
    PixelData(#[from] dicom::pixeldata::Error),

    #[error("File meta error: {0}")]
    Meta(#[from] dicom::object::WithMetaError),

    #[error("DICOM write error: {0}")]
    Write(#[from] dicom::object::WriteError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Array(#[from] ArrayError),
}

/// Options of [`DicomIO::read_img`].
#[derive(Debug, Clone, Default)]
pub struct DicomReadOptions {
    pub sort_by: SortBy,
    /// Series to read from a directory holding more than one
    pub series: Option<SeriesSelector>,
    /// Collect the textual attributes of the (first) file into the header
    pub header: bool,
    /// Fall back to identity orientation, zero position and unit spacing
    /// when a single file lacks them
    pub allow_default_affine: bool,
}

/// Options of [`DicomIO::save_img`] and [`DicomIO::save_dcm_dir`].
#[derive(Debug, Clone)]
pub struct DicomWriteOptions {
    /// Save in the orientation the image had before it was reoriented
    pub use_original_ornt: bool,
    /// Axis holding the channels of vector (e.g. RGB) images
    pub channels_axis: Option<isize>,
    /// Flip the slice axis of a left-handed orientation instead of failing
    pub allow_dcm_reorient: bool,
    /// Series file names, `{}` is replaced by the instance number
    pub pattern: String,
    /// Attributes added to every file or overriding the defaults, keyed as
    /// `gggg|eeee`, e.g. `0008|0060` for the modality
    pub metadata_dict: BTreeMap<String, String>,
    /// Create the missing parents of the series directory
    pub parents: bool,
    /// Accept an existing non-empty series directory
    pub exist_ok: bool,
    /// Pixel type to store, values are cast to it; chosen from the values
    /// when `None`
    pub pixel_type: Option<DicomPixelType>,
}

impl Default for DicomWriteOptions {
    fn default() -> Self {
        Self {
            use_original_ornt: true,
            channels_axis: None,
            allow_dcm_reorient: false,
            pattern: "IM{}.dcm".to_string(),
            metadata_dict: BTreeMap::new(),
            parents: false,
            exist_ok: false,
            pixel_type: None,
        }
    }
}

/// Geometry and pixels of one decoded file.
struct DecodedImage {
    /// `(frames, rows, columns, samples)`
    frames: Array4<f32>,
    orientation: Option<[Vector3<f64>; 2]>,
    position: Option<Vector3<f64>>,
    /// row spacing, then column spacing
    pixel_spacing: Option<[f64; 2]>,
    slice_spacing: Option<f64>,
    instance_number: i32,
    samples_per_pixel: usize,
    planar_configuration: Option<u16>,
    header: Option<Header>,
}

impl DecodedImage {
    fn normal(&self) -> Option<Vector3<f64>> {
        self.orientation.map(|[row, column]| row.cross(&column))
    }
}

/// Reader and writer of DICOM files and series, in the `itk` convention.
///
/// Arrays are indexed `(columns, rows, slices[, samples])`: the first axis
/// runs along a row of the image.
pub struct DicomIO;

impl DicomIO {
    pub const COORD_SYS: CoordSys = CoordSys::Itk;

    /// Read a DICOM file or a directory holding a series
    ///
    /// # Arguments
    ///
    /// * `path` - File, or directory holding a series; every file of the
    ///   directory that parses as DICOM is considered
    /// * `desired_ornt` - Orientation to return the image in, `itk` convention
    /// * `channels_axis` - Where to put the channels of vector images; they
    ///   stay last when `None`
    /// * `options` - Series selection, slice order and header
    ///
    /// # Errors
    ///
    /// Returns error if no valid images are found, the series is ambiguous or
    /// the geometry attributes are missing or inconsistent
    pub fn read_img(
        path: impl AsRef<Path>,
        desired_ornt: Option<&str>,
        channels_axis: Option<isize>,
        options: &DicomReadOptions,
    ) -> Result<(ArrayD<f32>, Metadata), DicomIoError> {
        let path = path.as_ref();
        let (array, metadata, samples_per_pixel) = if path.is_dir() {
            Self::read_dir(path, options)?
        } else if path.is_file() {
            Self::read_file(path, options)?
        } else {
            return Err(DicomIoError::NotFound(path.to_path_buf()));
        };

        // channels are last during the reorientation
        let (array, metadata) = match desired_ornt {
            Some(desired) => reorient(array, &metadata, desired)?,
            None => (array, metadata),
        };
        let array = match channels_axis {
            Some(axis) if samples_per_pixel > 1 => move_axis(array, -1, axis)?,
            _ => array,
        };
        Ok((array, metadata))
    }

    /// Read the series of a directory.
    ///
    /// Returns the array with channels last, its metadata and the number of
    /// samples per pixel.
    pub fn read_dir(
        path: impl AsRef<Path>,
        options: &DicomReadOptions,
    ) -> Result<(ArrayD<f32>, Metadata, usize), DicomIoError> {
        let path = path.as_ref();
        let paths = Self::select_series(path, options.series.as_ref())?;
        log::debug!("Reading {} DICOM slices from {}", paths.len(), path.display());

        let mut images = paths
            .par_iter()
            .map(|path| -> Result<DecodedImage, DicomIoError> {
                let object = open_file(path)?;
                Self::decode_image(&object, options.header)
            })
            .collect::<Result<Vec<_>, DicomIoError>>()?;

        Self::sort_images(&mut images, options.sort_by);
        Self::validate_dimensions(&images)?;

        // attributes of the first slice in series order
        let header = images[0].header.take();

        let first = &images[0];
        let affine = Self::series_affine(&images)?;
        let samples_per_pixel = first.samples_per_pixel;
        let planar_configuration = first.planar_configuration;
        let array = Self::build_volume_array(&images);
        let array = move_channels_axis(
            array,
            samples_per_pixel,
            Some(-1),
            planar_configuration,
            DECODED_CHANNELS_AXES,
        )?;
        let metadata = Metadata::new(affine, None, Self::COORD_SYS, header)?;
        Ok((array, metadata, samples_per_pixel))
    }

    /// Read a single, possibly multi-frame, file. Frames become slices.
    pub fn read_file(
        path: impl AsRef<Path>,
        options: &DicomReadOptions,
    ) -> Result<(ArrayD<f32>, Metadata, usize), DicomIoError> {
        let object = open_file(path.as_ref())?;
        let mut image = Self::decode_image(&object, options.header)?;
        let header = image.header.take();

        let affine = Self::file_affine(&image, options.allow_default_affine)?;
        let samples_per_pixel = image.samples_per_pixel;
        let planar_configuration = image.planar_configuration;
        let array = Self::frames_to_array(image.frames);
        let array = move_channels_axis(
            array,
            samples_per_pixel,
            Some(-1),
            planar_configuration,
            DECODED_CHANNELS_AXES,
        )?;
        let metadata = Metadata::new(affine, None, Self::COORD_SYS, header)?;
        Ok((array, metadata, samples_per_pixel))
    }

    /// Save `array` as a single DICOM file, multi-frame if it has more than
    /// one slice.
    ///
    /// Only integer values are supported: `int16`, `uint8` or `uint16` for
    /// 2D images, `uint8` or `uint16` for 3D images and `uint8` for vector
    /// images.
    pub fn save_img(
        path: impl AsRef<Path>,
        array: &ArrayD<f32>,
        metadata: &Metadata,
        options: &DicomWriteOptions,
    ) -> Result<(), DicomIoError> {
        let path = path.as_ref();
        let overrides = Self::parse_overrides(&options.metadata_dict)?;
        let (array, metadata) = Self::prepare_image(array, metadata, options)?;
        let is_vector = options.channels_axis.is_some();
        let spatial = Self::spatial_shape(array.shape(), is_vector);
        let kind = DicomExportKind::single_file(&spatial, is_vector);
        let pixel_type = Self::pixel_type(array.view(), kind, options.pixel_type)?;
        let array = Self::as_volume(array, metadata.affine().dim(), is_vector);

        let geometry = SeriesGeometry::new(metadata.affine());
        let uids = SeriesUids::generate(is_vector);
        let frames = array.shape()[2];
        let mut object = Self::base_object(&array.view(), pixel_type, &geometry, &uids, 0)?;
        if frames > 1 {
            Self::put_str(&mut object, tags::NUMBER_OF_FRAMES, VR::IS, frames.to_string());
        }
        Self::apply_overrides(&mut object, &overrides);
        object.put(Self::pixel_data_element(array.view(), pixel_type));

        log::info!("Saving DICOM file {} as {}", path.display(), pixel_type.name());
        Self::write_object(object, &uids.sop_class, path)
    }

    /// Save a 3D image as a series of 2D files in `dirname`
    ///
    /// # Arguments
    ///
    /// * `dirname` - Output directory, must be empty unless `exist_ok`
    /// * `array` - Image array, `(x, y, z[, channels])` once the channels are moved last
    /// * `metadata` - Matching metadata, in any convention
    /// * `options` - Orientation, file names and attribute overrides
    ///
    /// # Errors
    ///
    /// Returns error for a left-handed orientation without
    /// `allow_dcm_reorient`, values that fit no DICOM pixel type or an
    /// invalid pattern or tag key
    pub fn save_dcm_dir(
        dirname: impl AsRef<Path>,
        array: &ArrayD<f32>,
        metadata: &Metadata,
        options: &DicomWriteOptions,
    ) -> Result<(), DicomIoError> {
        let dirname = dirname.as_ref();
        if !options.pattern.contains("{}") {
            return Err(DicomIoError::InvalidPattern(options.pattern.clone()));
        }
        let overrides = Self::parse_overrides(&options.metadata_dict)?;
        let (array, metadata) = Self::prepare_image(array, metadata, options)?;
        let d = metadata.affine().dim();
        if d != 3 {
            return Err(GeometryError::DimensionMismatch {
                context: "DICOM series dimensions",
                expected: 3,
                found: d,
            }
            .into());
        }
        let is_vector = options.channels_axis.is_some();
        let kind = if is_vector {
            DicomExportKind::Vector
        } else {
            DicomExportKind::Series
        };
        let pixel_type = Self::pixel_type(array.view(), kind, options.pixel_type)?;

        make_empty_dir(dirname, options.parents, options.exist_ok)?;
        let geometry = SeriesGeometry::new(metadata.affine());
        let uids = SeriesUids::generate(is_vector);
        let slices = array.shape()[2];
        log::info!(
            "Saving DICOM series of {slices} slices to {} as {}",
            dirname.display(),
            pixel_type.name()
        );

        let number_of_slices = dim_u16(slices, "NumberOfSlices")?;
        (0..slices).into_par_iter().try_for_each(|k| {
            let slice = array.index_axis(Axis(2), k).insert_axis(Axis(2));
            let uids = uids.for_instance();
            let mut object = Self::base_object(&slice, pixel_type, &geometry, &uids, k)?;
            Self::put_u16(&mut object, tags::NUMBER_OF_SLICES, number_of_slices);
            Self::apply_overrides(&mut object, &overrides);
            object.put(Self::pixel_data_element(slice, pixel_type));

            let filename = dirname.join(options.pattern.replace("{}", &(k + 1).to_string()));
            Self::write_object(object, &uids.sop_class, &filename)
        })
    }

    /// Save `array` into a copy of a template file
    ///
    /// # Arguments
    ///
    /// * `path` - Output file
    /// * `template` - Single DICOM file whose attributes are kept
    /// * `array` - Image in the orientation of the template,
    ///   `(columns, rows[, frames][, samples])`
    /// * `pixel_type` - Pixel type to store; the template's when `None`
    /// * `keep_rescale` - Keep the intensity rescale of the template. The
    ///   array holds stored values then, otherwise it holds final values
    ///   and the rescale attributes are removed.
    pub fn save_with_template(
        path: impl AsRef<Path>,
        template: impl AsRef<Path>,
        array: &ArrayD<f32>,
        pixel_type: Option<DicomPixelType>,
        keep_rescale: bool,
    ) -> Result<(), DicomIoError> {
        let path = path.as_ref();
        let template = open_file(template.as_ref())?;
        let sop_class = get_string(&template, tags::SOP_CLASS_UID).unwrap_or_else(|| {
            template
                .meta()
                .media_storage_sop_class_uid
                .trim_end_matches('\0')
                .to_string()
        });
        let mut object = template.into_inner();

        let dim = |tag, default| get_usize(&object, tag).unwrap_or(default);
        let samples = dim(tags::SAMPLES_PER_PIXEL, 1);
        let mut expected = vec![
            dim(tags::COLUMNS, 0),
            dim(tags::ROWS, 0),
            dim(tags::NUMBER_OF_FRAMES, 1),
        ];
        if samples > 1 {
            expected.push(samples);
        }
        let volume = if array.shape() == expected.as_slice() {
            array.view()
        } else if expected[2] == 1 && array.ndim() + 1 == expected.len() {
            array.view().insert_axis(Axis(2))
        } else {
            return Err(DicomIoError::TemplateShapeMismatch {
                expected,
                found: array.shape().to_vec(),
            });
        };

        if !keep_rescale {
            Self::remove_rescale(&mut object);
        }
        let pixel_type = match pixel_type {
            Some(pixel_type) => {
                let bits = pixel_type.bits_allocated();
                Self::put_u16(&mut object, tags::BITS_ALLOCATED, bits);
                Self::put_u16(&mut object, tags::BITS_STORED, bits);
                Self::put_u16(&mut object, tags::HIGH_BIT, bits - 1);
                Self::put_u16(&mut object, tags::PIXEL_REPRESENTATION, pixel_type.pixel_representation());
                pixel_type
            }
            None => Self::template_pixel_type(&object)?,
        };
        object.put(Self::pixel_data_element(volume, pixel_type));

        log::info!("Saving DICOM file {} from a template as {}", path.display(), pixel_type.name());
        Self::write_object(object, &sop_class, path)
    }

    fn pixel_type(
        values: ArrayViewD<'_, f32>,
        kind: DicomExportKind,
        forced: Option<DicomPixelType>,
    ) -> Result<DicomPixelType, ArrayError> {
        match forced {
            Some(pixel_type) => Ok(pixel_type),
            None => select_dicom_pixel_type(values, kind),
        }
    }

    fn template_pixel_type(object: &InMemDicomObject) -> Result<DicomPixelType, DicomIoError> {
        let bits = get_usize(object, tags::BITS_ALLOCATED).ok_or(DicomIoError::MissingAttribute("BitsAllocated"))?;
        let representation = get_usize(object, tags::PIXEL_REPRESENTATION).unwrap_or(0);
        match (bits, representation) {
            (8, _) => Ok(DicomPixelType::U8),
            (16, 0) => Ok(DicomPixelType::U16),
            (16, _) => Ok(DicomPixelType::I16),
            _ => Err(DicomIoError::InvalidAttribute {
                name: "BitsAllocated",
                reason: format!("{bits} bits are not supported"),
            }),
        }
    }

    /// Remove the modality rescale, also from the shared functional groups of
    /// enhanced multi-frame files.
    fn remove_rescale(object: &mut InMemDicomObject) {
        object.remove_element(tags::RESCALE_SLOPE);
        object.remove_element(tags::RESCALE_INTERCEPT);
        let groups = object
            .get(tags::SHARED_FUNCTIONAL_GROUPS_SEQUENCE)
            .and_then(|element| element.items())
            .map(|items| items.to_vec());
        if let Some(groups) = groups {
            let groups: Vec<InMemDicomObject> = groups
                .into_iter()
                .map(|mut group| {
                    group.remove_element(tags::PIXEL_VALUE_TRANSFORMATION_SEQUENCE);
                    group
                })
                .collect();
            object.put(DataElement::new(
                tags::SHARED_FUNCTIONAL_GROUPS_SEQUENCE,
                VR::SQ,
                DataSetSequence::from(groups),
            ));
        }
    }

    fn select_series(
        path: &Path,
        selector: Option<&SeriesSelector>,
    ) -> Result<Vec<PathBuf>, DicomIoError> {
        let paths: Vec<_> = fs::read_dir(path)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();

        // only the attributes before the pixel data are needed to group files
        let series: Vec<(String, PathBuf)> = paths
            .par_iter()
            .filter_map(|path| {
                let object = match OpenFileOptions::new()
                    .read_until(tags::PIXEL_DATA)
                    .open_file(path)
                {
                    Ok(object) => object,
                    Err(e) => {
                        if is_dicom(path, false) {
                            log::warn!("Skipping {}: {e}", path.display());
                        }
                        return None;
                    }
                };
                let uid = get_string(&object, tags::SERIES_INSTANCE_UID)?;
                Some((uid, path.clone()))
            })
            .collect();

        let mut by_uid: HashMap<String, Vec<PathBuf>> = HashMap::new();
        for (uid, path) in series {
            by_uid.entry(uid).or_default().push(path);
        }
        let mut uids: Vec<String> = by_uid.keys().cloned().collect();
        uids.sort();

        let uid = match (selector, uids.as_slice()) {
            (_, []) => return Err(DicomIoError::NoValidImages(path.to_path_buf())),
            (None, [uid]) => uid.clone(),
            (None, _) => {
                return Err(DicomIoError::MultipleSeries {
                    path: path.to_path_buf(),
                    uids: uids.clone(),
                });
            }
            (Some(SeriesSelector::Uid(uid)), _) if by_uid.contains_key(uid) => uid.clone(),
            (Some(SeriesSelector::Index(index)), _) if *index < uids.len() => uids[*index].clone(),
            (Some(selector), _) => {
                return Err(DicomIoError::SeriesNotFound {
                    selector: match selector {
                        SeriesSelector::Uid(uid) => uid.clone(),
                        SeriesSelector::Index(index) => index.to_string(),
                    },
                    uids: uids.clone(),
                });
            }
        };
        log::debug!("Selected series {uid} of {} in {}", uids.len(), path.display());

        let mut paths = by_uid.remove(&uid).unwrap_or_default();
        paths.sort();
        Ok(paths)
    }

    fn decode_image(
        object: &FileDicomObject<InMemDicomObject>,
        header: bool,
    ) -> Result<DecodedImage, DicomIoError> {
        let pixel_data = object.decode_pixel_data()?;
        let options = ConvertOptions::new().with_voi_lut(VoiLutOption::Identity);
        let frames = pixel_data.to_ndarray_with_options::<f32>(&options)?;
        let samples_per_pixel = frames.shape()[3];

        let orientation = get_f64_vec(object, tags::IMAGE_ORIENTATION_PATIENT)
            .filter(|values| values.len() == 6)
            .map(|values| {
                [
                    Vector3::new(values[0], values[1], values[2]),
                    Vector3::new(values[3], values[4], values[5]),
                ]
            });
        let position = get_f64_vec(object, tags::IMAGE_POSITION_PATIENT)
            .filter(|values| values.len() == 3)
            .map(|values| Vector3::new(values[0], values[1], values[2]));
        let pixel_spacing = get_f64_vec(object, tags::PIXEL_SPACING)
            .filter(|values| values.len() == 2)
            .map(|values| [values[0], values[1]]);
        let slice_spacing = get_f64(object, tags::SPACING_BETWEEN_SLICES)
            .or_else(|| get_f64(object, tags::SLICE_THICKNESS));

        Ok(DecodedImage {
            frames,
            orientation,
            position,
            pixel_spacing,
            slice_spacing,
            instance_number: object
                .element(tags::INSTANCE_NUMBER)
                .ok()
                .and_then(|element| element.to_int::<i32>().ok())
                .unwrap_or(0),
            samples_per_pixel,
            planar_configuration: object
                .element(tags::PLANAR_CONFIGURATION)
                .ok()
                .and_then(|element| element.to_int::<u16>().ok()),
            header: header.then(|| Self::collect_header(object)),
        })
    }

    fn sort_images(images: &mut [DecodedImage], sort_by: SortBy) {
        match sort_by {
            SortBy::ImagePositionPatient => {
                let normal = images
                    .first()
                    .and_then(DecodedImage::normal)
                    .unwrap_or_else(Vector3::z);
                let distance = |image: &DecodedImage| image.position.map(|p| p.dot(&normal));
                images.sort_by(|a, b| {
                    distance(a)
                        .partial_cmp(&distance(b))
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
            }
            SortBy::InstanceNumber => images.sort_by_key(|image| image.instance_number),
            SortBy::None => {}
        }
    }

    fn validate_dimensions(images: &[DecodedImage]) -> Result<(), DicomIoError> {
        let first = images.first().ok_or(DicomIoError::InconsistentDimensions)?;
        let first_dim = first.frames.dim();
        if images.iter().any(|image| image.frames.dim() != first_dim) {
            return Err(DicomIoError::InconsistentDimensions);
        }
        Ok(())
    }

    /// Stack the first frame of every image into `(columns, rows, slices, samples)`.
    fn build_volume_array(images: &[DecodedImage]) -> ArrayD<f32> {
        let (_, rows, columns, samples) = images[0].frames.dim();
        let mut volume = Array4::<f32>::zeros((images.len(), rows, columns, samples));
        for (i, image) in images.iter().enumerate() {
            volume
                .slice_mut(s![i, .., .., ..])
                .assign(&image.frames.slice(s![0, .., .., ..]));
        }
        Self::frames_to_array(volume)
    }

    /// `(frames, rows, columns, samples)` to `(columns, rows, frames[, samples])`.
    fn frames_to_array(frames: Array4<f32>) -> ArrayD<f32> {
        let samples = frames.dim().3;
        let array = frames.permuted_axes([2, 1, 0, 3]);
        let array = if samples == 1 {
            array.index_axis_move(Axis(3), 0).into_dyn()
        } else {
            array.into_dyn()
        };
        array.as_standard_layout().into_owned()
    }

    fn series_affine(images: &[DecodedImage]) -> Result<Affine, DicomIoError> {
        let first = &images[0];
        let [row, column] = first
            .orientation
            .ok_or(DicomIoError::MissingAttribute("ImageOrientationPatient"))?;
        let [row_spacing, column_spacing] = first
            .pixel_spacing
            .ok_or(DicomIoError::MissingAttribute("PixelSpacing"))?;
        let origin = first
            .position
            .ok_or(DicomIoError::MissingAttribute("ImagePositionPatient"))?;

        let step = match images {
            [_, .., last] => {
                let last_position = last
                    .position
                    .ok_or(DicomIoError::MissingAttribute("ImagePositionPatient"))?;
                let step = (last_position - origin) / (images.len() - 1) as f64;
                Self::warn_non_uniform_spacing(images, &step);
                step
            }
            _ => row.cross(&column) * first.slice_spacing.unwrap_or(1.0),
        };
        let slice_spacing = step.norm();
        if slice_spacing == 0.0 {
            return Err(DicomIoError::InvalidAttribute {
                name: "ImagePositionPatient",
                reason: "slices share the same position".to_string(),
            });
        }
        Ok(Self::affine_from_vectors(
            [row, column, step / slice_spacing],
            [column_spacing, row_spacing, slice_spacing],
            origin,
        )?)
    }

    fn warn_non_uniform_spacing(images: &[DecodedImage], step: &Vector3<f64>) {
        let expected = step.norm();
        let positions: Vec<_> = images.iter().filter_map(|image| image.position).collect();
        let non_uniform = positions
            .windows(2)
            .any(|pair| ((pair[1] - pair[0]).norm() - expected).abs() > 0.01 * expected);
        if non_uniform {
            log::warn!("Non-uniform slice spacing detected, using the mean spacing {expected}");
        }
    }

    fn file_affine(image: &DecodedImage, allow_default: bool) -> Result<Affine, DicomIoError> {
        let missing = |name| {
            if allow_default {
                log::warn!("Missing {name}, using a default value");
                Ok(())
            } else {
                Err(DicomIoError::MissingAttribute(name))
            }
        };
        let [row, column] = match image.orientation {
            Some(orientation) => orientation,
            None => {
                missing("ImageOrientationPatient")?;
                [Vector3::x(), Vector3::y()]
            }
        };
        let origin = match image.position {
            Some(position) => position,
            None => {
                missing("ImagePositionPatient")?;
                Vector3::zeros()
            }
        };
        let [row_spacing, column_spacing] = match image.pixel_spacing {
            Some(spacing) => spacing,
            None => {
                missing("PixelSpacing")?;
                [1.0, 1.0]
            }
        };
        let slice_spacing = image.slice_spacing.unwrap_or(1.0);
        Ok(Self::affine_from_vectors(
            [row, column, row.cross(&column)],
            [column_spacing, row_spacing, slice_spacing],
            origin,
        )?)
    }

    fn affine_from_vectors(
        columns: [Vector3<f64>; 3],
        spacing: [f64; 3],
        origin: Vector3<f64>,
    ) -> Result<Affine, GeometryError> {
        let direction = DMatrix::from_iterator(3, 3, columns.iter().flat_map(|c| c.iter().copied()));
        Affine::new(
            direction,
            DVector::from_row_slice(&spacing),
            DVector::from_row_slice(origin.as_slice()),
        )
    }

    fn collect_header(object: &InMemDicomObject) -> Header {
        let mut header = Header::new();
        for element in object {
            let tag = element.tag();
            let binary = matches!(
                element.vr(),
                VR::OB | VR::OD | VR::OF | VR::OL | VR::OV | VR::OW | VR::UN | VR::SQ
            );
            if tag == tags::PIXEL_DATA || binary {
                continue;
            }
            if let Ok(value) = element.to_str() {
                let value = value.trim_end_matches(['\0', ' ']).to_string();
                header.insert(tag_key(tag), value);
            }
        }
        header
    }

    fn prepare_image(
        array: &ArrayD<f32>,
        metadata: &Metadata,
        options: &DicomWriteOptions,
    ) -> Result<(ArrayD<f32>, Metadata), DicomIoError> {
        let metadata = metadata.converted(Self::COORD_SYS)?;
        let desired = if options.use_original_ornt {
            metadata.orig_ornt().map(str::to_string)
        } else {
            None
        };
        let desired = resolve_dicom_orientation(desired.as_deref(), &metadata, options.allow_dcm_reorient)?;

        let array = match options.channels_axis {
            Some(axis) => move_axis(array.clone(), axis, -1)?,
            None => array.clone(),
        };
        Ok(reorient(array, &metadata, &desired)?)
    }

    fn spatial_shape(shape: &[usize], is_vector: bool) -> Vec<usize> {
        let spatial = if is_vector { shape.len().saturating_sub(1) } else { shape.len() };
        shape[..spatial].to_vec()
    }

    /// Give a 2D image a slice axis: `(x, y[, c])` to `(x, y, 1[, c])`.
    fn as_volume(array: ArrayD<f32>, dim: usize, is_vector: bool) -> ArrayD<f32> {
        let spatial = Self::spatial_shape(array.shape(), is_vector).len();
        if dim == 2 && spatial == 2 {
            array.insert_axis(Axis(2))
        } else {
            array
        }
    }

    /// Attributes shared by single files and series slices. `volume` is
    /// `(x, y, frames[, samples])` and `slice_index` is the index of its first
    /// frame in the series.
    fn base_object(
        volume: &ArrayViewD<'_, f32>,
        pixel_type: DicomPixelType,
        geometry: &SeriesGeometry,
        uids: &SeriesUids,
        slice_index: usize,
    ) -> Result<InMemDicomObject, DicomIoError> {
        let shape = volume.shape();
        let (columns, rows) = (dim_u16(shape[0], "Columns")?, dim_u16(shape[1], "Rows")?);
        let samples = if shape.len() > 3 { shape[3] } else { 1 };

        let mut object = InMemDicomObject::new_empty();
        Self::put_str(&mut object, tags::SOP_CLASS_UID, VR::UI, uids.sop_class.clone());
        Self::put_str(&mut object, tags::SOP_INSTANCE_UID, VR::UI, uids.sop_instance.clone());
        Self::put_str(&mut object, tags::STUDY_INSTANCE_UID, VR::UI, uids.study.clone());
        Self::put_str(&mut object, tags::SERIES_INSTANCE_UID, VR::UI, uids.series.clone());
        Self::put_str(&mut object, tags::MODALITY, VR::CS, DEFAULT_MODALITY);
        Self::put_str(&mut object, tags::INSTANCE_NUMBER, VR::IS, (slice_index + 1).to_string());

        Self::put_decimals(&mut object, tags::IMAGE_POSITION_PATIENT, &geometry.position(slice_index)?);
        Self::put_decimals(&mut object, tags::IMAGE_ORIENTATION_PATIENT, &geometry.orientation);
        Self::put_decimals(&mut object, tags::PIXEL_SPACING, &geometry.pixel_spacing);
        Self::put_decimals(&mut object, tags::SPACING_BETWEEN_SLICES, &[geometry.slice_spacing]);
        Self::put_decimals(&mut object, tags::SLICE_THICKNESS, &[geometry.slice_spacing]);

        let samples = dim_u16(samples, "SamplesPerPixel")?;
        let photometric = if samples > 1 { "RGB" } else { "MONOCHROME2" };
        Self::put_u16(&mut object, tags::SAMPLES_PER_PIXEL, samples);
        Self::put_str(&mut object, tags::PHOTOMETRIC_INTERPRETATION, VR::CS, photometric);
        if samples > 1 {
            Self::put_u16(&mut object, tags::PLANAR_CONFIGURATION, 0);
        }
        Self::put_u16(&mut object, tags::ROWS, rows);
        Self::put_u16(&mut object, tags::COLUMNS, columns);
        let bits = pixel_type.bits_allocated();
        Self::put_u16(&mut object, tags::BITS_ALLOCATED, bits);
        Self::put_u16(&mut object, tags::BITS_STORED, bits);
        Self::put_u16(&mut object, tags::HIGH_BIT, bits - 1);
        Self::put_u16(&mut object, tags::PIXEL_REPRESENTATION, pixel_type.pixel_representation());
        Ok(object)
    }

    /// Pixel data of `(x, y, frames[, samples])`, stored frame by frame, row
    /// by row, samples interleaved.
    fn pixel_data_element(volume: ArrayViewD<'_, f32>, pixel_type: DicomPixelType) -> InMemElement {
        let mut order = vec![2, 1, 0];
        order.extend(3..volume.ndim());
        let ordered = volume.permuted_axes(IxDyn(&order));
        match pixel_type {
            DicomPixelType::U8 => {
                let mut bytes: Vec<u8> = ordered.iter().map(|&value| value as u8).collect();
                // values have even length
                if bytes.len() % 2 == 1 {
                    bytes.push(0);
                }
                DataElement::new(tags::PIXEL_DATA, VR::OB, PrimitiveValue::U8(bytes.into()))
            }
            DicomPixelType::U16 => DataElement::new(
                tags::PIXEL_DATA,
                VR::OW,
                PrimitiveValue::U16(ordered.iter().map(|&value| value as u16).collect()),
            ),
            // two's complement words, PixelRepresentation tells them apart
            DicomPixelType::I16 => DataElement::new(
                tags::PIXEL_DATA,
                VR::OW,
                PrimitiveValue::U16(ordered.iter().map(|&value| value as i16 as u16).collect()),
            ),
        }
    }

    fn parse_overrides(metadata_dict: &BTreeMap<String, String>) -> Result<Vec<(Tag, String)>, DicomIoError> {
        metadata_dict
            .iter()
            .map(|(key, value)| Ok((parse_tag_key(key)?, value.clone())))
            .collect()
    }

    fn apply_overrides(object: &mut InMemDicomObject, overrides: &[(Tag, String)]) {
        for (tag, value) in overrides {
            let vr = StandardDataDictionary
                .by_tag(*tag)
                .map(|entry| entry.vr().relaxed())
                .unwrap_or(VR::LO);
            Self::put_str(object, *tag, vr, value.clone());
        }
    }

    fn write_object(object: InMemDicomObject, sop_class: &str, path: &Path) -> Result<(), DicomIoError> {
        let sop_instance = get_string(&object, tags::SOP_INSTANCE_UID).unwrap_or_else(generate_uid);
        let file = object.with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                .media_storage_sop_class_uid(sop_class)
                .media_storage_sop_instance_uid(sop_instance),
        )?;
        file.write_to_file(path)?;
        Ok(())
    }

    fn put_str(object: &mut InMemDicomObject, tag: Tag, vr: VR, value: impl Into<String>) {
        object.put(DataElement::new(tag, vr, PrimitiveValue::from(value.into())));
    }

    fn put_u16(object: &mut InMemDicomObject, tag: Tag, value: u16) {
        object.put(DataElement::new(tag, VR::US, PrimitiveValue::from(value)));
    }

    fn put_decimals(object: &mut InMemDicomObject, tag: Tag, values: &[f64]) {
        let values = values.iter().map(|&value| format_decimal(value)).collect();
        object.put(DataElement::new(tag, VR::DS, PrimitiveValue::Strs(values)));
    }
}

/// Geometry attributes of the slices of an `itk` affine.
struct SeriesGeometry {
    affine: Affine,
    orientation: [f64; 6],
    pixel_spacing: [f64; 2],
    slice_spacing: f64,
}

impl SeriesGeometry {
    fn new(affine: &Affine) -> Self {
        let d = affine.dim();
        let direction = affine.direction();
        let spacing = affine.spacing();
        let component = |i: usize, j: usize| if i < d { direction[(i, j)] } else { 0.0 };
        Self {
            affine: affine.clone(),
            orientation: [
                component(0, 0),
                component(1, 0),
                component(2, 0),
                component(0, 1),
                component(1, 1),
                component(2, 1),
            ],
            pixel_spacing: [spacing[1], spacing[0]],
            slice_spacing: if d > 2 { spacing[2] } else { 1.0 },
        }
    }

    /// ImagePositionPatient of slice `k`.
    fn position(&self, k: usize) -> Result<[f64; 3], GeometryError> {
        let d = self.affine.dim();
        let mut index = DVector::zeros(d);
        if d > 2 {
            index[2] = k as f64;
        }
        let coord = self.affine.index_to_coord(&index)?;
        Ok([coord[0], coord[1], if d > 2 { coord[2] } else { 0.0 }])
    }
}

/// UIDs of one file; study and series are shared by every slice.
#[derive(Clone)]
struct SeriesUids {
    sop_class: String,
    sop_instance: String,
    study: String,
    series: String,
}

impl SeriesUids {
    fn generate(is_vector: bool) -> Self {
        let sop_class = if is_vector {
            uids::SECONDARY_CAPTURE_IMAGE_STORAGE
        } else {
            uids::CT_IMAGE_STORAGE
        };
        Self {
            sop_class: sop_class.to_string(),
            sop_instance: generate_uid(),
            study: generate_uid(),
            series: generate_uid(),
        }
    }

    fn for_instance(&self) -> Self {
        Self {
            sop_instance: generate_uid(),
            ..self.clone()
        }
    }
}

/// `gggg|eeee` key of a tag, as used by headers and attribute overrides.
pub fn tag_key(tag: Tag) -> String {
    format!("{:04x}|{:04x}", tag.group(), tag.element())
}

/// Parse a `gggg|eeee` tag key.
pub fn parse_tag_key(key: &str) -> Result<Tag, DicomIoError> {
    let invalid = || DicomIoError::InvalidTagKey(key.to_string());
    let (group, element) = key.split_once('|').ok_or_else(invalid)?;
    if group.len() != 4 || element.len() != 4 {
        return Err(invalid());
    }
    let group = u16::from_str_radix(group, 16).map_err(|_| invalid())?;
    let element = u16::from_str_radix(element, 16).map_err(|_| invalid())?;
    Ok(Tag(group, element))
}

/// Decimal string (DS) of at most 16 characters.
fn format_decimal(value: f64) -> String {
    let plain = value.to_string();
    if plain.len() <= 16 {
        return plain;
    }
    for precision in (0..=12).rev() {
        let fixed = format!("{value:.precision$}");
        let fixed = if fixed.contains('.') {
            fixed.trim_end_matches('0').trim_end_matches('.').to_string()
        } else {
            fixed
        };
        if fixed.len() <= 16 {
            return fixed;
        }
    }
    format!("{value:.6e}")
}

fn dim_u16(len: usize, name: &'static str) -> Result<u16, DicomIoError> {
    u16::try_from(len).map_err(|_| DicomIoError::InvalidAttribute {
        name,
        reason: format!("{len} does not fit in 16 bits"),
    })
}

fn get_string(object: &InMemDicomObject, tag: Tag) -> Option<String> {
    object
        .element(tag)
        .ok()?
        .to_str()
        .ok()
        .map(|value| value.trim_end_matches(['\0', ' ']).to_string())
}

fn get_usize(object: &InMemDicomObject, tag: Tag) -> Option<usize> {
    object.element(tag).ok()?.to_int::<usize>().ok()
}

fn get_f64(object: &InMemDicomObject, tag: Tag) -> Option<f64> {
    object.element(tag).ok()?.to_float64().ok()
}

fn get_f64_vec(object: &InMemDicomObject, tag: Tag) -> Option<Vec<f64>> {
    object.element(tag).ok()?.to_multi_float64().ok()
}
