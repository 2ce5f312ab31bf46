//! Checks that an image can be exported as DICOM: right-handed orientation
//! and a pixel type DICOM can hold.

use nalgebra::Vector3;
use ndarray::ArrayViewD;
use ndarray::parallel::prelude::*;

use crate::enums::DType;
use crate::error::{ArrayError, GeometryError};
use crate::metadata::Metadata;
use crate::orientation::parse_axis_codes;

/// Whether the letters of `code` form a right-handed frame.
///
/// 2 letter codes (2D images) are always right-handed.
pub fn is_right_handed_orientation(code: &str) -> Result<bool, GeometryError> {
    let axes = parse_axis_codes(code)?;
    let [u, v, n] = match axes.as_slice() {
        &[_, _] => return Ok(true),
        &[u, v, n] => [u, v, n].map(|ax| Vector3::from(ax.unit_vector())),
        _ => {
            return Err(GeometryError::InvalidOrientationCode {
                code: code.to_string(),
                reason: "expected 2 or 3 letters",
            });
        }
    };
    let triple = u.cross(&v).dot(&n);
    if triple == 1.0 {
        Ok(true)
    } else if triple == -1.0 {
        Ok(false)
    } else {
        Err(GeometryError::InvalidOrientationCode {
            code: code.to_string(),
            reason: "axes do not form an orthonormal frame",
        })
    }
}

/// Orientation to save a DICOM image in.
///
/// `desired` defaults to the current orientation of `metadata`. A
/// left-handed orientation is corrected by flipping its last letter, which
/// mirrors the slice axis and keeps the in-plane axes, but only if
/// `allow_reorient` is set.
///
/// # Errors
///
/// Returns [`GeometryError::LeftHandedOrientationRejected`] with both the
/// rejected and the suggested orientation when reorientation is not allowed.
pub fn resolve_dicom_orientation(
    desired: Option<&str>,
    metadata: &Metadata,
    allow_reorient: bool,
) -> Result<String, GeometryError> {
    let desired = desired.unwrap_or_else(|| metadata.ornt());
    if is_right_handed_orientation(desired)? {
        return Ok(desired.to_string());
    }
    let mut axes = parse_axis_codes(desired)?;
    if let Some(last) = axes.last_mut() {
        *last = last.opposite();
    }
    let suggested: String = axes.into_iter().map(|ax| ax.as_char()).collect();
    if allow_reorient {
        log::warn!("Orientation {desired} is left-handed, saving DICOM as {suggested}");
        Ok(suggested)
    } else {
        Err(GeometryError::LeftHandedOrientationRejected {
            orientation: desired.to_string(),
            suggested,
        })
    }
}

/// Integer pixel types written to DICOM files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DicomPixelType {
    U8,
    I16,
    U16,
}

impl DicomPixelType {
    pub fn name(&self) -> &'static str {
        match self {
            DicomPixelType::U8 => "uint8",
            DicomPixelType::I16 => "int16",
            DicomPixelType::U16 => "uint16",
        }
    }

    pub fn bits_allocated(&self) -> u16 {
        match self {
            DicomPixelType::U8 => 8,
            DicomPixelType::I16 | DicomPixelType::U16 => 16,
        }
    }

    /// Value of the PixelRepresentation attribute.
    pub fn pixel_representation(&self) -> u16 {
        match self {
            DicomPixelType::I16 => 1,
            DicomPixelType::U8 | DicomPixelType::U16 => 0,
        }
    }

    /// Whether `value` is an integer in the range of the type.
    pub fn can_store(&self, value: f32) -> bool {
        let (min, max) = match self {
            DicomPixelType::U8 => (u8::MIN as f32, u8::MAX as f32),
            DicomPixelType::I16 => (i16::MIN as f32, i16::MAX as f32),
            DicomPixelType::U16 => (u16::MIN as f32, u16::MAX as f32),
        };
        value.fract() == 0.0 && (min..=max).contains(&value)
    }
}

impl TryFrom<DType> for DicomPixelType {
    type Error = ArrayError;

    fn try_from(dtype: DType) -> Result<Self, Self::Error> {
        match dtype {
            DType::U8 => Ok(DicomPixelType::U8),
            DType::I16 => Ok(DicomPixelType::I16),
            DType::U16 => Ok(DicomPixelType::U16),
            other => Err(ArrayError::UnsupportedDicomDType(other.as_str())),
        }
    }
}

/// What is being exported, which decides the allowed pixel types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DicomExportKind {
    /// Multi-component (e.g. RGB) image
    Vector,
    SingleFile2d,
    SingleFile3d,
    Series,
}

impl DicomExportKind {
    /// Kind of a single file export for an array of `shape`.
    ///
    /// Axes of length 1 are ignored when telling 2D from 3D.
    pub fn single_file(shape: &[usize], is_vector: bool) -> Self {
        if is_vector {
            DicomExportKind::Vector
        } else if shape.iter().filter(|&&len| len > 1).count() <= 2 {
            DicomExportKind::SingleFile2d
        } else {
            DicomExportKind::SingleFile3d
        }
    }

    /// Pixel types in order of preference.
    pub fn candidates(&self) -> &'static [DicomPixelType] {
        match self {
            DicomExportKind::Vector => &[DicomPixelType::U8],
            DicomExportKind::SingleFile2d => {
                &[DicomPixelType::I16, DicomPixelType::U8, DicomPixelType::U16]
            }
            DicomExportKind::SingleFile3d => &[DicomPixelType::U8, DicomPixelType::U16],
            DicomExportKind::Series => {
                &[DicomPixelType::I16, DicomPixelType::U16, DicomPixelType::U8]
            }
        }
    }
}

/// First pixel type of `kind` that stores every value exactly.
pub fn select_dicom_pixel_type(
    values: ArrayViewD<'_, f32>,
    kind: DicomExportKind,
) -> Result<DicomPixelType, ArrayError> {
    let candidates = kind.candidates();
    candidates
        .iter()
        .copied()
        .find(|pixel_type| values.view().into_par_iter().all(|&value| pixel_type.can_store(value)))
        .ok_or_else(|| ArrayError::UnsupportedPixelValues {
            candidates: candidates.iter().map(DicomPixelType::name).collect(),
        })
}
