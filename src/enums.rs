use std::fmt;
use std::str::FromStr;

use crate::error::{ArrayError, GeometryError};

/// Geometric convention of an affine and its orientation codes.
///
/// In `Nib` each orientation letter names the direction an axis points to
/// (RAS+: L -> R, P -> A, I -> S). `Itk` uses the converse, so the same image
/// is `LPI` in one and `RAS` in the other. DICOM patient coordinates follow
/// the `Itk` convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CoordSys {
    #[default]
    Itk,
    Nib,
}

impl CoordSys {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoordSys::Itk => "itk",
            CoordSys::Nib => "nib",
        }
    }

    /// The other convention.
    pub fn other(&self) -> Self {
        match self {
            CoordSys::Itk => CoordSys::Nib,
            CoordSys::Nib => CoordSys::Itk,
        }
    }
}

impl FromStr for CoordSys {
    type Err = GeometryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "itk" => Ok(CoordSys::Itk),
            "nib" => Ok(CoordSys::Nib),
            other => Err(GeometryError::InvalidCoordinateSystem(other.to_string())),
        }
    }
}

impl fmt::Display for CoordSys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Image file backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// NIfTI files through the `nifti` crate, `nib` convention.
    Nifti,
    /// DICOM files and series through dicom-rs, `itk` convention.
    Dicom,
}

impl Backend {
    /// The convention the backend reads and writes natively.
    pub fn coord_sys(&self) -> CoordSys {
        match self {
            Backend::Nifti => CoordSys::Nib,
            Backend::Dicom => CoordSys::Itk,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    /// Position of each slice projected on the slice normal
    #[default]
    ImagePositionPatient,
    InstanceNumber,
    None,
}

/// Which series to read from a directory holding more than one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeriesSelector {
    Uid(String),
    /// Index into the series UIDs sorted lexicographically
    Index(usize),
}

/// Element type pixel values are cast to when reading, or stored as when
/// saving.
///
/// Arrays stay `f32`: a cast truncates toward zero and saturates at the
/// bounds of the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    U8,
    I8,
    U16,
    I16,
    I32,
    F32,
}

impl DType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DType::U8 => "uint8",
            DType::I8 => "int8",
            DType::U16 => "uint16",
            DType::I16 => "int16",
            DType::I32 => "int32",
            DType::F32 => "float32",
        }
    }

    /// `value` as the nearest value this type holds.
    pub fn cast(&self, value: f32) -> f32 {
        match self {
            DType::U8 => value as u8 as f32,
            DType::I8 => value as i8 as f32,
            DType::U16 => value as u16 as f32,
            DType::I16 => value as i16 as f32,
            DType::I32 => value as i32 as f32,
            DType::F32 => value,
        }
    }
}

impl FromStr for DType {
    type Err = ArrayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uint8" => Ok(DType::U8),
            "int8" => Ok(DType::I8),
            "uint16" => Ok(DType::U16),
            "int16" => Ok(DType::I16),
            "int32" => Ok(DType::I32),
            "float32" => Ok(DType::F32),
            other => Err(ArrayError::UnknownDType(other.to_string())),
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn casts_truncate_and_saturate() {
        assert_eq!(DType::U8.cast(300.0), 255.0);
        assert_eq!(DType::U8.cast(-4.0), 0.0);
        assert_eq!(DType::I16.cast(-2.7), -2.0);
        assert_eq!(DType::I8.cast(12.9), 12.0);
        assert_eq!(DType::F32.cast(0.25), 0.25);
    }

    #[test]
    fn dtype_names() {
        for dtype in [DType::U8, DType::I8, DType::U16, DType::I16, DType::I32, DType::F32] {
            assert_eq!(dtype.to_string().parse::<DType>().unwrap(), dtype);
        }
        assert!(matches!("float64".parse::<DType>(), Err(ArrayError::UnknownDType(_))));
    }
}
