use thiserror::Error;

/// Errors raised by the affine, orientation and metadata core.
///
/// None of these are transient: they describe invalid input or data, and it
/// is up to the caller to decide and call again with corrected parameters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("Invalid coordinate system '{0}', expected 'itk' or 'nib'")]
    InvalidCoordinateSystem(String),

    #[error("Invalid orientation code '{code}': {reason}")]
    InvalidOrientationCode { code: String, reason: &'static str },

    #[error("Degenerate affine: spacing of axis {axis} is zero")]
    DegenerateAffine { axis: usize },

    #[error("Dimension mismatch in {context}: expected {expected}, found {found}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    #[error(
        "Orientation '{orientation}' is left-handed and cannot be saved as DICOM; \
         allow reorientation to save it as '{suggested}'"
    )]
    LeftHandedOrientationRejected {
        orientation: String,
        suggested: String,
    },
}

/// Errors raised while manipulating image arrays (axes, slices, pixel types).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArrayError {
    #[error("Axis {axis} is out of bounds for an array with {ndim} dimensions")]
    AxisOutOfBounds { axis: isize, ndim: usize },

    #[error("Invalid planar configuration: {0}")]
    InvalidPlanarConfiguration(u16),

    #[error("The original channels axis was not detected in shape {shape:?}")]
    ChannelsAxisNotFound { shape: Vec<usize> },

    #[error("Slice step cannot be zero")]
    ZeroStep,

    #[error("Too many indices: {found} for an array with {ndim} dimensions")]
    TooManyIndices { found: usize, ndim: usize },

    #[error("Index {index} is out of bounds for axis {axis} with size {len}")]
    IndexOutOfBounds { index: isize, axis: usize, len: usize },

    #[error(
        "Pixel values cannot be stored exactly as any of {candidates:?}; \
         for negative values try saving a DICOM series"
    )]
    UnsupportedPixelValues { candidates: Vec<&'static str> },

    #[error("Unknown data type '{0}'")]
    UnknownDType(String),

    #[error("DICOM pixel data cannot be stored as {0}")]
    UnsupportedDicomDType(&'static str),
}

/// Errors of operations on a whole image: array and metadata together.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ImageError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Array(#[from] ArrayError),
}
