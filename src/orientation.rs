//! Orientation codes: three letters over `{R, L, A, P, I, S}`, one per axis,
//! one from each anatomical pair.
//!
//! The numeric form packs the three axis values into one integer, as the
//! ITK orientation filter expects (`itkSpatialOrientation.h`).

use nalgebra::DMatrix;

use crate::error::GeometryError;

/// Anatomical axis direction, valued as in ITK's spatial orientation terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AxCode {
    /// Right
    R = 2,
    /// Left
    L = 3,
    /// Posterior
    P = 4,
    /// Anterior
    A = 5,
    /// Inferior
    I = 8,
    /// Superior
    S = 9,
}

/// Numeric code meaning that no orientation was requested.
pub const NO_ORIENTATION: u32 = 0;

const PRIMARY_SHIFT: u32 = 0;
const SECONDARY_SHIFT: u32 = 8;
const TERTIARY_SHIFT: u32 = 16;

impl AxCode {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'R' => Some(AxCode::R),
            'L' => Some(AxCode::L),
            'P' => Some(AxCode::P),
            'A' => Some(AxCode::A),
            'I' => Some(AxCode::I),
            'S' => Some(AxCode::S),
            _ => None,
        }
    }

    fn from_value(value: u32) -> Option<Self> {
        match value {
            2 => Some(AxCode::R),
            3 => Some(AxCode::L),
            4 => Some(AxCode::P),
            5 => Some(AxCode::A),
            8 => Some(AxCode::I),
            9 => Some(AxCode::S),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            AxCode::R => 'R',
            AxCode::L => 'L',
            AxCode::P => 'P',
            AxCode::A => 'A',
            AxCode::I => 'I',
            AxCode::S => 'S',
        }
    }

    pub fn value(self) -> u32 {
        self as u32
    }

    /// The other letter of the same anatomical pair.
    pub fn opposite(self) -> Self {
        match self {
            AxCode::R => AxCode::L,
            AxCode::L => AxCode::R,
            AxCode::P => AxCode::A,
            AxCode::A => AxCode::P,
            AxCode::I => AxCode::S,
            AxCode::S => AxCode::I,
        }
    }

    /// Physical axis of the pair: 0 for R/L, 1 for A/P, 2 for I/S.
    pub fn axis(self) -> usize {
        match self {
            AxCode::R | AxCode::L => 0,
            AxCode::A | AxCode::P => 1,
            AxCode::I | AxCode::S => 2,
        }
    }

    /// Unit direction of the letter in the ITK convention.
    pub fn unit_vector(self) -> [f64; 3] {
        match self {
            AxCode::R => [1.0, 0.0, 0.0],
            AxCode::L => [-1.0, 0.0, 0.0],
            AxCode::A => [0.0, 1.0, 0.0],
            AxCode::P => [0.0, -1.0, 0.0],
            AxCode::I => [0.0, 0.0, 1.0],
            AxCode::S => [0.0, 0.0, -1.0],
        }
    }

    /// Letter of a physical axis pointing to its positive (`true`) or
    /// negative side, in the NIB convention.
    fn from_nib_axis(axis: usize, positive: bool) -> Self {
        match (axis, positive) {
            (0, true) => AxCode::R,
            (0, false) => AxCode::L,
            (1, true) => AxCode::A,
            (1, false) => AxCode::P,
            (_, true) => AxCode::S,
            (_, false) => AxCode::I,
        }
    }
}

fn invalid(code: &str, reason: &'static str) -> GeometryError {
    GeometryError::InvalidOrientationCode {
        code: code.to_string(),
        reason,
    }
}

/// Parse a 2 or 3 letter code, with at most one letter of each pair.
pub fn parse_axis_codes(code: &str) -> Result<Vec<AxCode>, GeometryError> {
    let axes = code
        .chars()
        .map(|c| AxCode::from_char(c).ok_or_else(|| invalid(code, "unknown axis letter")))
        .collect::<Result<Vec<_>, _>>()?;
    if !(2..=3).contains(&axes.len()) {
        return Err(invalid(code, "expected 2 or 3 letters"));
    }
    let mut seen = [false; 3];
    for ax in &axes {
        if std::mem::replace(&mut seen[ax.axis()], true) {
            return Err(invalid(code, "repeated anatomical axis"));
        }
    }
    Ok(axes)
}

/// Parse a 3D orientation code.
pub fn parse_orientation(code: &str) -> Result<[AxCode; 3], GeometryError> {
    match parse_axis_codes(code)?.as_slice() {
        &[a, b, c] => Ok([a, b, c]),
        _ => Err(invalid(code, "expected 3 letters")),
    }
}

/// Pack a 3 letter orientation into ITK's numeric code.
pub fn encode(code: &str) -> Result<u32, GeometryError> {
    let [primary, secondary, tertiary] = parse_orientation(code)?;
    Ok((primary.value() << PRIMARY_SHIFT)
        + (secondary.value() << SECONDARY_SHIFT)
        + (tertiary.value() << TERTIARY_SHIFT))
}

/// Inverse of [`encode`]. [`NO_ORIENTATION`] decodes to `None`.
pub fn decode(code: u32) -> Result<Option<String>, GeometryError> {
    if code == NO_ORIENTATION {
        return Ok(None);
    }
    let invalid_numeric = || GeometryError::InvalidOrientationCode {
        code: code.to_string(),
        reason: "not a valid numeric orientation",
    };
    if code >> 24 != 0 {
        return Err(invalid_numeric());
    }
    let letters = [PRIMARY_SHIFT, SECONDARY_SHIFT, TERTIARY_SHIFT]
        .iter()
        .map(|shift| AxCode::from_value((code >> shift) & 0xff).map(AxCode::as_char))
        .collect::<Option<String>>()
        .ok_or_else(invalid_numeric)?;
    parse_orientation(&letters).map_err(|_| invalid_numeric())?;
    Ok(Some(letters))
}

/// All 48 valid 3D orientation codes.
pub fn all_orientations() -> Vec<String> {
    const PERMUTATIONS: [[usize; 3]; 6] = [
        [0, 1, 2],
        [0, 2, 1],
        [1, 0, 2],
        [1, 2, 0],
        [2, 0, 1],
        [2, 1, 0],
    ];
    let mut codes = Vec::with_capacity(48);
    for x in [AxCode::R, AxCode::L] {
        for y in [AxCode::A, AxCode::P] {
            for z in [AxCode::I, AxCode::S] {
                let letters = [x, y, z];
                for permutation in PERMUTATIONS {
                    codes.push(permutation.iter().map(|&i| letters[i].as_char()).collect());
                }
            }
        }
    }
    codes
}

/// Direction matrix whose columns are the ITK unit vectors of the letters.
///
/// A 2 letter code gives a 2x2 matrix over the first two physical axes.
pub fn direction_from_orientation(code: &str) -> Result<DMatrix<f64>, GeometryError> {
    let axes = parse_axis_codes(code)?;
    let d = axes.len();
    if d == 2 && axes.iter().any(|ax| ax.axis() == 2) {
        return Err(invalid(code, "2D codes use R/L and A/P only"));
    }
    Ok(DMatrix::from_fn(d, d, |i, j| axes[j].unit_vector()[i]))
}

/// Inverse of [`direction_from_orientation`]: the ITK letter of the largest
/// component of each column.
pub fn orientation_from_direction(direction: &DMatrix<f64>) -> String {
    nib_axes(direction)
        .into_iter()
        .map(|ax| match ax {
            AxCode::I | AxCode::S => ax.opposite(),
            other => other,
        })
        .map(AxCode::as_char)
        .collect()
}

/// NIB convention axes of a direction (or linear affine) matrix.
///
/// Each column is assigned the physical axis of its largest component; when
/// two columns compete for the same axis the larger component wins and the
/// other column takes its next largest free axis.
pub fn nib_axes(direction: &DMatrix<f64>) -> Vec<AxCode> {
    let d = direction.ncols().min(direction.nrows());
    let mut assigned: Vec<Option<AxCode>> = vec![None; d];
    let mut free_rows = vec![true; d];
    for _ in 0..d {
        let mut best: Option<(usize, usize, f64)> = None;
        for (j, slot) in assigned.iter().enumerate() {
            if slot.is_some() {
                continue;
            }
            for (i, &free) in free_rows.iter().enumerate() {
                let value = direction[(i, j)];
                if free && best.is_none_or(|(_, _, b)| value.abs() > b.abs()) {
                    best = Some((i, j, value));
                }
            }
        }
        if let Some((i, j, value)) = best {
            assigned[j] = Some(AxCode::from_nib_axis(i, value >= 0.0));
            free_rows[i] = false;
        }
    }
    assigned.into_iter().flatten().collect()
}

/// [`nib_axes`] as a string.
pub fn nib_axis_codes(direction: &DMatrix<f64>) -> String {
    nib_axes(direction).into_iter().map(AxCode::as_char).collect()
}
