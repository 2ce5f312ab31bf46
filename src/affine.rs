use std::fmt;

use nalgebra::{DMatrix, DVector};

use crate::error::GeometryError;

/// Map from voxel indices to physical coordinates: `y = M * x + origin`,
/// with `M = direction * diag(spacing)`.
///
/// The homogeneous `(d+1)x(d+1)` matrix is the source of truth; direction and
/// spacing are kept next to it so that they do not have to be decomposed on
/// every access. Only `d = 2` and `d = 3` are supported.
///
/// ```
/// # use medio::affine::Affine;
/// # use nalgebra::{DMatrix, DVector};
/// let affine = Affine::new(
///     DMatrix::identity(3, 3),
///     DVector::from_vec(vec![0.33, 1.0, 0.33]),
///     DVector::from_vec(vec![-90.3, 10.0, 1.44]),
/// )
/// .unwrap();
/// let coord = affine.index_to_coord(&DVector::from_vec(vec![4.0, 2.0, 9.0])).unwrap();
/// assert!((coord[1] - 12.0).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Affine {
    matrix: DMatrix<f64>,
    direction: DMatrix<f64>,
    spacing: DVector<f64>,
}

impl Affine {
    /// Build an affine from its components.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::DimensionMismatch`] if `direction` is not a
    /// square 2x2 or 3x3 matrix or if `spacing`/`origin` do not match its size.
    pub fn new(
        direction: DMatrix<f64>,
        spacing: DVector<f64>,
        origin: DVector<f64>,
    ) -> Result<Self, GeometryError> {
        let matrix = Self::construct(&direction, &spacing, &origin)?;
        let mut affine = Self {
            matrix,
            direction,
            spacing,
        };
        // keep the sign of negative spacings in the direction
        let spacing = affine.spacing.clone();
        affine.set_spacing(&spacing)?;
        Ok(affine)
    }

    /// Build an affine from a homogeneous `(d+1)x(d+1)` matrix.
    ///
    /// The last row is reset to `[0, ..., 0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::DegenerateAffine`] when an axis has zero
    /// spacing, since its direction cannot be recovered.
    pub fn from_matrix(matrix: DMatrix<f64>) -> Result<Self, GeometryError> {
        let mut matrix = matrix;
        Self::check_homogeneous_shape(&matrix)?;
        let d = matrix.nrows() - 1;
        for j in 0..d {
            matrix[(d, j)] = 0.0;
        }
        matrix[(d, d)] = 1.0;

        let (direction, spacing, _) = Self::decompose(&matrix)?;
        Ok(Self {
            matrix,
            direction,
            spacing,
        })
    }

    /// Identity direction, unit spacing and zero origin.
    pub fn identity(dim: usize) -> Result<Self, GeometryError> {
        Self::new(
            DMatrix::identity(dim, dim),
            DVector::from_element(dim, 1.0),
            DVector::zeros(dim),
        )
    }

    /// Homogeneous matrix with `direction * diag(spacing)` in the upper left
    /// block and `origin` in the last column.
    pub fn construct(
        direction: &DMatrix<f64>,
        spacing: &DVector<f64>,
        origin: &DVector<f64>,
    ) -> Result<DMatrix<f64>, GeometryError> {
        let d = direction.nrows();
        if direction.ncols() != d {
            return Err(GeometryError::DimensionMismatch {
                context: "direction columns",
                expected: d,
                found: direction.ncols(),
            });
        }
        Self::check_dim(d)?;
        Self::check_len("spacing", d, spacing.len())?;
        Self::check_len("origin", d, origin.len())?;

        let mut matrix = DMatrix::identity(d + 1, d + 1);
        matrix
            .view_mut((0, 0), (d, d))
            .copy_from(&(direction * DMatrix::from_diagonal(spacing)));
        matrix.column_mut(d).rows_mut(0, d).copy_from(origin);
        Ok(matrix)
    }

    /// Split a homogeneous matrix into `(direction, spacing, origin)`.
    ///
    /// The spacing of axis `j` is the norm of column `j`.
    pub fn decompose(
        matrix: &DMatrix<f64>,
    ) -> Result<(DMatrix<f64>, DVector<f64>, DVector<f64>), GeometryError> {
        Self::check_homogeneous_shape(matrix)?;
        let d = matrix.nrows() - 1;
        let m = matrix.view((0, 0), (d, d)).into_owned();
        let spacing = DVector::from_iterator(d, m.column_iter().map(|column| column.norm()));
        if let Some(axis) = spacing.iter().position(|&s| s == 0.0) {
            return Err(GeometryError::DegenerateAffine { axis });
        }
        let direction = &m * DMatrix::from_diagonal(&spacing.map(|s| 1.0 / s));
        let origin = matrix.column(d).rows(0, d).into_owned();
        Ok((direction, spacing, origin))
    }

    /// Spatial dimension `d`.
    pub fn dim(&self) -> usize {
        self.direction.nrows()
    }

    /// The homogeneous matrix.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// The linear part `M = direction * diag(spacing)`.
    pub fn linear(&self) -> DMatrix<f64> {
        let d = self.dim();
        self.matrix.view((0, 0), (d, d)).into_owned()
    }

    pub fn origin(&self) -> DVector<f64> {
        let d = self.dim();
        self.matrix.column(d).rows(0, d).into_owned()
    }

    pub fn set_origin(&mut self, origin: &DVector<f64>) -> Result<(), GeometryError> {
        let d = self.dim();
        Self::check_len("origin", d, origin.len())?;
        self.matrix.column_mut(d).rows_mut(0, d).copy_from(origin);
        Ok(())
    }

    pub fn spacing(&self) -> &DVector<f64> {
        &self.spacing
    }

    /// Rescale the axes to `spacing`.
    ///
    /// Spacing is stored as an absolute value: a negative component flips the
    /// corresponding direction column instead.
    pub fn set_spacing(&mut self, spacing: &DVector<f64>) -> Result<(), GeometryError> {
        let d = self.dim();
        Self::check_len("spacing", d, spacing.len())?;
        for (j, &s) in spacing.iter().enumerate() {
            if s < 0.0 {
                let mut column = self.direction.column_mut(j);
                column.neg_mut();
            }
        }
        self.spacing = spacing.abs();
        self.update_linear();
        Ok(())
    }

    pub fn direction(&self) -> &DMatrix<f64> {
        &self.direction
    }

    pub fn set_direction(&mut self, direction: DMatrix<f64>) -> Result<(), GeometryError> {
        let d = self.dim();
        Self::check_len("direction rows", d, direction.nrows())?;
        Self::check_len("direction columns", d, direction.ncols())?;
        self.direction = direction;
        self.update_linear();
        Ok(())
    }

    /// Physical coordinates of a (possibly fractional) index.
    pub fn index_to_coord(&self, index: &DVector<f64>) -> Result<DVector<f64>, GeometryError> {
        let d = self.dim();
        Self::check_len("index", d, index.len())?;
        Ok(self.linear() * index + self.origin())
    }

    /// Left-multiply the homogeneous matrix by `diag(signs, 1)`.
    ///
    /// Flipping signs of whole rows keeps the column norms, so spacing is
    /// unchanged and no decomposition is needed.
    pub(crate) fn flip_rows(&self, signs: &[f64]) -> Self {
        let d = self.dim();
        let mut affine = self.clone();
        for (i, &sign) in signs.iter().enumerate().take(d) {
            if sign < 0.0 {
                affine.matrix.row_mut(i).neg_mut();
                affine.direction.row_mut(i).neg_mut();
            }
        }
        affine
    }

    fn update_linear(&mut self) {
        let d = self.dim();
        let linear = &self.direction * DMatrix::from_diagonal(&self.spacing);
        self.matrix.view_mut((0, 0), (d, d)).copy_from(&linear);
    }

    fn check_homogeneous_shape(matrix: &DMatrix<f64>) -> Result<(), GeometryError> {
        if matrix.nrows() != matrix.ncols() {
            return Err(GeometryError::DimensionMismatch {
                context: "affine matrix columns",
                expected: matrix.nrows(),
                found: matrix.ncols(),
            });
        }
        Self::check_dim(matrix.nrows().saturating_sub(1))
    }

    fn check_dim(d: usize) -> Result<(), GeometryError> {
        if d == 2 || d == 3 {
            Ok(())
        } else {
            Err(GeometryError::DimensionMismatch {
                context: "spatial dimension (2 or 3)",
                expected: 3,
                found: d,
            })
        }
    }

    fn check_len(context: &'static str, expected: usize, found: usize) -> Result<(), GeometryError> {
        if expected == found {
            Ok(())
        } else {
            Err(GeometryError::DimensionMismatch {
                context,
                expected,
                found,
            })
        }
    }
}

impl fmt::Display for Affine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.matrix)
    }
}
