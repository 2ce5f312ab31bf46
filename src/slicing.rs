//! Explicit basic slicing of image arrays.
//!
//! A slicing key is a sequence of [`SliceArg`] with the semantics of basic
//! indexing of n-dimensional arrays: negative indices count from the end,
//! ranges are clamped to the axis and steps may be negative. Unlike integer
//! indexing of such arrays, an [`SliceArg::Index`] keeps its axis with length
//! 1, so that a sliced image keeps the dimension of its affine.

use nalgebra::DVector;
use ndarray::{ArrayD, Slice};

use crate::affine::Affine;
use crate::error::{ArrayError, GeometryError, ImageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceArg {
    Index(isize),
    Range {
        start: Option<isize>,
        stop: Option<isize>,
        step: isize,
    },
    /// The whole axis, `..`
    Full,
    /// As many full axes as needed to index every axis
    Ellipsis,
}

impl SliceArg {
    /// `start..stop` with a step of 1.
    pub fn range(start: Option<isize>, stop: Option<isize>) -> Self {
        SliceArg::Range { start, stop, step: 1 }
    }

    /// The whole axis with `step`.
    pub fn step(step: isize) -> Self {
        SliceArg::Range {
            start: None,
            stop: None,
            step,
        }
    }
}

/// Start, stop and stride of every axis selected by a slicing key.
///
/// `stop` is exclusive and may be `-1` for a negative stride that runs down
/// to the first element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplicitIndices {
    pub start: Vec<isize>,
    pub stop: Vec<isize>,
    pub stride: Vec<isize>,
}

impl ExplicitIndices {
    /// Number of elements selected along `axis`.
    pub fn len_of(&self, axis: usize) -> usize {
        let (start, stop, stride) = (self.start[axis], self.stop[axis], self.stride[axis]);
        let len = if stride > 0 {
            (stop - start + stride - 1) / stride
        } else {
            (start - stop - stride - 1) / -stride
        };
        len.max(0) as usize
    }

    /// The selection of `axis` as an ndarray slice.
    pub fn as_slice(&self, axis: usize) -> Slice {
        let (start, stride) = (self.start[axis], self.stride[axis]);
        match self.len_of(axis) {
            0 => Slice::new(0, Some(0), 1),
            _ if stride > 0 => Slice::new(start, Some(self.stop[axis]), stride),
            // ndarray counts negative steps from the end of the range
            len => {
                let last = start + (len as isize - 1) * stride;
                Slice::new(last, Some(start + 1), stride)
            }
        }
    }
}

fn resolve_range(
    start: Option<isize>,
    stop: Option<isize>,
    step: isize,
    len: usize,
) -> Result<(isize, isize), ArrayError> {
    if step == 0 {
        return Err(ArrayError::ZeroStep);
    }
    let len = len as isize;
    let (lower, upper) = if step > 0 { (0, len) } else { (-1, len - 1) };
    let clamp = |bound: isize| {
        if bound < 0 {
            (bound + len).max(lower)
        } else {
            bound.min(upper)
        }
    };
    let start = start.map_or(if step > 0 { lower } else { upper }, clamp);
    let stop = stop.map_or(if step > 0 { upper } else { lower }, clamp);
    Ok((start, stop))
}

/// Make a slicing key explicit for an array of `shape`.
///
/// Axes not covered by the key are selected whole.
///
/// # Errors
///
/// Fails on a zero step, an index out of bounds, or a key that indexes more
/// axes than `shape` has.
pub fn explicit_indices(args: &[SliceArg], shape: &[usize]) -> Result<ExplicitIndices, ArrayError> {
    let ndim = shape.len();
    let indexing = args.iter().filter(|arg| **arg != SliceArg::Ellipsis).count();
    if indexing > ndim {
        return Err(ArrayError::TooManyIndices {
            found: indexing,
            ndim,
        });
    }

    let mut explicit = ExplicitIndices {
        start: vec![0; ndim],
        stop: shape.iter().map(|&len| len as isize).collect(),
        stride: vec![1; ndim],
    };
    let mut update = |axis: usize, arg: &SliceArg| -> Result<(), ArrayError> {
        let len = shape[axis];
        match *arg {
            SliceArg::Index(index) => {
                let resolved = if index < 0 { index + len as isize } else { index };
                if !(0..len as isize).contains(&resolved) {
                    return Err(ArrayError::IndexOutOfBounds { index, axis, len });
                }
                explicit.start[axis] = resolved;
                explicit.stop[axis] = resolved + 1;
            }
            SliceArg::Range { start, stop, step } => {
                let (start, stop) = resolve_range(start, stop, step, len)?;
                explicit.start[axis] = start;
                explicit.stop[axis] = stop;
                explicit.stride[axis] = step;
            }
            SliceArg::Full | SliceArg::Ellipsis => {}
        }
        Ok(())
    };

    match args.iter().position(|arg| *arg == SliceArg::Ellipsis) {
        Some(ellipsis) => {
            for (axis, arg) in args[..ellipsis].iter().enumerate() {
                update(axis, arg)?;
            }
            // the key after the ellipsis indexes the last axes
            let trailing = args[ellipsis + 1..]
                .iter()
                .filter(|arg| **arg != SliceArg::Ellipsis);
            for (offset, arg) in trailing.rev().enumerate() {
                update(ndim - 1 - offset, arg)?;
            }
        }
        None => {
            for (axis, arg) in args.iter().enumerate() {
                update(axis, arg)?;
            }
        }
    }
    Ok(explicit)
}

/// Apply explicit indices to `array`.
pub fn slice_array<A: Clone>(array: &ArrayD<A>, indices: &ExplicitIndices) -> ArrayD<A> {
    array
        .slice_each_axis(|ax| indices.as_slice(ax.axis.index()))
        .to_owned()
}

/// Affine of the sub-array selected by `indices`: the origin moves to the
/// first selected voxel and the spacing is multiplied by the stride.
///
/// Indices of axes beyond the affine dimension (channels) are ignored.
pub fn slice_affine(affine: &Affine, indices: &ExplicitIndices) -> Result<Affine, ImageError> {
    let d = affine.dim();
    if indices.start.len() < d {
        return Err(GeometryError::DimensionMismatch {
            context: "sliced axes",
            expected: d,
            found: indices.start.len(),
        }
        .into());
    }
    let start = DVector::from_iterator(d, indices.start[..d].iter().map(|&i| i as f64));
    let stride = DVector::from_iterator(d, indices.stride[..d].iter().map(|&s| s as f64));

    let mut sliced = affine.clone();
    sliced.set_origin(&affine.index_to_coord(&start)?)?;
    sliced.set_spacing(&affine.spacing().component_mul(&stride))?;
    Ok(sliced)
}
