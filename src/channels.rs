//! Moving the channels (samples per pixel) axis of multi-component images.

use ndarray::ArrayD;

use crate::error::ArrayError;

/// Resolve a possibly negative axis index against `ndim` dimensions.
pub fn normalize_axis(axis: isize, ndim: usize) -> Result<usize, ArrayError> {
    let resolved = if axis < 0 { axis + ndim as isize } else { axis };
    if (0..ndim as isize).contains(&resolved) {
        Ok(resolved as usize)
    } else {
        Err(ArrayError::AxisOutOfBounds { axis, ndim })
    }
}

/// Move axis `source` of `array` to position `destination`, keeping the
/// order of the other axes. Negative indices count from the end.
pub fn move_axis<A>(array: ArrayD<A>, source: isize, destination: isize) -> Result<ArrayD<A>, ArrayError> {
    let ndim = array.ndim();
    let source = normalize_axis(source, ndim)?;
    let destination = normalize_axis(destination, ndim)?;
    if source == destination {
        return Ok(array);
    }
    let mut order: Vec<usize> = (0..ndim).filter(|&axis| axis != source).collect();
    order.insert(destination, source);
    Ok(array.permuted_axes(order))
}

/// Move the channels axis of a DICOM pixel array to `channels_axis`.
///
/// The original axis is taken from `default_axes` according to the planar
/// configuration; if its length does not match `samples_per_pixel` the
/// first axis that does is used instead. Single sample images, or a
/// `channels_axis` of `None`, are returned unchanged.
pub fn move_channels_axis<A>(
    array: ArrayD<A>,
    samples_per_pixel: usize,
    channels_axis: Option<isize>,
    planar_configuration: Option<u16>,
    default_axes: (isize, isize),
) -> Result<ArrayD<A>, ArrayError> {
    let Some(channels_axis) = channels_axis else {
        return Ok(array);
    };
    if samples_per_pixel <= 1 {
        return Ok(array);
    }

    let default_axis = match planar_configuration {
        // interleaved samples when the attribute is missing
        None | Some(0) => default_axes.0,
        Some(1) => default_axes.1,
        Some(other) => return Err(ArrayError::InvalidPlanarConfiguration(other)),
    };
    let shape = array.shape().to_vec();
    let default_axis = normalize_axis(default_axis, shape.len())?;
    let original_axis = if shape[default_axis] == samples_per_pixel {
        default_axis
    } else {
        shape
            .iter()
            .position(|&len| len == samples_per_pixel)
            .ok_or(ArrayError::ChannelsAxisNotFound { shape: shape.clone() })?
    };

    move_axis(array, original_axis as isize, channels_axis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    fn zeros(shape: &[usize]) -> ArrayD<u8> {
        ArrayD::zeros(IxDyn(shape))
    }

    #[test]
    fn move_axis_like_numpy() {
        let array = zeros(&[2, 3, 4, 5]);
        assert_eq!(move_axis(array.clone(), 0, -1).unwrap().shape(), &[3, 4, 5, 2]);
        assert_eq!(move_axis(array.clone(), -1, 0).unwrap().shape(), &[5, 2, 3, 4]);
        assert_eq!(move_axis(array.clone(), 1, 2).unwrap().shape(), &[2, 4, 3, 5]);
        assert_eq!(
            move_axis(array, 4, 0),
            Err(ArrayError::AxisOutOfBounds { axis: 4, ndim: 4 })
        );
    }

    #[test]
    fn move_axis_keeps_values() {
        let array = ArrayD::from_shape_fn(IxDyn(&[2, 3, 4]), |idx| (idx[0] * 100 + idx[1] * 10 + idx[2]) as u32);
        let moved = move_axis(array.clone(), 0, -1).unwrap();
        assert_eq!(moved[IxDyn(&[2, 3, 1])], array[IxDyn(&[1, 2, 3])]);
    }

    #[test]
    fn channels_follow_planar_configuration() {
        // interleaved samples, channels last by default
        let moved = move_channels_axis(zeros(&[4, 5, 6, 3]), 3, Some(0), Some(0), (-1, 0)).unwrap();
        assert_eq!(moved.shape(), &[3, 4, 5, 6]);
        // planar samples, channels first by default
        let moved = move_channels_axis(zeros(&[3, 4, 5, 6]), 3, Some(-1), Some(1), (-1, 0)).unwrap();
        assert_eq!(moved.shape(), &[4, 5, 6, 3]);
    }

    #[test]
    fn channels_are_searched_when_default_does_not_match() {
        let moved = move_channels_axis(zeros(&[4, 3, 6]), 3, Some(-1), Some(0), (0, 2)).unwrap();
        assert_eq!(moved.shape(), &[4, 6, 3]);
        assert_eq!(
            move_channels_axis(zeros(&[4, 5, 6]), 3, Some(-1), Some(0), (0, 2)),
            Err(ArrayError::ChannelsAxisNotFound { shape: vec![4, 5, 6] })
        );
    }

    #[test]
    fn single_sample_images_are_untouched() {
        let moved = move_channels_axis(zeros(&[4, 5, 6]), 1, Some(0), None, (0, 2)).unwrap();
        assert_eq!(moved.shape(), &[4, 5, 6]);
        assert_eq!(
            move_channels_axis(zeros(&[4, 5, 3]), 3, Some(0), Some(2), (0, 2)),
            Err(ArrayError::InvalidPlanarConfiguration(2))
        );
    }
}
