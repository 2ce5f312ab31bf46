use approx::assert_abs_diff_eq;
use medio::convert::invert_axis_codes;
use medio::dicom_compat::is_right_handed_orientation;
use medio::orientation::{all_orientations, decode, direction_from_orientation, encode};
use medio::{Affine, CoordSys, Metadata};
use nalgebra::{DMatrix, DVector};

fn metadata_of(code: &str, coord_sys: CoordSys) -> Metadata {
    let affine = Affine::new(
        direction_from_orientation(code).unwrap(),
        DVector::from_vec(vec![0.7, 1.3, 2.5]),
        DVector::from_vec(vec![-30.0, 12.5, 80.0]),
    )
    .unwrap();
    Metadata::new(affine, None, coord_sys, None).unwrap()
}

#[test]
fn orientation_of_every_itk_direction() {
    for code in all_orientations() {
        let metadata = metadata_of(&code, CoordSys::Itk);
        assert_eq!(metadata.ornt(), code);
    }
}

#[test]
fn conversion_inverts_every_letter() {
    for code in all_orientations() {
        let mut metadata = metadata_of(&code, CoordSys::Itk);
        metadata.convert(CoordSys::Nib).unwrap();
        assert_eq!(metadata.ornt(), invert_axis_codes(&code).unwrap());
        // the cache matches a fresh derivation from the converted affine
        assert_eq!(metadata.get_orientation(), metadata.ornt());
    }
}

#[test]
fn conversion_round_trip_keeps_the_affine() {
    let (s, c) = 0.4f64.sin_cos();
    let direction = DMatrix::from_row_slice(3, 3, &[c, 0.0, -s, 0.0, 1.0, 0.0, s, 0.0, c]);
    let affine = Affine::new(
        direction,
        DVector::from_vec(vec![1.0, 2.0, 3.0]),
        DVector::from_vec(vec![4.0, 5.0, 6.0]),
    )
    .unwrap();
    for coord_sys in [CoordSys::Itk, CoordSys::Nib] {
        let metadata = Metadata::new(affine.clone(), None, coord_sys, None).unwrap();
        let back = metadata
            .converted(coord_sys.other())
            .unwrap()
            .converted(coord_sys)
            .unwrap();
        assert_abs_diff_eq!(
            back.affine().matrix().clone(),
            affine.matrix().clone(),
            epsilon = 1e-12
        );
        assert_eq!(back.ornt(), metadata.ornt());
    }
}

#[test]
fn handedness_agrees_with_the_determinant() {
    for code in all_orientations() {
        let metadata = metadata_of(&code, CoordSys::Itk);
        assert_eq!(
            is_right_handed_orientation(&code).unwrap(),
            metadata.is_right_handed().unwrap(),
            "{code}"
        );
    }
}

#[test]
fn numeric_codes_round_trip() {
    for code in all_orientations() {
        let value = encode(&code).unwrap();
        assert_eq!(decode(value).unwrap().as_deref(), Some(code.as_str()));
    }
    assert_eq!(decode(0).unwrap(), None);
}

#[test]
fn physical_transform_survives_conversion() {
    let metadata = metadata_of("SPL", CoordSys::Itk);
    let converted = metadata.converted(CoordSys::Nib).unwrap();
    let index = DVector::from_vec(vec![3.0, 1.0, 4.0]);
    let itk = metadata.affine().index_to_coord(&index).unwrap();
    let nib = converted.affine().index_to_coord(&index).unwrap();
    // the two conventions differ by the sign of the first two axes
    assert_abs_diff_eq!(
        nib,
        DVector::from_vec(vec![-itk[0], -itk[1], itk[2]]),
        epsilon = 1e-12
    );
}
