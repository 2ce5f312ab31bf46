//! Conversion between the NIB and ITK conventions.
//!
//! Orientation: in NIB each letter names the direction an axis points to
//! (RAS+: L -> R, P -> A, I -> S); in ITK it is the converse (RAS: R -> L,
//! A -> P, S -> I).
//!
//! Affine: the ITK direction of a RAS image is `diag(1, 1, -1)`, the NIB
//! direction of the same image (LPI+) is `diag(-1, -1, -1)`. Flipping the
//! first two physical axes accounts for the difference for every
//! orientation, and works both ways.

use crate::affine::Affine;
use crate::error::GeometryError;
use crate::orientation::AxCode;

/// Replace every letter with its anatomical opposite, e.g. `SPL` -> `IAR`.
pub fn invert_axis_codes(code: &str) -> Result<String, GeometryError> {
    code.chars()
        .map(|c| {
            AxCode::from_char(c)
                .map(|ax| ax.opposite().as_char())
                .ok_or_else(|| GeometryError::InvalidOrientationCode {
                    code: code.to_string(),
                    reason: "unknown axis letter",
                })
        })
        .collect()
}

/// [`invert_axis_codes`] over an optional code; `None` stays `None`.
pub fn invert_optional(code: Option<&str>) -> Result<Option<String>, GeometryError> {
    code.map(invert_axis_codes).transpose()
}

/// Left-multiply the affine by `diag(-1, -1, 1[, 1])`. Self-inverse.
pub fn convert_affine(affine: &Affine) -> Affine {
    affine.flip_rows(&[-1.0, -1.0])
}

/// Convert an affine together with its orientation codes (typically the
/// current and the original orientation).
///
/// The codes must never be converted separately from their affine.
pub fn convert_full(
    affine: &Affine,
    codes: &[Option<&str>],
) -> Result<(Affine, Vec<Option<String>>), GeometryError> {
    let codes = codes
        .iter()
        .map(|code| invert_optional(*code))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((convert_affine(affine), codes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orientation::all_orientations;
    use nalgebra::{DMatrix, DVector};

    #[test]
    fn inversion_is_an_involution() {
        for code in all_orientations() {
            let inverted = invert_axis_codes(&code).unwrap();
            assert_ne!(inverted, code);
            assert_eq!(invert_axis_codes(&inverted).unwrap(), code);
        }
        assert_eq!(invert_axis_codes("SPL").unwrap(), "IAR");
        assert_eq!(invert_axis_codes("").unwrap(), "");
        assert_eq!(invert_optional(None).unwrap(), None);
        assert!(invert_axis_codes("RXS").is_err());
    }

    #[test]
    fn ras_itk_is_lpi_nib() {
        let itk = Affine::new(
            DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 1.0, -1.0])),
            DVector::from_vec(vec![1.0, 2.0, 3.0]),
            DVector::from_vec(vec![10.0, 20.0, 30.0]),
        )
        .unwrap();
        let nib = convert_affine(&itk);

        assert_eq!(
            nib.direction(),
            &DMatrix::from_diagonal(&DVector::from_vec(vec![-1.0, -1.0, -1.0]))
        );
        assert_eq!(nib.spacing(), itk.spacing());
        assert_eq!(nib.origin(), DVector::from_vec(vec![-10.0, -20.0, 30.0]));
        assert_eq!(convert_affine(&nib), itk);
    }

    #[test]
    fn two_dimensional_affines_flip_both_axes() {
        let affine = Affine::identity(2).unwrap();
        let converted = convert_affine(&affine);
        assert_eq!(converted.matrix()[(0, 0)], -1.0);
        assert_eq!(converted.matrix()[(1, 1)], -1.0);
        assert_eq!(converted.matrix()[(2, 2)], 1.0);
    }

    #[test]
    fn full_conversion_converts_every_code() {
        let affine = Affine::identity(3).unwrap();
        let (converted, codes) = convert_full(&affine, &[Some("RAI"), None, Some("LPS")]).unwrap();
        assert_eq!(converted, convert_affine(&affine));
        assert_eq!(
            codes,
            vec![Some("LPS".to_string()), None, Some("RAI".to_string())]
        );
    }
}
