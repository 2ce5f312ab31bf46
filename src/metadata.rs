use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::fmt;

use nalgebra::DVector;

use crate::affine::Affine;
use crate::convert::{convert_affine, convert_full};
use crate::enums::CoordSys;
use crate::error::GeometryError;
use crate::orientation::{AxCode, nib_axes, parse_axis_codes};

/// Backend specific key-value attributes of the source file.
pub type Header = BTreeMap<String, String>;

/// Spatial description of an image array: affine, coordinate system and
/// orientation before any reorientation.
///
/// The current orientation is derived from the affine on first access and
/// cached; only [`Metadata::convert`] rewrites it. The cache is not
/// synchronized, so a `Metadata` can be sent to another thread but not shared
/// between threads.
#[derive(Debug, Clone)]
pub struct Metadata {
    affine: Affine,
    coord_sys: CoordSys,
    orig_ornt: OnceCell<String>,
    ornt: OnceCell<String>,
    header: Option<Header>,
}

impl Metadata {
    /// # Arguments
    ///
    /// * `affine` - Affine in the `coord_sys` convention
    /// * `orig_ornt` - Orientation of the image before it was reoriented, if it was
    /// * `coord_sys` - Convention of `affine` and `orig_ornt`
    /// * `header` - Optional attributes read by the backend
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::InvalidOrientationCode`] if `orig_ornt` is not a
    /// valid orientation code.
    pub fn new(
        affine: Affine,
        orig_ornt: Option<String>,
        coord_sys: CoordSys,
        header: Option<Header>,
    ) -> Result<Self, GeometryError> {
        if let Some(code) = &orig_ornt {
            parse_axis_codes(code)?;
        }
        Ok(Self {
            affine,
            coord_sys,
            orig_ornt: orig_ornt.map(OnceCell::from).unwrap_or_default(),
            ornt: OnceCell::new(),
            header,
        })
    }

    pub fn affine(&self) -> &Affine {
        &self.affine
    }

    pub fn coord_sys(&self) -> CoordSys {
        self.coord_sys
    }

    pub fn spacing(&self) -> &DVector<f64> {
        self.affine.spacing()
    }

    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    pub fn set_header(&mut self, header: Option<Header>) {
        self.header = header;
    }

    /// Orientation derived from the affine, in the `coord_sys` convention.
    pub fn get_orientation(&self) -> String {
        let axes = match self.coord_sys {
            CoordSys::Nib => nib_axes(self.affine.direction()),
            CoordSys::Itk => nib_axes(convert_affine(&self.affine).direction())
                .into_iter()
                .map(AxCode::opposite)
                .collect(),
        };
        axes.into_iter().map(AxCode::as_char).collect()
    }

    /// Current orientation, computed once.
    ///
    /// The first computation also fills in the original orientation if it is
    /// unknown: the image has not been reoriented yet.
    pub fn ornt(&self) -> &str {
        let ornt = self.ornt.get_or_init(|| self.get_orientation());
        // already set means the image was reoriented from another orientation
        let _ = self.orig_ornt.set(ornt.clone());
        ornt
    }

    /// Orientation before reorientation; unknown until set or until
    /// [`Metadata::ornt`] is first called.
    pub fn orig_ornt(&self) -> Option<&str> {
        self.orig_ornt.get().map(String::as_str)
    }

    /// Convert the affine and the orientations in place to `dest`.
    ///
    /// The physical transform described by the metadata is unchanged.
    pub fn convert(&mut self, dest: CoordSys) -> Result<(), GeometryError> {
        if dest == self.coord_sys {
            return Ok(());
        }
        let (affine, codes) = convert_full(
            &self.affine,
            &[
                self.ornt.get().map(String::as_str),
                self.orig_ornt.get().map(String::as_str),
            ],
        )?;
        let mut codes = codes.into_iter();
        self.ornt = codes.next().flatten().map(OnceCell::from).unwrap_or_default();
        self.orig_ornt = codes.next().flatten().map(OnceCell::from).unwrap_or_default();
        self.affine = affine;
        self.coord_sys = dest;
        Ok(())
    }

    /// Copy converted to `dest`, leaving `self` untouched.
    pub fn converted(&self, dest: CoordSys) -> Result<Self, GeometryError> {
        let mut metadata = self.clone();
        metadata.convert(dest)?;
        Ok(metadata)
    }

    /// Whether the direction has a positive determinant. 3D only.
    ///
    /// Both conventions flip two axes of each other, so the answer does not
    /// depend on `coord_sys`.
    pub fn is_right_handed(&self) -> Result<bool, GeometryError> {
        let d = self.affine.dim();
        if d != 3 {
            return Err(GeometryError::DimensionMismatch {
                context: "handedness check",
                expected: 3,
                found: d,
            });
        }
        Ok(self.affine.direction().determinant() > 0.0)
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Affine:{}", self.affine)?;
        writeln!(f, "Spacing: {:?}", self.spacing().as_slice())?;
        writeln!(f, "Coordinate system: {}", self.coord_sys)?;
        writeln!(f, "Orientation: {}", self.ornt())?;
        write!(f, "Original orientation: {}", self.orig_ornt().unwrap_or("None"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::DMatrix;

    fn itk_metadata(direction: DMatrix<f64>) -> Metadata {
        let affine = Affine::new(
            direction,
            DVector::from_vec(vec![0.8, 0.8, 2.0]),
            DVector::from_vec(vec![-120.0, 35.5, 12.0]),
        )
        .unwrap();
        Metadata::new(affine, None, CoordSys::Itk, None).unwrap()
    }

    #[test]
    fn orientation_of_identity_in_both_conventions() {
        let metadata = itk_metadata(DMatrix::identity(3, 3));
        assert_eq!(metadata.ornt(), "RAI");

        let nib = Metadata::new(Affine::identity(3).unwrap(), None, CoordSys::Nib, None).unwrap();
        assert_eq!(nib.ornt(), "RAS");
    }

    #[test]
    fn first_orientation_access_sets_original() {
        let metadata = itk_metadata(DMatrix::identity(3, 3));
        assert_eq!(metadata.orig_ornt(), None);
        assert_eq!(metadata.ornt(), "RAI");
        assert_eq!(metadata.orig_ornt(), Some("RAI"));

        let reoriented = Metadata::new(
            Affine::identity(3).unwrap(),
            Some("LPS".to_string()),
            CoordSys::Itk,
            None,
        )
        .unwrap();
        assert_eq!(reoriented.ornt(), "RAI");
        assert_eq!(reoriented.orig_ornt(), Some("LPS"));
    }

    #[test]
    fn convert_rewrites_affine_and_orientations() {
        let mut metadata = itk_metadata(DMatrix::identity(3, 3));
        let _ = metadata.ornt();
        metadata.convert(CoordSys::Nib).unwrap();

        assert_eq!(metadata.coord_sys(), CoordSys::Nib);
        assert_eq!(metadata.ornt(), "LPS");
        assert_eq!(metadata.orig_ornt(), Some("LPS"));
        // the cached value agrees with a fresh derivation
        assert_eq!(metadata.get_orientation(), "LPS");
        assert_eq!(metadata.affine().origin()[0], 120.0);
    }

    #[test]
    fn double_conversion_is_identity() {
        let (s, c) = 0.3f64.sin_cos();
        let direction = DMatrix::from_row_slice(3, 3, &[c, 0.0, s, 0.0, 1.0, 0.0, -s, 0.0, c]);
        let metadata = itk_metadata(direction);
        let ornt = metadata.ornt().to_string();

        let mut copy = metadata.clone();
        copy.convert(CoordSys::Nib).unwrap();
        copy.convert(CoordSys::Itk).unwrap();

        assert_abs_diff_eq!(
            copy.affine().matrix().clone(),
            metadata.affine().matrix().clone(),
            epsilon = 1e-12
        );
        assert_eq!(copy.ornt(), ornt);
        assert_eq!(copy.orig_ornt(), metadata.orig_ornt());
    }

    #[test]
    fn converting_to_the_same_system_is_a_no_op() {
        let mut metadata = itk_metadata(DMatrix::identity(3, 3));
        let before = metadata.affine().clone();
        metadata.convert(CoordSys::Itk).unwrap();
        assert_eq!(metadata.affine(), &before);
        assert_eq!(metadata.orig_ornt(), None);
    }

    #[test]
    fn unknown_coordinate_system_is_rejected() {
        assert_eq!(
            "ras".parse::<CoordSys>(),
            Err(GeometryError::InvalidCoordinateSystem("ras".to_string()))
        );
        assert_eq!("nib".parse::<CoordSys>(), Ok(CoordSys::Nib));
    }

    #[test]
    fn handedness_needs_three_dimensions() {
        assert!(itk_metadata(DMatrix::identity(3, 3)).is_right_handed().unwrap());
        let flipped = itk_metadata(DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 1.0, -1.0])));
        assert!(!flipped.is_right_handed().unwrap());

        let planar = Metadata::new(Affine::identity(2).unwrap(), None, CoordSys::Itk, None).unwrap();
        assert!(matches!(
            planar.is_right_handed(),
            Err(GeometryError::DimensionMismatch { expected: 3, found: 2, .. })
        ));
        assert_eq!(planar.ornt(), "RA");
    }

    #[test]
    fn clones_are_independent() {
        let mut header = Header::new();
        header.insert("0008|0060".to_string(), "CT".to_string());
        let mut metadata = itk_metadata(DMatrix::identity(3, 3));
        metadata.set_header(Some(header));

        let mut copy = metadata.clone();
        copy.convert(CoordSys::Nib).unwrap();
        copy.set_header(None);

        assert_eq!(metadata.coord_sys(), CoordSys::Itk);
        assert_eq!(metadata.header().map(|h| h.len()), Some(1));
        assert_eq!(metadata.affine().origin()[0], -120.0);
    }

    #[test]
    fn invalid_original_orientation_is_rejected() {
        let result = Metadata::new(
            Affine::identity(3).unwrap(),
            Some("RAR".to_string()),
            CoordSys::Itk,
            None,
        );
        assert!(matches!(result, Err(GeometryError::InvalidOrientationCode { .. })));
    }
}
