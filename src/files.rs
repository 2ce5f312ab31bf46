//! Path helpers shared by the readers and writers.

use std::fs;
use std::io;
use std::path::Path;

const NIFTI_SUFFIXES: [&str; 2] = [".nii.gz", ".nii"];
const DICOM_SUFFIXES: [&str; 2] = [".dcm", ".dicom"];

fn has_suffix(path: &Path, suffixes: &[&str], check_exist: bool) -> bool {
    if check_exist && !path.is_file() {
        return false;
    }
    let name = path.to_string_lossy();
    suffixes.iter().any(|suffix| name.ends_with(suffix))
}

/// Whether `path` names a NIfTI file (`.nii` or `.nii.gz`).
///
/// With `check_exist` the file must also exist.
pub fn is_nifti(path: impl AsRef<Path>, check_exist: bool) -> bool {
    has_suffix(path.as_ref(), &NIFTI_SUFFIXES, check_exist)
}

/// Whether `path` names a DICOM file (`.dcm` or `.dicom`).
pub fn is_dicom(path: impl AsRef<Path>, check_exist: bool) -> bool {
    has_suffix(path.as_ref(), &DICOM_SUFFIXES, check_exist)
}

/// Create the directory `path`.
///
/// An existing directory is accepted if it is empty, or in any case with
/// `exist_ok`. `parents` creates the missing parent directories too.
///
/// # Errors
///
/// Returns [`io::ErrorKind::AlreadyExists`] for an existing non-empty
/// directory when `exist_ok` is false, or the error of the creation itself.
pub fn make_empty_dir(path: impl AsRef<Path>, parents: bool, exist_ok: bool) -> io::Result<()> {
    let path = path.as_ref();
    if path.is_dir() {
        if exist_ok || fs::read_dir(path)?.next().is_none() {
            return Ok(());
        }
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("The directory '{}' is not empty", path.display()),
        ));
    }
    if parents {
        fs::create_dir_all(path)
    } else {
        fs::create_dir(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffixes_without_existence_check() {
        assert!(is_nifti("scan.nii.gz", false));
        assert!(is_nifti("dir/scan.nii", false));
        assert!(!is_nifti("scan.nii.bak", false));
        assert!(is_dicom("IM1.dcm", false));
        assert!(is_dicom("IM1.dicom", false));
        assert!(!is_dicom("series", false));
    }

    #[test]
    fn existence_check_needs_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.nii");
        assert!(!is_nifti(&path, true));
        fs::write(&path, b"").unwrap();
        assert!(is_nifti(&path, true));
    }

    #[test]
    fn empty_dir_rules() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a").join("b");
        assert!(make_empty_dir(&nested, false, false).is_err());
        make_empty_dir(&nested, true, false).unwrap();
        // existing empty directory is fine
        make_empty_dir(&nested, false, false).unwrap();

        fs::write(nested.join("IM1.dcm"), b"").unwrap();
        let err = make_empty_dir(&nested, false, false).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        make_empty_dir(&nested, false, true).unwrap();
    }
}
