//! # medio
//!
//! This crate serves a high-level API for reading and saving medical images
//! (NIfTI files, DICOM files and DICOM series) as arrays with a consistent
//! description of their geometry.
//!
//! Every image is returned as an [`ndarray::ArrayD<f32>`] indexed
//! `(x, y, z[, channels])` together with a [`Metadata`]: the affine mapping
//! voxel indices to physical coordinates, the coordinate system the affine is
//! expressed in and the orientation of the image. Two coordinate systems
//! (conventions) are supported and can be converted into each other at any
//! time:
//!  - `itk` (default), the convention of DICOM patient coordinates
//!  - `nib`, the RAS+ convention of NIfTI
//!
//! Orientations are three letter codes such as `RAI`. Images can be
//! reoriented to any of the 48 valid codes while reading, and are saved back
//! in their original orientation unless asked otherwise. Saving DICOM checks
//! that the orientation is right-handed and, if allowed, corrects it by
//! flipping the slice axis.
//!
//! DICOM series are read in parallel using rayon.
//!
//! # Examples
//!
//! ## Reading a DICOM series and saving it as NIfTI
//!
//! Read the series in the `dicom/` directory in RAS orientation (`itk`
//! convention), crop it and save it as a compressed NIfTI file in the
//! orientation the series had on disk.
//!
//! ```no_run
//! # use medio::{MedImage, ReadOptions, SaveOptions, SliceArg};
//! let options = ReadOptions {
//!     desired_ornt: Some("RAS".to_string()),
//!     ..Default::default()
//! };
//! let image = MedImage::read("dicom", &options).expect("should have read the series");
//! let cropped = image
//!     .slice(&[SliceArg::Ellipsis, SliceArg::range(Some(10), Some(-10))])
//!     .expect("should have cropped the slices");
//! cropped
//!     .save("cropped.nii.gz", &SaveOptions::default())
//!     .expect("should have saved the image");
//! ```

pub mod affine;
pub mod channels;
pub mod convert;
pub mod dicom_compat;
pub mod dicom_io;
pub mod enums;
pub mod error;
pub mod files;
pub mod med_image;
pub mod metadata;
pub mod nifti_io;
pub mod orientation;
pub mod read_save;
pub mod reorient;
pub mod slicing;
pub mod uid;

pub use affine::Affine;
pub use enums::{Backend, CoordSys, DType, SeriesSelector, SortBy};
pub use error::{ArrayError, GeometryError, ImageError};
pub use med_image::MedImage;
pub use metadata::{Header, Metadata};
pub use read_save::{ReadOptions, ReadSaveError, SaveOptions, read_img, save_dir, save_img};
pub use slicing::SliceArg;
