//! DICOM unique identifiers.

use uuid::Uuid;

/// Root of UIDs derived from a UUID, as registered in DICOM PS3.5 B.2.
const UUID_ROOT: &str = "2.25.";

/// A new random UID, `2.25.` followed by the decimal value of a v4 UUID.
///
/// The result never exceeds the 64 characters allowed for a UI value.
pub fn generate_uid() -> String {
    format!("{UUID_ROOT}{}", Uuid::new_v4().as_u128())
}
