//! Bucket and object name validation.
//!
//! Pure functions, no I/O. Every storage operation runs these before touching
//! the filesystem so that malformed names are always reported as invalid and
//! never as "not found".

use super::storage_service::{StorageError, StorageResult};

pub const BUCKET_NAME_MIN_LEN: usize = 3;
pub const BUCKET_NAME_MAX_LEN: usize = 63;
pub const MAX_OBJECT_KEY_LEN: usize = 1024;
/// Longest single path segment most filesystems accept (NAME_MAX).
pub const MAX_SEGMENT_LEN: usize = 255;

/// In-flight uploads are written next to their target as
/// `.tmp-<uuid>.part`; keys may never produce such a segment.
pub const TEMP_FILE_PREFIX: &str = ".tmp-";
pub const TEMP_FILE_SUFFIX: &str = ".part";

/// Validate bucket name format.
///
/// Enforces S3-like naming rules:
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - cannot start/end with dot or hyphen
/// - cannot contain consecutive dots
/// - cannot look like an IPv4 address
pub fn validate_bucket_name(name: &str) -> StorageResult<()> {
    if is_valid_bucket_name(name) {
        Ok(())
    } else {
        Err(StorageError::BucketNameInvalid {
            bucket: name.to_string(),
        })
    }
}

/// Validate an object key within `bucket`.
///
/// Keys are `/`-separated. Every segment must be non-empty, must not be `.`
/// or `..`, must fit in a single filesystem name and must not look like an
/// in-flight upload.
pub fn validate_object_name(bucket: &str, key: &str) -> StorageResult<()> {
    if is_valid_object_name(key) {
        Ok(())
    } else {
        Err(StorageError::ObjectNameInvalid {
            bucket: bucket.to_string(),
            object: key.to_string(),
        })
    }
}

pub fn is_valid_bucket_name(name: &str) -> bool {
    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return false;
    }

    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return false;
    }

    if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
        return false;
    }

    if name.contains("..") {
        return false;
    }

    !is_ipv4_like(name)
}

pub fn is_valid_object_name(key: &str) -> bool {
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return false;
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return false;
    }
    key.split('/').all(|segment| {
        !segment.is_empty()
            && segment != "."
            && segment != ".."
            && segment.len() <= MAX_SEGMENT_LEN
            && !is_temp_file_name(segment)
    })
}

/// Whether a directory entry is an in-flight (or abandoned) upload.
pub fn is_temp_file_name(name: &str) -> bool {
    name.starts_with(TEMP_FILE_PREFIX) && name.ends_with(TEMP_FILE_SUFFIX)
}

/// Check if a string matches IPv4-like dotted decimal form.
/// Rejects names formatted like `1.2.3.4`.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|segment| {
        !segment.is_empty()
            && segment.len() <= 3
            && segment.chars().all(|c| c.is_ascii_digit())
            && segment.parse::<u8>().is_ok()
    })
}
