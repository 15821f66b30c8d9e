//! Maps (bucket, key) pairs onto filesystem paths under the storage root.

use super::storage_service::{StorageError, StorageResult};
use std::path::{Component, Path, PathBuf};

/// Compute the physical folder for a bucket.
///
/// The bucket must resolve to a direct child of `root`. This does not check
/// for existence.
pub fn bucket_path(root: &Path, bucket: &str) -> StorageResult<PathBuf> {
    let path = root.join(bucket);
    let rel = path.strip_prefix(root).ok();
    let single_normal = rel.is_some_and(|rel| {
        let mut components = rel.components();
        matches!(components.next(), Some(Component::Normal(_))) && components.next().is_none()
    });
    if !single_normal {
        return Err(StorageError::BucketNameInvalid {
            bucket: bucket.to_string(),
        });
    }
    Ok(path)
}

/// Construct a fully-qualified object path: `root/bucket/seg1/seg2/...`.
///
/// `/` in the key is translated to the native separator one segment at a
/// time. The result must be a strict descendant of the bucket directory made
/// only of plain components, regardless of what the name validator already
/// accepted. Parent directories may not exist yet.
pub fn object_path(root: &Path, bucket: &str, key: &str) -> StorageResult<PathBuf> {
    let bucket_dir = bucket_path(root, bucket)?;
    let mut path = bucket_dir.clone();
    let mut segments = 0;
    for segment in key.split('/') {
        path.push(segment);
        segments += 1;
    }

    // every key segment must survive as exactly one plain component
    let escapes = match path.strip_prefix(&bucket_dir) {
        Ok(rel) => {
            rel.components().count() != segments
                || rel.components().any(|c| !matches!(c, Component::Normal(_)))
        }
        Err(_) => true,
    };
    if escapes {
        return Err(StorageError::ObjectNameInvalid {
            bucket: bucket.to_string(),
            object: key.to_string(),
        });
    }
    Ok(path)
}

/// Rebuild an object key from a path below the bucket directory.
pub fn key_from_path(bucket_dir: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(bucket_dir).ok()?;
    let mut segments = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_str()?),
            _ => return None,
        }
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_resolve_nested_key_under_bucket() {
        let root = Path::new("/srv/objects");
        let path = object_path(root, "photos", "2025/06/img.jpg").unwrap();
        assert_eq!(
            path,
            root.join("photos").join("2025").join("06").join("img.jpg")
        );
    }

    #[test]
    fn test_should_reject_traversal_even_without_validation() {
        let root = Path::new("/srv/objects");
        for key in ["../other/secret", "a/../../etc/passwd", "..", ".", "a/./b", ""] {
            let result = object_path(root, "photos", key);
            assert!(
                matches!(result, Err(StorageError::ObjectNameInvalid { .. })),
                "expected `{key}` to be rejected"
            );
        }
    }

    #[test]
    fn test_should_reject_collapsed_segments() {
        let root = Path::new("/srv/objects");
        let result = object_path(root, "photos", "a//b");
        assert!(matches!(result, Err(StorageError::ObjectNameInvalid { .. })));
    }

    #[test]
    fn test_should_reject_bucket_escaping_root() {
        let root = Path::new("/srv/objects");
        for bucket in ["..", "a/b", "/etc", ""] {
            assert!(
                matches!(
                    bucket_path(root, bucket),
                    Err(StorageError::BucketNameInvalid { .. })
                ),
                "expected `{bucket}` to be rejected"
            );
        }
    }

    #[test]
    fn test_should_rebuild_key_from_path() {
        let bucket_dir = Path::new("/srv/objects/photos");
        let path = bucket_dir.join("Asia").join("asiapics.jpg");
        assert_eq!(
            key_from_path(bucket_dir, &path).as_deref(),
            Some("Asia/asiapics.jpg")
        );
        assert_eq!(key_from_path(bucket_dir, bucket_dir), None);
    }
}
