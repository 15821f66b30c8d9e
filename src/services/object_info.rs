//! Object metadata: classifies a resolved path and turns it into an
//! [`ObjectInfo`].
//!
//! A directory is reported as a zero-sized prefix placeholder and never as
//! "not found"; a regular file is a real object. Only the node type decides,
//! never the directory's contents.
//!
//! Symlinks are followed as long as they resolve inside the storage root.
//! A link leading anywhere else is treated as if nothing were there.

use super::{
    checksum::{self, ChecksumIndex, ChecksumRecord},
    content_type::content_type_for,
    names, paths,
    storage_service::{StorageError, StorageResult, StorageService, modified_at},
};
use crate::models::object::ObjectInfo;
use std::{
    fs::Metadata,
    io::{self, ErrorKind, SeekFrom},
    path::Path,
};
use tokio::{
    fs::{self, File},
    io::AsyncSeekExt,
};
use tracing::{debug, warn};

/// What a resolved object path currently holds.
#[derive(Debug)]
pub enum PathKind {
    File(Metadata),
    Directory(Metadata),
    Missing,
}

/// Stat `path` (following symlinks) and classify it.
///
/// A path whose parent is a regular file is `Missing`, as are special files
/// such as sockets and FIFOs, and anything that only resolves outside `root`.
pub async fn classify(root: &Path, path: &Path) -> io::Result<PathKind> {
    let kind = match fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => PathKind::Directory(meta),
        Ok(meta) if meta.is_file() => PathKind::File(meta),
        Ok(_) => PathKind::Missing,
        Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
            PathKind::Missing
        }
        Err(err) => return Err(err),
    };

    if matches!(kind, PathKind::Missing) || resolves_within(root, path).await? {
        Ok(kind)
    } else {
        warn!("{} resolves outside the storage root, ignoring it", path.display());
        Ok(PathKind::Missing)
    }
}

/// Whether `path`, with every symlink resolved, still lies below `root`.
///
/// A path that vanishes while resolving does not lie anywhere.
pub(crate) async fn resolves_within(root: &Path, path: &Path) -> io::Result<bool> {
    let root = fs::canonicalize(root).await?;
    match fs::canonicalize(path).await {
        Ok(resolved) => Ok(resolved.starts_with(&root)),
        Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

/// Info for a regular file described by `meta`.
pub(crate) fn file_info(bucket: &str, key: &str, meta: &Metadata, etag: String) -> ObjectInfo {
    ObjectInfo {
        bucket: bucket.to_string(),
        name: key.to_string(),
        last_modified: modified_at(meta),
        size: meta.len(),
        content_type: content_type_for(key).to_string(),
        etag: Some(etag),
        is_dir: false,
    }
}

/// Metadata lookup rooted at an explicit storage root.
///
/// Validates the key and resolves it under `root/bucket`, but does not check
/// the bucket itself; callers that need `BucketNotFound` go through
/// [`StorageService::get_object_info`].
pub async fn get_object_info_at(
    root: &Path,
    index: &ChecksumIndex,
    bucket: &str,
    key: &str,
) -> StorageResult<ObjectInfo> {
    names::validate_object_name(bucket, key)?;
    let path = paths::object_path(root, bucket, key)?;

    match classify(root, &path).await? {
        PathKind::Missing => Err(not_found(bucket, key)),
        PathKind::Directory(meta) => Ok(ObjectInfo::directory(bucket, key, modified_at(&meta))),
        PathKind::File(meta) => {
            let (etag, meta) = resolve_etag(index, bucket, key, &path, meta).await?;
            Ok(file_info(bucket, key, &meta, etag))
        }
    }
}

/// The stored entity tag, if there is one and it still describes `meta`.
async fn stored_etag(
    index: &ChecksumIndex,
    bucket: &str,
    key: &str,
    meta: &Metadata,
) -> StorageResult<Option<String>> {
    match index.lookup(bucket, key).await? {
        Some(record) if record.matches(meta) => Ok(Some(record.etag)),
        Some(_) => {
            debug!("stale checksum for {}/{}, rehashing", bucket, key);
            Ok(None)
        }
        None => {
            debug!("no checksum for {}/{}, rehashing", bucket, key);
            Ok(None)
        }
    }
}

/// Fetch the stored entity tag for a file, rehashing when the artifact is
/// missing or no longer describes the file.
///
/// The rehash reads the whole object. Its result is written back so only the
/// first request after a loss pays for it. Returns the metadata the tag
/// belongs to, which differs from `meta` if the file was replaced meanwhile.
async fn resolve_etag(
    index: &ChecksumIndex,
    bucket: &str,
    key: &str,
    path: &Path,
    meta: Metadata,
) -> StorageResult<(String, Metadata)> {
    if let Some(etag) = stored_etag(index, bucket, key, &meta).await? {
        return Ok((etag, meta));
    }

    let (etag, hashed) = match checksum::hash_file(path).await {
        Ok(result) => result,
        Err(err) if err.kind() == ErrorKind::NotFound => return Err(not_found(bucket, key)),
        Err(err) => return Err(StorageError::Io(err)),
    };
    let record = ChecksumRecord::for_metadata(etag.clone(), &hashed)?;
    index.record(bucket, key, &record).await?;
    Ok((etag, hashed))
}

/// Entity tag for an already opened object, rehashing through the handle
/// itself when needed. The handle is left positioned at the start.
pub(crate) async fn etag_for_handle(
    index: &ChecksumIndex,
    bucket: &str,
    key: &str,
    file: &mut File,
    meta: &Metadata,
) -> StorageResult<String> {
    if let Some(etag) = stored_etag(index, bucket, key, meta).await? {
        return Ok(etag);
    }

    let etag = checksum::hash_reader(file).await?;
    file.seek(SeekFrom::Start(0)).await?;
    let record = ChecksumRecord::for_metadata(etag.clone(), meta)?;
    index.record(bucket, key, &record).await?;
    Ok(etag)
}

pub(crate) fn not_found(bucket: &str, key: &str) -> StorageError {
    StorageError::ObjectNotFound {
        bucket: bucket.to_string(),
        object: key.to_string(),
    }
}

impl StorageService {
    /// Metadata for (bucket, key).
    ///
    /// Checks the bucket name, the key syntax and the bucket's existence, in
    /// that order, before looking at the object path.
    pub async fn get_object_info(&self, bucket: &str, key: &str) -> StorageResult<ObjectInfo> {
        self.check_object_args(bucket, key).await?;
        get_object_info_at(&self.root, &self.index, bucket, key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::object::DEFAULT_CONTENT_TYPE,
        services::test_support::{put_object, test_service},
    };

    #[tokio::test]
    async fn test_should_describe_objects_and_prefixes() {
        let (_dir, service) = test_service().await;
        service.make_bucket("test-getobjectinfo").await.unwrap();
        put_object(&service, "test-getobjectinfo", "Asia/asiapics.jpg", b"asiapics").await;

        let info = service
            .get_object_info("test-getobjectinfo", "Asia/asiapics.jpg")
            .await
            .unwrap();
        assert_eq!(info.bucket, "test-getobjectinfo");
        assert_eq!(info.name, "Asia/asiapics.jpg");
        assert_eq!(info.content_type, "image/jpeg");
        assert!(!info.is_dir);
        assert_eq!(info.size, 8);
        assert_eq!(
            info.etag.as_deref(),
            Some(format!("{:x}", md5::compute(b"asiapics")).as_str())
        );

        let dir = service
            .get_object_info("test-getobjectinfo", "Asia")
            .await
            .unwrap();
        assert!(dir.is_dir);
        assert_eq!(dir.size, 0);
        assert_eq!(dir.content_type, DEFAULT_CONTENT_TYPE);
        assert_eq!(dir.etag, None);

        let err = service
            .get_object_info("test-getobjectinfo", "Africa")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::ObjectNotFound { ref bucket, ref object }
                if bucket == "test-getobjectinfo" && object == "Africa"
        ));
    }

    #[tokio::test]
    async fn test_should_classify_errors_in_order() {
        let (_dir, service) = test_service().await;
        service.make_bucket("test-getobjectinfo").await.unwrap();
        put_object(&service, "test-getobjectinfo", "Asia/asiapics.jpg", b"asiapics").await;

        for bucket in [".test", "Test", "---", "ad"] {
            let err = service.get_object_info(bucket, "").await.unwrap_err();
            assert!(
                matches!(err, StorageError::BucketNameInvalid { .. }),
                "unexpected error for `{bucket}`: {err}"
            );
        }

        for bucket in ["abcdefgh", "ijklmnop"] {
            let err = service.get_object_info(bucket, "abc").await.unwrap_err();
            assert!(matches!(err, StorageError::BucketNotFound { .. }));

            let err = service.get_object_info(bucket, "").await.unwrap_err();
            assert!(matches!(err, StorageError::ObjectNameInvalid { .. }));
        }

        for key in ["Antartica", "Asia/myfile", "Asia/asiapics.jpg/inner"] {
            let err = service
                .get_object_info("test-getobjectinfo", key)
                .await
                .unwrap_err();
            assert!(
                matches!(err, StorageError::ObjectNotFound { .. }),
                "unexpected error for `{key}`: {err}"
            );
        }
    }

    #[tokio::test]
    async fn test_should_resolve_directly_against_root() {
        let (_dir, service) = test_service().await;
        service.make_bucket("test-getobjinfo").await.unwrap();
        put_object(&service, "test-getobjinfo", "Asia/asiapics.jpg", b"asiapics").await;

        let dir = get_object_info_at(&service.root, &service.index, "test-getobjinfo", "Asia")
            .await
            .unwrap();
        assert!(dir.is_dir);
        assert_eq!(dir.name, "Asia");

        let file = get_object_info_at(
            &service.root,
            &service.index,
            "test-getobjinfo",
            "Asia/asiapics.jpg",
        )
        .await
        .unwrap();
        assert!(!file.is_dir);
        assert_eq!(file.size, 8);

        let err = get_object_info_at(&service.root, &service.index, "test-getobjinfo", "Africa")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ObjectNotFound { .. }));
    }

    #[tokio::test]
    async fn test_should_report_nested_empty_directories_as_prefixes() {
        let (_dir, service) = test_service().await;
        service.make_bucket("prefixes").await.unwrap();
        fs::create_dir_all(service.root.join("prefixes").join("a").join("b"))
            .await
            .unwrap();

        let info = service.get_object_info("prefixes", "a").await.unwrap();
        assert!(info.is_dir);
        let info = service.get_object_info("prefixes", "a/b").await.unwrap();
        assert!(info.is_dir);
    }

    #[tokio::test]
    async fn test_should_return_identical_info_on_repeated_calls() {
        let (_dir, service) = test_service().await;
        service.make_bucket("stable").await.unwrap();
        put_object(&service, "stable", "docs/readme.txt", b"hello there").await;

        let first = service.get_object_info("stable", "docs/readme.txt").await.unwrap();
        let second = service.get_object_info("stable", "docs/readme.txt").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.content_type, "text/plain");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_should_ignore_symlinks_leaving_the_root() {
        let (dir, service) = test_service().await;
        service.make_bucket("links").await.unwrap();
        put_object(&service, "links", "real.txt", b"inside").await;

        let outside = dir.path().join("outside.txt");
        fs::write(&outside, b"secret").await.unwrap();
        let bucket_dir = service.root.join("links");
        fs::symlink(&outside, bucket_dir.join("escape.txt")).await.unwrap();
        fs::symlink(bucket_dir.join("real.txt"), bucket_dir.join("alias.txt"))
            .await
            .unwrap();

        let err = service
            .get_object_info("links", "escape.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ObjectNotFound { .. }));

        let alias = service.get_object_info("links", "alias.txt").await.unwrap();
        assert_eq!(alias.size, 6);
        assert_eq!(alias.etag, Some(format!("{:x}", md5::compute(b"inside"))));
    }

    #[tokio::test]
    async fn test_should_rebuild_lost_checksum() {
        let (_dir, service) = test_service().await;
        service.make_bucket("rehash").await.unwrap();
        put_object(&service, "rehash", "blob.bin", b"some bytes").await;

        service.index.forget("rehash", "blob.bin").await.unwrap();
        assert!(service.index.lookup("rehash", "blob.bin").await.unwrap().is_none());

        let info = service.get_object_info("rehash", "blob.bin").await.unwrap();
        let expected = format!("{:x}", md5::compute(b"some bytes"));
        assert_eq!(info.etag.as_deref(), Some(expected.as_str()));

        let stored = service.index.lookup("rehash", "blob.bin").await.unwrap();
        assert_eq!(stored.map(|r| r.etag), Some(expected));
    }

    #[tokio::test]
    async fn test_should_rehash_when_file_changed_behind_our_back() {
        let (_dir, service) = test_service().await;
        service.make_bucket("rehash").await.unwrap();
        put_object(&service, "rehash", "blob.bin", b"short").await;

        fs::write(service.root.join("rehash").join("blob.bin"), b"a longer body")
            .await
            .unwrap();

        let info = service.get_object_info("rehash", "blob.bin").await.unwrap();
        assert_eq!(info.size, 13);
        assert_eq!(
            info.etag,
            Some(format!("{:x}", md5::compute(b"a longer body")))
        );
    }
}
