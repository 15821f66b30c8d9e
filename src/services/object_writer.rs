//! Object creation and deletion.
//!
//! Uploads are streamed into a temporary file that sits in the destination
//! directory, verified, fsynced and then renamed over the final path. The
//! rename is atomic within a directory, so readers see either the previous
//! object or the new one. Two writers racing on the same key both publish;
//! whichever renames last wins.

use super::{
    checksum::{self, ChecksumRecord},
    names::{TEMP_FILE_PREFIX, TEMP_FILE_SUFFIX},
    object_info::{PathKind, classify, file_info, resolves_within},
    paths,
    storage_service::{StorageError, StorageResult, StorageService},
};
use crate::models::object::ObjectInfo;
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::Path,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};
use uuid::Uuid;

impl StorageService {
    /// Stream-upload an object.
    ///
    /// - Writes bytes incrementally to a temporary file next to the target.
    /// - Computes MD5 and size while streaming.
    /// - Rejects the upload if `size` or `expected_md5` (base64 or hex) do
    ///   not match what was received; any previous object stays in place.
    /// - Atomically renames into the final location and records the checksum.
    ///
    /// Cleans up the temporary file on every error path it observes.
    pub async fn create_object<S>(
        &self,
        bucket: &str,
        key: &str,
        expected_md5: Option<&str>,
        size: Option<u64>,
        stream: S,
    ) -> StorageResult<ObjectInfo>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        self.check_object_args(bucket, key).await?;
        let expected = expected_md5
            .filter(|digest| !digest.is_empty())
            .map(|digest| checksum::parse_expected_md5(bucket, key, digest))
            .transpose()?;

        let file_path = paths::object_path(&self.root, bucket, key)?;
        if let PathKind::Directory(_) = classify(&self.root, &file_path).await? {
            return Err(StorageError::ObjectExistsAsDirectory {
                bucket: bucket.to_string(),
                object: key.to_string(),
            });
        }

        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::other("object path missing parent directory"))
        })?;
        // a symlinked directory on the way must not carry the upload out of the root
        if !resolves_within(&self.root, nearest_existing(&parent).await).await? {
            return Err(StorageError::ObjectNameInvalid {
                bucket: bucket.to_string(),
                object: key.to_string(),
            });
        }
        if let Err(err) = fs::create_dir_all(&parent).await {
            return Err(match err.kind() {
                ErrorKind::AlreadyExists | ErrorKind::NotADirectory => {
                    StorageError::ParentIsObject {
                        bucket: bucket.to_string(),
                        object: key.to_string(),
                    }
                }
                _ => StorageError::Io(err),
            });
        }

        let tmp_path = parent.join(format!(
            "{TEMP_FILE_PREFIX}{}{TEMP_FILE_SUFFIX}",
            Uuid::new_v4()
        ));
        let (digest, written) = match write_temp(&tmp_path, size, stream).await {
            Ok(result) => result,
            Err(err) => {
                discard(&tmp_path).await;
                return Err(match err {
                    WriteError::TooLong(actual) => StorageError::SizeMismatch {
                        bucket: bucket.to_string(),
                        object: key.to_string(),
                        expected: size.unwrap_or_default(),
                        actual,
                    },
                    WriteError::Io(err) => StorageError::Io(err),
                });
            }
        };

        if let Some(expected_size) = size {
            if expected_size != written {
                discard(&tmp_path).await;
                return Err(StorageError::SizeMismatch {
                    bucket: bucket.to_string(),
                    object: key.to_string(),
                    expected: expected_size,
                    actual: written,
                });
            }
        }

        let computed = digest.compute();
        if let Some(expected) = expected {
            if expected != computed.0 {
                discard(&tmp_path).await;
                return Err(StorageError::BadDigest {
                    bucket: bucket.to_string(),
                    object: key.to_string(),
                    expected: hex::encode(expected),
                    computed: format!("{:x}", computed),
                });
            }
        }
        let etag = format!("{:x}", computed);

        let meta = match fs::metadata(&tmp_path).await {
            Ok(meta) => meta,
            Err(err) => {
                discard(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        };

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            discard(&tmp_path).await;
            // a directory may have appeared at the target since the check above
            return Err(match classify(&self.root, &file_path).await {
                Ok(PathKind::Directory(_)) => StorageError::ObjectExistsAsDirectory {
                    bucket: bucket.to_string(),
                    object: key.to_string(),
                },
                _ => StorageError::Io(err),
            });
        }
        debug!("published {}/{} ({} bytes)", bucket, key, written);

        // The artifact is rebuilt from the bytes on the next lookup if this fails.
        match ChecksumRecord::for_metadata(etag.clone(), &meta) {
            Ok(record) => {
                if let Err(err) = self.index.record(bucket, key, &record).await {
                    warn!("failed to record checksum for {}/{}: {}", bucket, key, err);
                }
            }
            Err(err) => warn!("no modification time for {}/{}: {}", bucket, key, err),
        }

        Ok(file_info(bucket, key, &meta, etag))
    }

    /// Remove an object and its checksum.
    ///
    /// Directories are not objects and answer `ObjectNotFound`. Parent
    /// directories left empty by the removal are pruned up to the bucket.
    pub async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let bucket_root = self.check_object_args(bucket, key).await?;
        let file_path = paths::object_path(&self.root, bucket, key)?;

        match classify(&self.root, &file_path).await? {
            PathKind::File(_) => {}
            PathKind::Directory(_) | PathKind::Missing => {
                return Err(StorageError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    object: key.to_string(),
                });
            }
        }

        match fs::remove_file(&file_path).await {
            Ok(()) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StorageError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    object: key.to_string(),
                });
            }
            Err(err) => return Err(StorageError::Io(err)),
        }
        self.index.forget(bucket, key).await?;

        if let Some(parent) = file_path.parent() {
            prune_empty_dirs(parent, &bucket_root).await;
        }
        Ok(())
    }
}

enum WriteError {
    /// The stream carried more bytes than announced.
    TooLong(u64),
    Io(io::Error),
}

impl From<io::Error> for WriteError {
    fn from(err: io::Error) -> Self {
        WriteError::Io(err)
    }
}

/// Drain `stream` into a fresh file at `tmp_path`, hashing as we go.
async fn write_temp<S>(
    tmp_path: &Path,
    limit: Option<u64>,
    stream: S,
) -> Result<(Context, u64), WriteError>
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    let mut file = File::create(tmp_path).await?;
    let mut written: u64 = 0;
    let mut digest = Context::new();

    pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        written += chunk.len() as u64;
        if limit.is_some_and(|limit| written > limit) {
            return Err(WriteError::TooLong(written));
        }
        digest.consume(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok((digest, written))
}

/// Best-effort removal of a temporary upload.
/// The deepest ancestor of `path` (itself included) that exists.
async fn nearest_existing(path: &Path) -> &Path {
    let mut current = path;
    while fs::symlink_metadata(current).await.is_err() {
        match current.parent() {
            Some(parent) => current = parent,
            None => break,
        }
    }
    current
}

async fn discard(tmp_path: &Path) {
    if let Err(err) = fs::remove_file(tmp_path).await {
        if err.kind() != ErrorKind::NotFound {
            debug!("failed to remove temp file {}: {}", tmp_path.display(), err);
        }
    }
}

/// Recursively remove empty directories up to bucket root.
///
/// Stops when:
/// - directory not empty
/// - directory not found
/// - reached root
/// - encountered unexpected I/O errors
async fn prune_empty_dirs(start: &Path, stop: &Path) {
    let mut current = start.to_path_buf();
    while current.starts_with(stop) && current != stop {
        match fs::remove_dir(&current).await {
            Ok(()) => {
                if let Some(parent) = current.parent() {
                    current = parent.to_path_buf();
                } else {
                    break;
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => break,
            Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
            Err(err) => {
                debug!("failed to prune directory {}: {}", current.display(), err);
                break;
            }
        }
    }
}
