//! src/services/storage_service.rs
//!
//! StorageService — S3-like bucket and object operations backed directly by a
//! local directory tree. Buckets are directories under `root`, objects are
//! files under `root/{bucket}/{key segments...}`, and entity tags live in a
//! SQLite checksum index next to (not inside) the tree.
//!
//! Nothing is cached in memory: every call re-validates names and re-reads
//! the filesystem, so the tree on disk is always the source of truth. Object
//! operations are split across sibling modules (`object_info`,
//! `object_writer`, `object_reader`, `listing`); this file carries the shared
//! error type, the service value itself and bucket management.

use super::{
    checksum::ChecksumIndex,
    names,
    object_info::{PathKind, classify},
    paths,
};
use crate::models::bucket::BucketInfo;
use chrono::{DateTime, Utc};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket name `{bucket}` is invalid")]
    BucketNameInvalid { bucket: String },
    #[error("object name `{object}` is invalid in bucket `{bucket}`")]
    ObjectNameInvalid { bucket: String, object: String },
    #[error("bucket `{bucket}` not found")]
    BucketNotFound { bucket: String },
    #[error("object `{object}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, object: String },
    #[error("bucket `{bucket}` already exists")]
    BucketExists { bucket: String },
    #[error("bucket `{bucket}` is not empty")]
    BucketNotEmpty { bucket: String },
    #[error("object `{object}` in bucket `{bucket}` collides with an existing directory")]
    ObjectExistsAsDirectory { bucket: String, object: String },
    #[error("a parent of object `{object}` in bucket `{bucket}` is an existing object")]
    ParentIsObject { bucket: String, object: String },
    #[error(
        "object `{object}` in bucket `{bucket}`: expected {expected} bytes, received {actual}"
    )]
    SizeMismatch {
        bucket: String,
        object: String,
        expected: u64,
        actual: u64,
    },
    #[error(
        "object `{object}` in bucket `{bucket}`: checksum {computed} does not match expected {expected}"
    )]
    BadDigest {
        bucket: String,
        object: String,
        expected: String,
        computed: String,
    },
    #[error("object `{object}` in bucket `{bucket}`: `{digest}` is not a valid MD5 digest")]
    InvalidDigest {
        bucket: String,
        object: String,
        digest: String,
    },
    #[error("offset {offset} is beyond object size {size}")]
    InvalidRange { offset: u64, size: u64 },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("checksum index: {0}")]
    Index(#[from] sqlx::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// StorageService provides the object store's filesystem engine:
/// - bucket management (make, inspect, list, delete)
/// - object metadata (`get_object_info`)
/// - atomic object creation (`create_object`)
/// - range reads (`get_object`)
/// - listing and deletion
///
/// The value is cheap to clone and holds no mutable state; concurrent calls
/// only coordinate through the filesystem itself.
#[derive(Clone, Debug)]
pub struct StorageService {
    /// Checksum artifacts for published objects.
    pub index: ChecksumIndex,

    /// Storage root; every bucket is a direct child directory.
    pub root: PathBuf,
}

impl StorageService {
    /// Create a StorageService over an existing `root` directory.
    pub fn new(index: ChecksumIndex, root: impl Into<PathBuf>) -> Self {
        Self {
            index,
            root: root.into(),
        }
    }

    /// Create `root` if needed and build a service over its canonical path.
    pub async fn open(index: ChecksumIndex, root: impl AsRef<Path>) -> StorageResult<Self> {
        fs::create_dir_all(root.as_ref()).await?;
        let root = fs::canonicalize(root.as_ref()).await?;
        Ok(Self::new(index, root))
    }

    /// Create a bucket directory.
    ///
    /// Relies on the atomic `mkdir` so that concurrent creators see exactly
    /// one success and `BucketExists` for everybody else.
    pub async fn make_bucket(&self, name: &str) -> StorageResult<BucketInfo> {
        names::validate_bucket_name(name)?;
        let path = paths::bucket_path(&self.root, name)?;

        match fs::create_dir(&path).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(StorageError::BucketExists {
                    bucket: name.to_string(),
                });
            }
            Err(err) => return Err(StorageError::Io(err)),
        }
        info!("created bucket {}", name);

        let meta = fs::metadata(&path).await?;
        Ok(BucketInfo {
            name: name.to_string(),
            created_at: modified_at(&meta),
        })
    }

    /// Validate a bucket name and confirm its directory exists.
    pub async fn get_bucket_info(&self, bucket: &str) -> StorageResult<BucketInfo> {
        names::validate_bucket_name(bucket)?;
        let path = self.ensure_bucket(bucket).await?;
        let meta = fs::metadata(&path).await?;
        Ok(BucketInfo {
            name: bucket.to_string(),
            created_at: modified_at(&meta),
        })
    }

    /// All buckets under the root, sorted by name.
    ///
    /// Entries that are not directories or do not carry a valid bucket name
    /// (for instance an index database kept inside the root) are skipped.
    /// Symlinks count when they resolve to a directory inside the root, the
    /// same rule bucket lookups apply.
    pub async fn list_buckets(&self) -> StorageResult<Vec<BucketInfo>> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut buckets = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !names::is_valid_bucket_name(&name) {
                continue;
            }
            let PathKind::Directory(meta) = classify(&self.root, &entry.path()).await? else {
                continue;
            };
            buckets.push(BucketInfo {
                name,
                created_at: modified_at(&meta),
            });
        }
        buckets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(buckets)
    }

    /// Remove an empty bucket and its checksum rows.
    pub async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        names::validate_bucket_name(bucket)?;
        let path = self.ensure_bucket(bucket).await?;

        match fs::remove_dir(&path).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => {
                return Err(StorageError::BucketNotEmpty {
                    bucket: bucket.to_string(),
                });
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StorageError::BucketNotFound {
                    bucket: bucket.to_string(),
                });
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        let rows = self.index.forget_bucket(bucket).await?;
        debug!("dropped {} checksum rows for bucket {}", rows, bucket);
        info!("deleted bucket {}", bucket);
        Ok(())
    }

    /// Stat the bucket directory. Never cached.
    ///
    /// Assumes the name has already been validated.
    pub(crate) async fn ensure_bucket(&self, bucket: &str) -> StorageResult<PathBuf> {
        let path = paths::bucket_path(&self.root, bucket)?;
        match classify(&self.root, &path).await? {
            PathKind::Directory(_) => Ok(path),
            PathKind::File(_) | PathKind::Missing => Err(StorageError::BucketNotFound {
                bucket: bucket.to_string(),
            }),
        }
    }

    /// Shared preamble of every object operation: bucket name, then key
    /// syntax, then bucket existence. Returns the bucket directory.
    pub(crate) async fn check_object_args(&self, bucket: &str, key: &str) -> StorageResult<PathBuf> {
        names::validate_bucket_name(bucket)?;
        names::validate_object_name(bucket, key)?;
        self.ensure_bucket(bucket).await
    }
}

/// Modification time of a filesystem node as UTC, falling back to now when
/// the platform does not report one.
pub(crate) fn modified_at(meta: &std::fs::Metadata) -> DateTime<Utc> {
    meta.modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}
