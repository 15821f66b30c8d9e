//! Represents a logical bucket — a top-level directory under the storage root.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A storage bucket in the S3-compatible system.
///
/// Buckets act as namespaces for objects. On disk a bucket is nothing more
/// than a directory directly beneath the storage root, so the only metadata
/// available is its name and the directory's timestamp.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BucketInfo {
    /// Bucket name (conforms to DNS naming rules).
    pub name: String,

    /// When this bucket was created, taken from the directory's mtime.
    pub created_at: DateTime<Utc>,
}
