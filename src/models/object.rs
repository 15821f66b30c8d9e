//! Represents an object (file) or a directory placeholder stored in a bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content type reported for directory placeholders and unknown extensions.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Metadata for a single entry addressed by (bucket, key).
///
/// An entry is either a real object backed by a regular file, or a
/// directory-as-prefix placeholder (`is_dir == true`) which has no content,
/// no entity tag and is never readable.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Name of the bucket holding this entry.
    pub bucket: String,

    /// Object key (path-like identifier within the bucket).
    pub name: String,

    /// Last modification time of the underlying filesystem node.
    pub last_modified: DateTime<Utc>,

    /// Size in bytes. Always 0 for directory placeholders.
    pub size: u64,

    /// Content type (MIME type) inferred from the key's extension.
    pub content_type: String,

    /// Hex-encoded MD5 of the object content.
    pub etag: Option<String>,

    /// Whether this entry is a directory-as-prefix placeholder.
    pub is_dir: bool,
}

impl ObjectInfo {
    /// Placeholder info for a directory standing in for a key prefix.
    pub fn directory(
        bucket: impl Into<String>,
        name: impl Into<String>,
        last_modified: DateTime<Utc>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            name: name.into(),
            last_modified,
            size: 0,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            etag: None,
            is_dir: true,
        }
    }
}
