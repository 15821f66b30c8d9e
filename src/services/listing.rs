//! ListObjectsV2-style listing over the bucket's directory tree.
//!
//! Keys are gathered by walking the directories below the prefix, sorted
//! lexicographically, then grouped and paginated the way S3 does it. Only
//! regular files are objects; directories surface through common prefixes.

use super::{
    names::{self, is_temp_file_name},
    object_info::get_object_info_at,
    paths,
    storage_service::{StorageError, StorageResult, StorageService},
};
use crate::models::object::ObjectInfo;
use std::{io::ErrorKind, path::PathBuf};
use tokio::fs;
use tracing::debug;

pub const MAX_KEYS_LIMIT: usize = 1000;

#[derive(Clone, Debug, Default)]
pub struct ListObjectsParams {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub continuation_token: Option<String>,
    pub start_after: Option<String>,
    pub max_keys: usize,
}

#[derive(Debug)]
pub struct ListObjectsResult {
    pub objects: Vec<ObjectInfo>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
    pub key_count: usize,
}

impl StorageService {
    /// List objects following S3 ListObjectsV2 rules.
    ///
    /// Supports:
    /// - prefix filtering
    /// - delimiter grouping
    /// - continuation tokens / start-after
    /// - lexicographical ordering
    ///
    /// `max_keys` is clamped to 1..=1000 and counts objects and common
    /// prefixes together.
    pub async fn list_objects(
        &self,
        bucket: &str,
        params: ListObjectsParams,
    ) -> StorageResult<ListObjectsResult> {
        names::validate_bucket_name(bucket)?;
        let bucket_dir = self.ensure_bucket(bucket).await?;
        let max_keys = params.max_keys.clamp(1, MAX_KEYS_LIMIT);
        let prefix = params.prefix.as_deref().unwrap_or("");
        let delimiter = params.delimiter.as_deref().filter(|d| !d.is_empty());
        let marker = params
            .continuation_token
            .as_deref()
            .or(params.start_after.as_deref());

        let keys = self.collect_keys(bucket, bucket_dir, prefix).await?;

        let mut objects = Vec::new();
        let mut common_prefixes: Vec<String> = Vec::new();
        let mut last_emitted: Option<String> = None;
        let mut is_truncated = false;

        for key in keys {
            if let Some(marker) = marker {
                if key.as_str() <= marker {
                    continue;
                }
                // a marker that is itself a common prefix covers everything under it
                if delimiter.is_some_and(|d| marker.ends_with(d)) && key.starts_with(marker) {
                    continue;
                }
            }

            let group = delimiter.and_then(|d| compute_common_prefix(&key, prefix, d));
            if let Some(group) = &group {
                if common_prefixes.last() == Some(group) {
                    continue;
                }
            }

            if objects.len() + common_prefixes.len() == max_keys {
                is_truncated = true;
                break;
            }

            match group {
                Some(group) => {
                    last_emitted = Some(group.clone());
                    common_prefixes.push(group);
                }
                None => match get_object_info_at(&self.root, &self.index, bucket, &key).await {
                    Ok(info) => {
                        last_emitted = Some(key);
                        objects.push(info);
                    }
                    // removed between the walk and the stat
                    Err(StorageError::ObjectNotFound { .. }) => continue,
                    Err(err) => return Err(err),
                },
            }
        }

        let key_count = objects.len() + common_prefixes.len();
        Ok(ListObjectsResult {
            objects,
            common_prefixes,
            is_truncated,
            next_continuation_token: if is_truncated { last_emitted } else { None },
            key_count,
        })
    }

    /// Every object key in the bucket that starts with `prefix`, sorted.
    ///
    /// Only the subtree that can contain matches is walked. Temporary upload
    /// files and names that are not valid UTF-8 object keys are skipped.
    async fn collect_keys(
        &self,
        bucket: &str,
        bucket_dir: PathBuf,
        prefix: &str,
    ) -> StorageResult<Vec<String>> {
        let start = match prefix.rfind('/') {
            Some(idx) => match paths::object_path(&self.root, bucket, &prefix[..idx]) {
                Ok(path) => path,
                // no valid key lives under a malformed prefix
                Err(_) => return Ok(Vec::new()),
            },
            None => bucket_dir.clone(),
        };

        let mut keys = Vec::new();
        let mut pending = vec![start];
        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
                    continue;
                }
                Err(err) => return Err(StorageError::Io(err)),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }

                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                if is_temp_file_name(&name) {
                    continue;
                }
                let Some(key) = paths::key_from_path(&bucket_dir, &path) else {
                    continue;
                };
                if key.starts_with(prefix) && names::is_valid_object_name(&key) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        debug!("collected {} keys under {}/{}", keys.len(), bucket, prefix);
        Ok(keys)
    }
}

/// Compute a synthetic "common prefix" for S3 list semantics.
///
/// Used only when a delimiter is provided. Returns Some(prefix) if the key
/// belongs to a grouped prefix, otherwise None.
fn compute_common_prefix(key: &str, requested_prefix: &str, delimiter: &str) -> Option<String> {
    let after_prefix = key.strip_prefix(requested_prefix)?;
    let pos = after_prefix.find(delimiter)?;
    let mut combined = String::from(requested_prefix);
    combined.push_str(&after_prefix[..pos + delimiter.len()]);
    Some(combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{put_object, test_service};

    async fn seeded() -> (tempfile::TempDir, StorageService) {
        let (dir, service) = test_service().await;
        service.make_bucket("listing").await.unwrap();
        for key in [
            "Asia/asiapics.jpg",
            "Asia/india/taj.png",
            "Europe/paris.jpg",
            "notes.txt",
            "zebra",
        ] {
            put_object(&service, "listing", key, key.as_bytes()).await;
        }
        (dir, service)
    }

    fn keys(result: &ListObjectsResult) -> Vec<&str> {
        result.objects.iter().map(|o| o.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_should_list_all_objects_recursively() {
        let (_dir, service) = seeded().await;
        let result = service
            .list_objects(
                "listing",
                ListObjectsParams {
                    max_keys: 1000,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(
            keys(&result),
            vec![
                "Asia/asiapics.jpg",
                "Asia/india/taj.png",
                "Europe/paris.jpg",
                "notes.txt",
                "zebra"
            ]
        );
        assert!(result.common_prefixes.is_empty());
        assert!(!result.is_truncated);
        assert_eq!(result.key_count, 5);
        assert_eq!(result.objects[0].content_type, "image/jpeg");
    }

    #[tokio::test]
    async fn test_should_group_by_delimiter() {
        let (_dir, service) = seeded().await;
        let result = service
            .list_objects(
                "listing",
                ListObjectsParams {
                    delimiter: Some("/".into()),
                    max_keys: 1000,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(result.common_prefixes, vec!["Asia/", "Europe/"]);
        assert_eq!(keys(&result), vec!["notes.txt", "zebra"]);

        let result = service
            .list_objects(
                "listing",
                ListObjectsParams {
                    prefix: Some("Asia/".into()),
                    delimiter: Some("/".into()),
                    max_keys: 1000,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(result.common_prefixes, vec!["Asia/india/"]);
        assert_eq!(keys(&result), vec!["Asia/asiapics.jpg"]);
    }

    #[tokio::test]
    async fn test_should_filter_by_partial_prefix() {
        let (_dir, service) = seeded().await;
        let result = service
            .list_objects(
                "listing",
                ListObjectsParams {
                    prefix: Some("Asia/as".into()),
                    max_keys: 1000,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(keys(&result), vec!["Asia/asiapics.jpg"]);

        let result = service
            .list_objects(
                "listing",
                ListObjectsParams {
                    prefix: Some("Nowhere/".into()),
                    max_keys: 1000,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(result.key_count, 0);
    }

    #[tokio::test]
    async fn test_should_paginate_with_continuation_token() {
        let (_dir, service) = seeded().await;
        let params = ListObjectsParams {
            delimiter: Some("/".into()),
            max_keys: 2,
            ..Default::default()
        };

        let first = service.list_objects("listing", params.clone()).await.unwrap();
        assert!(first.is_truncated);
        assert_eq!(first.common_prefixes, vec!["Asia/", "Europe/"]);
        assert_eq!(first.next_continuation_token.as_deref(), Some("Europe/"));

        let second = service
            .list_objects(
                "listing",
                ListObjectsParams {
                    continuation_token: first.next_continuation_token.clone(),
                    ..params
                },
            )
            .await
            .unwrap();
        assert!(!second.is_truncated);
        assert!(second.common_prefixes.is_empty());
        assert_eq!(keys(&second), vec!["notes.txt", "zebra"]);
        assert_eq!(second.next_continuation_token, None);
    }

    #[tokio::test]
    async fn test_should_skip_temp_files() {
        let (_dir, service) = seeded().await;
        fs::write(
            service.root.join("listing").join(".tmp-abandoned.part"),
            b"half",
        )
        .await
        .unwrap();

        let result = service
            .list_objects(
                "listing",
                ListObjectsParams {
                    max_keys: 1000,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(result.key_count, 5);
    }

    #[tokio::test]
    async fn test_should_fail_listing_missing_bucket() {
        let (_dir, service) = test_service().await;
        let err = service
            .list_objects("missing-bucket", ListObjectsParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::BucketNotFound { .. }));
    }

    #[test]
    fn test_should_compute_common_prefix() {
        assert_eq!(
            compute_common_prefix("Asia/india/taj.png", "Asia/", "/").as_deref(),
            Some("Asia/india/")
        );
        assert_eq!(compute_common_prefix("Asia/asiapics.jpg", "Asia/", "/"), None);
        assert_eq!(compute_common_prefix("zebra", "Asia/", "/"), None);
    }
}
