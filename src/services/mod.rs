pub mod checksum;
pub mod content_type;
pub mod listing;
pub mod names;
pub mod object_info;
pub mod object_reader;
pub mod object_writer;
pub mod paths;
pub mod storage_service;

#[cfg(test)]
pub(crate) mod test_support {
    use super::{checksum::ChecksumIndex, storage_service::StorageService};
    use crate::models::object::ObjectInfo;
    use bytes::Bytes;
    use futures::stream::{self, Iter};
    use std::{io, vec::IntoIter};
    use tempfile::TempDir;

    /// A service over a fresh temporary root with a migrated index.
    ///
    /// The returned `TempDir` must outlive the service.
    pub async fn test_service() -> (TempDir, StorageService) {
        let dir = TempDir::new().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let meta = dir.path().join("meta");
        tokio::fs::create_dir_all(&meta)
            .await
            .unwrap_or_else(|e| panic!("create meta dir: {e}"));

        let index = ChecksumIndex::open_file(meta.join("index.db"))
            .await
            .unwrap_or_else(|e| panic!("open index: {e}"));
        index
            .migrate()
            .await
            .unwrap_or_else(|e| panic!("migrate index: {e}"));

        let service = StorageService::open(index, dir.path().join("objects"))
            .await
            .unwrap_or_else(|e| panic!("open storage: {e}"));
        (dir, service)
    }

    /// A single-chunk body stream.
    pub fn body(bytes: &[u8]) -> Iter<IntoIter<io::Result<Bytes>>> {
        stream::iter(vec![Ok(Bytes::copy_from_slice(bytes))])
    }

    /// Store `bytes` under (bucket, key) with a declared size and no digest.
    pub async fn put_object(
        service: &StorageService,
        bucket: &str,
        key: &str,
        bytes: &[u8],
    ) -> ObjectInfo {
        service
            .create_object(bucket, key, None, Some(bytes.len() as u64), body(bytes))
            .await
            .unwrap_or_else(|e| panic!("put {bucket}/{key} failed: {e}"))
    }
}
