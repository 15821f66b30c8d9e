//! Range reads of published objects.
//!
//! Every read works from a single open handle. Size, entity tag and bytes
//! all come from that handle, so a publish racing with the read cannot mix
//! the old object's headers with the new object's body.

use super::{
    object_info::{PathKind, classify, etag_for_handle, file_info, not_found},
    paths,
    storage_service::{StorageError, StorageResult, StorageService},
};
use crate::models::object::ObjectInfo;
use std::{
    fs::Metadata,
    io::{ErrorKind, SeekFrom},
};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt, Take},
};
use tracing::debug;

impl StorageService {
    /// Open an object and describe it from the same handle.
    ///
    /// The returned file is positioned at the start. It keeps the published
    /// inode alive, so later renames or deletes of the key do not change what
    /// it reads.
    pub async fn open_object(&self, bucket: &str, key: &str) -> StorageResult<(ObjectInfo, File)> {
        let (mut file, meta) = self.open_published(bucket, key).await?;
        let etag = etag_for_handle(&self.index, bucket, key, &mut file, &meta).await?;
        Ok((file_info(bucket, key, &meta, etag), file))
    }

    /// Stream `length` bytes of an object starting at `offset` into `sink`.
    ///
    /// `length == 0` reads to the end. A range running past the end of the
    /// object is clamped; an `offset` past the end is an `InvalidRange`
    /// (an offset equal to the size yields zero bytes). Directories are not
    /// readable and answer `ObjectNotFound`.
    ///
    /// Returns the number of bytes written. The sink is flushed before
    /// returning; sink failures surface as `Io`.
    pub async fn get_object<W>(
        &self,
        sink: &mut W,
        bucket: &str,
        key: &str,
        offset: u64,
        length: u64,
    ) -> StorageResult<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let (file, meta) = self.open_published(bucket, key).await?;
        let mut range = read_range(file, meta.len(), offset, length).await?;
        let copied = tokio::io::copy(&mut range, sink).await?;
        sink.flush().await?;

        debug!(
            "read {}/{} bytes {}..{} ({} bytes)",
            bucket,
            key,
            offset,
            offset + copied,
            copied
        );
        Ok(copied)
    }

    async fn open_published(&self, bucket: &str, key: &str) -> StorageResult<(File, Metadata)> {
        self.check_object_args(bucket, key).await?;
        let path = paths::object_path(&self.root, bucket, key)?;

        if !matches!(classify(&self.root, &path).await?, PathKind::File(_)) {
            return Err(not_found(bucket, key));
        }
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
                return Err(not_found(bucket, key));
            }
            Err(err) => return Err(StorageError::Io(err)),
        };
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(not_found(bucket, key));
        }
        Ok((file, meta))
    }
}

/// Limit an open object of `size` bytes to `length` bytes from `offset`.
///
/// Same range rules as [`StorageService::get_object`].
pub async fn read_range(
    mut file: File,
    size: u64,
    offset: u64,
    length: u64,
) -> StorageResult<Take<File>> {
    if offset > size {
        return Err(StorageError::InvalidRange { offset, size });
    }
    let remaining = size - offset;
    let wanted = if length == 0 {
        remaining
    } else {
        length.min(remaining)
    };

    file.seek(SeekFrom::Start(offset)).await?;
    Ok(file.take(wanted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{put_object, test_service};
    use std::{
        io,
        pin::Pin,
        task::{Context, Poll},
    };

    const TEXT: &[u8] = b"Jack and Jill went up the hill / To fetch a pail of water.";

    /// Sink that accepts a few bytes and then fails.
    struct BrokenSink {
        budget: usize,
    }

    impl AsyncWrite for BrokenSink {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.budget == 0 {
                return Poll::Ready(Err(io::Error::new(ErrorKind::BrokenPipe, "sink closed")));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    async fn read(service: &StorageService, key: &str, offset: u64, length: u64) -> Vec<u8> {
        let mut out = Vec::new();
        let n = service
            .get_object(&mut out, "bucket", key, offset, length)
            .await
            .unwrap_or_else(|e| panic!("get_object failed: {e}"));
        assert_eq!(n, out.len() as u64);
        out
    }

    #[tokio::test]
    async fn test_should_round_trip_full_object() {
        let (_dir, service) = test_service().await;
        service.make_bucket("bucket").await.unwrap();
        let info = put_object(&service, "bucket", "object0", TEXT).await;

        assert_eq!(read(&service, "object0", 0, 0).await, TEXT);
        assert_eq!(info.etag, Some(format!("{:x}", md5::compute(TEXT))));
    }

    #[tokio::test]
    async fn test_should_read_requested_range() {
        let (_dir, service) = test_service().await;
        service.make_bucket("bucket").await.unwrap();
        put_object(&service, "bucket", "object0", TEXT).await;

        assert_eq!(read(&service, "object0", 0, 4).await, b"Jack");
        assert_eq!(read(&service, "object0", 9, 4).await, b"Jill");
        assert_eq!(read(&service, "object0", 52, 0).await, b"water.");
    }

    #[tokio::test]
    async fn test_should_clamp_range_past_end() {
        let (_dir, service) = test_service().await;
        service.make_bucket("bucket").await.unwrap();
        put_object(&service, "bucket", "object0", TEXT).await;

        let tail = read(&service, "object0", 52, 1000).await;
        assert_eq!(tail, b"water.");
    }

    #[tokio::test]
    async fn test_should_treat_offset_at_size_as_empty_and_beyond_as_error() {
        let (_dir, service) = test_service().await;
        service.make_bucket("bucket").await.unwrap();
        put_object(&service, "bucket", "object0", TEXT).await;
        let size = TEXT.len() as u64;

        // offset == size: zero bytes, no error
        assert!(read(&service, "object0", size, 0).await.is_empty());
        assert!(read(&service, "object0", size, 10).await.is_empty());

        // offset > size: range error
        let mut out = Vec::new();
        let err = service
            .get_object(&mut out, "bucket", "object0", size + 1, 0)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::InvalidRange { offset, size: s } if offset == size + 1 && s == size
        ));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_should_read_empty_object() {
        let (_dir, service) = test_service().await;
        service.make_bucket("bucket").await.unwrap();
        put_object(&service, "bucket", "empty", b"").await;

        assert!(read(&service, "empty", 0, 0).await.is_empty());
    }

    #[tokio::test]
    async fn test_should_not_read_directories_or_missing_objects() {
        let (_dir, service) = test_service().await;
        service.make_bucket("bucket").await.unwrap();
        put_object(&service, "bucket", "x/y.jpg", b"pic").await;

        let mut out = Vec::new();
        for key in ["x", "missing", "x/y.jpg/z"] {
            let err = service
                .get_object(&mut out, "bucket", key, 0, 0)
                .await
                .unwrap_err();
            assert!(
                matches!(err, StorageError::ObjectNotFound { .. }),
                "unexpected error for `{key}`: {err}"
            );
        }
    }

    #[tokio::test]
    async fn test_should_report_missing_bucket_before_object() {
        let (_dir, service) = test_service().await;
        let mut out = Vec::new();

        let err = service
            .get_object(&mut out, "no-such-bucket", "key", 0, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::BucketNotFound { .. }));

        let err = service
            .get_object(&mut out, "no-such-bucket", "", 0, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ObjectNameInvalid { .. }));
    }

    #[tokio::test]
    async fn test_should_keep_reading_opened_object_after_replace() {
        let (_dir, service) = test_service().await;
        service.make_bucket("bucket").await.unwrap();
        put_object(&service, "bucket", "object0", TEXT).await;

        let (info, file) = service.open_object("bucket", "object0").await.unwrap();
        put_object(&service, "bucket", "object0", b"short").await;

        assert_eq!(info.size, TEXT.len() as u64);
        assert_eq!(info.etag, Some(format!("{:x}", md5::compute(TEXT))));
        let mut out = Vec::new();
        read_range(file, info.size, 0, 0)
            .await
            .unwrap()
            .read_to_end(&mut out)
            .await
            .unwrap();
        assert_eq!(out, TEXT);
    }

    #[tokio::test]
    async fn test_should_hash_through_handle_when_checksum_missing() {
        let (_dir, service) = test_service().await;
        service.make_bucket("bucket").await.unwrap();
        put_object(&service, "bucket", "object0", TEXT).await;
        service.index.forget("bucket", "object0").await.unwrap();

        let (info, file) = service.open_object("bucket", "object0").await.unwrap();
        assert_eq!(info.etag, Some(format!("{:x}", md5::compute(TEXT))));

        // the handle is rewound after hashing
        let mut out = Vec::new();
        read_range(file, info.size, 9, 4)
            .await
            .unwrap()
            .read_to_end(&mut out)
            .await
            .unwrap();
        assert_eq!(out, b"Jill");
        assert!(service.index.lookup("bucket", "object0").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_should_propagate_sink_failure() {
        let (_dir, service) = test_service().await;
        service.make_bucket("bucket").await.unwrap();
        put_object(&service, "bucket", "object0", TEXT).await;

        let mut sink = BrokenSink { budget: 5 };
        let err = service
            .get_object(&mut sink, "bucket", "object0", 0, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Io(ref e) if e.kind() == ErrorKind::BrokenPipe));
    }
}
