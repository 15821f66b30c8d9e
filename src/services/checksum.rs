//! Checksum artifacts: MD5 hashing helpers and the SQLite-backed index that
//! persists one entity tag per published object.
//!
//! The index is a cache of something that can always be recomputed from the
//! object bytes. Each row remembers the identity (inode on Unix), size and
//! modification time of the file it was computed for, and a row that no
//! longer matches the file on disk is treated exactly like a missing row.

use super::storage_service::{StorageError, StorageResult};
use base64::{Engine as _, engine::general_purpose};
use md5::Context;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use std::{
    fs::Metadata,
    io,
    path::Path,
    str::FromStr,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncReadExt},
};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// A persisted entity tag plus the file identity it was computed for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChecksumRecord {
    pub etag: String,
    pub size: u64,
    pub modified_ns: i64,
    pub file_id: i64,
}

impl ChecksumRecord {
    pub fn for_metadata(etag: impl Into<String>, meta: &Metadata) -> io::Result<Self> {
        Ok(Self {
            etag: etag.into(),
            size: meta.len(),
            modified_ns: modified_ns(meta)?,
            file_id: file_id(meta),
        })
    }

    /// Whether this record still describes the file behind `meta`.
    ///
    /// The file id matters because two uploads of equal length can land
    /// within one timestamp tick; each one publishes a distinct inode.
    pub fn matches(&self, meta: &Metadata) -> bool {
        self.size == meta.len()
            && self.file_id == file_id(meta)
            && modified_ns(meta).is_ok_and(|ns| ns == self.modified_ns)
    }
}

/// Durable checksum store shared by every clone of the storage service.
#[derive(Clone, Debug)]
pub struct ChecksumIndex {
    db: Arc<SqlitePool>,
}

impl ChecksumIndex {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Open (creating if needed) the index database behind a `sqlite://` URL.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?;
        Self::connect_with(options).await
    }

    /// Open (creating if needed) the index database stored at `path`.
    pub async fn open_file(path: impl AsRef<Path>) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new().filename(path.as_ref());
        Self::connect_with(options).await
    }

    async fn connect_with(options: SqliteConnectOptions) -> Result<Self, sqlx::Error> {
        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::debug!("applying {} checksum index statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    pub async fn lookup(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ChecksumRecord>, sqlx::Error> {
        let row = sqlx::query_as::<_, (String, i64, i64, i64)>(
            "SELECT etag, size_bytes, modified_ns, file_id
             FROM object_checksums WHERE bucket = ? AND key = ?",
        )
        .bind(bucket)
        .bind(key)
        .fetch_optional(&*self.db)
        .await?;

        Ok(row.map(|(etag, size, modified_ns, file_id)| ChecksumRecord {
            etag,
            size: u64::try_from(size).unwrap_or_default(),
            modified_ns,
            file_id,
        }))
    }

    /// Upsert the artifact for (bucket, key).
    pub async fn record(
        &self,
        bucket: &str,
        key: &str,
        record: &ChecksumRecord,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO object_checksums (bucket, key, etag, size_bytes, modified_ns, file_id)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(bucket, key) DO UPDATE SET
                etag = excluded.etag,
                size_bytes = excluded.size_bytes,
                modified_ns = excluded.modified_ns,
                file_id = excluded.file_id",
        )
        .bind(bucket)
        .bind(key)
        .bind(&record.etag)
        .bind(i64::try_from(record.size).unwrap_or(i64::MAX))
        .bind(record.modified_ns)
        .bind(record.file_id)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    pub async fn forget(&self, bucket: &str, key: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM object_checksums WHERE bucket = ? AND key = ?")
            .bind(bucket)
            .bind(key)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    pub async fn forget_bucket(&self, bucket: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM object_checksums WHERE bucket = ?")
            .bind(bucket)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected())
    }

    /// Whether the checksum table has been created in this database.
    pub async fn schema_ready(&self) -> Result<bool, sqlx::Error> {
        let tables = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'object_checksums'",
        )
        .fetch_one(&*self.db)
        .await?;
        Ok(tables == 1)
    }
}

/// Modification time in nanoseconds since the Unix epoch.
pub fn modified_ns(meta: &Metadata) -> io::Result<i64> {
    meta.modified().map(system_time_ns)
}

#[cfg(unix)]
pub fn file_id(meta: &Metadata) -> i64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino() as i64
}

#[cfg(not(unix))]
pub fn file_id(_meta: &Metadata) -> i64 {
    0
}

pub fn system_time_ns(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_nanos()).unwrap_or(i64::MAX),
        Err(before) => -i64::try_from(before.duration().as_nanos()).unwrap_or(i64::MAX),
    }
}

/// Hash a whole file. Returns the hex MD5 together with the metadata of the
/// exact file handle that was hashed.
///
/// This is the slow path taken when no usable artifact is stored.
pub async fn hash_file(path: &Path) -> io::Result<(String, Metadata)> {
    let mut file = File::open(path).await?;
    let meta = file.metadata().await?;
    let etag = hash_reader(&mut file).await?;
    Ok((etag, meta))
}

/// Hex MD5 of everything left in `reader`.
pub async fn hash_reader<R>(reader: &mut R) -> io::Result<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    let mut digest = Context::new();
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        digest.consume(&buf[..n]);
    }
    Ok(format!("{:x}", digest.compute()))
}

/// Decode a caller-supplied MD5, given either as base64 (`Content-MD5`) or as
/// 32 hex characters.
pub fn parse_expected_md5(bucket: &str, key: &str, digest: &str) -> StorageResult<[u8; 16]> {
    let invalid = || StorageError::InvalidDigest {
        bucket: bucket.to_string(),
        object: key.to_string(),
        digest: digest.to_string(),
    };

    let trimmed = digest.trim().trim_matches('"');
    let mut out = [0u8; 16];
    if trimmed.len() == 32 && hex::decode_to_slice(trimmed, &mut out).is_ok() {
        return Ok(out);
    }

    let decoded = general_purpose::STANDARD
        .decode(trimmed)
        .map_err(|_| invalid())?;
    <[u8; 16]>::try_from(decoded.as_slice()).map_err(|_| invalid())
}
