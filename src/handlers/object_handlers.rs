//! HTTP handlers for object and bucket operations.
//! Streams object bodies to avoid buffering in memory and delegates storage
//! concerns to `StorageService`.

use crate::{
    errors::AppError,
    models::object::ObjectInfo,
    services::{
        listing::{ListObjectsParams, ListObjectsResult, MAX_KEYS_LIMIT},
        object_reader::read_range,
        storage_service::{StorageError, StorageService},
    },
};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::StreamExt;
use serde::Deserialize;
use std::io;
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Query params accepted by ListObjectsV2.
#[derive(Debug, Deserialize)]
pub struct ListObjectsV2Query {
    #[serde(rename = "list-type")]
    pub list_type: Option<u8>,
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    #[serde(rename = "max-keys")]
    pub max_keys: Option<usize>,
    #[serde(rename = "continuation-token")]
    pub continuation_token: Option<String>,
    #[serde(rename = "start-after")]
    pub start_after: Option<String>,
}

/// Upload an object to `/{bucket}/{*key}`.
///
/// `Content-MD5` becomes the expected checksum and `Content-Length` the
/// expected size; a mismatch on either rejects the upload.
pub async fn upload_object(
    State(service): State<StorageService>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let expected_md5 = match headers.get("content-md5") {
        Some(value) => Some(value.to_str().map_err(|_| {
            AppError::bad_request("InvalidDigest", "Content-MD5 header is not valid text")
        })?),
        None => None,
    };
    let size = match headers.get(header::CONTENT_LENGTH) {
        Some(value) => Some(
            value
                .to_str()
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .ok_or_else(|| {
                    AppError::bad_request("InvalidArgument", "Content-Length is not a number")
                })?,
        ),
        None => None,
    };

    let stream = body.into_data_stream().map(|chunk| chunk.map_err(io::Error::other));

    let object = service
        .create_object(&bucket, &key, expected_md5, size, stream)
        .await?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    if let Some(value) = object.etag.as_deref().and_then(quoted_etag) {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}

/// Download an object `/{bucket}/{*key}` as a streaming response.
///
/// Honors a single `Range: bytes=...` header with 206 Partial Content.
/// Headers and body both come from one open handle on the object.
pub async fn get_object(
    State(service): State<StorageService>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let (info, file) = service.open_object(&bucket, &key).await?;
    let total = info.size;

    let requested = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range_header);
    let (status, offset, length, content_range) = match requested {
        Some(range) => match resolve_range(&range, total) {
            Some((start, end)) => (
                StatusCode::PARTIAL_CONTENT,
                start,
                end - start + 1,
                Some(format!("bytes {}-{}/{}", start, end, total)),
            ),
            None => {
                return Err(AppError::new(
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    "InvalidRange",
                    format!("requested range is not satisfiable for size {}", total),
                ));
            }
        },
        // malformed range headers are ignored, as HTTP allows
        None => (StatusCode::OK, 0, total, None),
    };

    let range = read_range(file, total, offset, length).await?;
    debug!("streaming {}/{} from offset {} ({} bytes)", bucket, key, offset, length);

    let mut response = Response::new(Body::from_stream(ReaderStream::new(range)));
    *response.status_mut() = status;
    set_object_headers(response.headers_mut(), &info, length);
    if let Some(value) = content_range.and_then(|v| HeaderValue::from_str(&v).ok()) {
        response.headers_mut().insert(header::CONTENT_RANGE, value);
    }
    Ok(response)
}

/// HEAD `/{bucket}/{*key}` — same headers as GET but no body.
pub async fn head_object(
    State(service): State<StorageService>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let info = object_info(&service, &bucket, &key).await?;
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &info, info.size);

    Ok(response)
}

/// DELETE `/{bucket}/{*key}` — remove the object and any directories it
/// leaves empty.
pub async fn delete_object(
    State(service): State<StorageService>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    service.delete_object(&bucket, &key).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// GET `/{bucket}` — list objects, supports ?prefix=&delimiter=&max-keys=
pub async fn list_objects(
    State(service): State<StorageService>,
    Path(bucket): Path<String>,
    Query(q): Query<ListObjectsV2Query>,
) -> Result<Response, AppError> {
    let list_type = q.list_type.unwrap_or(2);
    if list_type != 2 {
        return Err(AppError::bad_request(
            "InvalidArgument",
            "Only list-type=2 is supported",
        ));
    }

    let continuation_token_raw = q.continuation_token.clone();
    let continuation_decoded = continuation_token_raw
        .as_deref()
        .map(decode_continuation_token);
    let start_after = q.start_after.clone();
    let max_keys = q.max_keys.unwrap_or(MAX_KEYS_LIMIT).clamp(1, MAX_KEYS_LIMIT);

    let params = ListObjectsParams {
        prefix: q.prefix.clone(),
        delimiter: q.delimiter.clone(),
        continuation_token: continuation_decoded,
        start_after: start_after.clone(),
        max_keys,
    };

    let result = service.list_objects(&bucket, params.clone()).await?;
    let xml = build_list_objects_v2_xml(
        &bucket,
        &params,
        continuation_token_raw.as_deref(),
        start_after.as_deref(),
        &result,
    );

    Ok(xml_response(StatusCode::OK, xml))
}

/// GET `/` — list buckets.
pub async fn list_buckets(State(service): State<StorageService>) -> Result<Response, AppError> {
    let buckets = service.list_buckets().await?;

    let mut xml = String::from(concat!(
        r#"<?xml version="1.0" encoding="UTF-8"?>"#,
        r#"<ListAllMyBucketsResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">"#,
        r#"<Buckets>"#
    ));
    for bucket in &buckets {
        xml.push_str("<Bucket>");
        xml.push_str(&format!("<Name>{}</Name>", xml_escape(&bucket.name)));
        xml.push_str(&format!(
            "<CreationDate>{}</CreationDate>",
            bucket.created_at.to_rfc3339_opts(SecondsFormat::Millis, true)
        ));
        xml.push_str("</Bucket>");
    }
    xml.push_str("</Buckets></ListAllMyBucketsResult>");

    Ok(xml_response(StatusCode::OK, xml))
}

/// PUT `/{bucket}` — create bucket.
pub async fn create_bucket(
    State(service): State<StorageService>,
    Path(bucket): Path<String>,
) -> Result<Response, AppError> {
    service.make_bucket(&bucket).await?;

    let xml = format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<CreateBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">"#,
            r#"<Location>/{}</Location>"#,
            r#"</CreateBucketResult>"#
        ),
        xml_escape(&bucket)
    );
    let mut response = xml_response(StatusCode::OK, xml);
    if let Ok(location) = HeaderValue::from_str(&format!("/{}", bucket)) {
        response.headers_mut().insert(header::LOCATION, location);
    }
    Ok(response)
}

/// HEAD `/{bucket}` — 200 if the bucket exists.
pub async fn head_bucket(
    State(service): State<StorageService>,
    Path(bucket): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    service.get_bucket_info(&bucket).await?;
    Ok(StatusCode::OK)
}

/// DELETE `/{bucket}` — delete an empty bucket.
pub async fn delete_bucket(
    State(service): State<StorageService>,
    Path(bucket): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    service.delete_bucket(&bucket).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Object metadata for GET/HEAD. Directory placeholders have no content and
/// answer like a missing key.
async fn object_info(
    service: &StorageService,
    bucket: &str,
    key: &str,
) -> Result<ObjectInfo, AppError> {
    let info = service.get_object_info(bucket, key).await?;
    if info.is_dir {
        return Err(StorageError::ObjectNotFound {
            bucket: bucket.to_string(),
            object: key.to_string(),
        }
        .into());
    }
    Ok(info)
}

fn set_object_headers(headers: &mut HeaderMap, info: &ObjectInfo, length: u64) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&info.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    if let Some(value) = info.etag.as_deref().and_then(quoted_etag) {
        headers.insert(header::ETAG, value);
    }
    if let Ok(value) = HeaderValue::from_str(&http_date(&info.last_modified)) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}

fn quoted_etag(etag: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!("\"{}\"", etag)).ok()
}

fn http_date(time: &DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn xml_response(status: StatusCode, xml: String) -> Response {
    let mut response = Response::new(Body::from(xml));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/xml"),
    );
    *response.status_mut() = status;
    response
}

/// Parsed byte range from a Range header.
#[derive(Debug, Clone, PartialEq)]
enum ByteRange {
    /// bytes=start-end (inclusive both ends)
    StartEnd(u64, u64),
    /// bytes=start-
    StartOpen(u64),
    /// bytes=-N (last N bytes)
    Suffix(u64),
}

/// Parse a single-range header value like "bytes=0-4", "bytes=5-", "bytes=-3".
fn parse_range_header(value: &str) -> Option<ByteRange> {
    let spec = value.trim().strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }

    if let Some(suffix) = spec.strip_prefix('-') {
        let n: u64 = suffix.parse().ok()?;
        (n > 0).then_some(ByteRange::Suffix(n))
    } else if let Some(start) = spec.strip_suffix('-') {
        Some(ByteRange::StartOpen(start.parse().ok()?))
    } else {
        let (start, end) = spec.split_once('-')?;
        let start: u64 = start.parse().ok()?;
        let end: u64 = end.parse().ok()?;
        (start <= end).then_some(ByteRange::StartEnd(start, end))
    }
}

/// Resolve a range against the object size into inclusive (start, end), or
/// None when it cannot be satisfied.
fn resolve_range(range: &ByteRange, total: u64) -> Option<(u64, u64)> {
    if total == 0 {
        return None;
    }
    match *range {
        ByteRange::StartEnd(start, end) if start < total => Some((start, end.min(total - 1))),
        ByteRange::StartOpen(start) if start < total => Some((start, total - 1)),
        ByteRange::Suffix(n) => Some((total.saturating_sub(n), total - 1)),
        _ => None,
    }
}

fn build_list_objects_v2_xml(
    bucket: &str,
    params: &ListObjectsParams,
    continuation_token: Option<&str>,
    start_after: Option<&str>,
    result: &ListObjectsResult,
) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?><ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">"#,
    );
    xml.push_str(&format!("<Name>{}</Name>", xml_escape(bucket)));
    xml.push_str(&format!(
        "<Prefix>{}</Prefix>",
        xml_escape(params.prefix.as_deref().unwrap_or(""))
    ));
    xml.push_str(&format!("<MaxKeys>{}</MaxKeys>", params.max_keys));
    xml.push_str(&format!("<KeyCount>{}</KeyCount>", result.key_count));
    if let Some(token) = continuation_token {
        xml.push_str(&format!(
            "<ContinuationToken>{}</ContinuationToken>",
            xml_escape(token)
        ));
    }
    if let Some(sa) = start_after {
        xml.push_str(&format!("<StartAfter>{}</StartAfter>", xml_escape(sa)));
    }
    if let Some(delim) = &params.delimiter {
        xml.push_str(&format!("<Delimiter>{}</Delimiter>", xml_escape(delim)));
    }
    xml.push_str(&format!(
        "<IsTruncated>{}</IsTruncated>",
        if result.is_truncated { "true" } else { "false" }
    ));
    if let Some(next) = &result.next_continuation_token {
        let encoded = encode_continuation_token(next);
        xml.push_str(&format!(
            "<NextContinuationToken>{}</NextContinuationToken>",
            xml_escape(&encoded)
        ));
    }

    for obj in &result.objects {
        xml.push_str("<Contents>");
        xml.push_str(&format!("<Key>{}</Key>", xml_escape(&obj.name)));
        xml.push_str(&format!(
            "<LastModified>{}</LastModified>",
            obj.last_modified
                .to_rfc3339_opts(SecondsFormat::Millis, true)
        ));
        let etag = obj.etag.as_deref().unwrap_or("");
        xml.push_str(&format!("<ETag>\"{}\"</ETag>", xml_escape(etag)));
        xml.push_str(&format!("<Size>{}</Size>", obj.size));
        xml.push_str("<StorageClass>STANDARD</StorageClass>");
        xml.push_str("</Contents>");
    }

    for prefix in &result.common_prefixes {
        xml.push_str("<CommonPrefixes><Prefix>");
        xml.push_str(&xml_escape(prefix));
        xml.push_str("</Prefix></CommonPrefixes>");
    }

    xml.push_str("</ListBucketResult>");
    xml
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn encode_continuation_token(token: &str) -> String {
    general_purpose::STANDARD.encode(token)
}

fn decode_continuation_token(token: &str) -> String {
    general_purpose::STANDARD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| token.to_string())
}
