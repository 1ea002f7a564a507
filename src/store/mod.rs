//! Flat, prefix-addressed object store primitives.
//!
//! Everything above this module sees storage as a single ordered key space per
//! bucket with six operations: stat, list-by-prefix, put, get, copy and
//! batch delete. There are no directories, no rename and no quotas here.

pub mod memory;
pub mod sqlite;

pub use memory::{MemoryObjectStore, ReadFault};
pub use sqlite::SqliteObjectStore;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, stream};
use serde::Serialize;
use std::{io, pin::Pin};
use thiserror::Error;

/// Owned, sendable stream of object payload chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bucket `{0}` not found")]
    NoSuchBucket(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    NoSuchKey { bucket: String, key: String },
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StoreError {
    /// True when the store reported that the addressed key does not exist.
    ///
    /// This is the only signal the folder layer interprets; every other
    /// variant is an infrastructure failure and must be propagated as-is.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NoSuchKey { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Metadata of a single stored object.
#[derive(Clone, Debug, Serialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub etag: Option<String>,
    pub last_modified: DateTime<Utc>,
}

/// Parameters for one page of a ListObjectsV2-style listing.
#[derive(Clone, Debug, Default)]
pub struct ListObjectsParams {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub continuation_token: Option<String>,
    pub start_after: Option<String>,
    pub max_keys: usize,
}

#[derive(Debug, Default)]
pub struct ListObjectsResult {
    pub objects: Vec<ObjectInfo>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
    pub key_count: usize,
}

/// A key that could not be removed by [`ObjectStore::remove_many`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteFailure {
    pub key: String,
    pub reason: String,
}

/// One object of a bulk ("snowball") write.
pub struct PutObject {
    pub key: String,
    pub body: ByteStream,
    pub length: u64,
}

impl PutObject {
    pub fn new(key: impl Into<String>, body: ByteStream, length: u64) -> Self {
        Self {
            key: key.into(),
            body,
            length,
        }
    }

    /// Zero-byte folder marker.
    pub fn marker(key: impl Into<String>) -> Self {
        Self::new(key, empty_body(), 0)
    }
}

/// Primitive operations of a flat object store.
///
/// Implementations map their own "missing object" signal onto
/// [`StoreError::NoSuchKey`] and keep every other failure distinct.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create the bucket if it does not exist yet.
    async fn ensure_bucket(&self, bucket: &str) -> StoreResult<()>;

    async fn stat(&self, bucket: &str, key: &str) -> StoreResult<ObjectInfo>;

    /// Return one page of keys ordered lexicographically.
    async fn list_page(
        &self,
        bucket: &str,
        params: &ListObjectsParams,
    ) -> StoreResult<ListObjectsResult>;

    /// Write an object, replacing any previous version. The stream must yield
    /// exactly `length` bytes.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        length: u64,
    ) -> StoreResult<ObjectInfo>;

    /// Write many objects in one call.
    async fn put_many(&self, bucket: &str, objects: Vec<PutObject>) -> StoreResult<()> {
        for object in objects {
            self.put(bucket, &object.key, object.body, object.length)
                .await?;
        }
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> StoreResult<ByteStream>;

    async fn copy(&self, bucket: &str, src_key: &str, dst_key: &str) -> StoreResult<ObjectInfo>;

    /// Remove every key, reporting the ones that failed. Keys processed before
    /// a failure stay removed.
    async fn remove_many(&self, bucket: &str, keys: Vec<String>)
    -> StoreResult<Vec<DeleteFailure>>;
}

/// A body that yields no bytes.
pub fn empty_body() -> ByteStream {
    Box::pin(stream::empty())
}

/// A body made of one in-memory chunk.
pub fn bytes_body(bytes: impl Into<Bytes>) -> ByteStream {
    let bytes = bytes.into();
    Box::pin(stream::once(async move { Ok(bytes) }))
}

/// Reject keys no backend can address safely.
pub fn validate_object_key(key: &str) -> StoreResult<()> {
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Validate bucket name format.
///
/// Enforces S3-like naming rules:
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - cannot start/end with dot or hyphen
/// - cannot contain consecutive dots or dot-hyphen patterns
/// - cannot look like an IPv4 address
pub fn validate_bucket_name(name: &str) -> StoreResult<()> {
    let invalid = |reason: &str| StoreError::InvalidBucketName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return Err(invalid("must be between 3 and 63 characters"));
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err(invalid(
            "allowed characters are lowercase letters, digits, dots, and hyphens",
        ));
    }
    if name.starts_with('.') || name.ends_with('.') || name.starts_with('-') || name.ends_with('-')
    {
        return Err(invalid("must start and end with a lowercase letter or digit"));
    }
    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return Err(invalid(
            "cannot contain consecutive dots or dot-hyphen combinations",
        ));
    }
    if is_ipv4_like(name) {
        return Err(invalid("must not be formatted like an IP address"));
    }
    Ok(())
}

/// Compute a synthetic "common prefix" for S3 list semantics.
///
/// Returns `Some(prefix)` when the key lies below a further delimiter after
/// the requested prefix, otherwise `None`.
pub(crate) fn compute_common_prefix(
    key: &str,
    requested_prefix: Option<&str>,
    delimiter: &str,
) -> Option<String> {
    let prefix = requested_prefix.unwrap_or("");
    let after_prefix = key.strip_prefix(prefix)?;
    let pos = after_prefix.find(delimiter)?;
    let mut combined = String::with_capacity(prefix.len() + pos + delimiter.len());
    combined.push_str(prefix);
    combined.push_str(&after_prefix[..pos + delimiter.len()]);
    Some(combined)
}

/// Split one ordered page of matching objects into contents and common
/// prefixes. `rows` holds at most `max_keys + 1` entries; the extra one only
/// signals truncation.
pub(crate) fn assemble_page(
    mut rows: Vec<ObjectInfo>,
    params: &ListObjectsParams,
    max_keys: usize,
) -> ListObjectsResult {
    let mut is_truncated = false;
    let mut next_continuation_token = None;
    if rows.len() > max_keys {
        rows.truncate(max_keys);
        is_truncated = true;
        next_continuation_token = rows.last().map(|obj| obj.key.clone());
    }

    let mut objects = Vec::new();
    let mut common_prefixes: Vec<String> = Vec::new();
    for obj in rows {
        if let Some(delim) = params.delimiter.as_deref().filter(|d| !d.is_empty()) {
            if let Some(prefix) = compute_common_prefix(&obj.key, params.prefix.as_deref(), delim)
            {
                // rows are sorted, so equal prefixes are adjacent
                if common_prefixes.last() != Some(&prefix) {
                    common_prefixes.push(prefix);
                }
                continue;
            }
        }
        objects.push(obj);
    }

    let key_count = objects.len() + common_prefixes.len();
    ListObjectsResult {
        objects,
        common_prefixes,
        is_truncated,
        next_continuation_token,
        key_count,
    }
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}
