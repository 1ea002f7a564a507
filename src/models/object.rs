//! Metadata row of an object (file or folder marker) held by the SQLite store.

use crate::store::ObjectInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Represents a single object (blob) within a bucket.
///
/// The struct stores metadata only; payload bytes live on disk.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Object {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Foreign key linking to the parent bucket.
    pub bucket_id: Uuid,

    /// Object key (path-like identifier within the bucket).
    pub key: String,

    pub size_bytes: i64,

    /// Hex MD5 of the payload.
    pub etag: Option<String>,

    /// Name of the payload file. Every write gets a fresh one, so a row only
    /// ever points at a file that was complete when the row was written.
    pub payload: String,

    pub last_modified: DateTime<Utc>,

    /// Soft-delete flag; deleted rows are invisible to every read.
    pub is_deleted: bool,
}

impl From<Object> for ObjectInfo {
    fn from(obj: Object) -> Self {
        ObjectInfo {
            key: obj.key,
            size: obj.size_bytes.max(0) as u64,
            etag: obj.etag,
            last_modified: obj.last_modified,
        }
    }
}
