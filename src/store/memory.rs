//! In-process object store.
//!
//! Keeps every bucket as an ordered map so listings match the SQLite store
//! key for key. Useful for tests and for embedding the folder layer without a
//! database.

use super::{
    ByteStream, DeleteFailure, ListObjectsParams, ListObjectsResult, ObjectInfo, ObjectStore,
    StoreError, StoreResult, assemble_page, bytes_body, validate_bucket_name, validate_object_key,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    io::{self, ErrorKind},
    ops::Bound,
};
use tokio::sync::RwLock;

const MAX_LIST_KEYS: usize = 1000;

#[derive(Clone, Debug)]
struct StoredObject {
    data: Bytes,
    etag: String,
    last_modified: DateTime<Utc>,
}

impl StoredObject {
    fn info(&self, key: &str) -> ObjectInfo {
        ObjectInfo {
            key: key.to_string(),
            size: self.data.len() as u64,
            etag: Some(self.etag.clone()),
            last_modified: self.last_modified,
        }
    }
}

/// How an injected read of one key misbehaves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadFault {
    /// The body yields its data, then an I/O error.
    Fail,
    /// The body never yields.
    Stall,
}

#[derive(Default)]
pub struct MemoryObjectStore {
    buckets: RwLock<HashMap<String, BTreeMap<String, StoredObject>>>,
    failing_deletes: RwLock<HashSet<String>>,
    read_faults: RwLock<HashMap<String, ReadFault>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future delete of `key` fail, as a store would on a
    /// per-object permission or transport error.
    pub async fn fail_deletes_of(&self, key: impl Into<String>) {
        self.failing_deletes.write().await.insert(key.into());
    }

    /// Make every future read of `key` misbehave as `fault` describes.
    pub async fn fault_reads_of(&self, key: impl Into<String>, fault: ReadFault) {
        self.read_faults.write().await.insert(key.into(), fault);
    }

    /// All live keys of a bucket, in order.
    pub async fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .read()
            .await
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn missing(bucket: &str, key: &str) -> StoreError {
        StoreError::NoSuchKey {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn ensure_bucket(&self, bucket: &str) -> StoreResult<()> {
        validate_bucket_name(bucket)?;
        self.buckets
            .write()
            .await
            .entry(bucket.to_string())
            .or_default();
        Ok(())
    }

    async fn stat(&self, bucket: &str, key: &str) -> StoreResult<ObjectInfo> {
        validate_object_key(key)?;
        let buckets = self.buckets.read().await;
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| StoreError::NoSuchBucket(bucket.to_string()))?;
        objects
            .get(key)
            .map(|obj| obj.info(key))
            .ok_or_else(|| Self::missing(bucket, key))
    }

    async fn list_page(
        &self,
        bucket: &str,
        params: &ListObjectsParams,
    ) -> StoreResult<ListObjectsResult> {
        let max_keys = params.max_keys.clamp(1, MAX_LIST_KEYS);
        let prefix = params.prefix.clone().unwrap_or_default();
        let lower = match params
            .continuation_token
            .as_ref()
            .or(params.start_after.as_ref())
        {
            Some(token) => Bound::Excluded(token.clone()),
            None => Bound::Included(prefix.clone()),
        };

        let buckets = self.buckets.read().await;
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| StoreError::NoSuchBucket(bucket.to_string()))?;
        let rows = objects
            .range((lower, Bound::Unbounded))
            .skip_while(|(key, _)| !key.starts_with(&prefix) && key.as_str() < prefix.as_str())
            .take_while(|(key, _)| key.starts_with(&prefix))
            .take(max_keys + 1)
            .map(|(key, obj)| obj.info(key))
            .collect();

        Ok(assemble_page(rows, params, max_keys))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        mut body: ByteStream,
        length: u64,
    ) -> StoreResult<ObjectInfo> {
        validate_object_key(key)?;
        if !self.buckets.read().await.contains_key(bucket) {
            return Err(StoreError::NoSuchBucket(bucket.to_string()));
        }

        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        if buf.len() as u64 != length {
            return Err(StoreError::Io(io::Error::new(
                ErrorKind::InvalidData,
                format!(
                    "object `{}` declared {} bytes but body had {}",
                    key,
                    length,
                    buf.len()
                ),
            )));
        }

        let stored = StoredObject {
            etag: format!("{:x}", md5::compute(&buf)),
            data: buf.freeze(),
            last_modified: Utc::now(),
        };
        let info = stored.info(key);
        let mut buckets = self.buckets.write().await;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::NoSuchBucket(bucket.to_string()))?;
        objects.insert(key.to_string(), stored);
        Ok(info)
    }

    async fn get(&self, bucket: &str, key: &str) -> StoreResult<ByteStream> {
        validate_object_key(key)?;
        let buckets = self.buckets.read().await;
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| StoreError::NoSuchBucket(bucket.to_string()))?;
        let data = objects
            .get(key)
            .map(|obj| obj.data.clone())
            .ok_or_else(|| Self::missing(bucket, key))?;
        drop(buckets);

        match self.read_faults.read().await.get(key).copied() {
            Some(ReadFault::Fail) => Ok(Box::pin(stream::iter(vec![
                Ok(data),
                Err(io::Error::new(ErrorKind::ConnectionReset, "read interrupted")),
            ]))),
            Some(ReadFault::Stall) => Ok(Box::pin(stream::pending::<io::Result<Bytes>>())),
            None => Ok(bytes_body(data)),
        }
    }

    async fn copy(&self, bucket: &str, src_key: &str, dst_key: &str) -> StoreResult<ObjectInfo> {
        validate_object_key(src_key)?;
        validate_object_key(dst_key)?;
        let mut buckets = self.buckets.write().await;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::NoSuchBucket(bucket.to_string()))?;
        let mut copied = objects
            .get(src_key)
            .cloned()
            .ok_or_else(|| Self::missing(bucket, src_key))?;
        copied.last_modified = Utc::now();
        let info = copied.info(dst_key);
        objects.insert(dst_key.to_string(), copied);
        Ok(info)
    }

    async fn remove_many(
        &self,
        bucket: &str,
        keys: Vec<String>,
    ) -> StoreResult<Vec<DeleteFailure>> {
        let failing = self.failing_deletes.read().await.clone();
        let mut buckets = self.buckets.write().await;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::NoSuchBucket(bucket.to_string()))?;

        let mut failures = Vec::new();
        for key in keys {
            if failing.contains(&key) {
                failures.push(DeleteFailure {
                    reason: "access denied".into(),
                    key,
                });
                continue;
            }
            objects.remove(&key);
        }
        Ok(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUCKET: &str = "user-files";

    async fn store_with(keys: &[&str]) -> MemoryObjectStore {
        let store = MemoryObjectStore::new();
        store.ensure_bucket(BUCKET).await.unwrap();
        for key in keys {
            store.put(BUCKET, key, bytes_body("x"), 1).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn delimiter_listing_groups_children() {
        let store = store_with(&["u/", "u/a.txt", "u/docs/", "u/docs/b.txt", "v/c.txt"]).await;
        let params = ListObjectsParams {
            prefix: Some("u/".into()),
            delimiter: Some("/".into()),
            max_keys: 100,
            ..Default::default()
        };
        let page = store.list_page(BUCKET, &params).await.unwrap();
        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["u/", "u/a.txt"]);
        assert_eq!(page.common_prefixes, vec!["u/docs/".to_string()]);
    }

    #[tokio::test]
    async fn start_after_skips_earlier_keys() {
        let store = store_with(&["u/a", "u/b", "u/c"]).await;
        let params = ListObjectsParams {
            prefix: Some("u/".into()),
            start_after: Some("u/a".into()),
            max_keys: 100,
            ..Default::default()
        };
        let page = store.list_page(BUCKET, &params).await.unwrap();
        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["u/b", "u/c"]);
    }

    #[tokio::test]
    async fn injected_delete_failures_are_reported_per_key() {
        let store = store_with(&["u/a", "u/b"]).await;
        store.fail_deletes_of("u/a").await;
        let failures = store
            .remove_many(BUCKET, vec!["u/a".into(), "u/b".into()])
            .await
            .unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].key, "u/a");
        assert_eq!(store.keys(BUCKET).await, vec!["u/a".to_string()]);
    }

    #[tokio::test]
    async fn injected_read_failure_breaks_the_body() {
        let store = store_with(&["u/a", "u/b"]).await;
        store.fault_reads_of("u/a", ReadFault::Fail).await;

        let chunks: Vec<io::Result<Bytes>> = store.get(BUCKET, "u/a").await.unwrap().collect().await;
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].is_err());

        let chunks: Vec<io::Result<Bytes>> = store.get(BUCKET, "u/b").await.unwrap().collect().await;
        assert_eq!(chunks.len(), 1);
    }
}
