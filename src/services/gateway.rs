//! Typed façade over an [`ObjectStore`] bound to one bucket.
//!
//! The folder services never see pages, tokens or store-specific errors:
//! listings come out as a lazy stream of [`ObjectEntry`] and missing objects
//! as `Ok(false)` from [`ObjectStoreGateway::exists`].

use crate::store::{
    ByteStream, DeleteFailure, ListObjectsParams, ObjectInfo, ObjectStore, PutObject, StoreResult,
};
use futures::{Stream, TryStreamExt, stream};
use std::{collections::VecDeque, sync::Arc};
use tracing::debug;

pub const DELIMITER: &str = "/";
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// One listed key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    /// Key ends with the delimiter: a folder marker or a grouped prefix.
    pub is_dir: bool,
}

#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    pub prefix: String,
    /// List every key below `prefix` instead of grouping by `/`.
    pub recursive: bool,
}

impl ListOptions {
    pub fn recursive(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            recursive: true,
            ..Default::default()
        }
    }

    pub fn shallow(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }
}

struct ListState {
    params: ListObjectsParams,
    buffered: VecDeque<ObjectEntry>,
    last_prefix: Option<String>,
    exhausted: bool,
}

#[derive(Clone)]
pub struct ObjectStoreGateway {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    page_size: usize,
}

impl ObjectStoreGateway {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub async fn ensure_bucket(&self) -> StoreResult<()> {
        self.store.ensure_bucket(&self.bucket).await
    }

    /// Whether an object is stored under exactly `key`.
    ///
    /// A key ending in `//` never exists. Only the store's not-found signal
    /// maps to `false`; every other error is returned.
    pub async fn exists(&self, key: &str) -> StoreResult<bool> {
        if key.ends_with("//") {
            return Ok(false);
        }
        match self.store.stat(&self.bucket, key).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub async fn stat(&self, key: &str) -> StoreResult<ObjectInfo> {
        self.store.stat(&self.bucket, key).await
    }

    /// Lazily list keys below `options.prefix`, fetching one page at a time.
    ///
    /// Shallow listings report child folders once even when their common
    /// prefix straddles a page boundary.
    pub fn list(&self, options: ListOptions) -> impl Stream<Item = StoreResult<ObjectEntry>> + Send + '_ {
        let delimiter = (!options.recursive).then(|| DELIMITER.to_string());
        let state = ListState {
            params: ListObjectsParams {
                prefix: Some(options.prefix),
                delimiter,
                continuation_token: None,
                start_after: None,
                max_keys: self.page_size,
            },
            buffered: VecDeque::new(),
            last_prefix: None,
            exhausted: false,
        };

        stream::try_unfold(state, move |state| self.next_entry(state))
    }

    async fn next_entry(&self, mut state: ListState) -> StoreResult<Option<(ObjectEntry, ListState)>> {
        loop {
            if let Some(entry) = state.buffered.pop_front() {
                return Ok(Some((entry, state)));
            }
            if state.exhausted {
                return Ok(None);
            }

            let page = self.store.list_page(&self.bucket, &state.params).await?;
            debug!(
                bucket = %self.bucket,
                prefix = ?state.params.prefix,
                keys = page.key_count,
                truncated = page.is_truncated,
                "listed page"
            );

            let mut entries: Vec<ObjectEntry> = page
                .objects
                .into_iter()
                .map(|obj| ObjectEntry {
                    is_dir: obj.key.ends_with(DELIMITER),
                    key: obj.key,
                    size: obj.size,
                })
                .collect();
            for prefix in page.common_prefixes {
                if state.last_prefix.as_ref() == Some(&prefix) {
                    continue;
                }
                state.last_prefix = Some(prefix.clone());
                entries.push(ObjectEntry {
                    key: prefix,
                    size: 0,
                    is_dir: true,
                });
            }
            entries.sort_by(|a, b| a.key.cmp(&b.key));
            state.buffered.extend(entries);

            match page.next_continuation_token.filter(|_| page.is_truncated) {
                Some(token) => state.params.continuation_token = Some(token),
                None => state.exhausted = true,
            }
        }
    }

    /// Collect a whole listing.
    pub async fn list_all(&self, options: ListOptions) -> StoreResult<Vec<ObjectEntry>> {
        self.list(options).try_collect().await
    }

    /// Whether any key starts with `prefix`.
    pub async fn has_any(&self, prefix: &str) -> StoreResult<bool> {
        let params = ListObjectsParams {
            prefix: Some(prefix.to_string()),
            max_keys: 1,
            ..Default::default()
        };
        let page = self.store.list_page(&self.bucket, &params).await?;
        Ok(!page.objects.is_empty())
    }

    pub async fn put(&self, key: &str, body: ByteStream, length: u64) -> StoreResult<ObjectInfo> {
        self.store.put(&self.bucket, key, body, length).await
    }

    /// Write a zero-byte folder marker.
    pub async fn put_marker(&self, key: &str) -> StoreResult<()> {
        let marker = PutObject::marker(key);
        self.store
            .put(&self.bucket, &marker.key, marker.body, marker.length)
            .await
            .map(|_| ())
    }

    /// Bulk ("snowball") write of many objects in one store call.
    pub async fn put_all(&self, objects: Vec<PutObject>) -> StoreResult<()> {
        self.store.put_many(&self.bucket, objects).await
    }

    pub async fn get(&self, key: &str) -> StoreResult<ByteStream> {
        self.store.get(&self.bucket, key).await
    }

    pub async fn copy(&self, src_key: &str, dst_key: &str) -> StoreResult<ObjectInfo> {
        self.store.copy(&self.bucket, src_key, dst_key).await
    }

    pub async fn remove_all(&self, keys: Vec<String>) -> StoreResult<Vec<DeleteFailure>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.store.remove_many(&self.bucket, keys).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryObjectStore, bytes_body};

    async fn gateway_with(keys: &[&str], page_size: usize) -> ObjectStoreGateway {
        let store = Arc::new(MemoryObjectStore::new());
        let gateway = ObjectStoreGateway::new(store, "user-files").with_page_size(page_size);
        gateway.ensure_bucket().await.unwrap();
        for key in keys {
            if key.ends_with('/') {
                gateway.put_marker(key).await.unwrap();
            } else {
                gateway.put(key, bytes_body("ab"), 2).await.unwrap();
            }
        }
        gateway
    }

    fn keys(entries: &[ObjectEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.key.as_str()).collect()
    }

    #[tokio::test]
    async fn exists_distinguishes_missing_keys() {
        let gateway = gateway_with(&["u/a.txt"], 10).await;
        assert!(gateway.exists("u/a.txt").await.unwrap());
        assert!(!gateway.exists("u/b.txt").await.unwrap());
        assert!(!gateway.exists("u//").await.unwrap());
    }

    #[tokio::test]
    async fn recursive_listing_spans_pages() {
        let gateway = gateway_with(&["u/", "u/a", "u/d/", "u/d/b", "u/d/e/c", "v/x"], 2).await;
        let entries = gateway.list_all(ListOptions::recursive("u/")).await.unwrap();
        assert_eq!(keys(&entries), vec!["u/", "u/a", "u/d/", "u/d/b", "u/d/e/c"]);
        assert!(entries[2].is_dir);
        assert_eq!(entries[1].size, 2);
    }

    #[tokio::test]
    async fn shallow_listing_reports_each_child_folder_once() {
        let gateway =
            gateway_with(&["u/", "u/a", "u/d/", "u/d/1", "u/d/2", "u/d/3", "u/z"], 2).await;
        let entries = gateway.list_all(ListOptions::shallow("u/")).await.unwrap();
        assert_eq!(keys(&entries), vec!["u/", "u/a", "u/d/", "u/z"]);
    }

    #[tokio::test]
    async fn has_any_checks_prefix_content() {
        let gateway = gateway_with(&["u/d/b"], 10).await;
        assert!(gateway.has_any("u/d/").await.unwrap());
        assert!(!gateway.has_any("u/e/").await.unwrap());
    }
}
