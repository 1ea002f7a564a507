//! Name search across one user's whole prefix.

use crate::{
    errors::DriveResult,
    models::{StorageItem, item::leaf_name},
    services::gateway::{ListOptions, ObjectStoreGateway},
    store::StoreError,
};
use futures::{TryStreamExt, future};
use tracing::debug;

#[derive(Clone)]
pub struct SearchService {
    gateway: ObjectStoreGateway,
}

impl SearchService {
    pub fn new(gateway: ObjectStoreGateway) -> Self {
        Self { gateway }
    }

    /// Every file and folder below `user_prefix` whose own name contains
    /// `query`, ignoring case. A blank query matches nothing.
    ///
    /// Results are unranked; the listing only ever covers `user_prefix`.
    pub async fn search(&self, user_prefix: &str, query: &str) -> DriveResult<Vec<StorageItem>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let needle = query.to_lowercase();

        let matches: Vec<StorageItem> = self
            .gateway
            .list(ListOptions::recursive(user_prefix.to_string()))
            .try_filter_map(|entry| {
                let hit = leaf_name(&entry.key).to_lowercase().contains(&needle);
                let item = hit
                    .then(|| StorageItem::from_key(user_prefix, &entry.key, entry.size))
                    .flatten();
                future::ready(Ok::<_, StoreError>(item))
            })
            .try_collect()
            .await?;

        debug!(prefix = %user_prefix, query = %query, hits = matches.len(), "searched");
        Ok(matches)
    }
}
