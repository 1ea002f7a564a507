//! Per-user storage ceiling.
//!
//! Usage is recomputed from a recursive listing on every check. Checks for
//! the same prefix can be serialised with [`QuotaService::lock`]; that closes
//! the check-then-write gap inside this process only.

use crate::{
    errors::{DriveError, DriveResult},
    models::StorageUsageInfo,
    services::gateway::{ListOptions, ObjectStoreGateway},
    store::StoreError,
};
use futures::{TryStreamExt, future};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct QuotaService {
    gateway: ObjectStoreGateway,
    max_size: u64,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl QuotaService {
    pub fn new(gateway: ObjectStoreGateway, max_size: u64) -> Self {
        Self {
            gateway,
            max_size,
            locks: Arc::default(),
        }
    }

    /// Sum of all file sizes below `user_prefix`. Folder markers are skipped.
    pub async fn usage(&self, user_prefix: &str) -> DriveResult<StorageUsageInfo> {
        let current_size = self
            .gateway
            .list(ListOptions::recursive(user_prefix.to_string()))
            .try_fold(0u64, |total, entry| {
                let size = if entry.is_dir { 0 } else { entry.size };
                future::ready(Ok::<_, StoreError>(total.saturating_add(size)))
            })
            .await?;

        debug!(prefix = %user_prefix, current_size, max_size = self.max_size, "computed usage");
        Ok(StorageUsageInfo {
            current_size,
            max_size: self.max_size,
        })
    }

    /// Fail with `StorageLimitExceeded` if `candidate_bytes` more would push
    /// `user_prefix` over the ceiling. Filling it exactly is allowed; a prefix
    /// already over the ceiling accepts nothing, not even zero bytes.
    pub async fn check_limit(&self, user_prefix: &str, candidate_bytes: u64) -> DriveResult<()> {
        let usage = self.usage(user_prefix).await?;
        let available = usage.available();
        let fits = usage.current_size <= self.max_size
            && usage
                .current_size
                .checked_add(candidate_bytes)
                .is_some_and(|total| total <= self.max_size);
        if !fits {
            warn!(
                prefix = %user_prefix,
                requested = candidate_bytes,
                available,
                "storage limit exceeded"
            );
            return Err(DriveError::StorageLimitExceeded {
                available,
                requested: candidate_bytes,
            });
        }
        Ok(())
    }

    /// Exclusive section for `user_prefix`, held across check and write.
    ///
    /// Slots nobody holds or waits on are dropped on the way in.
    pub async fn lock(&self, user_prefix: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, slot| Arc::strong_count(slot) > 1);
            locks
                .entry(user_prefix.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryObjectStore, bytes_body};
    use std::time::Duration;

    async fn setup(max_size: u64, files: &[(&str, usize)]) -> QuotaService {
        let store = Arc::new(MemoryObjectStore::new());
        let gateway = ObjectStoreGateway::new(store, "user-files");
        gateway.ensure_bucket().await.unwrap();
        gateway.put_marker("1-alice/").await.unwrap();
        gateway.put_marker("1-alice/docs/").await.unwrap();
        for (key, size) in files {
            gateway
                .put(key, bytes_body(vec![b'x'; *size]), *size as u64)
                .await
                .unwrap();
        }
        QuotaService::new(gateway, max_size)
    }

    #[tokio::test]
    async fn usage_sums_files_of_one_user() {
        let quota = setup(
            100,
            &[("1-alice/a", 10), ("1-alice/docs/b", 15), ("2-bob/c", 40)],
        )
        .await;
        let usage = quota.usage("1-alice/").await.unwrap();
        assert_eq!(
            usage,
            StorageUsageInfo {
                current_size: 25,
                max_size: 100
            }
        );
    }

    #[tokio::test]
    async fn limit_is_inclusive() {
        let quota = setup(100, &[("1-alice/a", 60)]).await;
        quota.check_limit("1-alice/", 40).await.unwrap();
        let err = quota.check_limit("1-alice/", 41).await.unwrap_err();
        assert!(matches!(
            err,
            DriveError::StorageLimitExceeded {
                available: 40,
                requested: 41
            }
        ));
    }

    #[tokio::test]
    async fn over_full_prefix_rejects_even_empty_uploads() {
        let quota = setup(10, &[("1-alice/a", 20)]).await;
        for requested in [0, 1] {
            let err = quota.check_limit("1-alice/", requested).await.unwrap_err();
            assert!(matches!(
                err,
                DriveError::StorageLimitExceeded { available: 0, requested: r } if r == requested
            ));
        }
    }

    #[tokio::test]
    async fn full_prefix_still_accepts_empty_uploads() {
        let quota = setup(20, &[("1-alice/a", 20)]).await;
        quota.check_limit("1-alice/", 0).await.unwrap();
        assert!(quota.check_limit("1-alice/", 1).await.is_err());
    }

    #[tokio::test]
    async fn lock_serialises_same_prefix_only() {
        let quota = setup(10, &[]).await;
        let held = quota.lock("1-alice/").await;

        let other = tokio::time::timeout(Duration::from_millis(50), quota.lock("2-bob/")).await;
        assert!(other.is_ok());

        let same = tokio::time::timeout(Duration::from_millis(50), quota.lock("1-alice/")).await;
        assert!(same.is_err());

        drop(held);
        let again = tokio::time::timeout(Duration::from_millis(50), quota.lock("1-alice/")).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn released_slots_are_dropped() {
        let quota = setup(10, &[]).await;
        drop(quota.lock("1-alice/").await);
        let held = quota.lock("2-bob/").await;
        assert_eq!(quota.locks.lock().await.len(), 1);
        assert!(quota.locks.lock().await.contains_key("2-bob/"));
        drop(held);
    }
}
