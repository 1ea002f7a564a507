//! Folder semantics on top of a flat key space.
//!
//! A folder exists when its zero-byte marker (`.../name/`) exists or when any
//! key lies below its prefix. Every multi-object operation here is a sequence
//! of single-object store calls; none of them is atomic.

use crate::{
    errors::{DriveError, DriveResult},
    models::{FullItemPath, StorageItem, UploadFile},
    services::{
        gateway::{DELIMITER, ListOptions, ObjectStoreGateway},
        path_policy::{validate_name, validate_relative_path},
    },
    store::{DeleteFailure, PutObject},
};
use futures::{StreamExt, TryStreamExt, stream};
use std::collections::BTreeSet;
use tracing::{debug, info};

pub const DEFAULT_MAX_CONCURRENT_OPS: usize = 16;

#[derive(Clone)]
pub struct FolderService {
    gateway: ObjectStoreGateway,
    max_concurrent_ops: usize,
}

impl FolderService {
    pub fn new(gateway: ObjectStoreGateway) -> Self {
        Self {
            gateway,
            max_concurrent_ops: DEFAULT_MAX_CONCURRENT_OPS,
        }
    }

    /// Cap on store calls in flight during a folder rename.
    pub fn with_max_concurrent_ops(mut self, max: usize) -> Self {
        self.max_concurrent_ops = max.max(1);
        self
    }

    /// Whether the folder at `key` (ending in `/`) exists.
    pub async fn folder_exists(&self, key: &str) -> DriveResult<bool> {
        if self.gateway.exists(key).await? {
            return Ok(true);
        }
        if key.ends_with("//") {
            return Ok(false);
        }
        Ok(self.gateway.has_any(key).await?)
    }

    /// Direct children of a folder, without the folder's own marker.
    ///
    /// An empty folder still lists its own marker, so a listing with no keys
    /// at all means the folder does not exist.
    pub async fn get_folder_contents(&self, path: &FullItemPath) -> DriveResult<Vec<StorageItem>> {
        let folder_key = path.folder_key();
        let entries = self
            .gateway
            .list_all(ListOptions::shallow(folder_key.clone()))
            .await?;
        if entries.is_empty() {
            return Err(DriveError::FolderNotFound(
                path.relativize(&folder_key).to_string(),
            ));
        }

        Ok(entries
            .into_iter()
            .filter(|entry| entry.key != folder_key)
            .filter_map(|entry| StorageItem::from_key(path.user_prefix(), &entry.key, entry.size))
            .collect())
    }

    /// Create the folder `name` inside `path`.
    pub async fn create(&self, path: &FullItemPath, name: &str) -> DriveResult<StorageItem> {
        validate_name(name)?;
        let parent_key = path.folder_key();
        if !self.folder_exists(&parent_key).await? {
            return Err(DriveError::FolderNotFound(
                path.relativize(&parent_key).to_string(),
            ));
        }

        let target = path.child_folder(name);
        let target_key = target.folder_key();
        if self.folder_exists(&target_key).await? {
            return Err(DriveError::FolderAlreadyExists(target.relative().to_string()));
        }

        self.gateway.put_marker(&target_key).await?;
        info!(folder = %target_key, "created folder");
        Ok(StorageItem {
            relative_path: target.relative().to_string(),
            is_folder: true,
            size: 0,
        })
    }

    /// Delete the folder `name` inside `path` with everything below it.
    ///
    /// On the first per-object failure the operation stops with
    /// `ObjectDeletion`; objects already removed stay removed.
    pub async fn delete(&self, path: &FullItemPath, name: &str) -> DriveResult<()> {
        validate_name(name)?;
        let target = path.child_folder(name);
        let target_key = target.folder_key();

        let keys: Vec<String> = self
            .gateway
            .list(ListOptions::recursive(target_key.clone()))
            .map_ok(|entry| entry.key)
            .try_collect()
            .await?;
        if keys.is_empty() {
            return Err(DriveError::FolderNotFound(target.relative().to_string()));
        }

        let count = keys.len();
        debug!(folder = %target_key, objects = count, "deleting folder");
        let failures = self.gateway.remove_all(keys).await?;
        first_failure(failures)?;
        info!(folder = %target_key, objects = count, "deleted folder");
        Ok(())
    }

    /// Rename the folder `old_name` inside `path` to `new_name`.
    ///
    /// Two phases: every object is copied to its new key, then all old keys
    /// are removed in one batch. A failure between the phases leaves both
    /// trees in place.
    pub async fn rename(&self, path: &FullItemPath, old_name: &str, new_name: &str) -> DriveResult<()> {
        validate_name(old_name)?;
        validate_name(new_name)?;
        if old_name == new_name {
            return Ok(());
        }

        let old_folder = path.child_folder(old_name);
        let new_folder = path.child_folder(new_name);
        let old_key = old_folder.folder_key();
        let new_key = new_folder.folder_key();

        if self.folder_exists(&new_key).await? {
            return Err(DriveError::FolderAlreadyExists(
                new_folder.relative().to_string(),
            ));
        }

        let old_keys: Vec<String> = self
            .gateway
            .list(ListOptions::recursive(old_key.clone()))
            .map_ok(|entry| entry.key)
            .try_collect()
            .await?;
        if old_keys.is_empty() {
            return Err(DriveError::FolderNotFound(old_folder.relative().to_string()));
        }

        debug!(from = %old_key, to = %new_key, objects = old_keys.len(), "copying folder");
        stream::iter(old_keys.iter().map(|src| {
            let dst = format!("{}{}", new_key, &src[old_key.len()..]);
            async move { self.gateway.copy(src, &dst).await.map(|_| ()) }
        }))
        .buffer_unordered(self.max_concurrent_ops)
        .try_collect::<Vec<()>>()
        .await?;

        // every copy has completed; only now may the sources go
        let count = old_keys.len();
        let failures = self.gateway.remove_all(old_keys).await?;
        first_failure(failures)?;
        info!(from = %old_key, to = %new_key, objects = count, "renamed folder");
        Ok(())
    }

    /// Name checks for a folder upload. Touches no storage.
    pub fn check_upload(folder_name: &str, files: &[UploadFile]) -> DriveResult<()> {
        validate_name(folder_name)?;
        if files.is_empty() {
            return Err(DriveError::IllegalArgument(
                "folder upload requires at least one file".into(),
            ));
        }
        if files.iter().any(|file| file.filename.trim().is_empty()) {
            return Err(DriveError::IllegalArgument(
                "every uploaded file needs a name".into(),
            ));
        }
        for file in files {
            validate_relative_path(&file.filename)?;
        }
        Ok(())
    }

    /// Upload a whole folder tree as `folder_name` inside `path`.
    ///
    /// File names are paths relative to the new folder. Markers are
    /// synthesised for the new folder and every intermediate folder, and all
    /// objects go to the store as one bulk write.
    pub async fn upload(
        &self,
        path: &FullItemPath,
        folder_name: &str,
        files: Vec<UploadFile>,
    ) -> DriveResult<StorageItem> {
        Self::check_upload(folder_name, &files)?;

        let parent_key = path.folder_key();
        if !self.folder_exists(&parent_key).await? {
            return Err(DriveError::FolderNotFound(
                path.relativize(&parent_key).to_string(),
            ));
        }
        let target = path.child_folder(folder_name);
        let target_key = target.folder_key();
        if self.folder_exists(&target_key).await? {
            return Err(DriveError::FolderAlreadyExists(target.relative().to_string()));
        }

        let mut markers = BTreeSet::new();
        let mut objects = Vec::with_capacity(files.len());
        for file in files {
            let key = format!("{}{}", target_key, file.filename);
            collect_ancestor_markers(&parent_key, &key, &mut markers);
            objects.push(PutObject::new(key, file.body, file.size));
        }

        let file_count = objects.len();
        let marker_count = markers.len();
        objects.extend(markers.into_iter().map(PutObject::marker));
        self.gateway.put_all(objects).await?;

        info!(
            folder = %target_key,
            files = file_count,
            markers = marker_count,
            "uploaded folder"
        );
        Ok(StorageItem {
            relative_path: target.relative().to_string(),
            is_folder: true,
            size: 0,
        })
    }
}

/// Insert a marker for every folder between `base` (exclusive) and the file
/// `key` (exclusive).
fn collect_ancestor_markers(base: &str, key: &str, markers: &mut BTreeSet<String>) {
    let Some(rest) = key.strip_prefix(base) else {
        return;
    };
    for (idx, _) in rest.match_indices(DELIMITER) {
        markers.insert(key[..base.len() + idx + DELIMITER.len()].to_string());
    }
}

fn first_failure(failures: Vec<DeleteFailure>) -> DriveResult<()> {
    match failures.into_iter().next() {
        Some(DeleteFailure { key, reason }) => Err(DriveError::ObjectDeletion { key, reason }),
        None => Ok(()),
    }
}
