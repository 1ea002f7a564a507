//! The folder layer as one handle.
//!
//! `Drive` wires the services to a single gateway and adds the cross-cutting
//! rules: user provisioning and the storage ceiling on uploads.

use crate::{
    errors::DriveResult,
    models::{FullItemPath, StorageItem, StorageUsageInfo, UploadFile},
    services::{
        archive_service::{ArchiveDownload, ArchiveService},
        file_service::FileService,
        folder_service::FolderService,
        gateway::ObjectStoreGateway,
        path_policy::build_user_prefix,
        quota_service::QuotaService,
        search_service::SearchService,
    },
    store::{ByteStream, ObjectStore},
};
use std::{path::PathBuf, sync::Arc};
use tracing::info;

/// Construction parameters for [`Drive`].
#[derive(Clone, Debug)]
pub struct DriveOptions {
    pub bucket: String,
    pub max_storage_size: u64,
    pub list_page_size: usize,
    pub max_concurrent_ops: usize,
    pub temp_dir: Option<PathBuf>,
}

#[derive(Clone)]
pub struct Drive {
    gateway: ObjectStoreGateway,
    folders: FolderService,
    files: FileService,
    archives: ArchiveService,
    search: SearchService,
    quota: QuotaService,
}

impl Drive {
    pub fn new(store: Arc<dyn ObjectStore>, options: DriveOptions) -> Self {
        let gateway =
            ObjectStoreGateway::new(store, options.bucket).with_page_size(options.list_page_size);
        let mut archives = ArchiveService::new(gateway.clone());
        if let Some(dir) = options.temp_dir {
            archives = archives.with_temp_dir(dir);
        }

        Self {
            folders: FolderService::new(gateway.clone())
                .with_max_concurrent_ops(options.max_concurrent_ops),
            files: FileService::new(gateway.clone()),
            search: SearchService::new(gateway.clone()),
            quota: QuotaService::new(gateway.clone(), options.max_storage_size),
            archives,
            gateway,
        }
    }

    /// Create the bucket if needed. Call once at startup.
    pub async fn init(&self) -> DriveResult<()> {
        self.gateway.ensure_bucket().await?;
        Ok(())
    }

    /// Derive the prefix of a newly registered user and write its root
    /// marker. Safe to repeat.
    pub async fn provision_user(&self, id: i64, username: &str) -> DriveResult<String> {
        let prefix = build_user_prefix(id, username);
        if !self.gateway.exists(&prefix).await? {
            self.gateway.put_marker(&prefix).await?;
            info!(prefix = %prefix, "provisioned user root");
        }
        Ok(prefix)
    }

    pub async fn list_folder(&self, path: &FullItemPath) -> DriveResult<Vec<StorageItem>> {
        self.folders.get_folder_contents(path).await
    }

    pub async fn create_folder(&self, path: &FullItemPath, name: &str) -> DriveResult<StorageItem> {
        self.folders.create(path, name).await
    }

    pub async fn delete_folder(&self, path: &FullItemPath, name: &str) -> DriveResult<()> {
        self.folders.delete(path, name).await
    }

    pub async fn rename_folder(&self, path: &FullItemPath, old_name: &str, new_name: &str) -> DriveResult<()> {
        self.folders.rename(path, old_name, new_name).await
    }

    /// Upload a folder tree after checking the whole batch against the quota.
    pub async fn upload_folder(
        &self,
        path: &FullItemPath,
        folder_name: &str,
        files: Vec<UploadFile>,
    ) -> DriveResult<StorageItem> {
        FolderService::check_upload(folder_name, &files)?;
        let _guard = self.quota.lock(path.user_prefix()).await;
        let total = files
            .iter()
            .fold(0u64, |sum, file| sum.saturating_add(file.size));
        self.quota.check_limit(path.user_prefix(), total).await?;
        self.folders.upload(path, folder_name, files).await
    }

    pub async fn download_folder(&self, path: &FullItemPath, folder_name: &str) -> DriveResult<ArchiveDownload> {
        self.archives.download(path, folder_name).await
    }

    /// Upload one file after checking its size against the quota.
    pub async fn upload_file(&self, path: &FullItemPath, file: UploadFile) -> DriveResult<StorageItem> {
        FileService::check_upload(&file)?;
        let _guard = self.quota.lock(path.user_prefix()).await;
        self.quota.check_limit(path.user_prefix(), file.size).await?;
        self.files.upload(path, file).await
    }

    pub async fn delete_file(&self, path: &FullItemPath, name: &str) -> DriveResult<()> {
        self.files.delete(path, name).await
    }

    pub async fn rename_file(&self, path: &FullItemPath, old_name: &str, new_name: &str) -> DriveResult<()> {
        self.files.rename(path, old_name, new_name).await
    }

    pub async fn download_file(&self, path: &FullItemPath, name: &str) -> DriveResult<ByteStream> {
        self.files.download(path, name).await
    }

    pub async fn file_size(&self, path: &FullItemPath, name: &str) -> DriveResult<u64> {
        self.files.size(path, name).await
    }

    pub async fn search(&self, user_prefix: &str, query: &str) -> DriveResult<Vec<StorageItem>> {
        self.search.search(user_prefix, query).await
    }

    pub async fn usage(&self, user_prefix: &str) -> DriveResult<StorageUsageInfo> {
        self.quota.usage(user_prefix).await
    }
}
