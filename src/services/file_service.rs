//! Single-object operations.

use crate::{
    errors::{DriveError, DriveResult},
    models::{FullItemPath, StorageItem, UploadFile},
    services::{gateway::ObjectStoreGateway, path_policy::validate_name},
    store::ByteStream,
};
use tracing::info;

#[derive(Clone)]
pub struct FileService {
    gateway: ObjectStoreGateway,
}

impl FileService {
    pub fn new(gateway: ObjectStoreGateway) -> Self {
        Self { gateway }
    }

    fn file_key(path: &FullItemPath, name: &str) -> String {
        format!("{}{}", path.folder_key(), name)
    }

    /// Name checks for an upload. Touches no storage.
    pub fn check_upload(file: &UploadFile) -> DriveResult<()> {
        if file.filename.trim().is_empty() {
            return Err(DriveError::IllegalArgument("uploaded file needs a name".into()));
        }
        validate_name(&file.filename)?;
        Ok(())
    }

    /// Store `file` inside `path`; never overwrites.
    pub async fn upload(&self, path: &FullItemPath, file: UploadFile) -> DriveResult<StorageItem> {
        Self::check_upload(&file)?;

        let key = Self::file_key(path, &file.filename);
        if self.gateway.exists(&key).await? {
            return Err(DriveError::FileAlreadyExists(path.relativize(&key).to_string()));
        }

        let stored = self.gateway.put(&key, file.body, file.size).await?;
        info!(key = %key, size = stored.size, "uploaded file");
        Ok(StorageItem {
            relative_path: path.relativize(&key).to_string(),
            is_folder: false,
            size: stored.size,
        })
    }

    pub async fn delete(&self, path: &FullItemPath, name: &str) -> DriveResult<()> {
        validate_name(name)?;
        let key = Self::file_key(path, name);
        if !self.gateway.exists(&key).await? {
            return Err(DriveError::FileNotFound(path.relativize(&key).to_string()));
        }

        let failures = self.gateway.remove_all(vec![key.clone()]).await?;
        if let Some(failure) = failures.into_iter().next() {
            return Err(DriveError::ObjectDeletion {
                key: failure.key,
                reason: failure.reason,
            });
        }
        info!(key = %key, "deleted file");
        Ok(())
    }

    /// Copy `old_name` to `new_name`, then delete the original.
    pub async fn rename(&self, path: &FullItemPath, old_name: &str, new_name: &str) -> DriveResult<()> {
        validate_name(old_name)?;
        validate_name(new_name)?;
        if old_name == new_name {
            return Ok(());
        }

        let old_key = Self::file_key(path, old_name);
        let new_key = Self::file_key(path, new_name);
        if !self.gateway.exists(&old_key).await? {
            return Err(DriveError::FileNotFound(path.relativize(&old_key).to_string()));
        }
        if self.gateway.exists(&new_key).await? {
            return Err(DriveError::FileAlreadyExists(
                path.relativize(&new_key).to_string(),
            ));
        }

        self.gateway.copy(&old_key, &new_key).await?;
        let failures = self.gateway.remove_all(vec![old_key.clone()]).await?;
        if let Some(failure) = failures.into_iter().next() {
            return Err(DriveError::ObjectDeletion {
                key: failure.key,
                reason: failure.reason,
            });
        }
        info!(from = %old_key, to = %new_key, "renamed file");
        Ok(())
    }

    /// Open a read stream on the file.
    pub async fn download(&self, path: &FullItemPath, name: &str) -> DriveResult<ByteStream> {
        validate_name(name)?;
        let key = Self::file_key(path, name);
        self.gateway.get(&key).await.map_err(|err| {
            if err.is_not_found() {
                DriveError::FileNotFound(path.relativize(&key).to_string())
            } else {
                err.into()
            }
        })
    }

    /// Size in bytes.
    pub async fn size(&self, path: &FullItemPath, name: &str) -> DriveResult<u64> {
        validate_name(name)?;
        let key = Self::file_key(path, name);
        match self.gateway.stat(&key).await {
            Ok(info) => Ok(info.size),
            Err(err) if err.is_not_found() => {
                Err(DriveError::FileNotFound(path.relativize(&key).to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryObjectStore;
    use futures::TryStreamExt;
    use std::sync::Arc;

    const PREFIX: &str = "1-alice/";

    async fn setup() -> (Arc<MemoryObjectStore>, FileService) {
        let store = Arc::new(MemoryObjectStore::new());
        let gateway = ObjectStoreGateway::new(store.clone(), "user-files");
        gateway.ensure_bucket().await.unwrap();
        gateway.put_marker(PREFIX).await.unwrap();
        (store, FileService::new(gateway))
    }

    async fn download_string(files: &FileService, path: &FullItemPath, name: &str) -> String {
        let chunks: Vec<_> = files
            .download(path, name)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        String::from_utf8(chunks.concat()).unwrap()
    }

    #[tokio::test]
    async fn upload_then_download() {
        let (_store, files) = setup().await;
        let root = FullItemPath::root(PREFIX);
        let item = files
            .upload(&root, UploadFile::from_bytes("a.txt", "hello"))
            .await
            .unwrap();
        assert_eq!(item.relative_path, "a.txt");
        assert_eq!(item.size, 5);
        assert_eq!(download_string(&files, &root, "a.txt").await, "hello");
        assert_eq!(files.size(&root, "a.txt").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn upload_never_overwrites() {
        let (_store, files) = setup().await;
        let docs = FullItemPath::new(PREFIX, "docs/");
        files
            .upload(&docs, UploadFile::from_bytes("a.txt", "one"))
            .await
            .unwrap();
        let err = files
            .upload(&docs, UploadFile::from_bytes("a.txt", "two"))
            .await
            .unwrap_err();
        assert!(matches!(err, DriveError::FileAlreadyExists(p) if p == "docs/a.txt"));
        assert_eq!(download_string(&files, &docs, "a.txt").await, "one");
    }

    #[tokio::test]
    async fn upload_rejects_blank_and_invalid_names() {
        let (_store, files) = setup().await;
        let root = FullItemPath::root(PREFIX);
        let err = files
            .upload(&root, UploadFile::from_bytes("", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, DriveError::IllegalArgument(_)));
        let err = files
            .upload(&root, UploadFile::from_bytes("a|b", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, DriveError::InvalidName { .. }));
    }

    #[tokio::test]
    async fn missing_files_are_reported_as_not_found() {
        let (_store, files) = setup().await;
        let root = FullItemPath::root(PREFIX);
        assert!(matches!(
            files.delete(&root, "ghost.txt").await.unwrap_err(),
            DriveError::FileNotFound(_)
        ));
        assert!(matches!(
            files.download(&root, "ghost.txt").await.err().unwrap(),
            DriveError::FileNotFound(_)
        ));
        assert!(matches!(
            files.size(&root, "ghost.txt").await.unwrap_err(),
            DriveError::FileNotFound(_)
        ));
    }

    #[tokio::test]
    async fn rename_copies_then_removes() {
        let (store, files) = setup().await;
        let root = FullItemPath::root(PREFIX);
        files
            .upload(&root, UploadFile::from_bytes("a.txt", "data"))
            .await
            .unwrap();
        files.rename(&root, "a.txt", "b.txt").await.unwrap();

        assert_eq!(
            store.keys("user-files").await,
            vec!["1-alice/", "1-alice/b.txt"]
        );
        assert_eq!(download_string(&files, &root, "b.txt").await, "data");
    }

    #[tokio::test]
    async fn rename_refuses_to_clobber() {
        let (_store, files) = setup().await;
        let root = FullItemPath::root(PREFIX);
        for name in ["a.txt", "b.txt"] {
            files
                .upload(&root, UploadFile::from_bytes(name, name))
                .await
                .unwrap();
        }
        let err = files.rename(&root, "a.txt", "b.txt").await.unwrap_err();
        assert!(matches!(err, DriveError::FileAlreadyExists(_)));
        let err = files.rename(&root, "c.txt", "d.txt").await.unwrap_err();
        assert!(matches!(err, DriveError::FileNotFound(_)));
        files.rename(&root, "a.txt", "a.txt").await.unwrap();
    }

    #[tokio::test]
    async fn delete_surfaces_store_failures() {
        let (store, files) = setup().await;
        let root = FullItemPath::root(PREFIX);
        files
            .upload(&root, UploadFile::from_bytes("a.txt", "a"))
            .await
            .unwrap();
        store.fail_deletes_of("1-alice/a.txt").await;
        let err = files.delete(&root, "a.txt").await.unwrap_err();
        assert!(matches!(err, DriveError::ObjectDeletion { .. }));
    }
}
