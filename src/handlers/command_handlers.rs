//! Command handlers for the CLI front end.
//! Each handler resolves the caller's prefix, delegates to `Drive`, and
//! renders the result as JSON. Payloads are streamed, never buffered whole.

use crate::{
    config::{Command, Identity},
    errors::AppError,
    models::{FullItemPath, UploadFile},
    services::{drive_service::Drive, path_policy::build_user_prefix},
};
use anyhow::Context;
use futures::{Stream, StreamExt};
use serde_json::{Value, json};
use std::{
    io,
    path::{Path, PathBuf},
};
use tokio::{fs, io::AsyncWriteExt};
use tokio_util::io::ReaderStream;

fn location(identity: &Identity, path: &str) -> FullItemPath {
    FullItemPath::new(build_user_prefix(identity.user_id, &identity.username), path)
}

/// Run one command and return the JSON document to print.
pub async fn handle_command(drive: &Drive, command: Command) -> Result<Value, AppError> {
    match command {
        Command::Provision { identity } => {
            let prefix = drive
                .provision_user(identity.user_id, &identity.username)
                .await?;
            Ok(json!({ "prefix": prefix }))
        }
        Command::Ls { identity, path } => {
            let items = drive.list_folder(&location(&identity, &path)).await?;
            Ok(json!({ "items": items }))
        }
        Command::Mkdir {
            identity,
            path,
            name,
        } => {
            let item = drive
                .create_folder(&location(&identity, &path), &name)
                .await?;
            Ok(json!({ "created": item }))
        }
        Command::Rmdir {
            identity,
            path,
            name,
        } => {
            drive
                .delete_folder(&location(&identity, &path), &name)
                .await?;
            Ok(json!({ "deleted": name }))
        }
        Command::Mvdir {
            identity,
            path,
            old_name,
            new_name,
        } => {
            drive
                .rename_folder(&location(&identity, &path), &old_name, &new_name)
                .await?;
            Ok(json!({ "renamed": old_name, "to": new_name }))
        }
        Command::UploadDir {
            identity,
            path,
            local,
            name,
        } => {
            let name = match name {
                Some(name) => name,
                None => file_name_of(&local)?,
            };
            let files = collect_local_tree(&local).await?;
            let item = drive
                .upload_folder(&location(&identity, &path), &name, files)
                .await?;
            Ok(json!({ "uploaded": item }))
        }
        Command::Upload {
            identity,
            path,
            local,
            name,
        } => {
            let name = match name {
                Some(name) => name,
                None => file_name_of(&local)?,
            };
            let file = open_local_file(&local, name).await?;
            let item = drive
                .upload_file(&location(&identity, &path), file)
                .await?;
            Ok(json!({ "uploaded": item }))
        }
        Command::Rm {
            identity,
            path,
            name,
        } => {
            drive.delete_file(&location(&identity, &path), &name).await?;
            Ok(json!({ "deleted": name }))
        }
        Command::Mv {
            identity,
            path,
            old_name,
            new_name,
        } => {
            drive
                .rename_file(&location(&identity, &path), &old_name, &new_name)
                .await?;
            Ok(json!({ "renamed": old_name, "to": new_name }))
        }
        Command::Get {
            identity,
            path,
            name,
            output,
        } => {
            let body = drive
                .download_file(&location(&identity, &path), &name)
                .await?;
            let written = write_stream(&output, body).await?;
            Ok(json!({ "file": name, "bytes": written, "output": output }))
        }
        Command::Size {
            identity,
            path,
            name,
        } => {
            let size = drive.file_size(&location(&identity, &path), &name).await?;
            Ok(json!({ "file": name, "size": size }))
        }
        Command::Zip {
            identity,
            path,
            name,
            output,
        } => {
            let archive = drive
                .download_folder(&location(&identity, &path), &name)
                .await?;
            let file_name = archive.file_name.clone();
            let written = write_stream(&output, archive.into_stream()).await?;
            Ok(json!({ "archive": file_name, "bytes": written, "output": output }))
        }
        Command::Search { identity, query } => {
            let prefix = build_user_prefix(identity.user_id, &identity.username);
            let items = drive.search(&prefix, &query).await?;
            Ok(json!({ "query": query, "items": items }))
        }
        Command::Usage { identity } => {
            let prefix = build_user_prefix(identity.user_id, &identity.username);
            let usage = drive.usage(&prefix).await?;
            Ok(json!({ "usage": usage, "available": usage.available() }))
        }
    }
}

fn file_name_of(path: &Path) -> anyhow::Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .with_context(|| format!("cannot derive a name from `{}`", path.display()))
}

async fn open_local_file(path: &Path, name: String) -> anyhow::Result<UploadFile> {
    let file = fs::File::open(path)
        .await
        .with_context(|| format!("opening `{}`", path.display()))?;
    let size = file.metadata().await?.len();
    Ok(UploadFile::new(name, size, Box::pin(ReaderStream::new(file))))
}

/// Every regular file below `root`, named by its `/`-joined path relative
/// to `root`.
async fn collect_local_tree(root: &Path) -> anyhow::Result<Vec<UploadFile>> {
    let mut files = Vec::new();
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir)
            .await
            .with_context(|| format!("reading directory `{}`", dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let relative = path
                    .strip_prefix(root)?
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                files.push(open_local_file(&path, relative).await?);
            }
        }
    }
    Ok(files)
}

async fn write_stream<S>(output: &Path, body: S) -> anyhow::Result<u64>
where
    S: Stream<Item = io::Result<bytes::Bytes>>,
{
    let mut file = fs::File::create(output)
        .await
        .with_context(|| format!("creating `{}`", output.display()))?;
    let mut written = 0u64;
    futures::pin_mut!(body);
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        written += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{services::drive_service::DriveOptions, store::MemoryObjectStore};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn identity() -> Identity {
        Identity {
            user_id: 7,
            username: "carol".into(),
        }
    }

    async fn drive() -> Drive {
        let drive = Drive::new(
            Arc::new(MemoryObjectStore::new()),
            DriveOptions {
                bucket: "user-files".into(),
                max_storage_size: 1024,
                list_page_size: 100,
                max_concurrent_ops: 4,
                temp_dir: None,
            },
        );
        drive.init().await.unwrap();
        drive
    }

    #[tokio::test]
    async fn upload_dir_then_get_round_trips_through_disk() {
        let drive = drive().await;
        let local = TempDir::new().unwrap();
        std::fs::create_dir_all(local.path().join("site/css")).unwrap();
        std::fs::write(local.path().join("site/index.html"), "<p>hi</p>").unwrap();
        std::fs::write(local.path().join("site/css/main.css"), "p{}").unwrap();

        handle_command(&drive, Command::Provision { identity: identity() })
            .await
            .unwrap();
        let out = handle_command(
            &drive,
            Command::UploadDir {
                identity: identity(),
                path: String::new(),
                local: local.path().join("site"),
                name: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(out["uploaded"]["relative_path"], "site/");

        let target = local.path().join("copy.css");
        let out = handle_command(
            &drive,
            Command::Get {
                identity: identity(),
                path: "site/css".into(),
                name: "main.css".into(),
                output: target.clone(),
            },
        )
        .await
        .unwrap();
        assert_eq!(out["bytes"], 3);
        assert_eq!(std::fs::read_to_string(target).unwrap(), "p{}");

        let out = handle_command(&drive, Command::Usage { identity: identity() })
            .await
            .unwrap();
        assert_eq!(out["usage"]["current_size"], 12);
        assert_eq!(out["available"], 1012);
    }

    #[tokio::test]
    async fn domain_errors_render_their_kind() {
        let drive = drive().await;
        let err = handle_command(
            &drive,
            Command::Rmdir {
                identity: identity(),
                path: String::new(),
                name: "ghost".into(),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, "FolderNotFound");
    }
}
