//! Zip export of a folder subtree.
//!
//! The archive is assembled in a temporary file that is owned by the
//! returned [`ArchiveDownload`]. Every exit path, including a dropped export
//! future, removes the file.

use crate::{
    errors::{DriveError, DriveResult},
    models::FullItemPath,
    services::{
        gateway::{ListOptions, ObjectStoreGateway},
        path_policy::validate_name,
    },
};
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use std::{
    collections::HashSet,
    io::{self, Write},
    path::{Path, PathBuf},
    pin::Pin,
    task::{Context, Poll},
};
use tempfile::{NamedTempFile, TempPath};
use tokio::{fs::File, sync::mpsc, task};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

const ARCHIVE_QUEUE_DEPTH: usize = 32;

/// Work for the blocking zip writer.
enum ArchivePart {
    Directory(String),
    File(String),
    Chunk(Bytes),
}

#[derive(Clone)]
pub struct ArchiveService {
    gateway: ObjectStoreGateway,
    temp_dir: Option<PathBuf>,
}

impl ArchiveService {
    pub fn new(gateway: ObjectStoreGateway) -> Self {
        Self {
            gateway,
            temp_dir: None,
        }
    }

    /// Build archives in `dir` instead of the system temp directory.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Export `folder_name` inside `path` as a zip archive.
    ///
    /// Entry names are relative to `path`, so the archive's single top-level
    /// directory is `folder_name/`. Folder markers become directory entries;
    /// file payloads are streamed chunk by chunk to a writer on the blocking
    /// pool.
    pub async fn download(&self, path: &FullItemPath, folder_name: &str) -> DriveResult<ArchiveDownload> {
        validate_name(folder_name)?;
        let parent_key = path.folder_key();
        if !self.gateway.exists(&parent_key).await? && !self.gateway.has_any(&parent_key).await? {
            return Err(DriveError::FolderNotFound(
                path.relativize(&parent_key).to_string(),
            ));
        }

        let target = path.child_folder(folder_name);
        let target_key = target.folder_key();

        let temp_dir = self.temp_dir.clone();
        let temp = task::spawn_blocking(move || match temp_dir {
            Some(dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new(),
        })
        .await
        .map_err(io::Error::other)??;
        let (file, temp_path) = temp.into_parts();

        let (tx, rx) = mpsc::channel(ARCHIVE_QUEUE_DEPTH);
        let writer = task::spawn_blocking(move || write_archive(file, rx));
        let fed = self.feed_entries(&tx, &parent_key, &target_key).await;
        drop(tx);
        let written = writer.await.map_err(io::Error::other)?;

        let entries = fed?;
        let size = written?;
        if entries == 0 {
            return Err(DriveError::FolderNotFound(target.relative().to_string()));
        }

        info!(folder = %target_key, entries, size, "exported folder archive");
        let reader = File::open(&temp_path).await?;
        Ok(ArchiveDownload {
            file_name: format!("{}.zip", folder_name),
            size,
            reader,
            temp_path,
        })
    }

    /// Send every entry below `target_key` to the writer and count them.
    /// Stops quietly when the writer has gone away; its own error wins.
    async fn feed_entries(
        &self,
        tx: &mpsc::Sender<ArchivePart>,
        parent_key: &str,
        target_key: &str,
    ) -> DriveResult<usize> {
        let mut written_dirs = HashSet::new();
        let mut entries = 0usize;

        let listing = self.gateway.list(ListOptions::recursive(target_key.to_string()));
        futures::pin_mut!(listing);
        while let Some(entry) = listing.try_next().await? {
            let name = &entry.key[parent_key.len()..];
            if entry.is_dir {
                if written_dirs.insert(name.to_string()) {
                    if tx.send(ArchivePart::Directory(name.to_string())).await.is_err() {
                        return Ok(entries);
                    }
                    entries += 1;
                }
                continue;
            }

            debug!(key = %entry.key, size = entry.size, "adding archive entry");
            let mut body = self.gateway.get(&entry.key).await?;
            if tx.send(ArchivePart::File(name.to_string())).await.is_err() {
                return Ok(entries);
            }
            entries += 1;
            while let Some(chunk) = body.next().await {
                if tx.send(ArchivePart::Chunk(chunk?)).await.is_err() {
                    return Ok(entries);
                }
            }
        }
        Ok(entries)
    }
}

/// Drain `parts` into a zip archive on `file` and return the archive size.
fn write_archive(file: std::fs::File, mut parts: mpsc::Receiver<ArchivePart>) -> DriveResult<u64> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);
    let mut zip = ZipWriter::new(file);
    while let Some(part) = parts.blocking_recv() {
        match part {
            ArchivePart::Directory(name) => zip.add_directory(name, options)?,
            ArchivePart::File(name) => zip.start_file(name, options)?,
            ArchivePart::Chunk(chunk) => zip.write_all(&chunk)?,
        }
    }
    let mut file = zip.finish()?;
    file.flush()?;
    Ok(file.metadata()?.len())
}

/// A finished archive waiting to be read.
///
/// Owns the temporary file; dropping this value (or the stream made from it)
/// deletes the file.
pub struct ArchiveDownload {
    pub file_name: String,
    pub size: u64,
    reader: File,
    temp_path: TempPath,
}

impl ArchiveDownload {
    pub fn path(&self) -> &Path {
        &self.temp_path
    }

    pub fn into_stream(self) -> ArchiveStream {
        ArchiveStream {
            inner: ReaderStream::new(self.reader),
            _temp_path: self.temp_path,
        }
    }
}

/// Byte stream over an archive that removes the backing file when dropped.
pub struct ArchiveStream {
    inner: ReaderStream<File>,
    _temp_path: TempPath,
}

impl Stream for ArchiveStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
