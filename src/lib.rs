//! Hierarchical per-user folders on top of a flat, prefix-addressed object
//! store.
//!
//! Folders are zero-byte marker objects whose keys end in `/`; every user
//! owns the keys below `"{id}-{username}/"`. Rename and recursive delete are
//! sequences of single-object copies and deletes, so they are not atomic.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod services;
pub mod store;

pub use errors::{AppError, DriveError, DriveResult};
pub use models::{FullItemPath, StorageItem, StorageUsageInfo, UploadFile};
pub use services::{
    archive_service::{ArchiveDownload, ArchiveStream},
    drive_service::{Drive, DriveOptions},
    path_policy::{build_user_prefix, normalize_username, validate_name},
};
pub use store::{MemoryObjectStore, ObjectStore, SqliteObjectStore, StoreError};
