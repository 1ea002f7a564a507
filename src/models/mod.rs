//! Data models for the folder layer and for the SQLite-backed store.
//!
//! `item`, `upload` and `usage` are what callers see; `bucket` and `object`
//! map to database tables via `sqlx::FromRow`.

pub mod bucket;
pub mod item;
pub mod object;
pub mod upload;
pub mod usage;

pub use item::{FullItemPath, StorageItem};
pub use upload::UploadFile;
pub use usage::StorageUsageInfo;
