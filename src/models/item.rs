//! Items as seen by a user: paths relative to their own prefix.

use serde::Serialize;

/// A file or folder below a user prefix.
///
/// `relative_path` never contains the user prefix. Folders end with `/`,
/// files never do, and `is_folder` always agrees with that suffix.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StorageItem {
    pub relative_path: String,
    pub is_folder: bool,
    pub size: u64,
}

impl StorageItem {
    /// Build an item from a full object key. Returns `None` for keys outside
    /// `user_prefix` and for the prefix's own root marker.
    pub fn from_key(user_prefix: &str, key: &str, size: u64) -> Option<Self> {
        let relative = key.strip_prefix(user_prefix)?;
        if relative.is_empty() {
            return None;
        }
        let is_folder = relative.ends_with('/');
        Some(Self {
            relative_path: relative.to_string(),
            is_folder,
            size: if is_folder { 0 } else { size },
        })
    }
}

/// Last segment of a key or relative path, ignoring one trailing `/`.
pub fn leaf_name(path: &str) -> &str {
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// A location addressed by a caller: their immutable prefix plus a path
/// relative to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FullItemPath {
    user_prefix: String,
    relative: String,
}

impl FullItemPath {
    pub fn new(user_prefix: impl Into<String>, relative: impl Into<String>) -> Self {
        Self {
            user_prefix: user_prefix.into(),
            relative: relative.into(),
        }
    }

    /// The user's root folder.
    pub fn root(user_prefix: impl Into<String>) -> Self {
        Self::new(user_prefix, "")
    }

    pub fn user_prefix(&self) -> &str {
        &self.user_prefix
    }

    pub fn relative(&self) -> &str {
        &self.relative
    }

    /// Prefix alone for a blank relative path, otherwise prefix + relative.
    pub fn full(&self) -> String {
        if self.relative.trim().is_empty() {
            self.user_prefix.clone()
        } else {
            format!("{}{}", self.user_prefix, self.relative)
        }
    }

    /// `full()` normalised to end with `/`, for use as a folder root.
    pub fn folder_key(&self) -> String {
        let mut key = self.full();
        if !key.ends_with('/') {
            key.push('/');
        }
        key
    }

    /// The folder `name` directly inside this one.
    pub fn child_folder(&self, name: &str) -> Self {
        let base = self.folder_key();
        let relative = base[self.user_prefix.len()..].to_string();
        Self::new(self.user_prefix.clone(), format!("{}{}/", relative, name))
    }

    /// Strip the user prefix from a full key.
    pub fn relativize<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(self.user_prefix.as_str()).unwrap_or(key)
    }
}
