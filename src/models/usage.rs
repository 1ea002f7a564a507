use serde::Serialize;

/// Bytes currently stored under a user prefix and the configured ceiling.
///
/// `current_size <= max_size` is the goal, not a guarantee: usage is
/// recomputed from a listing and other processes may write concurrently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StorageUsageInfo {
    pub current_size: u64,
    pub max_size: u64,
}

impl StorageUsageInfo {
    /// Bytes that may still be written before the ceiling is reached.
    pub fn available(&self) -> u64 {
        self.max_size.saturating_sub(self.current_size)
    }
}
