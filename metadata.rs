use serde::Serialize;
use std::time::SystemTime;

/// Listing entry returned by [`Storage::list_info`](crate::storage::Storage::list_info).
///
/// Rebuilt from backend metadata on every call; wrappers rewrite `path`
/// to its logical form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub path: String,
    pub mod_time: SystemTime,
    pub size: u64,
}

impl FileInfo {
    pub fn new(path: impl Into<String>, mod_time: SystemTime, size: u64) -> Self {
        Self {
            path: path.into(),
            mod_time,
            size,
        }
    }
}
