//! Configuration structures for Trellis.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the file-backed block log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Directory holding the log data file.
    pub dir: PathBuf,
    /// Enable fsync after each append.
    pub fsync_enabled: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}

impl LogConfig {
    /// Returns the path of the log data file inside `dir`.
    pub fn data_file(&self) -> PathBuf {
        self.dir.join("trellis.log")
    }
}
