//! Hosting manifest entries.

use serde::{Deserialize, Serialize};

/// A hashed file of a hosting deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Path relative to the public directory, `/`-separated, no leading `/`.
    pub path: String,

    /// Modification time, milliseconds since the Unix epoch.
    pub mtime: u64,

    pub size: u64,

    /// Hex SHA-256 of the gzipped content.
    pub hash: String,
}

impl FileEntry {
    /// Key used in populate batches: the path with a leading `/`.
    pub fn populate_key(&self) -> String {
        populate_key(&self.path)
    }
}

pub fn populate_key(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn populate_key_has_single_leading_slash() {
        assert_eq!(populate_key("css/site.css"), "/css/site.css");
        assert_eq!(populate_key("/index.html"), "/index.html");
    }
}
