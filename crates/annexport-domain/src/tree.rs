use serde::Serialize;

/// Fully resolved commit object id. Only ever constructed from the version
/// control tool's own output, so the content is opaque here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// File modes a tracked blob may carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileMode {
    Regular,
    Executable,
    Symlink,
}

impl FileMode {
    /// Map a tree listing's octal mode string; non-blob modes return `None`.
    #[must_use]
    pub fn from_octal(mode: &str) -> Option<Self> {
        match mode {
            "100644" => Some(Self::Regular),
            "100755" => Some(Self::Executable),
            "120000" => Some(Self::Symlink),
            _ => None,
        }
    }
}

/// One blob in a recursive tree listing at a commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TreeEntry {
    /// Slash-separated path relative to the repository root.
    pub path: String,
    pub oid: String,
    pub mode: FileMode,
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_modes_map_from_octal() {
        assert_eq!(FileMode::from_octal("100644"), Some(FileMode::Regular));
        assert_eq!(FileMode::from_octal("100755"), Some(FileMode::Executable));
        assert_eq!(FileMode::from_octal("120000"), Some(FileMode::Symlink));
        assert_eq!(FileMode::from_octal("040000"), None);
        assert_eq!(FileMode::from_octal("160000"), None);
    }
}
