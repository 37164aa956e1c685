use serde::Serialize;

/// Container formats a download request may name.
///
/// Tokens are matched case-sensitively; anything else is an
/// [`UnknownFormatError`]. `Bundle` is recognized here so the export layer can
/// reject it with a dedicated unsupported-format error instead of a generic
/// parse failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ArchiveFormat {
    #[serde(rename = "zip")]
    Zip,
    #[serde(rename = "tar.gz")]
    TarGz,
    #[serde(rename = "bundle")]
    Bundle,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unrecognized archive format {0:?} (expected zip, tar.gz, or bundle)")]
pub struct UnknownFormatError(pub String);

impl ArchiveFormat {
    /// Parse a request token into a format.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownFormatError`] for any token other than the three
    /// recognized ones.
    pub fn from_token(token: &str) -> Result<Self, UnknownFormatError> {
        match token {
            "zip" => Ok(Self::Zip),
            "tar.gz" => Ok(Self::TarGz),
            "bundle" => Ok(Self::Bundle),
            other => Err(UnknownFormatError(other.to_string())),
        }
    }

    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::TarGz => "tar.gz",
            Self::Bundle => "bundle",
        }
    }

    /// The `--format` value the archive-producing tool understands. The
    /// producer emits plain containers; compression is applied downstream.
    #[must_use]
    pub fn base_format(self) -> Option<&'static str> {
        match self {
            Self::Zip => Some("zip"),
            Self::TarGz => Some("tar"),
            Self::Bundle => None,
        }
    }
}

impl std::fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.token())
    }
}
