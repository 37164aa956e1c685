use crate::key::AnnexKey;

/// Pointer blobs are small by construction; anything larger is ordinary file
/// content and is never inspected further.
pub const MAX_POINTER_LENGTH: usize = 32 * 1024;

/// A tracked blob whose content references externally stored bytes.
///
/// Two shapes share one grammar: pointer files (`/annex/objects/<key>`) and
/// symlink targets (`../../.git/annex/objects/<aa>/<bb>/<key>/<key>`). In both
/// the key is the final path component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PointerRecord {
    key: AnnexKey,
}

impl PointerRecord {
    /// Classify raw blob content against the pointer grammar.
    ///
    /// Returns `None` for anything that is not a pointer: oversized content,
    /// non-UTF-8 content, or a first line that does not name a store object
    /// with a parsable key. Non-matching content is not an error.
    #[must_use]
    pub fn parse(content: &[u8]) -> Option<Self> {
        if content.is_empty() || content.len() > MAX_POINTER_LENGTH {
            return None;
        }
        let text = std::str::from_utf8(content).ok()?;
        let target = text.lines().next()?.trim_end();
        Self::from_link_target(target)
    }

    /// Classify a single link target (the first line of a pointer blob, or a
    /// symlink's destination).
    #[must_use]
    pub fn from_link_target(target: &str) -> Option<Self> {
        let mut rest = target;
        while let Some(stripped) = rest.strip_prefix("../") {
            rest = stripped;
        }
        let rest = rest.strip_prefix(".git/").unwrap_or(rest);
        let rest = rest.strip_prefix('/').unwrap_or(rest);
        let rest = rest.strip_prefix("annex/objects/")?;
        let key_text = rest.trim_end_matches('/').rsplit('/').next()?;
        let key = AnnexKey::parse(key_text).ok()?;
        Some(Self { key })
    }

    #[must_use]
    pub fn key(&self) -> &AnnexKey {
        &self.key
    }

    #[must_use]
    pub fn into_key(self) -> AnnexKey {
        self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pointer_file_content() {
        let record =
            PointerRecord::parse(b"/annex/objects/SHA256E-s5--abc123.bin\n").expect("pointer");
        assert_eq!(record.key().as_str(), "SHA256E-s5--abc123.bin");
    }

    #[test]
    fn parses_symlink_target_with_hash_dirs() {
        let record = PointerRecord::from_link_target(
            "../../.git/annex/objects/Wx/8m/SHA256E-s9--beef/SHA256E-s9--beef",
        )
        .expect("pointer");
        assert_eq!(record.key().as_str(), "SHA256E-s9--beef");
        assert_eq!(record.key().declared_size(), Some(9));
    }

    #[test]
    fn parses_bare_repo_symlink_target() {
        let record =
            PointerRecord::from_link_target("annex/objects/abc/def/SHA256-s1--x/SHA256-s1--x")
                .expect("pointer");
        assert_eq!(record.key().as_str(), "SHA256-s1--x");
    }

    #[test]
    fn ignores_trailing_lines_after_the_target() {
        let record = PointerRecord::parse(b"/annex/objects/SHA256-s2--ab\nextra metadata\n")
            .expect("pointer");
        assert_eq!(record.key().as_str(), "SHA256-s2--ab");
    }

    #[test]
    fn ordinary_content_is_not_a_pointer() {
        assert_eq!(PointerRecord::parse(b""), None);
        assert_eq!(PointerRecord::parse(b"hello world\n"), None);
        assert_eq!(PointerRecord::parse(b"/annex/objects/\n"), None);
        assert_eq!(PointerRecord::parse(b"/annex/elsewhere/SHA256-s1--x\n"), None);
        assert_eq!(PointerRecord::parse(&[0xff, 0xfe, 0x00]), None);

        let mut oversized = Vec::from(&b"/annex/objects/SHA256-s1--x"[..]);
        oversized.resize(MAX_POINTER_LENGTH + 1, b' ');
        assert_eq!(PointerRecord::parse(&oversized), None);
    }

    #[test]
    fn malformed_keys_are_not_pointers() {
        assert_eq!(PointerRecord::parse(b"/annex/objects/not a key\n"), None);
        assert_eq!(PointerRecord::parse(b"/annex/objects/nokey\n"), None);
    }
}
