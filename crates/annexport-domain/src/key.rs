use md5::{Digest, Md5};

/// Alphabet used by the store's mixed-case directory convention. Thirty-two
/// characters, chosen upstream to avoid accidentally spelling words.
const MIXED_ALPHABET: &[u8; 32] = b"0123456789zqjxkmvwgpfZQJXKMVWGPF";

/// A content-addressable store key, e.g. `SHA256E-s1048576--9ae2...f1.bin`.
///
/// Grammar: backend, then zero or more single-letter-prefixed fields joined
/// with `-`, then `--`, then the key name. Only the `s<bytes>` size field is
/// decoded; unknown fields are tolerated so future backends keep parsing.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AnnexKey {
    raw: String,
    backend: String,
    size: Option<u64>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KeyParseError {
    #[error("key is empty")]
    Empty,
    #[error("key {0:?} contains whitespace or path separators")]
    ForbiddenCharacter(String),
    #[error("key {0:?} has no `--` separating fields from the name")]
    MissingSeparator(String),
    #[error("key {0:?} has an empty name")]
    EmptyName(String),
    #[error("key {0:?} has an invalid backend")]
    InvalidBackend(String),
    #[error("key {0:?} has a malformed field {1:?}")]
    MalformedField(String, String),
}

impl AnnexKey {
    /// Parse a key out of a pointer target's final path component.
    ///
    /// # Errors
    ///
    /// Returns a [`KeyParseError`] describing the first grammar violation.
    pub fn parse(raw: &str) -> Result<Self, KeyParseError> {
        if raw.is_empty() {
            return Err(KeyParseError::Empty);
        }
        if raw
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '/' || c == '\\')
        {
            return Err(KeyParseError::ForbiddenCharacter(raw.to_string()));
        }
        let (fields, name) = raw
            .split_once("--")
            .ok_or_else(|| KeyParseError::MissingSeparator(raw.to_string()))?;
        if name.is_empty() {
            return Err(KeyParseError::EmptyName(raw.to_string()));
        }

        let mut parts = fields.split('-');
        let backend = parts.next().unwrap_or_default();
        if backend.is_empty() || !backend.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(KeyParseError::InvalidBackend(raw.to_string()));
        }

        let mut size = None;
        for field in parts {
            let mut chars = field.chars();
            let tag = chars.next().ok_or_else(|| {
                KeyParseError::MalformedField(raw.to_string(), field.to_string())
            })?;
            if !tag.is_ascii_alphabetic() {
                return Err(KeyParseError::MalformedField(
                    raw.to_string(),
                    field.to_string(),
                ));
            }
            if tag == 's' {
                size = chars.as_str().parse::<u64>().ok();
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            backend: backend.to_string(),
            size,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Declared payload size in bytes, when the key carries an `s` field.
    #[must_use]
    pub fn declared_size(&self) -> Option<u64> {
        self.size
    }

    /// Lowercase sharding convention: the first six hex characters of the
    /// key's md5, split into two three-character directories.
    #[must_use]
    pub fn hash_dir_lower(&self) -> String {
        let digest = hex::encode(Md5::digest(self.raw.as_bytes()));
        format!("{}/{}", &digest[..3], &digest[3..6])
    }

    /// Mixed-case sharding convention: four characters over [`MIXED_ALPHABET`]
    /// taken from the first little-endian word of the key's md5 (bit offsets
    /// 6, 0, 18, 12), split into two two-character directories.
    #[must_use]
    pub fn hash_dir_mixed(&self) -> String {
        let digest = Md5::digest(self.raw.as_bytes());
        let word = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
        let pick = |shift: u32| MIXED_ALPHABET[(word >> shift & 31) as usize] as char;
        format!("{}{}/{}{}", pick(6), pick(0), pick(18), pick(12))
    }
}

impl std::fmt::Display for AnnexKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sized_key() {
        let key = AnnexKey::parse("SHA256E-s1024--cafef00d.bin").expect("valid key");
        assert_eq!(key.backend(), "SHA256E");
        assert_eq!(key.declared_size(), Some(1024));
        assert_eq!(key.as_str(), "SHA256E-s1024--cafef00d.bin");
    }

    #[test]
    fn parses_key_without_size() {
        let key = AnnexKey::parse("URL--http&c%%example.com%file").expect("valid key");
        assert_eq!(key.backend(), "URL");
        assert_eq!(key.declared_size(), None);
    }

    #[test]
    fn tolerates_unknown_fields() {
        let key = AnnexKey::parse("SHA256-s9-S4-C2--deadbeef").expect("valid key");
        assert_eq!(key.declared_size(), Some(9));
    }

    #[test]
    fn rejects_malformed_keys() {
        assert_eq!(AnnexKey::parse(""), Err(KeyParseError::Empty));
        assert!(matches!(
            AnnexKey::parse("SHA256-s1"),
            Err(KeyParseError::MissingSeparator(_))
        ));
        assert!(matches!(
            AnnexKey::parse("SHA256-s1--"),
            Err(KeyParseError::EmptyName(_))
        ));
        assert!(matches!(
            AnnexKey::parse("a/b--name"),
            Err(KeyParseError::ForbiddenCharacter(_))
        ));
        assert!(matches!(
            AnnexKey::parse("SHA 256--name"),
            Err(KeyParseError::ForbiddenCharacter(_))
        ));
        assert!(matches!(
            AnnexKey::parse("--name"),
            Err(KeyParseError::InvalidBackend(_))
        ));
        assert!(matches!(
            AnnexKey::parse("SHA256-1x--name"),
            Err(KeyParseError::MalformedField(_, _))
        ));
    }

    #[test]
    fn hash_dirs_are_deterministic_and_well_formed() {
        let key = AnnexKey::parse("SHA256E-s5--0123456789abcdef").expect("valid key");

        let lower = key.hash_dir_lower();
        assert_eq!(lower.len(), 7);
        let (a, b) = lower.split_once('/').expect("two levels");
        assert_eq!((a.len(), b.len()), (3, 3));
        assert!(lower
            .chars()
            .all(|c| c == '/' || (c.is_ascii_hexdigit() && !c.is_ascii_uppercase())));

        let mixed = key.hash_dir_mixed();
        assert_eq!(mixed.len(), 5);
        let (a, b) = mixed.split_once('/').expect("two levels");
        assert_eq!((a.len(), b.len()), (2, 2));
        assert!(mixed
            .chars()
            .all(|c| c == '/' || MIXED_ALPHABET.contains(&(c as u8))));

        assert_eq!(lower, key.hash_dir_lower());
        assert_eq!(mixed, key.hash_dir_mixed());
    }

    #[test]
    fn hash_dirs_differ_between_keys() {
        let a = AnnexKey::parse("SHA256E-s5--aaaa").expect("valid key");
        let b = AnnexKey::parse("SHA256E-s5--bbbb").expect("valid key");
        assert_ne!(a.hash_dir_lower(), b.hash_dir_lower());
    }
}
