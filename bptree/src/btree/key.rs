//! Fixed-width keys.

use std::borrow::Cow;

/// A fixed-width key as stored in tree nodes.
///
/// Keys compare bytewise. Every key handed to the tree must be exactly
/// `key_size` bytes; [`Key::normalize`] produces such keys from user input.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(Box<[u8]>);

impl Key {
    /// Truncate or space-pad `raw` to exactly `key_size` bytes.
    ///
    /// Truncation never splits a UTF-8 character; the remainder is padded.
    #[must_use]
    pub fn normalize(raw: &str, key_size: usize) -> Self {
        let mut end = raw.len().min(key_size);
        while !raw.is_char_boundary(end) {
            end -= 1;
        }

        let mut bytes = Vec::with_capacity(key_size);
        bytes.extend_from_slice(&raw.as_bytes()[..end]);
        bytes.resize(key_size, b' ');
        Self(bytes.into_boxed_slice())
    }

    /// Wrap raw key bytes without normalizing them.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.into())
    }

    /// Raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Width of the key in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the key has zero width.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The key as text, lossily decoded.
    #[must_use]
    pub fn as_str_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Key({:?})", self.as_str_lossy())
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str_lossy().trim_end())
    }
}
