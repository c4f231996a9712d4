//! Byte-string keys and values.
//!
//! A [`Slice`] is an immutable byte string ordered by lexicographic byte
//! comparison. [`SeekTarget`] adds the two sentinels used to position an
//! iterator before the first key or after the last one; sentinels are never
//! stored in a tree.

use std::borrow::Borrow;
use std::cmp::Ordering;

/// An immutable, ordered byte string.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Slice {
    bytes: Box<[u8]>,
}

impl Slice {
    /// Create a slice from raw bytes.
    #[must_use]
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// The underlying bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Length in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the slice has no bytes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Compare two slices byte-wise.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

impl AsRef<[u8]> for Slice {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl Borrow<[u8]> for Slice {
    fn borrow(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<&[u8]> for Slice {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes)
    }
}

impl From<Vec<u8>> for Slice {
    fn from(bytes: Vec<u8>) -> Self {
        Self {
            bytes: bytes.into_boxed_slice(),
        }
    }
}

impl From<&str> for Slice {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes())
    }
}

impl From<String> for Slice {
    fn from(s: String) -> Self {
        Self::from(s.into_bytes())
    }
}

impl std::fmt::Display for Slice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.bytes))
    }
}

impl std::fmt::Debug for Slice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match std::str::from_utf8(&self.bytes) {
            Ok(s) => write!(f, "Slice({s:?})"),
            Err(_) => write!(f, "Slice({:02x?})", &self.bytes),
        }
    }
}

/// Where an iterator seek should land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekTarget<'a> {
    /// Sorts before every real key.
    BeforeAllKeys,
    /// A real key.
    Key(&'a [u8]),
    /// Sorts after every real key.
    AfterAllKeys,
}

impl SeekTarget<'_> {
    /// Compare this target against a stored key.
    #[must_use]
    pub fn compare_key(&self, key: &[u8]) -> Ordering {
        match self {
            Self::BeforeAllKeys => Ordering::Less,
            Self::Key(target) => (*target).cmp(key),
            Self::AfterAllKeys => Ordering::Greater,
        }
    }
}

impl<'a> From<&'a Slice> for SeekTarget<'a> {
    fn from(slice: &'a Slice) -> Self {
        Self::Key(slice.as_bytes())
    }
}

impl<'a> From<&'a [u8]> for SeekTarget<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self::Key(bytes)
    }
}

impl<'a> From<&'a str> for SeekTarget<'a> {
    fn from(s: &'a str) -> Self {
        Self::Key(s.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_ordering_is_bytewise() {
        let a = Slice::from("a");
        let ab = Slice::from("ab");
        let b = Slice::from("b");
        let upper = Slice::from("B");

        assert_eq!(a.compare(&ab), Ordering::Less);
        assert_eq!(ab.compare(&b), Ordering::Less);
        assert_eq!(upper.compare(&a), Ordering::Less);
        assert_eq!(a.compare(&Slice::from(vec![b'a'])), Ordering::Equal);
        assert!(Slice::from(vec![0x00]) < Slice::from(vec![0xFF]));
    }

    #[test]
    fn test_slice_padded_numbers_sort_numerically() {
        let keys: Vec<Slice> = (0..20).map(|i| Slice::from(format!("{i:>5}"))).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_sentinels_bound_every_key() {
        for key in [&b""[..], b"\x00", b"zzz", b"\xff\xff\xff"] {
            assert_eq!(SeekTarget::BeforeAllKeys.compare_key(key), Ordering::Less);
            assert_eq!(SeekTarget::AfterAllKeys.compare_key(key), Ordering::Greater);
        }
        assert_eq!(SeekTarget::from("m").compare_key(b"m"), Ordering::Equal);
        assert_eq!(SeekTarget::from("m").compare_key(b"n"), Ordering::Less);
    }

    #[test]
    fn test_slice_display_and_len() {
        let slice = Slice::from("hello");
        assert_eq!(slice.len(), 5);
        assert!(!slice.is_empty());
        assert_eq!(slice.to_string(), "hello");
        assert!(Slice::default().is_empty());
    }
}
