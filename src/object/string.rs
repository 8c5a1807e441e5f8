use std::borrow::Cow;
use std::fmt::{Debug, Display};

use super::{object_kind, Header, Kind};
use crate::util::hash_bytes;

/// Immutable byte string with a cached hash.
///
/// Scripts index strings by byte; content is not required to be valid UTF-8
/// (the char cache covers all 256 single-byte strings).
#[repr(C)]
pub struct Str {
  header: Header,
  hash: u32,
  data: Box<[u8]>,
}

impl Str {
  pub(crate) fn new(bytes: &[u8]) -> Str {
    Str {
      header: Header::new(Kind::Str),
      hash: hash_bytes(bytes),
      data: bytes.into(),
    }
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn hash(&self) -> u32 {
    self.hash
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.data
  }

  pub fn to_str_lossy(&self) -> Cow<'_, str> {
    String::from_utf8_lossy(&self.data)
  }

  /// Content equality, hash-guarded. Callers check pointer identity first.
  pub(crate) fn content_eq(&self, other: &Str) -> bool {
    self.hash == other.hash && self.data.len() == other.data.len() && self.data == other.data
  }
}

object_kind!(Str);

impl Display for Str {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    Display::fmt(&self.to_str_lossy(), f)
  }
}

impl Debug for Str {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    Debug::fmt(&self.to_str_lossy(), f)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn content_equality_is_hash_guarded() {
    let a = Str::new(b"hello");
    let b = Str::new(b"hello");
    let c = Str::new(b"world");
    assert!(a.content_eq(&b));
    assert!(!a.content_eq(&c));
    assert_eq!(a.hash(), b.hash());
  }

  #[test]
  fn non_utf8_bytes_are_allowed() {
    let s = Str::new(&[0xff, 0xfe]);
    assert_eq!(s.len(), 2);
    assert_eq!(s.as_bytes(), &[0xff, 0xfe]);
  }

  #[test]
  fn empty() {
    let s = Str::new(b"");
    assert!(s.is_empty());
    assert_eq!(s.len(), 0);
  }
}
