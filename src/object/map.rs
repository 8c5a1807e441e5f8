//! The associative container engine.
//!
//! Open-addressed table with linear probing. Capacity is zero or a power of
//! two, the load factor stays at or below 3/4, and an entry is occupied iff
//! its key is not `Null` (so null keys are forbidden). Deletion is
//! backward-shift: followers are moved into the gap whenever the gap would
//! make their home slot unreachable, so probe chains never grow tombstones.

use std::cell::RefCell;
use std::fmt::{Debug, Display};

use super::{object_kind, Header, Kind};
use crate::error::Result;
use crate::util::{as_int32_float, hash_bytes, hash_i32, next_pow2_u32};
use crate::value::{values_equal, Value};

#[derive(Clone, Copy)]
pub(crate) struct MapEntry {
  pub key: Value,
  pub val: Value,
}

const EMPTY: MapEntry = MapEntry {
  key: Value::Null,
  val: Value::Null,
};

#[inline]
fn occupied(e: &MapEntry) -> bool {
  !matches!(e.key, Value::Null)
}

/// Hash a key value. Integer-valued floats in `i32` range hash like their
/// integer twins, so `1` and `1.0` land in the same slot.
fn hash_key(key: Value) -> u32 {
  match key {
    Value::Str(s) => s.hash(),
    Value::Int(i) => hash_i32(i as u32),
    Value::Float(x) => match as_int32_float(x) {
      Some(iv) => hash_i32(iv as u32),
      None => hash_bytes(&x.to_bits().to_le_bytes()),
    },
    Value::Bool(b) => hash_bytes(&[b as u8]),
    Value::NativeFn(f) => hash_bytes(&(f as usize).to_le_bytes()),
    Value::Null => 0,
    other => hash_bytes(&other.object_addr().unwrap_or(0).to_le_bytes()),
  }
}

struct MapCore {
  entries: Box<[MapEntry]>,
  len: u32,
}

impl MapCore {
  fn cap(&self) -> u32 {
    self.entries.len() as u32
  }

  /// Probe for `key`: index of its entry, or of the first empty slot.
  fn find_slot(&self, key: Value) -> usize {
    let mask = self.cap() - 1;
    let mut i = hash_key(key) & mask;
    loop {
      let e = &self.entries[i as usize];
      if !occupied(e) || values_equal(key, e.key) {
        return i as usize;
      }
      i = (i + 1) & mask;
    }
  }

  /// Rehash into a table of `cap` slots. The source is already deduplicated,
  /// so re-insertion probes for empty slots only.
  fn rebuild(&mut self, cap: u32) {
    let mut entries = vec![EMPTY; cap as usize].into_boxed_slice();
    let mask = cap - 1;
    for e in self.entries.iter().filter(|e| occupied(e)) {
      let mut i = hash_key(e.key) & mask;
      while occupied(&entries[i as usize]) {
        i = (i + 1) & mask;
      }
      entries[i as usize] = *e;
    }
    self.entries = entries;
  }
}

#[repr(C)]
pub struct Map {
  header: Header,
  core: RefCell<MapCore>,
}

impl Map {
  pub(crate) fn new() -> Map {
    Map {
      header: Header::new(Kind::Map),
      core: RefCell::new(MapCore {
        entries: Box::new([]),
        len: 0,
      }),
    }
  }

  pub fn len(&self) -> usize {
    self.core.borrow().len as usize
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn capacity(&self) -> usize {
    self.core.borrow().entries.len()
  }

  pub fn get(&self, key: Value) -> Option<Value> {
    let core = self.core.borrow();
    if core.cap() == 0 {
      return None;
    }
    let e = core.entries[core.find_slot(key)];
    occupied(&e).then_some(e.val)
  }

  pub fn insert(&self, key: Value, val: Value) -> Result<()> {
    if matches!(key, Value::Null) {
      fail!(Structural, "can't insert null key in map");
    }
    let mut core = self.core.borrow_mut();
    if core.cap() == 0 {
      core.rebuild(16);
    } else if (core.len as u64 + 1) * 4 > core.cap() as u64 * 3 {
      let cap = core.cap() << 1;
      core.rebuild(cap);
    }
    let i = core.find_slot(key);
    if occupied(&core.entries[i]) {
      core.entries[i].val = val;
      return Ok(());
    }
    core.entries[i] = MapEntry { key, val };
    core.len += 1;
    Ok(())
  }

  pub fn delete(&self, key: Value) -> bool {
    let mut core = self.core.borrow_mut();
    if core.cap() == 0 {
      return false;
    }
    let mask = (core.cap() - 1) as usize;
    let mut i = core.find_slot(key);
    if !occupied(&core.entries[i]) {
      return false;
    }
    let mut j = i;
    'gap: loop {
      core.entries[i].key = Value::Null;
      loop {
        j = (j + 1) & mask;
        if !occupied(&core.entries[j]) {
          break 'gap;
        }
        let k = (hash_key(core.entries[j].key) as usize) & mask;
        // keep scanning while the follower's home stays reachable without
        // the gap, i.e. while k lies in the wrap-aware arc (i, j]
        let in_arc = if i < j { i < k && k <= j } else { i < k || k <= j };
        if !in_arc {
          break;
        }
      }
      let follower = core.entries[j];
      core.entries[i] = follower;
      i = j;
    }
    core.len -= 1;
    true
  }

  /// Key following `prev` in table order, or `Null` when exhausted.
  /// Pass `Null` to begin iteration.
  pub fn next_key(&self, prev: Value) -> Value {
    let core = self.core.borrow();
    let start = if matches!(prev, Value::Null) || core.cap() == 0 {
      0
    } else {
      let i = core.find_slot(prev);
      if occupied(&core.entries[i]) {
        i + 1
      } else {
        i
      }
    };
    for e in core.entries[start..].iter() {
      if occupied(e) {
        return e.key;
      }
    }
    Value::Null
  }

  /// Copy every entry of `other` whose key is absent from `self`.
  pub fn extend_from(&self, other: &Map) -> Result<()> {
    if std::ptr::eq(self, other) {
      return Ok(());
    }
    let src = other.core.borrow();
    for e in src.entries.iter().filter(|e| occupied(e)) {
      if self.get(e.key).is_none() {
        self.insert(e.key, e.val)?;
      }
    }
    Ok(())
  }

  /// Pre-size for `len` pending inserts so they proceed without a rehash.
  pub fn reserve_len(&self, len: u32) {
    if len == 0 {
      return;
    }
    let cap = next_pow2_u32(len.saturating_mul(2)).max(16);
    let mut core = self.core.borrow_mut();
    if core.cap() == 0 {
      core.entries = vec![EMPTY; cap as usize].into_boxed_slice();
    } else if cap > core.cap() {
      core.rebuild(cap);
    }
  }

  /// Clear all entries to empty, keeping the table storage.
  pub fn reset(&self) {
    let mut core = self.core.borrow_mut();
    for e in core.entries.iter_mut() {
      *e = EMPTY;
    }
    core.len = 0;
  }

  pub fn entries_ptr(&self) -> *const () {
    self.core.borrow().entries.as_ptr() as *const ()
  }

  pub(crate) fn for_each(&self, mut f: impl FnMut(Value, Value)) {
    for e in self.core.borrow().entries.iter() {
      if occupied(e) {
        f(e.key, e.val);
      }
    }
  }

  #[cfg(test)]
  fn check_invariants(&self) {
    let core = self.core.borrow();
    let cap = core.cap();
    assert!(cap == 0 || cap.is_power_of_two(), "cap {cap} not a power of two");
    assert!(core.len as u64 * 4 <= cap as u64 * 3, "load factor exceeded");
    let occupied_count = core.entries.iter().filter(|e| occupied(e)).count();
    assert_eq!(occupied_count, core.len as usize);
  }
}

object_kind!(Map);

impl Display for Map {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "<map>")
  }
}

impl Debug for Map {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "<map len={} cap={}>", self.len(), self.capacity())
  }
}
