use std::cell::{Ref as CellRef, RefCell};
use std::fmt::{Debug, Display};

use super::{object_kind, Header, Kind};
use crate::value::Value;

/// Dynamic vector of values.
///
/// Capacity doubles from a floor of 8 for explicit reservation and 16 for
/// append-style growth; an out-of-range indexed store grows the array to
/// `index + 1` and never shrinks it.
#[repr(C)]
pub struct Array {
  header: Header,
  items: RefCell<Vec<Value>>,
}

impl Array {
  pub(crate) fn new() -> Array {
    Array {
      header: Header::new(Kind::Array),
      items: RefCell::new(Vec::new()),
    }
  }

  pub fn len(&self) -> usize {
    self.items.borrow().len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.borrow().is_empty()
  }

  pub fn capacity(&self) -> usize {
    self.items.borrow().capacity()
  }

  pub fn get(&self, index: usize) -> Option<Value> {
    self.items.borrow().get(index).copied()
  }

  pub fn push(&self, value: Value) {
    let mut items = self.items.borrow_mut();
    let need = items.len() + 1;
    grow_cap(&mut items, need, 16);
    items.push(value);
  }

  pub fn extend_from(&self, values: &[Value]) {
    let mut items = self.items.borrow_mut();
    let need = items.len() + values.len();
    grow_cap(&mut items, need, 16);
    items.extend_from_slice(values);
  }

  /// Store at `index`, growing with nulls when the index is past the end.
  pub fn set_grow(&self, index: usize, value: Value) {
    let mut items = self.items.borrow_mut();
    if index >= items.len() {
      grow_cap(&mut items, index + 1, 16);
      items.resize(index + 1, Value::Null);
    }
    items[index] = value;
  }

  /// Ensure capacity for at least `min_cap` items without changing `len`.
  pub fn reserve_total(&self, min_cap: usize) {
    let mut items = self.items.borrow_mut();
    grow_cap(&mut items, min_cap, 8);
  }

  /// Clear to empty, keeping the backing storage.
  pub fn reset(&self) {
    self.items.borrow_mut().clear();
  }

  pub fn data_ptr(&self) -> *const Value {
    self.items.borrow().as_ptr()
  }

  pub(crate) fn borrow_items(&self) -> CellRef<'_, Vec<Value>> {
    self.items.borrow()
  }
}

fn grow_cap(items: &mut Vec<Value>, need: usize, floor: usize) {
  if need <= items.capacity() {
    return;
  }
  let mut cap = items.capacity().max(floor);
  while cap < need {
    cap *= 2;
  }
  items.reserve_exact(cap - items.len());
}

object_kind!(Array);

impl Display for Array {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "<array>")
  }
}

impl Debug for Array {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "<array len={}>", self.len())
  }
}
