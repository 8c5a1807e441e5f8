//! The tagged value.
//!
//! `Value` is small and `Copy`: scalars are stored inline and object variants
//! hold stable pointers into the program heap. The collector keeps everything
//! reachable from the VM roots alive, so copying values around the register
//! file costs nothing.

use std::fmt::{Debug, Display};

use crate::object::{Array, Closure, FuncDef, GcRef, Map, NativeObj, Ref, Str, Upval};

pub use crate::object::native::NativeFn;

#[derive(Clone, Copy)]
pub enum Value {
  Null,
  Bool(bool),
  Int(i64),
  Float(f64),
  Str(Ref<Str>),
  Array(Ref<Array>),
  Map(Ref<Map>),
  Closure(Ref<Closure>),
  FuncDef(Ref<FuncDef>),
  Upval(Ref<Upval>),
  NativeFn(NativeFn),
  NativeObj(Ref<NativeObj>),
}

impl Value {
  #[inline]
  pub fn is_null(self) -> bool {
    matches!(self, Value::Null)
  }

  #[inline]
  pub fn is_int(self) -> bool {
    matches!(self, Value::Int(_))
  }

  #[inline]
  pub fn is_float(self) -> bool {
    matches!(self, Value::Float(_))
  }

  #[inline]
  pub fn is_number(self) -> bool {
    matches!(self, Value::Int(_) | Value::Float(_))
  }

  #[inline]
  pub fn is_str(self) -> bool {
    matches!(self, Value::Str(_))
  }

  pub fn as_int(self) -> Option<i64> {
    match self {
      Value::Int(i) => Some(i),
      _ => None,
    }
  }

  pub fn as_float(self) -> Option<f64> {
    match self {
      Value::Float(x) => Some(x),
      _ => None,
    }
  }

  pub fn as_bool(self) -> Option<bool> {
    match self {
      Value::Bool(b) => Some(b),
      _ => None,
    }
  }

  pub fn as_str(self) -> Option<Ref<Str>> {
    match self {
      Value::Str(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_array(self) -> Option<Ref<Array>> {
    match self {
      Value::Array(a) => Some(a),
      _ => None,
    }
  }

  pub fn as_map(self) -> Option<Ref<Map>> {
    match self {
      Value::Map(m) => Some(m),
      _ => None,
    }
  }

  pub fn as_closure(self) -> Option<Ref<Closure>> {
    match self {
      Value::Closure(c) => Some(c),
      _ => None,
    }
  }

  /// Numeric coercion: integers widen to float, floats pass through.
  #[inline]
  pub fn to_f64(self) -> Option<f64> {
    match self {
      Value::Int(i) => Some(i as f64),
      Value::Float(x) => Some(x),
      _ => None,
    }
  }

  /// `Null`, `false`, zero and the empty string are falsy; everything else,
  /// including empty arrays and maps, is truthy.
  pub fn is_truthy(self) -> bool {
    match self {
      Value::Null => false,
      Value::Bool(b) => b,
      Value::Int(i) => i != 0,
      Value::Float(x) => x != 0.0,
      Value::Str(s) => !s.is_empty(),
      Value::Upval(_) => false,
      Value::Array(_)
      | Value::Map(_)
      | Value::Closure(_)
      | Value::FuncDef(_)
      | Value::NativeFn(_)
      | Value::NativeObj(_) => true,
    }
  }

  pub fn type_name(self) -> &'static str {
    match self {
      Value::Null => "null",
      Value::Bool(_) => "bool",
      Value::Int(_) => "integer",
      Value::Float(_) => "number",
      Value::Str(_) => "string",
      Value::Array(_) => "array",
      Value::Map(_) => "map",
      Value::Closure(_) => "closure",
      Value::FuncDef(_) => "funcdef",
      Value::Upval(_) => "upval",
      Value::NativeFn(_) => "cfunc",
      Value::NativeObj(_) => "cobj",
    }
  }

  pub(crate) fn gc_ref(self) -> Option<GcRef> {
    match self {
      Value::Str(o) => Some(o.erase()),
      Value::Array(o) => Some(o.erase()),
      Value::Map(o) => Some(o.erase()),
      Value::Closure(o) => Some(o.erase()),
      Value::FuncDef(o) => Some(o.erase()),
      Value::Upval(o) => Some(o.erase()),
      Value::NativeObj(o) => Some(o.erase()),
      Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::NativeFn(_) => None,
    }
  }

  pub(crate) fn object_addr(self) -> Option<usize> {
    match self {
      Value::Str(o) => Some(o.addr()),
      Value::Array(o) => Some(o.addr()),
      Value::Map(o) => Some(o.addr()),
      Value::Closure(o) => Some(o.addr()),
      Value::FuncDef(o) => Some(o.addr()),
      Value::Upval(o) => Some(o.addr()),
      Value::NativeObj(o) => Some(o.addr()),
      _ => None,
    }
  }
}

impl Default for Value {
  fn default() -> Self {
    Value::Null
  }
}

impl PartialEq for Value {
  fn eq(&self, other: &Self) -> bool {
    values_equal(*self, *other)
  }
}

/// Value equality. Different variants are unequal except `Int` vs `Float`,
/// which compare by numeric value. Objects compare by identity; strings by
/// content (hash-guarded).
pub fn values_equal(a: Value, b: Value) -> bool {
  use Value::*;
  match (a, b) {
    (Null, Null) => true,
    (Bool(x), Bool(y)) => x == y,
    (Int(x), Int(y)) => x == y,
    (Float(x), Float(y)) => x == y,
    (Int(x), Float(y)) | (Float(y), Int(x)) => x as f64 == y,
    (Str(x), Str(y)) => x.ptr_eq(y) || x.content_eq(&y),
    (Array(x), Array(y)) => x.ptr_eq(y),
    (Map(x), Map(y)) => x.ptr_eq(y),
    (Closure(x), Closure(y)) => x.ptr_eq(y),
    (FuncDef(x), FuncDef(y)) => x.ptr_eq(y),
    (Upval(x), Upval(y)) => x.ptr_eq(y),
    (NativeFn(x), NativeFn(y)) => x as usize == y as usize,
    (NativeObj(x), NativeObj(y)) => x.ptr_eq(y),
    _ => false,
  }
}

/// Integer-only equality used by `CMP_EQI`: false unless both are integers.
#[inline]
pub(crate) fn ints_equal(a: Value, b: Value) -> bool {
  matches!((a, b), (Value::Int(x), Value::Int(y)) if x == y)
}

/// Float-only equality used by `CMP_EQF`: false unless both are floats.
#[inline]
pub(crate) fn floats_equal(a: Value, b: Value) -> bool {
  matches!((a, b), (Value::Float(x), Value::Float(y)) if x == y)
}

/// Shortest-roundtrip float formatting; `2.0` prints as `2`.
pub(crate) fn format_float(x: f64) -> String {
  if x.is_nan() {
    return "nan".to_string();
  }
  if x.is_infinite() {
    return if x < 0.0 { "-inf".to_string() } else { "inf".to_string() };
  }
  format!("{x}")
}

impl Display for Value {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Value::Null => write!(f, "null"),
      Value::Bool(b) => write!(f, "{b}"),
      Value::Int(i) => write!(f, "{i}"),
      Value::Float(x) => write!(f, "{}", format_float(*x)),
      Value::Str(s) => write!(f, "{s}"),
      Value::Array(a) => write!(f, "{a}"),
      Value::Map(m) => write!(f, "{m}"),
      Value::Closure(c) => write!(f, "{c}"),
      Value::FuncDef(d) => write!(f, "{d}"),
      Value::Upval(u) => write!(f, "{u}"),
      Value::NativeFn(_) => write!(f, "<native function>"),
      Value::NativeObj(o) => write!(f, "{o}"),
    }
  }
}

impl Debug for Value {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Value::Null => write!(f, "NULL"),
      Value::Bool(b) => write!(f, "BOOL({b})"),
      Value::Int(i) => write!(f, "INTEGER({i})"),
      Value::Float(x) => write!(f, "FLOAT({x})"),
      Value::Str(s) => write!(f, "STRING({s:?})"),
      Value::Array(a) => write!(f, "ARRAY(len={})", a.len()),
      Value::Map(m) => write!(f, "MAP(len={},cap={})", m.len(), m.capacity()),
      Value::Closure(c) => write!(f, "CLOSURE({:?})", *c),
      Value::FuncDef(d) => write!(f, "FUNC_DEF({:?})", *d),
      Value::Upval(u) => write!(f, "UPVAL({:?})", *u),
      Value::NativeFn(_) => write!(f, "C_FUNC"),
      Value::NativeObj(o) => write!(f, "C_OBJ({:?})", *o),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn truthiness() {
    assert!(!Value::Null.is_truthy());
    assert!(!Value::Bool(false).is_truthy());
    assert!(!Value::Int(0).is_truthy());
    assert!(!Value::Float(0.0).is_truthy());
    assert!(Value::Bool(true).is_truthy());
    assert!(Value::Int(-1).is_truthy());
    assert!(Value::Float(0.5).is_truthy());
  }

  #[test]
  fn scalar_equality_is_reflexive_and_symmetric() {
    let vals = [
      Value::Null,
      Value::Bool(true),
      Value::Bool(false),
      Value::Int(0),
      Value::Int(-7),
      Value::Float(0.0),
      Value::Float(3.25),
    ];
    for &a in &vals {
      assert!(values_equal(a, a), "{a:?} != itself");
      for &b in &vals {
        assert_eq!(values_equal(a, b), values_equal(b, a), "{a:?} vs {b:?}");
      }
    }
  }

  #[test]
  fn int_float_compare_by_numeric_value() {
    assert!(values_equal(Value::Int(1), Value::Float(1.0)));
    assert!(values_equal(Value::Float(-2.0), Value::Int(-2)));
    assert!(!values_equal(Value::Int(1), Value::Float(1.5)));
    assert!(!values_equal(Value::Int(1), Value::Bool(true)));
    assert!(!values_equal(Value::Int(0), Value::Null));
  }

  #[test]
  fn nan_is_not_equal_to_itself() {
    assert!(!values_equal(Value::Float(f64::NAN), Value::Float(f64::NAN)));
  }

  #[test]
  fn typed_equality_requires_the_type() {
    assert!(ints_equal(Value::Int(3), Value::Int(3)));
    assert!(!ints_equal(Value::Int(3), Value::Float(3.0)));
    assert!(floats_equal(Value::Float(3.0), Value::Float(3.0)));
    assert!(!floats_equal(Value::Int(3), Value::Float(3.0)));
  }

  #[test]
  fn float_formatting() {
    assert_eq!(format_float(3.5), "3.5");
    assert_eq!(format_float(2.0), "2");
    assert_eq!(format_float(-0.25), "-0.25");
    assert_eq!(format_float(f64::NAN), "nan");
    assert_eq!(format_float(f64::INFINITY), "inf");
    assert_eq!(format_float(f64::NEG_INFINITY), "-inf");
  }
}
