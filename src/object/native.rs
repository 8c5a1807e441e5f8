use std::any::Any;
use std::fmt::{Debug, Display};

use super::{object_kind, Header, Kind};
use crate::error::Result;
use crate::value::Value;
use crate::Program;

/// A host function callable from scripts.
///
/// Arguments are copies of the registers `R[A+1 .. A+B]` of the call site;
/// the originals stay rooted in the native frame's window for the duration
/// of the call. The returned value lands in the call's return register.
/// An `Err` propagates through the dispatch loop as a user error.
pub type NativeFn = fn(&mut Program, &[Value]) -> Result<Value>;

/// Opaque host data tied to the program's heap.
///
/// The payload is dropped during sweep when the object becomes unreachable,
/// which is where hosts hang their cleanup. `tag` is never interpreted by
/// the language; hosts use it to recognize their own objects.
#[repr(C)]
pub struct NativeObj {
  header: Header,
  tag: i32,
  data: Box<dyn Any>,
}

impl NativeObj {
  pub(crate) fn new(data: Box<dyn Any>, tag: i32) -> NativeObj {
    NativeObj {
      header: Header::new(Kind::NativeObj),
      tag,
      data,
    }
  }

  pub fn tag(&self) -> i32 {
    self.tag
  }

  pub fn data(&self) -> &dyn Any {
    &*self.data
  }

  pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
    self.data.downcast_ref()
  }
}

object_kind!(NativeObj);

impl Display for NativeObj {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "<native object>")
  }
}

impl Debug for NativeObj {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "<native object tag={}>", self.tag)
  }
}
