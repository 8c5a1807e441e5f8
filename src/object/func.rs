use std::cell::Cell;
use std::fmt::{Debug, Display};

use super::string::Str;
use super::{object_kind, Header, Kind, Ref};
use crate::bytecode::Instr;
use crate::span::{SourceMap, SrcLoc};
use crate::value::Value;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UpvalKind {
  /// Capture a register of the enclosing frame.
  Reg,
  /// Share an upvalue of the enclosing closure.
  Upval,
}

#[derive(Clone, Copy, Debug)]
pub struct UpvalDef {
  pub kind: UpvalKind,
  pub num: u32,
}

/// A compiled function: constants, instructions and upvalue descriptors.
/// Immutable once built; closures share it.
#[repr(C)]
pub struct FuncDef {
  header: Header,
  pub name: Option<Ref<Str>>,
  pub n_params: u32,
  pub n_regs: u32,
  pub code: Box<[Instr]>,
  pub consts: Box<[Value]>,
  pub upvals: Box<[UpvalDef]>,
  pub source_map: SourceMap,
  pub creation_loc: SrcLoc,
}

impl FuncDef {
  #[allow(clippy::too_many_arguments)]
  pub(crate) fn new(
    name: Option<Ref<Str>>,
    n_params: u32,
    n_regs: u32,
    code: Box<[Instr]>,
    consts: Box<[Value]>,
    upvals: Box<[UpvalDef]>,
    source_map: SourceMap,
    creation_loc: SrcLoc,
  ) -> FuncDef {
    FuncDef {
      header: Header::new(Kind::FuncDef),
      name,
      n_params,
      n_regs,
      code,
      consts,
      upvals,
      source_map,
      creation_loc,
    }
  }

  pub fn name_string(&self) -> String {
    match self.name {
      Some(s) => s.to_str_lossy().into_owned(),
      None => "?".to_string(),
    }
  }
}

object_kind!(FuncDef);

impl Display for FuncDef {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "<funcdef {}>", self.name_string())
  }
}

impl Debug for FuncDef {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "<funcdef {} params={} regs={} code={}>",
      self.name_string(),
      self.n_params,
      self.n_regs,
      self.code.len()
    )
  }
}

/// A function instance: a definition bound to its captured upvalues.
#[repr(C)]
pub struct Closure {
  header: Header,
  pub func_def: Ref<FuncDef>,
  pub(crate) upvals: Box<[Ref<Upval>]>,
  pub(crate) doc_string: Cell<Option<Ref<Str>>>,
}

impl Closure {
  pub(crate) fn new(func_def: Ref<FuncDef>, upvals: Box<[Ref<Upval>]>) -> Closure {
    Closure {
      header: Header::new(Kind::Closure),
      func_def,
      upvals,
      doc_string: Cell::new(None),
    }
  }

  pub fn n_upvals(&self) -> usize {
    self.upvals.len()
  }

  pub fn doc_string(&self) -> Option<Ref<Str>> {
    self.doc_string.get()
  }

  pub fn set_doc_string(&self, doc: Ref<Str>) {
    self.doc_string.set(Some(doc));
  }
}

object_kind!(Closure);

impl Display for Closure {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "<closure {}>", self.func_def.name_string())
  }
}

impl Debug for Closure {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "<closure {} upvals={}>",
      self.func_def.name_string(),
      self.upvals.len()
    )
  }
}

#[derive(Clone, Copy)]
pub(crate) enum UpvalState {
  /// Refers to a live value-stack slot.
  Open(u32),
  /// Owns its value; the referenced frame has exited.
  Closed(Value),
}

/// The reference cell a closure uses to reach a variable that outlives the
/// frame that declared it. Open upvalues are shared: at most one exists per
/// stack slot.
#[repr(C)]
pub struct Upval {
  header: Header,
  pub(crate) state: Cell<UpvalState>,
}

impl Upval {
  pub(crate) fn open(slot: u32) -> Upval {
    Upval {
      header: Header::new(Kind::Upval),
      state: Cell::new(UpvalState::Open(slot)),
    }
  }

  pub(crate) fn is_open(&self) -> bool {
    matches!(self.state.get(), UpvalState::Open(_))
  }

  pub(crate) fn slot(&self) -> Option<u32> {
    match self.state.get() {
      UpvalState::Open(slot) => Some(slot),
      UpvalState::Closed(_) => None,
    }
  }

  pub(crate) fn get(&self, stack: &[Value]) -> Value {
    match self.state.get() {
      UpvalState::Open(slot) => stack[slot as usize],
      UpvalState::Closed(v) => v,
    }
  }

  pub(crate) fn set(&self, stack: &mut [Value], value: Value) {
    match self.state.get() {
      UpvalState::Open(slot) => stack[slot as usize] = value,
      UpvalState::Closed(_) => self.state.set(UpvalState::Closed(value)),
    }
  }

  /// Copy the stack slot into owned storage. Happens exactly once, on the
  /// first exit of the frame that encloses the slot.
  pub(crate) fn close(&self, stack: &[Value]) {
    if let UpvalState::Open(slot) = self.state.get() {
      self.state.set(UpvalState::Closed(stack[slot as usize]));
    }
  }
}

object_kind!(Upval);

impl Display for Upval {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "<upval>")
  }
}

impl Debug for Upval {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self.state.get() {
      UpvalState::Open(slot) => write!(f, "<upval open slot={slot}>"),
      UpvalState::Closed(v) => write!(f, "<upval closed {v:?}>"),
    }
  }
}
