//! The program: one VM instance, its heap, and its global tables.
//!
//! Two programs are fully independent; their heaps are disjoint and values
//! must never cross from one to another. A program survives its errors: a
//! failed run leaves the globals and heap intact and a subsequent call may
//! be attempted.

use std::any::Any;

use indexmap::IndexMap;

use crate::bytecode::Instr;
use crate::error::{Error, Result};
use crate::heap::Heap;
use crate::object::{
  Array, Closure, FuncDef, Map, NativeFn, NativeObj, Ref, Str, Upval, UpvalDef,
};
use crate::span::{FileTable, SourceMap, SrcLoc};
use crate::value::Value;
use crate::vm::Vm;

pub struct Program {
  pub(crate) heap: Heap,
  pub(crate) vm: Vm,
  pub(crate) files: FileTable,
  pub(crate) global_funcs: IndexMap<String, Ref<Closure>>,
  pub(crate) global_vars: IndexMap<String, Value>,
  pub(crate) natives: IndexMap<String, NativeFn>,
  pub(crate) last_error: Option<Error>,
}

impl Program {
  pub fn new() -> Program {
    let mut prog = Program {
      heap: Heap::new(),
      vm: Vm::new(),
      files: FileTable::new(),
      global_funcs: IndexMap::new(),
      global_vars: IndexMap::new(),
      natives: IndexMap::new(),
      last_error: None,
    };
    prog.init_char_cache();
    prog
  }

  /// The 256 single-byte strings served by string indexing, pinned for the
  /// program lifetime.
  fn init_char_cache(&mut self) {
    for i in 0..256 {
      let s = self.alloc_str_pinned(&[i as u8]);
      self.vm.char_cache[i] = Value::Str(s);
    }
  }

  // --- allocation ---------------------------------------------------------

  pub(crate) fn alloc_object<T: crate::object::Object>(
    &mut self,
    obj: T,
    extra_bytes: usize,
    pinned: bool,
  ) -> Ref<T> {
    self.maybe_collect();
    self.heap.alloc(obj, extra_bytes, pinned)
  }

  pub fn new_str(&mut self, s: &str) -> Ref<Str> {
    self.new_str_bytes(s.as_bytes())
  }

  pub(crate) fn new_str_bytes(&mut self, bytes: &[u8]) -> Ref<Str> {
    self.alloc_object(Str::new(bytes), bytes.len(), false)
  }

  fn alloc_str_pinned(&mut self, bytes: &[u8]) -> Ref<Str> {
    self.alloc_object(Str::new(bytes), bytes.len(), true)
  }

  pub fn new_array(&mut self) -> Ref<Array> {
    self.alloc_object(Array::new(), 0, false)
  }

  pub fn new_map(&mut self) -> Ref<Map> {
    self.alloc_object(Map::new(), 0, false)
  }

  pub(crate) fn alloc_upval(&mut self, slot: u32) -> Ref<Upval> {
    self.alloc_object(Upval::open(slot), 0, false)
  }

  pub(crate) fn alloc_closure(&mut self, func_def: Ref<FuncDef>, upvals: Vec<Ref<Upval>>) -> Ref<Closure> {
    // the definition may have no root yet when a host wraps it directly
    self.heap.pin_obj(func_def.erase());
    let extra = upvals.len() * std::mem::size_of::<Ref<Upval>>();
    let closure = self.alloc_object(Closure::new(func_def, upvals.into_boxed_slice()), extra, false);
    self.heap.unpin_obj(func_def.erase());
    closure
  }

  /// Wrap a function definition that captures nothing.
  pub fn new_closure(&mut self, func_def: Ref<FuncDef>) -> Result<Ref<Closure>> {
    if !func_def.upvals.is_empty() {
      fail!(Structural, "closure requires captured upvalues");
    }
    Ok(self.alloc_closure(func_def, Vec::new()))
  }

  #[allow(clippy::too_many_arguments)]
  pub fn new_func_def(
    &mut self,
    name: Option<&str>,
    n_params: u32,
    n_regs: u32,
    code: Box<[Instr]>,
    consts: Vec<Value>,
    upvals: Vec<UpvalDef>,
    source_map: SourceMap,
    creation_loc: SrcLoc,
  ) -> Ref<FuncDef> {
    let name = name.map(|n| self.new_str(n));
    // the name is unrooted until the definition lands; anchor it across the
    // second allocation
    if let Some(n) = name {
      self.heap.pin_obj(n.erase());
    }
    let extra = code.len() * std::mem::size_of::<Instr>()
      + consts.len() * std::mem::size_of::<Value>();
    let def = self.alloc_object(
      FuncDef::new(
        name,
        n_params,
        n_regs,
        code,
        consts.into_boxed_slice(),
        upvals.into_boxed_slice(),
        source_map,
        creation_loc,
      ),
      extra,
      false,
    );
    if let Some(n) = name {
      self.heap.unpin_obj(n.erase());
    }
    def
  }

  // --- host value wrappers ------------------------------------------------
  //
  // These anchor the created object in the c_vals list, which keeps it alive
  // until the current host call returns.

  pub fn new_string_value(&mut self, s: &str) -> Value {
    let v = Value::Str(self.new_str(s));
    self.heap.push_c_val(v);
    v
  }

  pub fn new_array_value(&mut self) -> Value {
    let v = Value::Array(self.new_array());
    self.heap.push_c_val(v);
    v
  }

  pub fn new_map_value(&mut self) -> Value {
    let v = Value::Map(self.new_map());
    self.heap.push_c_val(v);
    v
  }

  /// Tie opaque host data to this program. The payload drops when the object
  /// is swept; `tag` lets the host recognize its own objects later.
  pub fn new_native_obj(&mut self, data: Box<dyn Any>, tag: i32) -> Value {
    let obj = self.alloc_object(NativeObj::new(data, tag), 0, false);
    let v = Value::NativeObj(obj);
    self.heap.push_c_val(v);
    v
  }

  // --- native functions ---------------------------------------------------

  pub fn add_native_fn(&mut self, name: &str, f: NativeFn) -> Result<()> {
    if self.natives.contains_key(name) {
      fail!(Structural, "duplicate native function '{name}'");
    }
    self.natives.insert(name.to_string(), f);
    Ok(())
  }

  pub fn native_fn(&self, name: &str) -> Option<NativeFn> {
    self.natives.get(name).copied()
  }

  pub fn native_fn_name(&self, f: NativeFn) -> Option<&str> {
    self
      .natives
      .iter()
      .find(|&(_, g)| *g as usize == f as usize)
      .map(|(name, _)| name.as_str())
  }

  // --- globals ------------------------------------------------------------

  /// Register a closure under its function's name. Replaces any previous
  /// entry with that name.
  pub fn add_global_func(&mut self, closure: Ref<Closure>) -> Result<()> {
    let Some(name) = closure.func_def.name else {
      fail!(Structural, "global function requires a name");
    };
    let name = name.to_str_lossy().into_owned();
    self.global_funcs.insert(name, closure);
    Ok(())
  }

  pub fn global_func(&self, name: &str) -> Option<Ref<Closure>> {
    self.global_funcs.get(name).copied()
  }

  pub fn set_global_var(&mut self, name: &str, value: Value) {
    self.global_vars.insert(name.to_string(), value);
  }

  pub fn global_var(&self, name: &str) -> Option<Value> {
    self.global_vars.get(name).copied()
  }

  // --- calls --------------------------------------------------------------

  /// Call a registered global function by name.
  pub fn call_function(&mut self, name: &str, args: &[Value]) -> Result<Value> {
    let Some(closure) = self.global_func(name) else {
      let e = error!(Structural, "function '{name}' doesn't exist");
      self.last_error = Some(e.clone());
      return Err(e);
    };
    self.call_closure(closure, args)
  }

  /// Call a closure with host-supplied arguments. Extra arguments beyond the
  /// function's parameter count are dropped.
  pub fn call_closure(&mut self, closure: Ref<Closure>, args: &[Value]) -> Result<Value> {
    let func_def = closure.func_def;
    let n_args = args.len().min(func_def.n_params as usize);

    let depth = self.vm.frames.len();
    // place the return slot above every live register window
    let ret_reg = self.vm.frames.iter().map(|f| f.stack_top).max().unwrap_or(0);

    self.ensure_stack_size(ret_reg + 1 + n_args);
    self.vm.stack[ret_reg] = Value::Null;
    self.vm.stack[ret_reg + 1..ret_reg + 1 + n_args].copy_from_slice(&args[..n_args]);

    self.prepare_call(closure, ret_reg, n_args, None);
    self.vm.pc = 0;

    match self.run() {
      Ok(()) => Ok(self.vm.stack[ret_reg]),
      Err(e) => {
        self.vm.frames.truncate(depth);
        self.last_error = Some(e.clone());
        Err(e)
      }
    }
  }

  // --- errors -------------------------------------------------------------

  pub fn last_error(&self) -> Option<&Error> {
    self.last_error.as_ref()
  }

  /// Rendered message of the last failed run, location and traceback
  /// included.
  pub fn error_report(&self) -> String {
    match &self.last_error {
      Some(e) => e.to_string(),
      None => "no error".to_string(),
    }
  }

  /// Code address of the last faulting instruction, if the error happened in
  /// a scripted frame.
  pub fn last_error_addr(&self) -> Option<u32> {
    self.vm.last_error_addr
  }

  pub fn last_error_src_loc(&self) -> SrcLoc {
    self.vm.last_error_loc
  }

  // --- garbage collector controls -----------------------------------------

  pub fn alive_objects(&self) -> usize {
    self.heap.alive_objects()
  }

  pub fn set_gc_paused(&mut self, paused: bool) {
    self.heap.set_paused(paused);
  }

  /// Bytes of allocation between collections.
  pub fn set_gc_threshold(&mut self, bytes: usize) {
    self.heap.set_collect_at(bytes);
  }

  /// Current depth of the pin stack. Hosts snapshot this on entry to a
  /// multi-step construction and restore it on exit.
  pub fn pin_state(&self) -> usize {
    self.heap.pin_state()
  }

  pub fn restore_pin_state(&mut self, state: usize) {
    self.heap.restore_pin_state(state);
  }

  /// Anchor a single object on the pin stack.
  pub fn pin_anchor(&mut self, v: Value) -> bool {
    match v.gc_ref() {
      Some(gc) => {
        self.heap.push_pin(gc);
        true
      }
      None => false,
    }
  }

  /// Set the PIN bit on an object, keeping it and its contents across
  /// collections until unpinned.
  pub fn pin_value(&mut self, v: Value) -> bool {
    match v.gc_ref() {
      Some(gc) => {
        self.heap.pin_obj(gc);
        true
      }
      None => false,
    }
  }

  pub fn unpin_value(&mut self, v: Value) -> bool {
    match v.gc_ref() {
      Some(gc) => {
        self.heap.unpin_obj(gc);
        true
      }
      None => false,
    }
  }

  #[cfg(test)]
  pub(crate) fn truncate_c_vals_to(&mut self, state: usize) {
    self.heap.truncate_c_vals(state);
  }

  // --- source files -------------------------------------------------------

  pub fn intern_file(&mut self, name: &str) -> u16 {
    self.files.intern(name)
  }

  pub fn file_name(&self, id: u16) -> &str {
    self.files.name(id)
  }
}

impl Default for Program {
  fn default() -> Program {
    Program::new()
  }
}

// --- host argument helpers -----------------------------------------------
//
// Typed access to native-call arguments. The `arg_*` forms validate and
// produce the program error on mismatch; the `opt_*` forms fall back to a
// default.

pub fn arg_int(args: &[Value], fn_name: &str, index: usize) -> Result<i64> {
  match args.get(index) {
    Some(Value::Int(i)) => Ok(*i),
    Some(v) => Err(error!(
      Type,
      "{fn_name}: argument {index}: expected integer, got {}",
      v.type_name()
    )),
    None => Err(error!(Type, "{fn_name}: argument {index}: missing")),
  }
}

pub fn arg_number(args: &[Value], fn_name: &str, index: usize) -> Result<f64> {
  match args.get(index).and_then(|v| v.to_f64()) {
    Some(x) => Ok(x),
    None => Err(error!(Type, "{fn_name}: argument {index}: expected number")),
  }
}

pub fn arg_str(args: &[Value], fn_name: &str, index: usize) -> Result<Ref<Str>> {
  match args.get(index) {
    Some(Value::Str(s)) => Ok(*s),
    Some(v) => Err(error!(
      Type,
      "{fn_name}: argument {index}: expected string, got {}",
      v.type_name()
    )),
    None => Err(error!(Type, "{fn_name}: argument {index}: missing")),
  }
}

/// Truncating integer coercion: floats must be finite and in `i64` range.
pub fn as_i64(v: Value, fn_name: &str) -> Result<i64> {
  match v {
    Value::Int(i) => Ok(i),
    Value::Float(d) => {
      if !d.is_finite() || d < i64::MIN as f64 || d > i64::MAX as f64 {
        fail!(Range, "{fn_name}: number out of int64 range");
      }
      Ok(d as i64)
    }
    _ => Err(error!(Type, "{fn_name}: expected number/integer")),
  }
}

pub fn opt_number(args: &[Value], index: usize, default: f64) -> f64 {
  match args.get(index) {
    Some(Value::Float(x)) => *x,
    _ => default,
  }
}

pub fn opt_integer(args: &[Value], index: usize, default: i64) -> i64 {
  match args.get(index) {
    Some(Value::Int(i)) => *i,
    _ => default,
  }
}

pub fn opt_boolean(args: &[Value], index: usize, default: bool) -> bool {
  match args.get(index) {
    Some(Value::Bool(b)) => *b,
    _ => default,
  }
}

pub fn opt_str(args: &[Value], index: usize) -> Option<Ref<Str>> {
  match args.get(index) {
    Some(Value::Str(s)) => Some(*s),
    _ => None,
  }
}

/// Downcast a native-object argument, checking the host tag first.
pub fn opt_native_obj<T: Any>(args: &[Value], index: usize, tag: i32) -> Option<Ref<NativeObj>> {
  match args.get(index) {
    Some(Value::NativeObj(o)) if o.tag() == tag && o.data().is::<T>() => Some(*o),
    _ => None,
  }
}
