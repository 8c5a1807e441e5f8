//! Object allocation and the mark/sweep collector.
//!
//! Every live object is threaded into a single list through its header. A
//! collection may only run at an allocation point: when the bytes allocated
//! since the last collection cross the threshold, the roots are marked (with
//! an explicit worklist, so deep object graphs cannot blow the call stack)
//! and the object list is swept. Objects never move.
//!
//! Short-lived anchors come in two forms: the *pin stack*, a scoped list of
//! roots that hosts snapshot and restore around their calls, and the PIN
//! header bit for individual objects under multi-step construction. Both keep
//! the object and everything reachable from it alive.

use std::ptr::NonNull;

use crate::object::{
  Array, Closure, FuncDef, GcRef, Header, Kind, Map, NativeObj, Object, Ref, Str, Upval,
  UpvalState, GC_MARK, GC_PIN,
};
use crate::value::Value;
use crate::Program;

pub(crate) const DEFAULT_COLLECT_AT: usize = 1_000_000;

pub struct Heap {
  objects: Option<NonNull<Header>>,
  pinned: Vec<GcRef>,
  c_vals: Vec<Value>,
  allocated_since_gc: usize,
  collect_at: usize,
  paused: bool,
  alive: usize,
}

impl Heap {
  pub(crate) fn new() -> Heap {
    Heap {
      objects: None,
      pinned: Vec::new(),
      c_vals: Vec::new(),
      allocated_since_gc: 0,
      collect_at: DEFAULT_COLLECT_AT,
      paused: false,
      alive: 0,
    }
  }

  pub(crate) fn should_collect(&self) -> bool {
    !self.paused && self.allocated_since_gc >= self.collect_at
  }

  /// Allocate `obj` and link it at the head of the object list.
  /// `extra_bytes` feeds the collection cadence for out-of-line payloads.
  pub(crate) fn alloc<T: Object>(&mut self, obj: T, extra_bytes: usize, pinned: bool) -> Ref<T> {
    let ptr = NonNull::from(Box::leak(Box::new(obj)));
    let r = Ref::new(ptr);
    let gc = r.erase();
    gc.header().next.set(self.objects);
    self.objects = Some(gc.raw());
    self.allocated_since_gc += std::mem::size_of::<T>() + extra_bytes;
    self.alive += 1;
    if pinned {
      self.pinned.push(gc);
    }
    r
  }

  pub fn alive_objects(&self) -> usize {
    self.alive
  }

  pub(crate) fn set_paused(&mut self, paused: bool) {
    self.paused = paused;
  }

  pub(crate) fn set_collect_at(&mut self, bytes: usize) {
    self.collect_at = bytes;
  }

  pub(crate) fn reset_alloc_counter(&mut self) {
    self.allocated_since_gc = 0;
  }

  pub(crate) fn pin_state(&self) -> usize {
    self.pinned.len()
  }

  pub(crate) fn restore_pin_state(&mut self, state: usize) {
    if state <= self.pinned.len() {
      self.pinned.truncate(state);
    }
  }

  pub(crate) fn push_pin(&mut self, gc: GcRef) {
    self.pinned.push(gc);
  }

  pub(crate) fn pin_obj(&mut self, gc: GcRef) {
    gc.header().set(GC_PIN);
  }

  pub(crate) fn unpin_obj(&mut self, gc: GcRef) {
    gc.header().clear(GC_PIN);
  }

  pub(crate) fn c_vals_state(&self) -> usize {
    self.c_vals.len()
  }

  pub(crate) fn truncate_c_vals(&mut self, state: usize) {
    self.c_vals.truncate(state);
  }

  pub(crate) fn push_c_val(&mut self, v: Value) {
    self.c_vals.push(v);
  }

  pub(crate) fn pinned(&self) -> &[GcRef] {
    &self.pinned
  }

  pub(crate) fn c_vals(&self) -> &[Value] {
    &self.c_vals
  }

  /// Mark every object carrying the PIN bit as a root, so that a pinned
  /// container keeps its contents alive.
  pub(crate) fn mark_bit_pinned(&self, marker: &mut Marker) {
    let mut cur = self.objects;
    while let Some(ptr) = cur {
      let gc = GcRef::from_raw(ptr);
      if gc.header().has(GC_PIN) {
        marker.mark(gc);
      }
      cur = gc.header().next.get();
    }
  }

  /// Free every object lacking both MARK and PIN; clear MARK on survivors.
  pub(crate) fn sweep(&mut self) {
    let mut cur = self.objects;
    let mut prev: Option<NonNull<Header>> = None;
    while let Some(ptr) = cur {
      let gc = GcRef::from_raw(ptr);
      let next = gc.header().next.get();
      if gc.header().has(GC_MARK) || gc.header().has(GC_PIN) {
        gc.header().clear(GC_MARK);
        prev = Some(ptr);
      } else {
        match prev {
          Some(p) => unsafe { p.as_ref() }.next.set(next),
          None => self.objects = next,
        }
        unsafe { free_object(ptr) };
        self.alive -= 1;
      }
      cur = next;
    }
  }
}

impl Drop for Heap {
  fn drop(&mut self) {
    let mut cur = self.objects;
    while let Some(ptr) = cur {
      cur = unsafe { ptr.as_ref() }.next.get();
      unsafe { free_object(ptr) };
    }
    self.objects = None;
    self.alive = 0;
  }
}

/// # Safety
///
/// `ptr` must point at a live object allocated by [`Heap::alloc`], and no
/// reference to it may be used afterwards.
unsafe fn free_object(ptr: NonNull<Header>) {
  let kind = unsafe { ptr.as_ref() }.kind;
  let raw = ptr.as_ptr();
  match kind {
    Kind::Str => drop(unsafe { Box::from_raw(raw as *mut Str) }),
    Kind::Array => drop(unsafe { Box::from_raw(raw as *mut Array) }),
    Kind::Map => drop(unsafe { Box::from_raw(raw as *mut Map) }),
    Kind::FuncDef => drop(unsafe { Box::from_raw(raw as *mut FuncDef) }),
    Kind::Closure => drop(unsafe { Box::from_raw(raw as *mut Closure) }),
    Kind::Upval => drop(unsafe { Box::from_raw(raw as *mut Upval) }),
    Kind::NativeObj => drop(unsafe { Box::from_raw(raw as *mut NativeObj) }),
  }
}

/// Depth-first marking over an explicit worklist.
pub(crate) struct Marker {
  worklist: Vec<GcRef>,
}

impl Marker {
  pub(crate) fn new() -> Marker {
    Marker {
      worklist: Vec::new(),
    }
  }

  pub(crate) fn mark_value(&mut self, v: Value) {
    if let Some(gc) = v.gc_ref() {
      self.mark(gc);
    }
  }

  pub(crate) fn mark(&mut self, gc: GcRef) {
    let h = gc.header();
    if !h.has(GC_MARK) {
      h.set(GC_MARK);
      self.worklist.push(gc);
    }
  }

  pub(crate) fn trace_all(&mut self) {
    while let Some(gc) = self.worklist.pop() {
      match gc.kind() {
        Kind::Str | Kind::NativeObj => {}
        Kind::Array => {
          let a = unsafe { gc.cast::<Array>() };
          for v in a.borrow_items().iter() {
            self.mark_value(*v);
          }
        }
        Kind::Map => {
          let m = unsafe { gc.cast::<Map>() };
          m.for_each(|k, v| {
            self.mark_value(k);
            self.mark_value(v);
          });
        }
        Kind::Closure => {
          let c = unsafe { gc.cast::<Closure>() };
          self.mark(c.func_def.erase());
          for uv in c.upvals.iter() {
            self.mark(uv.erase());
          }
          if let Some(doc) = c.doc_string.get() {
            self.mark(doc.erase());
          }
        }
        Kind::FuncDef => {
          let d = unsafe { gc.cast::<FuncDef>() };
          if let Some(name) = d.name {
            self.mark(name.erase());
          }
          for v in d.consts.iter() {
            self.mark_value(*v);
          }
        }
        Kind::Upval => {
          let u = unsafe { gc.cast::<Upval>() };
          if let UpvalState::Closed(v) = u.state.get() {
            self.mark_value(v);
          }
        }
      }
    }
  }
}

impl Program {
  /// Run a full mark/sweep collection.
  ///
  /// Roots: the value stack up to the top frame's `stack_top`, every call
  /// frame's closure, the pin stack, PIN-bit objects, host-call value
  /// anchors, the global function and variable tables, and the open-upvalue
  /// list. Synchronous; only ever runs at an allocation point.
  pub fn collect_garbage(&mut self) {
    let mut marker = Marker::new();

    if let Some(frame) = self.vm.frames.last() {
      for v in &self.vm.stack[..frame.stack_top] {
        marker.mark_value(*v);
      }
    }
    for frame in &self.vm.frames {
      if let Some(closure) = frame.closure {
        marker.mark(closure.erase());
      }
    }
    for gc in self.heap.pinned() {
      marker.mark(*gc);
    }
    self.heap.mark_bit_pinned(&mut marker);
    for v in self.heap.c_vals() {
      marker.mark_value(*v);
    }
    for closure in self.global_funcs.values() {
      marker.mark(closure.erase());
    }
    for v in self.global_vars.values() {
      marker.mark_value(*v);
    }
    for uv in &self.vm.open_upvals {
      marker.mark(uv.erase());
    }

    marker.trace_all();
    self.heap.sweep();
    self.heap.reset_alloc_counter();
  }

  pub(crate) fn maybe_collect(&mut self) {
    if self.heap.should_collect() {
      self.collect_garbage();
    }
  }
}
