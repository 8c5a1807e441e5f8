//! Call frames, the register stack and the upvalue protocol.
//!
//! The value stack is one flat `Vec<Value>`; a frame owns the register window
//! `[base, base + n_regs)`. Calls place the return slot at `base - 1` and the
//! arguments at the start of the window. Frames with no closure are native
//! frames: they carry no register window of their own and exist for error
//! reporting and root tracking while a host function runs.

pub(crate) mod dispatch;

use crate::error::{Error, TraceLine};
use crate::object::{Closure, Ref, Upval};
use crate::span::SrcLoc;
use crate::value::Value;
use crate::Program;

pub(crate) const MAX_HOT_LOOPS: usize = 32;
pub(crate) const HOT_LOOP_THRESHOLD: u32 = 100;
const CALL_STACK_RESERVE: usize = 8192;

#[derive(Clone, Copy)]
pub(crate) struct Frame {
  pub closure: Option<Ref<Closure>>,
  pub base: usize,
  pub ret_addr: Option<usize>,
  pub stack_top: usize,
}

/// A backward-jump destination and how often it has been taken.
#[derive(Clone, Copy)]
struct HotLoop {
  func: usize,
  target: usize,
  count: u32,
  hot: bool,
}

/// Bounded table of loop starts. Advisory: it only gates type-guarded fast
/// paths, never observable semantics.
#[derive(Default)]
pub(crate) struct HotLoops {
  entries: Vec<HotLoop>,
}

impl HotLoops {
  /// Record one execution of the backward jump to `(func, target)`.
  pub(crate) fn note(&mut self, func: usize, target: usize) {
    for e in self.entries.iter_mut() {
      if e.func == func && e.target == target {
        e.count += 1;
        if !e.hot && e.count >= HOT_LOOP_THRESHOLD {
          e.hot = true;
        }
        return;
      }
    }
    if self.entries.len() < MAX_HOT_LOOPS {
      self.entries.push(HotLoop {
        func,
        target,
        count: 1,
        hot: false,
      });
    }
  }

  pub(crate) fn is_hot(&self, func: usize, target: usize) -> bool {
    self
      .entries
      .iter()
      .any(|e| e.func == func && e.target == target && e.hot)
  }

  #[cfg(test)]
  pub(crate) fn any_hot(&self) -> bool {
    self.entries.iter().any(|e| e.hot)
  }
}

pub(crate) struct Vm {
  pub stack: Vec<Value>,
  pub frames: Vec<Frame>,
  /// Open upvalues, sorted by strictly descending stack slot.
  pub open_upvals: Vec<Ref<Upval>>,
  /// Shared single-byte strings for `s[i]`; pinned for the program lifetime.
  pub char_cache: [Value; 256],
  pub pc: usize,
  pub last_error_loc: SrcLoc,
  pub last_error_addr: Option<u32>,
  pub hot_loops: HotLoops,
  pub in_hot_loop: bool,
}

impl Vm {
  pub(crate) fn new() -> Vm {
    Vm {
      stack: Vec::new(),
      frames: Vec::with_capacity(CALL_STACK_RESERVE),
      open_upvals: Vec::new(),
      char_cache: [Value::Null; 256],
      pc: 0,
      last_error_loc: SrcLoc::default(),
      last_error_addr: None,
      hot_loops: HotLoops::default(),
      in_hot_loop: false,
    }
  }
}

impl Program {
  /// Grow the value stack to hold at least `size` slots, in 1 KiB-of-slots
  /// steps. Growth may move the backing storage; nothing holds pointers into
  /// it (registers are addressed by index, open upvalues by slot).
  pub(crate) fn ensure_stack_size(&mut self, size: usize) {
    if self.vm.stack.len() >= size {
      return;
    }
    let new_size = (size + 1023) & !1023;
    self.vm.stack.resize(new_size, Value::Null);
  }

  pub(crate) fn top_frame(&self) -> Frame {
    *self.vm.frames.last().expect("call stack underflow")
  }

  /// Push a frame for `closure` with its return slot at `ret_reg`. The
  /// arguments are already in `[ret_reg + 1, ret_reg + 1 + n_args)`; the
  /// remaining registers of the window are nulled.
  pub(crate) fn prepare_call(
    &mut self,
    closure: Ref<Closure>,
    ret_reg: usize,
    n_args: usize,
    ret_addr: Option<usize>,
  ) {
    let n_regs = closure.func_def.n_regs as usize;
    self.ensure_stack_size(ret_reg + 1 + n_regs);

    let base = ret_reg + 1;
    if n_args < n_regs {
      let tail = &mut self.vm.stack[base + n_args..base + n_regs];
      // unrolled for the common small counts
      match tail {
        [a] => *a = Value::Null,
        [a, b] => {
          *a = Value::Null;
          *b = Value::Null;
        }
        [a, b, c] => {
          *a = Value::Null;
          *b = Value::Null;
          *c = Value::Null;
        }
        [a, b, c, d] => {
          *a = Value::Null;
          *b = Value::Null;
          *c = Value::Null;
          *d = Value::Null;
        }
        _ => tail.fill(Value::Null),
      }
    }

    self.vm.frames.push(Frame {
      closure: Some(closure),
      base,
      ret_addr,
      stack_top: base + n_regs,
    });
  }

  /// Push a closure-less frame covering a host call's arguments.
  pub(crate) fn prepare_native_frame(&mut self, ret_reg: usize, n_args: usize) {
    self.ensure_stack_size(ret_reg + 1 + n_args);
    self.vm.frames.push(Frame {
      closure: None,
      base: ret_reg + 1,
      ret_addr: None,
      stack_top: ret_reg + 1 + n_args,
    });
  }

  /// Find the open upvalue for `slot`, or splice a fresh one into the list,
  /// keeping it sorted by descending slot. Every stack slot has at most one
  /// open upvalue, shared by all closures that capture it.
  pub(crate) fn find_or_add_upval(&mut self, slot: u32) -> Ref<Upval> {
    let mut insert_at = self.vm.open_upvals.len();
    for (i, uv) in self.vm.open_upvals.iter().enumerate() {
      match uv.slot() {
        Some(s) if s > slot => continue,
        Some(s) if s == slot => return *uv,
        _ => {
          insert_at = i;
          break;
        }
      }
    }
    let uv = self.alloc_upval(slot);
    self.vm.open_upvals.insert(insert_at, uv);
    uv
  }

  /// Close the topmost open upvalue, unconditionally.
  pub(crate) fn close_topmost_upval(&mut self) {
    if self.vm.open_upvals.is_empty() {
      return;
    }
    let uv = self.vm.open_upvals.remove(0);
    uv.close(&self.vm.stack);
  }

  /// Close every open upvalue pointing into `[base, top)`. The list is
  /// address-ordered, so closing stops at the first upvalue outside the
  /// frame.
  pub(crate) fn close_frame_upvals(&mut self, base: usize, top: usize) {
    while let Some(uv) = self.vm.open_upvals.first().copied() {
      let Some(slot) = uv.slot() else { break };
      let slot = slot as usize;
      if slot < base || slot >= top {
        break;
      }
      uv.close(&self.vm.stack);
      self.vm.open_upvals.remove(0);
    }
  }

  /// Stamp `e` with the failing location and a traceback, once. `pc` has
  /// already advanced past the faulting instruction. Errors crossing a host
  /// boundary keep the deeper context they were stamped with.
  pub(crate) fn attach_error_context(&mut self, mut e: Error, pc: usize) -> Error {
    if e.loc().is_some() {
      return e;
    }

    let scripted = self
      .vm
      .frames
      .iter()
      .rev()
      .find_map(|f| f.closure.map(|c| c.func_def));
    if let Some(func) = scripted {
      let addr = pc.saturating_sub(1) as u32;
      let loc = func.source_map.lookup(addr);
      self.vm.last_error_addr = Some(addr);
      self.vm.last_error_loc = loc;
      e.set_loc(self.files.name(loc.file_id), loc);
    } else {
      self.vm.last_error_addr = None;
    }

    e.set_trace(self.build_traceback(pc));
    e
  }

  /// Walk the call stack oldest to newest. The topmost scripted frame shows
  /// the error line; outer frames show the call instruction that entered the
  /// next frame (`ret_addr - 1`).
  fn build_traceback(&self, pc: usize) -> Vec<TraceLine> {
    let frames = &self.vm.frames;
    let mut trace = Vec::with_capacity(frames.len());
    for (i, frame) in frames.iter().enumerate() {
      let Some(closure) = frame.closure else {
        trace.push(TraceLine::Native);
        continue;
      };
      let func = closure.func_def;
      let loc = if i + 1 == frames.len() {
        func.source_map.lookup(pc.saturating_sub(1) as u32)
      } else {
        match frames[i + 1].ret_addr {
          Some(ret_addr) if ret_addr >= 1 => func.source_map.lookup((ret_addr - 1) as u32),
          _ => func.creation_loc,
        }
      };
      trace.push(TraceLine::Script {
        file: self.files.name(loc.file_id).to_string(),
        line: loc.line,
        func: func.name_string(),
      });
    }
    trace
  }
}
