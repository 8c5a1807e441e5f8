//! Execution core for a small dynamically-typed scripting language.
//!
//! A register-based bytecode VM together with its value representation,
//! mark/sweep heap, closure/upvalue machinery and container engines. The
//! lexer, parser and compiler are external collaborators: this crate consumes
//! compiled function definitions (constants + 32-bit packed instructions +
//! upvalue descriptors) and runs them.
//!
//! ```
//! use karasu::bytecode::{builder::BytecodeBuilder, Instr, Opcode};
//! use karasu::{Program, SrcLoc, Value};
//!
//! let mut prog = Program::new();
//! let mut b = BytecodeBuilder::new();
//! b.emit(Instr::abc(Opcode::Add, 1, 0, 258)); // r1 = r0 + k1
//! b.emit(Instr::abc(Opcode::Ret, 1, 1, 0));
//! let (code, map) = b.finish();
//! let def = prog.new_func_def(
//!   Some("add_one"),
//!   1,
//!   2,
//!   code,
//!   vec![Value::Null, Value::Int(1)],
//!   vec![],
//!   map,
//!   SrcLoc::default(),
//! );
//! let f = prog.new_closure(def).unwrap();
//! prog.add_global_func(f).unwrap();
//! let r = prog.call_function("add_one", &[Value::Int(41)]).unwrap();
//! assert!(matches!(r, Value::Int(42)));
//! ```

#[macro_use]
mod macros;

pub mod bytecode;
mod error;
mod heap;
mod object;
mod program;
mod span;
mod util;
mod value;
mod vm;

pub use error::{Error, ErrorKind, Result, TraceLine};
pub use heap::Heap;
pub use object::{
  Array, Closure, FuncDef, Map, NativeFn, NativeObj, Object, Ref, Str, Upval, UpvalDef, UpvalKind,
};
pub use program::{
  arg_int, arg_number, arg_str, as_i64, opt_boolean, opt_integer, opt_native_obj, opt_number,
  opt_str, Program,
};
pub use span::{FileTable, SourceMap, SrcLoc};
pub use value::{values_equal, Value};

#[cfg(test)]
mod tests;
