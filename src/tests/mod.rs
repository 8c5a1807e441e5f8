//! End-to-end scenarios: function definitions are assembled by hand, the way
//! the compiler would emit them, and run through the public `Program` API.

mod containers;

use crate::bytecode::builder::BytecodeBuilder;
use crate::bytecode::{Instr, Opcode};
use crate::object::{FuncDef, Ref, UpvalDef};
use crate::span::SrcLoc;
use crate::value::Value;
use crate::Program;

/// Constant-pool operand for three-address instructions: `k(i)` names `K[i]`.
fn k(i: u32) -> u32 {
  257 + i
}

fn define(
  prog: &mut Program,
  name: &str,
  n_params: u32,
  n_regs: u32,
  consts: Vec<Value>,
  upvals: Vec<UpvalDef>,
  build: impl FnOnce(&mut BytecodeBuilder),
) -> Ref<FuncDef> {
  let mut b = BytecodeBuilder::new();
  build(&mut b);
  let (code, map) = b.finish();
  prog.new_func_def(
    Some(name),
    n_params,
    n_regs,
    code,
    consts,
    upvals,
    map,
    SrcLoc::default(),
  )
}

fn register(prog: &mut Program, def: Ref<FuncDef>) {
  let closure = prog.new_closure(def).unwrap();
  prog.add_global_func(closure).unwrap();
}

fn expect_int(v: Value) -> i64 {
  match v {
    Value::Int(i) => i,
    other => panic!("expected integer, got {other:?}"),
  }
}

fn expect_float(v: Value) -> f64 {
  match v {
    Value::Float(x) => x,
    other => panic!("expected float, got {other:?}"),
  }
}

fn expect_str(v: Value) -> String {
  match v {
    Value::Str(s) => s.to_str_lossy().into_owned(),
    other => panic!("expected string, got {other:?}"),
  }
}
