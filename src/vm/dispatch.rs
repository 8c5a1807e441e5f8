//! The instruction dispatch loop.
//!
//! One 32-bit instruction is decoded and executed per step. Dispatch is a
//! `match`; a computed-goto scheme would be observably identical. The loop is
//! single-threaded and non-suspending except for `CALL` into a host function,
//! which may re-enter the VM.
//!
//! Typed opcode variants (`ADDI`, `CMP_GTF`, `GETEL_ARRAY`, ...) are
//! speculative hints from the compiler: the arithmetic ones fall through to
//! their generic opcode when the type guard fails, the typed compares raise
//! a type error, and the container hints fall through to the generic access
//! path.

use crate::bytecode::{Opcode, MAX_FUNC_REGS, RK_CONST_BASE};
use crate::error::Result;
use crate::object::{FuncDef, UpvalKind};
use crate::value::{floats_equal, format_float, ints_equal, values_equal, NativeFn, Value};
use crate::Program;

impl Program {
  /// Run from `vm.pc` in the topmost frame until it returns or errors.
  pub(crate) fn run(&mut self) -> Result<()> {
    let mut pc = self.vm.pc;
    let result = self.dispatch(&mut pc);
    self.vm.pc = pc;
    result.map_err(|e| self.attach_error_context(e, pc))
  }

  fn dispatch(&mut self, pc: &mut usize) -> Result<()> {
    'frame: loop {
      let frame = self.top_frame();
      let closure = frame.closure.expect("dispatch entered on a native frame");
      let func = closure.func_def;
      let base = frame.base;

      loop {
        let instr = match func.code.get(*pc) {
          Some(i) => *i,
          None => fail!(Structural, "program counter out of bounds"),
        };
        *pc += 1;
        let Some(op) = instr.opcode() else {
          fail!(Structural, "illegal instruction");
        };
        let (a, b, c, u, s) = (instr.ra(), instr.rb(), instr.rc(), instr.ru(), instr.rs());

        match op {
          Opcode::Ldc => {
            let v = match func.consts.get(u as usize) {
              Some(v) => *v,
              None => fail!(Structural, "invalid constant index"),
            };
            self.set_reg(base, a, v);
          }

          Opcode::LdNull => {
            self.set_reg(base, a, Value::Null);
          }

          Opcode::Mov => {
            let v = self.rk(base, &func.consts, b)?;
            self.set_reg(base, a, v);
          }

          Opcode::Ret => {
            let ret = if a != 0 {
              self.rk(base, &func.consts, b)?
            } else {
              Value::Null
            };
            self.vm.stack[base - 1] = ret;
            self.close_frame_upvals(base, frame.stack_top);

            let ret_addr = frame.ret_addr;
            self.vm.frames.pop();

            let Some(addr) = ret_addr else {
              return Ok(());
            };
            match self.vm.frames.last() {
              Some(f) if f.closure.is_some() => {
                *pc = addr;
                continue 'frame;
              }
              _ => return Ok(()),
            }
          }

          Opcode::Jmp => {
            let mut close = a;
            while close > 0 && !self.vm.open_upvals.is_empty() {
              self.close_topmost_upval();
              close -= 1;
            }

            let target = *pc as i64 + s as i64;
            if target < 0 {
              fail!(Structural, "jump out of bounds");
            }
            let target = target as usize;
            if s < 0 {
              // backward jumps are loops; track them
              self.vm.hot_loops.note(func.addr(), target);
              *pc = target;
              self.vm.in_hot_loop = self.vm.hot_loops.is_hot(func.addr(), target);
            } else {
              *pc = target;
              self.vm.in_hot_loop = false;
            }
          }

          Opcode::Test => {
            let v = self.rk(base, &func.consts, b)?;
            if (v.is_truthy() as u32) ^ a != 0 {
              *pc += 1;
            } else {
              // the next instruction holds the signed jump offset
              let island = match func.code.get(*pc) {
                Some(i) => *i,
                None => fail!(Structural, "program counter out of bounds"),
              };
              let target = *pc as i64 + island.rs() as i64 + 1;
              if target < 0 {
                fail!(Structural, "jump out of bounds");
              }
              *pc = target as usize;
            }
          }

          Opcode::CmpEq => {
            let l = self.rk(base, &func.consts, b)?;
            let r = self.rk(base, &func.consts, c)?;
            cmp_skip(pc, values_equal(l, r), a);
          }

          Opcode::CmpEqI => {
            let l = self.rk(base, &func.consts, b)?;
            let r = self.rk(base, &func.consts, c)?;
            cmp_skip(pc, ints_equal(l, r), a);
          }

          Opcode::CmpEqF => {
            let l = self.rk(base, &func.consts, b)?;
            let r = self.rk(base, &func.consts, c)?;
            cmp_skip(pc, floats_equal(l, r), a);
          }

          Opcode::CmpLt => self.cmp_generic(pc, base, &func, a, b, c, |x, y| x < y, |x, y| x < y)?,
          Opcode::CmpLe => {
            self.cmp_generic(pc, base, &func, a, b, c, |x, y| x <= y, |x, y| x <= y)?
          }
          Opcode::CmpGt => self.cmp_generic(pc, base, &func, a, b, c, |x, y| x > y, |x, y| x > y)?,
          Opcode::CmpGe => {
            self.cmp_generic(pc, base, &func, a, b, c, |x, y| x >= y, |x, y| x >= y)?
          }

          Opcode::CmpLtI => self.cmp_int(pc, base, &func, a, b, c, "<", |x, y| x < y)?,
          Opcode::CmpLeI => self.cmp_int(pc, base, &func, a, b, c, "<=", |x, y| x <= y)?,
          Opcode::CmpGtI => self.cmp_int(pc, base, &func, a, b, c, ">", |x, y| x > y)?,
          Opcode::CmpGeI => self.cmp_int(pc, base, &func, a, b, c, ">=", |x, y| x >= y)?,

          Opcode::CmpLtF => self.cmp_float(pc, base, &func, a, b, c, "<", |x, y| x < y)?,
          Opcode::CmpLeF => self.cmp_float(pc, base, &func, a, b, c, "<=", |x, y| x <= y)?,
          Opcode::CmpGtF => self.cmp_float(pc, base, &func, a, b, c, ">", |x, y| x > y)?,
          Opcode::CmpGeF => self.cmp_float(pc, base, &func, a, b, c, ">=", |x, y| x >= y)?,

          Opcode::Add => {
            let l = self.rk(base, &func.consts, b)?;
            let r = self.rk(base, &func.consts, c)?;
            let v = self.add_values(l, r)?;
            self.set_reg(base, a, v);
          }

          Opcode::AddI => {
            let l = self.rk(base, &func.consts, b)?;
            let r = self.rk(base, &func.consts, c)?;
            let v = match (l, r) {
              (Value::Int(x), Value::Int(y)) => Value::Int(x.wrapping_add(y)),
              _ => self.add_values(l, r)?,
            };
            self.set_reg(base, a, v);
          }

          Opcode::AddF => {
            let l = self.rk(base, &func.consts, b)?;
            let r = self.rk(base, &func.consts, c)?;
            let v = match (l, r) {
              (Value::Float(x), Value::Float(y)) => Value::Float(x + y),
              _ => self.add_values(l, r)?,
            };
            self.set_reg(base, a, v);
          }

          Opcode::Sub => self.arith_binop(base, &func, a, b, c, i64::wrapping_sub, |x, y| x - y)?,
          Opcode::Mul => self.arith_binop(base, &func, a, b, c, i64::wrapping_mul, |x, y| x * y)?,

          Opcode::SubI => {
            self.arith_typed_int(base, &func, a, b, c, i64::wrapping_sub, |x, y| x - y)?
          }
          Opcode::MulI => {
            self.arith_typed_int(base, &func, a, b, c, i64::wrapping_mul, |x, y| x * y)?
          }
          Opcode::SubF => {
            self.arith_typed_float(base, &func, a, b, c, i64::wrapping_sub, |x, y| x - y)?
          }
          Opcode::MulF => {
            self.arith_typed_float(base, &func, a, b, c, i64::wrapping_mul, |x, y| x * y)?
          }

          Opcode::Div => {
            let l = self.rk(base, &func.consts, b)?;
            let r = self.rk(base, &func.consts, c)?;
            let v = div_values(l, r)?;
            self.set_reg(base, a, v);
          }

          Opcode::DivI => {
            let l = self.rk(base, &func.consts, b)?;
            let r = self.rk(base, &func.consts, c)?;
            let v = match (l, r) {
              (Value::Int(x), Value::Int(y)) => {
                if y == 0 {
                  fail!(Arithmetic, "division by zero");
                }
                Value::Int(x.wrapping_div(y))
              }
              _ => div_values(l, r)?,
            };
            self.set_reg(base, a, v);
          }

          Opcode::DivF => {
            let l = self.rk(base, &func.consts, b)?;
            let r = self.rk(base, &func.consts, c)?;
            let v = match (l, r) {
              (Value::Float(x), Value::Float(y)) => {
                if y == 0.0 {
                  fail!(Arithmetic, "division by zero");
                }
                Value::Float(x / y)
              }
              _ => div_values(l, r)?,
            };
            self.set_reg(base, a, v);
          }

          Opcode::Mod => {
            let l = self.rk(base, &func.consts, b)?;
            let r = self.rk(base, &func.consts, c)?;
            let (Value::Int(x), Value::Int(y)) = (l, r) else {
              fail!(Type, "'mod' expects integers");
            };
            if y == 0 {
              fail!(Arithmetic, "division by zero");
            }
            self.set_reg(base, a, Value::Int(x.wrapping_rem(y)));
          }

          Opcode::Neg => {
            let v = self.rk(base, &func.consts, b)?;
            let v = match v {
              Value::Int(x) => Value::Int(x.wrapping_neg()),
              Value::Float(x) => Value::Float(-x),
              _ => fail!(Type, "arithmetic on non-numeric values"),
            };
            self.set_reg(base, a, v);
          }

          Opcode::Not => {
            let v = self.rk(base, &func.consts, b)?;
            self.set_reg(base, a, Value::Bool(!v.is_truthy()));
          }

          Opcode::Inc => {
            let v = self.rk(base, &func.consts, b)?;
            let v = match v {
              Value::Int(x) => Value::Int(x.wrapping_add(1)),
              Value::Float(x) => Value::Float(x + 1.0),
              _ => fail!(Type, "increment on non-numeric value"),
            };
            self.set_reg(base, a, v);
          }

          Opcode::Dec => {
            let v = self.rk(base, &func.consts, b)?;
            let v = match v {
              Value::Int(x) => Value::Int(x.wrapping_sub(1)),
              Value::Float(x) => Value::Float(x - 1.0),
              _ => fail!(Type, "decrement on non-numeric value"),
            };
            self.set_reg(base, a, v);
          }

          Opcode::Band => self.bitwise_binop(base, &func, a, b, c, |x, y| x & y)?,
          Opcode::Bor => self.bitwise_binop(base, &func, a, b, c, |x, y| x | y)?,
          Opcode::Bxor => self.bitwise_binop(base, &func, a, b, c, |x, y| x ^ y)?,
          Opcode::Lshift => self.bitwise_binop(base, &func, a, b, c, java_shl)?,
          Opcode::Rshift => self.bitwise_binop(base, &func, a, b, c, java_sar)?,

          Opcode::Bnot => {
            let v = self.rk(base, &func.consts, b)?;
            let Value::Int(x) = v else {
              fail!(Type, "bitwise 'not' expects integer");
            };
            self.set_reg(base, a, Value::Int(!x));
          }

          Opcode::GetEl => {
            let container = self.rk(base, &func.consts, b)?;
            let index = self.rk(base, &func.consts, c)?;
            let v = self.get_element(container, index)?;
            self.set_reg(base, a, v);
          }

          Opcode::GetElArray => {
            let container = self.rk(base, &func.consts, b)?;
            let index = self.rk(base, &func.consts, c)?;
            let v = match (container, index) {
              (Value::Array(arr), Value::Int(i)) => {
                if i < 0 {
                  fail!(Range, "invalid array access (index is negative)");
                }
                arr.get(i as usize).unwrap_or(Value::Null)
              }
              _ => self.get_element(container, index)?,
            };
            self.set_reg(base, a, v);
          }

          Opcode::GetElMap => {
            let container = self.rk(base, &func.consts, b)?;
            let index = self.rk(base, &func.consts, c)?;
            let v = match container {
              Value::Map(m) => m.get(index).unwrap_or(Value::Null),
              _ => self.get_element(container, index)?,
            };
            self.set_reg(base, a, v);
          }

          Opcode::SetEl => {
            let target = self.reg(base, a);
            let key = self.rk(base, &func.consts, b)?;
            let val = self.rk(base, &func.consts, c)?;
            match target {
              Value::Array(arr) => {
                let idx = assert_index(key, "array")?;
                arr.set_grow(idx, val);
              }
              Value::Map(m) => m.insert(key, val)?,
              _ => fail!(Structural, "invalid element access (non-container object)"),
            }
          }

          Opcode::NewArray => {
            let n = u as usize;
            let arr = self.new_array();
            if n > 0 {
              let start = base + a as usize + 1;
              let Some(items) = self.vm.stack.get(start..start + n) else {
                fail!(Structural, "invalid register range");
              };
              arr.extend_from(items);
            } else {
              arr.reserve_total(8);
            }
            self.set_reg(base, a, Value::Array(arr));
          }

          Opcode::NewMap => {
            let pairs = u as usize / 2;
            let map = self.new_map();
            if pairs > 0 {
              map.reserve_len(pairs as u32);
              for i in 0..pairs {
                let k = self.reg(base, a + 1 + 2 * i as u32);
                let v = self.reg(base, a + 2 + 2 * i as u32);
                map.insert(k, v)?;
              }
            } else {
              map.reserve_len(8);
            }
            self.set_reg(base, a, Value::Map(map));
          }

          Opcode::Append => {
            let val = self.rk(base, &func.consts, b)?;
            let target = self.rk(base, &func.consts, c)?;
            let Value::Array(arr) = target else {
              fail!(Type, "append(): argument 1 must be array");
            };
            arr.push(val);
            self.set_reg(base, a, target);
          }

          Opcode::Len => {
            let v = self.rk(base, &func.consts, b)?;
            let len = match v {
              Value::Array(arr) => arr.len(),
              Value::Map(m) => m.len(),
              Value::Str(s) => s.len(),
              _ => fail!(Type, "len(): argument must be array/map/string"),
            };
            self.set_reg(base, a, Value::Int(len as i64));
          }

          Opcode::Closure => {
            let v = self.rk(base, &func.consts, b)?;
            let Value::FuncDef(target) = v else {
              fail!(Structural, "invalid value for closure (not a function definition)");
            };
            let mut upvals = Vec::with_capacity(target.upvals.len());
            for def in target.upvals.iter() {
              let uv = match def.kind {
                UpvalKind::Upval => match closure.upvals.get(def.num as usize) {
                  Some(uv) => *uv,
                  None => fail!(Structural, "invalid upvalue index"),
                },
                UpvalKind::Reg => self.find_or_add_upval((base + def.num as usize) as u32),
              };
              upvals.push(uv);
            }
            // every upvalue is rooted (open list or parent closure) and the
            // definition is rooted through the operand, so the final
            // allocation is the only collection point
            let created = self.alloc_closure(target, upvals);
            self.set_reg(base, a, Value::Closure(created));
          }

          Opcode::GetUpval => {
            let Some(uv) = closure.upvals.get(b as usize) else {
              fail!(Structural, "invalid upvalue index");
            };
            let v = uv.get(&self.vm.stack);
            self.set_reg(base, a, v);
          }

          Opcode::SetUpval => {
            let v = self.rk(base, &func.consts, b)?;
            let Some(uv) = closure.upvals.get(a as usize) else {
              fail!(Structural, "invalid upvalue index");
            };
            uv.set(&mut self.vm.stack, v);
          }

          Opcode::GetGlobal => {
            let name = self.global_name(&func, u)?;
            let v = match self.global_vars.get(name.as_str()) {
              Some(v) => *v,
              None => match self.global_funcs.get(name.as_str()) {
                Some(c) => Value::Closure(*c),
                None => fail!(Structural, "undefined global '{name}'"),
              },
            };
            self.set_reg(base, a, v);
          }

          Opcode::SetGlobal => {
            let name = self.global_name(&func, u)?;
            let v = self.reg(base, a);
            self.global_vars.insert(name, v);
          }

          Opcode::Call => {
            let ret_reg = base + a as usize;
            let callee = self.vm.stack[ret_reg];
            match callee {
              Value::Closure(target) => {
                self.prepare_call(target, ret_reg, b as usize, Some(*pc));
                *pc = 0;
                continue 'frame;
              }
              Value::NativeFn(f) => {
                self.call_native(f, ret_reg, b as usize)?;
              }
              _ => fail!(Structural, "call to non-function value"),
            }
          }
        }
      }
    }
  }

  #[inline]
  fn reg(&self, base: usize, i: u32) -> Value {
    self.vm.stack[base + i as usize]
  }

  #[inline]
  fn set_reg(&mut self, base: usize, i: u32, v: Value) {
    self.vm.stack[base + i as usize] = v;
  }

  /// Operand resolution: `0..=255` is a register, `257..=511` a constant.
  #[inline]
  fn rk(&self, base: usize, consts: &[Value], i: u32) -> Result<Value> {
    if i < MAX_FUNC_REGS {
      return Ok(self.vm.stack[base + i as usize]);
    }
    if i >= RK_CONST_BASE {
      return match consts.get((i - RK_CONST_BASE) as usize) {
        Some(v) => Ok(*v),
        None => Err(error!(Structural, "invalid constant index")),
      };
    }
    Err(error!(Structural, "invalid operand encoding"))
  }

  #[allow(clippy::too_many_arguments)]
  fn arith_binop(
    &mut self,
    base: usize,
    func: &FuncDef,
    a: u32,
    b: u32,
    c: u32,
    fi: fn(i64, i64) -> i64,
    ff: fn(f64, f64) -> f64,
  ) -> Result<()> {
    let l = self.rk(base, &func.consts, b)?;
    let r = self.rk(base, &func.consts, c)?;
    let Some(v) = num_binop(l, r, fi, ff) else {
      fail!(Type, "arithmetic on non-numeric values");
    };
    self.set_reg(base, a, v);
    Ok(())
  }

  #[allow(clippy::too_many_arguments)]
  fn arith_typed_int(
    &mut self,
    base: usize,
    func: &FuncDef,
    a: u32,
    b: u32,
    c: u32,
    fi: fn(i64, i64) -> i64,
    ff: fn(f64, f64) -> f64,
  ) -> Result<()> {
    let l = self.rk(base, &func.consts, b)?;
    let r = self.rk(base, &func.consts, c)?;
    if let (Value::Int(x), Value::Int(y)) = (l, r) {
      self.set_reg(base, a, Value::Int(fi(x, y)));
      return Ok(());
    }
    let Some(v) = num_binop(l, r, fi, ff) else {
      fail!(Type, "arithmetic on non-numeric values");
    };
    self.set_reg(base, a, v);
    Ok(())
  }

  #[allow(clippy::too_many_arguments)]
  fn arith_typed_float(
    &mut self,
    base: usize,
    func: &FuncDef,
    a: u32,
    b: u32,
    c: u32,
    fi: fn(i64, i64) -> i64,
    ff: fn(f64, f64) -> f64,
  ) -> Result<()> {
    let l = self.rk(base, &func.consts, b)?;
    let r = self.rk(base, &func.consts, c)?;
    if let (Value::Float(x), Value::Float(y)) = (l, r) {
      self.set_reg(base, a, Value::Float(ff(x, y)));
      return Ok(());
    }
    let Some(v) = num_binop(l, r, fi, ff) else {
      fail!(Type, "arithmetic on non-numeric values");
    };
    self.set_reg(base, a, v);
    Ok(())
  }

  fn bitwise_binop(
    &mut self,
    base: usize,
    func: &FuncDef,
    a: u32,
    b: u32,
    c: u32,
    f: fn(i64, i64) -> i64,
  ) -> Result<()> {
    let l = self.rk(base, &func.consts, b)?;
    let r = self.rk(base, &func.consts, c)?;
    let (Value::Int(x), Value::Int(y)) = (l, r) else {
      fail!(Type, "bitwise expects integers");
    };
    self.set_reg(base, a, Value::Int(f(x, y)));
    Ok(())
  }

  #[allow(clippy::too_many_arguments)]
  fn cmp_generic(
    &mut self,
    pc: &mut usize,
    base: usize,
    func: &FuncDef,
    a: u32,
    b: u32,
    c: u32,
    ci: fn(i64, i64) -> bool,
    cf: fn(f64, f64) -> bool,
  ) -> Result<()> {
    let l = self.rk(base, &func.consts, b)?;
    let r = self.rk(base, &func.consts, c)?;
    let Some(result) = num_cmp(l, r, ci, cf) else {
      fail!(Type, "comparison on non-numeric values");
    };
    cmp_skip(pc, result, a);
    Ok(())
  }

  #[allow(clippy::too_many_arguments)]
  fn cmp_int(
    &mut self,
    pc: &mut usize,
    base: usize,
    func: &FuncDef,
    a: u32,
    b: u32,
    c: u32,
    sym: &str,
    cmp: fn(i64, i64) -> bool,
  ) -> Result<()> {
    let l = self.rk(base, &func.consts, b)?;
    let r = self.rk(base, &func.consts, c)?;
    let (Value::Int(x), Value::Int(y)) = (l, r) else {
      fail!(Type, "using '{sym}' with non-integer values");
    };
    cmp_skip(pc, cmp(x, y), a);
    Ok(())
  }

  #[allow(clippy::too_many_arguments)]
  fn cmp_float(
    &mut self,
    pc: &mut usize,
    base: usize,
    func: &FuncDef,
    a: u32,
    b: u32,
    c: u32,
    sym: &str,
    cmp: fn(f64, f64) -> bool,
  ) -> Result<()> {
    let l = self.rk(base, &func.consts, b)?;
    let r = self.rk(base, &func.consts, c)?;
    let (Value::Float(x), Value::Float(y)) = (l, r) else {
      fail!(Type, "using '{sym}' with non-float values");
    };
    cmp_skip(pc, cmp(x, y), a);
    Ok(())
  }

  /// `ADD` semantics: numeric addition with coercion, or string
  /// concatenation when either side is a string.
  fn add_values(&mut self, l: Value, r: Value) -> Result<Value> {
    if let Some(v) = num_binop(l, r, i64::wrapping_add, |x, y| x + y) {
      return Ok(v);
    }
    if let Value::Str(s) = l {
      let mut buf = Vec::with_capacity(s.len() + 16);
      buf.extend_from_slice(s.as_bytes());
      if !append_scalar(&mut buf, r) {
        fail!(Type, "string addition with unsupported type {}", r.type_name());
      }
      return Ok(Value::Str(self.new_str_bytes(&buf)));
    }
    if let Value::Str(s) = r {
      let mut buf = Vec::with_capacity(s.len() + 16);
      if !append_scalar(&mut buf, l) {
        fail!(
          Type,
          "{} addition with unsupported type {}",
          l.type_name(),
          r.type_name()
        );
      }
      buf.extend_from_slice(s.as_bytes());
      return Ok(Value::Str(self.new_str_bytes(&buf)));
    }
    fail!(Type, "can't add {} and {}", l.type_name(), r.type_name());
  }

  /// `GETEL` semantics: array read (out of range yields null), map lookup
  /// (missing key yields null), string byte index (served from the char
  /// cache). While the current loop is hot, the array-int-in-bounds path is
  /// checked first.
  fn get_element(&mut self, container: Value, index: Value) -> Result<Value> {
    if self.vm.in_hot_loop {
      if let (Value::Array(arr), Value::Int(i)) = (container, index) {
        if i >= 0 {
          if let Some(v) = arr.get(i as usize) {
            return Ok(v);
          }
        }
      }
      // guard failed; take the generic path
    }
    match container {
      Value::Array(arr) => {
        let idx = assert_index(index, "array")?;
        Ok(arr.get(idx).unwrap_or(Value::Null))
      }
      Value::Map(m) => Ok(m.get(index).unwrap_or(Value::Null)),
      Value::Str(s) => {
        let idx = assert_index(index, "string")?;
        match s.as_bytes().get(idx) {
          Some(&byte) => Ok(self.vm.char_cache[byte as usize]),
          None => Ok(Value::Null),
        }
      }
      _ => fail!(Structural, "invalid element access (non-container object)"),
    }
  }

  fn global_name(&self, func: &FuncDef, u: u32) -> Result<String> {
    let v = match func.consts.get(u as usize) {
      Some(v) => *v,
      None => fail!(Structural, "invalid constant index"),
    };
    let Value::Str(name) = v else {
      fail!(Structural, "global name must be a string");
    };
    Ok(name.to_str_lossy().into_owned())
  }

  /// Call a host function: push a native frame covering the arguments, hand
  /// over copies of them, and write the result into the return register. The
  /// pin stack and host-value anchors are restored to their depths from
  /// before the call.
  fn call_native(&mut self, f: NativeFn, ret_reg: usize, n_args: usize) -> Result<()> {
    self.prepare_native_frame(ret_reg, n_args);
    let pin_state = self.heap.pin_state();
    let c_vals_state = self.heap.c_vals_state();

    let args: Vec<Value> = self.vm.stack[ret_reg + 1..ret_reg + 1 + n_args].to_vec();
    let result = f(self, &args);

    self.vm.frames.pop();
    self.heap.restore_pin_state(pin_state);
    self.heap.truncate_c_vals(c_vals_state);

    self.vm.stack[ret_reg] = result?;
    Ok(())
  }
}

#[inline]
fn cmp_skip(pc: &mut usize, result: bool, a: u32) {
  if (result as u32) ^ a != 0 {
    *pc += 1;
  }
}

#[inline]
fn num_binop(l: Value, r: Value, fi: fn(i64, i64) -> i64, ff: fn(f64, f64) -> f64) -> Option<Value> {
  match (l, r) {
    (Value::Int(x), Value::Int(y)) => Some(Value::Int(fi(x, y))),
    (Value::Float(x), Value::Float(y)) => Some(Value::Float(ff(x, y))),
    _ => {
      let x = l.to_f64()?;
      let y = r.to_f64()?;
      Some(Value::Float(ff(x, y)))
    }
  }
}

#[inline]
fn num_cmp(l: Value, r: Value, ci: fn(i64, i64) -> bool, cf: fn(f64, f64) -> bool) -> Option<bool> {
  match (l, r) {
    (Value::Int(x), Value::Int(y)) => Some(ci(x, y)),
    (Value::Float(x), Value::Float(y)) => Some(cf(x, y)),
    _ => {
      let x = l.to_f64()?;
      let y = r.to_f64()?;
      Some(cf(x, y))
    }
  }
}

fn div_values(l: Value, r: Value) -> Result<Value> {
  let (Some(x), Some(y)) = (l.to_f64(), r.to_f64()) else {
    fail!(Type, "arithmetic on non-numeric values");
  };
  if y == 0.0 {
    fail!(Arithmetic, "division by zero");
  }
  Ok(Value::Float(x / y))
}

fn assert_index(v: Value, what: &str) -> Result<usize> {
  let Value::Int(n) = v else {
    fail!(Range, "invalid {what} access (non-integer index)");
  };
  if n < 0 {
    fail!(Range, "invalid {what} access (index is negative)");
  }
  Ok(n as usize)
}

/// Scalar-to-text for string concatenation. Integers print in decimal,
/// floats shortest-roundtrip, booleans as `true`/`false`.
fn append_scalar(buf: &mut Vec<u8>, v: Value) -> bool {
  match v {
    Value::Str(s) => buf.extend_from_slice(s.as_bytes()),
    Value::Int(i) => buf.extend_from_slice(i.to_string().as_bytes()),
    Value::Float(x) => buf.extend_from_slice(format_float(x).as_bytes()),
    Value::Bool(b) => buf.extend_from_slice(if b { b"true" } else { b"false" }),
    _ => return false,
  }
  true
}

fn java_shl(a: i64, s: i64) -> i64 {
  ((a as u64) << ((s as u64) & 63)) as i64
}

fn java_sar(a: i64, s: i64) -> i64 {
  a >> ((s as u64) & 63)
}
