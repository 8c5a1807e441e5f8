use super::*;
use crate::ErrorKind;

#[test]
fn map_literal_aliases_int_and_float_keys() {
  let mut prog = Program::new();
  let a = prog.new_str("a");
  let b_ = prog.new_str("b");
  let def = define(
    &mut prog,
    "build",
    0,
    5,
    vec![
      Value::Int(1),
      Value::Str(a),
      Value::Float(1.0),
      Value::Str(b_),
    ],
    vec![],
    |b| {
      b.emit(Instr::au(Opcode::Ldc, 1, 0)); // key 1
      b.emit(Instr::au(Opcode::Ldc, 2, 1)); // "a"
      b.emit(Instr::au(Opcode::Ldc, 3, 2)); // key 1.0
      b.emit(Instr::au(Opcode::Ldc, 4, 3)); // "b"
      b.emit(Instr::au(Opcode::NewMap, 0, 4));
      b.emit(Instr::abc(Opcode::Ret, 1, 0, 0));
    },
  );
  register(&mut prog, def);

  let r = prog.call_function("build", &[]).unwrap();
  let map = r.as_map().unwrap();
  assert_eq!(map.len(), 1);
  assert_eq!(expect_str(map.get(Value::Int(1)).unwrap()), "b");
  assert_eq!(expect_str(map.get(Value::Float(1.0)).unwrap()), "b");
}

#[test]
fn array_store_grows_with_nulls() {
  let mut prog = Program::new();
  let def = define(
    &mut prog,
    "auto_grow",
    0,
    4,
    vec![
      Value::Int(1),
      Value::Int(2),
      Value::Int(3),
      Value::Int(7),
      Value::Int(42),
    ],
    vec![],
    |b| {
      b.emit(Instr::au(Opcode::Ldc, 1, 0));
      b.emit(Instr::au(Opcode::Ldc, 2, 1));
      b.emit(Instr::au(Opcode::Ldc, 3, 2));
      b.emit(Instr::au(Opcode::NewArray, 0, 3)); // [1, 2, 3]
      b.emit(Instr::abc(Opcode::SetEl, 0, k(3), k(4))); // a[7] = 42
      b.emit(Instr::abc(Opcode::Ret, 1, 0, 0));
    },
  );
  register(&mut prog, def);

  let r = prog.call_function("auto_grow", &[]).unwrap();
  let arr = r.as_array().unwrap();
  assert_eq!(arr.len(), 8);
  assert_eq!(arr.get(0).map(expect_int), Some(1));
  assert_eq!(arr.get(2).map(expect_int), Some(3));
  for i in 3..7 {
    assert!(matches!(arr.get(i), Some(Value::Null)), "index {i}");
  }
  assert_eq!(arr.get(7).map(expect_int), Some(42));
}

#[test]
fn element_reads() {
  let mut prog = Program::new();
  // get r0 = r0[r1]
  let def = define(&mut prog, "getel", 2, 2, vec![], vec![], |b| {
    b.emit(Instr::abc(Opcode::GetEl, 0, 0, 1));
    b.emit(Instr::abc(Opcode::Ret, 1, 0, 0));
  });
  register(&mut prog, def);

  let arr = prog.new_array();
  arr.push(Value::Int(10));
  arr.push(Value::Int(20));
  let a = Value::Array(arr);

  let r = prog.call_function("getel", &[a, Value::Int(1)]).unwrap();
  assert_eq!(expect_int(r), 20);
  // out-of-range read yields null
  let r = prog.call_function("getel", &[a, Value::Int(9)]).unwrap();
  assert!(matches!(r, Value::Null));
  // negative or non-integer index is an error
  let err = prog.call_function("getel", &[a, Value::Int(-1)]).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Range);
  let err = prog.call_function("getel", &[a, Value::Float(0.0)]).unwrap_err();
  assert!(err.message().contains("non-integer index"));

  let map = prog.new_map();
  map.insert(Value::Int(5), Value::Int(50)).unwrap();
  let m = Value::Map(map);
  let r = prog.call_function("getel", &[m, Value::Int(5)]).unwrap();
  assert_eq!(expect_int(r), 50);
  // missing key yields null
  let r = prog.call_function("getel", &[m, Value::Int(6)]).unwrap();
  assert!(matches!(r, Value::Null));

  let err = prog
    .call_function("getel", &[Value::Int(3), Value::Int(0)])
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Structural);
}

#[test]
fn string_index_serves_shared_char_objects() {
  let mut prog = Program::new();
  let def = define(&mut prog, "getel", 2, 2, vec![], vec![], |b| {
    b.emit(Instr::abc(Opcode::GetEl, 0, 0, 1));
    b.emit(Instr::abc(Opcode::Ret, 1, 0, 0));
  });
  register(&mut prog, def);

  let s = prog.new_str("hi!");
  let sv = Value::Str(s);
  let r1 = prog.call_function("getel", &[sv, Value::Int(1)]).unwrap();
  assert_eq!(expect_str(r1), "i");
  let r2 = prog.call_function("getel", &[sv, Value::Int(1)]).unwrap();
  // both reads return the same cached object
  match (r1, r2) {
    (Value::Str(a), Value::Str(b)) => assert!(a.ptr_eq(b)),
    _ => unreachable!(),
  }
  // past the end yields null
  let r = prog.call_function("getel", &[sv, Value::Int(3)]).unwrap();
  assert!(matches!(r, Value::Null));
}

#[test]
fn typed_container_hints_fall_back() {
  let mut prog = Program::new();
  let def = define(&mut prog, "hint_arr", 2, 2, vec![], vec![], |b| {
    b.emit(Instr::abc(Opcode::GetElArray, 0, 0, 1));
    b.emit(Instr::abc(Opcode::Ret, 1, 0, 0));
  });
  register(&mut prog, def);
  let def = define(&mut prog, "hint_map", 2, 2, vec![], vec![], |b| {
    b.emit(Instr::abc(Opcode::GetElMap, 0, 0, 1));
    b.emit(Instr::abc(Opcode::Ret, 1, 0, 0));
  });
  register(&mut prog, def);

  let arr = prog.new_array();
  arr.push(Value::Int(7));
  let map = prog.new_map();
  map.insert(Value::Int(0), Value::Int(8)).unwrap();

  // right guesses
  let r = prog
    .call_function("hint_arr", &[Value::Array(arr), Value::Int(0)])
    .unwrap();
  assert_eq!(expect_int(r), 7);
  let r = prog
    .call_function("hint_map", &[Value::Map(map), Value::Int(0)])
    .unwrap();
  assert_eq!(expect_int(r), 8);

  // wrong guesses fall through to the generic path
  let r = prog
    .call_function("hint_arr", &[Value::Map(map), Value::Int(0)])
    .unwrap();
  assert_eq!(expect_int(r), 8);
  let r = prog
    .call_function("hint_map", &[Value::Array(arr), Value::Int(0)])
    .unwrap();
  assert_eq!(expect_int(r), 7);
}

#[test]
fn map_stores_and_null_keys() {
  let mut prog = Program::new();
  // r0[r1] = r2; ret r0
  let def = define(&mut prog, "setel", 3, 3, vec![], vec![], |b| {
    b.emit(Instr::abc(Opcode::SetEl, 0, 1, 2));
    b.emit(Instr::abc(Opcode::Ret, 1, 0, 0));
  });
  register(&mut prog, def);

  let map = prog.new_map();
  let m = Value::Map(map);
  prog
    .call_function("setel", &[m, Value::Int(1), Value::Int(10)])
    .unwrap();
  assert_eq!(map.len(), 1);
  assert_eq!(map.get(Value::Int(1)).map(expect_int), Some(10));

  // null values are fine, null keys are not
  prog
    .call_function("setel", &[m, Value::Int(2), Value::Null])
    .unwrap();
  assert!(matches!(map.get(Value::Int(2)), Some(Value::Null)));
  let err = prog
    .call_function("setel", &[m, Value::Null, Value::Int(1)])
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Structural);
  assert!(err.message().contains("null key"));

  let err = prog
    .call_function("setel", &[Value::Int(1), Value::Int(0), Value::Int(0)])
    .unwrap_err();
  assert!(err.message().contains("non-container"));
}

#[test]
fn append_and_len() {
  let mut prog = Program::new();
  // r0 = append(r0, r1)
  let def = define(&mut prog, "push", 2, 2, vec![], vec![], |b| {
    b.emit(Instr::abc(Opcode::Append, 0, 1, 0));
    b.emit(Instr::abc(Opcode::Ret, 1, 0, 0));
  });
  register(&mut prog, def);
  let def = define(&mut prog, "len", 1, 1, vec![], vec![], |b| {
    b.emit(Instr::abc(Opcode::Len, 0, 0, 0));
    b.emit(Instr::abc(Opcode::Ret, 1, 0, 0));
  });
  register(&mut prog, def);

  let arr = prog.new_array();
  let a = Value::Array(arr);
  for i in 0..5 {
    prog.call_function("push", &[a, Value::Int(i)]).unwrap();
  }
  assert_eq!(arr.len(), 5);
  assert_eq!(expect_int(prog.call_function("len", &[a]).unwrap()), 5);

  let err = prog.call_function("push", &[Value::Int(1), Value::Int(2)]).unwrap_err();
  assert!(err.message().contains("must be array"));

  let map = prog.new_map();
  map.insert(Value::Int(1), Value::Int(1)).unwrap();
  assert_eq!(expect_int(prog.call_function("len", &[Value::Map(map)]).unwrap()), 1);
  let s = prog.new_str("four");
  assert_eq!(expect_int(prog.call_function("len", &[Value::Str(s)]).unwrap()), 4);
  assert!(prog.call_function("len", &[Value::Int(9)]).is_err());
}

#[test]
fn hot_loop_array_reads_stay_correct() {
  let mut prog = Program::new();
  // sum all elements; runs long enough to flip the loop hot
  let def = define(
    &mut prog,
    "sum_arr",
    1,
    5,
    vec![Value::Int(0), Value::Int(1)],
    vec![],
    |b| {
      b.emit(Instr::au(Opcode::Ldc, 1, 0)); // sum = 0
      b.emit(Instr::au(Opcode::Ldc, 2, 0)); // i = 0
      b.emit(Instr::abc(Opcode::Len, 3, 0, 0));
      let top = b.label();
      let end = b.label();
      b.bind(top);
      b.emit(Instr::abc(Opcode::CmpLt, 0, 2, 3)); // while i < len
      b.jmp(0, end);
      b.emit(Instr::abc(Opcode::GetEl, 4, 0, 2));
      b.emit(Instr::abc(Opcode::Add, 1, 1, 4));
      b.emit(Instr::abc(Opcode::Add, 2, 2, k(1)));
      b.jmp(0, top);
      b.bind(end);
      b.emit(Instr::abc(Opcode::Ret, 1, 1, 0));
    },
  );
  register(&mut prog, def);

  let arr = prog.new_array();
  for i in 0..300 {
    arr.push(Value::Int(i));
  }
  let r = prog.call_function("sum_arr", &[Value::Array(arr)]).unwrap();
  assert_eq!(expect_int(r), (0..300).sum::<i64>());
  assert!(prog.vm.hot_loops.any_hot());

  // the advisory flag resets on forward jumps; a second run still agrees
  let r = prog.call_function("sum_arr", &[Value::Array(arr)]).unwrap();
  assert_eq!(expect_int(r), 44850);
}

#[test]
fn empty_literals_reserve_capacity() {
  let mut prog = Program::new();
  let def = define(&mut prog, "empties", 0, 2, vec![], vec![], |b| {
    b.emit(Instr::au(Opcode::NewArray, 0, 0));
    b.emit(Instr::au(Opcode::NewMap, 1, 0));
    b.emit(Instr::au(Opcode::NewArray, 0, 0));
    b.emit(Instr::abc(Opcode::Ret, 1, 1, 0));
  });
  register(&mut prog, def);

  let r = prog.call_function("empties", &[]).unwrap();
  let map = r.as_map().unwrap();
  assert_eq!(map.len(), 0);
  assert_eq!(map.capacity(), 16);
}
