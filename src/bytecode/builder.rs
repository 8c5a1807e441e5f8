//! Small assembler for hosts and tests that construct function code by hand.
//!
//! Forward jump targets are labels: create one with [`BytecodeBuilder::label`],
//! reference it from `jmp`, and bind it with [`BytecodeBuilder::bind`] once
//! the target address is known. `finish` resolves every reference.

use super::{Instr, Opcode};
use crate::span::{SourceMap, SrcLoc};

#[derive(Clone, Copy)]
pub struct Label(usize);

#[derive(Default)]
pub struct BytecodeBuilder {
  code: Vec<Instr>,
  locs: Vec<(u32, SrcLoc)>,
  labels: Vec<Option<u32>>,
  patches: Vec<(usize, Label)>,
}

impl BytecodeBuilder {
  pub fn new() -> BytecodeBuilder {
    BytecodeBuilder::default()
  }

  pub fn pc(&self) -> u32 {
    self.code.len() as u32
  }

  /// Attach `loc` to every instruction emitted from here on.
  pub fn loc(&mut self, loc: SrcLoc) -> &mut Self {
    self.locs.push((self.pc(), loc));
    self
  }

  pub fn emit(&mut self, instr: Instr) -> &mut Self {
    self.code.push(instr);
    self
  }

  pub fn label(&mut self) -> Label {
    self.labels.push(None);
    Label(self.labels.len() - 1)
  }

  /// Bind `label` to the current address.
  pub fn bind(&mut self, label: Label) -> &mut Self {
    self.labels[label.0] = Some(self.pc());
    self
  }

  /// Emit a `JMP` to `label`, closing `n_close` topmost upvalues.
  pub fn jmp(&mut self, n_close: u32, label: Label) -> &mut Self {
    self.patches.push((self.code.len(), label));
    self.code.push(Instr::asx(Opcode::Jmp, n_close, 0));
    self
  }

  pub fn finish(self) -> (Box<[Instr]>, SourceMap) {
    let mut code = self.code;
    for (at, label) in self.patches {
      let target = self.labels[label.0].expect("jump to unbound label");
      // the offset applies after the pc has moved past the jump
      let offset = target as i64 - (at as i64 + 1);
      let n_close = code[at].ra();
      code[at] = Instr::asx(Opcode::Jmp, n_close, offset as i32);
    }
    (code.into_boxed_slice(), SourceMap::new(self.locs))
  }
}
