use std::fmt::Display;

use beef::lean::Cow;

use crate::span::SrcLoc;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Classifies a runtime failure. The kind is informational; every error is
/// fatal to the current run and none destroy the program.
#[derive(Clone, Copy, PartialEq, Eq, Debug, thiserror::Error)]
pub enum ErrorKind {
  /// Wrong operand variant for an opcode or host function.
  #[error("type error")]
  Type,
  /// Negative or non-integer index, or an out-of-range write.
  #[error("range error")]
  Range,
  /// Division by zero.
  #[error("arithmetic error")]
  Arithmetic,
  /// Calling a non-callable, indexing a non-container, null map key.
  #[error("structural error")]
  Structural,
  /// Out of memory on allocation or stack growth.
  #[error("resource error")]
  Resource,
  /// Raised by the script or by a host function.
  #[error("user error")]
  User,
}

#[derive(Debug, Clone)]
pub enum TraceLine {
  Script { file: String, line: u32, func: String },
  Native,
}

#[derive(Debug, Clone)]
pub struct Error {
  kind: ErrorKind,
  message: Cow<'static, str>,
  loc: Option<(String, u32, u32)>,
  trace: Vec<TraceLine>,
}

impl Error {
  pub fn new(kind: ErrorKind, message: impl Into<Cow<'static, str>>) -> Error {
    Error {
      kind,
      message: message.into(),
      loc: None,
      trace: Vec::new(),
    }
  }

  pub fn kind(&self) -> ErrorKind {
    self.kind
  }

  pub fn message(&self) -> &str {
    &self.message
  }

  pub fn loc(&self) -> Option<(&str, u32, u32)> {
    self.loc.as_ref().map(|(f, l, c)| (f.as_str(), *l, *c))
  }

  pub fn trace(&self) -> &[TraceLine] {
    &self.trace
  }

  pub(crate) fn set_loc(&mut self, file: &str, loc: SrcLoc) {
    self.loc = Some((file.to_string(), loc.line, loc.col));
  }

  pub(crate) fn set_trace(&mut self, trace: Vec<TraceLine>) {
    self.trace = trace;
  }
}

impl Display for Error {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match &self.loc {
      Some((file, line, col)) => write!(f, "{file}:{line}:{col}: error: {}", self.message)?,
      None => write!(f, "error: {}", self.message)?,
    }
    if !self.trace.is_empty() {
      write!(f, "\n\nTraceback (most recent call last):")?;
      for line in &self.trace {
        match line {
          TraceLine::Script { file, line, func } => {
            write!(f, "\n  File \"{file}\", line {line}, in {func}")?
          }
          TraceLine::Native => write!(f, "\n  <native function>")?,
        }
      }
    }
    Ok(())
  }
}

impl std::error::Error for Error {}
