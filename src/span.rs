//! Source locations for error reporting.
//!
//! The compiler (an external collaborator) attaches a [`SourceMap`] to every
//! function definition, mapping instruction addresses to the location of the
//! source construct they were emitted for. File names are interned in a
//! per-program [`FileTable`] and referenced by id.

use indexmap::IndexSet;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct SrcLoc {
  pub file_id: u16,
  pub line: u32,
  pub col: u32,
}

impl SrcLoc {
  pub fn new(file_id: u16, line: u32, col: u32) -> SrcLoc {
    SrcLoc { file_id, line, col }
  }
}

/// Interned source file names.
#[derive(Default)]
pub struct FileTable {
  names: IndexSet<String>,
}

impl FileTable {
  pub fn new() -> FileTable {
    FileTable::default()
  }

  pub fn intern(&mut self, name: &str) -> u16 {
    let (id, _) = self.names.insert_full(name.to_string());
    id as u16
  }

  pub fn name(&self, id: u16) -> &str {
    self.names.get_index(id as usize).map(|s| s.as_str()).unwrap_or("?")
  }
}

/// Maps instruction addresses to source locations.
///
/// Entries are `(first_addr, loc)` pairs sorted by address; a lookup returns
/// the location of the last entry at or before the queried address.
#[derive(Default)]
pub struct SourceMap {
  entries: Box<[(u32, SrcLoc)]>,
}

impl SourceMap {
  pub fn new(mut entries: Vec<(u32, SrcLoc)>) -> SourceMap {
    entries.sort_by_key(|(addr, _)| *addr);
    SourceMap {
      entries: entries.into_boxed_slice(),
    }
  }

  pub fn empty() -> SourceMap {
    SourceMap::default()
  }

  pub fn lookup(&self, addr: u32) -> SrcLoc {
    match self.entries.partition_point(|(a, _)| *a <= addr) {
      0 => SrcLoc::default(),
      n => self.entries[n - 1].1,
    }
  }
}
