// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! A library for inspecting minidumps of processes running a V8-style managed heap.
//!
//! Open a dump with [`DumpFile::read_path`], then either print the standard report with
//! [`analyze_minidump`] or build the pieces yourself: a [`HeapModel`] decodes tagged heap
//! words found in the dump's memory, a [`Padawan`] layers operator-supplied landmark pages
//! on top of it, and an [`Inspector`] renders annotated views of memory.
//!
//! ```no_run
//! use grokdump::{analyze_minidump, AnnotationStore, DumpFile, ObjdumpDisassembler, Options};
//!
//! # fn foo() -> Result<(), grokdump::ReportError> {
//! let path = std::path::Path::new("crash.dmp");
//! let dump = DumpFile::read_path(path)?;
//! let options = Options::default();
//! let disassembler = ObjdumpDisassembler::new(&options.objdump);
//! analyze_minidump(
//!     &dump,
//!     &options,
//!     AnnotationStore::for_dump(path),
//!     &disassembler,
//!     &mut std::io::stdout(),
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod annotations;
pub mod context;
pub mod disasm;
mod dump;
pub mod heap;
pub mod memory;
mod options;
pub mod padawan;
mod printer;
pub mod report;
pub mod shell;
pub mod symbols;

pub use crate::annotations::AnnotationStore;
pub use crate::context::{Arch, CpuContext};
pub use crate::disasm::{Disassembler, ObjdumpDisassembler};
pub use crate::dump::*;
pub use crate::heap::{HeapAccess, HeapModel, HeapObject, Tagged};
pub use crate::memory::{Heuristics, ReadMemory};
pub use crate::options::*;
pub use crate::padawan::{Landmarks, PageKind, Padawan};
pub use crate::printer::Printer;
pub use crate::report::{analyze_minidump, Inspector, ReportError};
pub use crate::shell::Shell;
pub use crate::symbols::SymbolTable;
