//! Function symbols from Breakpad `.sym` files.
//!
//! Only `FUNC` records are used. Each module's records are relocated by the module's load
//! address and merged into one table sorted by start address.

use nom::bytes::complete::tag;
use nom::character::complete::{hex_digit1, not_line_ending, space1};
use nom::combinator::{map_res, opt};
use nom::sequence::{preceded, tuple};
use nom::IResult;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use grokdump_common::traits::Module;

/// Errors encountered while loading a symbol file.
#[derive(Debug, thiserror::Error)]
pub enum SymbolError {
    #[error("couldn't read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path}:{line}: malformed FUNC record")]
    Parse { path: PathBuf, line: usize },
}

/// A function from a symbol file, relocated to its module's load address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FuncSymbol {
    pub start: u64,
    pub size: u64,
    pub name: String,
}

impl FuncSymbol {
    pub fn covers(&self, address: u64) -> bool {
        address >= self.start && address - self.start < self.size
    }
}

// Match a hex string, parse it to a u64.
fn hex_str_u64(input: &str) -> IResult<&str, u64> {
    map_res(hex_digit1, |s| u64::from_str_radix(s, 16))(input)
}

// Matches a FUNC record: `FUNC [m] <address> <size> <param_size> <name>`.
fn func_line(input: &str) -> IResult<&str, (u64, u64, &str)> {
    let (input, _) = tag("FUNC")(input)?;
    let (input, _) = opt(preceded(space1, tag("m")))(input)?;
    let (input, (_, address, _, size, _, _parameter_size, _, name)) = tuple((
        space1,
        hex_str_u64,
        space1,
        hex_str_u64,
        space1,
        hex_str_u64,
        space1,
        not_line_ending,
    ))(input)?;
    Ok((input, (address, size, name.trim_end())))
}

/// The symbol file name for a module: `chrome.dll` becomes `chrome_dll.pdb.sym`.
pub fn symbol_file_name(module_name: &str) -> String {
    format!("{}.pdb.sym", module_name.replace('.', "_"))
}

/// All function symbols loaded so far.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<FuncSymbol>,
    /// `(base, size)` of every module whose symbols were loaded.
    modules_with_symbols: Vec<(u64, u64)>,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable::default()
    }

    pub fn has_symbols_for<M: Module + ?Sized>(&self, module: &M) -> bool {
        self.modules_with_symbols
            .contains(&(module.base_address(), module.size()))
    }

    /// Load symbols for `module` from `symdir`, if its symbol file exists.
    ///
    /// Returns whether symbols for the module are now loaded. Loading a module twice has no
    /// further effect.
    pub fn load_module<M: Module + ?Sized>(
        &mut self,
        module: &M,
        symdir: &Path,
    ) -> Result<bool, SymbolError> {
        if self.has_symbols_for(module) {
            return Ok(true);
        }
        let path = symdir.join(symbol_file_name(&module.short_name()));
        if !path.is_file() {
            debug!("no symbol file at {}", path.display());
            return Ok(false);
        }
        debug!("Loading symbols from {}", path.display());
        let text = fs::read_to_string(&path).map_err(|source| SymbolError::Io {
            path: path.clone(),
            source,
        })?;
        self.load_text(module, &text)
            .map_err(|line| SymbolError::Parse { path, line })?;
        Ok(true)
    }

    /// Like [`SymbolTable::load_module`], but failures are logged instead of returned.
    pub fn try_load_module<M: Module + ?Sized>(&mut self, module: &M, symdir: &Path) -> bool {
        match self.load_module(module, symdir) {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!("failed to load symbols for {}: {}", module.code_file(), e);
                false
            }
        }
    }

    /// Add the `FUNC` records in `text` for `module`.
    ///
    /// A malformed `FUNC` record rejects the whole file; the 1-based line number is returned.
    pub fn load_text<M: Module + ?Sized>(&mut self, module: &M, text: &str) -> Result<(), usize> {
        let base = module.base_address();
        let mut funcs = vec![];
        for (i, line) in text.lines().enumerate() {
            if !line.starts_with("FUNC ") {
                continue;
            }
            let (_, (start, size, name)) = func_line(line).map_err(|_| i + 1)?;
            funcs.push(FuncSymbol {
                start: base.wrapping_add(start),
                size,
                name: name.to_owned(),
            });
        }
        for f in funcs {
            let i = self.symbols.partition_point(|s| s.start < f.start);
            self.symbols.insert(i, f);
        }
        self.modules_with_symbols
            .push((module.base_address(), module.size()));
        Ok(())
    }

    fn in_module_with_symbols(&self, address: u64) -> bool {
        self.modules_with_symbols
            .iter()
            .any(|&(base, size)| address >= base && address - base < size)
    }

    /// Resolve `address` to `name+0xOFFSET`.
    ///
    /// When functions overlap, the one starting closest below `address` wins.
    pub fn find_symbol(&self, address: u64) -> Option<String> {
        if !self.in_module_with_symbols(address) {
            return None;
        }
        let i = self.symbols.partition_point(|s| s.start <= address);
        let symbol = self.symbols[..i].iter().rev().find(|s| s.covers(address))?;
        Some(format!("{}+0x{:x}", symbol.name, address - symbol.start))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    const SYMS: &str = "MODULE windows x86 0123456789ABCDEF0 chrome.dll\n\
FILE 1 foo.cc\n\
FUNC 1000 20 4 v8::internal::Heap::Scavenge()\n\
1000 10 12 1\n\
FUNC m 1040 30 0 v8::internal::Isolate::Throw(Object*)  \n\
PUBLIC 2000 0 _start\n";

    #[test]
    fn test_func_line() {
        let (_, (start, size, name)) = func_line("FUNC 1f00 1a 8 foo(int)").unwrap();
        assert_eq!((start, size, name), (0x1f00, 0x1a, "foo(int)"));
        let (_, (start, _, name)) = func_line("FUNC m 10 1 0 bar").unwrap();
        assert_eq!((start, name), (0x10, "bar"));
        assert!(func_line("FUNC zz 1 0 bar").is_err());
    }

    #[test]
    fn test_find_symbol() {
        let module = (0x1000_0000u64, 0x10000u64, "c:\\chrome\\chrome.dll");
        let mut table = SymbolTable::new();
        table.load_text(&module, SYMS).unwrap();
        assert_eq!(
            table.find_symbol(0x1000_1004).as_deref(),
            Some("v8::internal::Heap::Scavenge()+0x4")
        );
        assert_eq!(
            table.find_symbol(0x1000_1040).as_deref(),
            Some("v8::internal::Isolate::Throw(Object*)+0x0")
        );
        // Between functions.
        assert_eq!(table.find_symbol(0x1000_1030), None);
        // Outside every module with symbols.
        assert_eq!(table.find_symbol(0x1004), None);
    }

    #[test]
    fn test_find_nested_symbol() {
        let module = (0x4000u64, 0x1000u64, "nested.dll");
        let mut table = SymbolTable::new();
        table
            .load_text(
                &module,
                "FUNC 0 100 0 outer\nFUNC 10 10 0 inlined\nFUNC 30 10 0 also_inlined\n",
            )
            .unwrap();
        assert_eq!(table.find_symbol(0x4015).as_deref(), Some("inlined+0x5"));
        assert_eq!(table.find_symbol(0x4030).as_deref(), Some("also_inlined+0x0"));
        // Past both inner functions but still inside the outer one.
        assert_eq!(table.find_symbol(0x4048).as_deref(), Some("outer+0x48"));
        assert_eq!(table.find_symbol(0x4100), None);
    }

    #[test]
    fn test_address_outside_module_is_not_resolved() {
        // A symbol that relocates past the module's end must not match.
        let module = (0x2000u64, 0x100u64, "tiny.dll");
        let mut table = SymbolTable::new();
        table.load_text(&module, "FUNC 200 100 0 far_away\n").unwrap();
        assert_eq!(table.find_symbol(0x2210), None);
    }

    #[test]
    fn test_malformed_func_rejects_file() {
        let module = (0x2000u64, 0x100u64, "tiny.dll");
        let mut table = SymbolTable::new();
        assert_eq!(table.load_text(&module, "FUNC 0 10 0 ok\nFUNC oops\n"), Err(2));
        assert!(!table.has_symbols_for(&module));
    }

    #[test]
    fn test_load_module_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = fs::File::create(dir.path().join("chrome_dll.pdb.sym")).unwrap();
        f.write_all(SYMS.as_bytes()).unwrap();
        drop(f);

        let module = (0x1000_0000u64, 0x10000u64, "c:\\chrome\\chrome.dll");
        let mut table = SymbolTable::new();
        assert!(table.load_module(&module, dir.path()).unwrap());
        assert!(table.load_module(&module, dir.path()).unwrap());
        assert_eq!(table.symbols.len(), 2);

        let missing = (0x3000_0000u64, 0x1000u64, "chrome.exe");
        assert!(!table.load_module(&missing, dir.path()).unwrap());
        assert_eq!(table.find_symbol(0x3000_0010), None);
    }
}
