use std::path::PathBuf;

use crate::disasm::DEFAULT_OBJDUMP;
use crate::memory::Heuristics;

/// Modules whose symbols the report loads without being asked.
pub const KNOWN_MODULES: &[&str] = &["chrome.exe", "chrome.dll"];

/// Settings for analyzing one dump.
#[derive(Clone, Debug)]
pub struct Options {
    /// Where `<module>.pdb.sym` files are looked up.
    pub symdir: PathBuf,
    /// The `objdump` binary used for disassembly.
    pub objdump: PathBuf,
    /// Dump every memory region after the summary.
    pub full: bool,
    pub known_modules: Vec<String>,
    pub heuristics: Heuristics,
    /// A shell command to run after the summary.
    pub command: Option<String>,
    /// Start an interactive shell after the summary.
    pub shell: bool,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            symdir: PathBuf::from("."),
            objdump: PathBuf::from(DEFAULT_OBJDUMP),
            full: false,
            known_modules: KNOWN_MODULES.iter().map(|m| m.to_string()).collect(),
            heuristics: Heuristics::default(),
            command: None,
            shell: false,
        }
    }
}

impl Options {
    pub fn is_known_module(&self, name: &str) -> bool {
        self.known_modules.iter().any(|m| m == name)
    }
}
