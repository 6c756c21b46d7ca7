//! Disassembly through an external `objdump`.

use regex::Regex;
use std::cmp;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::context::Arch;
use crate::memory::ReadMemory;

pub const DEFAULT_OBJDUMP: &str = "/usr/bin/objdump";

const UNDEFINED_MARKER: &str = "<UNDEFINED>";
const NO_FLAGS: &[&str] = &[];
const THUMB_FLAGS: &[&str] = &["--disassembler-options=force-thumb"];

/// One disassembled instruction: its offset from the start of the input, and the
/// disassembler's text for it.
pub type DisasmLine = (u64, String);

/// Errors from running the disassembler.
#[derive(Debug, thiserror::Error)]
pub enum DisasmError {
    #[error("couldn't run {path}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("couldn't write the code to a temporary file")]
    TempFile(#[source] io::Error),
    #[error("disassembler output has no `<.data>:` header")]
    MissingHeader,
}

/// Turns raw machine code into instruction lines.
pub trait Disassembler {
    /// Disassemble `code` for `arch`, passing `flags` through to the tool.
    fn disassemble(&self, code: &[u8], arch: Arch, flags: &[&str]) -> Result<Vec<DisasmLine>, DisasmError>;
}

fn objdump_arch_args(arch: Arch) -> &'static [&'static str] {
    match arch {
        Arch::X86 => &["-m", "i386"],
        Arch::Amd64 => &["-m", "i386", "-M", "x86-64"],
        Arch::Arm => &["-m", "arm"],
    }
}

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-f0-9]+\s+<\.data>:$").unwrap())
}

fn line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*([a-f0-9]+):\s*(\S.*)").unwrap())
}

/// Pick the instruction lines out of `objdump -D -b binary` output.
pub fn parse_objdump_output(output: &str) -> Result<Vec<DisasmLine>, DisasmError> {
    let mut lines = output.lines();
    if !lines.by_ref().any(|l| header_re().is_match(l.trim_end())) {
        return Err(DisasmError::MissingHeader);
    }
    Ok(lines
        .filter_map(|line| {
            let caps = line_re().captures(line)?;
            let offset = u64::from_str_radix(&caps[1], 16).ok()?;
            Some((offset, caps[2].trim_end().to_owned()))
        })
        .collect())
}

/// Runs `objdump` on a temporary copy of the code.
#[derive(Clone, Debug)]
pub struct ObjdumpDisassembler {
    objdump: PathBuf,
}

impl Default for ObjdumpDisassembler {
    fn default() -> ObjdumpDisassembler {
        ObjdumpDisassembler::new(DEFAULT_OBJDUMP)
    }
}

impl ObjdumpDisassembler {
    pub fn new<P: AsRef<Path>>(objdump: P) -> ObjdumpDisassembler {
        ObjdumpDisassembler {
            objdump: objdump.as_ref().to_owned(),
        }
    }
}

impl Disassembler for ObjdumpDisassembler {
    fn disassemble(&self, code: &[u8], arch: Arch, flags: &[&str]) -> Result<Vec<DisasmLine>, DisasmError> {
        let mut file = tempfile::NamedTempFile::new().map_err(DisasmError::TempFile)?;
        file.write_all(code).map_err(DisasmError::TempFile)?;
        file.flush().map_err(DisasmError::TempFile)?;

        let mut command = Command::new(&self.objdump);
        command
            .args(flags.iter().filter(|f| !f.is_empty()))
            .args(["-D", "-b", "binary"])
            .args(objdump_arch_args(arch))
            .arg(file.path());
        debug!("running {:?}", command);
        let output = command.output().map_err(|source| DisasmError::Spawn {
            path: self.objdump.clone(),
            source,
        })?;
        parse_objdump_output(&String::from_utf8_lossy(&output.stdout))
    }
}

fn count_undefined(lines: &[DisasmLine]) -> usize {
    lines
        .iter()
        .map(|(_, text)| text.matches(UNDEFINED_MARKER).count())
        .sum()
}

/// Disassemble `size` bytes of dump memory at `address`.
///
/// The range is cut short at the end of the region containing `address`. On ARM, Thumb
/// decoding is tried as well and whichever listing has fewer undefined instructions wins.
/// Failures are logged and produce no lines.
pub fn get_disasm_lines(
    disassembler: &dyn Disassembler,
    memory: &dyn ReadMemory,
    address: u64,
    size: u64,
) -> Vec<DisasmLine> {
    let (start, region_size) = match memory.find_region(address) {
        Some(region) => region,
        None => return vec![],
    };
    let available = start.saturating_add(region_size) - address;
    let code = match memory.read_bytes(address, cmp::min(size, available) as usize) {
        Some(code) => code,
        None => return vec![],
    };
    let arch = memory.arch();
    let flag_sets = match arch {
        Arch::Arm => vec![NO_FLAGS, THUMB_FLAGS],
        _ => vec![NO_FLAGS],
    };
    flag_sets
        .iter()
        .filter_map(|flags| match disassembler.disassemble(code, arch, flags) {
            Ok(lines) => Some(lines),
            Err(e) => {
                warn!("disassembly of {:#x} failed: {}", address, e);
                None
            }
        })
        .min_by_key(|lines| count_undefined(lines))
        .unwrap_or_default()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::heap::testing::FakeMemory;
    use std::cell::RefCell;

    const OBJDUMP_OUTPUT: &str = "
/tmp/.tmpXyZ:     file format binary


Disassembly of section .data:

00000000 <.data>:
   0:\t55                   \tpush   %ebp
   1:\t89 e5                \tmov    %esp,%ebp
   3:\te8 fc ff ff ff       \tcall   0x4
";

    #[test]
    fn test_parse_objdump_output() {
        let lines = parse_objdump_output(OBJDUMP_OUTPUT).unwrap();
        assert_eq!(
            lines,
            vec![
                (0, "55                   \tpush   %ebp".to_owned()),
                (1, "89 e5                \tmov    %esp,%ebp".to_owned()),
                (3, "e8 fc ff ff ff       \tcall   0x4".to_owned()),
            ]
        );
        assert!(matches!(
            parse_objdump_output("objdump: can't disassemble"),
            Err(DisasmError::MissingHeader)
        ));
    }

    struct Canned {
        calls: RefCell<Vec<(usize, Vec<String>)>>,
    }

    impl Disassembler for Canned {
        fn disassemble(&self, code: &[u8], _arch: Arch, flags: &[&str]) -> Result<Vec<DisasmLine>, DisasmError> {
            self.calls
                .borrow_mut()
                .push((code.len(), flags.iter().map(|f| f.to_string()).collect()));
            if flags.is_empty() {
                Ok(vec![(0, "ffff <UNDEFINED> instruction".to_owned())])
            } else {
                Ok(vec![(0, "4770 bx lr".to_owned())])
            }
        }
    }

    #[test]
    fn test_arm_prefers_fewer_undefined() {
        let m = FakeMemory::new(Arch::Arm, 0x8000, 0x40);
        let canned = Canned {
            calls: RefCell::new(vec![]),
        };
        // Asking for more than the region holds is clipped to the region.
        let lines = get_disasm_lines(&canned, &m, 0x8010, 0x100);
        assert_eq!(lines, vec![(0, "4770 bx lr".to_owned())]);
        let calls = canned.calls.borrow();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, 0x30);
        assert_eq!(calls[1].1, vec!["--disassembler-options=force-thumb"]);
    }

    #[test]
    fn test_outside_dump() {
        let m = FakeMemory::new(Arch::X86, 0x8000, 0x40);
        let canned = Canned {
            calls: RefCell::new(vec![]),
        };
        assert!(get_disasm_lines(&canned, &m, 0x1000, 0x10).is_empty());
        assert!(canned.calls.borrow().is_empty());
    }
}
