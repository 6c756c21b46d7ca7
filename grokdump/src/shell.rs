//! The interactive inspection shell.
//!
//! Commands take hex arguments, with or without a `0x` prefix. Bad input prints an error
//! and the loop carries on; only `quit`, `exit`, EOF and Ctrl-C leave it.

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::collections::HashSet;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::{debug, warn};

use grokdump_common::traits::Module;

use crate::annotations::AnnotationStore;
use crate::disasm::Disassembler;
use crate::dump::MinidumpModule;
use crate::heap::{
    DescriptorArray, HeapAccess, HeapObject, Map, Tagged, TransitionArray, PAGE_ALIGNMENT_MASK,
};
use crate::memory::{Heuristics, ReadMemory};
use crate::options::Options;
use crate::padawan::{PageKind, Padawan};
use crate::printer::Printer;
use crate::report::{list_regions, print_module_details, search_word, Inspector};
use crate::symbols::SymbolTable;

pub const PROMPT: &str = "(grok) ";

const NOT_IN_DUMP: &str = "Address is not contained within the minidump!";

const COMMANDS: &[(&str, &str)] = &[
    ("c <addr> <text>", "attach a comment to an address"),
    ("da <addr>", "print the ASCII string at an address"),
    ("dd <addr> [num]", "dump num words (default 0x10), annotated"),
    ("do <addr>", "print the heap object at a tagged or untagged address"),
    ("do_desc <addr>", "print a descriptor array"),
    ("do_map <addr>", "print a map"),
    ("do_trans <addr>", "print a transition array"),
    ("dp <addr>", "print the header of the page holding an address"),
    ("k", "show the known landmark pages"),
    ("kd <addr>", "set the first old data space page"),
    ("km <addr>", "set the first map space page"),
    ("kp <addr>", "set the first old pointer space page"),
    ("list", "list the memory regions in the dump"),
    ("lm [filter]", "show modules whose name contains filter, loading their symbols"),
    ("s <word>", "search memory for a word (decimal, or hex with 0x)"),
    ("u <addr> [size]", "disassemble size bytes (default 0x20)"),
    ("quit", "leave the shell"),
];

#[derive(Debug, thiserror::Error)]
enum ArgError {
    #[error("missing address argument")]
    MissingAddress,
    #[error("malformed hex value `{0}`")]
    Malformed(String),
    #[error("missing comment text")]
    MissingText,
}

#[derive(Debug, thiserror::Error)]
enum CommandError {
    #[error(transparent)]
    Arg(#[from] ArgError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

fn parse_hex(text: &str) -> Result<u64, ArgError> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u64::from_str_radix(digits, 16).map_err(|_| ArgError::Malformed(text.to_owned()))
}

/// A required address followed by an optional hex number.
fn address_args(args: &str) -> Result<(u64, Option<u64>), ArgError> {
    let mut words = args.split_whitespace();
    let address = parse_hex(words.next().ok_or(ArgError::MissingAddress)?)?;
    let extra = words.next().map(parse_hex).transpose()?;
    Ok((address, extra))
}

/// Parse a search word: `0x` hex or decimal.
fn parse_word(text: &str) -> Option<u64> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// An inspection session over one dump.
pub struct Shell<'h, 'a> {
    padawan: Padawan<'h, 'a>,
    modules: &'a [MinidumpModule],
    annotations: AnnotationStore,
    symbols: SymbolTable,
    disassembler: &'h dyn Disassembler,
    stack_map: HashSet<u64>,
    symdir: PathBuf,
    heuristics: Heuristics,
}

impl<'h, 'a> Shell<'h, 'a> {
    pub fn new(
        padawan: Padawan<'h, 'a>,
        modules: &'a [MinidumpModule],
        annotations: AnnotationStore,
        symbols: SymbolTable,
        disassembler: &'h dyn Disassembler,
        stack_map: HashSet<u64>,
        options: &Options,
    ) -> Shell<'h, 'a> {
        Shell {
            padawan,
            modules,
            annotations,
            symbols,
            disassembler,
            stack_map,
            symdir: options.symdir.clone(),
            heuristics: options.heuristics,
        }
    }

    pub fn inspector(&self) -> Inspector<'_> {
        Inspector::new(
            &self.padawan,
            &self.symbols,
            self.disassembler,
            &self.stack_map,
        )
        .with_heuristics(self.heuristics)
    }

    pub fn annotations(&self) -> &AnnotationStore {
        &self.annotations
    }

    pub fn padawan(&self) -> &Padawan<'h, 'a> {
        &self.padawan
    }

    fn memory(&self) -> &'h dyn ReadMemory {
        self.padawan.heap().memory()
    }

    /// Run commands from the terminal until the operator leaves.
    pub fn run(&mut self, out: &mut dyn Write) -> Result<(), ReadlineError> {
        let mut editor = DefaultEditor::new()?;
        writeln!(out, "type help to get help")?;
        loop {
            match editor.readline(PROMPT) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        editor.add_history_entry(line.as_str())?;
                    }
                    if !self.run_command(&line, out)? {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                    writeln!(out, "Kthxbye.")?;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Run one command line. Returns `false` once the operator asks to leave.
    pub fn run_command(&mut self, line: &str, out: &mut dyn Write) -> io::Result<bool> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(true);
        }
        let (command, args) = line
            .split_once(char::is_whitespace)
            .unwrap_or((line, ""));
        let args = args.trim();
        debug!("shell command `{}` with `{}`", command, args);
        let result = match command {
            "quit" | "exit" => return Ok(false),
            "help" => self.help(out),
            "c" => self.comment(args, out),
            "da" => self.dump_ascii(args, out),
            "dd" => self.dump_words(args, out),
            "do" => self.dump_object(args, out),
            "do_desc" => self.dump_descriptors(args, out),
            "do_map" => self.dump_map(args, out),
            "do_trans" => self.dump_transitions(args, out),
            "dp" => self.dump_page(args, out),
            "k" => self
                .padawan
                .print_knowledge(out)
                .map_err(CommandError::from),
            "kd" => self.set_landmark(PageKind::Data, args, out),
            "km" => self.set_landmark(PageKind::Map, args, out),
            "kp" => self.set_landmark(PageKind::Pointer, args, out),
            "list" => list_regions(self.memory(), out).map_err(CommandError::from),
            "lm" => self.list_modules(args, out),
            "s" => self.search(args, out),
            "u" => self.unassemble(args, out),
            _ => {
                writeln!(out, "*** Unknown syntax: {}", line)?;
                Ok(())
            }
        };
        match result {
            Ok(()) => Ok(true),
            Err(CommandError::Arg(e)) => {
                writeln!(out, "error: {}", e)?;
                Ok(true)
            }
            Err(CommandError::Io(e)) => Err(e),
        }
    }

    fn help(&self, out: &mut dyn Write) -> Result<(), CommandError> {
        writeln!(out, "commands:")?;
        let width = COMMANDS.iter().map(|(c, _)| c.len()).max().unwrap_or(0);
        for (synopsis, description) in COMMANDS {
            writeln!(out, "  {:width$}  {}", synopsis, description, width = width)?;
        }
        Ok(())
    }

    fn comment(&mut self, args: &str, out: &mut dyn Write) -> Result<(), CommandError> {
        let (address, text) = args
            .split_once(char::is_whitespace)
            .ok_or(ArgError::MissingText)?;
        let address = parse_hex(address)?;
        if let Err(e) = self.annotations.set_comment(address, text.trim()) {
            warn!("couldn't save comment: {}", e);
            writeln!(out, "Comment not saved: {}", e)?;
        }
        Ok(())
    }

    fn dump_ascii(&self, args: &str, out: &mut dyn Write) -> Result<(), CommandError> {
        let (mut address, _) = address_args(args)?;
        let memory = self.memory();
        let mut string = String::new();
        while let Some(byte) = memory.read_u8(address) {
            if byte >= 128 {
                break;
            }
            string.push(byte as char);
            address = address.wrapping_add(1);
        }
        if string.is_empty() {
            writeln!(out, "Not an ASCII string at {}", memory.format_pointer(address))?;
        } else {
            writeln!(out, "{}\n", string)?;
        }
        Ok(())
    }

    fn dump_words(&self, args: &str, out: &mut dyn Write) -> Result<(), CommandError> {
        let (start, num) = address_args(args)?;
        let memory = self.memory();
        let ptr = memory.pointer_size() as u64;
        if start & self.padawan.heap().object_alignment_mask() != 0 {
            writeln!(
                out,
                "Warning: Dumping un-aligned memory, is this what you had in mind?"
            )?;
        }
        for i in 0..num.unwrap_or(0x10) {
            let slot = start.wrapping_add(i.wrapping_mul(ptr));
            let value = match memory.read_pointer(slot) {
                Some(value) => value,
                None => {
                    writeln!(out, "{}", NOT_IN_DUMP)?;
                    return Ok(());
                }
            };
            let object = self
                .padawan
                .sense_object(value)
                .map(|o| o.to_string())
                .unwrap_or_default();
            write!(
                out,
                "{}: {} {}",
                memory.format_pointer(slot),
                memory.format_pointer(value),
                object
            )?;
            if let Some(comment) = self.annotations.comment(slot) {
                write!(out, " ; {}", comment)?;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    fn dump_object(&self, args: &str, out: &mut dyn Write) -> Result<(), CommandError> {
        let (address, _) = address_args(args)?;
        let address = match address & self.padawan.heap().object_alignment_mask() {
            0 => address + 1,
            1 => address,
            _ => {
                writeln!(out, "Address doesn't look like a valid pointer!")?;
                return Ok(());
            }
        };
        match self.padawan.sense_object(address) {
            Some(Tagged::Object(object)) => self.inspector().print_object(&object, out)?,
            Some(other) => writeln!(out, "{}", other)?,
            None => writeln!(out, "Address cannot be interpreted as object!")?,
        }
        Ok(())
    }

    fn untagged(args: &str) -> Result<u64, ArgError> {
        address_args(args).map(|(address, _)| address & !1)
    }

    fn dump_descriptors(&self, args: &str, out: &mut dyn Write) -> Result<(), CommandError> {
        let array = HeapObject::fixed_array_at(&self.padawan, Shell::untagged(args)?);
        DescriptorArray::new(&array).print(&self.padawan, &mut Printer::new(out))?;
        Ok(())
    }

    fn dump_transitions(&self, args: &str, out: &mut dyn Write) -> Result<(), CommandError> {
        let array = HeapObject::fixed_array_at(&self.padawan, Shell::untagged(args)?);
        TransitionArray::new(&array).print(&self.padawan, &mut Printer::new(out))?;
        Ok(())
    }

    fn dump_map(&self, args: &str, out: &mut dyn Write) -> Result<(), CommandError> {
        match Map::read(self.memory(), Shell::untagged(args)?) {
            Some(map) => map.print(&self.padawan, &mut Printer::new(out))?,
            None => writeln!(out, "{}", NOT_IN_DUMP)?,
        }
        Ok(())
    }

    fn dump_page(&self, args: &str, out: &mut dyn Write) -> Result<(), CommandError> {
        let (address, _) = address_args(args)?;
        let page = address & !PAGE_ALIGNMENT_MASK;
        if self.memory().is_valid_address(page) {
            debug!("page {:#x} is in the dump but headers aren't decoded", page);
        }
        writeln!(out, "Page header is not available!")?;
        Ok(())
    }

    fn set_landmark(
        &mut self,
        kind: PageKind,
        args: &str,
        out: &mut dyn Write,
    ) -> Result<(), CommandError> {
        let (address, _) = address_args(args)?;
        self.padawan.set_landmark(kind, address);
        if let Err(e) = self.annotations.set_page(kind, address) {
            warn!("couldn't save the {} landmark: {}", kind, e);
            writeln!(out, "Landmark not saved: {}", e)?;
        }
        Ok(())
    }

    fn list_modules(&mut self, filter: &str, out: &mut dyn Write) -> Result<(), CommandError> {
        let filter = filter.to_lowercase();
        let memory = self.memory();
        for module in self.modules {
            if !module.short_name().to_lowercase().contains(&filter) {
                continue;
            }
            print_module_details(memory, module, out)?;
            self.symbols.try_load_module(module, &self.symdir);
        }
        writeln!(out)?;
        Ok(())
    }

    fn search(&self, args: &str, out: &mut dyn Write) -> Result<(), CommandError> {
        let memory = self.memory();
        let word = match parse_word(args) {
            Some(word) => word,
            None => {
                writeln!(
                    out,
                    "Malformed word, prefix with '0x' to use hexadecimal format."
                )?;
                return Ok(());
            }
        };
        writeln!(
            out,
            "Searching for word {}/0x{}:",
            word,
            memory.format_pointer(word)
        )?;
        search_word(memory, word, out)?;
        Ok(())
    }

    fn unassemble(&self, args: &str, out: &mut dyn Write) -> Result<(), CommandError> {
        let (start, size) = address_args(args)?;
        if !self.memory().is_valid_address(start) {
            writeln!(out, "{}", NOT_IN_DUMP)?;
            return Ok(());
        }
        for line in self.inspector().disasm_lines(start, size.unwrap_or(0x20)) {
            writeln!(out, "{}", line)?;
        }
        writeln!(out)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::Arch;
    use crate::disasm::{DisasmError, DisasmLine};
    use crate::heap::constants;
    use crate::heap::testing::FakeMemory;
    use crate::heap::HeapModel;

    const BASE: u64 = 0x40000;

    struct Nops;

    impl Disassembler for Nops {
        fn disassemble(&self, code: &[u8], _arch: Arch, _flags: &[&str]) -> Result<Vec<DisasmLine>, DisasmError> {
            Ok((0..code.len() as u64).map(|i| (i, "90\tnop".to_owned())).collect())
        }
    }

    fn memory() -> FakeMemory {
        let mut m = FakeMemory::new(Arch::X86, BASE, 0x1000);
        m.put_map(BASE, BASE, constants::MAP_TYPE);
        m.put_map(BASE + 0x100, BASE, constants::ONE_BYTE_STRING_TYPE);
        m.put_string(BASE + 0x400, BASE + 0x101, "Hi");
        m.put_bytes(BASE + 0x800, b"grok\x80");
        m
    }

    fn run(shell: &mut Shell<'_, '_>, line: &str) -> String {
        let mut out = vec![];
        assert!(shell.run_command(line, &mut out).unwrap());
        String::from_utf8(out).unwrap()
    }

    macro_rules! with_shell {
        ($shell:ident, $body:block) => {
            with_shell!($shell, AnnotationStore::in_memory(), $body)
        };
        ($shell:ident, $annotations:expr, $body:block) => {
            let m = memory();
            let heap = HeapModel::new(&m);
            #[allow(unused_mut)]
            let mut $shell = Shell::new(
                Padawan::new(&heap),
                &[],
                $annotations,
                SymbolTable::new(),
                &Nops,
                HashSet::new(),
                &Options::default(),
            );
            $body
        };
    }

    #[test]
    fn test_bad_input_keeps_going() {
        with_shell!(shell, {
            assert_eq!(run(&mut shell, "frobnicate 1"), "*** Unknown syntax: frobnicate 1\n");
            assert_eq!(run(&mut shell, "do"), "error: missing address argument\n");
            assert_eq!(run(&mut shell, "dd xyz"), "error: malformed hex value `xyz`\n");
            assert_eq!(run(&mut shell, "   "), "");
            let mut out = vec![];
            assert!(!shell.run_command("quit", &mut out).unwrap());
        });
    }

    #[test]
    fn test_dump_ascii() {
        with_shell!(shell, {
            assert_eq!(run(&mut shell, "da 0x40800"), "grok\n\n");
            assert_eq!(
                run(&mut shell, "da 40804"),
                "Not an ASCII string at 00040804\n"
            );
        });
    }

    #[test]
    fn test_dump_words() {
        with_shell!(shell, {
            shell.annotations.set_comment(BASE + 0x404, "hash").unwrap();
            assert_eq!(
                run(&mut shell, "dd 40400 2"),
                "00040400: 00040101 HeapObject(00040100, MAP_TYPE)\n\
00040404: 00000000  ; hash\n"
            );
            assert_eq!(
                run(&mut shell, "dd 40ffc 2"),
                "00040ffc: 00000000 \nAddress is not contained within the minidump!\n"
            );
            assert!(run(&mut shell, "dd 40401 1")
                .starts_with("Warning: Dumping un-aligned memory"));
        });
    }

    #[test]
    fn test_dump_object() {
        with_shell!(shell, {
            assert_eq!(run(&mut shell, "do 40400"), "\"Hi\"\n");
            assert_eq!(run(&mut shell, "do 40401"), "\"Hi\"\n");
            assert_eq!(
                run(&mut shell, "do 40402"),
                "Address doesn't look like a valid pointer!\n"
            );
            assert_eq!(
                run(&mut shell, "do 90000"),
                "Address cannot be interpreted as object!\n"
            );
        });
    }

    #[test]
    fn test_landmarks() {
        with_shell!(shell, {
            run(&mut shell, "km 0x8123456");
            assert_eq!(shell.padawan().landmarks().map_page, 0x0810_0000);
            assert_eq!(shell.annotations().landmarks().map_page, 0x0810_0000);
            assert!(run(&mut shell, "k").starts_with("  known_first_map_page = 08100000\n"));
            assert_eq!(run(&mut shell, "dp 40000"), "Page header is not available!\n");
        });
    }

    #[test]
    fn test_unsaved_annotations() {
        let dir = tempfile::tempdir().unwrap();
        let dump = dir.path().join("missing").join("crash.dmp");
        with_shell!(shell, AnnotationStore::for_dump(&dump), {
            assert!(run(&mut shell, "km 0x8123456").starts_with("Landmark not saved: "));
            // The session still knows the page; only the sidecar is behind.
            assert_eq!(shell.padawan().landmarks().map_page, 0x0810_0000);
            assert_eq!(shell.annotations().landmarks().map_page, 0);
            assert!(run(&mut shell, "c 40400 hash").starts_with("Comment not saved: "));
            assert_eq!(shell.annotations().comment(0x40400), None);
        });
    }

    #[test]
    fn test_search_and_unassemble() {
        with_shell!(shell, {
            assert_eq!(
                run(&mut shell, "s nope"),
                "Malformed word, prefix with '0x' to use hexadecimal format.\n"
            );
            assert_eq!(
                run(&mut shell, "s 0x40101"),
                "Searching for word 262401/0x00040101:\n00040400: 00040101\n"
            );
            assert_eq!(
                run(&mut shell, "u 40000 2"),
                "  00040000 00000000: 90\tnop\n  00040001 00000001: 90\tnop\n\n"
            );
            assert_eq!(
                run(&mut shell, "u 1000"),
                "Address is not contained within the minidump!\n"
            );
        });
    }
}
