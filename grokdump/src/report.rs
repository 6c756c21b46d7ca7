// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Human-readable reports over a dump.
//!
//! [`analyze_minidump`] prints the crash summary, the disassembly around the crashing
//! instruction and, depending on [`Options`], a full dump of every memory region, the
//! output of one shell command, an interactive [`Shell`] session or an annotated stack.
//! [`Inspector`] holds the views those reports (and the shell) are built from.

use regex::Regex;
use std::collections::HashSet;
use std::io::{self, Write};
use std::ops::Deref;
use std::sync::OnceLock;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

use grokdump_common::traits::Module;

use crate::annotations::AnnotationStore;
use crate::context::Arch;
use crate::disasm::{get_disasm_lines, DisasmLine, Disassembler};
use crate::dump::{DumpFile, Error, MinidumpException, MinidumpModule, MinidumpThread};
use crate::heap::{CodeRenderer, HeapAccess, HeapModel, HeapObject};
use crate::memory::{Heuristics, Pointer, ReadMemory, Verdict};
use crate::options::Options;
use crate::padawan::Padawan;
use crate::printer::Printer;
use crate::shell::Shell;
use crate::symbols::SymbolTable;

/// Bytes of code shown on either side of the crashing instruction.
pub const EIP_PROXIMITY: u64 = 64;

/// Errors that stop a report.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error(transparent)]
    Dump(#[from] Error),
    #[error("couldn't write the report")]
    Io(#[from] io::Error),
    #[error("line editor failed")]
    Readline(#[from] rustyline::error::ReadlineError),
}

fn address_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"0x[0-9a-fA-F]+").unwrap())
}

/// The values found on the stack between `stack_pointer` and `stack_end`, plus the
/// instruction pointer. Disassembly lines at these addresses are marked.
pub fn stack_map(
    memory: &dyn ReadMemory,
    instruction_pointer: Option<u64>,
    stack_pointer: u64,
    stack_end: u64,
) -> HashSet<u64> {
    let ptr = memory.pointer_size();
    let mut map: HashSet<u64> = instruction_pointer.into_iter().collect();
    map.extend(
        (stack_pointer..stack_end)
            .step_by(ptr)
            .filter_map(|slot| memory.read_pointer(slot)),
    );
    map
}

/// Rewrite the target of an x86 relative `call`.
///
/// objdump adds the call displacement to the offset within its input instead of the
/// instruction's real address, so the printed target is wrong for code lifted out of a
/// dump.
pub fn fix_x86_call_target(code: &str, line_address: u64) -> Option<String> {
    if !code.starts_with("e8") {
        return None;
    }
    let words: Vec<&str> = code.split_whitespace().collect();
    if words.len() <= 6 || words[5] != "call" {
        return None;
    }
    let displacement = format!("{}{}{}{}", words[4], words[3], words[2], words[1]);
    let displacement = u64::from_str_radix(&displacement, 16).ok()?;
    let target = line_address.wrapping_add(displacement).wrapping_add(5) & 0xffff_ffff;
    Some(code.replace(words[6], &format!("0x{:08x}", target)))
}

/// Render a stack word's bytes, with `.` for anything unprintable.
pub fn ascii_word(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '.' })
        .collect()
}

/// One line of `hd`-style output for up to 16 bytes at `address`.
pub fn hex_dump_line(memory: &dyn ReadMemory, address: u64, bytes: &[u8]) -> String {
    let mut hex = String::new();
    for i in 0..16 {
        match bytes.get(i) {
            Some(b) => hex.push_str(&format!(" {:02x}", b)),
            None => hex.push_str("   "),
        }
        if i == 7 {
            hex.push(' ');
        }
    }
    format!(
        "{}  {} |{}|",
        memory.format_pointer(address),
        hex,
        ascii_word(&bytes[..bytes.len().min(16)])
    )
}

pub fn print_module_details(
    memory: &dyn ReadMemory,
    module: &MinidumpModule,
    out: &mut dyn Write,
) -> io::Result<()> {
    let timestamp = time::OffsetDateTime::from_unix_timestamp(module.timestamp() as i64)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_default();
    writeln!(out, "{}", module.short_name())?;
    writeln!(out, "  base: {}", memory.format_pointer(module.base_address()))?;
    writeln!(
        out,
        "  end: {}",
        memory.format_pointer(module.base_address() + module.size())
    )?;
    writeln!(out, "  file version: {}", module.file_version())?;
    writeln!(out, "  product version: {}", module.product_version())?;
    writeln!(out, "  timestamp: {}", timestamp)
}

pub fn list_regions(memory: &dyn ReadMemory, out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "Available memory regions:")?;
    for r in memory.address_space().regions() {
        writeln!(
            out,
            "  {} - {} ({} bytes)",
            memory.format_pointer(r.start),
            memory.format_pointer(r.end()),
            r.size
        )?;
    }
    Ok(())
}

/// Print every address holding `word`, aligned hits first.
pub fn search_word(memory: &dyn ReadMemory, word: u64, out: &mut dyn Write) -> io::Result<()> {
    let (aligned, unaligned) = memory.find_word_list(word);
    for slot in aligned.into_iter().chain(unaligned) {
        writeln!(
            out,
            "{}: {}",
            memory.format_pointer(slot),
            memory.format_pointer(word)
        )?;
    }
    Ok(())
}

/// Views over dump memory that annotate what they show with heap objects and symbols.
pub struct Inspector<'i> {
    heap: &'i dyn HeapAccess,
    symbols: &'i SymbolTable,
    disassembler: &'i dyn Disassembler,
    stack_map: &'i HashSet<u64>,
    heuristics: Heuristics,
}

impl<'i> Inspector<'i> {
    pub fn new(
        heap: &'i dyn HeapAccess,
        symbols: &'i SymbolTable,
        disassembler: &'i dyn Disassembler,
        stack_map: &'i HashSet<u64>,
    ) -> Inspector<'i> {
        Inspector {
            heap,
            symbols,
            disassembler,
            stack_map,
            heuristics: Heuristics::default(),
        }
    }

    pub fn with_heuristics(self, heuristics: Heuristics) -> Inspector<'i> {
        Inspector { heuristics, ..self }
    }

    fn memory(&self) -> &'i dyn ReadMemory {
        self.heap.memory()
    }

    /// Append the short form of every heap object a hex literal in `line` points to.
    pub fn annotate_addresses(&self, line: &str) -> String {
        let extra: Vec<String> = address_re()
            .find_iter(line)
            .filter_map(|m| {
                let value = u64::from_str_radix(&m.as_str()[2..], 16).ok()?;
                let object = self.heap.find_object(value);
                object.as_object().map(|o| o.to_string())
            })
            .collect();
        if extra.is_empty() {
            line.to_owned()
        } else {
            format!("{}  ;; {}", line, extra.join(", "))
        }
    }

    /// Format one instruction from a listing that starts at `start`.
    pub fn format_disasm_line(&self, start: u64, line: &DisasmLine) -> String {
        let (offset, text) = line;
        let line_address = start.wrapping_add(*offset);
        let marker = if self.stack_map.contains(&line_address) {
            "=>"
        } else {
            "  "
        };
        let mut code = self.annotate_addresses(text);
        // Only x86 call targets are recovered.
        if self.heap.arch() == Arch::X86 {
            if let Some(fixed) = fix_x86_call_target(&code, line_address) {
                code = fixed;
            }
        }
        format!("{}{:08x} {:08x}: {}", marker, line_address, offset, code)
    }

    /// Disassemble and format `size` bytes at `address`.
    pub fn disasm_lines(&self, address: u64, size: u64) -> Vec<String> {
        get_disasm_lines(self.disassembler, self.memory(), address, size)
            .iter()
            .map(|line| self.format_disasm_line(address, line))
            .collect()
    }

    /// Print the long form of `object`.
    pub fn print_object(&self, object: &HeapObject, out: &mut dyn Write) -> io::Result<()> {
        let mut p = Printer::new(out);
        object.print(self.heap, self, &mut p)
    }

    pub fn print_disassembly_around(
        &self,
        instruction_pointer: u64,
        full: bool,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        writeln!(out, "Disassembly around exception.eip:")?;
        if let Some(symbol) = self.symbols.find_symbol(instruction_pointer) {
            writeln!(out, "{}", symbol)?;
        }
        let mut start = instruction_pointer.wrapping_sub(EIP_PROXIMITY);
        let mut size = 2 * EIP_PROXIMITY;
        if full {
            if let Some(region) = self.memory().find_region(instruction_pointer) {
                start = region.0;
                size = region.1;
            }
        }
        for line in self.disasm_lines(start, size) {
            writeln!(out, "{}", line)?;
        }
        writeln!(out)
    }

    /// Dump one memory region, picking renderings by what its contents look like.
    pub fn print_region(&self, start: u64, size: u64, out: &mut dyn Write) -> io::Result<()> {
        let memory = self.memory();
        writeln!(out)?;
        let skip = start.wrapping_neg() & 3;
        let start = start + skip;
        let size = size.saturating_sub(skip);
        let bytes = memory.read_bytes(start, size as usize).unwrap_or(&[]);
        let is_code = self.heuristics.looks_like_code(bytes, memory.arch());
        let is_ascii = self.heuristics.looks_like_ascii(bytes);
        debug!(
            "region {:#x}+{:#x}: code {:?}, ascii {:?}",
            start, size, is_code, is_ascii
        );

        if is_code != Verdict::No {
            for line in self.disasm_lines(start, size) {
                writeln!(out, "{}", line)?;
            }
            writeln!(out)?;
        }

        if is_ascii != Verdict::No {
            for (i, chunk) in bytes.chunks(16).enumerate() {
                let line = hex_dump_line(memory, start + 16 * i as u64, chunk);
                writeln!(out, "{}", line)?;
            }
        }

        if is_code != Verdict::Yes && is_ascii != Verdict::Yes {
            writeln!(
                out,
                "{} - {}",
                memory.format_pointer(start),
                memory.format_pointer(start + size)
            )?;
            for slot in (start..start + size).step_by(memory.pointer_size()) {
                let value = memory.read_pointer(slot);
                writeln!(out, "{}: {}", memory.format_pointer(slot), Pointer(memory, value))?;
                if let Some(value) = value {
                    if let Some(object) = self.heap.find_object(value).as_object() {
                        self.print_object(object, out)?;
                        writeln!(out)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Dump every memory region in the dump.
    pub fn full_dump(&self, out: &mut dyn Write) -> io::Result<()> {
        let regions: Vec<(u64, u64)> = self
            .memory()
            .address_space()
            .regions()
            .map(|r| (r.start, r.size))
            .collect();
        for (start, size) in regions {
            self.print_region(start, size, out)?;
        }
        Ok(())
    }

    /// Print every stack slot from `stack_pointer` up to `stack_end`, following the frame
    /// pointer chain.
    pub fn print_annotated_stack(
        &self,
        stack_pointer: u64,
        stack_end: u64,
        frame_pointer: Option<u64>,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        let memory = self.memory();
        let ptr = memory.pointer_size();
        let mut frame_pointer = frame_pointer;
        writeln!(out, "Annotated stack (from exception.esp to bottom):")?;
        for slot in (stack_pointer..stack_end).step_by(ptr) {
            let ascii = memory.read_bytes(slot, ptr).map(ascii_word).unwrap_or_default();
            let value = memory.read_pointer(slot);
            let object = value.and_then(|v| self.heap.find_object(v).as_object().cloned());
            let mut symbol = value.and_then(|v| self.symbols.find_symbol(v));
            if frame_pointer == Some(slot) {
                symbol = Some("<---- frame pointer".to_owned());
                frame_pointer = value;
            }
            writeln!(
                out,
                "{}: {} {} {}",
                memory.format_pointer(slot),
                Pointer(memory, value),
                ascii,
                symbol.unwrap_or_default()
            )?;
            if let Some(object) = object {
                self.print_object(&object, out)?;
                writeln!(out)?;
            }
        }
        Ok(())
    }
}

impl CodeRenderer for Inspector<'_> {
    fn render_code(&self, entry: u64, size: u64) -> Vec<String> {
        self.disasm_lines(entry, size)
    }
}

fn print_exception<T>(
    dump: &DumpFile<T>,
    exception: &MinidumpException,
    thread: &MinidumpThread,
    options: &Options,
    symbols: &mut SymbolTable,
    out: &mut dyn Write,
) -> io::Result<()>
where
    T: Deref<Target = [u8]>,
{
    writeln!(out, "Exception info:")?;
    writeln!(out, "  thread id: {}", thread.id())?;
    writeln!(out, "  code: {:08X}", exception.code)?;
    writeln!(out, "  context:")?;
    exception.context.print(out)?;
    writeln!(out)?;
    writeln!(out, "  modules:")?;
    for module in &dump.modules {
        let name = module.short_name();
        if options.is_known_module(&name) {
            writeln!(out, "    {} at {:08X}", name, module.base_address())?;
            symbols.try_load_module(module, &options.symdir);
        }
    }
    writeln!(out)
}

/// Print the report for `dump` to `out`.
///
/// Landmarks and comments come from `annotations`, which the shell also appends to.
pub fn analyze_minidump<T>(
    dump: &DumpFile<T>,
    options: &Options,
    annotations: AnnotationStore,
    disassembler: &dyn Disassembler,
    out: &mut dyn Write,
) -> Result<(), ReportError>
where
    T: Deref<Target = [u8]>,
{
    let heap = HeapModel::new(dump);
    let mut symbols = SymbolTable::new();
    let mut stack = None;
    let mut stack_slots = HashSet::new();
    let mut instruction_pointer = None;

    match dump.exception.as_ref().zip(dump.exception_thread()?) {
        None => writeln!(out, "Minidump has no exception info")?,
        Some((exception, thread)) => {
            print_exception(dump, exception, thread, options, &mut symbols, out)?;
            let context = &exception.context;
            instruction_pointer = context.instruction_pointer();
            if let Some(stack_pointer) = context.stack_pointer() {
                stack_slots = stack_map(
                    dump,
                    instruction_pointer,
                    stack_pointer,
                    thread.stack_end(),
                );
                stack = Some((stack_pointer, thread.stack_end(), context.frame_pointer()));
            }
        }
    }

    let padawan = Padawan::with_landmarks(&heap, annotations.landmarks());
    let mut shell = Shell::new(
        padawan,
        &dump.modules,
        annotations,
        symbols,
        disassembler,
        stack_slots,
        options,
    );

    if let Some(ip) = instruction_pointer {
        shell
            .inspector()
            .print_disassembly_around(ip, options.full, out)?;
    }
    if options.full {
        dump.print(out)?;
        shell.inspector().full_dump(out)?;
    }
    if let Some(command) = &options.command {
        shell.run_command(command, out)?;
    }
    if options.shell {
        shell.run(out)?;
    } else if options.command.is_none() {
        if let Some((stack_pointer, stack_end, frame_pointer)) = stack {
            shell
                .inspector()
                .print_annotated_stack(stack_pointer, stack_end, frame_pointer, out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::disasm::DisasmError;
    use crate::heap::constants;
    use crate::heap::testing::FakeMemory;

    struct Listing(Vec<DisasmLine>);

    impl Disassembler for Listing {
        fn disassemble(&self, _code: &[u8], _arch: Arch, _flags: &[&str]) -> Result<Vec<DisasmLine>, DisasmError> {
            Ok(self.0.clone())
        }
    }

    fn output<F>(f: F) -> String
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()>,
    {
        let mut out = vec![];
        f(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_fix_x86_call_target() {
        assert_eq!(
            fix_x86_call_target("e8 fc ff ff ff       \tcall   0x4", 0x1003).as_deref(),
            Some("e8 fc ff ff ff       \tcall   0x00001004")
        );
        assert_eq!(fix_x86_call_target("90\tnop", 0x1000), None);
        assert_eq!(fix_x86_call_target("e8 00 00", 0x1000), None);
    }

    #[test]
    fn test_format_disasm_line() {
        let base = 0x40000;
        let mut m = FakeMemory::new(Arch::X86, base, 0x1000);
        m.put_map(base, base, constants::MAP_TYPE);
        m.put_map(base + 0x100, base, constants::ONE_BYTE_STRING_TYPE);
        m.put_string(base + 0x400, base + 0x101, "Hi");
        let heap = HeapModel::new(&m);
        let symbols = SymbolTable::new();
        let disassembler = Listing(vec![]);
        let stack: HashSet<u64> = vec![base + 0x10].into_iter().collect();
        let inspector = Inspector::new(&heap, &symbols, &disassembler, &stack);

        assert_eq!(
            inspector.format_disasm_line(base, &(0x10, "b8 01 04 04 00\tmov eax,0x40401".to_owned())),
            "=>00040010 00000010: b8 01 04 04 00\tmov eax,0x40401  ;; \"Hi\""
        );
        assert_eq!(
            inspector.format_disasm_line(base, &(0x15, "90\tnop".to_owned())),
            "  00040015 00000015: 90\tnop"
        );
        // Calls are retargeted to the real instruction address.
        assert_eq!(
            inspector.format_disasm_line(base, &(3, "e8 fc ff ff ff\tcall 0x4".to_owned())),
            "  00040003 00000003: e8 fc ff ff ff\tcall 0x00040004"
        );
    }

    #[test]
    fn test_call_targets_left_alone_on_amd64() {
        let m = FakeMemory::new(Arch::Amd64, 0x1000, 0x10);
        let heap = HeapModel::new(&m);
        let symbols = SymbolTable::new();
        let disassembler = Listing(vec![]);
        let stack = HashSet::new();
        let inspector = Inspector::new(&heap, &symbols, &disassembler, &stack);
        assert_eq!(
            inspector.format_disasm_line(0x1000, &(0, "e8 fc ff ff ff\tcall 0x4".to_owned())),
            "  00001000 00000000: e8 fc ff ff ff\tcall 0x4"
        );
    }

    #[test]
    fn test_stack_map() {
        let mut m = FakeMemory::new(Arch::X86, 0x1000, 0x10);
        m.put_u32(0x1000, 0xaaaa);
        m.put_u32(0x100c, 0xbbbb);
        let map = stack_map(&m, Some(0x4242), 0x1000, 0x1010);
        let mut values: Vec<u64> = map.into_iter().collect();
        values.sort_unstable();
        assert_eq!(values, vec![0, 0x4242, 0xaaaa, 0xbbbb]);
    }

    #[test]
    fn test_hex_dump_line() {
        let m = FakeMemory::new(Arch::X86, 0x2000, 0x10);
        assert_eq!(
            hex_dump_line(&m, 0x2000, b"ABCDEFGHIJ"),
            format!(
                "00002000   41 42 43 44 45 46 47 48  49 4a{} |ABCDEFGHIJ|",
                " ".repeat(18)
            )
        );
        assert_eq!(ascii_word(&[0x41, 0x00, 0x7f, 0x20]), "A.. ");
    }

    #[test]
    fn test_word_region() {
        let m = FakeMemory::new(Arch::X86, 0x3000, 8);
        let heap = HeapModel::new(&m);
        let symbols = SymbolTable::new();
        let disassembler = Listing(vec![(0, "should not be used".to_owned())]);
        let stack = HashSet::new();
        let inspector = Inspector::new(&heap, &symbols, &disassembler, &stack);
        assert_eq!(
            output(|out| inspector.full_dump(out)),
            "\n00003000 - 00003008\n00003000: 00000000\n00003004: 00000000\n"
        );
    }

    #[test]
    fn test_annotated_stack() {
        let mut m = FakeMemory::new(Arch::X86, 0x1000, 0x10);
        m.put_u32(0x1000, 0x4141_4141);
        m.put_u32(0x1004, 0x1008);
        let heap = HeapModel::new(&m);
        let symbols = SymbolTable::new();
        let disassembler = Listing(vec![]);
        let stack = HashSet::new();
        let inspector = Inspector::new(&heap, &symbols, &disassembler, &stack);
        assert_eq!(
            output(|out| inspector.print_annotated_stack(0x1000, 0x1010, Some(0x1004), out)),
            "Annotated stack (from exception.esp to bottom):\n\
00001000: 41414141 AAAA \n\
00001004: 00001008 .... <---- frame pointer\n\
00001008: 00000000 .... <---- frame pointer\n\
0000100c: 00000000 .... \n"
        );
    }

    #[test]
    fn test_disassembly_around_is_clipped_to_dump() {
        let m = FakeMemory::new(Arch::Amd64, 0x1000, 0x100);
        let heap = HeapModel::new(&m);
        let symbols = SymbolTable::new();
        let disassembler = Listing(vec![(0, "90\tnop".to_owned())]);
        let stack: HashSet<u64> = vec![0x1040].into_iter().collect();
        let inspector = Inspector::new(&heap, &symbols, &disassembler, &stack);
        assert_eq!(
            output(|out| inspector.print_disassembly_around(0x1040, false, out)),
            "Disassembly around exception.eip:\n  00001000 00000000: 90\tnop\n\n"
        );
        // Too close to the start of the region to show anything.
        assert_eq!(
            output(|out| inspector.print_disassembly_around(0x1020, false, out)),
            "Disassembly around exception.eip:\n\n"
        );
        assert_eq!(
            output(|out| inspector.print_disassembly_around(0x1020, true, out)),
            "Disassembly around exception.eip:\n  00001000 00000000: 90\tnop\n\n"
        );
    }

    #[test]
    fn test_regions_and_search() {
        let mut m = FakeMemory::new(Arch::X86, 0x1000, 0x10);
        m.put_u32(0x1004, 0xdead_beef);
        m.put_bytes(0x1009, &0xdead_beefu32.to_le_bytes());
        assert_eq!(
            output(|out| list_regions(&m, out)),
            "Available memory regions:\n  00001000 - 00001010 (16 bytes)\n"
        );
        assert_eq!(
            output(|out| search_word(&m, 0xdead_beef, out)),
            "00001004: deadbeef\n00001009: deadbeef\n"
        );
    }

    #[test]
    fn test_module_details() {
        let m = FakeMemory::new(Arch::X86, 0x1000, 0x10);
        let module = MinidumpModule::new(0x10000, 0x2000, "c:\\chrome\\chrome.dll");
        assert_eq!(
            output(|out| print_module_details(&m, &module, out)),
            "chrome.dll\n  base: 00010000\n  end: 00012000\n  file version: 0.0.0.0\n  \
product version: 0.0.0.0\n  timestamp: 1970-01-01T00:00:00Z\n"
        );
    }
}
