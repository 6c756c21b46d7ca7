//! Address space resolution over the memory ranges captured in a dump.

use grokdump_common::format as md;
use scroll::{Pread, LE};
use std::fmt;

use crate::context::Arch;

/// A contiguous range of process memory whose contents are in the dump.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemoryRange {
    /// The virtual address of the first byte.
    pub start: u64,
    pub size: u64,
    /// Where the contents live in the dump file.
    pub file_offset: u64,
}

impl MemoryRange {
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.size)
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address - self.start < self.size
    }
}

/// The virtual address space covered by a dump's memory list streams.
///
/// `MINIDUMP_MEMORY64_LIST` ranges are searched before `MINIDUMP_MEMORY_LIST` ranges. The
/// first range containing an address wins.
#[derive(Clone, Debug, Default)]
pub struct AddressSpace {
    ranges64: Vec<MemoryRange>,
    ranges32: Vec<MemoryRange>,
}

impl AddressSpace {
    /// Add the ranges of a `MINIDUMP_MEMORY64_LIST`.
    ///
    /// All of their contents are stored back to back starting at `base_rva`.
    pub fn add_memory64(&mut self, base_rva: u64, descriptors: &[md::MINIDUMP_MEMORY_DESCRIPTOR64]) {
        let mut file_offset = base_rva;
        for desc in descriptors {
            self.ranges64.push(MemoryRange {
                start: desc.start_of_memory_range,
                size: desc.data_size,
                file_offset,
            });
            file_offset = file_offset.saturating_add(desc.data_size);
        }
    }

    /// Add the ranges of a `MINIDUMP_MEMORY_LIST`.
    pub fn add_memory(&mut self, descriptors: &[md::MINIDUMP_MEMORY_DESCRIPTOR]) {
        for desc in descriptors {
            self.ranges32.push(MemoryRange {
                start: desc.start_of_memory_range,
                size: desc.memory.data_size as u64,
                file_offset: desc.memory.rva as u64,
            });
        }
    }

    /// Whether the dump carries a 32-bit memory list, which only full-memory dumps lack.
    pub fn has_partial_memory(&self) -> bool {
        !self.ranges32.is_empty()
    }

    /// Every range, 64-bit ranges first.
    pub fn regions(&self) -> impl Iterator<Item = &MemoryRange> + '_ {
        self.ranges64.iter().chain(self.ranges32.iter())
    }

    /// Call `f(start, size, file_offset)` for every range, 64-bit ranges first.
    pub fn for_each_region<F>(&self, mut f: F)
    where
        F: FnMut(u64, u64, u64),
    {
        for r in self.regions() {
            f(r.start, r.size, r.file_offset)
        }
    }

    fn range_for(&self, address: u64) -> Option<&MemoryRange> {
        self.regions().find(|r| r.contains(address))
    }

    /// The file offset holding the byte at `address`.
    pub fn resolve(&self, address: u64) -> Option<u64> {
        self.range_for(address)
            .map(|r| r.file_offset + (address - r.start))
    }

    /// The `(start, size)` of the range containing `address`.
    pub fn find_region(&self, address: u64) -> Option<(u64, u64)> {
        self.range_for(address).map(|r| (r.start, r.size))
    }
}

/// A three-way answer from a heuristic.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Yes,
    No,
    Maybe,
}

/// Thresholds for guessing whether a block of memory is text or machine code.
///
/// These only choose which rendering a full dump shows by default.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Heuristics {
    /// ASCII bytes must outnumber other bytes by this factor for a definite yes.
    pub ascii_yes_ratio: usize,
    /// ASCII bytes must outnumber other bytes by this factor for a maybe.
    pub ascii_maybe_ratio: usize,
    /// Below this percentage of ASCII bytes the answer is always no.
    pub ascii_min_percent: usize,
    /// Percentage of common x86 opcode bytes around which code is assumed.
    pub code_threshold_percent: usize,
    /// Distance from `code_threshold_percent` that still counts as maybe.
    pub code_margin_percent: usize,
}

impl Default for Heuristics {
    fn default() -> Heuristics {
        Heuristics {
            ascii_yes_ratio: 7,
            ascii_maybe_ratio: 3,
            ascii_min_percent: 10,
            code_threshold_percent: 20,
            code_margin_percent: 2,
        }
    }
}

impl Heuristics {
    pub fn looks_like_ascii(&self, bytes: &[u8]) -> Verdict {
        let mut ascii = 0;
        let mut other = 0;
        for &b in bytes {
            if b >= 0x7f {
                other += 1;
            }
            if b < 0x20 && b != 0 {
                other += 1;
            }
            if (0x20..0x7f).contains(&b) {
                ascii += 1;
            }
            if b == b'\n' {
                ascii += 1;
            }
        }
        if ascii * 100 <= bytes.len() * self.ascii_min_percent {
            return Verdict::No;
        }
        if ascii > other * self.ascii_yes_ratio {
            return Verdict::Yes;
        }
        if ascii > other * self.ascii_maybe_ratio {
            return Verdict::Maybe;
        }
        Verdict::No
    }

    pub fn looks_like_code(&self, bytes: &[u8], arch: Arch) -> Verdict {
        if bytes.is_empty() {
            return Verdict::No;
        }
        let rex = arch == Arch::Amd64;
        let opcodes = bytes
            .iter()
            .filter(|&&b| match b {
                // mov, test, conditional and unconditional jumps, call, ret
                0x8b | 0x89 | 0xc3 | 0x74 | 0x75 | 0x84 | 0x85 | 0xe8 | 0xe9 | 0xeb => true,
                // push/pop
                0x50..=0x5f => true,
                0x40..=0x4f => rex,
                _ => false,
            })
            .count();
        let percent = opcodes * 100 / bytes.len();
        if percent > self.code_threshold_percent + self.code_margin_percent {
            Verdict::Yes
        } else if percent > self.code_threshold_percent.saturating_sub(self.code_margin_percent) {
            Verdict::Maybe
        } else {
            Verdict::No
        }
    }
}

/// Read access to the memory captured in a dump.
///
/// Implementors supply the raw file bytes, the address space and the architecture. All
/// reads are bounded by the range containing the start address and return `None` instead of
/// failing.
pub trait ReadMemory {
    fn arch(&self) -> Arch;
    fn address_space(&self) -> &AddressSpace;
    /// The whole dump file.
    fn raw_bytes(&self) -> &[u8];

    fn pointer_size(&self) -> usize {
        self.arch().pointer_size()
    }

    fn is_valid_address(&self, address: u64) -> bool {
        self.address_space().resolve(address).is_some()
    }

    fn find_region(&self, address: u64) -> Option<(u64, u64)> {
        self.address_space().find_region(address)
    }

    /// `len` bytes starting at `address`, if they are all inside one range.
    fn read_bytes(&self, address: u64, len: usize) -> Option<&[u8]> {
        let (start, size) = self.find_region(address)?;
        let end = address.checked_add(len as u64)?;
        if end > start.saturating_add(size) {
            return None;
        }
        let offset = self.address_space().resolve(address)? as usize;
        self.raw_bytes().get(offset..offset.checked_add(len)?)
    }

    fn read_u8(&self, address: u64) -> Option<u8> {
        self.read_bytes(address, 1)?.pread_with(0, LE).ok()
    }

    fn read_u16(&self, address: u64) -> Option<u16> {
        self.read_bytes(address, 2)?.pread_with(0, LE).ok()
    }

    fn read_u32(&self, address: u64) -> Option<u32> {
        self.read_bytes(address, 4)?.pread_with(0, LE).ok()
    }

    fn read_u64(&self, address: u64) -> Option<u64> {
        self.read_bytes(address, 8)?.pread_with(0, LE).ok()
    }

    /// Read a machine word.
    fn read_pointer(&self, address: u64) -> Option<u64> {
        match self.pointer_size() {
            8 => self.read_u64(address),
            _ => self.read_u32(address).map(u64::from),
        }
    }

    /// Render `value` as a zero-padded pointer-width hex number.
    fn format_pointer(&self, value: u64) -> String {
        format!("{:0width$x}", value, width = self.pointer_size() * 2)
    }

    /// Every address holding the machine word `word`, as `(aligned, unaligned)`.
    fn find_word_list(&self, word: u64) -> (Vec<u64>, Vec<u64>) {
        let ptr = self.pointer_size();
        let mut aligned = vec![];
        let mut unaligned = vec![];
        for r in self.address_space().regions() {
            let bytes = match self
                .raw_bytes()
                .get(r.file_offset as usize..r.file_offset.saturating_add(r.size) as usize)
            {
                Some(b) => b,
                None => continue,
            };
            for (i, window) in bytes.windows(ptr).enumerate() {
                let value = match ptr {
                    8 => window.pread_with::<u64>(0, LE).ok(),
                    _ => window.pread_with::<u32>(0, LE).ok().map(u64::from),
                };
                if value == Some(word) {
                    let slot = r.start + i as u64;
                    if slot % ptr as u64 == 0 {
                        aligned.push(slot);
                    } else {
                        unaligned.push(slot);
                    }
                }
            }
        }
        (aligned, unaligned)
    }
}

/// A formatted pointer, or a marker for addresses outside the dump.
pub struct Pointer<'a, M: ReadMemory + ?Sized>(pub &'a M, pub Option<u64>);

impl<M: ReadMemory + ?Sized> fmt::Display for Pointer<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.1 {
            Some(v) => f.write_str(&self.0.format_pointer(v)),
            None => f.write_str("not in dump"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Flat {
        bytes: Vec<u8>,
        space: AddressSpace,
        arch: Arch,
    }

    impl ReadMemory for Flat {
        fn arch(&self) -> Arch {
            self.arch
        }
        fn address_space(&self) -> &AddressSpace {
            &self.space
        }
        fn raw_bytes(&self) -> &[u8] {
            &self.bytes
        }
    }

    fn desc64(start: u64, size: u64) -> md::MINIDUMP_MEMORY_DESCRIPTOR64 {
        md::MINIDUMP_MEMORY_DESCRIPTOR64 {
            start_of_memory_range: start,
            data_size: size,
        }
    }

    fn flat() -> Flat {
        // Two 64-bit ranges stored back to back at offset 0, one 32-bit range at 0x20.
        let mut bytes = vec![0u8; 0x30];
        bytes[0..8].copy_from_slice(&0x1122_3344_5566_7788u64.to_le_bytes());
        bytes[0x11..0x19].copy_from_slice(&0xdead_beef_cafe_f00du64.to_le_bytes());
        let mut space = AddressSpace::default();
        space.add_memory64(0, &[desc64(0x1000, 0x10), desc64(0x8000, 0x10)]);
        space.add_memory(&[md::MINIDUMP_MEMORY_DESCRIPTOR {
            start_of_memory_range: 0x4000,
            memory: md::MINIDUMP_LOCATION_DESCRIPTOR {
                data_size: 0x10,
                rva: 0x20,
            },
        }]);
        Flat {
            bytes,
            space,
            arch: Arch::Amd64,
        }
    }

    #[test]
    fn test_resolve() {
        let m = flat();
        assert_eq!(m.space.resolve(0x1000), Some(0));
        assert_eq!(m.space.resolve(0x100f), Some(0xf));
        assert_eq!(m.space.resolve(0x1010), None);
        assert_eq!(m.space.resolve(0x8004), Some(0x14));
        assert_eq!(m.space.resolve(0x4008), Some(0x28));
        assert_eq!(m.space.resolve(0), None);
        assert_eq!(m.space.find_region(0x8008), Some((0x8000, 0x10)));
        assert_eq!(m.space.find_region(0x9000), None);
        assert!(m.space.has_partial_memory());
    }

    #[test]
    fn test_region_order() {
        let m = flat();
        let mut seen = vec![];
        m.space.for_each_region(|start, size, off| seen.push((start, size, off)));
        assert_eq!(
            seen,
            vec![(0x1000, 0x10, 0), (0x8000, 0x10, 0x10), (0x4000, 0x10, 0x20)]
        );
    }

    #[test]
    fn test_reads() {
        let m = flat();
        assert_eq!(m.read_u64(0x1000), Some(0x1122_3344_5566_7788));
        assert_eq!(m.read_u32(0x1000), Some(0x5566_7788));
        assert_eq!(m.read_u8(0x1007), Some(0x11));
        assert_eq!(m.read_pointer(0x1000), Some(0x1122_3344_5566_7788));
        // Reads may not run off the end of a range, even into the next one in the file.
        assert_eq!(m.read_u64(0x100c), None);
        assert_eq!(m.read_u8(0x2000), None);
        assert!(!m.is_valid_address(0x2000));
        assert_eq!(m.format_pointer(0x10), "0000000000000010");
        assert_eq!(Pointer(&m, None).to_string(), "not in dump");
    }

    #[test]
    fn test_find_word_list() {
        let m = flat();
        let (aligned, unaligned) = m.find_word_list(0x1122_3344_5566_7788);
        assert_eq!(aligned, vec![0x1000]);
        assert!(unaligned.is_empty());
        let (aligned, unaligned) = m.find_word_list(0xdead_beef_cafe_f00d);
        assert!(aligned.is_empty());
        assert_eq!(unaligned, vec![0x8001]);
    }

    #[test]
    fn test_ascii_heuristic() {
        let h = Heuristics::default();
        assert_eq!(h.looks_like_ascii(b"hello world, this is text\n"), Verdict::Yes);
        assert_eq!(h.looks_like_ascii(&[0u8; 32]), Verdict::No);
        assert_eq!(h.looks_like_ascii(&[0xffu8; 32]), Verdict::No);
        // 8 ascii, 2 non-ascii: more than 3x but not more than 7x.
        assert_eq!(h.looks_like_ascii(b"abcdefgh\xff\xff"), Verdict::Maybe);
    }

    #[test]
    fn test_code_heuristic() {
        let h = Heuristics::default();
        let prologue = [0x55, 0x48, 0x89, 0xe5, 0x48, 0x8b, 0x45, 0x10, 0xc3, 0x00];
        assert_eq!(h.looks_like_code(&prologue, Arch::Amd64), Verdict::Yes);
        assert_eq!(h.looks_like_code(&[0u8; 64], Arch::Amd64), Verdict::No);
        assert_eq!(h.looks_like_code(&[], Arch::X86), Verdict::No);
        // 19% opcode bytes is a maybe.
        let mut bytes = vec![0u8; 100];
        for b in bytes.iter_mut().take(19) {
            *b = 0xe8;
        }
        assert_eq!(h.looks_like_code(&bytes, Arch::X86), Verdict::Maybe);
        // REX prefixes only count on x64.
        let rex = [0x48u8; 10];
        assert_eq!(h.looks_like_code(&rex, Arch::X86), Verdict::No);
        assert_eq!(h.looks_like_code(&rex, Arch::Amd64), Verdict::Yes);
    }
}
