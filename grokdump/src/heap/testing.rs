//! An in-memory address space for heap tests.

use grokdump_common::format as md;

use crate::context::Arch;
use crate::memory::{AddressSpace, ReadMemory};

/// The Smi encoding of `n`.
pub fn smi(n: u64) -> u64 {
    n << 1
}

/// One zero-filled memory range at `base`.
pub struct FakeMemory {
    arch: Arch,
    base: u64,
    bytes: Vec<u8>,
    space: AddressSpace,
}

impl FakeMemory {
    pub fn new(arch: Arch, base: u64, size: u64) -> FakeMemory {
        let mut space = AddressSpace::default();
        space.add_memory64(
            0,
            &[md::MINIDUMP_MEMORY_DESCRIPTOR64 {
                start_of_memory_range: base,
                data_size: size,
            }],
        );
        FakeMemory {
            arch,
            base,
            bytes: vec![0; size as usize],
            space,
        }
    }

    pub fn put_bytes(&mut self, address: u64, bytes: &[u8]) {
        let offset = (address - self.base) as usize;
        self.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn put_u32(&mut self, address: u64, value: u32) {
        self.put_bytes(address, &value.to_le_bytes());
    }

    pub fn put_word(&mut self, address: u64, value: u64) {
        match self.arch.pointer_size() {
            8 => self.put_bytes(address, &value.to_le_bytes()),
            _ => self.put_u32(address, value as u32),
        }
    }

    /// A map at `address` whose own map is at `meta`.
    pub fn put_map(&mut self, address: u64, meta: u64, instance_type: u8) {
        let ptr = self.arch.pointer_size() as u64;
        self.put_word(address, meta + 1);
        self.put_bytes(address + ptr + 4, &[instance_type]);
    }

    /// A one-byte sequential string at `address`.
    pub fn put_string(&mut self, address: u64, map_tagged: u64, text: &str) {
        let ptr = self.arch.pointer_size() as u64;
        self.put_word(address, map_tagged);
        self.put_word(address + 2 * ptr, smi(text.len() as u64));
        self.put_bytes(address + 3 * ptr, text.as_bytes());
    }
}

impl ReadMemory for FakeMemory {
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
