// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! CPU contexts.

use grokdump_common::format::{ContextFlagsCpu, ProcessorArchitecture};
use grokdump_common::layout::{self, Layout, LayoutError};
use num_traits::FromPrimitive;
use scroll::LE;
use std::fmt;
use std::io::{self, Write};

/// The processor architectures a dump can be analyzed for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Arch {
    X86,
    Amd64,
    Arm,
}

impl Arch {
    /// Map a `MINIDUMP_SYSTEM_INFO::processor_architecture` value to an `Arch`.
    pub fn from_processor_architecture(raw: u16) -> Option<Arch> {
        match ProcessorArchitecture::from_u16(raw)? {
            ProcessorArchitecture::PROCESSOR_ARCHITECTURE_INTEL => Some(Arch::X86),
            ProcessorArchitecture::PROCESSOR_ARCHITECTURE_AMD64 => Some(Arch::Amd64),
            ProcessorArchitecture::PROCESSOR_ARCHITECTURE_ARM => Some(Arch::Arm),
            _ => None,
        }
    }

    /// The width of a machine word in bytes.
    pub fn pointer_size(self) -> usize {
        match self {
            Arch::Amd64 => 8,
            Arch::X86 | Arch::Arm => 4,
        }
    }

    /// The context record layout for this architecture.
    pub fn context_layout(self) -> &'static Layout {
        match self {
            Arch::X86 => &layout::CONTEXT_X86,
            Arch::Amd64 => &layout::CONTEXT_AMD64,
            Arch::Arm => &layout::CONTEXT_ARM,
        }
    }

    /// The context flag bit identifying this architecture.
    pub fn context_cpu(self) -> ContextFlagsCpu {
        match self {
            Arch::X86 => ContextFlagsCpu::CONTEXT_X86,
            Arch::Amd64 => ContextFlagsCpu::CONTEXT_AMD64,
            Arch::Arm => ContextFlagsCpu::CONTEXT_ARM,
        }
    }

    /// General purpose registers, in the order a report prints them.
    pub fn register_names(self) -> &'static [&'static str] {
        match self {
            Arch::Amd64 => &[
                "rax", "rbx", "rcx", "rdx", "rdi", "rsi", "rbp", "rsp", "rip", "r8", "r9", "r10",
                "r11", "r12", "r13", "r14", "r15",
            ],
            Arch::Arm => &[
                "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12",
                "sp", "lr", "pc",
            ],
            Arch::X86 => &[
                "eax", "ebx", "ecx", "edx", "edi", "esi", "ebp", "esp", "eip",
            ],
        }
    }

    /// The name of the flags register.
    pub fn flags_register(self) -> &'static str {
        match self {
            Arch::Arm => "cpsr",
            Arch::X86 | Arch::Amd64 => "eflags",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Arch::X86 => "x86",
            Arch::Amd64 => "amd64",
            Arch::Arm => "arm",
        })
    }
}

/// The register state of a thread, as recorded in a `CONTEXT` record.
///
/// Only integer-valued fields are kept. Register groups whose bit is clear in
/// `context_flags` were never written to the dump and read as `None`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CpuContext {
    pub arch: Arch,
    pub context_flags: u32,
    registers: Vec<(&'static str, u64)>,
}

impl CpuContext {
    /// Decode a context record for `arch` from `bytes`.
    pub fn read(arch: Arch, bytes: &[u8]) -> Result<CpuContext, LayoutError> {
        let record = arch.context_layout().read(bytes, 0, LE)?;
        let registers = record
            .present_fields()
            .filter_map(|name| record.get(name).map(|v| (name, v)))
            .collect();
        Ok(CpuContext {
            arch,
            context_flags: record.get("context_flags").unwrap_or(0) as u32,
            registers,
        })
    }

    /// The value of register `name`, or `None` if its group was not recorded.
    pub fn get_register(&self, name: &str) -> Option<u64> {
        self.registers
            .iter()
            .find(|(reg, _)| *reg == name)
            .map(|&(_, v)| v)
    }

    /// The instruction pointer.
    pub fn instruction_pointer(&self) -> Option<u64> {
        self.get_register(match self.arch {
            Arch::Amd64 => "rip",
            Arch::Arm => "pc",
            Arch::X86 => "eip",
        })
    }

    /// The stack pointer.
    pub fn stack_pointer(&self) -> Option<u64> {
        self.get_register(match self.arch {
            Arch::Amd64 => "rsp",
            Arch::Arm => "sp",
            Arch::X86 => "esp",
        })
    }

    /// The frame pointer. ARM has no designated one.
    pub fn frame_pointer(&self) -> Option<u64> {
        match self.arch {
            Arch::Amd64 => self.get_register("rbp"),
            Arch::X86 => self.get_register("ebp"),
            Arch::Arm => None,
        }
    }

    /// Whether the architecture bit in `context_flags` agrees with `arch`.
    pub fn has_matching_cpu_flag(&self) -> bool {
        ContextFlagsCpu::from_flags(self.context_flags) == self.arch.context_cpu()
    }

    /// Print the general purpose registers and the flags register.
    pub fn print<T: Write + ?Sized>(&self, f: &mut T) -> io::Result<()> {
        let width = self.arch.pointer_size() * 2;
        for name in self.arch.register_names() {
            match self.get_register(name) {
                Some(v) => writeln!(f, "    {}: {:0width$x}", name, v, width = width)?,
                None => writeln!(f, "    {}: <not present>", name)?,
            }
        }
        let flags = self.arch.flags_register();
        match self.get_register(flags) {
            Some(v) => writeln!(f, "    {}: {:b}", flags, v)?,
            None => writeln!(f, "    {}: <not present>", flags)?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn amd64_control_only() -> Vec<u8> {
        let mut bytes = vec![0u8; 48];
        bytes.extend_from_slice(&0x100001u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes()); // mx_csr
        bytes.extend_from_slice(&0x33u16.to_le_bytes()); // cs
        bytes.extend_from_slice(&0x2bu16.to_le_bytes()); // ss
        bytes.extend_from_slice(&0x246u32.to_le_bytes()); // eflags
        bytes.extend_from_slice(&0x7ffe_0000u64.to_le_bytes()); // rsp
        bytes.extend_from_slice(&0x1234_5678u64.to_le_bytes()); // rip
        bytes
    }

    #[test]
    fn test_arch_mapping() {
        assert_eq!(Arch::from_processor_architecture(0), Some(Arch::X86));
        assert_eq!(Arch::from_processor_architecture(5), Some(Arch::Arm));
        assert_eq!(Arch::from_processor_architecture(9), Some(Arch::Amd64));
        assert_eq!(Arch::from_processor_architecture(12), None);
        assert_eq!(Arch::from_processor_architecture(0x7777), None);
        assert_eq!(Arch::Amd64.pointer_size(), 8);
        assert_eq!(Arch::Arm.pointer_size(), 4);
    }

    #[test]
    fn test_amd64_control_group_only() {
        let ctx = CpuContext::read(Arch::Amd64, &amd64_control_only()).unwrap();
        assert!(ctx.has_matching_cpu_flag());
        assert_eq!(ctx.instruction_pointer(), Some(0x1234_5678));
        assert_eq!(ctx.stack_pointer(), Some(0x7ffe_0000));
        assert_eq!(ctx.get_register("cs"), Some(0x33));
        assert_eq!(ctx.get_register("ss"), Some(0x2b));
        assert_eq!(ctx.get_register("eflags"), Some(0x246));
        for reg in &["rax", "rbx", "rbp", "r8", "r15"] {
            assert_eq!(ctx.get_register(reg), None, "{}", reg);
        }
        assert_eq!(ctx.frame_pointer(), None);
    }

    #[test]
    fn test_arm_has_no_frame_pointer() {
        let mut bytes = 0x40000002u32.to_le_bytes().to_vec();
        for i in 0..16u32 {
            bytes.extend_from_slice(&(0x100 + i).to_le_bytes());
        }
        bytes.extend_from_slice(&0x6000_0010u32.to_le_bytes());
        let ctx = CpuContext::read(Arch::Arm, &bytes).unwrap();
        assert_eq!(ctx.instruction_pointer(), Some(0x10f));
        assert_eq!(ctx.stack_pointer(), Some(0x10d));
        assert_eq!(ctx.get_register("lr"), Some(0x10e));
        assert_eq!(ctx.get_register("cpsr"), Some(0x6000_0010));
        assert_eq!(ctx.frame_pointer(), None);
    }

    #[test]
    fn test_truncated_context() {
        let bytes = amd64_control_only();
        assert!(CpuContext::read(Arch::Amd64, &bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_print_registers() {
        let ctx = CpuContext::read(Arch::Amd64, &amd64_control_only()).unwrap();
        let mut out = Vec::new();
        ctx.print(&mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("    rip: 0000000012345678\n"));
        assert!(out.contains("    rax: <not present>\n"));
        assert!(out.contains("    eflags: 1001000110\n"));
    }
}
