//! Minidump structure definitions.
//!
//! Types defined here should match those defined in [Microsoft's headers][msdn]. Only the
//! streams needed to inspect a crashed process's memory are described: the thread, module,
//! memory, exception and system info streams.
//!
//! CPU contexts are *not* defined as fixed structs here. Their register groups are present in
//! the stream only when the matching bit of `context_flags` is set, so they are described as
//! [`Layout`](crate::layout::Layout)s in [`crate::layout`] instead.
//!
//! [msdn]: https://docs.microsoft.com/en-us/windows/desktop/api/minidumpapiset/
#![allow(non_camel_case_types)]
#![allow(non_upper_case_globals)]

use bitflags::bitflags;
use enum_primitive_derive::Primitive;
use scroll::{Pread, SizeWith};

/// An offset from the start of the minidump file.
pub type RVA = u32;

/// A 64-bit offset from the start of the minidump file, used by the memory64 list.
pub type RVA64 = u64;

/// The 4-byte magic number at the start of a minidump file.
///
/// In little endian this spells 'MDMP'.
pub const MINIDUMP_SIGNATURE: u32 = 0x504d444d;

/// The version of the minidump format.
pub const MINIDUMP_VERSION: u32 = 42899;

/// The header at the start of a minidump file.
///
/// This struct matches the [Microsoft struct][msdn] of the same name.
///
/// [msdn]: https://docs.microsoft.com/en-us/windows/desktop/api/minidumpapiset/ns-minidumpapiset-_minidump_header
#[derive(Clone, Debug, Pread, SizeWith)]
pub struct MINIDUMP_HEADER {
    /// This should be [`MINIDUMP_SIGNATURE`].
    pub signature: u32,
    /// This should be [`MINIDUMP_VERSION`].
    pub version: u32,
    /// The number of streams contained in the stream directory.
    pub stream_count: u32,
    /// The offset to the stream directory within the minidump. The stream directory is an
    /// array containing `stream_count` [`MINIDUMP_DIRECTORY`] entries.
    pub stream_directory_rva: RVA,
    pub checksum: u32,
    pub time_date_stamp: u32,
    pub flags: u64,
}

/// A location within a minidump file comprised of an offset and a size.
#[derive(Copy, Default, Clone, Debug, PartialEq, Eq, Pread, SizeWith)]
pub struct MINIDUMP_LOCATION_DESCRIPTOR {
    /// The size of this data.
    pub data_size: u32,
    /// The offset to this data within the minidump file.
    pub rva: RVA,
}

/// A range of memory contained within a minidump consisting of a base address and a
/// location descriptor.
#[derive(Copy, Clone, Default, Debug, Pread, SizeWith)]
pub struct MINIDUMP_MEMORY_DESCRIPTOR {
    /// The base address of this memory range from the process.
    pub start_of_memory_range: u64,
    /// The offset and size of the actual bytes of memory contained in this dump.
    pub memory: MINIDUMP_LOCATION_DESCRIPTOR,
}

/// A large range of memory contained within a minidump (usually a full dump)
/// consisting of a base address and a size.
///
/// The bytes of all ranges in a memory64 list are stored back to back starting at the
/// list's `base_rva`, so a descriptor carries no offset of its own.
#[derive(Copy, Clone, Default, Debug, Pread, SizeWith)]
pub struct MINIDUMP_MEMORY_DESCRIPTOR64 {
    /// The base address of this memory range from the process.
    pub start_of_memory_range: u64,
    /// The size of this data.
    pub data_size: u64,
}

/// The fixed header of a `Memory64ListStream`.
#[derive(Copy, Clone, Default, Debug, Pread, SizeWith)]
pub struct MINIDUMP_MEMORY64_LIST {
    /// The number of [`MINIDUMP_MEMORY_DESCRIPTOR64`] entries that follow.
    pub number_of_memory_ranges: u64,
    /// Where the contents of the first range start in the file.
    pub base_rva: RVA64,
}

/// Information about a data stream contained in a minidump file.
#[derive(Clone, Debug, Pread, SizeWith)]
pub struct MINIDUMP_DIRECTORY {
    /// This is usually one of the values in [`MINIDUMP_STREAM_TYPE`] for known stream types,
    /// but user streams can have arbitrary values.
    pub stream_type: u32,
    /// The location of the stream contents within the dump.
    pub location: MINIDUMP_LOCATION_DESCRIPTOR,
}

/// The types of known minidump data streams.
///
/// These values are derived from the [Microsoft enum][msdn] of the same name.
///
/// [msdn]: https://docs.microsoft.com/en-us/windows/desktop/api/minidumpapiset/ne-minidumpapiset-_minidump_stream_type
#[repr(u32)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, Primitive)]
pub enum MINIDUMP_STREAM_TYPE {
    /// An unused stream directory entry
    UnusedStream = 0,
    ReservedStream0 = 1,
    ReservedStream1 = 2,
    /// The list of threads from the process
    ///
    /// See [`MINIDUMP_THREAD`].
    ThreadListStream = 3,
    /// The list of executable modules from the process
    ///
    /// See [`MINIDUMP_MODULE`].
    ModuleListStream = 4,
    /// The list of memory regions from the process contained within this dump
    ///
    /// See [`MINIDUMP_MEMORY_DESCRIPTOR`]. Its presence usually means the dump is not a
    /// full memory dump.
    MemoryListStream = 5,
    /// Information about the exception that caused the process to exit
    ///
    /// See [`MINIDUMP_EXCEPTION_STREAM`].
    ExceptionStream = 6,
    /// System information
    ///
    /// See [`MINIDUMP_SYSTEM_INFO`].
    SystemInfoStream = 7,
    ThreadExListStream = 8,
    /// The list of memory regions from the process contained within this dump
    ///
    /// See [`MINIDUMP_MEMORY64_LIST`] and [`MINIDUMP_MEMORY_DESCRIPTOR64`].
    Memory64ListStream = 9,
    CommentStreamA = 10,
    CommentStreamW = 11,
    HandleDataStream = 12,
    FunctionTable = 13,
    UnloadedModuleListStream = 14,
    MiscInfoStream = 15,
    MemoryInfoListStream = 16,
    ThreadInfoListStream = 17,
    HandleOperationListStream = 18,
}

impl From<MINIDUMP_STREAM_TYPE> for u32 {
    fn from(ty: MINIDUMP_STREAM_TYPE) -> Self {
        ty as u32
    }
}

/// Information about a single module (executable or shared library) from a minidump
///
/// This struct matches the [Microsoft struct][msdn] of the same name.
///
/// [msdn]: https://docs.microsoft.com/en-us/windows/desktop/api/minidumpapiset/ns-minidumpapiset-_minidump_module
#[derive(Clone, Default, Debug, Pread, SizeWith)]
pub struct MINIDUMP_MODULE {
    /// The base address of the executable image in memory.
    pub base_of_image: u64,
    /// The size of the executable image in memory, in bytes.
    pub size_of_image: u32,
    /// The checksum value from the PE headers.
    pub checksum: u32,
    /// The timestamp value from the PE headers in `time_t` format.
    pub time_date_stamp: u32,
    /// An offset to a length-prefixed UTF-16LE string containing the name of the module.
    pub module_name_rva: RVA,
    /// Version information for this module.
    pub version_info: VS_FIXEDFILEINFO,
    /// The location of a CodeView record describing debug information for this module.
    pub cv_record: MINIDUMP_LOCATION_DESCRIPTOR,
    /// The location of an `IMAGE_DEBUG_MISC` record describing debug information for this module.
    pub misc_record: MINIDUMP_LOCATION_DESCRIPTOR,
    pub reserved0: [u32; 2],
    pub reserved1: [u32; 2],
}

/// Version information for a file
///
/// This struct matches the [Microsoft struct][msdn] of the same name.
///
/// [msdn]: https://docs.microsoft.com/en-us/windows/desktop/api/verrsrc/ns-verrsrc-tagvs_fixedfileinfo
#[derive(Clone, Default, Debug, Pread, SizeWith)]
pub struct VS_FIXEDFILEINFO {
    /// Contains the value of `VS_FFI_SIGNATURE`
    pub signature: u32,
    /// Should contain the value of `VS_FFI_STRUCVERSION`
    pub struct_version: u32,
    pub file_version_hi: u32,
    pub file_version_lo: u32,
    pub product_version_hi: u32,
    pub product_version_lo: u32,
    pub file_flags_mask: u32,
    pub file_flags: u32,
    pub file_os: u32,
    pub file_type: u32,
    pub file_subtype: u32,
    pub file_date_hi: u32,
    pub file_date_lo: u32,
}

/// The expected value of `VS_FIXEDFILEINFO.signature`
pub const VS_FFI_SIGNATURE: u32 = 0xfeef04bd;

/// The expected value of `VS_FIXEDFILEINFO.struct_version`
pub const VS_FFI_STRUCVERSION: u32 = 0x00010000;

/// Information about a single thread from a minidump
///
/// This struct matches the [Microsoft struct][msdn] of the same name.
///
/// [msdn]: https://docs.microsoft.com/en-us/windows/desktop/api/minidumpapiset/ns-minidumpapiset-_minidump_thread
#[derive(Clone, Debug, Pread, SizeWith)]
pub struct MINIDUMP_THREAD {
    /// The identifier of this thread
    pub thread_id: u32,
    /// The suspend count for this thread
    ///
    /// If greater than zero, the thread is suspended.
    pub suspend_count: u32,
    /// The priority class of the thread
    pub priority_class: u32,
    /// The priority level of the thread
    pub priority: u32,
    /// The thread environment block
    pub teb: u64,
    /// The location and base address of this thread's stack memory
    pub stack: MINIDUMP_MEMORY_DESCRIPTOR,
    /// The location of a CPU-specific context record for this thread
    pub thread_context: MINIDUMP_LOCATION_DESCRIPTOR,
}

/// Information about the exception that caused the process to terminate.
///
/// This struct matches the [Microsoft struct][msdn] of the same name.
///
/// [msdn]: https://docs.microsoft.com/en-us/windows/desktop/api/minidumpapiset/ns-minidumpapiset-minidump_exception_stream
#[derive(Clone, Debug, Pread, SizeWith)]
pub struct MINIDUMP_EXCEPTION_STREAM {
    /// The identifier of the thread that encountered the exception.
    pub thread_id: u32,
    pub __align: u32,
    /// Detailed information about the exception encountered.
    pub exception_record: MINIDUMP_EXCEPTION,
    /// The offset of a CPU context record from the time the thread encountered the exception.
    pub thread_context: MINIDUMP_LOCATION_DESCRIPTOR,
}

/// The maximum number of parameters an exception record carries.
pub const EXCEPTION_MAXIMUM_PARAMETERS: usize = 15;

/// Detailed information about an exception.
///
/// This struct matches the [Microsoft struct][msdn] of the same name.
///
/// [msdn]: https://docs.microsoft.com/en-us/windows/desktop/api/minidumpapiset/ns-minidumpapiset-_minidump_exception
#[derive(Clone, Debug, Pread, SizeWith)]
pub struct MINIDUMP_EXCEPTION {
    /// The reason the exception occurred.
    pub exception_code: u32,
    /// Flags related to the exception.
    ///
    /// On Windows this is 1 for noncontinuable exceptions and 0 otherwise.
    pub exception_flags: u32,
    /// The address of an associated `MINIDUMP_EXCEPTION` for a nested exception.
    pub exception_record: u64,
    /// The address where the exception occurred.
    pub exception_address: u64,
    /// The number of valid elements in `exception_information`.
    pub number_parameters: u32,
    pub __align: u32,
    /// An array of additional arguments that describe the exception.
    pub exception_information: [u64; 15], // EXCEPTION_MAXIMUM_PARAMETERS
}

/// CPU information contained within the `MINIDUMP_SYSTEM_INFO` struct
///
/// `data` is a union in the Microsoft headers; nothing here needs its contents.
#[derive(Clone, Debug, Pread, SizeWith)]
pub struct CPU_INFORMATION {
    pub data: [u8; 24],
}

/// Processor and operating system information
///
/// This struct matches the [Microsoft struct][msdn] of the same name.
///
/// [msdn]: https://docs.microsoft.com/en-us/windows/desktop/api/minidumpapiset/ns-minidumpapiset-_minidump_system_info
#[derive(Clone, Debug, Pread, SizeWith)]
pub struct MINIDUMP_SYSTEM_INFO {
    /// The system's processor architecture
    ///
    /// Known values are defined in [`ProcessorArchitecture`].
    pub processor_architecture: u16,
    pub processor_level: u16,
    pub processor_revision: u16,
    pub number_of_processors: u8,
    pub product_type: u8,
    pub major_version: u32,
    pub minor_version: u32,
    pub build_number: u32,
    pub platform_id: u32,
    pub csd_version_rva: RVA,
    pub suite_mask: u16,
    pub reserved2: u16,
    pub cpu: CPU_INFORMATION,
}

/// Known values of `MINIDUMP_SYSTEM_INFO.processor_architecture`
///
/// Only x86, ARM and AMD64 can be inspected; the others are listed so they can be named in
/// error messages.
#[repr(u16)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, Primitive)]
pub enum ProcessorArchitecture {
    PROCESSOR_ARCHITECTURE_INTEL = 0,
    PROCESSOR_ARCHITECTURE_MIPS = 1,
    PROCESSOR_ARCHITECTURE_ALPHA = 2,
    PROCESSOR_ARCHITECTURE_PPC = 3,
    PROCESSOR_ARCHITECTURE_SHX = 4,
    PROCESSOR_ARCHITECTURE_ARM = 5,
    PROCESSOR_ARCHITECTURE_IA64 = 6,
    PROCESSOR_ARCHITECTURE_ALPHA64 = 7,
    /// Microsoft Intermediate Language
    PROCESSOR_ARCHITECTURE_MSIL = 8,
    PROCESSOR_ARCHITECTURE_AMD64 = 9,
    /// WoW64
    PROCESSOR_ARCHITECTURE_IA32_ON_WIN64 = 10,
    PROCESSOR_ARCHITECTURE_ARM64 = 12,
    PROCESSOR_ARCHITECTURE_UNKNOWN = 0xffff,
}

/// Valid bits in a `context_flags` for `ContextFlagsCpu`
pub const CONTEXT_CPU_MASK: u32 = 0xffffff00;

bitflags! {
    /// CPU type values in the `context_flags` member of context records
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct ContextFlagsCpu: u32 {
        const CONTEXT_X86 = 0x10000;
        const CONTEXT_AMD64 = 0x100000;
        const CONTEXT_ARM = 0x40000000;
    }
}

impl ContextFlagsCpu {
    /// Populate a `ContextFlagsCpu` with valid bits from `flags`
    pub fn from_flags(flags: u32) -> ContextFlagsCpu {
        ContextFlagsCpu::from_bits_truncate(flags & CONTEXT_CPU_MASK)
    }
}

bitflags! {
    /// Register groups of an x86 context.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct ContextFlagsX86: u32 {
        const CONTROL = 0x1;
        const INTEGER = 0x2;
        const SEGMENTS = 0x4;
        const FLOATING_POINT = 0x8;
        const DEBUG_REGISTERS = 0x10;
        const EXTENDED_REGISTERS = 0x20;
    }
}

bitflags! {
    /// Register groups of an AMD64 context.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct ContextFlagsAmd64: u32 {
        const CONTROL = 0x1;
        const INTEGER = 0x2;
        const SEGMENTS = 0x4;
        const FLOATING_POINT = 0x8;
        const DEBUG_REGISTERS = 0x10;
    }
}

bitflags! {
    /// Register groups of an ARM context.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct ContextFlagsArm: u32 {
        const INTEGER = 0x2;
        const FLOATING_POINT = 0x4;
    }
}

/// Size of the x87 register area in an x86 floating point save area.
pub const X86_FLOAT_REGISTER_AREA_SIZE: usize = 80;
/// Size of the whole x86 floating point save area.
pub const X86_FLOAT_SAVE_AREA_SIZE: usize = 7 * 4 + X86_FLOAT_REGISTER_AREA_SIZE + 4;
/// Size of the x86 extended registers area.
pub const X86_EXTENDED_REGISTERS_SIZE: usize = 512;
/// Size of each of the two AMD64 SSE register areas (26 128-bit registers).
pub const AMD64_VECTOR_AREA_SIZE: usize = 16 * 26;
/// Size of the ARM floating point save area: fpscr, 32 registers, 8 extra words.
pub const ARM_FLOAT_SAVE_AREA_SIZE: usize = 8 + 8 * 32 + 8 * 8;
