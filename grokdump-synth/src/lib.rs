// Copyright 2016 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Synthetic minidumps for testing.
//!
//! Stream records and CPU contexts are laid out by hand here instead of through
//! grokdump-common's layouts, so a mistake in those layouts shows up as a test failure
//! rather than being baked into both the writer and the reader.
//!
//! Build a dump with [`SynthMinidump`], adding memory, threads, modules and an exception,
//! then call `finish()` to get the bytes. [`HeapImage`] helps fill a memory range with
//! tagged heap objects.

// Some test_assembler types do not have Debug, so be a bit more lenient here.
#![allow(missing_debug_implementations)]

use grokdump_common::format as md;
use std::mem;
use test_assembler::*;

pub use test_assembler::{Endian, Label, Section};

/// A writer of synthetic minidumps.
pub struct SynthMinidump {
    /// The `Section` containing the minidump contents.
    section: Section,
    /// The number of streams.
    stream_count: u32,
    /// The number of streams, as a label for the header.
    stream_count_label: Label,
    /// The directory's file offset, for the header.
    stream_directory_rva: Label,
    /// The contents of the stream directory.
    stream_directory: Section,
    system_info: Option<SystemInfo>,
    exception: Option<Exception>,
    module_list: Option<ListStream<Module>>,
    thread_list: Option<ListStream<Thread>>,
    memory_list: Option<ListStream<Section>>,
    memory64_list: Option<Memory64ListStream>,
    /// The contiguous bytes of every range in the memory64 list.
    memory64_section: Option<Section>,
}

/// A block of data contained in a minidump.
pub trait DumpSection {
    /// A label representing this `DumpSection`'s offset in bytes from the start of the minidump.
    fn file_offset(&self) -> Label;

    /// A label representing this `DumpSection`'s size in bytes within the minidump.
    fn file_size(&self) -> Label;
}

/// Something that can be an entry of a [`ListStream`].
pub trait ListItem: DumpSection + Into<Section> {}

impl<T> ListItem for T where T: DumpSection + Into<Section> {}

pub trait CiteLocation {
    /// Append a `MINIDUMP_LOCATION_DESCRIPTOR` to `section` referring to this section.
    fn cite_location_in(&self, section: Section) -> Section;
}

impl<T: DumpSection> CiteLocation for T {
    fn cite_location_in(&self, section: Section) -> Section {
        section.D32(self.file_size()).D32(self.file_offset())
    }
}

impl CiteLocation for (Label, Label) {
    fn cite_location_in(&self, section: Section) -> Section {
        section.D32(&self.0).D32(&self.1)
    }
}

impl<T: CiteLocation> CiteLocation for Option<T> {
    fn cite_location_in(&self, section: Section) -> Section {
        match *self {
            Some(ref inner) => inner.cite_location_in(section),
            None => section.D32(0).D32(0),
        }
    }
}

/// Additional methods to make working with `Section`s simpler
pub trait SectionExtra {
    /// A chainable version of `CiteLocation::cite_location_in`
    fn cite_location<T: CiteLocation>(self, thing: &T) -> Self;
    /// A chainable version of `Memory::cite_memory_in`
    fn cite_memory(self, memory: &Memory) -> Self;
}

impl SectionExtra for Section {
    fn cite_location<T: CiteLocation>(self, thing: &T) -> Self {
        thing.cite_location_in(self)
    }
    fn cite_memory(self, memory: &Memory) -> Self {
        memory.cite_memory_in(self)
    }
}

/// A minidump stream.
pub trait Stream: DumpSection + Into<Section> {
    /// The stream type, used in the stream directory.
    fn stream_type(&self) -> u32;
    /// Append a `MINIDUMP_DIRECTORY` referring to this stream to `section`.
    fn cite_stream_in(&self, section: Section) -> Section {
        section.D32(self.stream_type()).cite_location(self)
    }
}

impl SynthMinidump {
    /// Create a little-endian `SynthMinidump`.
    pub fn new() -> SynthMinidump {
        SynthMinidump::with_endian(Endian::Little)
    }

    /// Create a `SynthMinidump` with `endian` endianness.
    pub fn with_endian(endian: Endian) -> SynthMinidump {
        let stream_count_label = Label::new();
        let stream_directory_rva = Label::new();
        let section = Section::with_endian(endian)
            .D32(md::MINIDUMP_SIGNATURE)
            .D32(md::MINIDUMP_VERSION)
            .D32(&stream_count_label)
            .D32(&stream_directory_rva)
            .D32(0)
            .D32(1262805309) // time_date_stamp, arbitrary
            .D64(0);
        section.start().set_const(0);
        assert_eq!(section.size(), mem::size_of::<md::MINIDUMP_HEADER>() as u64);
        let memory64_section = Section::with_endian(endian);

        SynthMinidump {
            section,
            stream_count: 0,
            stream_count_label,
            stream_directory_rva,
            stream_directory: Section::with_endian(endian),
            system_info: None,
            exception: None,
            module_list: Some(ListStream::new(
                md::MINIDUMP_STREAM_TYPE::ModuleListStream,
                endian,
            )),
            thread_list: Some(ListStream::new(
                md::MINIDUMP_STREAM_TYPE::ThreadListStream,
                endian,
            )),
            memory_list: Some(ListStream::new(
                md::MINIDUMP_STREAM_TYPE::MemoryListStream,
                endian,
            )),
            memory64_list: Some(Memory64ListStream::new(
                endian,
                &memory64_section.file_offset(),
            )),
            memory64_section: Some(memory64_section),
        }
    }

    /// Append `section` to `self`, setting its location appropriately.
    #[allow(clippy::should_implement_trait)]
    pub fn add<T>(mut self, section: T) -> SynthMinidump
    where
        T: DumpSection + Into<Section>,
    {
        let offset = section.file_offset();
        self.section = self.section.mark(&offset).append_section(section);
        self
    }

    /// Add `module` to the module list stream. Its name must be `add`ed separately.
    pub fn add_module(mut self, module: Module) -> SynthMinidump {
        self.module_list = self
            .module_list
            .take()
            .map(|module_list| module_list.add(module));
        self
    }

    /// Add `memory` to `self`, adding it to the memory list stream as well.
    pub fn add_memory(mut self, memory: Memory) -> SynthMinidump {
        let descriptor = memory.cite_memory_in(Section::with_endian(self.section.endian));
        self.memory_list = self
            .memory_list
            .take()
            .map(|memory_list| memory_list.add(descriptor));
        self.add(memory)
    }

    /// Add `memory` to `self`'s memory64 list.
    ///
    /// The contents of every memory64 range are written back to back at the end of the dump.
    pub fn add_memory64(mut self, memory: Memory) -> SynthMinidump {
        self.memory64_list = self
            .memory64_list
            .take()
            .map(|memory64_list| memory64_list.add_memory(&memory));
        self.memory64_section = self
            .memory64_section
            .take()
            .map(|memory64_section| {
                memory64_section
                    .mark(&memory.file_offset())
                    .append_section(memory.section)
            });
        self
    }

    /// Add `thread` to the thread list stream. Its stack and context must be added
    /// separately.
    pub fn add_thread(mut self, thread: Thread) -> SynthMinidump {
        self.thread_list = self
            .thread_list
            .take()
            .map(|thread_list| thread_list.add(thread));
        self
    }

    /// Set the SystemInfo stream.
    pub fn add_system_info(mut self, system_info: SystemInfo) -> Self {
        self.system_info = Some(system_info);
        self
    }

    /// Set the Exception stream.
    pub fn add_exception(mut self, exception: Exception) -> Self {
        self.exception = Some(exception);
        self
    }

    /// Append `stream` to `self`, setting its location appropriately and adding it to the
    /// stream directory.
    pub fn add_stream<T: Stream>(mut self, stream: T) -> SynthMinidump {
        self.stream_directory = stream.cite_stream_in(self.stream_directory);
        self.stream_count += 1;
        self.add(stream)
    }

    fn finish_list<T: ListItem>(self, list: Option<ListStream<T>>) -> SynthMinidump {
        match list {
            Some(l) if !l.is_empty() => self.add_stream(l),
            _ => self,
        }
    }

    /// Finish generating the minidump and return the contents.
    pub fn finish(mut self) -> Option<Vec<u8>> {
        if let Some(stream) = self.system_info.take() {
            self = self.add_stream(stream);
        }
        let modules = self.module_list.take();
        self = self.finish_list(modules);
        let memories = self.memory_list.take();
        self = self.finish_list(memories);
        if let Some(memories64) = self.memory64_list.take() {
            if !memories64.is_empty() {
                self = self.add_stream(memories64);
            }
        }
        let threads = self.thread_list.take();
        self = self.finish_list(threads);
        if let Some(stream) = self.exception.take() {
            self = self.add_stream(stream);
        }
        if let Some(memory64_section) = self.memory64_section.take() {
            self = self.add(memory64_section);
        }

        let SynthMinidump {
            section,
            stream_count,
            stream_count_label,
            stream_directory_rva,
            stream_directory,
            ..
        } = self;
        stream_count_label.set_const(stream_count as u64);
        section
            .mark(&stream_directory_rva)
            .append_section(stream_directory)
            .get_contents()
    }
}

impl Default for SynthMinidump {
    fn default() -> Self {
        Self::new()
    }
}

impl DumpSection for Section {
    fn file_offset(&self) -> Label {
        self.start()
    }

    fn file_size(&self) -> Label {
        self.final_size()
    }
}

macro_rules! impl_dumpsection {
    ( $x:ty ) => {
        impl DumpSection for $x {
            fn file_offset(&self) -> Label {
                self.section.file_offset()
            }
            fn file_size(&self) -> Label {
                self.section.file_size()
            }
        }
    };
}

/// A stream of arbitrary bytes, for writing streams the builder doesn't model or
/// deliberately malformed ones.
pub struct SimpleStream {
    pub stream_type: u32,
    pub section: Section,
}

impl From<SimpleStream> for Section {
    fn from(stream: SimpleStream) -> Self {
        stream.section
    }
}

impl_dumpsection!(SimpleStream);

impl Stream for SimpleStream {
    fn stream_type(&self) -> u32 {
        self.stream_type
    }
}

/// A stream containing a `u32` count followed by that many entries.
pub struct ListStream<T: ListItem> {
    stream_type: u32,
    section: Section,
    count: u32,
    count_label: Label,
    _type: std::marker::PhantomData<T>,
}

impl<T: ListItem> ListStream<T> {
    pub fn new<S: Into<u32>>(stream_type: S, endian: Endian) -> Self {
        let count_label = Label::new();
        ListStream {
            stream_type: stream_type.into(),
            section: Section::with_endian(endian).D32(&count_label),
            count: 0,
            count_label,
            _type: std::marker::PhantomData,
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn add(mut self, entry: T) -> Self {
        self.count += 1;
        let offset = entry.file_offset();
        self.section = self.section.mark(&offset).append_section(entry);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl<T: ListItem> From<ListStream<T>> for Section {
    fn from(list: ListStream<T>) -> Self {
        list.count_label.set_const(list.count as u64);
        list.section
    }
}

impl<T: ListItem> DumpSection for ListStream<T> {
    fn file_offset(&self) -> Label {
        self.section.file_offset()
    }

    fn file_size(&self) -> Label {
        self.section.file_size()
    }
}

impl<T: ListItem> Stream for ListStream<T> {
    fn stream_type(&self) -> u32 {
        self.stream_type
    }
}

pub struct Memory64ListStream {
    section: Section,
    count: u64,
    count_label: Label,
}

impl Memory64ListStream {
    pub fn new(endian: Endian, memory64_rva: &Label) -> Self {
        let count_label = Label::new();
        let section = Section::with_endian(endian)
            .D64(&count_label)
            .D64(memory64_rva);
        Self {
            section,
            count: 0,
            count_label,
        }
    }

    pub fn add_memory(mut self, memory: &Memory) -> Self {
        self.count += 1;
        self.section = self.section.D64(memory.address).D64(memory.section.size());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl From<Memory64ListStream> for Section {
    fn from(list: Memory64ListStream) -> Self {
        list.count_label.set_const(list.count);
        list.section
    }
}

impl DumpSection for Memory64ListStream {
    fn file_offset(&self) -> Label {
        self.section.file_offset()
    }

    fn file_size(&self) -> Label {
        self.section.file_size()
    }
}

impl Stream for Memory64ListStream {
    fn stream_type(&self) -> u32 {
        md::MINIDUMP_STREAM_TYPE::Memory64ListStream.into()
    }
}

/// A `MINIDUMP_STRING`, a UTF-16 string preceded by a 4-byte length.
pub struct DumpString {
    section: Section,
}

impl DumpString {
    /// Create a new `DumpString` with `s` as its contents, using `endian` endianness.
    pub fn new(s: &str, endian: Endian) -> DumpString {
        let section = s
            .encode_utf16()
            .fold(Section::with_endian(endian), |section, unit| section.D16(unit));
        let length = section.size() as u32;
        let section = Section::with_endian(endian)
            .D32(length)
            .append_section(section);
        DumpString { section }
    }
}

impl From<DumpString> for Section {
    fn from(string: DumpString) -> Self {
        string.section
    }
}

impl_dumpsection!(DumpString);

/// A fixed set of version info to use for tests.
pub const STOCK_VERSION_INFO: md::VS_FIXEDFILEINFO = md::VS_FIXEDFILEINFO {
    signature: md::VS_FFI_SIGNATURE,
    struct_version: md::VS_FFI_STRUCVERSION,
    file_version_hi: 0x00020003,
    file_version_lo: 0x00040005,
    product_version_hi: 0x00060007,
    product_version_lo: 0x00080009,
    file_flags_mask: 1,
    file_flags: 1,
    file_os: 0x40004,
    file_type: 1,
    file_subtype: 0,
    file_date_hi: 0,
    file_date_lo: 0,
};

/// A minidump module.
pub struct Module {
    section: Section,
}

impl Module {
    pub fn new<'a, T: Into<Option<&'a md::VS_FIXEDFILEINFO>>>(
        endian: Endian,
        base_of_image: u64,
        size_of_image: u32,
        name: &DumpString,
        time_date_stamp: u32,
        version_info: T,
    ) -> Module {
        let version_info = version_info.into().unwrap_or(&STOCK_VERSION_INFO);
        let section = Section::with_endian(endian)
            .D64(base_of_image)
            .D32(size_of_image)
            .D32(0) // checksum
            .D32(time_date_stamp)
            .D32(name.file_offset())
            .D32(version_info.signature)
            .D32(version_info.struct_version)
            .D32(version_info.file_version_hi)
            .D32(version_info.file_version_lo)
            .D32(version_info.product_version_hi)
            .D32(version_info.product_version_lo)
            .D32(version_info.file_flags_mask)
            .D32(version_info.file_flags)
            .D32(version_info.file_os)
            .D32(version_info.file_type)
            .D32(version_info.file_subtype)
            .D32(version_info.file_date_hi)
            .D32(version_info.file_date_lo)
            .cite_location(&None::<(Label, Label)>) // cv_record
            .cite_location(&None::<(Label, Label)>) // misc_record
            .D64(0) // reserved0
            .D64(0); // reserved1
        Module { section }
    }
}

impl_dumpsection!(Module);

impl From<Module> for Section {
    fn from(module: Module) -> Self {
        module.section
    }
}

/// A minidump thread.
pub struct Thread {
    section: Section,
}

impl Thread {
    pub fn new<T>(endian: Endian, id: u32, stack: &Memory, context: &T) -> Thread
    where
        T: DumpSection,
    {
        let section = Section::with_endian(endian)
            .D32(id)
            .D32(0) // suspend_count
            .D32(0) // priority_class
            .D32(0) // priority
            .D64(0) // teb
            .cite_memory(stack)
            .cite_location(context);
        Thread { section }
    }
}

impl_dumpsection!(Thread);

impl From<Thread> for Section {
    fn from(thread: Thread) -> Self {
        thread.section
    }
}

/// A range of memory contents.
pub struct Memory {
    section: Section,
    pub address: u64,
}

impl Memory {
    /// Create a new `Memory` object representing memory starting at `address`,
    /// containing the contents of `section`.
    pub fn with_section(section: Section, address: u64) -> Memory {
        Memory { section, address }
    }

    /// Append a `MINIDUMP_MEMORY_DESCRIPTOR` referring to this memory range to `section`.
    pub fn cite_memory_in(&self, section: Section) -> Section {
        section.D64(self.address).cite_location(self)
    }
}

impl_dumpsection!(Memory);

impl From<Memory> for Section {
    fn from(memory: Memory) -> Self {
        memory.section
    }
}

pub struct SystemInfo {
    section: Section,
    pub processor_architecture: u16,
    pub number_of_processors: u8,
    pub platform_id: u32,
}

impl SystemInfo {
    pub fn new(endian: Endian) -> Self {
        Self {
            section: Section::with_endian(endian),
            processor_architecture: md::ProcessorArchitecture::PROCESSOR_ARCHITECTURE_INTEL
                as u16,
            number_of_processors: 1,
            platform_id: 2, // VER_PLATFORM_WIN32_NT
        }
    }

    pub fn set_processor_architecture(mut self, arch: md::ProcessorArchitecture) -> Self {
        self.processor_architecture = arch as u16;
        self
    }
}

impl_dumpsection!(SystemInfo);

impl From<SystemInfo> for Section {
    fn from(info: SystemInfo) -> Self {
        info.section
            .D16(info.processor_architecture)
            .D16(6) // processor_level
            .D16(0) // processor_revision
            .D8(info.number_of_processors)
            .D8(0) // product_type
            .D32(6) // major_version
            .D32(1) // minor_version
            .D32(7601) // build_number
            .D32(info.platform_id)
            .D32(0) // csd_version_rva
            .D16(0) // suite_mask
            .D16(0) // reserved2
            .append_repeated(0, 24) // cpu
    }
}

impl Stream for SystemInfo {
    fn stream_type(&self) -> u32 {
        md::MINIDUMP_STREAM_TYPE::SystemInfoStream.into()
    }
}

pub struct Exception {
    section: Section,
    pub thread_id: u32,
    pub exception_code: u32,
    pub exception_flags: u32,
    pub exception_address: u64,
    pub parameters: Vec<u64>,
    thread_context: Option<(Label, Label)>,
}

impl Exception {
    pub fn new(endian: Endian, thread_id: u32, exception_code: u32) -> Self {
        Self {
            section: Section::with_endian(endian),
            thread_id,
            exception_code,
            exception_flags: 0,
            exception_address: 0,
            parameters: vec![],
            thread_context: None,
        }
    }

    pub fn address(mut self, address: u64) -> Self {
        self.exception_address = address;
        self
    }

    /// The register state at the time of the exception. The context must be `add`ed to the
    /// dump separately.
    pub fn context<T: DumpSection>(mut self, context: &T) -> Self {
        self.thread_context = Some((context.file_size(), context.file_offset()));
        self
    }
}

impl_dumpsection!(Exception);

impl From<Exception> for Section {
    fn from(info: Exception) -> Self {
        let count = info.parameters.len().min(md::EXCEPTION_MAXIMUM_PARAMETERS);
        let mut section = info
            .section
            .D32(info.thread_id)
            .D32(0) // __align
            .D32(info.exception_code)
            .D32(info.exception_flags)
            .D64(0) // exception_record
            .D64(info.exception_address)
            .D32(count as u32)
            .D32(0); // __align
        for i in 0..md::EXCEPTION_MAXIMUM_PARAMETERS {
            section = section.D64(info.parameters.get(i).copied().unwrap_or(0));
        }
        section.cite_location(&info.thread_context)
    }
}

impl Stream for Exception {
    fn stream_type(&self) -> u32 {
        md::MINIDUMP_STREAM_TYPE::ExceptionStream.into()
    }
}

/// A `CONTEXT_X86` with every register group present.
pub fn x86_context(endian: Endian, eip: u32, esp: u32, ebp: u32) -> Section {
    let section = Section::with_endian(endian)
        .D32(0x1003f) // context_flags: CONTEXT_ALL
        .append_repeated(0, 4 * 6) // dr0,1,2,3,6,7
        .append_repeated(0, md::X86_FLOAT_SAVE_AREA_SIZE) // float_save
        .append_repeated(0, 4 * 4) // gs,fs,es,ds
        .append_repeated(0, 4 * 6) // edi,esi,ebx,edx,ecx,eax
        .D32(ebp)
        .D32(eip)
        .D32(0x23) // cs
        .D32(0x246) // eflags
        .D32(esp)
        .D32(0x2b) // ss
        .append_repeated(0, md::X86_EXTENDED_REGISTERS_SIZE);
    assert_eq!(section.size(), 716);
    section
}

/// A `CONTEXT_AMD64` with every register group present.
pub fn amd64_context(endian: Endian, rip: u64, rsp: u64, rbp: u64) -> Section {
    let section = Section::with_endian(endian)
        .append_repeated(0, 8 * 6) // p[1-6]_home
        .D32(0x10001f) // context_flags: CONTEXT_ALL
        .D32(0) // mx_csr
        .D16(0x33) // cs
        .append_repeated(0, 2 * 4) // ds,es,fs,gs
        .D16(0x2b) // ss
        .D32(0x246) // eflags
        .append_repeated(0, 8 * 6) // dr0,1,2,3,6,7
        .append_repeated(0, 8 * 4) // rax,rcx,rdx,rbx
        .D64(rsp)
        .D64(rbp)
        .append_repeated(0, 8 * 10) // rsi,rdi,r8-r15
        .D64(rip)
        .append_repeated(0, md::AMD64_VECTOR_AREA_SIZE * 2) // float_save, vector_register
        .append_repeated(0, 8 * 6); // vector_control, debug_control, last branch/exception
    assert_eq!(section.size(), 1136);
    section
}

/// A `CONTEXT_AMD64` holding only the CONTROL group: segments cs and ss, eflags, rsp
/// and rip.
pub fn amd64_control_context(endian: Endian, rip: u64, rsp: u64) -> Section {
    Section::with_endian(endian)
        .append_repeated(0, 8 * 6) // p[1-6]_home
        .D32(0x100001) // context_flags: CONTEXT_CONTROL
        .D32(0) // mx_csr
        .D16(0x33) // cs
        .D16(0x2b) // ss
        .D32(0x246) // eflags
        .D64(rsp)
        .D64(rip)
}

/// A `CONTEXT_ARM` with the integer and floating point groups present.
pub fn arm_context(endian: Endian, pc: u32, sp: u32, lr: u32) -> Section {
    let section = Section::with_endian(endian)
        .D32(0x40000006) // context_flags: CONTEXT_INTEGER | CONTEXT_FLOATING_POINT
        .append_repeated(0, 4 * 13) // r0-r12
        .D32(sp)
        .D32(lr)
        .D32(pc)
        .D32(0x6000_0010) // cpsr
        .append_repeated(0, md::ARM_FLOAT_SAVE_AREA_SIZE);
    assert_eq!(section.size(), 400);
    section
}

/// A range of memory laid out as heap objects.
///
/// Addresses passed to the `put_*` methods are absolute and untagged; the words written
/// into memory are tagged.
pub struct HeapImage {
    base: u64,
    pointer_size: u64,
    bytes: Vec<u8>,
}

impl HeapImage {
    /// `size` zero bytes at `base`, for a process with `pointer_size` byte words.
    pub fn new(base: u64, size: usize, pointer_size: u64) -> HeapImage {
        HeapImage {
            base,
            pointer_size,
            bytes: vec![0; size],
        }
    }

    /// The Smi encoding of `n`.
    pub fn smi(n: i64) -> u64 {
        (n as u64) << 1
    }

    pub fn put_bytes(mut self, address: u64, bytes: &[u8]) -> Self {
        let offset = (address - self.base) as usize;
        self.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
        self
    }

    pub fn put_u32(self, address: u64, value: u32) -> Self {
        self.put_bytes(address, &value.to_le_bytes())
    }

    pub fn put_word(self, address: u64, value: u64) -> Self {
        if self.pointer_size == 8 {
            self.put_bytes(address, &value.to_le_bytes())
        } else {
            self.put_u32(address, value as u32)
        }
    }

    /// A map at `address` whose own map is at `meta`. A map that is its own map is the
    /// meta map.
    pub fn put_map(self, address: u64, meta: u64, instance_type: u8) -> Self {
        let ptr = self.pointer_size;
        self.put_word(address, meta + 1)
            .put_bytes(address + ptr + 4, &[instance_type])
    }

    /// A sequential one-byte string with map `map`.
    pub fn put_seq_string(self, address: u64, map: u64, text: &str) -> Self {
        let ptr = self.pointer_size;
        self.put_word(address, map + 1)
            .put_word(address + 2 * ptr, HeapImage::smi(text.len() as i64))
            .put_bytes(address + 3 * ptr, text.as_bytes())
    }

    /// A cons string joining the objects at untagged `left` and `right`.
    pub fn put_cons_string(self, address: u64, map: u64, length: i64, left: u64, right: u64) -> Self {
        let ptr = self.pointer_size;
        self.put_word(address, map + 1)
            .put_word(address + 2 * ptr, HeapImage::smi(length))
            .put_word(address + 3 * ptr, left + 1)
            .put_word(address + 4 * ptr, right + 1)
    }

    /// A fixed array holding the already tagged `elements`.
    pub fn put_fixed_array(self, address: u64, map: u64, elements: &[u64]) -> Self {
        let ptr = self.pointer_size;
        let image = self
            .put_word(address, map + 1)
            .put_word(address + ptr, HeapImage::smi(elements.len() as i64));
        elements
            .iter()
            .enumerate()
            .fold(image, |image, (i, &e)| {
                image.put_word(address + (2 + i as u64) * ptr, e)
            })
    }

    /// An oddball whose string form is the object at untagged `to_string`.
    pub fn put_oddball(self, address: u64, map: u64, to_string: u64, kind: i64) -> Self {
        let ptr = self.pointer_size;
        self.put_word(address, map + 1)
            .put_word(address + ptr, to_string + 1)
            .put_word(address + 3 * ptr, HeapImage::smi(kind))
    }

    /// The finished range, ready for [`SynthMinidump::add_memory`] or
    /// [`SynthMinidump::add_memory64`].
    pub fn into_memory(self) -> Memory {
        Memory::with_section(
            Section::with_endian(Endian::Little).append_bytes(&self.bytes),
            self.base,
        )
    }
}

#[test]
fn test_dump_header() {
    let dump = SynthMinidump::with_endian(Endian::Little);
    assert_eq!(
        dump.finish().unwrap(),
        vec![
            0x4d, 0x44, 0x4d, 0x50, // signature
            0x93, 0xa7, 0x00, 0x00, // version
            0, 0, 0, 0, // stream count
            0x20, 0, 0, 0, // directory RVA
            0, 0, 0, 0, // checksum
            0x3d, 0xe1, 0x44, 0x4b, // time_date_stamp
            0, 0, 0, 0, // flags
            0, 0, 0, 0,
        ]
    );
}

#[test]
fn test_section_cite() {
    let s1 = Section::with_endian(Endian::Little).append_repeated(0, 0x0a);
    s1.start().set_const(0xff00ee11);
    let s2 = Section::with_endian(Endian::Little);
    let s2 = s1.cite_location_in(s2);
    s1.get_contents().unwrap();
    assert_eq!(
        s2.get_contents().unwrap(),
        vec![0x0a, 0, 0, 0, 0x11, 0xee, 0x00, 0xff]
    );
}

#[test]
fn test_dump_string() {
    let dump = SynthMinidump::with_endian(Endian::Little);
    let s = DumpString::new("hello", Endian::Little);
    let contents = dump.add(s).finish().unwrap();
    // Skip over the header
    assert_eq!(
        &contents[mem::size_of::<md::MINIDUMP_HEADER>()..],
        &[
            0xa, 0x0, 0x0, 0x0, // length
            b'h', 0x0, b'e', 0x0, b'l', 0x0, b'l', 0x0, b'o', 0x0
        ]
    );
}

#[test]
fn test_list_stream() {
    let list = ListStream::<Section>::new(md::MINIDUMP_STREAM_TYPE::ThreadListStream, Endian::Little)
        .add(Section::with_endian(Endian::Little).D32(0xa0a0a0a0))
        .add(Section::with_endian(Endian::Little).D32(0xb0b0b0b0));
    let section: Section = list.into();
    section.start().set_const(0);
    assert_eq!(
        section.get_contents().unwrap(),
        vec![2, 0, 0, 0, 0xa0, 0xa0, 0xa0, 0xa0, 0xb0, 0xb0, 0xb0, 0xb0]
    );
}

#[test]
fn test_memory64_list() {
    let memory = Memory::with_section(
        Section::with_endian(Endian::Little).append_bytes(b"abcd"),
        0x1000,
    );
    let contents = SynthMinidump::new()
        .add_system_info(SystemInfo::new(Endian::Little))
        .add_memory64(memory)
        .finish()
        .unwrap();
    // The range's bytes come last, right before the stream directory.
    let header = mem::size_of::<md::MINIDUMP_HEADER>();
    let sysinfo = 56;
    let list = header + sysinfo;
    assert_eq!(&contents[list..list + 8], &[1, 0, 0, 0, 0, 0, 0, 0]);
    let base_rva = list + 32;
    assert_eq!(contents[list + 8] as usize, base_rva);
    assert_eq!(&contents[base_rva..base_rva + 4], b"abcd");
}

#[test]
fn test_heap_image() {
    let image = HeapImage::new(0x2000, 0x40, 4)
        .put_map(0x2000, 0x2000, 129)
        .put_seq_string(0x2010, 0x2000, "ok");
    let section: Section = image.into_memory().into();
    let bytes = section.get_contents().unwrap();
    assert_eq!(&bytes[0..4], &[0x01, 0x20, 0, 0]);
    assert_eq!(bytes[8], 129);
    assert_eq!(&bytes[0x10..0x14], &[0x01, 0x20, 0, 0]);
    assert_eq!(&bytes[0x18..0x1c], &[4, 0, 0, 0]);
    assert_eq!(&bytes[0x1c..0x1e], b"ok");
}
