// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

use encoding_rs::UTF_16LE;
use memmap2::Mmap;
use num_traits::FromPrimitive;
use scroll::ctx::{SizeWith, TryFromCtx};
use scroll::{Pread, LE};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::ops::Deref;
use std::path::Path;
use tracing::{debug, info, warn};

use grokdump_common::format::{self as md, MINIDUMP_STREAM_TYPE};
use grokdump_common::layout::{self, LayoutError};
use grokdump_common::traits::Module;

use crate::context::{Arch, CpuContext};
use crate::memory::{AddressSpace, ReadMemory};

/// An index over the streams of a minidump.
///
/// The `DumpFile` struct holds the dump's bytes and everything decoded from its stream
/// directory. It can be instantiated by calling [`DumpFile::read`] or
/// [`DumpFile::read_path`].
///
/// ```no_run
/// use grokdump::DumpFile;
///
/// # fn foo() -> Result<(), grokdump::Error> {
/// let dump = DumpFile::read_path("crash.dmp")?;
/// println!("{} threads", dump.threads.len());
/// # Ok(())
/// # }
/// ```
pub struct DumpFile<T>
where
    T: Deref<Target = [u8]>,
{
    data: T,
    /// The raw minidump header from the file.
    pub header: md::MINIDUMP_HEADER,
    pub system_info: md::MINIDUMP_SYSTEM_INFO,
    arch: Arch,
    pub exception: Option<MinidumpException>,
    pub threads: Vec<MinidumpThread>,
    thread_map: HashMap<u32, usize>,
    pub modules: Vec<MinidumpModule>,
    memory: AddressSpace,
}

/// Errors encountered while reading a `DumpFile`.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("File not found")]
    FileNotFound,
    #[error("I/O error")]
    IoError,
    #[error("Missing minidump header (empty minidump?)")]
    MissingHeader,
    #[error("Missing stream directory (heavily truncated minidump?)")]
    MissingDirectory,
    #[error("Error reading stream")]
    StreamReadFailure,
    #[error("Stream size mismatch: expected {expected} bytes, found {actual} bytes")]
    StreamSizeMismatch { expected: usize, actual: usize },
    #[error("Minidump contains more than one stream of type {0}")]
    DuplicateStream(u32),
    #[error("Minidump has no system info stream")]
    MissingSystemInfo,
    #[error("Unsupported processor architecture {0}")]
    UnsupportedArchitecture(u16),
    #[error("Error reading CPU context")]
    ContextReadFailure,
    #[error("No thread with id {0}")]
    ThreadNotFound(u32),
    #[error(transparent)]
    Layout(#[from] LayoutError),
}

impl Error {
    /// Returns just the name of the error, as a more human-friendly version of
    /// an error-code for error logging.
    pub fn name(&self) -> &'static str {
        match self {
            Error::FileNotFound => "FileNotFound",
            Error::IoError => "IoError",
            Error::MissingHeader => "MissingHeader",
            Error::MissingDirectory => "MissingDirectory",
            Error::StreamReadFailure => "StreamReadFailure",
            Error::StreamSizeMismatch { .. } => "StreamSizeMismatch",
            Error::DuplicateStream(_) => "DuplicateStream",
            Error::MissingSystemInfo => "MissingSystemInfo",
            Error::UnsupportedArchitecture(_) => "UnsupportedArchitecture",
            Error::ContextReadFailure => "ContextReadFailure",
            Error::ThreadNotFound(_) => "ThreadNotFound",
            Error::Layout(_) => "LayoutError",
        }
    }
}

/// A thread from the thread list stream.
#[derive(Clone, Debug)]
pub struct MinidumpThread {
    pub raw: md::MINIDUMP_THREAD,
}

impl MinidumpThread {
    pub fn id(&self) -> u32 {
        self.raw.thread_id
    }

    /// The start address of the captured stack memory.
    pub fn stack_start(&self) -> u64 {
        self.raw.stack.start_of_memory_range
    }

    /// One past the last captured stack byte.
    pub fn stack_end(&self) -> u64 {
        self.stack_start()
            .saturating_add(self.raw.stack.memory.data_size as u64)
    }
}

/// A module from the module list stream.
#[derive(Clone, Debug)]
pub struct MinidumpModule {
    pub raw: md::MINIDUMP_MODULE,
    /// The full path the module was loaded from.
    pub name: String,
}

impl MinidumpModule {
    /// Create a `MinidumpModule` with some basic info.
    ///
    /// Useful for testing.
    pub fn new(base: u64, size: u32, name: &str) -> MinidumpModule {
        MinidumpModule {
            raw: md::MINIDUMP_MODULE {
                base_of_image: base,
                size_of_image: size,
                ..md::MINIDUMP_MODULE::default()
            },
            name: String::from(name),
        }
    }

    pub fn file_version(&self) -> String {
        let v = &self.raw.version_info;
        format_version(v.file_version_hi, v.file_version_lo)
    }

    pub fn product_version(&self) -> String {
        let v = &self.raw.version_info;
        format_version(v.product_version_hi, v.product_version_lo)
    }

    pub fn timestamp(&self) -> u32 {
        self.raw.time_date_stamp
    }
}

fn format_version(hi: u32, lo: u32) -> String {
    format!("{}.{}.{}.{}", hi >> 16, hi & 0xffff, lo >> 16, lo & 0xffff)
}

impl Module for MinidumpModule {
    fn base_address(&self) -> u64 {
        self.raw.base_of_image
    }
    fn size(&self) -> u64 {
        self.raw.size_of_image as u64
    }
    fn code_file(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.name)
    }
}

/// The exception stream: why the process crashed, and the crashing thread's registers.
#[derive(Clone, Debug)]
pub struct MinidumpException {
    pub thread_id: u32,
    pub code: u32,
    pub flags: u32,
    pub address: u64,
    pub parameters: Vec<u64>,
    pub context: CpuContext,
}

/// Produce a slice of `bytes` corresponding to the offset and size in `loc`, or an
/// `Error` if the data is not fully contained within `bytes`.
fn location_slice<'a>(
    bytes: &'a [u8],
    loc: &md::MINIDUMP_LOCATION_DESCRIPTOR,
) -> Result<&'a [u8], Error> {
    let start = loc.rva as usize;
    start
        .checked_add(loc.data_size as usize)
        .and_then(|end| bytes.get(start..end))
        .ok_or(Error::StreamReadFailure)
}

/// Read a `MINIDUMP_STRING` at `rva`, dropping any trailing NULs.
pub fn read_minidump_string(bytes: &[u8], rva: md::RVA) -> Option<String> {
    let record = layout::MINIDUMP_STRING.read(bytes, rva as usize, LE).ok()?;
    let buffer = record.bytes("buffer")?;
    if buffer.len() % 2 != 0 {
        return None;
    }
    let (s, _) = UTF_16LE.decode_without_bom_handling(buffer);
    Some(s.trim_end_matches('\0').to_owned())
}

/// Check that a list of `number_of_entries` records of `size_of_entry` bytes after an
/// `offset` byte header exactly fills `buf`.
fn ensure_exact_size(
    buf: &[u8],
    number_of_entries: usize,
    size_of_entry: usize,
    offset: usize,
) -> Result<usize, Error> {
    let expected_size = number_of_entries
        .checked_mul(size_of_entry)
        .and_then(|v| v.checked_add(offset))
        .ok_or(Error::StreamReadFailure)?;
    if buf.len() != expected_size {
        return Err(Error::StreamSizeMismatch {
            expected: expected_size,
            actual: buf.len(),
        });
    }
    Ok(number_of_entries)
}

fn read_list<'a, T>(bytes: &'a [u8], offset: &mut usize, count: usize) -> Result<Vec<T>, Error>
where
    T: TryFromCtx<'a, scroll::Endian, [u8], Error = scroll::Error>,
{
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let raw: T = bytes
            .gread_with(offset, LE)
            .or(Err(Error::StreamReadFailure))?;
        entries.push(raw);
    }
    Ok(entries)
}

/// Read a `u32` count followed by that many `T`s. The stream must contain nothing else.
fn read_stream_list<'a, T>(bytes: &'a [u8]) -> Result<Vec<T>, Error>
where
    T: TryFromCtx<'a, scroll::Endian, [u8], Error = scroll::Error>,
    T: SizeWith<scroll::Endian>,
{
    let mut offset = 0;
    let u: u32 = bytes
        .gread_with(&mut offset, LE)
        .or(Err(Error::StreamReadFailure))?;
    let count = ensure_exact_size(bytes, u as usize, <T>::size_with(&LE), 4)?;
    read_list(bytes, &mut offset, count)
}

/// Stream types that may appear at most once.
const UNIQUE_STREAMS: &[MINIDUMP_STREAM_TYPE] = &[
    MINIDUMP_STREAM_TYPE::ThreadListStream,
    MINIDUMP_STREAM_TYPE::ModuleListStream,
    MINIDUMP_STREAM_TYPE::MemoryListStream,
    MINIDUMP_STREAM_TYPE::ExceptionStream,
    MINIDUMP_STREAM_TYPE::SystemInfoStream,
    MINIDUMP_STREAM_TYPE::Memory64ListStream,
];

impl DumpFile<Mmap> {
    /// Read a `DumpFile` from a `Path` to a file on disk.
    pub fn read_path<P>(path: P) -> Result<DumpFile<Mmap>, Error>
    where
        P: AsRef<Path>,
    {
        let f = File::open(path).or(Err(Error::FileNotFound))?;
        let mmap = unsafe { Mmap::map(&f).or(Err(Error::IoError))? };
        DumpFile::read(mmap)
    }
}

impl<T> DumpFile<T>
where
    T: Deref<Target = [u8]>,
{
    /// Read a `DumpFile` from the provided `data`.
    ///
    /// Typically this will be a `Vec<u8>` or `&[u8]` with the full contents of the minidump,
    /// but you can also use something like `memmap2::Mmap`.
    pub fn read(data: T) -> Result<DumpFile<T>, Error> {
        let mut offset = 0;
        let header: md::MINIDUMP_HEADER = data
            .gread_with(&mut offset, LE)
            .or(Err(Error::MissingHeader))?;
        if header.signature != md::MINIDUMP_SIGNATURE {
            warn!(
                "Unsupported minidump header magic {:#x}, continuing anyway",
                header.signature
            );
        }

        offset = header.stream_directory_rva as usize;
        let dir_size = <md::MINIDUMP_DIRECTORY>::size_with(&LE);
        let needed = (header.stream_count as usize)
            .checked_mul(dir_size)
            .and_then(|v| v.checked_add(offset))
            .ok_or(Error::MissingDirectory)?;
        if data.len() < needed {
            return Err(Error::MissingDirectory);
        }

        let mut directory: Vec<md::MINIDUMP_DIRECTORY> =
            Vec::with_capacity(header.stream_count as usize);
        for _ in 0..header.stream_count {
            let dir: md::MINIDUMP_DIRECTORY = data
                .gread_with(&mut offset, LE)
                .or(Err(Error::MissingDirectory))?;
            debug!(
                "stream {} ({:?}): {} bytes at {:#x}",
                dir.stream_type,
                MINIDUMP_STREAM_TYPE::from_u32(dir.stream_type),
                dir.location.data_size,
                dir.location.rva
            );
            if let Some(known) = MINIDUMP_STREAM_TYPE::from_u32(dir.stream_type) {
                if UNIQUE_STREAMS.contains(&known)
                    && directory.iter().any(|d| d.stream_type == dir.stream_type)
                {
                    return Err(Error::DuplicateStream(dir.stream_type));
                }
            }
            directory.push(dir);
        }

        // The architecture decides how the exception context is decoded, so read it first.
        let sysinfo_dir = directory
            .iter()
            .find(|d| d.stream_type == u32::from(MINIDUMP_STREAM_TYPE::SystemInfoStream))
            .ok_or(Error::MissingSystemInfo)?;
        let system_info: md::MINIDUMP_SYSTEM_INFO = location_slice(&data, &sysinfo_dir.location)?
            .pread_with(0, LE)
            .or(Err(Error::StreamReadFailure))?;
        let arch = Arch::from_processor_architecture(system_info.processor_architecture)
            .ok_or(Error::UnsupportedArchitecture(
                system_info.processor_architecture,
            ))?;

        let mut dump = DumpFile {
            header,
            system_info,
            arch,
            exception: None,
            threads: vec![],
            thread_map: HashMap::new(),
            modules: vec![],
            memory: AddressSpace::default(),
            data,
        };
        for dir in &directory {
            dump.read_stream(dir)?;
        }
        if dump.memory.has_partial_memory() {
            info!("Minidump contains a memory list stream, this is not a full memory dump");
        }
        Ok(dump)
    }

    fn read_stream(&mut self, dir: &md::MINIDUMP_DIRECTORY) -> Result<(), Error> {
        let bytes = location_slice(&self.data, &dir.location)?;
        match MINIDUMP_STREAM_TYPE::from_u32(dir.stream_type) {
            Some(MINIDUMP_STREAM_TYPE::ThreadListStream) => {
                let raw: Vec<md::MINIDUMP_THREAD> = read_stream_list(bytes)?;
                for (i, raw) in raw.into_iter().enumerate() {
                    self.thread_map.insert(raw.thread_id, i);
                    self.threads.push(MinidumpThread { raw });
                }
            }
            Some(MINIDUMP_STREAM_TYPE::ModuleListStream) => {
                let raw: Vec<md::MINIDUMP_MODULE> = read_stream_list(bytes)?;
                for raw in raw {
                    let name = read_minidump_string(&self.data, raw.module_name_rva)
                        .unwrap_or_else(|| {
                            warn!(
                                "Couldn't read module name at {:#x}",
                                raw.module_name_rva
                            );
                            String::new()
                        });
                    self.modules.push(MinidumpModule { raw, name });
                }
            }
            Some(MINIDUMP_STREAM_TYPE::MemoryListStream) => {
                let raw: Vec<md::MINIDUMP_MEMORY_DESCRIPTOR> = read_stream_list(bytes)?;
                self.memory.add_memory(&raw);
            }
            Some(MINIDUMP_STREAM_TYPE::Memory64ListStream) => {
                let mut offset = 0;
                let list: md::MINIDUMP_MEMORY64_LIST = bytes
                    .gread_with(&mut offset, LE)
                    .or(Err(Error::StreamReadFailure))?;
                let count = ensure_exact_size(
                    bytes,
                    list.number_of_memory_ranges as usize,
                    <md::MINIDUMP_MEMORY_DESCRIPTOR64>::size_with(&LE),
                    offset,
                )?;
                let raw: Vec<md::MINIDUMP_MEMORY_DESCRIPTOR64> =
                    read_list(bytes, &mut offset, count)?;
                self.memory.add_memory64(list.base_rva, &raw);
            }
            Some(MINIDUMP_STREAM_TYPE::ExceptionStream) => {
                let raw: md::MINIDUMP_EXCEPTION_STREAM = bytes
                    .pread_with(0, LE)
                    .or(Err(Error::StreamReadFailure))?;
                let context = self.context_at(&raw.thread_context)?;
                let record = &raw.exception_record;
                let count = (record.number_parameters as usize)
                    .min(md::EXCEPTION_MAXIMUM_PARAMETERS);
                self.exception = Some(MinidumpException {
                    thread_id: raw.thread_id,
                    code: record.exception_code,
                    flags: record.exception_flags,
                    address: record.exception_address,
                    parameters: record.exception_information[..count].to_vec(),
                    context,
                });
            }
            // Already handled.
            Some(MINIDUMP_STREAM_TYPE::SystemInfoStream) => {}
            _ => {}
        }
        Ok(())
    }

    fn context_at(&self, loc: &md::MINIDUMP_LOCATION_DESCRIPTOR) -> Result<CpuContext, Error> {
        let bytes = location_slice(&self.data, loc).or(Err(Error::ContextReadFailure))?;
        let context = CpuContext::read(self.arch, bytes)?;
        if !context.has_matching_cpu_flag() {
            warn!(
                "context flags {:#x} don't match the {} architecture",
                context.context_flags, self.arch
            );
        }
        Ok(context)
    }

    /// The processor architecture from the system info stream.
    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// The address space covered by the dump's memory lists.
    pub fn memory(&self) -> &AddressSpace {
        &self.memory
    }

    pub fn thread(&self, id: u32) -> Option<&MinidumpThread> {
        self.thread_map.get(&id).map(|&i| &self.threads[i])
    }

    /// Decode the register state recorded for `thread`.
    pub fn thread_context(&self, thread: &MinidumpThread) -> Result<CpuContext, Error> {
        self.context_at(&thread.raw.thread_context)
    }

    /// The thread the exception stream names.
    pub fn exception_thread(&self) -> Result<Option<&MinidumpThread>, Error> {
        match self.exception {
            None => Ok(None),
            Some(ref e) => self
                .thread(e.thread_id)
                .map(Some)
                .ok_or(Error::ThreadNotFound(e.thread_id)),
        }
    }

    /// Write a human-readable description of the dump's streams to `f`.
    pub fn print<W: Write + ?Sized>(&self, f: &mut W) -> io::Result<()> {
        writeln!(
            f,
            "Minidump: {} streams, architecture {}",
            self.header.stream_count, self.arch
        )?;
        writeln!(f, "  threads: {}", self.threads.len())?;
        writeln!(f, "  modules: {}", self.modules.len())?;
        writeln!(
            f,
            "  memory ranges: {}{}",
            self.memory.regions().count(),
            if self.memory.has_partial_memory() {
                " (not a full memory dump)"
            } else {
                ""
            }
        )?;
        match self.exception {
            Some(ref e) => writeln!(f, "  exception: {:08X} in thread {}", e.code, e.thread_id),
            None => writeln!(f, "  no exception"),
        }
    }
}

impl<T> ReadMemory for DumpFile<T>
where
    T: Deref<Target = [u8]>,
{
    fn arch(&self) -> Arch {
        self.arch
    }

    fn address_space(&self) -> &AddressSpace {
        &self.memory
    }

    fn raw_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl<T> fmt::Debug for DumpFile<T>
where
    T: Deref<Target = [u8]>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DumpFile")
            .field("header", &self.header)
            .field("arch", &self.arch)
            .field("threads", &self.threads.len())
            .field("modules", &self.modules.len())
            .finish()
    }
}
