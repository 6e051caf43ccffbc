// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! The minidump container format.
//!
//! A [`Minidump`] owns a seekable reader over a minidump file plus the
//! parsed header and stream directory. Individual streams are parsed on
//! first request through the `get_*` accessors and cached for the life of
//! the `Minidump`. All parsing is bounds-checked against the declared sizes
//! in the file, and every numeric field is byte-swapped when the file was
//! written on a machine of the opposite endianness.

use chrono::prelude::*;
use encoding::all::{UTF_16BE, UTF_16LE};
use encoding::{DecoderTrap, Encoding};
use failure::Fail;
use log::warn;
use num_traits::FromPrimitive;
use scroll::ctx::SizeWith;
use scroll::{Endian, Pread};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::prelude::*;
use std::io::{self, SeekFrom};
use std::path::Path;

use crate::context::MinidumpContext;
use crate::iostuff::{write_bytes, Readable};
use crate::system_info::{Cpu, Os};
use airbag_common::format as md;
use airbag_common::format::MDStreamType;
use airbag_common::range_map::RangeMap;
use airbag_common::traits::{MemoryRegion, Module};

/// Errors encountered while reading a minidump.
#[derive(Debug, Fail, PartialEq)]
pub enum Error {
    #[fail(display = "File not found")]
    FileNotFound,
    #[fail(display = "I/O error")]
    IoError,
    #[fail(display = "Missing minidump header")]
    MissingHeader,
    #[fail(display = "Header mismatch")]
    HeaderMismatch,
    #[fail(display = "Minidump version mismatch")]
    VersionMismatch,
    #[fail(display = "Missing stream directory")]
    MissingDirectory,
    #[fail(display = "Stream not found")]
    StreamNotFound,
    #[fail(display = "Stream appears more than once")]
    DuplicateStream,
    #[fail(display = "Stream size doesn't match the directory entry")]
    StreamSizeMismatch,
    #[fail(display = "Error reading stream contents")]
    StreamReadFailure,
    #[fail(display = "Malformed stream data")]
    DataError,
    #[fail(display = "Error reading CodeView record")]
    CodeViewReadFailure,
}

/// The singleton stream types; a valid file contains at most one directory
/// entry for each of these.
static SINGLETON_STREAMS: [MDStreamType; 6] = [
    MDStreamType::ThreadListStream,
    MDStreamType::ModuleListStream,
    MDStreamType::MemoryListStream,
    MDStreamType::ExceptionStream,
    MDStreamType::SystemInfoStream,
    MDStreamType::MiscInfoStream,
];

/// A range of memory captured from the failed process.
#[derive(Debug, Clone)]
pub struct MinidumpMemory {
    /// The descriptor this range was loaded from.
    pub desc: md::MDMemoryDescriptor,
    /// The address of this range in the original process.
    pub base_address: u64,
    /// The size of this range.
    pub size: u64,
    /// The contents of the range.
    pub bytes: Vec<u8>,
    /// The byte order of the process that wrote the bytes.
    pub endian: Endian,
}

impl MinidumpMemory {
    /// Build a region from bare parts, mostly useful for tests and for
    /// callers that obtained stack bytes some other way.
    pub fn new(base_address: u64, bytes: Vec<u8>, endian: Endian) -> MinidumpMemory {
        MinidumpMemory {
            desc: md::MDMemoryDescriptor::default(),
            base_address,
            size: bytes.len() as u64,
            bytes,
            endian,
        }
    }

    fn offset_of(&self, address: u64, width: u64) -> Option<usize> {
        if address < self.base_address {
            return None;
        }
        let offset = address - self.base_address;
        if offset.checked_add(width)? > self.size {
            return None;
        }
        Some(offset as usize)
    }

    /// Write the entire contents of this region to `f` as a hex string.
    pub fn print_contents<T: Write>(&self, f: &mut T) -> io::Result<()> {
        write!(f, "0x")?;
        write_bytes(f, &self.bytes)?;
        writeln!(f)?;
        Ok(())
    }
}

impl MemoryRegion for MinidumpMemory {
    fn base_address(&self) -> u64 {
        self.base_address
    }
    fn size(&self) -> u64 {
        self.size
    }
    fn memory_at_address_u8(&self, address: u64) -> Option<u8> {
        let offset = self.offset_of(address, 1)?;
        self.bytes.pread_with(offset, self.endian).ok()
    }
    fn memory_at_address_u16(&self, address: u64) -> Option<u16> {
        let offset = self.offset_of(address, 2)?;
        self.bytes.pread_with(offset, self.endian).ok()
    }
    fn memory_at_address_u32(&self, address: u64) -> Option<u32> {
        let offset = self.offset_of(address, 4)?;
        self.bytes.pread_with(offset, self.endian).ok()
    }
    fn memory_at_address_u64(&self, address: u64) -> Option<u64> {
        let offset = self.offset_of(address, 8)?;
        self.bytes.pread_with(offset, self.endian).ok()
    }
}

/// A thread from the thread-list stream.
#[derive(Debug, Clone)]
pub struct MinidumpThread {
    /// The raw thread record.
    pub raw: md::MDRawThread,
    /// The CPU context at the time the dump was written, if it could be
    /// parsed. An unknown CPU kind leaves this `None` without failing the
    /// thread list.
    pub context: Option<MinidumpContext>,
    /// The thread's stack memory.
    pub stack: MinidumpMemory,
}

impl MinidumpThread {
    pub fn print<T: Write>(&self, f: &mut T) -> io::Result<()> {
        write!(
            f,
            r#"MDRawThread
  thread_id                   = {:#x}
  suspend_count               = {}
  priority_class              = {:#x}
  priority                    = {:#x}
  teb                         = {:#x}
  stack.start_of_memory_range = {:#x}
  stack.memory.data_size      = {:#x}
  stack.memory.rva            = {:#x}
  thread_context.data_size    = {:#x}
  thread_context.rva          = {:#x}
"#,
            self.raw.thread_id,
            self.raw.suspend_count,
            self.raw.priority_class,
            self.raw.priority,
            self.raw.teb,
            self.raw.stack.start_of_memory_range,
            self.raw.stack.memory.data_size,
            self.raw.stack.memory.rva,
            self.raw.thread_context.data_size,
            self.raw.thread_context.rva,
        )?;
        if let Some(ref context) = self.context {
            writeln!(f)?;
            context.print(f)?;
        } else {
            writeln!(f, "  (no context)")?;
            writeln!(f)?;
        }
        writeln!(f, "Stack")?;
        self.stack.print_contents(f)?;
        writeln!(f)?;
        Ok(())
    }
}

/// The thread-list stream.
#[derive(Debug, Clone)]
pub struct MinidumpThreadList {
    /// The threads, in the order they were stored.
    pub threads: Vec<MinidumpThread>,
    /// Map of thread id to index in `threads`; thread ids are unique
    /// within a valid dump.
    thread_ids: HashMap<u32, usize>,
}

impl MinidumpThreadList {
    /// Look up a thread by its id.
    pub fn get_thread(&self, thread_id: u32) -> Option<&MinidumpThread> {
        let &index = self.thread_ids.get(&thread_id)?;
        self.threads.get(index)
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn print<T: Write>(&self, f: &mut T) -> io::Result<()> {
        write!(
            f,
            r#"MinidumpThreadList
  thread_count = {}

"#,
            self.threads.len()
        )?;
        for (i, thread) in self.threads.iter().enumerate() {
            writeln!(f, "thread[{}]", i)?;
            thread.print(f)?;
        }
        Ok(())
    }
}

/// A parsed CodeView record from a module.
#[derive(Debug, Clone)]
pub enum CodeView {
    Pdb70(CodeViewPdb70),
    Pdb20(CodeViewPdb20),
    /// A record with a signature this processor does not understand,
    /// kept as raw bytes.
    Unknown(Vec<u8>),
}

/// A PDB 7.0 CodeView record with its embedded path.
#[derive(Debug, Clone)]
pub struct CodeViewPdb70 {
    pub raw: md::MDCVInfoPDB70,
    pub pdb_file_name: String,
}

/// A PDB 2.0 CodeView record with its embedded path.
#[derive(Debug, Clone)]
pub struct CodeViewPdb20 {
    pub raw: md::MDCVInfoPDB20,
    pub pdb_file_name: String,
}

/// A miscellaneous debug record with its decoded name.
#[derive(Debug, Clone)]
pub struct MinidumpMiscDebugRecord {
    pub raw: md::MDImageDebugMisc,
    pub name: String,
}

/// An executable or shared library from the module-list stream.
#[derive(Debug, Clone)]
pub struct MinidumpModule {
    /// The raw module record.
    pub raw: md::MDRawModule,
    /// The module path, decoded from the file.
    pub name: String,
    /// The CodeView record identifying the module's debug info, if any.
    pub codeview_info: Option<CodeView>,
    /// The miscellaneous debug record, if any.
    pub misc_info: Option<MinidumpMiscDebugRecord>,
}

impl MinidumpModule {
    /// Build a module from bare parts, mostly useful for tests.
    pub fn new(base: u64, size: u32, name: &str) -> MinidumpModule {
        MinidumpModule {
            raw: md::MDRawModule {
                base_of_image: base,
                size_of_image: size,
                ..md::MDRawModule::default()
            },
            name: String::from(name),
            codeview_info: None,
            misc_info: None,
        }
    }

    pub fn print<T: Write>(&self, f: &mut T) -> io::Result<()> {
        write!(
            f,
            r#"MDRawModule
  base_of_image                   = {:#x}
  size_of_image                   = {:#x}
  checksum                        = {:#x}
  time_date_stamp                 = {:#x}
  module_name_rva                 = {:#x}
  (module_name)                   = "{}"
  (debug_file)                    = "{}"
  (debug_identifier)              = "{}"

"#,
            self.raw.base_of_image,
            self.raw.size_of_image,
            self.raw.checksum,
            self.raw.time_date_stamp,
            self.raw.module_name_rva,
            self.name,
            self.debug_file().unwrap_or(Cow::Borrowed("(null)")),
            self.debug_identifier().unwrap_or(Cow::Borrowed("(null)")),
        )
    }
}

impl Module for MinidumpModule {
    fn base_address(&self) -> u64 {
        self.raw.base_of_image
    }
    fn size(&self) -> u64 {
        self.raw.size_of_image as u64
    }
    fn code_file(&self) -> Cow<str> {
        Cow::Borrowed(&self.name)
    }
    fn code_identifier(&self) -> Cow<str> {
        Cow::Owned(format!(
            "{0:08X}{1:x}",
            self.raw.time_date_stamp, self.raw.size_of_image
        ))
    }
    fn debug_file(&self) -> Option<Cow<str>> {
        match self.codeview_info {
            Some(CodeView::Pdb70(ref cv)) => Some(Cow::Borrowed(&cv.pdb_file_name[..])),
            Some(CodeView::Pdb20(ref cv)) => Some(Cow::Borrowed(&cv.pdb_file_name[..])),
            // An unusable CodeView record falls back to the miscellaneous
            // debug record, same as no CodeView record at all.
            _ => self
                .misc_info
                .as_ref()
                .map(|misc| Cow::Borrowed(&misc.name[..])),
        }
    }
    fn debug_identifier(&self) -> Option<Cow<str>> {
        match self.codeview_info {
            Some(CodeView::Pdb70(ref cv)) => {
                let g = &cv.raw.signature;
                Some(Cow::Owned(format!(
                    "{:08X}{:04X}{:04X}{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}{:x}",
                    g.data1,
                    g.data2,
                    g.data3,
                    g.data4[0],
                    g.data4[1],
                    g.data4[2],
                    g.data4[3],
                    g.data4[4],
                    g.data4[5],
                    g.data4[6],
                    g.data4[7],
                    cv.raw.age
                )))
            }
            Some(CodeView::Pdb20(ref cv)) => Some(Cow::Owned(format!(
                "{:08X}{:x}",
                cv.raw.signature, cv.raw.age
            ))),
            _ => None,
        }
    }
    fn version(&self) -> Option<Cow<str>> {
        let info = &self.raw.version_info;
        if info.signature == md::MD_VSFIXEDFILEINFO_SIGNATURE {
            Some(Cow::Owned(format!(
                "{}.{}.{}.{}",
                info.file_version_hi >> 16,
                info.file_version_hi & 0xffff,
                info.file_version_lo >> 16,
                info.file_version_lo & 0xffff
            )))
        } else {
            None
        }
    }
}

/// The module-list stream.
#[derive(Debug, Clone, Default)]
pub struct MinidumpModuleList {
    /// The modules, in the order they were stored.
    modules: Vec<MinidumpModule>,
    /// Map from address range to index in `modules`.
    range_map: RangeMap<u64, usize>,
}

impl MinidumpModuleList {
    /// Build a module list from loose modules.
    ///
    /// Returns `None` if any module's address range is empty, wraps, or
    /// overlaps another module's.
    pub fn from_modules(modules: Vec<MinidumpModule>) -> Option<MinidumpModuleList> {
        let mut range_map = RangeMap::new();
        for (index, module) in modules.iter().enumerate() {
            if !range_map.store_range(
                module.raw.base_of_image,
                module.raw.size_of_image as u64,
                index,
            ) {
                return None;
            }
        }
        Some(MinidumpModuleList { modules, range_map })
    }

    /// The module containing the main executable, by convention the first
    /// one stored.
    pub fn main_module(&self) -> Option<&MinidumpModule> {
        self.modules.first()
    }

    /// The module whose address range contains `address`.
    pub fn module_at_address(&self, address: u64) -> Option<&MinidumpModule> {
        let &index = self.range_map.retrieve_range(address)?;
        self.modules.get(index)
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Iterate over modules in storage order.
    pub fn iter(&self) -> impl Iterator<Item = &MinidumpModule> {
        self.modules.iter()
    }

    /// The modules, sorted by base address.
    pub fn by_addr(&self) -> Vec<&MinidumpModule> {
        let mut sorted: Vec<&MinidumpModule> = self.modules.iter().collect();
        sorted.sort_by_key(|module| module.raw.base_of_image);
        sorted
    }

    pub fn print<T: Write>(&self, f: &mut T) -> io::Result<()> {
        write!(
            f,
            r#"MinidumpModuleList
  module_count = {}

"#,
            self.modules.len()
        )?;
        for (i, module) in self.modules.iter().enumerate() {
            writeln!(f, "module[{}]", i)?;
            module.print(f)?;
        }
        Ok(())
    }
}

/// The memory-list stream.
#[derive(Debug, Clone, Default)]
pub struct MinidumpMemoryList {
    regions: Vec<MinidumpMemory>,
    /// Map from address range to index in `regions`.
    range_map: RangeMap<u64, usize>,
}

impl MinidumpMemoryList {
    /// The region whose address range contains `address`.
    pub fn memory_at_address(&self, address: u64) -> Option<&MinidumpMemory> {
        let &index = self.range_map.retrieve_range(address)?;
        self.regions.get(index)
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Iterate over regions in storage order.
    pub fn iter(&self) -> impl Iterator<Item = &MinidumpMemory> {
        self.regions.iter()
    }

    pub fn print<T: Write>(&self, f: &mut T) -> io::Result<()> {
        write!(
            f,
            r#"MinidumpMemoryList
  region_count = {}

"#,
            self.regions.len()
        )?;
        for (i, region) in self.regions.iter().enumerate() {
            write!(
                f,
                r#"region[{}]
MDMemoryDescriptor
  start_of_memory_range = {:#x}
  memory.data_size      = {:#x}
  memory.rva            = {:#x}
Memory
"#,
                i, region.desc.start_of_memory_range, region.desc.memory.data_size, region.desc.memory.rva
            )?;
            region.print_contents(f)?;
            writeln!(f)?;
        }
        Ok(())
    }
}

/// The reason a process crashed, derived from its exception code.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CrashReason {
    AccessViolation,
    ArrayBoundsExceeded,
    Breakpoint,
    DatatypeMisalignment,
    FloatDivideByZero,
    IllegalInstruction,
    InPageError,
    IntegerDivideByZero,
    PrivilegedInstruction,
    SingleStep,
    StackOverflow,
    /// An exception code without a friendly name.
    Unknown(u32),
}

impl CrashReason {
    pub fn from_exception_code(code: u32) -> CrashReason {
        match code {
            0x8000_0002 => CrashReason::DatatypeMisalignment,
            0x8000_0003 => CrashReason::Breakpoint,
            0x8000_0004 => CrashReason::SingleStep,
            0xc000_0005 => CrashReason::AccessViolation,
            0xc000_0006 => CrashReason::InPageError,
            0xc000_001d => CrashReason::IllegalInstruction,
            0xc000_008c => CrashReason::ArrayBoundsExceeded,
            0xc000_008e => CrashReason::FloatDivideByZero,
            0xc000_0094 => CrashReason::IntegerDivideByZero,
            0xc000_0096 => CrashReason::PrivilegedInstruction,
            0xc000_00fd => CrashReason::StackOverflow,
            _ => CrashReason::Unknown(code),
        }
    }
}

impl fmt::Display for CrashReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            CrashReason::AccessViolation => write!(f, "EXCEPTION_ACCESS_VIOLATION"),
            CrashReason::ArrayBoundsExceeded => write!(f, "EXCEPTION_ARRAY_BOUNDS_EXCEEDED"),
            CrashReason::Breakpoint => write!(f, "EXCEPTION_BREAKPOINT"),
            CrashReason::DatatypeMisalignment => write!(f, "EXCEPTION_DATATYPE_MISALIGNMENT"),
            CrashReason::FloatDivideByZero => write!(f, "EXCEPTION_FLT_DIVIDE_BY_ZERO"),
            CrashReason::IllegalInstruction => write!(f, "EXCEPTION_ILLEGAL_INSTRUCTION"),
            CrashReason::InPageError => write!(f, "EXCEPTION_IN_PAGE_ERROR"),
            CrashReason::IntegerDivideByZero => write!(f, "EXCEPTION_INT_DIVIDE_BY_ZERO"),
            CrashReason::PrivilegedInstruction => write!(f, "EXCEPTION_PRIV_INSTRUCTION"),
            CrashReason::SingleStep => write!(f, "EXCEPTION_SINGLE_STEP"),
            CrashReason::StackOverflow => write!(f, "EXCEPTION_STACK_OVERFLOW"),
            CrashReason::Unknown(code) => write!(f, "{:#010x}", code),
        }
    }
}

/// The exception stream.
#[derive(Debug, Clone)]
pub struct MinidumpException {
    /// The raw exception record.
    pub raw: md::MDRawExceptionStream,
    /// The id of the thread that raised the exception.
    pub thread_id: u32,
    /// The CPU context at the point of the exception, if it could be
    /// parsed. This is usually the context callers want for the crashed
    /// thread, in preference to the thread's own context, which reflects
    /// the exception handler instead.
    pub context: Option<MinidumpContext>,
}

impl MinidumpException {
    pub fn get_crash_reason(&self) -> CrashReason {
        CrashReason::from_exception_code(self.raw.exception_record.exception_code)
    }

    pub fn get_crash_address(&self) -> u64 {
        self.raw.exception_record.exception_address
    }

    pub fn print<T: Write>(&self, f: &mut T) -> io::Result<()> {
        write!(
            f,
            r#"MDException
  thread_id                                  = {:#x}
  exception_record.exception_code            = {:#x}
  exception_record.exception_flags           = {:#x}
  exception_record.exception_record          = {:#x}
  exception_record.exception_address         = {:#x}
  exception_record.number_parameters         = {}
"#,
            self.thread_id,
            self.raw.exception_record.exception_code,
            self.raw.exception_record.exception_flags,
            self.raw.exception_record.exception_record,
            self.raw.exception_record.exception_address,
            self.raw.exception_record.number_parameters,
        )?;
        let count = (self.raw.exception_record.number_parameters as usize)
            .min(md::MD_EXCEPTION_MAXIMUM_PARAMETERS);
        for index in 0..count {
            writeln!(
                f,
                "  exception_record.exception_information[{:2}] = {:#x}",
                index, self.raw.exception_record.exception_information[index]
            )?;
        }
        if let Some(ref context) = self.context {
            writeln!(f)?;
            context.print(f)?;
        } else {
            writeln!(f, "  (no context)")?;
            writeln!(f)?;
        }
        Ok(())
    }
}

/// The system-info stream.
#[derive(Debug, Clone)]
pub struct MinidumpSystemInfo {
    /// The raw system info record.
    pub raw: md::MDRawSystemInfo,
    /// The service-pack description, decoded from the file.
    pub csd_version: Option<String>,
}

impl MinidumpSystemInfo {
    pub fn cpu(&self) -> Cpu {
        Cpu::from_processor_architecture(self.raw.processor_architecture)
    }

    pub fn os(&self) -> Os {
        Os::from_platform_id(self.raw.platform_id)
    }

    /// The x86 CPUID vendor string, when the dump came from an x86.
    pub fn cpu_info(&self) -> Option<String> {
        match self.cpu() {
            Cpu::X86 => {
                let vendor: String = self.raw.cpu[..12]
                    .iter()
                    .take_while(|&&byte| byte != 0)
                    .map(|&byte| byte as char)
                    .collect();
                if vendor.is_empty() {
                    None
                } else {
                    Some(vendor)
                }
            }
            _ => None,
        }
    }

    /// The OS version in `major.minor.build` form, with the service pack
    /// appended when present.
    pub fn os_version(&self) -> String {
        let mut version = format!(
            "{}.{}.{}",
            self.raw.major_version, self.raw.minor_version, self.raw.build_number
        );
        if let Some(ref csd) = self.csd_version {
            if !csd.is_empty() {
                version.push(' ');
                version.push_str(csd);
            }
        }
        version
    }

    pub fn print<T: Write>(&self, f: &mut T) -> io::Result<()> {
        write!(
            f,
            r#"MDRawSystemInfo
  processor_architecture = {:#x}
  processor_level        = {}
  processor_revision     = {:#x}
  number_of_processors   = {}
  major_version          = {}
  minor_version          = {}
  build_number           = {}
  platform_id            = {:#x}
  (csd_version)          = "{}"

"#,
            self.raw.processor_architecture,
            self.raw.processor_level,
            self.raw.processor_revision,
            self.raw.number_of_processors,
            self.raw.major_version,
            self.raw.minor_version,
            self.raw.build_number,
            self.raw.platform_id,
            self.csd_version.as_deref().unwrap_or("(null)"),
        )
    }
}

/// The misc-info stream.
#[derive(Debug, Clone)]
pub struct MinidumpMiscInfo {
    /// The raw misc info record.
    pub raw: md::MDRawMiscInfo,
    /// The MISC_INFO_2 processor power fields, when stored.
    pub power_info: Option<md::MDMiscInfoPowerInfo>,
}

impl MinidumpMiscInfo {
    /// The process id, when the producer recorded one.
    pub fn process_id(&self) -> Option<u32> {
        if self.raw.flags1 & md::MD_MISCINFO_FLAGS1_PROCESS_ID != 0 {
            Some(self.raw.process_id)
        } else {
            None
        }
    }

    /// When the process started, when the producer recorded it.
    pub fn process_create_time(&self) -> Option<DateTime<Utc>> {
        if self.raw.flags1 & md::MD_MISCINFO_FLAGS1_PROCESS_TIMES != 0 {
            Some(Utc.timestamp(self.raw.process_create_time as i64, 0))
        } else {
            None
        }
    }

    pub fn print<T: Write>(&self, f: &mut T) -> io::Result<()> {
        write!(
            f,
            r#"MDRawMiscInfo
  size_of_info         = {}
  flags1               = {:#x}
  process_id           = {:#x}
  process_create_time  = {:#x}
  process_user_time    = {:#x}
  process_kernel_time  = {:#x}
"#,
            self.raw.size_of_info,
            self.raw.flags1,
            self.raw.process_id,
            self.raw.process_create_time,
            self.raw.process_user_time,
            self.raw.process_kernel_time,
        )?;
        if let Some(ref power) = self.power_info {
            write!(
                f,
                r#"  processor_max_mhz            = {}
  processor_current_mhz        = {}
  processor_mhz_limit          = {}
  processor_max_idle_state     = {:#x}
  processor_current_idle_state = {:#x}
"#,
                power.processor_max_mhz,
                power.processor_current_mhz,
                power.processor_mhz_limit,
                power.processor_max_idle_state,
                power.processor_current_idle_state,
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct StreamCache {
    thread_list: Option<MinidumpThreadList>,
    module_list: Option<MinidumpModuleList>,
    memory_list: Option<MinidumpMemoryList>,
    exception: Option<MinidumpException>,
    system_info: Option<MinidumpSystemInfo>,
    misc_info: Option<MinidumpMiscInfo>,
}

/// An open minidump file.
#[derive(Debug)]
pub struct Minidump<T: Readable> {
    reader: T,
    file_len: u64,
    /// The parsed file header.
    pub header: md::MDRawHeader,
    endian: Endian,
    directory: Vec<md::MDRawDirectory>,
    /// Map of stream type to index in `directory`.
    stream_map: HashMap<u32, usize>,
    streams: StreamCache,
}

impl Minidump<File> {
    /// Open and read the minidump at `path`.
    pub fn read_path<P: AsRef<Path>>(path: P) -> Result<Minidump<File>, Error> {
        let file = File::open(path).or(Err(Error::FileNotFound))?;
        Minidump::read(file)
    }
}

impl<T: Readable> Minidump<T> {
    /// Read the minidump header and stream directory from `reader`.
    ///
    /// The header signature is probed in both byte orders; a match in the
    /// opposite order marks the whole file for byte-swapping. The stream
    /// directory is read in full, and duplicate entries for the singleton
    /// stream types are rejected.
    pub fn read(mut reader: T) -> Result<Minidump<T>, Error> {
        let file_len = reader.seek(SeekFrom::End(0)).or(Err(Error::IoError))?;
        reader.seek(SeekFrom::Start(0)).or(Err(Error::IoError))?;
        let header_size = md::MDRawHeader::size_with(&Endian::Little);
        let mut header_bytes = vec![0u8; header_size];
        reader
            .read_exact(&mut header_bytes)
            .or(Err(Error::MissingHeader))?;

        let signature: u32 = header_bytes
            .pread_with(0, Endian::Little)
            .or(Err(Error::MissingHeader))?;
        let endian = if signature == md::MD_HEADER_SIGNATURE {
            Endian::Little
        } else {
            // The file may have been written on a machine of the opposite
            // endianness; the signature doubles as a byte-order marker.
            let swapped: u32 = header_bytes
                .pread_with(0, Endian::Big)
                .or(Err(Error::MissingHeader))?;
            if swapped != md::MD_HEADER_SIGNATURE {
                return Err(Error::HeaderMismatch);
            }
            Endian::Big
        };
        let header: md::MDRawHeader = header_bytes
            .pread_with(0, endian)
            .or(Err(Error::MissingHeader))?;
        // The high 16 bits of the version are implementation-specific.
        if header.version & 0x0000_ffff != md::MD_HEADER_VERSION {
            return Err(Error::VersionMismatch);
        }

        let mut dump = Minidump {
            reader,
            file_len,
            header,
            endian,
            directory: Vec::new(),
            stream_map: HashMap::new(),
            streams: StreamCache::default(),
        };

        let entry_size = md::MDRawDirectory::size_with(&endian);
        let directory_bytes = dump
            .read_bytes_at(
                dump.header.stream_directory_rva as u64,
                (dump.header.stream_count as usize)
                    .checked_mul(entry_size)
                    .ok_or(Error::MissingDirectory)?,
            )
            .or(Err(Error::MissingDirectory))?;
        let offset = &mut 0;
        for index in 0..dump.header.stream_count as usize {
            let entry: md::MDRawDirectory = directory_bytes
                .gread_with(offset, endian)
                .or(Err(Error::MissingDirectory))?;
            let is_singleton = SINGLETON_STREAMS
                .iter()
                .any(|&stream_type| stream_type as u32 == entry.stream_type);
            if is_singleton && dump.stream_map.contains_key(&entry.stream_type) {
                // A minidump should contain at most one of each of these
                // stream types.
                return Err(Error::DuplicateStream);
            }
            // Other stream types overwrite, last one wins.
            dump.stream_map.insert(entry.stream_type, index);
            dump.directory.push(entry);
        }
        Ok(dump)
    }

    /// The byte order of the file.
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// The directory entry for `stream_type`, if one exists.
    pub fn get_directory_entry(&self, stream_type: u32) -> Option<&md::MDRawDirectory> {
        let &index = self.stream_map.get(&stream_type)?;
        self.directory.get(index)
    }

    /// The raw bytes of the stream of type `stream_type`.
    pub fn get_raw_stream(&mut self, stream_type: u32) -> Result<Vec<u8>, Error> {
        let location = self.stream_location(stream_type)?;
        self.read_bytes_at(location.rva as u64, location.data_size as usize)
            .or(Err(Error::StreamReadFailure))
    }

    /// The thread-list stream.
    pub fn get_thread_list(&mut self) -> Result<&MinidumpThreadList, Error> {
        if self.streams.thread_list.is_none() {
            let thread_list = self.read_thread_list()?;
            self.streams.thread_list = Some(thread_list);
        }
        match self.streams.thread_list {
            Some(ref thread_list) => Ok(thread_list),
            None => Err(Error::StreamNotFound),
        }
    }

    /// The module-list stream.
    pub fn get_module_list(&mut self) -> Result<&MinidumpModuleList, Error> {
        if self.streams.module_list.is_none() {
            let module_list = self.read_module_list()?;
            self.streams.module_list = Some(module_list);
        }
        match self.streams.module_list {
            Some(ref module_list) => Ok(module_list),
            None => Err(Error::StreamNotFound),
        }
    }

    /// The memory-list stream.
    pub fn get_memory_list(&mut self) -> Result<&MinidumpMemoryList, Error> {
        if self.streams.memory_list.is_none() {
            let memory_list = self.read_memory_list()?;
            self.streams.memory_list = Some(memory_list);
        }
        match self.streams.memory_list {
            Some(ref memory_list) => Ok(memory_list),
            None => Err(Error::StreamNotFound),
        }
    }

    /// The exception stream.
    pub fn get_exception(&mut self) -> Result<&MinidumpException, Error> {
        if self.streams.exception.is_none() {
            let exception = self.read_exception()?;
            self.streams.exception = Some(exception);
        }
        match self.streams.exception {
            Some(ref exception) => Ok(exception),
            None => Err(Error::StreamNotFound),
        }
    }

    /// The system-info stream.
    pub fn get_system_info(&mut self) -> Result<&MinidumpSystemInfo, Error> {
        if self.streams.system_info.is_none() {
            let system_info = self.read_system_info()?;
            self.streams.system_info = Some(system_info);
        }
        match self.streams.system_info {
            Some(ref system_info) => Ok(system_info),
            None => Err(Error::StreamNotFound),
        }
    }

    /// The misc-info stream.
    pub fn get_misc_info(&mut self) -> Result<&MinidumpMiscInfo, Error> {
        if self.streams.misc_info.is_none() {
            let misc_info = self.read_misc_info()?;
            self.streams.misc_info = Some(misc_info);
        }
        match self.streams.misc_info {
            Some(ref misc_info) => Ok(misc_info),
            None => Err(Error::StreamNotFound),
        }
    }

    /// Read a UTF-16 string stored at `offset`: a `u32` byte length
    /// followed by that many bytes of UTF-16 code units.
    pub fn read_string_utf16(&mut self, offset: u64) -> Result<String, Error> {
        let length_bytes = self.read_bytes_at(offset, 4)?;
        let length: u32 = length_bytes
            .pread_with(0, self.endian)
            .or(Err(Error::DataError))?;
        if length % 2 != 0 {
            return Err(Error::DataError);
        }
        let utf16 = self.read_bytes_at(offset + 4, length as usize)?;
        decode_utf16(&utf16, self.endian).ok_or(Error::DataError)
    }

    /// Write a human-readable description of the header and stream
    /// directory to `f`.
    pub fn print<W: Write>(&self, f: &mut W) -> io::Result<()> {
        let time = Utc.timestamp(self.header.time_date_stamp as i64, 0);
        write!(
            f,
            r#"MDRawHeader
  signature            = {:#x}
  version              = {:#x}
  stream_count         = {}
  stream_directory_rva = {:#x}
  checksum             = {:#x}
  time_date_stamp      = {:#x} {}
  flags                = {:#x}

"#,
            self.header.signature,
            self.header.version,
            self.header.stream_count,
            self.header.stream_directory_rva,
            self.header.checksum,
            self.header.time_date_stamp,
            time.format("%Y-%m-%d %H:%M:%S"),
            self.header.flags,
        )?;
        for (i, entry) in self.directory.iter().enumerate() {
            write!(
                f,
                r#"mDirectory[{}]
MDRawDirectory
  stream_type        = {}
  location.data_size = {}
  location.rva       = {:#x}

"#,
                i, entry.stream_type, entry.location.data_size, entry.location.rva
            )?;
        }
        Ok(())
    }

    fn read_bytes_at(&mut self, offset: u64, length: usize) -> Result<Vec<u8>, Error> {
        if length as u64 > self.file_len || offset > self.file_len - length as u64 {
            return Err(Error::IoError);
        }
        self.reader
            .seek(SeekFrom::Start(offset))
            .or(Err(Error::IoError))?;
        let mut bytes = vec![0u8; length];
        self.reader.read_exact(&mut bytes).or(Err(Error::IoError))?;
        Ok(bytes)
    }

    fn stream_location(&self, stream_type: u32) -> Result<md::MDLocationDescriptor, Error> {
        let &index = self
            .stream_map
            .get(&stream_type)
            .ok_or(Error::StreamNotFound)?;
        Ok(self.directory[index].location)
    }

    fn read_stream_bytes(&mut self, stream_type: MDStreamType) -> Result<Vec<u8>, Error> {
        let location = self.stream_location(stream_type as u32)?;
        self.read_bytes_at(location.rva as u64, location.data_size as usize)
            .or(Err(Error::StreamReadFailure))
    }

    /// The processor architecture from the system-info stream:
    /// `Ok(None)` when no such stream exists, `Err` when one exists but
    /// cannot be parsed.
    fn system_info_arch(&mut self) -> Result<Option<u16>, Error> {
        if !self
            .stream_map
            .contains_key(&(MDStreamType::SystemInfoStream as u32))
        {
            return Ok(None);
        }
        let info = self.get_system_info()?;
        Ok(Some(info.raw.processor_architecture))
    }

    /// Read and validate a CPU context at `location`. Any failure,
    /// including a context whose CPU disagrees with the system-info
    /// stream, yields `None` without failing the enclosing stream.
    fn read_context(&mut self, location: md::MDLocationDescriptor) -> Option<MinidumpContext> {
        let arch = match self.system_info_arch() {
            Ok(arch) => arch,
            Err(_) => return None,
        };
        let bytes = self
            .read_bytes_at(location.rva as u64, location.data_size as usize)
            .ok()?;
        let context = MinidumpContext::read(&bytes, self.endian).ok()?;
        if let Some(arch) = arch {
            let arch = md::MDCpuArchitecture::from_u16(arch)?;
            let compatible = match context.raw {
                crate::context::MinidumpRawContext::X86(_) => {
                    arch == md::MDCpuArchitecture::X86 || arch == md::MDCpuArchitecture::X86Win64
                }
                crate::context::MinidumpRawContext::Ppc(_) => arch == md::MDCpuArchitecture::Ppc,
            };
            if !compatible {
                warn!(
                    "context CPU disagrees with system info architecture {:?}",
                    arch
                );
                return None;
            }
        }
        Some(context)
    }

    fn read_thread_list(&mut self) -> Result<MinidumpThreadList, Error> {
        let bytes = self.read_stream_bytes(MDStreamType::ThreadListStream)?;
        let offset = &mut 0;
        let thread_count: u32 = bytes
            .gread_with(offset, self.endian)
            .or(Err(Error::StreamReadFailure))?;
        let entry_size = md::MDRawThread::size_with(&self.endian);
        let expected = 4usize
            .checked_add((thread_count as usize).checked_mul(entry_size).ok_or(Error::StreamSizeMismatch)?)
            .ok_or(Error::StreamSizeMismatch)?;
        if bytes.len() != expected {
            return Err(Error::StreamSizeMismatch);
        }
        let mut raw_threads = Vec::with_capacity(thread_count as usize);
        for _ in 0..thread_count {
            let raw: md::MDRawThread = bytes
                .gread_with(offset, self.endian)
                .or(Err(Error::StreamReadFailure))?;
            raw_threads.push(raw);
        }

        let mut threads = Vec::with_capacity(raw_threads.len());
        let mut thread_ids = HashMap::with_capacity(raw_threads.len());
        for raw in raw_threads {
            // An empty or wrapping stack range means the file is bad. The
            // size check stands on its own in case the start address is 0.
            let stack_size = raw.stack.memory.data_size as u64;
            let high_address = raw
                .stack
                .start_of_memory_range
                .wrapping_add(stack_size)
                .wrapping_sub(1);
            if stack_size == 0 || high_address < raw.stack.start_of_memory_range {
                return Err(Error::DataError);
            }
            if thread_ids.contains_key(&raw.thread_id) {
                // Another thread with this id is already in the list.
                return Err(Error::DataError);
            }
            let stack_bytes = self
                .read_bytes_at(raw.stack.memory.rva as u64, raw.stack.memory.data_size as usize)
                .or(Err(Error::StreamReadFailure))?;
            let stack = MinidumpMemory {
                desc: raw.stack,
                base_address: raw.stack.start_of_memory_range,
                size: stack_size,
                bytes: stack_bytes,
                endian: self.endian,
            };
            let context = self.read_context(raw.thread_context);
            thread_ids.insert(raw.thread_id, threads.len());
            threads.push(MinidumpThread {
                raw,
                context,
                stack,
            });
        }
        Ok(MinidumpThreadList {
            threads,
            thread_ids,
        })
    }

    fn read_module_list(&mut self) -> Result<MinidumpModuleList, Error> {
        let bytes = self.read_stream_bytes(MDStreamType::ModuleListStream)?;
        let offset = &mut 0;
        let module_count: u32 = bytes
            .gread_with(offset, self.endian)
            .or(Err(Error::StreamReadFailure))?;
        let expected = 4usize
            .checked_add(
                (module_count as usize)
                    .checked_mul(md::MD_MODULE_SIZE as usize)
                    .ok_or(Error::StreamSizeMismatch)?,
            )
            .ok_or(Error::StreamSizeMismatch)?;
        if bytes.len() != expected {
            return Err(Error::StreamSizeMismatch);
        }
        let mut raw_modules = Vec::with_capacity(module_count as usize);
        for _ in 0..module_count {
            let raw: md::MDRawModule = bytes
                .gread_with(offset, self.endian)
                .or(Err(Error::StreamReadFailure))?;
            let high_address = raw
                .base_of_image
                .wrapping_add(raw.size_of_image as u64)
                .wrapping_sub(1);
            if raw.size_of_image == 0 || high_address < raw.base_of_image {
                return Err(Error::DataError);
            }
            raw_modules.push(raw);
        }

        let mut modules = Vec::with_capacity(raw_modules.len());
        for raw in raw_modules {
            let name = self.read_string_utf16(raw.module_name_rva as u64)?;
            let codeview_info = self.read_codeview(raw.cv_record);
            let misc_info = self.read_misc_debug_record(raw.misc_record);
            modules.push(MinidumpModule {
                raw,
                name,
                codeview_info,
                misc_info,
            });
        }
        MinidumpModuleList::from_modules(modules).ok_or(Error::DataError)
    }

    fn read_memory_list(&mut self) -> Result<MinidumpMemoryList, Error> {
        let bytes = self.read_stream_bytes(MDStreamType::MemoryListStream)?;
        let offset = &mut 0;
        let region_count: u32 = bytes
            .gread_with(offset, self.endian)
            .or(Err(Error::StreamReadFailure))?;
        let entry_size = md::MDMemoryDescriptor::size_with(&self.endian);
        let expected = 4usize
            .checked_add((region_count as usize).checked_mul(entry_size).ok_or(Error::StreamSizeMismatch)?)
            .ok_or(Error::StreamSizeMismatch)?;
        if bytes.len() != expected {
            return Err(Error::StreamSizeMismatch);
        }
        let mut descriptors = Vec::with_capacity(region_count as usize);
        for _ in 0..region_count {
            let desc: md::MDMemoryDescriptor = bytes
                .gread_with(offset, self.endian)
                .or(Err(Error::StreamReadFailure))?;
            descriptors.push(desc);
        }

        let mut regions = Vec::with_capacity(descriptors.len());
        let mut range_map = RangeMap::new();
        for desc in descriptors {
            let base_address = desc.start_of_memory_range;
            let region_size = desc.memory.data_size as u64;
            let high_address = base_address.wrapping_add(region_size).wrapping_sub(1);
            if region_size == 0 || high_address < base_address {
                return Err(Error::DataError);
            }
            if !range_map.store_range(base_address, region_size, regions.len()) {
                return Err(Error::DataError);
            }
            let region_bytes = self
                .read_bytes_at(desc.memory.rva as u64, desc.memory.data_size as usize)
                .or(Err(Error::StreamReadFailure))?;
            regions.push(MinidumpMemory {
                desc,
                base_address,
                size: region_size,
                bytes: region_bytes,
                endian: self.endian,
            });
        }
        Ok(MinidumpMemoryList { regions, range_map })
    }

    fn read_exception(&mut self) -> Result<MinidumpException, Error> {
        let bytes = self.read_stream_bytes(MDStreamType::ExceptionStream)?;
        if bytes.len() != md::MDRawExceptionStream::size_with(&self.endian) {
            return Err(Error::StreamSizeMismatch);
        }
        let raw: md::MDRawExceptionStream = bytes
            .pread_with(0, self.endian)
            .or(Err(Error::StreamReadFailure))?;
        let context = self.read_context(raw.thread_context);
        Ok(MinidumpException {
            thread_id: raw.thread_id,
            raw,
            context,
        })
    }

    fn read_system_info(&mut self) -> Result<MinidumpSystemInfo, Error> {
        let bytes = self.read_stream_bytes(MDStreamType::SystemInfoStream)?;
        if bytes.len() != md::MDRawSystemInfo::size_with(&self.endian) {
            return Err(Error::StreamSizeMismatch);
        }
        let raw: md::MDRawSystemInfo = bytes
            .pread_with(0, self.endian)
            .or(Err(Error::StreamReadFailure))?;
        let csd_version = if raw.csd_version_rva != 0 {
            self.read_string_utf16(raw.csd_version_rva as u64).ok()
        } else {
            None
        };
        Ok(MinidumpSystemInfo { raw, csd_version })
    }

    fn read_misc_info(&mut self) -> Result<MinidumpMiscInfo, Error> {
        let bytes = self.read_stream_bytes(MDStreamType::MiscInfoStream)?;
        if bytes.len() != md::MD_MISCINFO_SIZE as usize
            && bytes.len() != md::MD_MISCINFO2_SIZE as usize
        {
            return Err(Error::StreamSizeMismatch);
        }
        let offset = &mut 0;
        let raw: md::MDRawMiscInfo = bytes
            .gread_with(offset, self.endian)
            .or(Err(Error::StreamReadFailure))?;
        let power_info = if bytes.len() == md::MD_MISCINFO2_SIZE as usize {
            let power: md::MDMiscInfoPowerInfo = bytes
                .gread_with(offset, self.endian)
                .or(Err(Error::StreamReadFailure))?;
            Some(power)
        } else {
            None
        };
        if raw.size_of_info as usize != bytes.len() {
            return Err(Error::DataError);
        }
        Ok(MinidumpMiscInfo { raw, power_info })
    }

    /// Read and validate the CodeView record at `location`. Any failure
    /// leaves the module without debug info rather than failing the module
    /// list.
    fn read_codeview(&mut self, location: md::MDLocationDescriptor) -> Option<CodeView> {
        let size = location.data_size as usize;
        if size == 0 {
            return None;
        }
        if size < md::MDCVInfoPDB20::size_with(&self.endian) {
            return None;
        }
        let bytes = self.read_bytes_at(location.rva as u64, size).ok()?;
        let signature: u32 = bytes.pread_with(0, self.endian).ok()?;
        match signature {
            md::MD_CVINFOPDB70_SIGNATURE => {
                let fixed = md::MDCVInfoPDB70::size_with(&self.endian);
                if size <= fixed {
                    return None;
                }
                // The path is NUL-terminated 8-bit data; require the
                // terminator so it can't run off the end of the record.
                if bytes[size - 1] != 0 {
                    return None;
                }
                let raw: md::MDCVInfoPDB70 = bytes.pread_with(0, self.endian).ok()?;
                let pdb_file_name = read_cstring(&bytes[fixed..]);
                Some(CodeView::Pdb70(CodeViewPdb70 { raw, pdb_file_name }))
            }
            md::MD_CVINFOPDB20_SIGNATURE => {
                let fixed = md::MDCVInfoPDB20::size_with(&self.endian);
                if size <= fixed {
                    return None;
                }
                if bytes[size - 1] != 0 {
                    return None;
                }
                let raw: md::MDCVInfoPDB20 = bytes.pread_with(0, self.endian).ok()?;
                let pdb_file_name = read_cstring(&bytes[fixed..]);
                Some(CodeView::Pdb20(CodeViewPdb20 { raw, pdb_file_name }))
            }
            _ => {
                warn!("unknown CodeView signature {:#x}", signature);
                Some(CodeView::Unknown(bytes))
            }
        }
    }

    /// Read the miscellaneous debug record at `location`, decoding its
    /// embedded debug filename. Failures leave `None`.
    fn read_misc_debug_record(
        &mut self,
        location: md::MDLocationDescriptor,
    ) -> Option<MinidumpMiscDebugRecord> {
        let size = location.data_size as usize;
        let fixed = md::MDImageDebugMisc::size_with(&self.endian);
        if size == 0 || size < fixed {
            return None;
        }
        let bytes = self.read_bytes_at(location.rva as u64, size).ok()?;
        let raw: md::MDImageDebugMisc = bytes.pread_with(0, self.endian).ok()?;
        if raw.length as usize != size {
            return None;
        }
        let data = &bytes[fixed..];
        let name = if raw.unicode != 0 {
            if data.len() % 2 != 0 {
                return None;
            }
            decode_utf16(data, self.endian)?
        } else {
            data.iter()
                .map(|&byte| byte as char)
                .collect::<String>()
        };
        let name = name.trim_end_matches('\0').to_string();
        Some(MinidumpMiscDebugRecord { raw, name })
    }
}

/// Decode UTF-16 code units stored with the given byte order.
///
/// Surrogates must pair correctly: a lone low surrogate, a high surrogate
/// at end of input, or a high surrogate not followed by a low surrogate
/// all fail the decode.
fn decode_utf16(bytes: &[u8], endian: Endian) -> Option<String> {
    let decoded = match endian {
        Endian::Little => UTF_16LE.decode(bytes, DecoderTrap::Strict),
        Endian::Big => UTF_16BE.decode(bytes, DecoderTrap::Strict),
    };
    decoded.ok()
}

/// The bytes of `buffer` up to the first NUL, as 8-bit characters.
fn read_cstring(buffer: &[u8]) -> String {
    buffer
        .iter()
        .take_while(|&&byte| byte != 0)
        .map(|&byte| byte as char)
        .collect()
}
