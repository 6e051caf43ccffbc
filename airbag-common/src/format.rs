// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! The raw minidump wire format.
//!
//! Everything in a minidump file is stored in the byte order of the machine
//! that produced it. Readers probe the header signature to pick a
//! [`scroll::Endian`] and then read every numeric field with it. Fields that
//! are documented as 8-bit data (FPU register areas, CodeView path bytes)
//! must never be endian-converted, which is why the context structures below
//! implement [`TryFromCtx`] by hand instead of deriving it.

use bitflags::bitflags;
use enum_primitive_derive::Primitive;
use scroll::ctx::{SizeWith, TryFromCtx};
use scroll::{Endian, Pread, SizeWith};

/// The magic number at offset zero of every minidump, `MDMP` when read as
/// little-endian bytes.
pub const MD_HEADER_SIGNATURE: u32 = 0x504d444d;

/// The low 16 bits of [`MDRawHeader::version`]; the high bits are
/// implementation-specific and ignored.
pub const MD_HEADER_VERSION: u32 = 0x0000a793;

/// `RSDS`, the signature of a [`MDCVInfoPDB70`] CodeView record.
pub const MD_CVINFOPDB70_SIGNATURE: u32 = 0x53445352;

/// `NB10`, the signature of a [`MDCVInfoPDB20`] CodeView record.
pub const MD_CVINFOPDB20_SIGNATURE: u32 = 0x3031424e;

/// The wire size of [`MDRawModule`].
pub const MD_MODULE_SIZE: u32 = 108;

/// The wire size of the original MISC_INFO stream.
pub const MD_MISCINFO_SIZE: u32 = 24;

/// The wire size of the MISC_INFO_2 stream with processor power fields.
pub const MD_MISCINFO2_SIZE: u32 = 44;

/// Maximum number of entries in [`MDException::exception_information`].
pub const MD_EXCEPTION_MAXIMUM_PARAMETERS: usize = 15;

/// The signature of a valid [`MDVSFixedFileInfo`].
pub const MD_VSFIXEDFILEINFO_SIGNATURE: u32 = 0xfeef04bd;

/// Set in [`MDRawMiscInfo::flags1`] when the process id field is valid.
pub const MD_MISCINFO_FLAGS1_PROCESS_ID: u32 = 0x0000_0001;

/// Set in [`MDRawMiscInfo::flags1`] when the process time fields are valid.
pub const MD_MISCINFO_FLAGS1_PROCESS_TIMES: u32 = 0x0000_0002;

/// Mask to extract the CPU kind from a context's `context_flags`.
pub const MD_CONTEXT_CPU_MASK: u32 = 0xffffff00;

/// Stream types recognized in the minidump directory.
///
/// The types up through `MiscInfoStream` are the ones this reader knows how
/// to parse; a conforming file contains at most one directory entry for each
/// of the singleton types (thread list, module list, memory list, exception,
/// system info, misc info).
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Primitive)]
pub enum MDStreamType {
    UnusedStream = 0,
    ReservedStream0 = 1,
    ReservedStream1 = 2,
    ThreadListStream = 3,
    ModuleListStream = 4,
    MemoryListStream = 5,
    ExceptionStream = 6,
    SystemInfoStream = 7,
    ThreadExListStream = 8,
    Memory64ListStream = 9,
    CommentStreamA = 10,
    CommentStreamW = 11,
    HandleDataStream = 12,
    FunctionTableStream = 13,
    UnloadedModuleListStream = 14,
    MiscInfoStream = 15,
    LastReservedStream = 0xffff,
}

/// Processor architectures, as stored in [`MDRawSystemInfo`].
#[repr(u16)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Primitive)]
pub enum MDCpuArchitecture {
    X86 = 0,
    Mips = 1,
    Alpha = 2,
    Ppc = 3,
    Shx = 4,
    Arm = 5,
    Ia64 = 6,
    Alpha64 = 7,
    Msil = 8,
    Amd64 = 9,
    /// x86 code running under WOW64 on a 64-bit host.
    X86Win64 = 10,
    Sparc = 0x8001,
    Ppc64 = 0x8002,
    Unknown = 0xffff,
}

/// Operating systems, as stored in [`MDRawSystemInfo::platform_id`].
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Primitive)]
pub enum MDPlatformId {
    Win32s = 0,
    Win32Windows = 1,
    Win32Nt = 2,
    Win32Ce = 3,
    Unix = 0x8000,
    MacOsX = 0x8101,
    Ios = 0x8102,
    Linux = 0x8201,
    Solaris = 0x8202,
    Android = 0x8203,
}

bitflags! {
    /// The CPU-kind bits of a context's `context_flags` word.
    pub struct ContextFlagsCpu: u32 {
        const CONTEXT_X86 = 0x0001_0000;
        const CONTEXT_AMD64 = 0x0010_0000;
        const CONTEXT_PPC = 0x2000_0000;
    }
}

impl ContextFlagsCpu {
    /// Extract the CPU bits from a raw `context_flags` value.
    pub fn from_flags(flags: u32) -> ContextFlagsCpu {
        ContextFlagsCpu::from_bits_truncate(flags & MD_CONTEXT_CPU_MASK)
    }
}

/// An offset into the minidump file, relative to the header at offset zero.
pub type MDRVA = u32;

/// The location of a variable-sized blob within the file.
#[derive(Debug, Default, Copy, Clone, PartialEq, Pread, SizeWith)]
pub struct MDLocationDescriptor {
    pub data_size: u32,
    pub rva: MDRVA,
}

/// A range of the failed process's memory, and where its bytes are stored.
#[derive(Debug, Default, Copy, Clone, PartialEq, Pread, SizeWith)]
pub struct MDMemoryDescriptor {
    /// The base address of this range in the process that was dumped.
    pub start_of_memory_range: u64,
    pub memory: MDLocationDescriptor,
}

/// The file header.
#[derive(Debug, Default, Copy, Clone, PartialEq, Pread, SizeWith)]
pub struct MDRawHeader {
    pub signature: u32,
    pub version: u32,
    pub stream_count: u32,
    pub stream_directory_rva: MDRVA,
    /// Zero in every file observed in practice.
    pub checksum: u32,
    /// `time_t` when the dump was written.
    pub time_date_stamp: u32,
    pub flags: u64,
}

/// One entry of the stream directory.
#[derive(Debug, Default, Copy, Clone, PartialEq, Pread, SizeWith)]
pub struct MDRawDirectory {
    pub stream_type: u32,
    pub location: MDLocationDescriptor,
}

/// A thread record from the thread-list stream.
#[derive(Debug, Default, Copy, Clone, PartialEq, Pread, SizeWith)]
pub struct MDRawThread {
    pub thread_id: u32,
    pub suspend_count: u32,
    pub priority_class: u32,
    pub priority: u32,
    /// Address of the thread environment block.
    pub teb: u64,
    pub stack: MDMemoryDescriptor,
    pub thread_context: MDLocationDescriptor,
}

/// Fixed version information, part of [`MDRawModule`].
#[derive(Debug, Default, Copy, Clone, PartialEq, Pread, SizeWith)]
pub struct MDVSFixedFileInfo {
    pub signature: u32,
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

/// A module record from the module-list stream.
///
/// Always [`MD_MODULE_SIZE`] bytes on the wire; the trailing reserved words
/// carry no known meaning.
#[derive(Debug, Default, Copy, Clone, PartialEq, Pread, SizeWith)]
pub struct MDRawModule {
    pub base_of_image: u64,
    pub size_of_image: u32,
    pub checksum: u32,
    pub time_date_stamp: u32,
    /// RVA of an MDString holding the module path.
    pub module_name_rva: MDRVA,
    pub version_info: MDVSFixedFileInfo,
    /// CodeView record, present when debug info lives in a PDB file.
    pub cv_record: MDLocationDescriptor,
    /// Miscellaneous debug record, present for old DBG-file debug info.
    pub misc_record: MDLocationDescriptor,
    pub reserved0: u64,
    pub reserved1: u64,
}

/// A GUID as stored in a PDB 7.0 CodeView record.
///
/// `data4` is raw bytes and is never endian-converted.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct MDGUID {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl<'a> TryFromCtx<'a, Endian> for MDGUID {
    type Error = scroll::Error;
    fn try_from_ctx(src: &'a [u8], endian: Endian) -> Result<(Self, usize), Self::Error> {
        let offset = &mut 0;
        let data1 = src.gread_with(offset, endian)?;
        let data2 = src.gread_with(offset, endian)?;
        let data3 = src.gread_with(offset, endian)?;
        let mut data4 = [0u8; 8];
        src.gread_inout_with(offset, &mut data4, endian)?;
        Ok((
            MDGUID {
                data1,
                data2,
                data3,
                data4,
            },
            *offset,
        ))
    }
}

impl SizeWith<Endian> for MDGUID {
    fn size_with(_: &Endian) -> usize {
        16
    }
}

/// The fixed part of a PDB 7.0 (`RSDS`) CodeView record. The record
/// continues with a NUL-terminated 8-bit path.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MDCVInfoPDB70 {
    pub cv_signature: u32,
    pub signature: MDGUID,
    pub age: u32,
}

impl<'a> TryFromCtx<'a, Endian> for MDCVInfoPDB70 {
    type Error = scroll::Error;
    fn try_from_ctx(src: &'a [u8], endian: Endian) -> Result<(Self, usize), Self::Error> {
        let offset = &mut 0;
        let cv_signature = src.gread_with(offset, endian)?;
        let signature = src.gread_with(offset, endian)?;
        let age = src.gread_with(offset, endian)?;
        Ok((
            MDCVInfoPDB70 {
                cv_signature,
                signature,
                age,
            },
            *offset,
        ))
    }
}

impl SizeWith<Endian> for MDCVInfoPDB70 {
    fn size_with(_: &Endian) -> usize {
        24
    }
}

/// The fixed part of a PDB 2.0 (`NB10`) CodeView record. The record
/// continues with a NUL-terminated 8-bit path.
#[derive(Debug, Default, Copy, Clone, PartialEq, Pread, SizeWith)]
pub struct MDCVInfoPDB20 {
    pub cv_signature: u32,
    pub cv_offset: u32,
    pub signature: u32,
    pub age: u32,
}

/// Header of a miscellaneous debug record; the `data` payload follows.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct MDImageDebugMisc {
    pub data_type: u32,
    /// Length of the entire record, header included.
    pub length: u32,
    /// Nonzero if `data` is UTF-16 rather than 8-bit characters.
    pub unicode: u8,
    pub reserved: [u8; 3],
}

impl<'a> TryFromCtx<'a, Endian> for MDImageDebugMisc {
    type Error = scroll::Error;
    fn try_from_ctx(src: &'a [u8], endian: Endian) -> Result<(Self, usize), Self::Error> {
        let offset = &mut 0;
        let data_type = src.gread_with(offset, endian)?;
        let length = src.gread_with(offset, endian)?;
        let unicode = src.gread_with(offset, endian)?;
        let mut reserved = [0u8; 3];
        src.gread_inout_with(offset, &mut reserved, endian)?;
        Ok((
            MDImageDebugMisc {
                data_type,
                length,
                unicode,
                reserved,
            },
            *offset,
        ))
    }
}

impl SizeWith<Endian> for MDImageDebugMisc {
    fn size_with(_: &Endian) -> usize {
        12
    }
}

/// An exception record and the location of the faulting thread's context.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct MDException {
    pub exception_code: u32,
    pub exception_flags: u32,
    pub exception_record: u64,
    pub exception_address: u64,
    pub number_parameters: u32,
    pub __align: u32,
    pub exception_information: [u64; MD_EXCEPTION_MAXIMUM_PARAMETERS],
}

impl<'a> TryFromCtx<'a, Endian> for MDException {
    type Error = scroll::Error;
    fn try_from_ctx(src: &'a [u8], endian: Endian) -> Result<(Self, usize), Self::Error> {
        let offset = &mut 0;
        let exception_code = src.gread_with(offset, endian)?;
        let exception_flags = src.gread_with(offset, endian)?;
        let exception_record = src.gread_with(offset, endian)?;
        let exception_address = src.gread_with(offset, endian)?;
        let number_parameters = src.gread_with(offset, endian)?;
        let __align = src.gread_with(offset, endian)?;
        let mut exception_information = [0u64; MD_EXCEPTION_MAXIMUM_PARAMETERS];
        for parameter in exception_information.iter_mut() {
            *parameter = src.gread_with(offset, endian)?;
        }
        Ok((
            MDException {
                exception_code,
                exception_flags,
                exception_record,
                exception_address,
                number_parameters,
                __align,
                exception_information,
            },
            *offset,
        ))
    }
}

impl SizeWith<Endian> for MDException {
    fn size_with(_: &Endian) -> usize {
        152
    }
}

/// The exception stream.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct MDRawExceptionStream {
    pub thread_id: u32,
    pub __align: u32,
    pub exception_record: MDException,
    pub thread_context: MDLocationDescriptor,
}

impl<'a> TryFromCtx<'a, Endian> for MDRawExceptionStream {
    type Error = scroll::Error;
    fn try_from_ctx(src: &'a [u8], endian: Endian) -> Result<(Self, usize), Self::Error> {
        let offset = &mut 0;
        let thread_id = src.gread_with(offset, endian)?;
        let __align = src.gread_with(offset, endian)?;
        let exception_record = src.gread_with(offset, endian)?;
        let thread_context = src.gread_with(offset, endian)?;
        Ok((
            MDRawExceptionStream {
                thread_id,
                __align,
                exception_record,
                thread_context,
            },
            *offset,
        ))
    }
}

impl SizeWith<Endian> for MDRawExceptionStream {
    fn size_with(_: &Endian) -> usize {
        168
    }
}

/// The system-info stream.
///
/// `cpu` is a 24-byte union on the wire; for x86 it begins with the three
/// vendor-id words. It is kept as raw bytes here and interpreted by the
/// reader when the architecture calls for it.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct MDRawSystemInfo {
    pub processor_architecture: u16,
    pub processor_level: u16,
    pub processor_revision: u16,
    pub number_of_processors: u8,
    pub product_type: u8,
    pub major_version: u32,
    pub minor_version: u32,
    pub build_number: u32,
    pub platform_id: u32,
    /// RVA of an MDString holding the service-pack description.
    pub csd_version_rva: MDRVA,
    pub suite_mask: u16,
    pub reserved2: u16,
    pub cpu: [u8; 24],
}

impl Default for MDRawSystemInfo {
    fn default() -> MDRawSystemInfo {
        MDRawSystemInfo {
            processor_architecture: 0,
            processor_level: 0,
            processor_revision: 0,
            number_of_processors: 0,
            product_type: 0,
            major_version: 0,
            minor_version: 0,
            build_number: 0,
            platform_id: 0,
            csd_version_rva: 0,
            suite_mask: 0,
            reserved2: 0,
            cpu: [0; 24],
        }
    }
}

impl<'a> TryFromCtx<'a, Endian> for MDRawSystemInfo {
    type Error = scroll::Error;
    fn try_from_ctx(src: &'a [u8], endian: Endian) -> Result<(Self, usize), Self::Error> {
        let offset = &mut 0;
        let processor_architecture = src.gread_with(offset, endian)?;
        let processor_level = src.gread_with(offset, endian)?;
        let processor_revision = src.gread_with(offset, endian)?;
        let number_of_processors = src.gread_with(offset, endian)?;
        let product_type = src.gread_with(offset, endian)?;
        let major_version = src.gread_with(offset, endian)?;
        let minor_version = src.gread_with(offset, endian)?;
        let build_number = src.gread_with(offset, endian)?;
        let platform_id = src.gread_with(offset, endian)?;
        let csd_version_rva = src.gread_with(offset, endian)?;
        let suite_mask = src.gread_with(offset, endian)?;
        let reserved2 = src.gread_with(offset, endian)?;
        let mut cpu = [0u8; 24];
        src.gread_inout_with(offset, &mut cpu, endian)?;
        Ok((
            MDRawSystemInfo {
                processor_architecture,
                processor_level,
                processor_revision,
                number_of_processors,
                product_type,
                major_version,
                minor_version,
                build_number,
                platform_id,
                csd_version_rva,
                suite_mask,
                reserved2,
                cpu,
            },
            *offset,
        ))
    }
}

impl SizeWith<Endian> for MDRawSystemInfo {
    fn size_with(_: &Endian) -> usize {
        56
    }
}

/// The misc-info stream. The processor-power fields are only present in
/// the MISC_INFO_2 variant; [`MDRawMiscInfo::size_of_info`] tells which
/// one was stored.
#[derive(Debug, Default, Copy, Clone, PartialEq, Pread, SizeWith)]
pub struct MDRawMiscInfo {
    pub size_of_info: u32,
    pub flags1: u32,
    pub process_id: u32,
    pub process_create_time: u32,
    pub process_user_time: u32,
    pub process_kernel_time: u32,
}

/// The MISC_INFO_2 extension of [`MDRawMiscInfo`].
#[derive(Debug, Default, Copy, Clone, PartialEq, Pread, SizeWith)]
pub struct MDMiscInfoPowerInfo {
    pub processor_max_mhz: u32,
    pub processor_current_mhz: u32,
    pub processor_mhz_limit: u32,
    pub processor_max_idle_state: u32,
    pub processor_current_idle_state: u32,
}

/// The x86 FPU save area. `register_area` is 8-bit data and is never
/// endian-converted.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct MDFloatingSaveAreaX86 {
    pub control_word: u32,
    pub status_word: u32,
    pub tag_word: u32,
    pub error_offset: u32,
    pub error_selector: u32,
    pub data_offset: u32,
    pub data_selector: u32,
    pub register_area: [u8; 80],
    pub cr0_npx_state: u32,
}

impl Default for MDFloatingSaveAreaX86 {
    fn default() -> MDFloatingSaveAreaX86 {
        MDFloatingSaveAreaX86 {
            control_word: 0,
            status_word: 0,
            tag_word: 0,
            error_offset: 0,
            error_selector: 0,
            data_offset: 0,
            data_selector: 0,
            register_area: [0; 80],
            cr0_npx_state: 0,
        }
    }
}

impl<'a> TryFromCtx<'a, Endian> for MDFloatingSaveAreaX86 {
    type Error = scroll::Error;
    fn try_from_ctx(src: &'a [u8], endian: Endian) -> Result<(Self, usize), Self::Error> {
        let offset = &mut 0;
        let control_word = src.gread_with(offset, endian)?;
        let status_word = src.gread_with(offset, endian)?;
        let tag_word = src.gread_with(offset, endian)?;
        let error_offset = src.gread_with(offset, endian)?;
        let error_selector = src.gread_with(offset, endian)?;
        let data_offset = src.gread_with(offset, endian)?;
        let data_selector = src.gread_with(offset, endian)?;
        let mut register_area = [0u8; 80];
        src.gread_inout_with(offset, &mut register_area, endian)?;
        let cr0_npx_state = src.gread_with(offset, endian)?;
        Ok((
            MDFloatingSaveAreaX86 {
                control_word,
                status_word,
                tag_word,
                error_offset,
                error_selector,
                data_offset,
                data_selector,
                register_area,
                cr0_npx_state,
            },
            *offset,
        ))
    }
}

impl SizeWith<Endian> for MDFloatingSaveAreaX86 {
    fn size_with(_: &Endian) -> usize {
        112
    }
}

/// An x86 thread context. `extended_registers` is 8-bit data and is never
/// endian-converted.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct MDRawContextX86 {
    pub context_flags: u32,
    pub dr0: u32,
    pub dr1: u32,
    pub dr2: u32,
    pub dr3: u32,
    pub dr6: u32,
    pub dr7: u32,
    pub float_save: MDFloatingSaveAreaX86,
    pub gs: u32,
    pub fs: u32,
    pub es: u32,
    pub ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub ebp: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u32,
    pub extended_registers: [u8; 512],
}

impl Default for MDRawContextX86 {
    fn default() -> MDRawContextX86 {
        MDRawContextX86 {
            context_flags: 0,
            dr0: 0,
            dr1: 0,
            dr2: 0,
            dr3: 0,
            dr6: 0,
            dr7: 0,
            float_save: MDFloatingSaveAreaX86::default(),
            gs: 0,
            fs: 0,
            es: 0,
            ds: 0,
            edi: 0,
            esi: 0,
            ebx: 0,
            edx: 0,
            ecx: 0,
            eax: 0,
            ebp: 0,
            eip: 0,
            cs: 0,
            eflags: 0,
            esp: 0,
            ss: 0,
            extended_registers: [0; 512],
        }
    }
}

impl<'a> TryFromCtx<'a, Endian> for MDRawContextX86 {
    type Error = scroll::Error;
    fn try_from_ctx(src: &'a [u8], endian: Endian) -> Result<(Self, usize), Self::Error> {
        let offset = &mut 0;
        let context_flags = src.gread_with(offset, endian)?;
        let dr0 = src.gread_with(offset, endian)?;
        let dr1 = src.gread_with(offset, endian)?;
        let dr2 = src.gread_with(offset, endian)?;
        let dr3 = src.gread_with(offset, endian)?;
        let dr6 = src.gread_with(offset, endian)?;
        let dr7 = src.gread_with(offset, endian)?;
        let float_save = src.gread_with(offset, endian)?;
        let gs = src.gread_with(offset, endian)?;
        let fs = src.gread_with(offset, endian)?;
        let es = src.gread_with(offset, endian)?;
        let ds = src.gread_with(offset, endian)?;
        let edi = src.gread_with(offset, endian)?;
        let esi = src.gread_with(offset, endian)?;
        let ebx = src.gread_with(offset, endian)?;
        let edx = src.gread_with(offset, endian)?;
        let ecx = src.gread_with(offset, endian)?;
        let eax = src.gread_with(offset, endian)?;
        let ebp = src.gread_with(offset, endian)?;
        let eip = src.gread_with(offset, endian)?;
        let cs = src.gread_with(offset, endian)?;
        let eflags = src.gread_with(offset, endian)?;
        let esp = src.gread_with(offset, endian)?;
        let ss = src.gread_with(offset, endian)?;
        let mut extended_registers = [0u8; 512];
        src.gread_inout_with(offset, &mut extended_registers, endian)?;
        Ok((
            MDRawContextX86 {
                context_flags,
                dr0,
                dr1,
                dr2,
                dr3,
                dr6,
                dr7,
                float_save,
                gs,
                fs,
                es,
                ds,
                edi,
                esi,
                ebx,
                edx,
                ecx,
                eax,
                ebp,
                eip,
                cs,
                eflags,
                esp,
                ss,
                extended_registers,
            },
            *offset,
        ))
    }
}

/// The wire size of [`MDRawContextX86`].
pub const MD_CONTEXT_X86_SIZE: usize = 716;

impl SizeWith<Endian> for MDRawContextX86 {
    fn size_with(_: &Endian) -> usize {
        MD_CONTEXT_X86_SIZE
    }
}

/// Number of general-purpose registers in a PPC context.
pub const MD_CONTEXT_PPC_GPR_COUNT: usize = 32;

/// Number of floating-point registers in a PPC context.
pub const MD_FLOATINGSAVEAREA_PPC_FPR_COUNT: usize = 32;

/// Number of vector registers in a PPC context.
pub const MD_VECTORSAVEAREA_PPC_VR_COUNT: usize = 32;

/// A 128-bit quantity, stored as two halves in producer byte order.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct MDU128 {
    pub half: [u64; 2],
}

impl<'a> TryFromCtx<'a, Endian> for MDU128 {
    type Error = scroll::Error;
    fn try_from_ctx(src: &'a [u8], endian: Endian) -> Result<(Self, usize), Self::Error> {
        let offset = &mut 0;
        let mut half = [0u64; 2];
        for h in half.iter_mut() {
            *h = src.gread_with(offset, endian)?;
        }
        Ok((MDU128 { half }, *offset))
    }
}

impl SizeWith<Endian> for MDU128 {
    fn size_with(_: &Endian) -> usize {
        16
    }
}

/// The PPC floating-point save area.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct MDFloatingSaveAreaPPC {
    pub fpregs: [u64; MD_FLOATINGSAVEAREA_PPC_FPR_COUNT],
    pub fpscr_pad: u32,
    pub fpscr: u32,
}

impl Default for MDFloatingSaveAreaPPC {
    fn default() -> MDFloatingSaveAreaPPC {
        MDFloatingSaveAreaPPC {
            fpregs: [0; MD_FLOATINGSAVEAREA_PPC_FPR_COUNT],
            fpscr_pad: 0,
            fpscr: 0,
        }
    }
}

impl<'a> TryFromCtx<'a, Endian> for MDFloatingSaveAreaPPC {
    type Error = scroll::Error;
    fn try_from_ctx(src: &'a [u8], endian: Endian) -> Result<(Self, usize), Self::Error> {
        let offset = &mut 0;
        let mut fpregs = [0u64; MD_FLOATINGSAVEAREA_PPC_FPR_COUNT];
        for fpr in fpregs.iter_mut() {
            *fpr = src.gread_with(offset, endian)?;
        }
        let fpscr_pad = src.gread_with(offset, endian)?;
        let fpscr = src.gread_with(offset, endian)?;
        Ok((
            MDFloatingSaveAreaPPC {
                fpregs,
                fpscr_pad,
                fpscr,
            },
            *offset,
        ))
    }
}

impl SizeWith<Endian> for MDFloatingSaveAreaPPC {
    fn size_with(_: &Endian) -> usize {
        264
    }
}

/// The PPC AltiVec save area.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct MDVectorSaveAreaPPC {
    pub save_vr: [MDU128; MD_VECTORSAVEAREA_PPC_VR_COUNT],
    pub save_vscr: MDU128,
    pub save_pad5: [u32; 4],
    pub save_vrvalid: u32,
    pub save_pad6: [u32; 7],
}

impl Default for MDVectorSaveAreaPPC {
    fn default() -> MDVectorSaveAreaPPC {
        MDVectorSaveAreaPPC {
            save_vr: [MDU128::default(); MD_VECTORSAVEAREA_PPC_VR_COUNT],
            save_vscr: MDU128::default(),
            save_pad5: [0; 4],
            save_vrvalid: 0,
            save_pad6: [0; 7],
        }
    }
}

impl<'a> TryFromCtx<'a, Endian> for MDVectorSaveAreaPPC {
    type Error = scroll::Error;
    fn try_from_ctx(src: &'a [u8], endian: Endian) -> Result<(Self, usize), Self::Error> {
        let offset = &mut 0;
        let mut save_vr = [MDU128::default(); MD_VECTORSAVEAREA_PPC_VR_COUNT];
        for vr in save_vr.iter_mut() {
            *vr = src.gread_with(offset, endian)?;
        }
        let save_vscr = src.gread_with(offset, endian)?;
        let mut save_pad5 = [0u32; 4];
        for pad in save_pad5.iter_mut() {
            *pad = src.gread_with(offset, endian)?;
        }
        let save_vrvalid = src.gread_with(offset, endian)?;
        let mut save_pad6 = [0u32; 7];
        for pad in save_pad6.iter_mut() {
            *pad = src.gread_with(offset, endian)?;
        }
        Ok((
            MDVectorSaveAreaPPC {
                save_vr,
                save_vscr,
                save_pad5,
                save_vrvalid,
                save_pad6,
            },
            *offset,
        ))
    }
}

impl SizeWith<Endian> for MDVectorSaveAreaPPC {
    fn size_with(_: &Endian) -> usize {
        576
    }
}

/// A PPC thread context.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct MDRawContextPPC {
    pub context_flags: u32,
    pub srr0: u32,
    pub srr1: u32,
    pub gpr: [u32; MD_CONTEXT_PPC_GPR_COUNT],
    pub cr: u32,
    pub xer: u32,
    pub lr: u32,
    pub ctr: u32,
    pub mq: u32,
    pub vrsave: u32,
    pub float_save: MDFloatingSaveAreaPPC,
    pub vector_save: MDVectorSaveAreaPPC,
}

impl Default for MDRawContextPPC {
    fn default() -> MDRawContextPPC {
        MDRawContextPPC {
            context_flags: 0,
            srr0: 0,
            srr1: 0,
            gpr: [0; MD_CONTEXT_PPC_GPR_COUNT],
            cr: 0,
            xer: 0,
            lr: 0,
            ctr: 0,
            mq: 0,
            vrsave: 0,
            float_save: MDFloatingSaveAreaPPC::default(),
            vector_save: MDVectorSaveAreaPPC::default(),
        }
    }
}

impl<'a> TryFromCtx<'a, Endian> for MDRawContextPPC {
    type Error = scroll::Error;
    fn try_from_ctx(src: &'a [u8], endian: Endian) -> Result<(Self, usize), Self::Error> {
        let offset = &mut 0;
        let context_flags = src.gread_with(offset, endian)?;
        let srr0 = src.gread_with(offset, endian)?;
        let srr1 = src.gread_with(offset, endian)?;
        let mut gpr = [0u32; MD_CONTEXT_PPC_GPR_COUNT];
        for reg in gpr.iter_mut() {
            *reg = src.gread_with(offset, endian)?;
        }
        let cr = src.gread_with(offset, endian)?;
        let xer = src.gread_with(offset, endian)?;
        let lr = src.gread_with(offset, endian)?;
        let ctr = src.gread_with(offset, endian)?;
        let mq = src.gread_with(offset, endian)?;
        let vrsave = src.gread_with(offset, endian)?;
        let float_save = src.gread_with(offset, endian)?;
        let vector_save = src.gread_with(offset, endian)?;
        Ok((
            MDRawContextPPC {
                context_flags,
                srr0,
                srr1,
                gpr,
                cr,
                xer,
                lr,
                ctr,
                mq,
                vrsave,
                float_save,
                vector_save,
            },
            *offset,
        ))
    }
}

/// The wire size of [`MDRawContextPPC`].
pub const MD_CONTEXT_PPC_SIZE: usize = 1004;

impl SizeWith<Endian> for MDRawContextPPC {
    fn size_with(_: &Endian) -> usize {
        MD_CONTEXT_PPC_SIZE
    }
}

/// Register index of the PPC stack pointer within `gpr`.
pub enum PpcRegisterNumbers {
    StackPointer = 1,
}

#[cfg(test)]
mod tests {
    use super::*;
    use scroll::Pread;

    #[test]
    fn test_sizes() {
        let endian = Endian::Little;
        assert_eq!(MDRawHeader::size_with(&endian), 32);
        assert_eq!(MDRawDirectory::size_with(&endian), 12);
        assert_eq!(MDRawThread::size_with(&endian), 48);
        assert_eq!(MDRawModule::size_with(&endian), MD_MODULE_SIZE as usize);
        assert_eq!(MDRawSystemInfo::size_with(&endian), 56);
        assert_eq!(MDRawExceptionStream::size_with(&endian), 168);
        assert_eq!(MDRawContextX86::size_with(&endian), MD_CONTEXT_X86_SIZE);
        assert_eq!(MDRawContextPPC::size_with(&endian), MD_CONTEXT_PPC_SIZE);
        assert_eq!(
            MDRawMiscInfo::size_with(&endian),
            MD_MISCINFO_SIZE as usize
        );
        assert_eq!(
            MDRawMiscInfo::size_with(&endian) + MDMiscInfoPowerInfo::size_with(&endian),
            MD_MISCINFO2_SIZE as usize
        );
    }

    #[test]
    fn test_context_flags_cpu() {
        assert_eq!(
            ContextFlagsCpu::from_flags(0x0001_0007),
            ContextFlagsCpu::CONTEXT_X86
        );
        assert_eq!(
            ContextFlagsCpu::from_flags(0x2000_0001),
            ContextFlagsCpu::CONTEXT_PPC
        );
    }

    #[test]
    fn test_guid_bytes_not_swapped() {
        let bytes = [
            0x01u8, 0x02, 0x03, 0x04, // data1
            0x05, 0x06, // data2
            0x07, 0x08, // data3
            0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f, 0x10, // data4
        ];
        let le: MDGUID = bytes.pread_with(0, Endian::Little).unwrap();
        assert_eq!(le.data1, 0x04030201);
        assert_eq!(le.data2, 0x0605);
        assert_eq!(le.data4, [0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f, 0x10]);
        let be: MDGUID = bytes.pread_with(0, Endian::Big).unwrap();
        assert_eq!(be.data1, 0x01020304);
        // 8-bit data reads the same either way.
        assert_eq!(be.data4, le.data4);
    }
}
