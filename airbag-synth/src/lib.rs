// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Synthesize minidump files from test-assembler sections.
//!
//! A [`SynthMinidump`] starts out as a bare header; payloads and streams
//! are appended with [`add`](SynthMinidump::add) and
//! [`add_stream`](SynthMinidump::add_stream), which record the labels the
//! header and stream directory need, and [`finish`](SynthMinidump::finish)
//! resolves everything into bytes.

use airbag_common::format as md;
use test_assembler::{Endian, Label, LabelMaker, Section};

/// A chunk of a minidump file that knows where it lands in the file.
pub trait DumpSection: Into<Section> {
    /// A label bound to this section's offset from the start of the file.
    fn file_offset(&self) -> Label;
    /// A label bound to this section's size.
    fn file_size(&self) -> Label;
}

/// Things that can be referenced with an `MDLocationDescriptor`.
pub trait CiteLocation {
    /// Append an `MDLocationDescriptor` citing this thing to `section`.
    fn cite_location_in(&self, section: Section) -> Section;
}

impl<T: DumpSection> CiteLocation for T {
    fn cite_location_in(&self, section: Section) -> Section {
        section.D32(&self.file_size()).D32(&self.file_offset())
    }
}

/// A chunk that is written as a stream with a directory entry.
pub trait Stream: DumpSection {
    fn stream_type(&self) -> u32;
}

macro_rules! dump_section {
    ($typ:ident) => {
        impl From<$typ> for Section {
            fn from(thing: $typ) -> Section {
                thing.section
            }
        }
        impl DumpSection for $typ {
            fn file_offset(&self) -> Label {
                self.file_offset.clone()
            }
            fn file_size(&self) -> Label {
                self.section.final_size()
            }
        }
    };
}

/// A minidump file under construction.
pub struct SynthMinidump {
    section: Section,
    endian: Endian,
    stream_count: u32,
    stream_count_label: Label,
    stream_directory_rva: Label,
    stream_directory: Section,
}

impl SynthMinidump {
    /// Start a minidump with the given byte order.
    pub fn with_endian(endian: Endian) -> SynthMinidump {
        let stream_count_label = Label::new();
        let stream_directory_rva = Label::new();
        let section = Section::with_endian(endian)
            .D32(md::MD_HEADER_SIGNATURE)
            .D32(md::MD_HEADER_VERSION)
            .D32(&stream_count_label)
            .D32(&stream_directory_rva)
            .D32(0) // checksum
            .D32(0x4790_1234) // time_date_stamp
            .D64(0); // flags
        section.start().set_const(0);
        SynthMinidump {
            section,
            endian,
            stream_count: 0,
            stream_count_label,
            stream_directory_rva,
            stream_directory: Section::with_endian(endian),
        }
    }

    /// The byte order of the file being built.
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Append `thing` to the file, binding its offset label.
    pub fn add<T: DumpSection>(mut self, thing: T) -> SynthMinidump {
        let offset = thing.file_offset();
        let section: Section = thing.into();
        self.section = self.section.mark(&offset).append_section(section);
        self
    }

    /// Append a bare section to the file without a directory entry.
    pub fn add_raw(mut self, section: Section) -> SynthMinidump {
        self.section = self.section.append_section(section);
        self
    }

    /// Append `stream` to the file and cite it in the stream directory.
    pub fn add_stream<T: Stream>(mut self, stream: T) -> SynthMinidump {
        self.stream_directory = self
            .stream_directory
            .D32(stream.stream_type())
            .D32(&stream.file_size())
            .D32(&stream.file_offset());
        self.stream_count += 1;
        self.add(stream)
    }

    /// Resolve all labels and produce the file's bytes.
    pub fn finish(self) -> Option<Vec<u8>> {
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

/// A string stored in minidump format: a 32-bit byte length followed by
/// UTF-16 code units.
pub struct DumpString {
    section: Section,
    file_offset: Label,
}

impl DumpString {
    pub fn new(string: &str, endian: Endian) -> DumpString {
        let units: Vec<u16> = string.encode_utf16().collect();
        let mut section = Section::with_endian(endian).D32((units.len() * 2) as u32);
        for unit in units {
            section = section.D16(unit);
        }
        DumpString {
            section,
            file_offset: Label::new(),
        }
    }
}

dump_section!(DumpString);

/// A range of the original process's memory and its place in the file.
pub struct Memory {
    section: Section,
    file_offset: Label,
    /// The address of this range in the original process.
    pub address: u64,
    /// The size of this range.
    pub size: u32,
}

impl Memory {
    /// Use `section`'s contents as memory at `address`.
    pub fn with_section(section: Section, address: u64) -> Memory {
        let size = section.size() as u32;
        Memory {
            section,
            file_offset: Label::new(),
            address,
            size,
        }
    }

    /// Append an `MDMemoryDescriptor` citing this memory to `section`.
    pub fn cite_memory_in(&self, section: Section) -> Section {
        let section = section.D64(self.address);
        self.cite_location_in(section)
    }
}

dump_section!(Memory);

/// An x86 CPU context with the given control registers, everything else
/// zeroed.
pub struct X86Context {
    section: Section,
    file_offset: Label,
}

impl X86Context {
    pub fn new(endian: Endian, eip: u32, esp: u32, ebp: u32) -> X86Context {
        let section = Section::with_endian(endian)
            // context_flags: a full x86 context
            .D32(0x0001_0007)
            // dr0-dr3, dr6, dr7
            .D32(0)
            .D32(0)
            .D32(0)
            .D32(0)
            .D32(0)
            .D32(0)
            // float_save fixed fields
            .D32(0)
            .D32(0)
            .D32(0)
            .D32(0)
            .D32(0)
            .D32(0)
            .D32(0)
            .append_repeated(0, 80)
            // cr0_npx_state
            .D32(0)
            // gs, fs, es, ds
            .D32(0)
            .D32(0)
            .D32(0)
            .D32(0)
            // edi, esi, ebx, edx, ecx, eax
            .D32(0)
            .D32(0)
            .D32(0)
            .D32(0)
            .D32(0)
            .D32(0)
            .D32(ebp)
            .D32(eip)
            // cs, eflags
            .D32(0)
            .D32(0)
            .D32(esp)
            // ss
            .D32(0)
            .append_repeated(0, 512);
        X86Context {
            section,
            file_offset: Label::new(),
        }
    }
}

dump_section!(X86Context);

/// A stream built from a count followed by fixed-size entries.
pub struct ListStream {
    stream_type: u32,
    count: u32,
    count_label: Label,
    section: Section,
    file_offset: Label,
}

impl ListStream {
    pub fn new(stream_type: u32, endian: Endian) -> ListStream {
        let count_label = Label::new();
        let section = Section::with_endian(endian).D32(&count_label);
        ListStream {
            stream_type,
            count: 0,
            count_label,
            section,
            file_offset: Label::new(),
        }
    }

    pub fn add_entry(mut self, entry: Section) -> ListStream {
        self.count += 1;
        self.section = self.section.append_section(entry);
        self
    }
}

impl From<ListStream> for Section {
    fn from(list: ListStream) -> Section {
        list.count_label.set_const(list.count as u64);
        list.section
    }
}

impl DumpSection for ListStream {
    fn file_offset(&self) -> Label {
        self.file_offset.clone()
    }
    fn file_size(&self) -> Label {
        self.section.final_size()
    }
}

impl Stream for ListStream {
    fn stream_type(&self) -> u32 {
        self.stream_type
    }
}

/// An arbitrary stream from a raw section.
pub struct SimpleStream {
    stream_type: u32,
    section: Section,
    file_offset: Label,
}

impl SimpleStream {
    pub fn new(stream_type: u32, section: Section) -> SimpleStream {
        SimpleStream {
            stream_type,
            section,
            file_offset: Label::new(),
        }
    }
}

impl From<SimpleStream> for Section {
    fn from(stream: SimpleStream) -> Section {
        stream.section
    }
}

impl DumpSection for SimpleStream {
    fn file_offset(&self) -> Label {
        self.file_offset.clone()
    }
    fn file_size(&self) -> Label {
        self.section.final_size()
    }
}

impl Stream for SimpleStream {
    fn stream_type(&self) -> u32 {
        self.stream_type
    }
}

/// A PDB 7.0 CodeView record.
pub struct CvRecordPdb70 {
    section: Section,
    file_offset: Label,
}

impl CvRecordPdb70 {
    /// `guid` is `(data1, data2, data3, data4)`.
    pub fn new(
        endian: Endian,
        guid: (u32, u16, u16, [u8; 8]),
        age: u32,
        pdb_file_name: &str,
    ) -> CvRecordPdb70 {
        let (data1, data2, data3, data4) = guid;
        let section = Section::with_endian(endian)
            .D32(md::MD_CVINFOPDB70_SIGNATURE)
            .D32(data1)
            .D16(data2)
            .D16(data3)
            .append_bytes(&data4)
            .D32(age)
            .append_bytes(pdb_file_name.as_bytes())
            .D8(0);
        CvRecordPdb70 {
            section,
            file_offset: Label::new(),
        }
    }
}

dump_section!(CvRecordPdb70);

/// Build an `MDRawThread` entry for a thread-list stream.
pub fn thread_entry<C: CiteLocation>(
    endian: Endian,
    thread_id: u32,
    stack: &Memory,
    context: &C,
) -> Section {
    let section = Section::with_endian(endian)
        .D32(thread_id)
        .D32(0) // suspend_count
        .D32(0) // priority_class
        .D32(0) // priority
        .D64(0); // teb
    let section = stack.cite_memory_in(section);
    context.cite_location_in(section)
}

/// Build an `MDRawModule` entry for a module-list stream.
pub fn module_entry(
    endian: Endian,
    base_of_image: u64,
    size_of_image: u32,
    time_date_stamp: u32,
    name: &DumpString,
    cv_record: Option<&CvRecordPdb70>,
) -> Section {
    let mut section = Section::with_endian(endian)
        .D64(base_of_image)
        .D32(size_of_image)
        .D32(0) // checksum
        .D32(time_date_stamp)
        .D32(&name.file_offset());
    // version_info, all zero
    for _ in 0..13 {
        section = section.D32(0);
    }
    let section = match cv_record {
        Some(cv) => cv.cite_location_in(section),
        None => section.D32(0).D32(0),
    };
    section
        // misc_record
        .D32(0)
        .D32(0)
        // reserved0, reserved1
        .D64(0)
        .D64(0)
}

/// Build an exception stream citing `context`.
pub fn exception_stream<C: CiteLocation>(
    endian: Endian,
    thread_id: u32,
    exception_code: u32,
    exception_address: u64,
    context: &C,
) -> SimpleStream {
    let mut section = Section::with_endian(endian)
        .D32(thread_id)
        .D32(0) // alignment
        .D32(exception_code)
        .D32(0) // exception_flags
        .D64(0) // exception_record
        .D64(exception_address)
        .D32(0) // number_parameters
        .D32(0); // alignment
    for _ in 0..md::MD_EXCEPTION_MAXIMUM_PARAMETERS {
        section = section.D64(0);
    }
    let section = context.cite_location_in(section);
    SimpleStream::new(md::MDStreamType::ExceptionStream as u32, section)
}

/// Build a system-info stream.
pub fn system_info_stream(
    endian: Endian,
    processor_architecture: u16,
    platform_id: u32,
    csd_version: Option<&DumpString>,
) -> SimpleStream {
    let section = Section::with_endian(endian)
        .D16(processor_architecture)
        .D16(6) // processor_level
        .D16(0xd08) // processor_revision
        .D8(1) // number_of_processors
        .D8(0) // product_type
        .D32(5) // major_version
        .D32(1) // minor_version
        .D32(2600) // build_number
        .D32(platform_id);
    let section = match csd_version {
        Some(csd) => section.D32(&csd.file_offset()),
        None => section.D32(0),
    };
    let section = section
        .D16(0) // suite_mask
        .D16(0) // reserved2
        .append_bytes(b"GenuineIntel")
        .append_repeated(0, 12);
    SimpleStream::new(md::MDStreamType::SystemInfoStream as u32, section)
}

/// Build a misc-info stream with valid process id and times.
pub fn misc_info_stream(endian: Endian, process_id: u32, process_create_time: u32) -> SimpleStream {
    let section = Section::with_endian(endian)
        .D32(md::MD_MISCINFO_SIZE)
        .D32(md::MD_MISCINFO_FLAGS1_PROCESS_ID | md::MD_MISCINFO_FLAGS1_PROCESS_TIMES)
        .D32(process_id)
        .D32(process_create_time)
        .D32(0x20) // process_user_time
        .D32(0x30); // process_kernel_time
    SimpleStream::new(md::MDStreamType::MiscInfoStream as u32, section)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_dump() {
        let bytes = SynthMinidump::with_endian(Endian::Little)
            .finish()
            .unwrap();
        // Just the header and an empty directory.
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[..4], &[0x4d, 0x44, 0x4d, 0x50]);
        // stream_count
        assert_eq!(&bytes[8..12], &[0, 0, 0, 0]);
        // stream_directory_rva points at end of file
        assert_eq!(&bytes[12..16], &[32, 0, 0, 0]);
    }

    #[test]
    fn test_dump_string() {
        let string = DumpString::new("a\u{0400}", Endian::Little);
        let offset = string.file_offset();
        let bytes = SynthMinidump::with_endian(Endian::Little)
            .add(string)
            .finish()
            .unwrap();
        let offset = offset.value().unwrap() as usize;
        assert_eq!(offset, 32);
        assert_eq!(&bytes[offset..offset + 8], &[4, 0, 0, 0, 0x61, 0, 0, 4]);
    }

    #[test]
    fn test_stream_directory() {
        let stream = SimpleStream::new(0xcafe, Section::with_endian(Endian::Little).D32(42));
        let bytes = SynthMinidump::with_endian(Endian::Little)
            .add_stream(stream)
            .finish()
            .unwrap();
        // header + 4-byte stream + 12-byte directory
        assert_eq!(bytes.len(), 48);
        // stream_count == 1
        assert_eq!(&bytes[8..12], &[1, 0, 0, 0]);
        // directory entry: type 0xcafe, size 4, rva 32
        assert_eq!(&bytes[36..40], &[0xfe, 0xca, 0, 0]);
        assert_eq!(&bytes[40..44], &[4, 0, 0, 0]);
        assert_eq!(&bytes[44..48], &[32, 0, 0, 0]);
    }
}
