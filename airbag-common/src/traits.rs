//! Traits shared between the minidump reader and its consumers.

use std::borrow::Cow;

/// A code module (an executable or shared library) that was mapped into
/// the process a dump describes.
///
/// Symbol lookup needs only a handful of facts about a module, so this
/// trait lets symbol suppliers and resolvers work with anything that can
/// provide them, not just modules parsed out of a minidump.
pub trait Module {
    /// Where the module was mapped in the process.
    fn base_address(&self) -> u64;
    /// How many bytes the mapping covered.
    fn size(&self) -> u64;
    /// The path the module was loaded from.
    fn code_file(&self) -> Cow<str>;
    /// A string that tells this build of the module apart from other
    /// builds of the same file. The format is producer-defined; a
    /// timestamp, a uuid, or a version number are all fair game.
    fn code_identifier(&self) -> Cow<str>;
    /// The file holding the module's debug information, if known.
    ///
    /// This matches `code_file` when debug info is embedded in the module
    /// itself, and names the separate file (a `.pdb`, say) when it was
    /// split out.
    fn debug_file(&self) -> Option<Cow<str>>;
    /// Like `code_identifier`, but identifying the exact build of
    /// `debug_file`. The two identifiers may coincide when the debug and
    /// code files do.
    fn debug_identifier(&self) -> Option<Cow<str>>;
    /// The module's version, rendered for humans.
    fn version(&self) -> Option<Cow<str>>;
}

/// A `(debug_file, debug_identifier)` pair is enough of a module for
/// symbol lookup; `Symbolizer::get_symbol_at_address` leans on this.
impl<'a> Module for (&'a str, &'a str) {
    fn base_address(&self) -> u64 {
        0
    }
    fn size(&self) -> u64 {
        0
    }
    fn code_file(&self) -> Cow<str> {
        Cow::Borrowed("")
    }
    fn code_identifier(&self) -> Cow<str> {
        Cow::Borrowed("")
    }
    fn debug_file(&self) -> Option<Cow<str>> {
        Some(Cow::Borrowed(self.0))
    }
    fn debug_identifier(&self) -> Option<Cow<str>> {
        Some(Cow::Borrowed(self.1))
    }
    fn version(&self) -> Option<Cow<str>> {
        None
    }
}

/// A range of memory captured from a process, readable at typed widths.
///
/// Reads honor the byte order of the process that produced the data, and
/// fail for any access not wholly inside `[base_address, base_address + size)`.
pub trait MemoryRegion {
    /// The base address of this region in the original process.
    fn base_address(&self) -> u64;
    /// The size of this region in bytes.
    fn size(&self) -> u64;
    /// Read a byte at `address`.
    fn memory_at_address_u8(&self, address: u64) -> Option<u8>;
    /// Read a 16-bit value at `address`.
    fn memory_at_address_u16(&self, address: u64) -> Option<u16>;
    /// Read a 32-bit value at `address`.
    fn memory_at_address_u32(&self, address: u64) -> Option<u32>;
    /// Read a 64-bit value at `address`.
    fn memory_at_address_u64(&self, address: u64) -> Option<u64>;
}
