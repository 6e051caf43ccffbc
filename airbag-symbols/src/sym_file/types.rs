// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

use airbag_common::range_map::RangeMap;
use std::collections::HashMap;

/// A single source line record: `[address, address + size)` maps to
/// `line` in source file `file`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceLine {
    /// The start address relative to the module's load address.
    pub address: u64,
    /// The size of this line in bytes.
    pub size: u32,
    /// The source file id, resolved through `SymbolFile::files`.
    pub file: u32,
    /// The 1-based line number.
    pub line: u32,
}

/// A source-level function.
#[derive(Clone, Debug)]
pub struct Function {
    /// The function's start address relative to the module's load address.
    pub address: u64,
    /// The size of the function in bytes.
    pub size: u32,
    /// The size of parameters passed to the function.
    pub parameter_size: u32,
    /// The name of the function as declared in the source.
    pub name: String,
    /// Source line information for this function.
    pub lines: RangeMap<u64, SourceLine>,
}

/// A PUBLIC symbol: a name for an address, without line information.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicSymbol {
    /// The symbol's start address relative to the module's load address.
    pub address: u64,
    /// The size of parameters passed to the function.
    pub parameter_size: u32,
    /// The name of the symbol.
    pub name: String,
}

/// The payload of the final STACK WIN field: either an unwind program
/// string or a flag saying whether the function keeps a standard frame
/// pointer in `%ebp`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WinStackThing {
    ProgramString(String),
    AllocatesBasePointer(bool),
}

/// A STACK WIN frame-unwind record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackInfoWin {
    /// The record type as stored in the symbol file; 4 is the FrameData
    /// variant carrying a program string, 0 the FPO variant.
    pub frame_type: u32,
    /// The start address covered, relative to the module's load address.
    pub address: u64,
    /// The size of the covered code in bytes.
    pub size: u32,
    pub prologue_size: u32,
    pub epilogue_size: u32,
    pub parameter_size: u32,
    pub saved_register_size: u32,
    pub local_size: u32,
    pub max_stack_size: u32,
    pub program_string_or_base_pointer: WinStackThing,
}

/// A parsed symbol file, indexed for address lookup.
#[derive(Clone, Debug, Default)]
pub struct SymbolFile {
    /// The set of source files involved in compilation, by id.
    pub files: HashMap<u32, String>,
    /// Functions by address range.
    pub functions: RangeMap<u64, Function>,
    /// PUBLIC symbols, sorted by address. Each one covers addresses up to
    /// the next.
    pub publics: Vec<PublicSymbol>,
    /// STACK WIN frame-unwind records by address range.
    pub win_stack_info: RangeMap<u64, StackInfoWin>,
}
