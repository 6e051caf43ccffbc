// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! A parser for the minidump file format.
//!
//! The `airbag` crate provides a parser for the [minidump][minidump] file
//! format as produced by Microsoft's [`MinidumpWriteDump`][minidumpwritedump]
//! API and by in-process crash handlers modeled on it.
//!
//! The primary API for this crate is the [`Minidump`][struct_minidump]
//! struct, which can be instantiated by calling the [`Minidump::read`][read]
//! or [`Minidump::read_path`][read_path] methods.
//!
//! [minidump]: https://msdn.microsoft.com/en-us/library/windows/desktop/ms680369%28v=vs.85%29.aspx
//! [minidumpwritedump]: https://msdn.microsoft.com/en-us/library/windows/desktop/ms680360%28v=vs.85%29.aspx
//! [struct_minidump]: struct.Minidump.html
//! [read]: struct.Minidump.html#method.read
//! [read_path]: struct.Minidump.html#method.read_path

#![warn(missing_debug_implementations)]

#[cfg(doctest)]
doc_comment::doctest!("../README.md");

pub use scroll::Endian;

mod context;
mod iostuff;
mod minidump;

pub use airbag_common::format;
pub use airbag_common::range_map::RangeMap;
pub use airbag_common::traits::{MemoryRegion, Module};

pub use crate::context::*;
pub use crate::iostuff::Readable;
pub use crate::minidump::*;

pub mod system_info;
