// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Types shared by the minidump reader, symbol handling, and processor
//! crates: the raw wire format, an interval map, and common traits.

pub mod format;
pub mod range_map;
pub mod traits;
