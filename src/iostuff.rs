// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! I/O plumbing for reading minidumps.

use std::io;
use std::io::prelude::*;

/// Something that can provide random access to minidump bytes.
pub trait Readable: Read + Seek {}
impl<T: Read + Seek> Readable for T {}

/// Write `bytes` to `f` as hex digits, two per byte.
pub fn write_bytes<T: Write>(f: &mut T, bytes: &[u8]) -> io::Result<()> {
    for byte in bytes {
        write!(f, "{:02x}", byte)?;
    }
    Ok(())
}
