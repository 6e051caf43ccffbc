// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

use std::fs::File;
use std::io::prelude::*;
use std::path::Path;

use crate::{FrameSymbolizer, SymbolError};
use airbag_common::traits::Module;
use log::warn;

mod parser;
mod types;

pub use self::types::*;

use self::parser::parse_symbol_bytes;

impl SymbolFile {
    /// Parse a symbol file from `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<SymbolFile, SymbolError> {
        parse_symbol_bytes(bytes).map_err(SymbolError::ParseError)
    }

    /// Parse the symbol file at `path`.
    pub fn from_file(path: &Path) -> Result<SymbolFile, SymbolError> {
        let mut file = File::open(path).map_err(SymbolError::LoadError)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).map_err(SymbolError::LoadError)?;
        SymbolFile::from_bytes(&bytes)
    }

    /// Fill in as much source information for `frame`'s instruction as the
    /// file contains: a covering FUNC with its line records, or failing
    /// that the nearest preceding PUBLIC symbol.
    pub fn fill_symbol(&self, module: &dyn Module, frame: &mut dyn FrameSymbolizer) {
        let addr = match frame.get_instruction().checked_sub(module.base_address()) {
            Some(addr) => addr,
            None => return,
        };
        if let Some(function) = self.functions.retrieve_range(addr) {
            frame.set_function(
                &function.name,
                function.address + module.base_address(),
                function.parameter_size,
            );
            if let Some(line) = function.lines.retrieve_range(addr) {
                match self.files.get(&line.file) {
                    Some(file) => frame.set_source_file(
                        file,
                        line.line,
                        line.address + module.base_address(),
                    ),
                    None => warn!("line record references unknown file id {}", line.file),
                }
            }
        } else if let Some(public) = self.find_nearest_public(addr) {
            frame.set_function(
                &public.name,
                public.address + module.base_address(),
                public.parameter_size,
            );
        }
    }

    /// The STACK WIN record covering `address`, an absolute instruction
    /// address within `module`.
    pub fn find_win_frame_info(&self, module: &dyn Module, address: u64) -> Option<&StackInfoWin> {
        let addr = address.checked_sub(module.base_address())?;
        self.win_stack_info.retrieve_range(addr)
    }

    /// The PUBLIC symbol at the highest address not above `addr`.
    fn find_nearest_public(&self, addr: u64) -> Option<&PublicSymbol> {
        // `publics` is sorted by address.
        let index = match self
            .publics
            .binary_search_by_key(&addr, |public| public.address)
        {
            Ok(index) => index,
            Err(0) => return None,
            Err(index) => index - 1,
        };
        self.publics.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimpleFrame;

    // A symbol file equivalent to the classic resolver test fixture.
    const SYM: &str = "\
MODULE windows x86 111111111111111111111111111111111 module1.pdb
FILE 1 file1_1.cc
FILE 2 file1_2.cc
FUNC 1000 200 4 Function1_1
1000 50 44 1
1050 50 45 1
FUNC 1280 30 0 Function1_3
PUBLIC 2000 8 Public1_1
STACK WIN 4 1000 200 1 2 4 8 10 0 1 $eip 4 + ^ = $esp $ebp 8 + = $ebp $ebp ^ =
";

    fn test_module() -> (&'static str, &'static str) {
        // A module loaded at base address 0.
        ("module1.pdb", "111111111111111111111111111111111")
    }

    #[test]
    fn test_fill_symbol_function_and_line() {
        let sym = SymbolFile::from_bytes(SYM.as_bytes()).unwrap();
        let module = test_module();
        let mut frame = SimpleFrame::with_instruction(0x1000);
        sym.fill_symbol(&module, &mut frame);
        assert_eq!(frame.function.as_deref(), Some("Function1_1"));
        assert_eq!(frame.function_base, Some(0x1000));
        assert_eq!(frame.parameter_size, Some(4));
        assert_eq!(frame.source_file.as_deref(), Some("file1_1.cc"));
        assert_eq!(frame.source_line, Some(44));
        assert_eq!(frame.source_line_base, Some(0x1000));
    }

    #[test]
    fn test_fill_symbol_miss() {
        let sym = SymbolFile::from_bytes(SYM.as_bytes()).unwrap();
        let module = test_module();
        let mut frame = SimpleFrame::with_instruction(0x800);
        sym.fill_symbol(&module, &mut frame);
        assert!(frame.function.is_none());
        assert!(frame.source_file.is_none());
        assert!(frame.source_line.is_none());
    }

    #[test]
    fn test_fill_symbol_function_without_lines() {
        let sym = SymbolFile::from_bytes(SYM.as_bytes()).unwrap();
        let module = test_module();
        let mut frame = SimpleFrame::with_instruction(0x1290);
        sym.fill_symbol(&module, &mut frame);
        assert_eq!(frame.function.as_deref(), Some("Function1_3"));
        assert!(frame.source_file.is_none());
        assert!(frame.source_line.is_none());
    }

    #[test]
    fn test_fill_symbol_public() {
        let sym = SymbolFile::from_bytes(SYM.as_bytes()).unwrap();
        let module = test_module();
        let mut frame = SimpleFrame::with_instruction(0x2800);
        sym.fill_symbol(&module, &mut frame);
        assert_eq!(frame.function.as_deref(), Some("Public1_1"));
        assert_eq!(frame.function_base, Some(0x2000));
        assert!(frame.source_line.is_none());
    }

    #[test]
    fn test_find_win_frame_info() {
        let sym = SymbolFile::from_bytes(SYM.as_bytes()).unwrap();
        let module = test_module();
        let info = sym.find_win_frame_info(&module, 0x1100).unwrap();
        assert_eq!(
            info.program_string_or_base_pointer,
            WinStackThing::ProgramString(
                "$eip 4 + ^ = $esp $ebp 8 + = $ebp $ebp ^ =".to_string()
            )
        );
        assert!(sym.find_win_frame_info(&module, 0x1280).is_none());
    }

    #[test]
    fn test_from_bytes_malformed() {
        assert!(SymbolFile::from_bytes(b"this is not a symbol file\n").is_err());
    }
}
