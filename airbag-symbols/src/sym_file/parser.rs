// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Parsing of text-format symbol files, one line kind at a time.
//!
//! The format is line-oriented: a keyword chooses the record kind and the
//! rest of the line is whitespace-separated fields. Unknown keywords are
//! skipped; a known keyword whose fields don't parse fails the whole file.

use log::warn;
use nom::{digit, hex_digit, not_line_ending, space, IResult};
use std::collections::HashMap;
use std::str;
use std::str::FromStr;

use super::types::*;
use airbag_common::range_map::RangeMap;

// Match a hex string, parse it to a u64.
named!(hex_str_u64<&[u8], u64>,
       map_res!(map_res!(hex_digit, str::from_utf8),
                |s| u64::from_str_radix(s, 16)));

// Match a hex string, parse it to a u32.
named!(hex_str_u32<&[u8], u32>,
       map_res!(map_res!(hex_digit, str::from_utf8),
                |s| u32::from_str_radix(s, 16)));

// Match a decimal string, parse it to a u32.
named!(decimal_u32<&[u8], u32>,
       map_res!(map_res!(digit, str::from_utf8), FromStr::from_str));

// The rest of the line, trailing whitespace trimmed, as an owned String.
named!(rest_of_line<&[u8], String>,
       map!(map_res!(not_line_ending, str::from_utf8),
            |s: &str| s.trim_end().to_string()));

// A `MODULE os arch id name` line. Nothing in it is used, it only has to
// be well-formed.
named!(module_line<&[u8], ()>,
       chain!(
           tag!("MODULE") ~
           space ~
           rest_of_line ~
           tag!("\n") ,
           || {}
       )
);

// A `FILE id name` line.
named!(file_line<&[u8], (u32, String)>,
       chain!(
           tag!("FILE") ~
           space ~
           id: decimal_u32 ~
           space ~
           name: rest_of_line ~
           tag!("\n") ,
           || { (id, name) }
       )
);

// A `FUNC address size parameter_size name` line.
named!(func_line<&[u8], Function>,
       chain!(
           tag!("FUNC") ~
           space ~
           address: hex_str_u64 ~
           space ~
           size: hex_str_u32 ~
           space ~
           parameter_size: hex_str_u32 ~
           space ~
           name: rest_of_line ~
           tag!("\n") ,
           || {
               Function {
                   address,
                   size,
                   parameter_size,
                   name,
                   lines: RangeMap::new(),
               }
           }
       )
);

// An `address size line file_id` line, part of the preceding function.
named!(line_data<&[u8], SourceLine>,
       chain!(
           address: hex_str_u64 ~
           space ~
           size: hex_str_u32 ~
           space ~
           line: decimal_u32 ~
           space ~
           file: decimal_u32 ~
           tag!("\n") ,
           || {
               SourceLine {
                   address,
                   size,
                   file,
                   line,
               }
           }
       )
);

// A `PUBLIC address parameter_size name` line.
named!(public_line<&[u8], PublicSymbol>,
       chain!(
           tag!("PUBLIC") ~
           space ~
           address: hex_str_u64 ~
           space ~
           parameter_size: hex_str_u32 ~
           space ~
           name: rest_of_line ~
           tag!("\n") ,
           || {
               PublicSymbol {
                   address,
                   parameter_size,
                   name,
               }
           }
       )
);

// A `STACK WIN type rva code_size prologue epilogue params saved_regs
// locals max_stack has_program program-or-bp` line.
named!(stack_win_line<&[u8], StackInfoWin>,
       chain!(
           tag!("STACK WIN") ~
           space ~
           frame_type: hex_str_u32 ~
           space ~
           address: hex_str_u64 ~
           space ~
           size: hex_str_u32 ~
           space ~
           prologue_size: hex_str_u32 ~
           space ~
           epilogue_size: hex_str_u32 ~
           space ~
           parameter_size: hex_str_u32 ~
           space ~
           saved_register_size: hex_str_u32 ~
           space ~
           local_size: hex_str_u32 ~
           space ~
           max_stack_size: hex_str_u32 ~
           space ~
           has_program_string: decimal_u32 ~
           space ~
           rest: rest_of_line ~
           tag!("\n") ,
           || {
               let program_string_or_base_pointer = if has_program_string != 0 {
                   WinStackThing::ProgramString(rest)
               } else {
                   WinStackThing::AllocatesBasePointer(rest == "1")
               };
               StackInfoWin {
                   frame_type,
                   address,
                   size,
                   prologue_size,
                   epilogue_size,
                   parameter_size,
                   saved_register_size,
                   local_size,
                   max_stack_size,
                   program_string_or_base_pointer,
               }
           }
       )
);

fn parse_line<'a, T, F>(parser: F, line: &'a [u8]) -> Result<T, &'static str>
where
    F: Fn(&'a [u8]) -> IResult<&'a [u8], T>,
{
    match parser(line) {
        IResult::Done(rest, value) => {
            if rest.is_empty() {
                Ok(value)
            } else {
                Err("incomplete parse")
            }
        }
        _ => Err("failed to parse line"),
    }
}

/// Parse an entire symbol file from `bytes`.
pub fn parse_symbol_bytes(bytes: &[u8]) -> Result<SymbolFile, &'static str> {
    let mut files = HashMap::new();
    let mut finished_functions: Vec<Function> = Vec::new();
    let mut cur_function: Option<Function> = None;
    let mut publics: Vec<PublicSymbol> = Vec::new();
    let mut win_stack: Vec<StackInfoWin> = Vec::new();

    for raw_line in bytes.split(|&byte| byte == b'\n') {
        let mut line = raw_line;
        if line.ends_with(b"\r") {
            line = &line[..line.len() - 1];
        }
        if line.is_empty() {
            continue;
        }
        // The line parsers expect a terminator.
        let mut terminated = Vec::with_capacity(line.len() + 1);
        terminated.extend_from_slice(line);
        terminated.push(b'\n');
        let line = &terminated[..];

        if line.starts_with(b"MODULE ") {
            parse_line(module_line, line)?;
        } else if line.starts_with(b"FILE ") {
            let (id, name) = parse_line(file_line, line)?;
            files.insert(id, name);
        } else if line.starts_with(b"FUNC ") {
            if let Some(function) = cur_function.take() {
                finished_functions.push(function);
            }
            cur_function = Some(parse_line(func_line, line)?);
        } else if line.starts_with(b"PUBLIC ") {
            publics.push(parse_line(public_line, line)?);
        } else if line.starts_with(b"STACK WIN ") {
            win_stack.push(parse_line(stack_win_line, line)?);
        } else if line.starts_with(b"STACK ") {
            // Some other flavor of unwind info, not handled here.
            continue;
        } else if line[0].is_ascii_hexdigit() {
            let source_line = parse_line(line_data, line)?;
            match cur_function {
                Some(ref mut function) => {
                    if !function.lines.store_range(
                        source_line.address,
                        source_line.size as u64,
                        source_line.clone(),
                    ) {
                        warn!("dropping line record for conflicting range: {:?}", source_line);
                    }
                }
                None => return Err("line record outside of a function"),
            }
        } else if line[0].is_ascii_uppercase() {
            // An unknown keyword; skip the line.
            continue;
        } else {
            return Err("unrecognized line");
        }
    }
    if let Some(function) = cur_function.take() {
        finished_functions.push(function);
    }

    let mut functions = RangeMap::new();
    for function in finished_functions {
        let address = function.address;
        let size = function.size as u64;
        if !functions.store_range(address, size, function) {
            warn!("dropping function with conflicting range at {:#x}", address);
        }
    }
    let mut win_stack_info = RangeMap::new();
    for info in win_stack {
        let address = info.address;
        let size = info.size as u64;
        if !win_stack_info.store_range(address, size, info) {
            warn!(
                "dropping STACK WIN record with conflicting range at {:#x}",
                address
            );
        }
    }
    publics.sort_by_key(|public| public.address);

    Ok(SymbolFile {
        files,
        functions,
        publics,
        win_stack_info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok<'a, T, F>(parser: F, line: &'a [u8]) -> T
    where
        F: Fn(&'a [u8]) -> IResult<&'a [u8], T>,
    {
        parse_line(parser, line).unwrap()
    }

    #[test]
    fn test_module_line() {
        parse_ok(module_line, b"MODULE windows x86 DEADBEEF4 foo.pdb\n");
        assert!(parse_line(module_line, b"MODULE\n").is_err());
    }

    #[test]
    fn test_file_line() {
        let (id, name) = parse_ok(file_line, b"FILE 1 foo.c\n");
        assert_eq!(id, 1);
        assert_eq!(name, "foo.c");
        let (id, name) = parse_ok(file_line, b"FILE 100 c:\\foo\\bar baz.c\n");
        assert_eq!(id, 100);
        assert_eq!(name, "c:\\foo\\bar baz.c");
        assert!(parse_line(file_line, b"FILE x y\n").is_err());
    }

    #[test]
    fn test_func_line() {
        let function = parse_ok(func_line, b"FUNC 1000 30 10 some func\n");
        assert_eq!(function.address, 0x1000);
        assert_eq!(function.size, 0x30);
        assert_eq!(function.parameter_size, 0x10);
        assert_eq!(function.name, "some func");
        assert!(parse_line(func_line, b"FUNC 1000\n").is_err());
    }

    #[test]
    fn test_line_data() {
        let line = parse_ok(line_data, b"1000 10 44 1\n");
        assert_eq!(
            line,
            SourceLine {
                address: 0x1000,
                size: 0x10,
                line: 44,
                file: 1,
            }
        );
        assert!(parse_line(line_data, b"1000 10 44\n").is_err());
    }

    #[test]
    fn test_public_line() {
        let public = parse_ok(public_line, b"PUBLIC f00d 10 some public\n");
        assert_eq!(public.address, 0xf00d);
        assert_eq!(public.parameter_size, 0x10);
        assert_eq!(public.name, "some public");
    }

    #[test]
    fn test_stack_win_line_program_string() {
        let info = parse_ok(
            stack_win_line,
            b"STACK WIN 4 2170 14 1 0 0 0 0 0 1 $eip 4 + ^ = $esp $ebp 8 + = $ebp $ebp ^ =\n",
        );
        assert_eq!(info.frame_type, 4);
        assert_eq!(info.address, 0x2170);
        assert_eq!(info.size, 0x14);
        assert_eq!(info.prologue_size, 1);
        assert_eq!(
            info.program_string_or_base_pointer,
            WinStackThing::ProgramString(
                "$eip 4 + ^ = $esp $ebp 8 + = $ebp $ebp ^ =".to_string()
            )
        );
    }

    #[test]
    fn test_stack_win_line_frame_data() {
        let info = parse_ok(stack_win_line, b"STACK WIN 0 1000 30 a1 b2 c3 d4 e5 f6 0 1\n");
        assert_eq!(info.frame_type, 0);
        assert_eq!(info.address, 0x1000);
        assert_eq!(info.size, 0x30);
        assert_eq!(info.prologue_size, 0xa1);
        assert_eq!(info.epilogue_size, 0xb2);
        assert_eq!(info.parameter_size, 0xc3);
        assert_eq!(info.saved_register_size, 0xd4);
        assert_eq!(info.local_size, 0xe5);
        assert_eq!(info.max_stack_size, 0xf6);
        assert_eq!(
            info.program_string_or_base_pointer,
            WinStackThing::AllocatesBasePointer(true)
        );
    }

    #[test]
    fn test_parse_symbol_bytes() {
        let bytes = &b"MODULE windows x86 D3096ED481217FD4C16B29CD9BC208BA0 firefox.pdb
FILE 1 foo.c
FILE 100 bar.c
UNKNOWN_KEYWORD whatever
FUNC 900 30 10 some other func
FUNC 1000 30 10 some func
1000 10 42 7
1010 10 43 7
1020 10 44 7
FUNC 1100 30 10 a third func
PUBLIC f00d 10 some public
PUBLIC bead 20 another public
STACK WIN 4 900 30 1 2 3 4 5 6 1 prog string
STACK WIN 0 1000 30 1 2 3 4 5 6 0 1
STACK CFI INIT 1100 30 .cfa: $esp
"[..];
        let sym = parse_symbol_bytes(bytes).unwrap();
        assert_eq!(sym.files.len(), 2);
        assert_eq!(sym.files[&1], "foo.c");
        assert_eq!(sym.files[&100], "bar.c");
        assert_eq!(sym.publics.len(), 2);
        // publics are sorted by address
        assert_eq!(sym.publics[0].name, "another public");
        assert_eq!(sym.publics[1].name, "some public");
        let func = sym.functions.retrieve_range(0x1010).unwrap();
        assert_eq!(func.name, "some func");
        let line = func.lines.retrieve_range(0x1015).unwrap();
        assert_eq!(line.line, 43);
        assert_eq!(line.file, 7);
        assert!(sym.functions.retrieve_range(0x930).is_none());
        let info = sym.win_stack_info.retrieve_range(0x920).unwrap();
        assert_eq!(
            info.program_string_or_base_pointer,
            WinStackThing::ProgramString("prog string".to_string())
        );
    }

    #[test]
    fn test_parse_symbol_bytes_malformed() {
        assert!(
            parse_symbol_bytes(&b"FILE x foo.c\n"[..]).is_err(),
            "malformed file line"
        );
        assert!(
            parse_symbol_bytes(&b"FILE 1 foo.c\nFUNC 1000 x y z\n"[..]).is_err(),
            "malformed func line"
        );
        assert!(
            parse_symbol_bytes(&b"1000 10 42 7\n"[..]).is_err(),
            "line data with no function"
        );
        assert!(
            parse_symbol_bytes(&b"FUNC 1000 30 10 f\n1000 10 42\n"[..]).is_err(),
            "malformed line data"
        );
    }
}
