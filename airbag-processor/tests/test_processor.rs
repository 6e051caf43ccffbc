// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! End-to-end processing of a synthesized minidump: read the dump, walk
//! the crashed thread's stack with frame pointers, and annotate frames
//! from an in-memory symbol file.

use airbag::format::MDStreamType;
use airbag::{CrashReason, Minidump, Module};
use airbag_processor::{process_minidump, CallStackInfo, FrameTrust, ProcessError};
use airbag_symbols::{StringSymbolSupplier, Symbolizer};
use airbag_synth::{
    exception_stream, misc_info_stream, module_entry, system_info_stream, thread_entry,
    CvRecordPdb70, DumpString, ListStream, Memory, SynthMinidump, X86Context,
};
use std::collections::HashMap;
use std::io::Cursor;
use test_assembler::{Endian, Section};

// The test program's symbols; addresses are relative to the module base.
const TEST_APP_SYM: &str = "\
MODULE windows x86 BCDEF1234567890ABCDEF123456789012 test_app.pdb
FILE 1 c:\\test_app.cc
FILE 2 f:\\rtm\\vctools\\crt_bld\\self_x86\\crt\\src\\crt0.c
FUNC 1000 100 0 CrashFunction()
1000 100 65 1
FUNC 1100 100 0 main
1100 100 70 1
FUNC 1200 100 0 __tmainCRTStartup
1200 100 318 2
";

/// Build a dump that looks like a crash in `c:\test_app.exe` on 32-bit
/// Windows: a frame-pointer chain of three app frames with a fourth in
/// kernel32, terminated by a null return address.
fn synthesize_crash_dump() -> Vec<u8> {
    let endian = Endian::Little;

    let app_name = DumpString::new("c:\\test_app.exe", endian);
    let kernel32_name = DumpString::new("C:\\WINDOWS\\system32\\kernel32.dll", endian);
    let cv = CvRecordPdb70::new(
        endian,
        (
            0xbcdef123,
            0x4567,
            0x890a,
            [0xbc, 0xde, 0xf1, 0x23, 0x45, 0x67, 0x89, 0x01],
        ),
        2,
        "test_app.pdb",
    );
    let module_list = ListStream::new(MDStreamType::ModuleListStream as u32, endian)
        .add_entry(module_entry(
            endian,
            0x0040_0000,
            0x0001_0000,
            0xb105_f00d,
            &app_name,
            Some(&cv),
        ))
        .add_entry(module_entry(
            endian,
            0x7c80_0000,
            0x0010_0000,
            0x44d8_4a3e,
            &kernel32_name,
            None,
        ));

    // The stack, based at 0x80000. Each frame's %ebp points at a saved
    // (caller ebp, return address) pair.
    let stack_section = Section::with_endian(endian)
        // 0x80000..0x80010: CrashFunction's locals
        .D32(0)
        .D32(0)
        .D32(0)
        .D32(0)
        // 0x80010: saved ebp and return address into main
        .D32(0x0008_0020)
        .D32(0x0040_1130)
        .D32(0)
        .D32(0)
        // 0x80020: saved ebp and return address into __tmainCRTStartup
        .D32(0x0008_0030)
        .D32(0x0040_1250)
        .D32(0)
        .D32(0)
        // 0x80030: saved ebp and return address into kernel32
        .D32(0x0008_0040)
        .D32(0x7c81_6fd7)
        .D32(0)
        .D32(0)
        // 0x80040: end of the chain
        .D32(0)
        .D32(0);
    let stack = Memory::with_section(stack_section, 0x0008_0000);

    // Crashed in CrashFunction with a standard frame.
    let context = X86Context::new(endian, 0x0040_1020, 0x0008_0000, 0x0008_0010);

    let thread_list = ListStream::new(MDStreamType::ThreadListStream as u32, endian).add_entry(thread_entry(
        endian,
        0x1234,
        &stack,
        &context,
    ));
    let exception = exception_stream(endian, 0x1234, 0xc000_0005, 0x45, &context);
    let system_info = system_info_stream(endian, 0, 2, None);
    let misc_info = misc_info_stream(endian, 0xbeef, 0x4790_0000);

    SynthMinidump::with_endian(endian)
        .add(app_name)
        .add(kernel32_name)
        .add(cv)
        .add(stack)
        .add(context)
        .add_stream(module_list)
        .add_stream(thread_list)
        .add_stream(exception)
        .add_stream(system_info)
        .add_stream(misc_info)
        .finish()
        .unwrap()
}

fn test_symbolizer() -> Symbolizer {
    let mut modules = HashMap::new();
    modules.insert("c:\\test_app.exe".to_string(), TEST_APP_SYM.to_string());
    Symbolizer::new(StringSymbolSupplier::new(modules))
}

#[test]
fn test_processor() {
    let bytes = synthesize_crash_dump();
    let mut dump = Minidump::read(Cursor::new(bytes)).unwrap();
    let symbolizer = test_symbolizer();
    let state = process_minidump(&mut dump, &symbolizer).unwrap();

    assert_eq!(state.crash_reason, Some(CrashReason::AccessViolation));
    assert_eq!(state.crash_address, Some(0x45));
    assert_eq!(state.process_id, Some(0xbeef));
    assert_eq!(state.requesting_thread, Some(0));
    assert!(state.crashed());
    assert_eq!(state.threads.len(), 1);

    let stack = &state.threads[0];
    assert_eq!(stack.info, CallStackInfo::Ok);
    assert_eq!(stack.frames.len(), 4);

    let f0 = &stack.frames[0];
    assert_eq!(f0.trust, FrameTrust::Context);
    assert_eq!(f0.instruction, 0x0040_1020);
    let module = f0.module.as_ref().unwrap();
    assert_eq!(module.base_address(), 0x0040_0000);
    assert_eq!(module.code_file(), "c:\\test_app.exe");
    assert_eq!(f0.function_name.as_deref(), Some("CrashFunction()"));
    assert_eq!(f0.source_file_name.as_deref(), Some("c:\\test_app.cc"));
    assert_eq!(f0.source_line, Some(65));

    let f1 = &stack.frames[1];
    assert_eq!(f1.trust, FrameTrust::FramePointer);
    assert_eq!(f1.instruction, 0x0040_1130);
    assert_eq!(f1.module.as_ref().unwrap().code_file(), "c:\\test_app.exe");
    assert_eq!(f1.function_name.as_deref(), Some("main"));
    assert_eq!(f1.source_file_name.as_deref(), Some("c:\\test_app.cc"));
    assert_eq!(f1.source_line, Some(70));

    let f2 = &stack.frames[2];
    assert_eq!(f2.instruction, 0x0040_1250);
    assert_eq!(f2.module.as_ref().unwrap().code_file(), "c:\\test_app.exe");
    assert_eq!(f2.function_name.as_deref(), Some("__tmainCRTStartup"));
    assert_eq!(
        f2.source_file_name.as_deref(),
        Some("f:\\rtm\\vctools\\crt_bld\\self_x86\\crt\\src\\crt0.c")
    );
    assert_eq!(f2.source_line, Some(318));

    // kernel32 has no symbols available.
    let f3 = &stack.frames[3];
    assert_eq!(f3.instruction, 0x7c81_6fd7);
    let module = f3.module.as_ref().unwrap();
    assert_eq!(module.base_address(), 0x7c80_0000);
    assert_eq!(module.code_file(), "C:\\WINDOWS\\system32\\kernel32.dll");
    assert!(f3.function_name.is_none());
    assert!(f3.source_file_name.is_none());
    assert!(f3.source_line.is_none());

    // Stack pointers move strictly upward through the walk.
    for pair in stack.frames.windows(2) {
        assert!(
            pair[1].context.get_stack_pointer() > pair[0].context.get_stack_pointer()
        );
    }

    // The human-readable and JSON outputs both render.
    let mut text = Vec::new();
    state.print(&mut text).unwrap();
    let text = String::from_utf8(text).unwrap();
    assert!(text.contains("CrashFunction()"));
    assert!(text.contains("EXCEPTION_ACCESS_VIOLATION"));
    let mut json = Vec::new();
    state.print_json(&mut json, false).unwrap();
    let json: serde_json::Value = serde_json::from_slice(&json).unwrap();
    assert_eq!(json["crashing_thread"]["thread_index"], 0);
    assert_eq!(json["threads"][0]["frame_count"], 4);
}

#[test]
fn test_processor_missing_system_info() {
    let endian = Endian::Little;
    let bytes = SynthMinidump::with_endian(endian).finish().unwrap();
    let mut dump = Minidump::read(Cursor::new(bytes)).unwrap();
    let symbolizer = test_symbolizer();
    assert_eq!(
        process_minidump(&mut dump, &symbolizer).err(),
        Some(ProcessError::MissingSystemInfo)
    );
}

#[test]
fn test_processor_missing_thread_list() {
    let endian = Endian::Little;
    let bytes = SynthMinidump::with_endian(endian)
        .add_stream(system_info_stream(endian, 0, 2, None))
        .finish()
        .unwrap();
    let mut dump = Minidump::read(Cursor::new(bytes)).unwrap();
    let symbolizer = test_symbolizer();
    assert_eq!(
        process_minidump(&mut dump, &symbolizer).err(),
        Some(ProcessError::MissingThreadList)
    );
}
