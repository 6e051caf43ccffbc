// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Processed crash state: annotated frames, per-thread call stacks, and
//! the whole-process summary assembled from a minidump.

use std::borrow::Cow;
use std::io;
use std::io::prelude::*;

use crate::system_info::SystemInfo;
use airbag::system_info::Cpu;
use airbag::{CrashReason, MinidumpContext, MinidumpModule, MinidumpModuleList, Module};
use airbag_symbols::{FrameSymbolizer, StackInfoWin};
use chrono::prelude::*;
use serde_json::{json, Value};

/// How the stack walker arrived at a frame's instruction pointer.
///
/// Walkers that run out of unwind information can fall back to
/// heuristics, so a frame may be plausible rather than certain; consumers
/// can rank frames by this.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum FrameTrust {
    /// No information about how the frame was found.
    None,
    /// Produced by scanning the stack for return addresses.
    Scan,
    /// Produced by call frame info, confirmed by stack scanning.
    CfiScan,
    /// Recovered by following the frame-pointer chain.
    FramePointer,
    /// Recovered by evaluating call frame info.
    CallFrameInfo,
    /// Handed over by an external stack walker.
    PreWalked,
    /// Taken directly from a thread or exception context.
    Context,
}

impl FrameTrust {
    /// The phrase used on the `Found by:` line of the text output.
    pub fn description(&self) -> &'static str {
        match *self {
            FrameTrust::Context => "given as instruction pointer in context",
            FrameTrust::PreWalked => "recovered by external stack walker",
            FrameTrust::CallFrameInfo => "call frame info",
            FrameTrust::CfiScan => "call frame info with scanning",
            FrameTrust::FramePointer => "previous frame's frame pointer",
            FrameTrust::Scan => "stack scanning",
            FrameTrust::None => "unknown",
        }
    }

    /// The identifier for this trust level in the JSON schema.
    fn json_name(&self) -> &'static str {
        match *self {
            FrameTrust::Context => "context",
            FrameTrust::PreWalked => "prewalked",
            FrameTrust::CallFrameInfo => "cfi",
            FrameTrust::CfiScan => "cfi_scan",
            FrameTrust::FramePointer => "frame_pointer",
            FrameTrust::Scan => "scan",
            FrameTrust::None => "non",
        }
    }
}

/// One frame of an unwound call stack.
#[derive(Debug)]
pub struct StackFrame {
    /// The executing instruction, as an absolute virtual address.
    ///
    /// For frame zero this is an exact program counter. For every other
    /// frame it points into the call instruction in the caller, so that
    /// source lookups name the call site rather than the instruction
    /// control would return to, which may belong to the next line (or,
    /// after a call a compiler knows cannot return, to a different
    /// function altogether).
    pub instruction: u64,
    /// The module containing `instruction`.
    pub module: Option<MinidumpModule>,
    /// The enclosing function's name, when symbols cover `instruction`.
    pub function_name: Option<String>,
    /// The enclosing function's start address.
    pub function_base: Option<u64>,
    /// Bytes of parameters the function's callers push; STACK WIN
    /// unwinding consumes this, it is otherwise uninteresting.
    pub parameter_size: Option<u32>,
    /// The source file, when line records cover `instruction`.
    pub source_file_name: Option<String>,
    /// The 1-based source line.
    pub source_line: Option<u32>,
    /// The address at which the source line starts.
    pub source_line_base: Option<u64>,
    /// The STACK WIN unwind record covering `instruction`, if the
    /// module's symbols carry one.
    pub frame_info: Option<StackInfoWin>,
    /// How the walker arrived at this frame.
    pub trust: FrameTrust,
    /// Register state for this frame.
    pub context: MinidumpContext,
}

impl StackFrame {
    /// Start a frame from a CPU context, with no symbol information yet.
    pub fn from_context(context: MinidumpContext, trust: FrameTrust) -> StackFrame {
        StackFrame {
            instruction: context.get_instruction_pointer(),
            module: None,
            function_name: None,
            function_base: None,
            parameter_size: None,
            source_file_name: None,
            source_line: None,
            source_line_base: None,
            frame_info: None,
            trust,
            context,
        }
    }

    /// A one-line location for this frame: module, then function, then
    /// source position, as far as symbols allow.
    fn describe(&self) -> String {
        let module = match self.module {
            Some(ref module) => module,
            None => return format!("{:#x}", self.instruction),
        };
        let mut out = String::from(leaf(&module.code_file()));
        match (&self.function_name, self.function_base) {
            (&Some(ref function), Some(function_base)) => {
                out.push('!');
                out.push_str(function);
                match (&self.source_file_name, self.source_line, self.source_line_base) {
                    (&Some(ref file), Some(line), Some(line_base)) => {
                        out.push_str(&format!(
                            " [{} : {} + {:#x}]",
                            leaf(file),
                            line,
                            self.instruction - line_base
                        ));
                    }
                    _ => out.push_str(&format!(" + {:#x}", self.instruction - function_base)),
                }
            }
            _ => out.push_str(&format!(" + {:#x}", self.instruction - module.base_address())),
        }
        out
    }
}

impl FrameSymbolizer for StackFrame {
    fn get_instruction(&self) -> u64 {
        self.instruction
    }
    fn set_function(&mut self, name: &str, base: u64, parameter_size: u32) {
        self.function_name = Some(String::from(name));
        self.function_base = Some(base);
        self.parameter_size = Some(parameter_size);
    }
    fn set_source_file(&mut self, file: &str, line: u32, base: u64) {
        self.source_file_name = Some(String::from(file));
        self.source_line = Some(line);
        self.source_line_base = Some(base);
    }
}

/// Why a call stack contains as much (or as little) as it does.
#[derive(Debug, PartialEq)]
pub enum CallStackInfo {
    /// The walk ran to completion.
    Ok,
    /// There was no CPU context to seed frame zero with.
    MissingContext,
    /// There was no stack memory, so nothing past frame zero.
    MissingMemory,
    /// No walker exists for this CPU.
    UnsupportedCpu,
    /// The thread that wrote the dump was skipped.
    DumpThreadSkipped,
}

/// The unwound stack of one thread, innermost frame first.
pub struct CallStack {
    /// The frames, from the failing (or sampled) instruction outward
    /// toward the thread entry point.
    pub frames: Vec<StackFrame>,
    /// How completely the walk covered the thread.
    pub info: CallStackInfo,
}

impl CallStack {
    /// Write this stack in the text stackwalk format: one numbered
    /// location line per frame, its valid registers, and how the frame
    /// was found.
    pub fn print<T: Write>(&self, f: &mut T) -> io::Result<()> {
        if self.frames.is_empty() {
            writeln!(f, "<no frames>")?;
        }
        for (index, frame) in self.frames.iter().enumerate() {
            writeln!(f, "{:2}  {}", index, frame.describe())?;
            write_registers(f, &frame.context)?;
            writeln!(f, "    Found by: {}", frame.trust.description())?;
        }
        Ok(())
    }
}

/// The state of a process, reconstructed from a minidump.
pub struct ProcessState {
    /// The id of the process, when the dump recorded one.
    pub process_id: Option<u32>,
    /// When the dump was written.
    pub time: DateTime<Utc>,
    /// When the process started, when the dump recorded it.
    pub process_create_time: Option<DateTime<Utc>>,
    /// What kind of exception ended the process, if one did.
    pub crash_reason: Option<CrashReason>,
    /// The address the exception implicates: the faulting data address
    /// for access errors, the faulting instruction for code errors.
    pub crash_address: Option<u64>,
    /// Index into `threads` of the thread that raised the exception.
    /// `None` when the dump carries no exception stream.
    pub requesting_thread: Option<usize>,
    /// One unwound stack per thread, in the dump's thread order.
    pub threads: Vec<CallStack>,
    /// The system the dump was written on.
    pub system_info: SystemInfo,
    /// The modules that were mapped into the process.
    pub modules: MinidumpModuleList,
}

/// The path's final component, splitting on either separator style.
fn leaf(path: &str) -> &str {
    path.rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(path)
}

/// Write the valid registers of `context`, four to a line.
fn write_registers<T: Write>(f: &mut T, context: &MinidumpContext) -> io::Result<()> {
    let mut on_line = 0;
    for name in context.register_names() {
        if !context.is_register_valid(name) {
            continue;
        }
        write!(f, " {: >5} = {}", name, context.format_register(name))?;
        on_line += 1;
        if on_line == 4 {
            writeln!(f)?;
            on_line = 0;
        }
    }
    if on_line > 0 {
        writeln!(f)?;
    }
    Ok(())
}

/// The valid registers of `context` as a JSON object of hex strings.
fn registers_json(context: &MinidumpContext) -> Value {
    let mut map = serde_json::Map::new();
    for name in context.register_names() {
        if context.is_register_valid(name) {
            map.insert((*name).to_string(), json!(context.format_register(name)));
        }
    }
    Value::Object(map)
}

impl ProcessState {
    /// `true` if the dump was written because the process crashed.
    pub fn crashed(&self) -> bool {
        self.crash_reason.is_some() && self.crash_address.is_some()
    }

    /// Write the whole process state in the text stackwalk format:
    /// system summary, crash summary, the crashing thread, the remaining
    /// threads, and the module table.
    pub fn print<T: Write>(&self, f: &mut T) -> io::Result<()> {
        self.write_system(f)?;
        self.write_crash(f)?;
        self.write_threads(f)?;
        self.write_modules(f)
    }

    fn write_system<T: Write>(&self, f: &mut T) -> io::Result<()> {
        writeln!(f, "Operating system: {}", self.system_info.os.long_name())?;
        if let Some(ref version) = self.system_info.os_version {
            writeln!(f, "                  {}", version)?;
        }
        writeln!(f, "CPU: {}", self.system_info.cpu)?;
        if let Some(ref cpu_info) = self.system_info.cpu_info {
            writeln!(f, "     {}", cpu_info)?;
        }
        let plural = if self.system_info.cpu_count == 1 { "" } else { "s" };
        writeln!(f, "     {} CPU{}", self.system_info.cpu_count, plural)?;
        writeln!(f)
    }

    fn write_crash<T: Write>(&self, f: &mut T) -> io::Result<()> {
        match (self.crash_reason, self.crash_address) {
            (Some(reason), Some(address)) => {
                writeln!(f, "Crash reason:  {}", reason)?;
                writeln!(f, "Crash address: {:#x}", address)?;
            }
            _ => writeln!(f, "No crash")?,
        }
        match self.process_create_time {
            Some(created) => {
                let uptime = self.time - created;
                writeln!(f, "Process uptime: {} seconds", uptime.num_seconds())?;
            }
            None => writeln!(f, "Process uptime: not available")?,
        }
        writeln!(f)
    }

    fn write_threads<T: Write>(&self, f: &mut T) -> io::Result<()> {
        // The requesting thread leads; the rest follow in dump order.
        if let Some(index) = self.requesting_thread {
            let role = if self.crashed() {
                "crashed"
            } else {
                "requested dump, did not crash"
            };
            writeln!(f, "Thread {} ({})", index, role)?;
            self.threads[index].print(f)?;
            writeln!(f)?;
        }
        for (index, stack) in self.threads.iter().enumerate() {
            if Some(index) == self.requesting_thread
                || stack.info == CallStackInfo::DumpThreadSkipped
            {
                continue;
            }
            writeln!(f, "Thread {}", index)?;
            stack.print(f)?;
        }
        Ok(())
    }

    fn write_modules<T: Write>(&self, f: &mut T) -> io::Result<()> {
        writeln!(f)?;
        writeln!(f, "Loaded modules:")?;
        let main_base = self.modules.main_module().map(|module| module.base_address());
        for module in self.modules.by_addr() {
            let marker = if main_base == Some(module.base_address()) {
                "  (main)"
            } else {
                ""
            };
            writeln!(
                f,
                "{:#010x} - {:#010x}  {}  {}{}",
                module.base_address(),
                module.base_address() + module.size() - 1,
                leaf(&module.code_file()),
                module.version().unwrap_or(Cow::Borrowed("???")),
                marker
            )?;
        }
        Ok(())
    }

    /// Write the process state as JSON in a schema compatible with
    /// mozilla's Socorro crash-reporting servers.
    pub fn print_json<T: Write>(&self, f: &mut T, pretty: bool) -> Result<(), serde_json::Error> {
        let system = &self.system_info;
        let mut output = json!({
            "status": "OK",
            "system_info": {
                // Linux | Windows NT | Mac OS X
                "os": system.os.long_name(),
                "os_ver": system.os_version,
                // x86 | ppc | ...
                "cpu_arch": system.cpu.to_string(),
                "cpu_info": system.cpu_info,
                "cpu_count": system.cpu_count,
            },
            "crash_info": {
                "type": self.crash_reason.map(|reason| reason.to_string()),
                "address": self.crash_address.map(|address| self.json_hex(address)),
                // thread index | null
                "crashing_thread": self.requesting_thread,
            },
            // modules are stored main module first
            "main_module": 0,
            "modules": self.modules.iter()
                .map(|module| self.module_json(module))
                .collect::<Vec<_>>(),
            "pid": self.process_id,
            "thread_count": self.threads.len(),
            "threads": self.threads.iter()
                .map(|stack| self.thread_json(stack))
                .collect::<Vec<_>>(),
        });

        // The requesting thread appears a second time at top level,
        // carrying two things the flat list leaves out: its index and the
        // registers of its innermost frame.
        if let Some(index) = self.requesting_thread {
            let stack = &self.threads[index];
            let mut thread = self.thread_json(stack);
            if let Some(object) = thread.as_object_mut() {
                object.insert("thread_index".to_string(), json!(index));
            }
            if let Some(frame) = stack.frames.first() {
                let frame_zero = thread
                    .get_mut("frames")
                    .and_then(|frames| frames.get_mut(0))
                    .and_then(Value::as_object_mut);
                if let Some(frame_zero) = frame_zero {
                    frame_zero.insert("registers".to_string(), registers_json(&frame.context));
                }
            }
            if let Some(object) = output.as_object_mut() {
                object.insert("crashing_thread".to_string(), thread);
            }
        }

        if pretty {
            serde_json::to_writer_pretty(f, &output)
        } else {
            serde_json::to_writer(f, &output)
        }
    }

    fn module_json(&self, module: &MinidumpModule) -> Value {
        json!({
            "base_addr": self.json_hex(module.raw.base_of_image),
            // filename | empty string
            "debug_file": module.debug_file().map(|file| leaf(&file).to_string()).unwrap_or_default(),
            // [[:xdigit:]]{33} | empty string
            "debug_id": module.debug_identifier().map(Cow::into_owned).unwrap_or_default(),
            "end_addr": self.json_hex(module.raw.base_of_image + module.raw.size_of_image as u64),
            "filename": module.name,
            "code_id": module.code_identifier(),
            "version": module.version(),
        })
    }

    fn thread_json(&self, stack: &CallStack) -> Value {
        json!({
            "frame_count": stack.frames.len(),
            "frames": stack.frames.iter().enumerate()
                .map(|(index, frame)| self.frame_json(index, frame))
                .collect::<Vec<_>>(),
        })
    }

    fn frame_json(&self, index: usize, frame: &StackFrame) -> Value {
        json!({
            "frame": index,
            "module": frame.module.as_ref().map(|module| leaf(&module.name)),
            "function": frame.function_name,
            "file": frame.source_file_name,
            "line": frame.source_line,
            "offset": self.json_hex(frame.instruction),
            "module_offset": frame.module.as_ref()
                .map(|module| self.json_hex(frame.instruction - module.raw.base_of_image)),
            "function_offset": frame.function_base
                .map(|base| self.json_hex(frame.instruction - base)),
            "missing_symbols": frame.function_name.is_none(),
            // none | scan | cfi_scan | frame_pointer | cfi | context | prewalked
            "trust": frame.trust.json_name(),
        })
    }

    /// Addresses render zero-padded at the natural width of the dump's
    /// CPU.
    fn json_hex(&self, value: u64) -> String {
        match self.system_info.cpu {
            Cpu::X86 | Cpu::Ppc => format!("0x{:08x}", value),
            Cpu::Unknown(_) => format!("0x{:016x}", value),
        }
    }
}
