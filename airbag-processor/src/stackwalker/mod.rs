// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Unwind stack frames for a thread.

use crate::process_state::{CallStack, CallStackInfo, FrameTrust, StackFrame};
use airbag::{MinidumpContext, MinidumpMemory, MinidumpModuleList, MinidumpRawContext};
use airbag_symbols::Symbolizer;

mod x86;

/// Resolve the module and symbols for `frame`'s instruction.
fn fill_source_line_info(
    frame: &mut StackFrame,
    modules: &MinidumpModuleList,
    symbolizer: &Symbolizer,
) {
    if let Some(module) = modules.module_at_address(frame.instruction) {
        frame.module = Some(module.clone());
        symbolizer.fill_symbol(module, frame);
        frame.frame_info = symbolizer.win_frame_info(module, frame.instruction);
    }
}

fn get_caller_frame(frame: &StackFrame, stack_memory: Option<&MinidumpMemory>) -> Option<StackFrame> {
    match frame.context.raw {
        MinidumpRawContext::X86(_) => x86::get_caller_frame(frame, stack_memory),
        _ => None,
    }
}

/// Unwind a thread's stack into a sequence of frames, innermost first.
///
/// Frame zero comes from `maybe_context`; each subsequent frame is
/// computed from its callee's registers and `stack_memory`, consulting
/// `symbolizer` for frame-unwind hints. The walk ends quietly when no
/// caller can be recovered: a failed stack read, a null caller
/// instruction pointer, or a stack pointer that fails to move strictly
/// upward all just stop the walk, keeping the frames collected so far.
pub fn walk_stack(
    maybe_context: Option<&MinidumpContext>,
    stack_memory: Option<&MinidumpMemory>,
    modules: &MinidumpModuleList,
    symbolizer: &Symbolizer,
) -> CallStack {
    // Begin with the context frame, and keep getting callers until there
    // are no more.
    let mut frames = vec![];
    let mut info = CallStackInfo::Ok;
    if let Some(context) = maybe_context {
        let supported = match context.raw {
            MinidumpRawContext::X86(_) => true,
            _ => false,
        };
        if !supported {
            info = CallStackInfo::UnsupportedCpu;
        } else if stack_memory.is_none() {
            info = CallStackInfo::MissingMemory;
        }
        let mut maybe_frame = Some(StackFrame::from_context(
            context.clone(),
            FrameTrust::Context,
        ));
        while let Some(mut frame) = maybe_frame {
            fill_source_line_info(&mut frame, modules, symbolizer);
            let next = if supported {
                get_caller_frame(&frame, stack_memory)
            } else {
                None
            };
            frames.push(frame);
            maybe_frame = next;
        }
    } else {
        info = CallStackInfo::MissingContext;
    }
    CallStack { frames, info }
}
