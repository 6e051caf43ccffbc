// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Unwind x86 stack frames.

use std::collections::{HashMap, HashSet};

use crate::postfix_evaluator::PostfixEvaluator;
use crate::process_state::{FrameTrust, StackFrame};
use airbag::format::MDRawContextX86;
use airbag::{
    CpuContext, MemoryRegion, MinidumpContext, MinidumpContextValidity, MinidumpMemory,
    MinidumpRawContext,
};
use airbag_symbols::{StackInfoWin, WinStackThing};
use log::debug;

/// The registers seeded into a frame-unwind program's dictionary.
static PROGRAM_REGS: [&str; 6] = ["eip", "esp", "ebp", "ebx", "esi", "edi"];

/// Compute the caller of `frame` on x86.
///
/// When the frame's symbols carry a STACK WIN program string, evaluate it
/// to recover the caller's registers; otherwise fall back to the standard
/// frame-pointer convention. Returns `None`, ending the walk, if the
/// caller can't be computed, if its instruction pointer is null, or if
/// its stack pointer fails to move strictly upward.
pub fn get_caller_frame(
    frame: &StackFrame,
    stack_memory: Option<&MinidumpMemory>,
) -> Option<StackFrame> {
    let stack = stack_memory?;
    let ctx = match frame.context.raw {
        MinidumpRawContext::X86(ref ctx) => ctx,
        _ => return None,
    };
    let caller = match frame.frame_info {
        Some(ref info) => match info.program_string_or_base_pointer {
            WinStackThing::ProgramString(ref program) => {
                get_caller_by_program_string(ctx, info, program, stack)?
            }
            WinStackThing::AllocatesBasePointer(_) => get_caller_by_frame_pointer(ctx, stack)?,
        },
        None => get_caller_by_frame_pointer(ctx, stack)?,
    };
    // A null instruction pointer is the end of the stack, and a stack
    // pointer that fails to move strictly upward would walk in circles.
    if caller.context.get_instruction_pointer() == 0 {
        return None;
    }
    if caller.context.get_stack_pointer() <= frame.context.get_stack_pointer() {
        return None;
    }
    Some(caller)
}

/// The standard calling convention: the caller's %eip was pushed just
/// above the saved %ebp that the callee's %ebp points at.
fn get_caller_by_frame_pointer(
    ctx: &MDRawContextX86,
    stack: &MinidumpMemory,
) -> Option<StackFrame> {
    let ebp = ctx.ebp as u64;
    let caller_eip = stack.memory_at_address_u32(ebp + 4)?;
    let caller_ebp = stack.memory_at_address_u32(ebp)?;
    let caller_esp = ctx.ebp.wrapping_add(8);

    let mut caller_ctx = *ctx;
    caller_ctx.eip = caller_eip;
    caller_ctx.ebp = caller_ebp;
    caller_ctx.esp = caller_esp;
    let valid: HashSet<&'static str> = ["eip", "esp", "ebp"].iter().cloned().collect();
    let context = MinidumpContext {
        raw: MinidumpRawContext::X86(caller_ctx),
        valid: MinidumpContextValidity::Some(valid),
    };
    Some(StackFrame::from_context(context, FrameTrust::FramePointer))
}

/// Recover the caller's registers by evaluating the frame's unwind
/// program against the current registers and the stack.
fn get_caller_by_program_string(
    ctx: &MDRawContextX86,
    info: &StackInfoWin,
    program: &str,
    stack: &MinidumpMemory,
) -> Option<StackFrame> {
    let mut dictionary = HashMap::new();
    for &name in PROGRAM_REGS.iter() {
        if let Some(value) = ctx.register(name) {
            dictionary.insert(format!("${}", name), value);
        }
    }
    dictionary.insert(".cbSavedRegs".to_string(), info.saved_register_size);
    dictionary.insert(".cbParams".to_string(), info.parameter_size);
    dictionary.insert(
        ".raSearchStart".to_string(),
        ctx.esp
            .wrapping_add(info.local_size)
            .wrapping_add(info.saved_register_size),
    );

    let mut assigned = HashSet::new();
    {
        let mut evaluator: PostfixEvaluator<u32> =
            PostfixEvaluator::new(&mut dictionary, Some(stack as &dyn MemoryRegion));
        if let Err(e) = evaluator.evaluate(program, &mut assigned) {
            debug!("STACK WIN program string failed to evaluate: {}", e);
            return None;
        }
    }

    // The program must recover at least the instruction and stack
    // pointers; any other register it assigns is propagated too.
    if !assigned.contains("$eip") || !assigned.contains("$esp") {
        return None;
    }
    let mut caller_ctx = *ctx;
    let mut valid = HashSet::new();
    for ident in assigned.iter() {
        if !ident.starts_with('$') {
            continue;
        }
        let reg = &ident[1..];
        if let Some(name) = caller_ctx.canonical_register_name(reg) {
            if let Some(&value) = dictionary.get(ident) {
                let stored = caller_ctx.set_register(name, value);
                // A register with a canonical name must have a slot;
                // otherwise `valid` would claim a register that still
                // holds the callee's value.
                debug_assert!(stored.is_some(), "no slot for register {}", name);
                valid.insert(name);
            }
        }
    }
    let context = MinidumpContext {
        raw: MinidumpRawContext::X86(caller_ctx),
        valid: MinidumpContextValidity::Some(valid),
    };
    Some(StackFrame::from_context(context, FrameTrust::CallFrameInfo))
}
