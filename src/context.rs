// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! CPU register state from a minidump.

use scroll::Pread;
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::io::prelude::*;
use std::mem;

use crate::format as md;
use crate::format::ContextFlagsCpu;
use crate::iostuff::write_bytes;

/// The architecture-specific payload of a context record.
#[derive(Debug, Clone)]
pub enum MinidumpRawContext {
    X86(md::MDRawContextX86),
    Ppc(md::MDRawContextPPC),
}

/// Access to a CPU context's registers by name.
///
/// The stack walker manipulates registers purely through the names that
/// appear in symbol files ("eip", "esp", ...), so each architecture maps
/// those names onto its raw context fields.
pub trait CpuContext {
    /// The width of this CPU's general-purpose registers.
    type Register: fmt::LowerHex;

    /// Every register name this context understands, in display order.
    fn register_names(&self) -> &'static [&'static str];

    /// The value of the register called `name`, or `None` if this CPU has
    /// no such register.
    fn register(&self, name: &str) -> Option<Self::Register>;

    /// Store `value` into the register called `name`. Fails for the same
    /// names [`register`](Self::register) does.
    fn set_register(&mut self, name: &str, value: Self::Register) -> Option<()>;

    /// The `'static` spelling of `name`, usable in a validity set.
    fn canonical_register_name(&self, name: &str) -> Option<&'static str> {
        self.register_names()
            .iter()
            .find(|&&known| known == name)
            .copied()
    }

    /// `name`'s value as hex, zero-padded to the register width.
    fn format_register(&self, name: &str) -> String {
        match self.register(name) {
            Some(value) => format!("0x{:01$x}", value, mem::size_of::<Self::Register>() * 2),
            None => String::from("???"),
        }
    }

    /// The name of the stack pointer register.
    fn stack_pointer_name(&self) -> &'static str;

    /// The name of the instruction pointer register.
    fn instruction_pointer_name(&self) -> &'static str;
}

/// The x86 registers the walker and the output formats use, in display
/// order. The value and slot tables in the `CpuContext` impl are kept in
/// this same order.
static X86_REGS: [&str; 10] = [
    "eip", "esp", "ebp", "ebx", "esi", "edi", "eax", "ecx", "edx", "efl",
];

impl CpuContext for md::MDRawContextX86 {
    type Register = u32;

    fn register_names(&self) -> &'static [&'static str] {
        &X86_REGS[..]
    }

    fn register(&self, name: &str) -> Option<u32> {
        let values = [
            self.eip, self.esp, self.ebp, self.ebx, self.esi, self.edi, self.eax, self.ecx,
            self.edx, self.eflags,
        ];
        let index = X86_REGS.iter().position(|&known| known == name)?;
        Some(values[index])
    }

    fn set_register(&mut self, name: &str, value: u32) -> Option<()> {
        let slots: [&mut u32; 10] = [
            &mut self.eip,
            &mut self.esp,
            &mut self.ebp,
            &mut self.ebx,
            &mut self.esi,
            &mut self.edi,
            &mut self.eax,
            &mut self.ecx,
            &mut self.edx,
            &mut self.eflags,
        ];
        let index = X86_REGS.iter().position(|&known| known == name)?;
        *slots[index] = value;
        Some(())
    }

    fn stack_pointer_name(&self) -> &'static str {
        "esp"
    }

    fn instruction_pointer_name(&self) -> &'static str {
        "eip"
    }
}

/// The ppc registers this crate displays, in display order.
static PPC_REGS: [&str; 5] = ["srr0", "srr1", "r1", "lr", "ctr"];

impl CpuContext for md::MDRawContextPPC {
    type Register = u32;

    fn register_names(&self) -> &'static [&'static str] {
        &PPC_REGS[..]
    }

    fn register(&self, name: &str) -> Option<u32> {
        let sp = md::PpcRegisterNumbers::StackPointer as usize;
        let values = [self.srr0, self.srr1, self.gpr[sp], self.lr, self.ctr];
        let index = PPC_REGS.iter().position(|&known| known == name)?;
        Some(values[index])
    }

    fn set_register(&mut self, name: &str, value: u32) -> Option<()> {
        let sp = md::PpcRegisterNumbers::StackPointer as usize;
        let slots: [&mut u32; 5] = [
            &mut self.srr0,
            &mut self.srr1,
            &mut self.gpr[sp],
            &mut self.lr,
            &mut self.ctr,
        ];
        let index = PPC_REGS.iter().position(|&known| known == name)?;
        *slots[index] = value;
        Some(())
    }

    fn stack_pointer_name(&self) -> &'static str {
        "r1"
    }

    fn instruction_pointer_name(&self) -> &'static str {
        "srr0"
    }
}

/// Which of a context's registers hold meaningful values.
///
/// Contexts read straight out of a dump have every register. Contexts
/// built by unwinding carry only whatever the unwind strategy recovered.
#[derive(Clone, Debug, PartialEq)]
pub enum MinidumpContextValidity {
    /// Every register is meaningful.
    All,
    /// Only the named registers are meaningful.
    Some(HashSet<&'static str>),
}

/// A CPU context plus a record of which of its registers are meaningful.
///
/// Each thread carries one of these, and the exception stream carries its
/// own; for the faulting thread the exception's context is the one that
/// reflects the crash point.
#[derive(Debug, Clone)]
pub struct MinidumpContext {
    /// The raw register state.
    pub raw: MinidumpRawContext,
    /// Which registers in `raw` can be relied on.
    pub valid: MinidumpContextValidity,
}

/// Reasons a context record can fail to parse.
#[derive(Debug, PartialEq)]
pub enum ContextError {
    /// The bytes were too short or otherwise unreadable.
    ReadFailure,
    /// The record is for a CPU this crate doesn't handle.
    UnknownCpu,
}

impl MinidumpContext {
    /// Wrap a raw context, marking every register valid.
    pub fn from_raw(raw: MinidumpRawContext) -> MinidumpContext {
        MinidumpContext {
            raw,
            valid: MinidumpContextValidity::All,
        }
    }

    /// Parse a context record from `bytes`.
    ///
    /// The CPU bits of the leading `context_flags` word pick the layout,
    /// and `bytes` must hold exactly that layout's size.
    pub fn read(bytes: &[u8], endian: scroll::Endian) -> Result<MinidumpContext, ContextError> {
        let flags: u32 = bytes
            .pread_with(0, endian)
            .or(Err(ContextError::ReadFailure))?;
        let raw = match ContextFlagsCpu::from_flags(flags) {
            ContextFlagsCpu::CONTEXT_X86 if bytes.len() == md::MD_CONTEXT_X86_SIZE => {
                let ctx: md::MDRawContextX86 = bytes
                    .pread_with(0, endian)
                    .or(Err(ContextError::ReadFailure))?;
                MinidumpRawContext::X86(ctx)
            }
            ContextFlagsCpu::CONTEXT_PPC if bytes.len() == md::MD_CONTEXT_PPC_SIZE => {
                let ctx: md::MDRawContextPPC = bytes
                    .pread_with(0, endian)
                    .or(Err(ContextError::ReadFailure))?;
                MinidumpRawContext::Ppc(ctx)
            }
            ContextFlagsCpu::CONTEXT_X86 | ContextFlagsCpu::CONTEXT_PPC => {
                // Right CPU, wrong size.
                return Err(ContextError::ReadFailure);
            }
            _ => return Err(ContextError::UnknownCpu),
        };
        Ok(MinidumpContext::from_raw(raw))
    }

    pub fn get_instruction_pointer(&self) -> u64 {
        match self.raw {
            MinidumpRawContext::X86(ref ctx) => ctx.eip as u64,
            MinidumpRawContext::Ppc(ref ctx) => ctx.srr0 as u64,
        }
    }

    pub fn get_stack_pointer(&self) -> u64 {
        match self.raw {
            MinidumpRawContext::X86(ref ctx) => ctx.esp as u64,
            MinidumpRawContext::Ppc(ref ctx) => {
                ctx.gpr[md::PpcRegisterNumbers::StackPointer as usize] as u64
            }
        }
    }

    /// Every register name of the underlying CPU, in display order.
    pub fn register_names(&self) -> &'static [&'static str] {
        match self.raw {
            MinidumpRawContext::X86(ref ctx) => ctx.register_names(),
            MinidumpRawContext::Ppc(ref ctx) => ctx.register_names(),
        }
    }

    /// Whether `name` holds a meaningful value in this context.
    pub fn is_register_valid(&self, name: &str) -> bool {
        match self.valid {
            MinidumpContextValidity::All => true,
            MinidumpContextValidity::Some(ref which) => which.contains(name),
        }
    }

    /// `name`'s value as hex at the register's natural width.
    pub fn format_register(&self, name: &str) -> String {
        match self.raw {
            MinidumpRawContext::X86(ref ctx) => ctx.format_register(name),
            MinidumpRawContext::Ppc(ref ctx) => ctx.format_register(name),
        }
    }

    /// Dump every field of the raw context to `f`, one per line.
    pub fn print<T: Write>(&self, f: &mut T) -> io::Result<()> {
        match self.raw {
            MinidumpRawContext::X86(ref raw) => {
                writeln!(f, "MDRawContextX86")?;
                let words = [
                    ("context_flags", raw.context_flags),
                    ("dr0", raw.dr0),
                    ("dr1", raw.dr1),
                    ("dr2", raw.dr2),
                    ("dr3", raw.dr3),
                    ("dr6", raw.dr6),
                    ("dr7", raw.dr7),
                    ("float_save.control_word", raw.float_save.control_word),
                    ("float_save.status_word", raw.float_save.status_word),
                    ("float_save.tag_word", raw.float_save.tag_word),
                    ("float_save.error_offset", raw.float_save.error_offset),
                    ("float_save.error_selector", raw.float_save.error_selector),
                    ("float_save.data_offset", raw.float_save.data_offset),
                    ("float_save.data_selector", raw.float_save.data_selector),
                    ("float_save.cr0_npx_state", raw.float_save.cr0_npx_state),
                    ("gs", raw.gs),
                    ("fs", raw.fs),
                    ("es", raw.es),
                    ("ds", raw.ds),
                    ("edi", raw.edi),
                    ("esi", raw.esi),
                    ("ebx", raw.ebx),
                    ("edx", raw.edx),
                    ("ecx", raw.ecx),
                    ("eax", raw.eax),
                    ("ebp", raw.ebp),
                    ("eip", raw.eip),
                    ("cs", raw.cs),
                    ("eflags", raw.eflags),
                    ("esp", raw.esp),
                    ("ss", raw.ss),
                ];
                for &(name, value) in words.iter() {
                    writeln!(f, "  {:<26} = {:#x}", name, value)?;
                }
                write!(f, "  float_save.register_area   = 0x")?;
                write_bytes(f, &raw.float_save.register_area)?;
                writeln!(f)?;
                write!(f, "  extended_registers         = 0x")?;
                write_bytes(f, &raw.extended_registers)?;
                writeln!(f)?;
                writeln!(f)?;
            }
            MinidumpRawContext::Ppc(ref raw) => {
                writeln!(f, "MDRawContextPPC")?;
                let words = [
                    ("context_flags", raw.context_flags),
                    ("srr0", raw.srr0),
                    ("srr1", raw.srr1),
                    ("cr", raw.cr),
                    ("xer", raw.xer),
                    ("lr", raw.lr),
                    ("ctr", raw.ctr),
                    ("mq", raw.mq),
                    ("vrsave", raw.vrsave),
                    ("float_save.fpscr", raw.float_save.fpscr),
                    ("vector_save.save_vrvalid", raw.vector_save.save_vrvalid),
                ];
                for &(name, value) in words.iter() {
                    writeln!(f, "  {:<24} = {:#x}", name, value)?;
                }
                for (index, gpr) in raw.gpr.iter().enumerate() {
                    writeln!(f, "  gpr[{:2}]                  = {:#x}", index, gpr)?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scroll::Endian;

    fn put_u32(bytes: &mut [u8], endian: Endian, offset: usize, value: u32) {
        let raw = match endian {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        };
        bytes[offset..offset + 4].copy_from_slice(&raw);
    }

    fn x86_context_bytes(endian: Endian) -> Vec<u8> {
        let mut bytes = vec![0u8; md::MD_CONTEXT_X86_SIZE];
        put_u32(&mut bytes, endian, 0, 0x0001_0007); // context_flags
        put_u32(&mut bytes, endian, 180, 0x1020_3040); // ebp
        put_u32(&mut bytes, endian, 184, 0xf00d_f00d); // eip
        put_u32(&mut bytes, endian, 196, 0xdead_beef); // esp
        bytes
    }

    #[test]
    fn test_read_x86_context() {
        for &endian in &[Endian::Little, Endian::Big] {
            let bytes = x86_context_bytes(endian);
            let context = MinidumpContext::read(&bytes, endian).unwrap();
            assert_eq!(context.get_instruction_pointer(), 0xf00d_f00d);
            assert_eq!(context.get_stack_pointer(), 0xdead_beef);
            match context.raw {
                MinidumpRawContext::X86(ref raw) => assert_eq!(raw.ebp, 0x1020_3040),
                _ => panic!("wrong context type"),
            }
        }
    }

    #[test]
    fn test_register_access_by_name() {
        let bytes = x86_context_bytes(Endian::Little);
        let mut context = MinidumpContext::read(&bytes, Endian::Little).unwrap();
        match context.raw {
            MinidumpRawContext::X86(ref mut raw) => {
                assert_eq!(raw.register("ebp"), Some(0x1020_3040));
                assert_eq!(raw.register("efl"), Some(0));
                assert_eq!(raw.register("rip"), None);
                assert_eq!(raw.canonical_register_name("esp"), Some("esp"));
                assert_eq!(raw.canonical_register_name("r11"), None);
                raw.set_register("esi", 7).unwrap();
                assert_eq!(raw.register("esi"), Some(7));
                assert!(raw.set_register("rip", 1).is_none());
                assert_eq!(raw.instruction_pointer_name(), "eip");
                assert_eq!(raw.stack_pointer_name(), "esp");
            }
            _ => panic!("wrong context type"),
        }
    }

    #[test]
    fn test_register_validity() {
        let bytes = x86_context_bytes(Endian::Little);
        let mut context = MinidumpContext::read(&bytes, Endian::Little).unwrap();
        assert!(context.is_register_valid("eax"));
        let mut which = HashSet::new();
        which.insert("eip");
        context.valid = MinidumpContextValidity::Some(which);
        assert!(context.is_register_valid("eip"));
        assert!(!context.is_register_valid("eax"));
    }

    #[test]
    fn test_read_ppc_context() {
        let mut bytes = vec![0u8; md::MD_CONTEXT_PPC_SIZE];
        put_u32(&mut bytes, Endian::Little, 0, 0x2000_0001); // context_flags
        put_u32(&mut bytes, Endian::Little, 4, 0x0ff1_ce00); // srr0
        put_u32(&mut bytes, Endian::Little, 16, 0xb0cc_0000); // gpr[1]
        let context = MinidumpContext::read(&bytes, Endian::Little).unwrap();
        assert_eq!(context.get_instruction_pointer(), 0x0ff1_ce00);
        assert_eq!(context.get_stack_pointer(), 0xb0cc_0000);
    }

    #[test]
    fn test_read_x86_context_wrong_size() {
        let mut bytes = x86_context_bytes(Endian::Little);
        bytes.push(0);
        assert_eq!(
            MinidumpContext::read(&bytes, Endian::Little).err(),
            Some(ContextError::ReadFailure)
        );
    }

    #[test]
    fn test_read_unknown_context() {
        // ARM context flags, which this processor does not handle.
        let bytes = [0u8, 0, 0, 0x40];
        assert_eq!(
            MinidumpContext::read(&bytes, Endian::Little).err(),
            Some(ContextError::UnknownCpu)
        );
    }
}
