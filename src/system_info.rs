// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Friendly views of the processor and operating system a dump came from.

use std::fmt;

use crate::format as md;
use num_traits::FromPrimitive;

/// Known CPU types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cpu {
    X86,
    Ppc,
    /// An architecture this processor does not handle, with its raw
    /// wire value.
    Unknown(u16),
}

impl Cpu {
    pub fn from_processor_architecture(arch: u16) -> Cpu {
        match md::MDCpuArchitecture::from_u16(arch) {
            Some(md::MDCpuArchitecture::X86) | Some(md::MDCpuArchitecture::X86Win64) => Cpu::X86,
            Some(md::MDCpuArchitecture::Ppc) => Cpu::Ppc,
            _ => Cpu::Unknown(arch),
        }
    }
}

impl fmt::Display for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Cpu::X86 => write!(f, "x86"),
            Cpu::Ppc => write!(f, "ppc"),
            Cpu::Unknown(arch) => write!(f, "unknown({})", arch),
        }
    }
}

/// Known operating systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Windows,
    MacOsX,
    Ios,
    Linux,
    Solaris,
    Android,
    /// A platform this processor does not handle, with its raw wire value.
    Unknown(u32),
}

impl Os {
    pub fn from_platform_id(id: u32) -> Os {
        match md::MDPlatformId::from_u32(id) {
            Some(md::MDPlatformId::Win32Nt) | Some(md::MDPlatformId::Win32Windows) => Os::Windows,
            Some(md::MDPlatformId::MacOsX) => Os::MacOsX,
            Some(md::MDPlatformId::Ios) => Os::Ios,
            Some(md::MDPlatformId::Linux) => Os::Linux,
            Some(md::MDPlatformId::Solaris) => Os::Solaris,
            Some(md::MDPlatformId::Android) => Os::Android,
            _ => Os::Unknown(id),
        }
    }

    /// The name used in stackwalk output.
    pub fn long_name(&self) -> &'static str {
        match *self {
            Os::Windows => "Windows NT",
            Os::MacOsX => "Mac OS X",
            Os::Ios => "iOS",
            Os::Linux => "Linux",
            Os::Solaris => "Solaris",
            Os::Android => "Android",
            Os::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Os::Windows => write!(f, "windows"),
            Os::MacOsX => write!(f, "mac"),
            Os::Ios => write!(f, "ios"),
            Os::Linux => write!(f, "linux"),
            Os::Solaris => write!(f, "solaris"),
            Os::Android => write!(f, "android"),
            Os::Unknown(id) => write!(f, "unknown({})", id),
        }
    }
}
