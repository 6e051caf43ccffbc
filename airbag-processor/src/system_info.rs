// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Information about the system that produced a minidump.

use airbag::system_info::{Cpu, Os};

/// Information about the system that produced a `Minidump`.
#[derive(Debug, Clone)]
pub struct SystemInfo {
    /// The operating system that produced the minidump.
    pub os: Os,
    /// A string identifying the version of the operating system.
    ///
    /// This is `major.minor.build`, with the service pack appended when
    /// one was recorded.
    pub os_version: Option<String>,
    /// The CPU on which the dump was produced.
    pub cpu: Cpu,
    /// A string further identifying the specific CPU.
    ///
    /// For x86 this is the CPUID vendor string.
    pub cpu_info: Option<String>,
    /// The number of processors in the system.
    pub cpu_count: usize,
}
