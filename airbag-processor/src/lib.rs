// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! A library for producing stack traces and other useful information from
//! minidump files.
//!
//! Use the [`airbag`](../airbag/index.html) crate to parse a minidump
//! file, then the [`process_minidump`] function to produce stack traces.
//! If a [`Symbolizer`](../airbag_symbols/struct.Symbolizer.html) with
//! symbol files is provided, the stack traces will include function and
//! source line information.
//!
//! [`process_minidump`]: fn.process_minidump.html

mod postfix_evaluator;
mod process_state;
mod processor;
mod stackwalker;
mod system_info;

pub use crate::postfix_evaluator::*;
pub use crate::process_state::*;
pub use crate::processor::*;
pub use crate::stackwalker::*;
pub use crate::system_info::*;
