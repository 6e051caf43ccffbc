// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Turn a minidump into a `ProcessState`.

use chrono::prelude::*;
use failure::Fail;
use log::warn;
use std::path::Path;

use crate::process_state::ProcessState;
use crate::stackwalker::walk_stack;
use crate::system_info::SystemInfo;
use airbag::{Minidump, Readable};
use airbag_symbols::Symbolizer;

/// An error encountered during minidump processing.
#[derive(Debug, Fail, PartialEq)]
pub enum ProcessError {
    #[fail(display = "failed to read minidump")]
    MinidumpReadError(#[fail(cause)] airbag::Error),
    #[fail(display = "no thread list present")]
    MissingThreadList,
    #[fail(display = "no system info present")]
    MissingSystemInfo,
}

impl From<airbag::Error> for ProcessError {
    fn from(err: airbag::Error) -> ProcessError {
        ProcessError::MinidumpReadError(err)
    }
}

/// Process `dump` with the symbols from `symbolizer`.
///
/// Every thread's stack is walked. If the dump carries an exception, the
/// exception's context stands in for the faulting thread's own context,
/// which reflects the exception handler rather than the crash.
pub fn process_minidump<T: Readable>(
    dump: &mut Minidump<T>,
    symbolizer: &Symbolizer,
) -> Result<ProcessState, ProcessError> {
    let time = Utc.timestamp(dump.header.time_date_stamp as i64, 0);

    let system_raw = dump
        .get_system_info()
        .map_err(|_| ProcessError::MissingSystemInfo)?;
    let system_info = SystemInfo {
        os: system_raw.os(),
        os_version: Some(system_raw.os_version()),
        cpu: system_raw.cpu(),
        cpu_info: system_raw.cpu_info(),
        cpu_count: system_raw.raw.number_of_processors as usize,
    };

    let exception = dump.get_exception().ok().cloned();
    let (crash_reason, crash_address, crash_thread_id, exception_context) = match exception {
        Some(exception) => (
            Some(exception.get_crash_reason()),
            Some(exception.get_crash_address()),
            Some(exception.thread_id),
            exception.context,
        ),
        None => (None, None, None, None),
    };

    let misc_info = dump.get_misc_info().ok().cloned();
    let (process_id, process_create_time) = match misc_info {
        Some(misc_info) => (misc_info.process_id(), misc_info.process_create_time()),
        None => (None, None),
    };

    let modules = match dump.get_module_list() {
        Ok(module_list) => module_list.clone(),
        Err(e) => {
            // Frames will go unannotated, but the walk can still happen.
            warn!("no usable module list: {}", e);
            Default::default()
        }
    };
    let thread_list = dump
        .get_thread_list()
        .map_err(|_| ProcessError::MissingThreadList)?
        .clone();

    let mut threads = Vec::with_capacity(thread_list.threads.len());
    let mut requesting_thread = None;
    for (index, thread) in thread_list.threads.iter().enumerate() {
        // If this thread raised the exception, use the exception context
        // in place of the thread's own.
        let context = if crash_thread_id == Some(thread.raw.thread_id) {
            requesting_thread = Some(index);
            exception_context.as_ref().or(thread.context.as_ref())
        } else {
            thread.context.as_ref()
        };
        let stack = walk_stack(context, Some(&thread.stack), &modules, symbolizer);
        threads.push(stack);
    }

    Ok(ProcessState {
        process_id,
        time,
        process_create_time,
        crash_reason,
        crash_address,
        requesting_thread,
        threads,
        system_info,
        modules,
    })
}

/// Read the minidump at `path` and process it.
pub fn process_path<P: AsRef<Path>>(
    path: P,
    symbolizer: &Symbolizer,
) -> Result<ProcessState, ProcessError> {
    let mut dump = Minidump::read_path(path)?;
    process_minidump(&mut dump, symbolizer)
}
