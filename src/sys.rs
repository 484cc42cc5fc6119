use std::ffi::CStr;

use libc::{c_int, strerror};
use thiserror::Error;

/// Failure of an operating system call. Always fatal for the shell.
#[derive(Debug, PartialEq, Eq, Error)]
#[error("{call} error: {}", describe(*errno))]
pub struct SysError {
    pub call: &'static str,
    pub errno: c_int,
}

impl SysError {
    /// Captures the current `errno` for a failed `call`.
    pub(crate) fn last(call: &'static str) -> Self {
        SysError {
            call,
            errno: errno(),
        }
    }
}

pub(crate) fn errno() -> c_int {
    unsafe { *libc::__errno_location() }
}

pub(crate) fn set_errno(value: c_int) {
    unsafe { *libc::__errno_location() = value };
}

pub(crate) fn describe(errno: c_int) -> String {
    strerror_str(errno).to_owned()
}

/// Borrowed `strerror` text, usable where allocation is off limits.
pub(crate) fn strerror_str(errno: c_int) -> &'static str {
    unsafe { CStr::from_ptr(strerror(errno)) }
        .to_str()
        .unwrap_or("Unknown error")
}

/// Maps the libc `-1` convention onto `SysError`.
pub(crate) fn check(call: &'static str, ret: c_int) -> Result<c_int, SysError> {
    match ret {
        -1 => Err(SysError::last(call)),
        ret => Ok(ret),
    }
}
