//! Two-stage pipes: `left | right`.
//!
//! The left stage runs to completion before the right stage is started,
//! so its output has to fit into the pipe buffer. Neither stage is
//! recorded in the job table; an interrupt reaches the stage being
//! waited on.

use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::atomic::Ordering;

use libc::{c_int, pid_t};
use thiserror::Error;
use tracing::debug;

use crate::execution::{spawn, ChildIo, ExecPlan, PlanError};
use crate::parser;
use crate::sig::{SigSet, SignalGuard, WaitStatus, PIPE_STAGE};
use crate::sys::{check, errno, SysError};

pub const PIPE: char = '|';

#[derive(Debug, PartialEq, Eq, Error)]
pub enum PipeError {
    #[error("syntax error: expected `command | command`")]
    NoPipe,
    #[error("syntax error: missing command before `|`")]
    MissingLeft,
    #[error("syntax error: missing command after `|`")]
    MissingRight,
    #[error("only a single `|` is supported")]
    TooManyStages,
    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// Splits at the first pipe character.
pub fn split_pipe(line: &str) -> Result<(&str, &str), PipeError> {
    let (left, right) = line.split_once(PIPE).ok_or(PipeError::NoPipe)?;
    if left.trim().is_empty() {
        return Err(PipeError::MissingLeft);
    }
    if right.contains(PIPE) {
        return Err(PipeError::TooManyStages);
    }
    if right.trim().is_empty() {
        return Err(PipeError::MissingRight);
    }
    Ok((left, right))
}

fn plan_stage(segment: &str) -> Result<ExecPlan, PipeError> {
    let parsed = parser::parse(segment);
    Ok(ExecPlan::new(&parsed.argv)?)
}

/// Runs `line` as a pipe. User errors are reported and swallowed; only OS
/// failures are returned. An interrupted left stage cancels the right one.
pub fn run_pipe(line: &str) -> Result<(), SysError> {
    let plans = split_pipe(line).and_then(|(left, right)| Ok((plan_stage(left)?, plan_stage(right)?)));
    let (left, right) = match plans {
        Ok(plans) => plans,
        Err(err) => {
            println!("{}", err);
            return Ok(());
        }
    };

    // Keep the reaper away from both stages; they are waited for here.
    let _guard = SignalGuard::block(&SigSet::of(&[libc::SIGCHLD]))?;

    let (read_end, write_end) = pipe()?;
    let status = run_stage(
        &left,
        ChildIo {
            stdin: None,
            stdout: Some(write_end.as_raw_fd()),
            close: Some(read_end.as_raw_fd()),
        },
        write_end,
    )?;
    report_failure(left.name(), status);
    if let WaitStatus::Signaled(_) = status {
        return Ok(());
    }

    let status = run_stage(
        &right,
        ChildIo {
            stdin: Some(read_end.as_raw_fd()),
            stdout: None,
            close: None,
        },
        read_end,
    )?;
    report_failure(right.name(), status);
    Ok(())
}

/// Forks one stage, drops the parent's copy of its pipe end, then waits
/// for it with the stage published as the interrupt target.
fn run_stage(plan: &ExecPlan, io: ChildIo, parent_end: OwnedFd) -> Result<WaitStatus, SysError> {
    let pid = {
        // An interrupt arriving before the stage is published stays
        // pending until the guard drops.
        let _guard = SignalGuard::block(&SigSet::job_signals())?;
        let pid = spawn(plan, io)?;
        PIPE_STAGE.store(pid, Ordering::SeqCst);
        pid
    };
    drop(parent_end);

    debug!("pipe: waiting for stage {} ({})", plan.name(), pid);
    let status = wait_child(pid);
    PIPE_STAGE.store(0, Ordering::SeqCst);
    let status = status?;
    debug!("pipe: stage {} ({}) finished with {:?}", plan.name(), pid, status);
    Ok(status)
}

fn pipe() -> Result<(OwnedFd, OwnedFd), SysError> {
    let mut fds: [c_int; 2] = [-1, -1];
    check("pipe", unsafe { libc::pipe(fds.as_mut_ptr()) })?;
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

fn wait_child(pid: pid_t) -> Result<WaitStatus, SysError> {
    let mut status: c_int = 0;
    loop {
        if unsafe { libc::waitpid(pid, &mut status, 0) } >= 0 {
            return Ok(WaitStatus::from_raw(status));
        }
        if errno() != libc::EINTR {
            return Err(SysError::last("waitpid"));
        }
    }
}

fn report_failure(name: &str, status: WaitStatus) {
    match status {
        WaitStatus::Exited(0) => {}
        WaitStatus::Exited(code) => println!("{}: exited with status {}", name, code),
        WaitStatus::Signaled(signum) => println!("{}: terminated by signal {}", name, signum),
        WaitStatus::Stopped(_) | WaitStatus::Continued => {}
    }
}
