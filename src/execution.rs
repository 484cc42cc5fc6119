use std::env;
use std::ffi::{CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr::null;

use libc::{c_char, c_int, pid_t};
use thiserror::Error;
use tracing::debug;

use crate::jobs::{JobError, JobState, SharedJobs};
use crate::sig::{self, SigSet};
use crate::sys::{check, errno, strerror_str, SysError};

pub const COMMAND_NOT_FOUND: c_int = 127;

#[derive(Debug, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("{0}: argument contains a NUL byte")]
    NulByte(String),
    #[error("empty command")]
    Empty,
}

/// Everything a child needs to `exec`, built before `fork` so the child
/// does not allocate.
pub struct ExecPlan {
    name: String,
    candidates: Vec<CString>,
    // Owns the strings `argv_ptrs` points into.
    _argv: Vec<CString>,
    argv_ptrs: Vec<*const c_char>,
}

impl ExecPlan {
    pub fn new(argv: &[String]) -> Result<Self, PlanError> {
        let path = env::var_os("PATH");
        ExecPlan::with_search_path(argv, path.as_deref())
    }

    pub fn with_search_path(argv: &[String], path: Option<&OsStr>) -> Result<Self, PlanError> {
        let name = argv.first().ok_or(PlanError::Empty)?;
        let nul = || PlanError::NulByte(name.clone());

        let owned: Vec<CString> = argv
            .iter()
            .map(|arg| CString::new(arg.as_bytes()))
            .collect::<Result<_, _>>()
            .map_err(|_| nul())?;
        let mut argv_ptrs: Vec<*const c_char> = owned.iter().map(|arg| arg.as_ptr()).collect();
        argv_ptrs.push(null());

        let candidates = search_candidates(name, path)
            .into_iter()
            .map(|candidate| CString::new(candidate.as_os_str().as_bytes()))
            .collect::<Result<_, _>>()
            .map_err(|_| nul())?;

        Ok(ExecPlan {
            name: name.clone(),
            candidates,
            _argv: owned,
            argv_ptrs,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tries every candidate in order; only returns to report failure,
    /// after which the child exits.
    pub fn exec(&self) -> ! {
        for candidate in &self.candidates {
            unsafe { libc::execv(candidate.as_ptr(), self.argv_ptrs.as_ptr()) };
        }
        sio_println!("{}: command not found", self.name);
        unsafe { libc::_exit(COMMAND_NOT_FOUND) }
    }
}

/// Each search path entry joined with `name`, then `name` itself. A name
/// with a slash is only tried as given.
pub(crate) fn search_candidates(name: &str, path: Option<&OsStr>) -> Vec<std::path::PathBuf> {
    let mut candidates = Vec::new();
    if !name.contains('/') {
        if let Some(path) = path {
            candidates.extend(
                env::split_paths(path)
                    .filter(|dir| !dir.as_os_str().is_empty())
                    .map(|dir| dir.join(name)),
            );
        }
    }
    candidates.push(Path::new(name).to_path_buf());
    candidates
}

/// Standard stream rewiring for a child.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChildIo {
    pub stdin: Option<c_int>,
    pub stdout: Option<c_int>,
    /// Descriptor the child must not keep open.
    pub close: Option<c_int>,
}

fn child_fail(call: &str) -> ! {
    sio_println!("{} error: {}", call, strerror_str(errno()));
    unsafe { libc::_exit(1) }
}

/// Runs in the child after `fork`: default dispositions, own process
/// group, job signals unblocked, streams rewired, then `exec`.
pub(crate) fn become_child(plan: &ExecPlan, io: ChildIo) -> ! {
    // A signal still pending from before the fork must hit the default
    // action, not the shell's handlers.
    for signum in [libc::SIGINT, libc::SIGTSTP, libc::SIGCHLD, libc::SIGQUIT, libc::SIGPIPE] {
        sig::reset_to_default(signum);
    }
    if unsafe { libc::setpgid(0, 0) } < 0 {
        child_fail("setpgid");
    }
    if sig::unblock(&SigSet::job_signals()).is_err() {
        child_fail("sigprocmask");
    }

    if let Some(fd) = io.close {
        unsafe { libc::close(fd) };
    }
    for (fd, target) in [(io.stdin, libc::STDIN_FILENO), (io.stdout, libc::STDOUT_FILENO)] {
        if let Some(fd) = fd {
            if unsafe { libc::dup2(fd, target) } < 0 {
                child_fail("dup2");
            }
            unsafe { libc::close(fd) };
        }
    }
    plan.exec()
}

/// Forks a child that runs `plan`. Returns the child's pid in the parent.
pub(crate) fn spawn(plan: &ExecPlan, io: ChildIo) -> Result<pid_t, SysError> {
    let pid = check("fork", unsafe { libc::fork() })?;
    if pid == 0 {
        become_child(plan, io);
    }
    // Repeated here so that the group exists before the parent signals it.
    unsafe { libc::setpgid(pid, pid) };
    Ok(pid)
}

/// Launches an external program as a tracked job and either waits for it
/// (foreground) or reports it (background).
pub fn launch(jobs: &SharedJobs, argv: &[String], background: bool, cmdline: &str) -> Result<(), SysError> {
    let plan = match ExecPlan::new(argv) {
        Ok(plan) => plan,
        Err(err) => {
            println!("{}", err);
            return Ok(());
        }
    };
    let state = if background {
        JobState::Background
    } else {
        JobState::Foreground
    };

    // The job signals stay blocked from before the fork until the job is
    // in the table, so the reaper can never see an unregistered child.
    let launched = jobs.with(|table| -> Result<Option<(pid_t, u32)>, SysError> {
        if table.is_full() {
            println!("{}", JobError::Full);
            return Ok(None);
        }
        let pid = spawn(&plan, ChildIo::default())?;
        match table.add(pid, state, cmdline) {
            Ok(jid) => {
                debug!("Added job [{}] {} {}", jid, pid, cmdline);
                Ok(Some((pid, jid)))
            }
            Err(err) => {
                println!("{}", err);
                Ok(None)
            }
        }
    })??;

    let (pid, jid) = match launched {
        Some(job) => job,
        None => return Ok(()),
    };

    if background {
        println!("[{}] ({}) {}", jid, pid, cmdline);
        Ok(())
    } else {
        jobs.wait_foreground(pid)
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsStr;
    use std::path::PathBuf;

    use super::{search_candidates, ExecPlan, PlanError};

    #[test]
    fn test_candidates_walk_search_path_then_direct() {
        let candidates = search_candidates("ls", Some(OsStr::new("/usr/local/bin::/bin")));
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/usr/local/bin/ls"),
                PathBuf::from("/bin/ls"),
                PathBuf::from("ls"),
            ]
        );
    }

    #[test]
    fn test_candidates_for_explicit_path() {
        assert_eq!(
            search_candidates("./run.sh", Some(OsStr::new("/bin"))),
            vec![PathBuf::from("./run.sh")]
        );
        assert_eq!(search_candidates("ls", None), vec![PathBuf::from("ls")]);
    }

    #[test]
    fn test_plan_rejects_nul_and_empty() {
        let argv = vec!["echo".to_string(), "a\0b".to_string()];
        assert_eq!(
            ExecPlan::with_search_path(&argv, None).err(),
            Some(PlanError::NulByte("echo".to_string()))
        );
        assert_eq!(ExecPlan::with_search_path(&[], None).err(), Some(PlanError::Empty));
    }

    #[test]
    fn test_plan_argv_is_null_terminated() {
        let argv = vec!["wc".to_string(), "-w".to_string()];
        let plan = ExecPlan::with_search_path(&argv, Some(OsStr::new("/usr/bin"))).unwrap();
        assert_eq!(plan.name(), "wc");
        assert_eq!(plan.argv_ptrs.len(), 3);
        assert!(plan.argv_ptrs[2].is_null());
        assert_eq!(plan.candidates.len(), 2);
    }
}
