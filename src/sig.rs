// https://github.com/vorner/signal-hook/blob/master/signal-hook-registry/src/lib.rs

use std::mem::MaybeUninit;
use std::ptr::null_mut;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use libc::{c_int, c_void, pid_t, sighandler_t, siginfo_t, sigset_t};

use crate::jobs::{JobState, JOBS};
use crate::sys::{check, errno, set_errno, strerror_str, SysError};

/// Mirrors `-v` for the handlers, which cannot go through `tracing`.
pub static VERBOSE: AtomicBool = AtomicBool::new(false);

fn verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

/// Pid of the pipe stage the shell is blocked on, 0 when there is none.
/// Pipe stages are not jobs, so they can be interrupted but not stopped.
pub static PIPE_STAGE: AtomicI32 = AtomicI32::new(0);

fn pipe_stage() -> Option<pid_t> {
    Some(PIPE_STAGE.load(Ordering::SeqCst)).filter(|&pid| pid > 0)
}

const NSIG_STANDARD: c_int = 32;

#[derive(Clone, Copy)]
pub struct SigSet {
    set: sigset_t,
}

impl SigSet {
    pub fn empty() -> Self {
        let set = unsafe {
            let mut set = MaybeUninit::<sigset_t>::zeroed();
            libc::sigemptyset(set.as_mut_ptr());
            set.assume_init()
        };
        SigSet { set }
    }

    pub fn of(signals: &[c_int]) -> Self {
        let mut set = SigSet::empty();
        for &signum in signals {
            set.add(signum);
        }
        set
    }

    /// The signals whose handlers mutate or consult the job table.
    pub fn job_signals() -> Self {
        SigSet::of(&[libc::SIGCHLD, libc::SIGINT, libc::SIGTSTP])
    }

    pub fn add(&mut self, signum: c_int) {
        unsafe { libc::sigaddset(&mut self.set, signum) };
    }

    pub fn remove(&mut self, signum: c_int) {
        unsafe { libc::sigdelset(&mut self.set, signum) };
    }

    pub fn remove_all(&mut self, other: &SigSet) {
        for signum in 1..NSIG_STANDARD {
            if other.contains(signum) {
                self.remove(signum);
            }
        }
    }

    pub fn contains(&self, signum: c_int) -> bool {
        unsafe { libc::sigismember(&self.set, signum) == 1 }
    }

    pub fn as_ptr(&self) -> *const sigset_t {
        &self.set
    }

    /// Current mask of the calling thread.
    #[cfg(test)]
    pub fn current() -> Result<Self, SysError> {
        let mut current = SigSet::empty();
        sigmask(libc::SIG_BLOCK, None, Some(&mut current))?;
        Ok(current)
    }
}

fn sigmask(how: c_int, set: Option<&SigSet>, old: Option<&mut SigSet>) -> Result<(), SysError> {
    let set = set.map_or(std::ptr::null(), |set| set.as_ptr());
    let old = old.map_or(null_mut(), |old| &mut old.set as *mut _);
    match unsafe { libc::pthread_sigmask(how, set, old) } {
        0 => Ok(()),
        err => Err(SysError {
            call: "sigprocmask",
            errno: err,
        }),
    }
}

pub fn unblock(set: &SigSet) -> Result<(), SysError> {
    sigmask(libc::SIG_UNBLOCK, Some(set), None)
}

/// Blocks a set of signals until dropped, then restores the previous mask.
pub struct SignalGuard {
    previous: SigSet,
}

impl SignalGuard {
    pub fn block(set: &SigSet) -> Result<Self, SysError> {
        let mut previous = SigSet::empty();
        sigmask(libc::SIG_BLOCK, Some(set), Some(&mut previous))?;
        Ok(SignalGuard { previous })
    }

    pub fn previous(&self) -> SigSet {
        self.previous
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        let _ = sigmask(libc::SIG_SETMASK, Some(&self.previous), None);
    }
}

pub(crate) type Handler = extern "C" fn(c_int, *mut siginfo_t, *mut c_void);

/// Installs `handler` with `SA_RESTART`, keeping the job signals masked
/// while it runs.
pub(crate) fn install_sighandler(signum: c_int, handler: Handler) -> Result<(), SysError> {
    let mut sa: libc::sigaction = unsafe { MaybeUninit::zeroed().assume_init() };
    sa.sa_sigaction = handler as sighandler_t;
    sa.sa_flags = libc::SA_RESTART | libc::SA_SIGINFO;
    sa.sa_mask = SigSet::job_signals().set;

    check("Signal", unsafe { libc::sigaction(signum, &sa, null_mut()) }).map(|_| ())
}

pub fn install_handlers() -> Result<(), SysError> {
    install_sighandler(libc::SIGINT, sigint_handler)?;
    install_sighandler(libc::SIGTSTP, sigtstp_handler)?;
    install_sighandler(libc::SIGCHLD, sigchld_handler)?;
    install_sighandler(libc::SIGQUIT, sigquit_handler)?;
    Ok(())
}

/// Restores the default disposition, used by children before `exec`.
pub(crate) fn reset_to_default(signum: c_int) {
    unsafe { libc::signal(signum, libc::SIG_DFL) };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitStatus {
    Exited(c_int),
    Signaled(c_int),
    Stopped(c_int),
    Continued,
}

impl WaitStatus {
    pub(crate) fn from_raw(status: c_int) -> Self {
        if libc::WIFSTOPPED(status) {
            WaitStatus::Stopped(libc::WSTOPSIG(status))
        } else if libc::WIFEXITED(status) {
            WaitStatus::Exited(libc::WEXITSTATUS(status))
        } else if libc::WIFSIGNALED(status) {
            WaitStatus::Signaled(libc::WTERMSIG(status))
        } else {
            WaitStatus::Continued
        }
    }
}

/// Drains every reapable child in one pass.
pub(crate) extern "C" fn sigchld_handler(_sig: c_int, _info: *mut siginfo_t, _ctx: *mut c_void) {
    let saved_errno = errno();
    if verbose() {
        sio_eprintln!("sigchld_handler: entering");
    }

    let jobs = unsafe { JOBS.handler_access() };
    let mut status: c_int = 0;
    loop {
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG | libc::WUNTRACED) };
        if pid <= 0 {
            break;
        }
        if !reap(jobs, pid, WaitStatus::from_raw(status)) {
            set_errno(saved_errno);
            return;
        }
    }

    if verbose() {
        sio_eprintln!("sigchld_handler: exiting");
    }
    set_errno(saved_errno);
}

/// Applies one reaped status to the table. Returns false when `pid` is
/// not a tracked job.
pub(crate) fn reap(jobs: &mut crate::jobs::JobTable, pid: pid_t, status: WaitStatus) -> bool {
    let jid = match jobs.by_pid(pid) {
        Some(job) => job.jid,
        None => {
            sio_println!("Lost track of ({})", pid);
            return false;
        }
    };

    match status {
        WaitStatus::Stopped(signum) => {
            sio_println!("Job [{}] ({}) stopped by signal {}", jid, pid, signum);
            let _ = jobs.set_state(pid, JobState::Stopped);
        }
        WaitStatus::Exited(code) => {
            if jobs.delete(pid).is_some() && verbose() {
                sio_eprintln!("sigchld_handler: Job [{}] ({}) deleted", jid, pid);
                sio_eprintln!(
                    "sigchld_handler: Job [{}] ({}) terminates OK (status {})",
                    jid,
                    pid,
                    code
                );
            }
        }
        WaitStatus::Signaled(signum) => {
            if jobs.delete(pid).is_some() && verbose() {
                sio_eprintln!("sigchld_handler: Job [{}] ({}) deleted", jid, pid);
            }
            sio_println!("Job [{}] ({}) terminated by signal {}", jid, pid, signum);
        }
        WaitStatus::Continued => {}
    }
    true
}

/// Process group a terminal signal is passed on to: the foreground job,
/// or for an interrupt the pipe stage being waited on.
pub(crate) fn forward_target(jobs: &crate::jobs::JobTable, signum: c_int) -> Option<pid_t> {
    jobs.foreground_pid()
        .or_else(|| if signum == libc::SIGINT { pipe_stage() } else { None })
}

fn forward_to_foreground(signum: c_int, what: &str) {
    let saved_errno = errno();
    if verbose() {
        sio_eprintln!("{}_handler: entering", what);
    }

    let jobs = unsafe { JOBS.handler_access() };
    if let Some(pid) = forward_target(jobs, signum) {
        // A pipe stage may already be reaped by the time it is signalled.
        let tracked = jobs.foreground_pid().is_some();
        if unsafe { libc::kill(-pid, signum) } < 0 && tracked {
            sio_println!("kill ({}) error: {}", what, strerror_str(errno()));
            unsafe { libc::_exit(1) };
        }
        if verbose() {
            sio_eprintln!("{}_handler: Job ({}) signalled", what, pid);
        }
    }

    if verbose() {
        sio_eprintln!("{}_handler: exiting", what);
    }
    set_errno(saved_errno);
}

pub(crate) extern "C" fn sigint_handler(_sig: c_int, _info: *mut siginfo_t, _ctx: *mut c_void) {
    forward_to_foreground(libc::SIGINT, "sigint");
}

pub(crate) extern "C" fn sigtstp_handler(_sig: c_int, _info: *mut siginfo_t, _ctx: *mut c_void) {
    forward_to_foreground(libc::SIGTSTP, "sigtstp");
}

pub(crate) extern "C" fn sigquit_handler(_sig: c_int, _info: *mut siginfo_t, _ctx: *mut c_void) {
    sio_println!("Terminating after receipt of SIGQUIT signal");
    unsafe { libc::_exit(1) };
}
