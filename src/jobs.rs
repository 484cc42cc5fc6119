//! The job table.
//!
//! A fixed array of slots, allocation free once constructed so that the
//! child-termination handler can update it in place. The single
//! process-wide instance is [`JOBS`]; see [`SharedJobs`] for the rules
//! governing who may touch it and when.

use std::cell::UnsafeCell;
use std::fmt;

use libc::pid_t;
use thiserror::Error;
use tracing::debug;

use crate::sig::{SigSet, SignalGuard};
use crate::sys::SysError;

pub const MAXJOBS: usize = 16;
pub const MAXLINE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Undefined,
    Foreground,
    Background,
    Stopped,
}

impl JobState {
    pub fn label(self) -> &'static str {
        match self {
            JobState::Undefined => "Undefined",
            JobState::Foreground => "Foreground",
            JobState::Background => "Running",
            JobState::Stopped => "Stopped",
        }
    }
}

/// Command text stored inline, truncated on a character boundary.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CommandText {
    bytes: [u8; MAXLINE],
    len: usize,
}

impl CommandText {
    pub const EMPTY: CommandText = CommandText {
        bytes: [0; MAXLINE],
        len: 0,
    };

    pub fn new(text: &str) -> Self {
        let mut len = text.len().min(MAXLINE);
        while !text.is_char_boundary(len) {
            len -= 1;
        }
        let mut command = CommandText::EMPTY;
        command.bytes[..len].copy_from_slice(&text.as_bytes()[..len]);
        command.len = len;
        command
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len]).unwrap_or("")
    }
}

impl fmt::Debug for CommandText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job {
    pub pid: pid_t,
    pub jid: u32,
    pub state: JobState,
    pub command: CommandText,
}

impl Job {
    pub const EMPTY: Job = Job {
        pid: 0,
        jid: 0,
        state: JobState::Undefined,
        command: CommandText::EMPTY,
    };

    pub fn is_free(&self) -> bool {
        self.pid == 0
    }
}

#[derive(Debug, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("Tried to create too many jobs")]
    Full,
    #[error("invalid process id {0}")]
    InvalidPid(pid_t),
    #[error("process ({0}) is already a job")]
    DuplicatePid(pid_t),
    #[error("job [{0}] is already in the foreground")]
    ForegroundBusy(u32),
    #[error("({0}): No such process")]
    NoSuchProcess(pid_t),
}

#[derive(Debug, PartialEq, Eq)]
pub struct JobTable {
    slots: [Job; MAXJOBS],
    next_jid: u32,
}

impl Default for JobTable {
    fn default() -> Self {
        JobTable::new()
    }
}

impl JobTable {
    pub const fn new() -> Self {
        JobTable {
            slots: [Job::EMPTY; MAXJOBS],
            next_jid: 1,
        }
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(|job| !job.is_free())
    }

    pub fn max_jid(&self) -> u32 {
        self.slots.iter().map(|job| job.jid).max().unwrap_or(0)
    }

    /// Records a new job and returns its jid.
    pub fn add(&mut self, pid: pid_t, state: JobState, command: &str) -> Result<u32, JobError> {
        if pid < 1 {
            return Err(JobError::InvalidPid(pid));
        }
        if self.by_pid(pid).is_some() {
            return Err(JobError::DuplicatePid(pid));
        }
        if state == JobState::Foreground {
            if let Some(fg) = self.foreground() {
                return Err(JobError::ForegroundBusy(fg.jid));
            }
        }

        let jid = self.next_jid;
        let slot = self
            .slots
            .iter_mut()
            .find(|job| job.is_free())
            .ok_or(JobError::Full)?;
        *slot = Job {
            pid,
            jid,
            state,
            command: CommandText::new(command),
        };
        self.next_jid += 1;
        Ok(jid)
    }

    /// Clears the slot holding `pid`. Returns the removed job, if any.
    pub fn delete(&mut self, pid: pid_t) -> Option<Job> {
        if pid < 1 {
            return None;
        }
        let slot = self.slots.iter_mut().find(|job| job.pid == pid)?;
        let removed = *slot;
        *slot = Job::EMPTY;
        self.next_jid = self.max_jid() + 1;
        Some(removed)
    }

    pub fn set_state(&mut self, pid: pid_t, state: JobState) -> Result<(), JobError> {
        if state == JobState::Foreground {
            if let Some(fg) = self.foreground() {
                if fg.pid != pid {
                    return Err(JobError::ForegroundBusy(fg.jid));
                }
            }
        }
        let job = self.by_pid_mut(pid).ok_or(JobError::NoSuchProcess(pid))?;
        job.state = state;
        Ok(())
    }

    pub fn foreground(&self) -> Option<&Job> {
        self.live().find(|job| job.state == JobState::Foreground)
    }

    pub fn foreground_pid(&self) -> Option<pid_t> {
        self.foreground().map(|job| job.pid)
    }

    pub fn is_foreground(&self, pid: pid_t) -> bool {
        self.foreground_pid() == Some(pid)
    }

    pub fn by_pid(&self, pid: pid_t) -> Option<&Job> {
        if pid < 1 {
            return None;
        }
        self.live().find(|job| job.pid == pid)
    }

    pub fn by_pid_mut(&mut self, pid: pid_t) -> Option<&mut Job> {
        if pid < 1 {
            return None;
        }
        self.slots.iter_mut().find(|job| job.pid == pid)
    }

    pub fn by_jid(&self, jid: u32) -> Option<&Job> {
        if jid < 1 {
            return None;
        }
        self.live().find(|job| job.jid == jid)
    }

    /// Occupied slots in table order.
    pub fn live(&self) -> impl Iterator<Item = &Job> {
        self.slots.iter().filter(|job| !job.is_free())
    }

    pub fn listing(&self) -> Vec<String> {
        self.live()
            .map(|job| {
                format!(
                    "[{}] ({}) {} {}",
                    job.jid,
                    job.pid,
                    job.state.label(),
                    job.command.as_str()
                )
            })
            .collect()
    }
}

/// Storage for the process-wide job table.
///
/// Re-entrancy contract: the main control flow reaches the table only
/// through [`SharedJobs::with`] and [`SharedJobs::wait_while`], both of
/// which keep the job signals (`SIGCHLD`, `SIGINT`, `SIGTSTP`) blocked
/// while the table is borrowed. Every handler that touches the table is
/// installed with those same signals in its `sa_mask`. Hence at most one
/// borrow exists at any instant. Closures passed to `with` must not call
/// back into the same `SharedJobs`.
pub struct SharedJobs {
    table: UnsafeCell<JobTable>,
}

unsafe impl Sync for SharedJobs {}

impl SharedJobs {
    pub const fn new() -> Self {
        SharedJobs {
            table: UnsafeCell::new(JobTable::new()),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut JobTable) -> R) -> Result<R, SysError> {
        let _guard = SignalGuard::block(&SigSet::job_signals())?;
        Ok(f(unsafe { &mut *self.table.get() }))
    }

    /// Blocks the caller for as long as `busy` holds, sleeping in
    /// `sigsuspend` between checks so that a state change made by a
    /// handler cannot slip in between the check and the sleep.
    pub fn wait_while(&self, mut busy: impl FnMut(&JobTable) -> bool) -> Result<(), SysError> {
        let guard = SignalGuard::block(&SigSet::job_signals())?;
        let mut suspend = guard.previous();
        suspend.remove_all(&SigSet::job_signals());

        while busy(unsafe { &*self.table.get() }) {
            unsafe { libc::sigsuspend(suspend.as_ptr()) };
        }
        Ok(())
    }

    /// Blocks until `pid` is no longer the foreground job.
    pub fn wait_foreground(&self, pid: pid_t) -> Result<(), SysError> {
        self.wait_while(|table| table.is_foreground(pid))?;
        debug!("waitfg: Process ({}) no longer the fg process", pid);
        Ok(())
    }

    /// # Safety
    ///
    /// Only callable from a signal handler installed with the job signals
    /// in its mask, and only while no other borrow is live.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn handler_access(&self) -> &mut JobTable {
        &mut *self.table.get()
    }
}

pub static JOBS: SharedJobs = SharedJobs::new();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_assigns_increasing_jids() {
        let mut table = JobTable::new();
        assert_eq!(table.add(100, JobState::Background, "sleep 10 &"), Ok(1));
        assert_eq!(table.add(101, JobState::Background, "sleep 20 &"), Ok(2));
        assert_eq!(table.by_jid(2).map(|job| job.pid), Some(101));
        assert_eq!(table.by_pid(100).map(|job| job.jid), Some(1));
        assert_eq!(table.next_jid, 3);
    }

    #[test]
    fn test_delete_rewinds_jid_counter() {
        let mut table = JobTable::new();
        table.add(100, JobState::Background, "a").unwrap();
        table.add(101, JobState::Background, "b").unwrap();
        table.add(102, JobState::Background, "c").unwrap();

        // A gap below the maximum is not reused.
        table.delete(101).unwrap();
        assert_eq!(table.next_jid, 4);

        table.delete(102).unwrap();
        assert_eq!(table.next_jid, 2);
        assert_eq!(table.add(103, JobState::Background, "d"), Ok(2));
    }

    #[test]
    fn test_add_then_delete_restores_table() {
        let mut table = JobTable::new();
        table.add(100, JobState::Stopped, "vim").unwrap();
        let before = table.listing();
        let slots_before = table.slots;

        table.add(200, JobState::Foreground, "make").unwrap();
        let removed = table.delete(200).unwrap();

        assert_eq!(removed.jid, 2);
        assert_eq!(removed.command.as_str(), "make");
        assert_eq!(table.listing(), before);
        assert_eq!(table.slots, slots_before);
    }

    #[test]
    fn test_rejects_invalid_and_duplicate_pids() {
        let mut table = JobTable::new();
        assert_eq!(table.add(0, JobState::Background, "x"), Err(JobError::InvalidPid(0)));
        table.add(7, JobState::Background, "x").unwrap();
        assert_eq!(table.add(7, JobState::Background, "x"), Err(JobError::DuplicatePid(7)));
        assert_eq!(table.delete(0), None);
        assert_eq!(table.delete(8), None);
    }

    #[test]
    fn test_single_foreground_job() {
        let mut table = JobTable::new();
        table.add(10, JobState::Foreground, "fg").unwrap();
        table.add(11, JobState::Stopped, "st").unwrap();

        assert_eq!(
            table.add(12, JobState::Foreground, "other"),
            Err(JobError::ForegroundBusy(1))
        );
        assert_eq!(
            table.set_state(11, JobState::Foreground),
            Err(JobError::ForegroundBusy(1))
        );

        table.set_state(10, JobState::Stopped).unwrap();
        table.set_state(11, JobState::Foreground).unwrap();
        assert_eq!(table.foreground_pid(), Some(11));
        assert_eq!(
            table.live().filter(|job| job.state == JobState::Foreground).count(),
            1
        );
    }

    #[test]
    fn test_full_table() {
        let mut table = JobTable::new();
        for pid in 1..=MAXJOBS as pid_t {
            table.add(pid, JobState::Background, "sleep 1 &").unwrap();
        }
        assert!(table.is_full());
        assert_eq!(table.add(999, JobState::Background, "x"), Err(JobError::Full));

        table.delete(3).unwrap();
        assert!(!table.is_full());
    }

    #[test]
    fn test_listing_format() {
        let mut table = JobTable::new();
        table.add(4821, JobState::Background, "sleep 5 &").unwrap();
        table.add(4822, JobState::Stopped, "vi notes").unwrap();
        table.add(4823, JobState::Foreground, "cat").unwrap();
        assert_eq!(
            table.listing(),
            vec![
                "[1] (4821) Running sleep 5 &",
                "[2] (4822) Stopped vi notes",
                "[3] (4823) Foreground cat",
            ]
        );
    }

    #[test]
    fn test_command_text_truncates_on_char_boundary() {
        let long = "é".repeat(MAXLINE);
        let text = CommandText::new(&long);
        assert!(text.as_str().len() <= MAXLINE);
        assert!(text.as_str().chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_shared_wait_returns_when_not_foreground() {
        static SHARED: SharedJobs = SharedJobs::new();

        SHARED
            .with(|table| table.add(55, JobState::Background, "sleep 1 &"))
            .unwrap()
            .unwrap();
        SHARED.wait_foreground(55).unwrap();
        SHARED.wait_foreground(56).unwrap();

        let state = SHARED.with(|table| table.by_pid(55).map(|job| job.state)).unwrap();
        assert_eq!(state, Some(JobState::Background));
    }
}
