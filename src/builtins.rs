use std::env;

use libc::pid_t;
use thiserror::Error;

use crate::jobs::{Job, JobError, JobState, JobTable, SharedJobs};
use crate::pipeline::PIPE;
use crate::sys::{check, SysError};

/// Builtins in dispatch priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Exit,
    Assign,
    Pipe,
    Bg,
    Fg,
    Jobs,
    Pwd,
    Cd,
}

/// Decides whether `argv` names a builtin. `None` means an external program.
pub fn classify(argv: &[String]) -> Option<Builtin> {
    let first = argv.first()?;
    if first == "exit" {
        return Some(Builtin::Exit);
    }
    if first.contains('=') {
        return Some(Builtin::Assign);
    }
    if argv.iter().any(|token| token.contains(PIPE)) {
        return Some(Builtin::Pipe);
    }
    match first.as_str() {
        "bg" => Some(Builtin::Bg),
        "fg" => Some(Builtin::Fg),
        "jobs" => Some(Builtin::Jobs),
        "pwd" => Some(Builtin::Pwd),
        "cd" => Some(Builtin::Cd),
        _ => None,
    }
}

#[derive(Debug, PartialEq, Eq, Error)]
pub enum AssignError {
    #[error("{0}: not a valid variable name")]
    InvalidName(String),
    #[error("{0}: value contains a NUL byte")]
    NulValue(String),
}

/// `NAME=value`, split at the first `=`. Tokens with a space are ignored.
pub fn assign(token: &str) -> Result<(), AssignError> {
    if token.contains(' ') {
        return Ok(());
    }
    let (name, value) = match token.split_once('=') {
        Some(pair) => pair,
        None => return Ok(()),
    };
    if name.is_empty() || name.contains('\0') {
        return Err(AssignError::InvalidName(name.to_string()));
    }
    if value.contains('\0') {
        return Err(AssignError::NulValue(name.to_string()));
    }
    env::set_var(name, value);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRef {
    Jid(u32),
    Pid(pid_t),
}

/// `%N` names a job id, a bare `N` a process id. Both must be positive.
pub fn parse_job_ref(arg: &str) -> Option<JobRef> {
    match arg.strip_prefix('%') {
        Some(jid) => jid.parse::<u32>().ok().filter(|&jid| jid > 0).map(JobRef::Jid),
        None => arg.parse::<pid_t>().ok().filter(|&pid| pid > 0).map(JobRef::Pid),
    }
}

#[derive(Debug, PartialEq, Eq, Error)]
pub enum BgFgError {
    #[error("{0} command requires PID or %jobid argument")]
    MissingArgument(String),
    #[error("{0}: argument must be a PID or %jobid")]
    BadArgument(String),
    #[error("%{0}: No such job")]
    NoSuchJob(u32),
    #[error("({0}): No such process")]
    NoSuchProcess(pid_t),
    #[error(transparent)]
    Job(#[from] JobError),
}

pub fn lookup(table: &JobTable, target: JobRef) -> Result<&Job, BgFgError> {
    match target {
        JobRef::Jid(jid) => table.by_jid(jid).ok_or(BgFgError::NoSuchJob(jid)),
        JobRef::Pid(pid) => table.by_pid(pid).ok_or(BgFgError::NoSuchProcess(pid)),
    }
}

/// Moves the job to `state` and continues its process group.
fn resume(table: &mut JobTable, target: JobRef, state: JobState) -> Result<Result<Job, BgFgError>, SysError> {
    let job = match lookup(table, target) {
        Ok(job) => *job,
        Err(err) => return Ok(Err(err)),
    };
    if let Err(err) = table.set_state(job.pid, state) {
        return Ok(Err(err.into()));
    }
    check("kill", unsafe { libc::kill(-job.pid, libc::SIGCONT) })?;
    Ok(Ok(job))
}

/// `bg <job>` or `fg <job>`. Argument problems are reported and leave the
/// table untouched.
pub fn bg_fg(jobs: &SharedJobs, argv: &[String]) -> Result<(), SysError> {
    let command = argv.first().map_or("fg", String::as_str);
    let foreground = command == "fg";

    let target = match argv.get(1) {
        None => Err(BgFgError::MissingArgument(command.to_string())),
        Some(arg) => parse_job_ref(arg).ok_or_else(|| BgFgError::BadArgument(command.to_string())),
    };
    let target = match target {
        Ok(target) => target,
        Err(err) => {
            println!("{}", err);
            return Ok(());
        }
    };

    let state = if foreground {
        JobState::Foreground
    } else {
        JobState::Background
    };
    let job = match jobs.with(|table| resume(table, target, state))?? {
        Ok(job) => job,
        Err(err) => {
            println!("{}", err);
            return Ok(());
        }
    };

    if foreground {
        jobs.wait_foreground(job.pid)
    } else {
        println!("[{}] ({}) {}", job.jid, job.pid, job.command.as_str());
        Ok(())
    }
}

pub fn list_jobs(jobs: &SharedJobs) -> Result<(), SysError> {
    for line in jobs.with(|table| table.listing())? {
        println!("{}", line);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_classify_priority() {
        assert_eq!(classify(&argv(&["exit"])), Some(Builtin::Exit));
        assert_eq!(classify(&argv(&["A=1", "|", "x"])), Some(Builtin::Assign));
        assert_eq!(classify(&argv(&["jobs", "|", "wc"])), Some(Builtin::Pipe));
        assert_eq!(classify(&argv(&["echo", "a|b"])), Some(Builtin::Pipe));
        assert_eq!(classify(&argv(&["bg", "%1"])), Some(Builtin::Bg));
        assert_eq!(classify(&argv(&["fg"])), Some(Builtin::Fg));
        assert_eq!(classify(&argv(&["jobs"])), Some(Builtin::Jobs));
        assert_eq!(classify(&argv(&["pwd"])), Some(Builtin::Pwd));
        assert_eq!(classify(&argv(&["cd", "/tmp"])), Some(Builtin::Cd));
    }

    #[test]
    fn test_classify_external() {
        assert_eq!(classify(&argv(&["ls", "-l"])), None);
        assert_eq!(classify(&argv(&["exitcode"])), None);
        assert_eq!(classify(&[]), None);
    }

    #[test]
    fn test_parse_job_ref() {
        assert_eq!(parse_job_ref("%3"), Some(JobRef::Jid(3)));
        assert_eq!(parse_job_ref("4821"), Some(JobRef::Pid(4821)));
        assert_eq!(parse_job_ref("%0"), None);
        assert_eq!(parse_job_ref("0"), None);
        assert_eq!(parse_job_ref("-5"), None);
        assert_eq!(parse_job_ref("%"), None);
        assert_eq!(parse_job_ref("12abc"), None);
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            BgFgError::MissingArgument("bg".into()).to_string(),
            "bg command requires PID or %jobid argument"
        );
        assert_eq!(
            BgFgError::BadArgument("fg".into()).to_string(),
            "fg: argument must be a PID or %jobid"
        );
        assert_eq!(BgFgError::NoSuchJob(3).to_string(), "%3: No such job");
        assert_eq!(BgFgError::NoSuchProcess(4821).to_string(), "(4821): No such process");
    }

    #[test]
    fn test_unknown_job_leaves_table_unmodified() {
        static SHARED: SharedJobs = SharedJobs::new();
        let before = SHARED
            .with(|table| {
                table.add(4000, JobState::Stopped, "sleep 30").unwrap();
                table.listing()
            })
            .unwrap();

        bg_fg(&SHARED, &argv(&["bg", "%3"])).unwrap();
        bg_fg(&SHARED, &argv(&["fg", "4821"])).unwrap();
        bg_fg(&SHARED, &argv(&["fg"])).unwrap();
        bg_fg(&SHARED, &argv(&["bg", "x"])).unwrap();

        assert_eq!(SHARED.with(|table| table.listing()).unwrap(), before);

        let missing = SHARED
            .with(|table| lookup(table, JobRef::Jid(3)).map(|job| job.pid))
            .unwrap();
        assert_eq!(missing, Err(BgFgError::NoSuchJob(3)));
    }

    #[test]
    fn test_assign() {
        assign("JSH_TEST_ASSIGN=a=b").unwrap();
        assert_eq!(env::var("JSH_TEST_ASSIGN").as_deref(), Ok("a=b"));

        assign("JSH_TEST_EMPTY=").unwrap();
        assert_eq!(env::var("JSH_TEST_EMPTY").as_deref(), Ok(""));

        assert_eq!(assign("=oops"), Err(AssignError::InvalidName(String::new())));
        assert_eq!(assign("JSH_TEST_SPACE=a b"), Ok(()));
        assert!(env::var("JSH_TEST_SPACE").is_err());
    }
}
