use tracing::debug;

use crate::builtins::{self, Builtin};
use crate::dirs::Dirs;
use crate::execution;
use crate::jobs::SharedJobs;
use crate::parser;
use crate::pipeline;
use crate::subst;
use crate::sys::SysError;

pub const FAREWELL: &str = "Good bye!";

/// What the read loop should do after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Shell<'j> {
    jobs: &'j SharedJobs,
    dirs: Dirs,
}

impl<'j> Shell<'j> {
    pub fn new(jobs: &'j SharedJobs) -> Self {
        Shell {
            jobs,
            dirs: Dirs::new(),
        }
    }

    pub fn dirs(&self) -> &Dirs {
        &self.dirs
    }

    /// Evaluates every statement of an input line, left to right.
    pub fn eval_line(&mut self, line: &str) -> Result<Flow, SysError> {
        for statement in parser::split_statements(line) {
            if self.eval(statement)? == Flow::Exit {
                return Ok(Flow::Exit);
            }
        }
        Ok(Flow::Continue)
    }

    /// Evaluates a single statement: a builtin runs in place, anything
    /// else becomes a job.
    pub fn eval(&mut self, cmdline: &str) -> Result<Flow, SysError> {
        let cmdline = cmdline.trim_matches(|c: char| c == ' ' || c == '\n');
        let mut parsed = parser::parse(cmdline);
        if parsed.is_blank() {
            return Ok(Flow::Continue);
        }
        subst::substitute(&mut parsed.argv);

        match builtins::classify(&parsed.argv) {
            Some(builtin) => {
                debug!("builtin {:?}: {}", builtin, parsed.argv[0]);
                self.run_builtin(builtin, &parsed.argv)
            }
            None => {
                execution::launch(self.jobs, &parsed.argv, parsed.background, cmdline)?;
                Ok(Flow::Continue)
            }
        }
    }

    fn run_builtin(&mut self, builtin: Builtin, argv: &[String]) -> Result<Flow, SysError> {
        match builtin {
            Builtin::Exit => return Ok(Flow::Exit),
            Builtin::Assign => {
                if let Err(err) = builtins::assign(&argv[0]) {
                    println!("{}", err);
                }
            }
            Builtin::Pipe => pipeline::run_pipe(&argv.join(" "))?,
            Builtin::Bg | Builtin::Fg => builtins::bg_fg(self.jobs, argv)?,
            Builtin::Jobs => builtins::list_jobs(self.jobs)?,
            Builtin::Pwd => self.dirs.pwd(),
            Builtin::Cd => self.dirs.cd(argv.get(1).map(String::as_str)),
        }
        Ok(Flow::Continue)
    }
}
