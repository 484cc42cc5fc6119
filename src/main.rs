#[macro_use]
mod sio;

pub mod builtins;
pub mod dirs;
pub mod execution;
pub mod jobs;
pub mod parser;
pub mod pipeline;
pub mod prompt;
pub mod shell;
pub mod sig;
pub mod subst;
pub mod sys;

use std::error::Error;
use std::io::{self, BufRead, Write};
use std::process;
use std::sync::atomic::Ordering;

use argh::{EarlyExit, FromArgs};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::jobs::JOBS;
use crate::shell::{Flow, Shell, FAREWELL};

#[derive(FromArgs, Debug, PartialEq)]
/// A small shell with job control.
struct Args {
    /// print additional diagnostic information
    #[argh(switch, short = 'v')]
    verbose: bool,

    /// do not emit a command prompt
    #[argh(switch, short = 'p')]
    no_prompt: bool,
}

/// Expands `-vp` into `-v -p`, as getopt would accept it.
fn expand_short_flags(args: &[String]) -> Vec<String> {
    args.iter()
        .flat_map(|arg| {
            let bundled = arg.len() > 2 && arg.starts_with('-') && !arg.starts_with("--");
            if bundled {
                arg[1..].chars().map(|flag| format!("-{}", flag)).collect()
            } else {
                vec![arg.clone()]
            }
        })
        .collect()
}

fn parse_args(args: &[String]) -> Result<Args, EarlyExit> {
    let command = args.first().map_or("jsh", String::as_str);
    let rest = expand_short_flags(args.get(1..).unwrap_or(&[]));
    let rest: Vec<&str> = rest.iter().map(String::as_str).collect();
    Args::from_args(&[command], &rest)
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .with(filter)
        .init();
}

enum Input {
    Editor(DefaultEditor),
    Plain(io::Stdin),
}

impl Input {
    fn open(interactive: bool) -> Self {
        if interactive && unsafe { libc::isatty(libc::STDIN_FILENO) } == 1 {
            match DefaultEditor::new() {
                Ok(editor) => return Input::Editor(editor),
                Err(err) => warn!("line editor unavailable: {}", err),
            }
        }
        Input::Plain(io::stdin())
    }

    /// Next line, or `None` at end of input.
    fn read_line(&mut self, prompt: Option<&str>) -> Result<Option<String>, Box<dyn Error>> {
        match self {
            Input::Editor(editor) => loop {
                match editor.readline(prompt.unwrap_or("")) {
                    Ok(line) => {
                        let _ = editor.add_history_entry(line.as_str());
                        return Ok(Some(line));
                    }
                    Err(ReadlineError::Interrupted) => continue,
                    Err(ReadlineError::Eof) => return Ok(None),
                    Err(err) => return Err(err.into()),
                }
            },
            Input::Plain(stdin) => {
                if let Some(prompt) = prompt {
                    print!("{}", prompt);
                    io::stdout().flush()?;
                }
                let mut line = String::new();
                match stdin.lock().read_line(&mut line)? {
                    0 => Ok(None),
                    _ => Ok(Some(line)),
                }
            }
        }
    }
}

fn farewell(code: i32) -> ! {
    println!("{}", FAREWELL);
    let _ = io::stdout().flush();
    process::exit(code)
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    sig::install_handlers()?;

    let emit_prompt = !args.no_prompt;
    let mut input = Input::open(emit_prompt);
    let mut shell = Shell::new(&JOBS);

    loop {
        let prompt = if emit_prompt {
            Some(prompt::render(&shell.dirs().current()))
        } else {
            None
        };
        let line = match input.read_line(prompt.as_deref())? {
            Some(line) => line,
            None => farewell(0),
        };
        if shell.eval_line(&line)? == Flow::Exit {
            farewell(0);
        }
        io::stdout().flush()?;
    }
}

fn main() {
    let argv: Vec<String> = std::env::args().collect();
    let args = match parse_args(&argv) {
        Ok(args) => args,
        Err(EarlyExit { output, status }) => {
            match status {
                Ok(()) => println!("{}", output),
                Err(()) => eprintln!("{}", output),
            }
            process::exit(1);
        }
    };

    sig::VERBOSE.store(args.verbose, Ordering::Relaxed);
    init_tracing(args.verbose);

    if let Err(err) = run(args) {
        println!("{}", err);
        let _ = io::stdout().flush();
        process::exit(1);
    }
}
