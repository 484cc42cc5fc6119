use std::env;
use std::io;
use std::path::{Path, PathBuf};

/// Working directory bookkeeping for `cd` and `pwd`.
#[derive(Debug, Default)]
pub struct Dirs {
    previous: Option<PathBuf>,
}

impl Dirs {
    pub fn new() -> Self {
        Dirs::default()
    }

    pub fn previous(&self) -> Option<&Path> {
        self.previous.as_deref()
    }

    pub fn current(&self) -> PathBuf {
        env::var_os("PWD")
            .map(PathBuf::from)
            .filter(|pwd| pwd.is_absolute())
            .or_else(|| env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn pwd(&self) {
        println!("{}", self.current().display());
    }

    /// `cd`, `cd ~`, `cd -` or `cd DIR`.
    pub fn cd(&mut self, target: Option<&str>) {
        let destination = match target {
            None | Some("~") => match env::var_os("HOME") {
                Some(home) => PathBuf::from(home),
                None => {
                    println!("cd: HOME not set");
                    return;
                }
            },
            Some("-") => match self.previous().map(Path::to_path_buf) {
                Some(previous) => previous,
                None => {
                    println!("cd: no previous directory");
                    return;
                }
            },
            Some(dir) => PathBuf::from(dir),
        };

        if let Err(err) = self.change_to(&destination) {
            println!("cd: {}: {}", destination.display(), err);
        }
    }

    fn change_to(&mut self, destination: &Path) -> io::Result<()> {
        let before = self.current();
        env::set_current_dir(destination)?;
        let now = env::current_dir()?;
        env::set_var("PWD", &now);
        self.previous = Some(before);
        Ok(())
    }
}
