use std::ffi::CStr;
use std::path::Path;

use libc::c_char;

fn user_name() -> Option<String> {
    let entry = unsafe { libc::getpwuid(libc::getuid()) };
    if entry.is_null() {
        return None;
    }
    let name = unsafe { CStr::from_ptr((*entry).pw_name) };
    Some(name.to_string_lossy().into_owned())
}

fn host_name() -> Option<String> {
    let mut buf = [0 as c_char; 256];
    if unsafe { libc::gethostname(buf.as_mut_ptr(), buf.len() - 1) } != 0 {
        return None;
    }
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Some(name.to_string_lossy().into_owned())
}

pub fn render(cwd: &Path) -> String {
    let user = user_name().unwrap_or_else(|| "jsh".to_string());
    let host = host_name().unwrap_or_else(|| "localhost".to_string());
    let is_root = unsafe { libc::getuid() } == 0;
    format_prompt(&user, &host, cwd, is_root)
}

pub(crate) fn format_prompt(user: &str, host: &str, cwd: &Path, is_root: bool) -> String {
    let marker = if is_root {
        "\x1b[01;31m#\x1b[00m"
    } else {
        "\x1b[01;32m$\x1b[00m"
    };
    format!(
        "\x1b[01;32m{}@{}\x1b[00m:\x1b[01;34m{}\x1b[00m {} ",
        user,
        host,
        cwd.display(),
        marker
    )
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    #[test]
    fn test_format_prompt() {
        assert_eq!(
            super::format_prompt("ada", "box", Path::new("/tmp"), false),
            "\x1b[01;32mada@box\x1b[00m:\x1b[01;34m/tmp\x1b[00m \x1b[01;32m$\x1b[00m "
        );
        assert!(super::format_prompt("root", "box", Path::new("/"), true).contains("31m#"));
    }
}
