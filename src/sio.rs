//! Output that is safe to produce from a signal handler or a freshly
//! forked child: formatting happens into a stack buffer and the bytes are
//! handed to `write(2)` directly, bypassing the locked `std::io::stdout`.

use std::fmt;

use libc::c_int;

const CAPACITY: usize = 256;

pub(crate) struct SioBuf {
    buf: [u8; CAPACITY],
    len: usize,
}

impl SioBuf {
    pub(crate) const fn new() -> Self {
        SioBuf {
            buf: [0; CAPACITY],
            len: 0,
        }
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Writes the buffered bytes to `fd`, retrying on short writes and `EINTR`.
    pub(crate) fn flush_to(&self, fd: c_int) {
        let mut rest = self.as_bytes();
        while !rest.is_empty() {
            let n = unsafe { libc::write(fd, rest.as_ptr() as *const libc::c_void, rest.len()) };
            if n < 0 {
                if crate::sys::errno() == libc::EINTR {
                    continue;
                }
                return;
            }
            rest = &rest[n as usize..];
        }
    }
}

// Input beyond the capacity is dropped, keeping the final byte for a newline.
impl fmt::Write for SioBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = CAPACITY - 1 - self.len.min(CAPACITY - 1);
        let n = s.len().min(room);
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        Ok(())
    }
}

pub(crate) fn print_line(fd: c_int, args: fmt::Arguments<'_>) {
    let mut line = SioBuf::new();
    let _ = fmt::write(&mut line, args);
    line.buf[line.len] = b'\n';
    line.len += 1;
    line.flush_to(fd);
}

macro_rules! sio_println {
    ($($arg:tt)*) => {
        $crate::sio::print_line(libc::STDOUT_FILENO, format_args!($($arg)*))
    };
}

macro_rules! sio_eprintln {
    ($($arg:tt)*) => {
        $crate::sio::print_line(libc::STDERR_FILENO, format_args!($($arg)*))
    };
}
