use nix::libc;
use nix::unistd::{dup, dup2};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

/// How an output redirection opens its target file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Truncate,
    Append,
}

fn errno_to_io(err: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(err as i32)
}

/// Opens `path` for reading and makes it the process's standard input.
/// On failure standard input is left unchanged. The file handle is
/// closed once the descriptor has been duplicated onto the stdin slot.
pub fn bind_input(path: &str) -> io::Result<()> {
    let file = File::open(path)?;
    dup2(file.as_raw_fd(), libc::STDIN_FILENO).map_err(errno_to_io)?;
    Ok(())
}

/// Opens (creating if absent) `path` for writing in the given mode and
/// makes it the process's standard output. Same failure contract as
/// `bind_input`.
pub fn bind_output(path: &str, mode: OutputMode) -> io::Result<()> {
    let mut opts = OpenOptions::new();
    opts.write(true).create(true);
    match mode {
        OutputMode::Truncate => opts.truncate(true),
        OutputMode::Append => opts.append(true),
    };
    let file = opts.open(path)?;
    dup2(file.as_raw_fd(), libc::STDOUT_FILENO).map_err(errno_to_io)?;
    Ok(())
}

/// Saves duplicates of the original standard streams so they can be
/// restored after a parent-side redirection. Dropping a `Redirector`
/// restores the defaults, so release happens on every exit path.
pub struct Redirector {
    saved_stdin: OwnedFd,
    saved_stdout: OwnedFd,
}

impl Redirector {
    pub fn new() -> io::Result<Self> {
        let stdin_copy = dup(libc::STDIN_FILENO).map_err(errno_to_io)?;
        // SAFETY: dup() returned a freshly created descriptor we now own.
        let saved_stdin = unsafe { OwnedFd::from_raw_fd(stdin_copy) };
        let stdout_copy = dup(libc::STDOUT_FILENO).map_err(errno_to_io)?;
        // SAFETY: as above.
        let saved_stdout = unsafe { OwnedFd::from_raw_fd(stdout_copy) };
        Ok(Redirector {
            saved_stdin,
            saved_stdout,
        })
    }

    /// Rebinds standard input and output to the descriptors saved at
    /// construction. Idempotent.
    pub fn restore_defaults(&self) -> io::Result<()> {
        dup2(self.saved_stdin.as_raw_fd(), libc::STDIN_FILENO).map_err(errno_to_io)?;
        dup2(self.saved_stdout.as_raw_fd(), libc::STDOUT_FILENO).map_err(errno_to_io)?;
        Ok(())
    }
}

impl Drop for Redirector {
    fn drop(&mut self) {
        let _ = self.restore_defaults();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_input_missing_file() {
        let err = bind_input("/no/such/file/anywhere").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_restore_defaults_idempotent() {
        let redirector = Redirector::new().unwrap();
        redirector.restore_defaults().unwrap();
        redirector.restore_defaults().unwrap();
    }
}
