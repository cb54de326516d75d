// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Thin errno-checked wrappers over the raw syscalls the relay needs.
//!
//! Every wrapper reports failure as a [`Status`] from the matching syscall
//! family. Descriptors the parent owns are [`OwnedFd`]s so they are closed on
//! every early-return path; the functions that take a [`RawFd`] are the ones
//! the forked child calls on descriptors it manages by number.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::status::{self, Family, Status};

pub type Pid = libc::pid_t;

/// Check a `-1`-on-error return value.
pub fn cvt(ret: libc::c_int, family: Family) -> Result<libc::c_int, Status> {
    if ret == -1 {
        Err(status::last_os_error(family))
    } else {
        Ok(ret)
    }
}

/// Both ends of a unidirectional pipe.
#[derive(Debug)]
pub struct Pipe {
    pub read: OwnedFd,
    pub write: OwnedFd,
}

impl Pipe {
    /// Both ends are close-on-exec, so a sibling child that execs never
    /// inherits them. Redirecting an end onto 1 or 2 clears the flag.
    pub fn new() -> Result<Self, Status> {
        let mut fds = [-1 as libc::c_int; 2];
        pipe_cloexec(&mut fds)?;
        // SAFETY: pipe(2) succeeded, so both descriptors are open and ours.
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        Ok(Self { read, write })
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn pipe_cloexec(fds: &mut [libc::c_int; 2]) -> Result<(), Status> {
    // SAFETY: `fds` has room for the two descriptors pipe2(2) writes.
    cvt(unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) }, Family::Pipe).map(drop)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn pipe_cloexec(fds: &mut [libc::c_int; 2]) -> Result<(), Status> {
    // SAFETY: `fds` has room for the two descriptors pipe(2) writes.
    cvt(unsafe { libc::pipe(fds.as_mut_ptr()) }, Family::Pipe)?;
    for &fd in fds.iter() {
        // SAFETY: F_SETFD only touches the descriptor flags of our own pipe.
        let ret = unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) };
        if let Err(status) = cvt(ret, Family::Pipe) {
            for &fd in fds.iter() {
                // SAFETY: both ends were just created here and are not shared.
                unsafe { libc::close(fd) };
            }
            return Err(status);
        }
    }
    Ok(())
}

/// Close a descriptor by number.
pub fn close(fd: RawFd) -> Result<(), Status> {
    // SAFETY: closing a number has no memory-safety implications; callers
    // only pass descriptors they are responsible for.
    cvt(unsafe { libc::close(fd) }, Family::Close).map(drop)
}

/// Make `target` refer to what `fd` refers to, then close `fd`.
///
/// A no-op when the two numbers already match.
pub fn move_fd(fd: RawFd, target: RawFd) -> Result<(), Status> {
    if fd == target {
        return Ok(());
    }
    // SAFETY: dup2 only manipulates the descriptor table.
    cvt(unsafe { libc::dup2(fd, target) }, Family::Dup)?;
    close(fd)
}

/// One read(2) into `buf`. `Ok(0)` is end-of-file.
pub fn read(fd: &OwnedFd, buf: &mut [u8]) -> Result<usize, Status> {
    // SAFETY: `buf` is valid for `buf.len()` writable bytes.
    let n = unsafe { libc::read(fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
    if n < 0 {
        return Err(status::last_os_error(Family::Read));
    }
    Ok(n as usize)
}

/// Write all of `buf`, retrying on short writes.
pub fn write_all(fd: RawFd, mut buf: &[u8]) -> Result<(), Status> {
    while !buf.is_empty() {
        // SAFETY: `buf` is valid for `buf.len()` readable bytes.
        let n = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
        if n < 0 {
            return Err(status::last_os_error(Family::Write));
        }
        if n == 0 {
            return Err(Status::WRITE_NULL);
        }
        buf = &buf[n as usize..];
    }
    Ok(())
}

/// Send SIGKILL to `pid`. ESRCH is not an error: the process may already be
/// a zombie waiting to be reaped.
pub fn kill(pid: Pid) {
    // SAFETY: kill(2) has no memory-safety implications.
    let ret = unsafe { libc::kill(pid, libc::SIGKILL) };
    if ret == -1 {
        tracing::debug!("[Sys] kill({}) failed: {}", pid, std::io::Error::last_os_error());
    }
}

/// Block until `pid` terminates and translate its wait status.
///
/// Normal exit yields the exit code; death by signal yields
/// `128 + signal`.
pub fn waitpid(pid: Pid) -> Result<Status, Status> {
    let mut raw: libc::c_int = 0;
    loop {
        // SAFETY: `raw` is a valid out-pointer for the wait status.
        let ret = unsafe { libc::waitpid(pid, &mut raw, 0) };
        if ret == pid {
            break;
        }
        let err = status::last_os_error(Family::Waitpid);
        if err != Status::WAITPID_EINTR {
            return Err(err);
        }
    }
    if libc::WIFEXITED(raw) {
        Ok(Status::from_code(libc::WEXITSTATUS(raw)))
    } else if libc::WIFSIGNALED(raw) {
        Ok(Status::from_signal(libc::WTERMSIG(raw)))
    } else {
        Ok(Status::WAITPID_UNKNOWN)
    }
}

/// Whether `fd` is an open descriptor.
pub fn is_open(fd: RawFd) -> bool {
    // SAFETY: F_GETFD only inspects the descriptor table.
    unsafe { libc::fcntl(fd, libc::F_GETFD) != -1 }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use tracing_subscriber::fmt::MakeWriter;

    use super::Pid;

    /// Log sink for asserting on what a closure logged.
    #[derive(Clone, Default)]
    pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        /// Run `f` with every event on this thread formatted into the buffer.
        pub fn capture<T>(&self, f: impl FnOnce() -> T) -> T {
            let subscriber = tracing_subscriber::fmt()
                .with_writer(self.clone())
                .with_ansi(false)
                .with_max_level(tracing::Level::DEBUG)
                .finish();
            tracing::subscriber::with_default(subscriber, f)
        }

        pub fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    /// Fork a child that drops every inherited descriptor and waits to be
    /// killed, so a record under test has a real pid to reap.
    pub fn sleeper() -> Pid {
        // SAFETY: the child only calls async-signal-safe functions.
        let pid = unsafe { libc::fork() };
        assert!(pid >= 0, "fork failed");
        if pid == 0 {
            unsafe {
                for fd in 3..1024 {
                    libc::close(fd);
                }
                libc::pause();
                libc::_exit(0);
            }
        }
        pid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_pipe_round_trip() {
        let pipe = Pipe::new().unwrap();
        write_all(pipe.write.as_raw_fd(), b"abc").unwrap();
        let mut buf = [0u8; 8];
        let n = read(&pipe.read, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"abc");
    }

    #[test]
    #[serial]
    fn test_read_reports_eof_after_writer_closes() {
        let Pipe { read: reader, write } = Pipe::new().unwrap();
        drop(write);
        let mut buf = [0u8; 8];
        assert_eq!(read(&reader, &mut buf).unwrap(), 0);
    }

    #[test]
    #[serial]
    fn test_write_to_closed_pipe_maps_to_write_family() {
        let Pipe { read: reader, write } = Pipe::new().unwrap();
        drop(reader);
        // Rust binaries (and the test harness) run with SIGPIPE ignored.
        assert_eq!(write_all(write.as_raw_fd(), b"x"), Err(Status::WRITE_EPIPE));
    }

    #[test]
    #[serial]
    fn test_pipe_ends_are_close_on_exec() {
        let pipe = Pipe::new().unwrap();
        for fd in [pipe.read.as_raw_fd(), pipe.write.as_raw_fd()] {
            // SAFETY: F_GETFD only inspects the descriptor table.
            let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
            assert_eq!(flags & libc::FD_CLOEXEC, libc::FD_CLOEXEC);
        }
    }

    #[test]
    fn test_close_bad_descriptor() {
        assert_eq!(close(-1), Err(Status::CLOSE_EBADF));
    }

    #[test]
    #[serial]
    fn test_move_fd_same_number_is_noop() {
        let pipe = Pipe::new().unwrap();
        let fd = pipe.read.as_raw_fd();
        move_fd(fd, fd).unwrap();
        assert!(is_open(fd));
    }

    #[test]
    fn test_waitpid_without_child() {
        assert_eq!(waitpid(i32::MAX), Err(Status::WAITPID_ECHILD));
    }
}
