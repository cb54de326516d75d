// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! fork/exec of one child with captured output and pre-connected endpoints.
//!
//! Everything the child needs (argv/envp arrays, socket addresses, the list
//! of descriptors to drop) is built before fork. Between fork and exec the
//! child only issues syscalls; any failure there becomes its exit status,
//! which the parent observes when the record is retired.
//!
//! Port `i` of the request is always descriptor `3 + i` in the child.

use std::convert::Infallible;
use std::mem;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, IntoRawFd, RawFd};

use crate::config::RelayConfig;
use crate::pid_message::PidMessage;
use crate::poll_set::PollSet;
use crate::process::{ProcessRecord, kill_and_reap};
use crate::request::{LaunchPlan, Protocol, SpawnRequest};
use crate::status::{self, Family, Status};
use crate::sys::{self, Pid, Pipe, cvt};
use crate::table::ProcessTable;

/// First descriptor number handed to endpoints.
pub const FIRST_ENDPOINT_FD: RawFd = 3;

/// A connect(2) target resolved before fork.
enum Endpoint {
    Inet(libc::sockaddr_in),
    Local(libc::sockaddr_un),
}

impl Endpoint {
    fn loopback(port: u16) -> Self {
        // SAFETY: sockaddr_in is plain old data; all-zero is a valid value.
        let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
        addr.sin_family = libc::AF_INET as libc::sa_family_t;
        addr.sin_port = port.to_be();
        addr.sin_addr.s_addr = u32::from(Ipv4Addr::LOCALHOST).to_be();
        Self::Inet(addr)
    }

    /// `<path><port>`; the caller has already checked that it fits.
    fn local(path: &[u8], port: u32) -> Self {
        // SAFETY: sockaddr_un is plain old data; all-zero is a valid value.
        let mut addr: libc::sockaddr_un = unsafe { mem::zeroed() };
        addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
        let full = [path, port.to_string().as_bytes()].concat();
        for (dst, &src) in addr.sun_path.iter_mut().zip(full.iter()) {
            *dst = src as libc::c_char;
        }
        Self::Local(addr)
    }

    fn as_raw(&self) -> (*const libc::sockaddr, libc::socklen_t) {
        match self {
            Self::Inet(addr) => (
                (addr as *const libc::sockaddr_in).cast(),
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            ),
            Self::Local(addr) => (
                (addr as *const libc::sockaddr_un).cast(),
                mem::size_of::<libc::sockaddr_un>() as libc::socklen_t,
            ),
        }
    }
}

fn endpoints(plan: &LaunchPlan) -> Vec<Endpoint> {
    plan.ports
        .iter()
        .map(|&port| match plan.protocol {
            // Range-checked by LaunchPlan.
            Protocol::Tcp | Protocol::Udp => Endpoint::loopback(port as u16),
            Protocol::Local => Endpoint::local(&plan.socket_path, port),
        })
        .collect()
}

/// Launch `request` and register the new child.
///
/// On success the child is running, the poll set holds two new slots for its
/// stdout/stderr pipes and `table` holds its record. Validation failures
/// return `invalid_input` before any syscall; pipe and fork failures are
/// returned with no child created.
pub fn spawn(
    request: &SpawnRequest,
    poll: &mut PollSet,
    table: &mut ProcessTable,
    config: &RelayConfig,
) -> Result<Pid, Status> {
    let plan = LaunchPlan::new(request)?;
    let endpoints = endpoints(&plan);
    let inherited = poll.tracked_fds();

    let stdout = Pipe::new()?;
    let stderr = Pipe::new()?;

    // SAFETY: the relay is single-threaded; the child branch below only
    // performs syscalls on data prepared above and ends in exec or _exit.
    let pid = unsafe { libc::fork() };
    if pid == -1 {
        return Err(status::last_os_error(Family::Fork));
    }
    if pid == 0 {
        let Err(status) = run_child(&plan, &endpoints, &inherited, &stdout, &stderr);
        // SAFETY: _exit never returns and skips the parent's destructors.
        unsafe { libc::_exit(status.code()) }
    }

    let Pipe { read: stdout_r, write: stdout_w } = stdout;
    let Pipe { read: stderr_r, write: stderr_w } = stderr;
    for fd in [stdout_w, stderr_w] {
        if let Err(status) = sys::close(fd.into_raw_fd()) {
            tracing::error!("[Spawner] closing write end for {} failed: {}", pid, status);
            kill_and_reap(pid);
            return Err(status);
        }
    }

    let slots = poll.push_pair(stdout_r.as_raw_fd(), stderr_r.as_raw_fd());
    table.push(ProcessRecord::new(
        pid,
        slots,
        stdout_r,
        stderr_r,
        config.stream_buffer_bytes,
    ));
    tracing::debug!(
        "[Spawner] {} started as {} with {} endpoint(s)",
        plan.filename().to_string_lossy(),
        pid,
        plan.ports.len()
    );
    Ok(pid)
}

/// The child side of fork. Only returns on failure.
fn run_child(
    plan: &LaunchPlan,
    endpoints: &[Endpoint],
    inherited: &[RawFd],
    stdout: &Pipe,
    stderr: &Pipe,
) -> Result<Infallible, Status> {
    for &fd in inherited {
        sys::close(fd)?;
    }
    sys::move_fd(stdout.write.as_raw_fd(), libc::STDOUT_FILENO)?;
    sys::close(stdout.read.as_raw_fd())?;
    sys::move_fd(stderr.write.as_raw_fd(), libc::STDERR_FILENO)?;
    sys::close(stderr.read.as_raw_fd())?;

    // SAFETY: getpid cannot fail.
    let pid = unsafe { libc::getpid() };
    let announcement = PidMessage::encode(pid as u64, plan.protocol.uses_length_header());

    for (i, endpoint) in endpoints.iter().enumerate() {
        let fd = connect_endpoint(plan.protocol, endpoint, FIRST_ENDPOINT_FD + i as RawFd)?;
        if i == 0 {
            sys::write_all(fd, announcement.as_bytes())?;
        }
    }

    // SAFETY: restoring the default disposition is always valid.
    unsafe { libc::signal(libc::SIGPIPE, libc::SIG_DFL) };

    // SAFETY: every pointer array is null-terminated and points into
    // CStrings owned by `plan`.
    unsafe {
        libc::execve(
            plan.filename().as_ptr(),
            plan.argv().as_ptr(),
            plan.envp().as_ptr(),
        )
    };
    Err(status::last_os_error(Family::Exec))
}

/// Open a socket for `protocol`, pin it to `target` and connect it.
fn connect_endpoint(protocol: Protocol, endpoint: &Endpoint, target: RawFd) -> Result<RawFd, Status> {
    // SAFETY: socket(2) has no memory-safety implications.
    let fd = cvt(
        unsafe { libc::socket(protocol.domain(), protocol.socket_type(), 0) },
        Family::Socket,
    )?;
    if protocol == Protocol::Tcp {
        let enable: libc::c_int = 1;
        // SAFETY: the option value points at a live c_int of the given size.
        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::IPPROTO_TCP,
                libc::TCP_NODELAY,
                (&enable as *const libc::c_int).cast(),
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if ret == -1 {
            return Err(Status::SOCKET_UNKNOWN);
        }
    }
    sys::move_fd(fd, target)?;

    let (addr, len) = endpoint.as_raw();
    // SAFETY: `addr` points at a fully initialised sockaddr of length `len`.
    cvt(unsafe { libc::connect(target, addr, len) }, Family::Connect)?;
    Ok(target)
}
