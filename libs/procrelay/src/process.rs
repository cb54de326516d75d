// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! One live child: its pid, its two poll slots and the accumulators for its
//! captured stdout/stderr.

use std::os::fd::{IntoRawFd, OwnedFd};

use serde::{Deserialize, Serialize};

use crate::host::Relay;
use crate::poll_set::PollSet;
use crate::status::Status;
use crate::sys::{self, Pid};

/// Largest single read(2) from a child pipe.
const READ_CHUNK: usize = 4096;

/// Which captured stream a chunk of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Outcome of draining a record's pending events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drained {
    /// At least one stream is still open.
    Open,
    /// Both streams reached end-of-file; the record should be retired.
    Hangup,
}

/// Bytes read from one stream that have not been relayed yet.
///
/// `pending.len()` is the read cursor: the next read appends there.
#[derive(Debug)]
struct StreamBuffer {
    pending: Vec<u8>,
    limit: usize,
    closed: bool,
}

impl StreamBuffer {
    fn new(limit: usize) -> Self {
        Self {
            pending: Vec::new(),
            limit: limit.max(1),
            closed: false,
        }
    }

    /// One read from `fd`. Returns the byte count, `0` at end-of-file.
    fn fill(&mut self, fd: &OwnedFd) -> Result<usize, Status> {
        let start = self.pending.len();
        let room = (self.limit - start).min(READ_CHUNK);
        self.pending.resize(start + room, 0);
        match sys::read(fd, &mut self.pending[start..]) {
            Ok(n) => {
                self.pending.truncate(start + n);
                Ok(n)
            }
            Err(status) => {
                self.pending.truncate(start);
                Err(status)
            }
        }
    }

    /// Relay every complete line, or everything once the buffer is full.
    fn relay_complete<R: Relay + ?Sized>(
        &mut self,
        pid: Pid,
        kind: StreamKind,
        relay: &mut R,
    ) -> Result<(), Status> {
        let end = match self.pending.iter().rposition(|&b| b == b'\n') {
            Some(newline) => newline + 1,
            None if self.pending.len() >= self.limit => self.pending.len(),
            None => return Ok(()),
        };
        relay.relay(pid, kind, &self.pending[..end])?;
        self.pending.drain(..end);
        Ok(())
    }

    fn relay_rest<R: Relay + ?Sized>(
        &mut self,
        pid: Pid,
        kind: StreamKind,
        relay: &mut R,
    ) -> Result<(), Status> {
        if self.pending.is_empty() {
            return Ok(());
        }
        relay.relay(pid, kind, &self.pending)?;
        self.pending.clear();
        Ok(())
    }
}

/// A live child process and the resources attached to it.
///
/// Dropping the record kills the child and waits for it, so no child
/// outlives its record and no zombie is left behind.
#[derive(Debug)]
pub struct ProcessRecord {
    pid: Pid,
    stdout_slot: usize,
    stderr_slot: usize,
    stdout_fd: Option<OwnedFd>,
    stderr_fd: Option<OwnedFd>,
    stdout: StreamBuffer,
    stderr: StreamBuffer,
    exit: Option<Status>,
}

impl ProcessRecord {
    /// Take ownership of a freshly forked child whose pipe read ends sit at
    /// `slots` (`stdout`, `stderr`) in the poll set.
    pub fn new(
        pid: Pid,
        slots: (usize, usize),
        stdout_fd: OwnedFd,
        stderr_fd: OwnedFd,
        buffer_limit: usize,
    ) -> Self {
        Self {
            pid,
            stdout_slot: slots.0,
            stderr_slot: slots.1,
            stdout_fd: Some(stdout_fd),
            stderr_fd: Some(stderr_fd),
            stdout: StreamBuffer::new(buffer_limit),
            stderr: StreamBuffer::new(buffer_limit),
            exit: None,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// `(stdout, stderr)` slot indices.
    pub fn slots(&self) -> (usize, usize) {
        (self.stdout_slot, self.stderr_slot)
    }

    pub fn is_closed(&self, kind: StreamKind) -> bool {
        match kind {
            StreamKind::Stdout => self.stdout.closed,
            StreamKind::Stderr => self.stderr.closed,
        }
    }

    /// Exit status, once the child has been reaped.
    pub fn exit_status(&self) -> Option<Status> {
        self.exit
    }

    /// Consume pending events, stderr first, relaying complete lines.
    ///
    /// Each stream with events costs one unit of `budget`; nothing is done
    /// once it reaches zero.
    pub fn check<R: Relay + ?Sized>(
        &mut self,
        budget: &mut usize,
        poll: &mut PollSet,
        relay: &mut R,
    ) -> Result<Drained, Status> {
        for kind in [StreamKind::Stderr, StreamKind::Stdout] {
            if self.take_event(kind, budget, poll)? {
                self.consume(kind, poll, relay)?;
            }
        }
        Ok(self.drained())
    }

    /// Final drain before retirement: one last read on any stream that still
    /// has events, then everything buffered goes upstream.
    pub fn flush<R: Relay + ?Sized>(
        &mut self,
        budget: &mut usize,
        poll: &mut PollSet,
        relay: &mut R,
    ) -> Result<(), Status> {
        for kind in [StreamKind::Stderr, StreamKind::Stdout] {
            if self.take_event(kind, budget, poll)? {
                self.consume(kind, poll, relay)?;
            }
        }
        let pid = self.pid;
        self.stderr.relay_rest(pid, StreamKind::Stderr, relay)?;
        self.stdout.relay_rest(pid, StreamKind::Stdout, relay)
    }

    /// Close both pipe read ends.
    pub fn close(&mut self) {
        for fd in [self.stdout_fd.take(), self.stderr_fd.take()].into_iter().flatten() {
            if let Err(status) = sys::close(fd.into_raw_fd()) {
                tracing::warn!("[ProcessRecord] closing pipe of {} failed: {}", self.pid, status);
            }
        }
    }

    /// Account for the pair before this record being removed from the poll
    /// set: both slots move down by two.
    pub fn shift_down(&mut self) {
        self.stdout_slot -= 2;
        self.stderr_slot -= 2;
    }

    /// Kill the child and wait for it. Idempotent: only the first call
    /// signals and reaps, later calls return the stored status.
    ///
    /// A non-zero status is logged as `<pid> exited with <status>`.
    pub fn reap(&mut self) -> Status {
        if let Some(status) = self.exit {
            return status;
        }
        let status = kill_and_reap(self.pid);
        self.exit = Some(status);
        status
    }

    /// Whether `kind` has an event this wake that fits in the budget. Error
    /// conditions on the slot are fatal.
    fn take_event(
        &self,
        kind: StreamKind,
        budget: &mut usize,
        poll: &PollSet,
    ) -> Result<bool, Status> {
        let slot = self.slot(kind);
        if *budget == 0 || self.is_closed(kind) {
            return Ok(false);
        }
        let revents = poll.revents(slot);
        if revents == 0 {
            return Ok(false);
        }
        *budget -= 1;
        if revents & libc::POLLNVAL != 0 {
            return Err(Status::POLL_NVAL);
        }
        if revents & libc::POLLERR != 0 {
            return Err(Status::POLL_ERR);
        }
        Ok(true)
    }

    fn consume<R: Relay + ?Sized>(
        &mut self,
        kind: StreamKind,
        poll: &mut PollSet,
        relay: &mut R,
    ) -> Result<(), Status> {
        let pid = self.pid;
        let slot = self.slot(kind);
        let (fd, stream) = match kind {
            StreamKind::Stdout => (&self.stdout_fd, &mut self.stdout),
            StreamKind::Stderr => (&self.stderr_fd, &mut self.stderr),
        };
        let Some(fd) = fd else {
            return Err(Status::READ_EBADF);
        };
        if stream.fill(fd)? == 0 {
            tracing::debug!("[ProcessRecord] {} closed {}", pid, kind.as_str());
            stream.closed = true;
            poll.disable(slot);
            return Ok(());
        }
        stream.relay_complete(pid, kind, relay)
    }

    fn drained(&self) -> Drained {
        if self.stdout.closed && self.stderr.closed {
            Drained::Hangup
        } else {
            Drained::Open
        }
    }

    fn slot(&self, kind: StreamKind) -> usize {
        match kind {
            StreamKind::Stdout => self.stdout_slot,
            StreamKind::Stderr => self.stderr_slot,
        }
    }
}

/// SIGKILL `pid` and wait for it, logging `<pid> exited with <status>` for a
/// non-zero status. A failed wait is returned as its own status.
pub(crate) fn kill_and_reap(pid: Pid) -> Status {
    sys::kill(pid);
    let status = match sys::waitpid(pid) {
        Ok(status) => status,
        Err(status) => {
            tracing::error!("[ProcessRecord] waitpid({}) failed: {}", pid, status);
            status
        }
    };
    if !status.is_success() {
        tracing::error!("{} exited with {}", pid, status);
    }
    status
}

impl Drop for ProcessRecord {
    fn drop(&mut self) {
        self.close();
        self.reap();
    }
}
