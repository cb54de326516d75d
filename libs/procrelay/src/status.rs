// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Flat status-code space shared by spawn failures, child exit statuses and
//! the host channel's own exit statuses.
//!
//! The values cross a process boundary (they are child exit codes and the
//! relay's own exit code), so every constant here is part of the contract
//! with the upstream controller and must never be renumbered.
//!
//! Layout:
//!
//! | Range      | Meaning                                                       |
//! |------------|---------------------------------------------------------------|
//! | `0`        | success                                                       |
//! | `11..=12`  | internal (`invalid_input`, `out_of_memory`)                   |
//! | `13..=77`  | spawn syscall families (pipe, fork, socket, dup, close, waitpid, connect, exec) |
//! | `78..=124` | host channel (read, write, encode, poll, pipe, dup, close)    |
//! | `129..=159`| `128 + signal_number` for children killed by a signal         |
//!
//! Each syscall family ends in an `*_unknown` catch-all so every errno has a
//! representation.
//!
//! Signal numbers differ between platforms, so several signals alias the same
//! code (138 is `SIGUSR1` on Linux and `SIGBUS` on the BSDs). The rendered
//! names list every alias instead of guessing the platform of the child.

use std::fmt;

/// Syscall family used to pick the sub-range an errno maps into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Pipe,
    Fork,
    Socket,
    Dup,
    Close,
    Waitpid,
    Connect,
    Exec,
    Read,
    Write,
    Poll,
}

/// A value from the flat status-code space.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Status(i32);

macro_rules! status_codes {
    ($($name:ident = $code:literal => $label:literal,)*) => {
        impl Status {
            $(pub const $name: Status = Status($code);)*
        }

        fn named(code: i32) -> Option<&'static str> {
            match code {
                $($code => Some($label),)*
                _ => None,
            }
        }

        #[cfg(test)]
        const ALL_NAMED: &[Status] = &[$(Status::$name,)*];
    };
}

status_codes! {
    INVALID_INPUT = 11 => "invalid_input",
    OUT_OF_MEMORY = 12 => "out_of_memory",

    PIPE_EFAULT = 13 => "pipe_EFAULT",
    PIPE_EINVAL = 14 => "pipe_EINVAL",
    PIPE_EMFILE = 15 => "pipe_EMFILE",
    PIPE_ENFILE = 16 => "pipe_ENFILE",
    PIPE_UNKNOWN = 17 => "pipe_unknown",

    FORK_EAGAIN = 18 => "fork_EAGAIN",
    FORK_ENOMEM = 19 => "fork_ENOMEM",
    FORK_UNKNOWN = 20 => "fork_unknown",

    SOCKET_EACCES = 21 => "socket_EACCES",
    SOCKET_EAFNOSUPPORT = 22 => "socket_EAFNOSUPPORT",
    SOCKET_EINVAL = 23 => "socket_EINVAL",
    SOCKET_EMFILE = 24 => "socket_EMFILE",
    SOCKET_ENFILE = 25 => "socket_ENFILE",
    SOCKET_ENOBUFS = 26 => "socket_ENOBUFS",
    SOCKET_ENOMEM = 27 => "socket_ENOMEM",
    SOCKET_EPROTONOSUPPORT = 28 => "socket_EPROTONOSUPPORT",
    SOCKET_UNKNOWN = 29 => "socket_unknown",

    DUP_EBADF = 30 => "dup_EBADF",
    DUP_EBUSY = 31 => "dup_EBUSY",
    DUP_EINTR = 32 => "dup_EINTR",
    DUP_EINVAL = 33 => "dup_EINVAL",
    DUP_EMFILE = 34 => "dup_EMFILE",
    DUP_UNKNOWN = 35 => "dup_unknown",

    CLOSE_EBADF = 36 => "close_EBADF",
    CLOSE_EINTR = 37 => "close_EINTR",
    CLOSE_EIO = 38 => "close_EIO",
    CLOSE_UNKNOWN = 39 => "close_unknown",

    WAITPID_ECHILD = 40 => "waitpid_ECHILD",
    WAITPID_EINTR = 41 => "waitpid_EINTR",
    WAITPID_EINVAL = 42 => "waitpid_EINVAL",
    WAITPID_UNKNOWN = 43 => "waitpid_unknown",

    CONNECT_EACCES = 44 => "connect_EACCES",
    CONNECT_EPERM = 45 => "connect_EPERM",
    CONNECT_EADDRINUSE = 46 => "connect_EADDRINUSE",
    CONNECT_EAFNOSUPPORT = 47 => "connect_EAFNOSUPPORT",
    CONNECT_EAGAIN = 48 => "connect_EAGAIN",
    CONNECT_EALREADY = 49 => "connect_EALREADY",
    CONNECT_EBADF = 50 => "connect_EBADF",
    CONNECT_ECONNREFUSED = 51 => "connect_ECONNREFUSED",
    CONNECT_EFAULT = 52 => "connect_EFAULT",
    CONNECT_EINPROGRESS = 53 => "connect_EINPROGRESS",
    CONNECT_EINTR = 54 => "connect_EINTR",
    CONNECT_EISCONN = 55 => "connect_EISCONN",
    CONNECT_ENETUNREACH = 56 => "connect_ENETUNREACH",
    CONNECT_ENOTSOCK = 57 => "connect_ENOTSOCK",
    CONNECT_ETIMEDOUT = 58 => "connect_ETIMEDOUT",
    CONNECT_UNKNOWN = 59 => "connect_unknown",

    EXEC_E2BIG = 60 => "exec_E2BIG",
    EXEC_EACCES = 61 => "exec_EACCES",
    EXEC_EFAULT = 62 => "exec_EFAULT",
    EXEC_EINVAL = 63 => "exec_EINVAL",
    EXEC_EIO = 64 => "exec_EIO",
    EXEC_EISDIR = 65 => "exec_EISDIR",
    EXEC_ELIBBAD = 66 => "exec_ELIBBAD",
    EXEC_ELOOP = 67 => "exec_ELOOP",
    EXEC_EMFILE = 68 => "exec_EMFILE",
    EXEC_ENAMETOOLONG = 69 => "exec_ENAMETOOLONG",
    EXEC_ENFILE = 70 => "exec_ENFILE",
    EXEC_ENOENT = 71 => "exec_ENOENT",
    EXEC_ENOEXEC = 72 => "exec_ENOEXEC",
    EXEC_ENOMEM = 73 => "exec_ENOMEM",
    EXEC_ENOTDIR = 74 => "exec_ENOTDIR",
    EXEC_EPERM = 75 => "exec_EPERM",
    EXEC_ETXTBSY = 76 => "exec_ETXTBSY",
    EXEC_UNKNOWN = 77 => "exec_unknown",

    // host channel sub-range
    READ_EAGAIN = 78 => "read_EAGAIN",
    READ_EBADF = 79 => "read_EBADF",
    READ_EFAULT = 80 => "read_EFAULT",
    READ_EINTR = 81 => "read_EINTR",
    READ_EINVAL = 82 => "read_EINVAL",
    READ_EIO = 83 => "read_EIO",
    READ_EISDIR = 84 => "read_EISDIR",
    READ_NULL = 85 => "read_null",
    READ_OVERFLOW = 86 => "read_overflow",
    READ_UNKNOWN = 87 => "read_unknown",

    WRITE_EAGAIN = 88 => "write_EAGAIN",
    WRITE_EBADF = 89 => "write_EBADF",
    WRITE_EFAULT = 90 => "write_EFAULT",
    WRITE_EFBIG = 91 => "write_EFBIG",
    WRITE_EINTR = 92 => "write_EINTR",
    WRITE_EINVAL = 93 => "write_EINVAL",
    WRITE_EIO = 94 => "write_EIO",
    WRITE_ENOSPC = 95 => "write_ENOSPC",
    WRITE_EPIPE = 96 => "write_EPIPE",
    WRITE_NULL = 97 => "write_null",
    WRITE_OVERFLOW = 98 => "write_overflow",
    WRITE_UNKNOWN = 99 => "write_unknown",

    ENCODE_ERROR = 100 => "ei_encode_error",

    POLL_EBADF = 101 => "poll_EBADF",
    POLL_EFAULT = 102 => "poll_EFAULT",
    POLL_EINTR = 103 => "poll_EINTR",
    POLL_EINVAL = 104 => "poll_EINVAL",
    POLL_ENOMEM = 105 => "poll_ENOMEM",
    POLL_ERR = 106 => "poll_ERR",
    POLL_HUP = 107 => "poll_HUP",
    POLL_NVAL = 108 => "poll_NVAL",
    POLL_UNKNOWN = 109 => "poll_unknown",

    HOST_PIPE_EFAULT = 110 => "pipe_EFAULT",
    HOST_PIPE_EINVAL = 111 => "pipe_EINVAL",
    HOST_PIPE_EMFILE = 112 => "pipe_EMFILE",
    HOST_PIPE_ENFILE = 113 => "pipe_ENFILE",
    HOST_PIPE_UNKNOWN = 114 => "pipe_unknown",

    HOST_DUP_EBADF = 115 => "dup_EBADF",
    HOST_DUP_EBUSY = 116 => "dup_EBUSY",
    HOST_DUP_EINTR = 117 => "dup_EINTR",
    HOST_DUP_EINVAL = 118 => "dup_EINVAL",
    HOST_DUP_EMFILE = 119 => "dup_EMFILE",
    HOST_DUP_UNKNOWN = 120 => "dup_unknown",

    HOST_CLOSE_EBADF = 121 => "close_EBADF",
    HOST_CLOSE_EINTR = 122 => "close_EINTR",
    HOST_CLOSE_EIO = 123 => "close_EIO",
    HOST_CLOSE_UNKNOWN = 124 => "close_unknown",

    // 128 + signal number; aliases are listed for every platform
    SIGHUP = 129 => "SIGHUP",
    SIGINT = 130 => "SIGINT",
    SIGQUIT = 131 => "SIGQUIT",
    SIGILL = 132 => "SIGILL",
    SIGTRAP = 133 => "SIGTRAP",
    SIGABRT = 134 => "SIGABRT",
    SIG_135 = 135 => "SIGBUS/SIGEMT",
    SIGFPE = 136 => "SIGFPE",
    SIGKILL = 137 => "SIGKILL",
    SIG_138 = 138 => "SIGUSR1/SIGBUS",
    SIGSEGV = 139 => "SIGSEGV",
    SIG_140 = 140 => "SIGUSR2/SIGSYS",
    SIGPIPE = 141 => "SIGPIPE",
    SIGALRM = 142 => "SIGALRM",
    SIGTERM = 143 => "SIGTERM",
    SIG_144 = 144 => "SIGUSR1/SIGURG",
    SIG_145 = 145 => "SIGUSR2/SIGCHLD/SIGSTOP",
    SIG_146 = 146 => "SIGCHLD/SIGCONT/SIGTSTP",
    SIG_147 = 147 => "SIGCONT/SIGSTOP/SIGPWR",
    SIG_148 = 148 => "SIGCHLD/SIGTSTP/SIGWINCH",
    SIG_149 = 149 => "SIGTTIN/SIGURG",
    SIG_150 = 150 => "SIGTTOU/SIGIO",
    SIG_151 = 151 => "SIGSTOP/SIGURG/SIGIO",
    SIG_152 = 152 => "SIGTSTP/SIGXCPU",
    SIG_153 = 153 => "SIGCONT/SIGXFSZ",
    SIG_154 = 154 => "SIGTTIN/SIGVTALRM",
    SIG_155 = 155 => "SIGTTOU/SIGPROF",
    SIG_156 = 156 => "SIGVTALRM/SIGWINCH",
    SIG_157 = 157 => "SIGPROF/SIGIO/SIGPWR",
    SIG_158 = 158 => "SIGUSR1/SIGXCPU/SIGPWR",
    SIG_159 = 159 => "SIGUSR2/SIGXFSZ/SIGSYS",
}

impl Status {
    pub const SUCCESS: Status = Status(0);

    /// First code of the host channel sub-range.
    pub const HOST_MIN: i32 = 78;

    /// Offset added to a signal number for children killed by a signal.
    pub const SIGNAL_BASE: i32 = 128;

    pub const fn from_code(code: i32) -> Self {
        Status(code)
    }

    /// Status for a child terminated by `signal`.
    pub const fn from_signal(signal: i32) -> Self {
        Status(Self::SIGNAL_BASE + signal)
    }

    pub const fn code(self) -> i32 {
        self.0
    }

    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    /// Value to hand to `exit`/`_exit`. Every defined code fits in a byte.
    pub fn exit_code(self) -> u8 {
        u8::try_from(self.0).unwrap_or(u8::MAX)
    }

    /// Stable display name, or `None` when the code has no rendering.
    pub fn name(self) -> Option<&'static str> {
        render(self.0)
    }
}

/// Stable display name for `code`.
///
/// Returns `None` for values outside the defined space (including `0`);
/// callers print the raw integer instead.
pub fn render(code: i32) -> Option<&'static str> {
    named(code)
}

/// Map an errno value into `family`'s sub-range.
pub fn map_errno(family: Family, errno: i32) -> Status {
    match family {
        Family::Pipe => match errno {
            libc::EFAULT => Status::PIPE_EFAULT,
            libc::EINVAL => Status::PIPE_EINVAL,
            libc::EMFILE => Status::PIPE_EMFILE,
            libc::ENFILE => Status::PIPE_ENFILE,
            _ => Status::PIPE_UNKNOWN,
        },
        Family::Fork => match errno {
            libc::EAGAIN => Status::FORK_EAGAIN,
            libc::ENOMEM => Status::FORK_ENOMEM,
            _ => Status::FORK_UNKNOWN,
        },
        Family::Socket => match errno {
            libc::EACCES => Status::SOCKET_EACCES,
            libc::EAFNOSUPPORT => Status::SOCKET_EAFNOSUPPORT,
            libc::EINVAL => Status::SOCKET_EINVAL,
            libc::EMFILE => Status::SOCKET_EMFILE,
            libc::ENFILE => Status::SOCKET_ENFILE,
            libc::ENOBUFS => Status::SOCKET_ENOBUFS,
            libc::ENOMEM => Status::SOCKET_ENOMEM,
            libc::EPROTONOSUPPORT => Status::SOCKET_EPROTONOSUPPORT,
            _ => Status::SOCKET_UNKNOWN,
        },
        Family::Dup => match errno {
            libc::EBADF => Status::DUP_EBADF,
            libc::EBUSY => Status::DUP_EBUSY,
            libc::EINTR => Status::DUP_EINTR,
            libc::EINVAL => Status::DUP_EINVAL,
            libc::EMFILE => Status::DUP_EMFILE,
            _ => Status::DUP_UNKNOWN,
        },
        Family::Close => match errno {
            libc::EBADF => Status::CLOSE_EBADF,
            libc::EINTR => Status::CLOSE_EINTR,
            libc::EIO => Status::CLOSE_EIO,
            _ => Status::CLOSE_UNKNOWN,
        },
        Family::Waitpid => match errno {
            libc::ECHILD => Status::WAITPID_ECHILD,
            libc::EINTR => Status::WAITPID_EINTR,
            libc::EINVAL => Status::WAITPID_EINVAL,
            _ => Status::WAITPID_UNKNOWN,
        },
        Family::Connect => map_connect(errno),
        Family::Exec => map_exec(errno),
        Family::Read => match errno {
            libc::EAGAIN => Status::READ_EAGAIN,
            libc::EBADF => Status::READ_EBADF,
            libc::EFAULT => Status::READ_EFAULT,
            libc::EINTR => Status::READ_EINTR,
            libc::EINVAL => Status::READ_EINVAL,
            libc::EIO => Status::READ_EIO,
            libc::EISDIR => Status::READ_EISDIR,
            _ => Status::READ_UNKNOWN,
        },
        Family::Write => match errno {
            libc::EAGAIN => Status::WRITE_EAGAIN,
            libc::EBADF => Status::WRITE_EBADF,
            libc::EFAULT => Status::WRITE_EFAULT,
            libc::EFBIG => Status::WRITE_EFBIG,
            libc::EINTR => Status::WRITE_EINTR,
            libc::EINVAL => Status::WRITE_EINVAL,
            libc::EIO => Status::WRITE_EIO,
            libc::ENOSPC => Status::WRITE_ENOSPC,
            libc::EPIPE => Status::WRITE_EPIPE,
            _ => Status::WRITE_UNKNOWN,
        },
        Family::Poll => match errno {
            libc::EBADF => Status::POLL_EBADF,
            libc::EFAULT => Status::POLL_EFAULT,
            libc::EINTR => Status::POLL_EINTR,
            libc::EINVAL => Status::POLL_EINVAL,
            libc::ENOMEM => Status::POLL_ENOMEM,
            _ => Status::POLL_UNKNOWN,
        },
    }
}

fn map_connect(errno: i32) -> Status {
    match errno {
        libc::EACCES => Status::CONNECT_EACCES,
        libc::EPERM => Status::CONNECT_EPERM,
        libc::EADDRINUSE => Status::CONNECT_EADDRINUSE,
        libc::EAFNOSUPPORT => Status::CONNECT_EAFNOSUPPORT,
        libc::EAGAIN => Status::CONNECT_EAGAIN,
        libc::EALREADY => Status::CONNECT_EALREADY,
        libc::EBADF => Status::CONNECT_EBADF,
        libc::ECONNREFUSED => Status::CONNECT_ECONNREFUSED,
        libc::EFAULT => Status::CONNECT_EFAULT,
        libc::EINPROGRESS => Status::CONNECT_EINPROGRESS,
        libc::EINTR => Status::CONNECT_EINTR,
        libc::EISCONN => Status::CONNECT_EISCONN,
        libc::ENETUNREACH => Status::CONNECT_ENETUNREACH,
        libc::ENOTSOCK => Status::CONNECT_ENOTSOCK,
        libc::ETIMEDOUT => Status::CONNECT_ETIMEDOUT,
        _ => Status::CONNECT_UNKNOWN,
    }
}

fn map_exec(errno: i32) -> Status {
    match errno {
        libc::E2BIG => Status::EXEC_E2BIG,
        libc::EACCES => Status::EXEC_EACCES,
        libc::EFAULT => Status::EXEC_EFAULT,
        libc::EINVAL => Status::EXEC_EINVAL,
        libc::EIO => Status::EXEC_EIO,
        libc::EISDIR => Status::EXEC_EISDIR,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        libc::ELIBBAD => Status::EXEC_ELIBBAD,
        libc::ELOOP => Status::EXEC_ELOOP,
        libc::EMFILE => Status::EXEC_EMFILE,
        libc::ENAMETOOLONG => Status::EXEC_ENAMETOOLONG,
        libc::ENFILE => Status::EXEC_ENFILE,
        libc::ENOENT => Status::EXEC_ENOENT,
        libc::ENOEXEC => Status::EXEC_ENOEXEC,
        libc::ENOMEM => Status::EXEC_ENOMEM,
        libc::ENOTDIR => Status::EXEC_ENOTDIR,
        libc::EPERM => Status::EXEC_EPERM,
        libc::ETXTBSY => Status::EXEC_ETXTBSY,
        _ => Status::EXEC_UNKNOWN,
    }
}

/// Map the calling thread's current errno into `family`'s sub-range.
pub fn last_os_error(family: Family) -> Status {
    let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
    map_errno(family, errno)
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{}", self.0),
        }
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Status({}", self.0)?;
        if let Some(name) = self.name() {
            write!(f, ", {name}")?;
        }
        f.write_str(")")
    }
}
