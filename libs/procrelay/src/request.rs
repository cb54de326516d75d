// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Spawn requests and their validation.
//!
//! A [`SpawnRequest`] is what the host channel decodes from upstream. Before
//! anything touches the OS it is turned into a [`LaunchPlan`], which owns the
//! NUL-terminated strings and the null-terminated pointer arrays `execve`
//! needs, so the forked child never allocates.

use std::ffi::{CStr, CString};

use serde::{Deserialize, Serialize};

use crate::status::Status;

/// Transport used for the child's endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// TCP to `127.0.0.1:port`, no-delay enabled.
    Tcp,
    /// UDP to `127.0.0.1:port`.
    Udp,
    /// Stream socket at `<socket_path><port>`.
    Local,
}

impl Protocol {
    /// Decode the single-byte selector: `t`, `u` or `l`.
    pub fn from_selector(selector: u8) -> Option<Self> {
        match selector {
            b't' => Some(Self::Tcp),
            b'u' => Some(Self::Udp),
            b'l' => Some(Self::Local),
            _ => None,
        }
    }

    pub fn selector(self) -> u8 {
        match self {
            Self::Tcp => b't',
            Self::Udp => b'u',
            Self::Local => b'l',
        }
    }

    pub(crate) fn domain(self) -> libc::c_int {
        match self {
            Self::Tcp | Self::Udp => libc::AF_INET,
            Self::Local => libc::AF_UNIX,
        }
    }

    pub(crate) fn socket_type(self) -> libc::c_int {
        match self {
            Self::Tcp | Self::Local => libc::SOCK_STREAM,
            Self::Udp => libc::SOCK_DGRAM,
        }
    }

    /// Stream transports get the 4-byte length prefix on the pid message.
    pub fn uses_length_header(self) -> bool {
        matches!(self, Self::Tcp | Self::Local)
    }
}

/// One request to launch a child process.
///
/// `argv` and `env` are blocks of NUL-terminated strings laid end to end. A
/// block holding a single NUL is empty. The executable path is always
/// `argv[0]` and is not repeated in the block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub protocol: u8,
    #[serde(with = "serde_bytes")]
    pub socket_path: Vec<u8>,
    pub ports: Vec<u32>,
    #[serde(with = "serde_bytes")]
    pub filename: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub argv: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub env: Vec<u8>,
}

impl SpawnRequest {
    pub fn new(protocol: Protocol, filename: impl Into<Vec<u8>>) -> Self {
        Self {
            protocol: protocol.selector(),
            socket_path: Vec::new(),
            ports: Vec::new(),
            filename: filename.into(),
            argv: vec![0],
            env: vec![0],
        }
    }

    pub fn with_socket_path(mut self, path: impl Into<Vec<u8>>) -> Self {
        self.socket_path = path.into();
        self
    }

    pub fn with_ports(mut self, ports: impl IntoIterator<Item = u32>) -> Self {
        self.ports = ports.into_iter().collect();
        self
    }

    /// Replace the argument block with `args`, each NUL-terminated.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        self.argv = to_block(args);
        self
    }

    /// Replace the environment block with `vars` (`KEY=value`), each
    /// NUL-terminated.
    pub fn with_env<I, S>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        self.env = to_block(vars);
        self
    }
}

fn to_block<I, S>(items: I) -> Vec<u8>
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut block = Vec::new();
    for item in items {
        block.extend_from_slice(item.as_ref());
        block.push(0);
    }
    if block.is_empty() {
        block.push(0);
    }
    block
}

/// Split a NUL-delimited block into C strings.
///
/// The block must end in NUL. A lone NUL means no entries.
pub fn parse_block(block: &[u8]) -> Result<Vec<CString>, Status> {
    let Some((&0, body)) = block.split_last() else {
        return Err(Status::INVALID_INPUT);
    };
    if body.is_empty() {
        return Ok(Vec::new());
    }
    body.split(|&b| b == 0)
        .map(|entry| CString::new(entry).map_err(|_| Status::INVALID_INPUT))
        .collect()
}

/// Capacity of `sockaddr_un::sun_path` on this platform.
pub fn sun_path_capacity() -> usize {
    // SAFETY: sockaddr_un is plain old data; all-zero is a valid value.
    let addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_path.len()
}

/// A request that passed validation, ready to be handed to the child.
pub struct LaunchPlan {
    pub protocol: Protocol,
    pub socket_path: Vec<u8>,
    pub ports: Vec<u32>,
    filename: CString,
    // Owned storage the pointer arrays below point into.
    _args: Vec<CString>,
    _vars: Vec<CString>,
    argv_ptrs: Vec<*const libc::c_char>,
    envp_ptrs: Vec<*const libc::c_char>,
}

impl LaunchPlan {
    /// Validate `request` without making any syscall.
    pub fn new(request: &SpawnRequest) -> Result<Self, Status> {
        let protocol = Protocol::from_selector(request.protocol).ok_or(Status::INVALID_INPUT)?;

        if request.filename.is_empty() {
            return Err(Status::INVALID_INPUT);
        }
        let filename = CString::new(request.filename.clone()).map_err(|_| Status::INVALID_INPUT)?;

        match protocol {
            Protocol::Tcp | Protocol::Udp => {
                if request.ports.iter().any(|&port| port > u32::from(u16::MAX)) {
                    return Err(Status::INVALID_INPUT);
                }
            }
            Protocol::Local => validate_local_path(&request.socket_path, &request.ports)?,
        }

        let args = parse_block(&request.argv)?;
        let vars = parse_block(&request.env)?;

        let argv_ptrs = std::iter::once(filename.as_ptr())
            .chain(args.iter().map(|arg| arg.as_ptr()))
            .chain(std::iter::once(std::ptr::null()))
            .collect();
        let envp_ptrs = vars
            .iter()
            .map(|var| var.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect();

        Ok(Self {
            protocol,
            socket_path: request.socket_path.clone(),
            ports: request.ports.clone(),
            filename,
            _args: args,
            _vars: vars,
            argv_ptrs,
            envp_ptrs,
        })
    }

    pub fn filename(&self) -> &CStr {
        &self.filename
    }

    /// Null-terminated argv: the executable path, the block entries, null.
    pub fn argv(&self) -> &[*const libc::c_char] {
        &self.argv_ptrs
    }

    /// Null-terminated envp.
    pub fn envp(&self) -> &[*const libc::c_char] {
        &self.envp_ptrs
    }

    /// argv as owned strings, without the terminating null.
    pub fn argv_strings(&self) -> Vec<&CStr> {
        self.argv_ptrs
            .iter()
            .take_while(|ptr| !ptr.is_null())
            // SAFETY: every non-null pointer points into a CString we own.
            .map(|&ptr| unsafe { CStr::from_ptr(ptr) })
            .collect()
    }
}

fn validate_local_path(path: &[u8], ports: &[u32]) -> Result<(), Status> {
    if path.is_empty() || path.contains(&0) {
        return Err(Status::INVALID_INPUT);
    }
    let longest_suffix = ports
        .iter()
        .map(|port| port.to_string().len())
        .max()
        .unwrap_or(0);
    // Room for the terminating NUL.
    if path.len() + longest_suffix + 1 > sun_path_capacity() {
        return Err(Status::INVALID_INPUT);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(plan: &LaunchPlan) -> Vec<String> {
        plan.argv_strings()
            .iter()
            .map(|s| s.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_protocol_selectors() {
        assert_eq!(Protocol::from_selector(b't'), Some(Protocol::Tcp));
        assert_eq!(Protocol::from_selector(b'u'), Some(Protocol::Udp));
        assert_eq!(Protocol::from_selector(b'l'), Some(Protocol::Local));
        assert_eq!(Protocol::from_selector(b'x'), None);
        assert!(Protocol::Tcp.uses_length_header());
        assert!(Protocol::Local.uses_length_header());
        assert!(!Protocol::Udp.uses_length_header());
    }

    #[test]
    fn test_parse_block() {
        assert!(parse_block(b"\0").unwrap().is_empty());
        assert_eq!(
            parse_block(b"-c\0echo hi\0").unwrap(),
            vec![CString::new("-c").unwrap(), CString::new("echo hi").unwrap()]
        );
        assert_eq!(parse_block(b"\0\0").unwrap().len(), 2);
    }

    #[test]
    fn test_parse_block_requires_terminator() {
        assert_eq!(parse_block(b""), Err(Status::INVALID_INPUT));
        assert_eq!(parse_block(b"abc"), Err(Status::INVALID_INPUT));
    }

    #[test]
    fn test_empty_argument_block_gives_bare_argv() {
        let plan = LaunchPlan::new(&SpawnRequest::new(Protocol::Tcp, "/bin/true")).unwrap();
        assert_eq!(strings(&plan), vec!["/bin/true"]);
        assert_eq!(plan.argv().len(), 2);
        assert!(plan.argv()[1].is_null());
        assert_eq!(plan.envp().len(), 1);
        assert!(plan.envp()[0].is_null());
    }

    #[test]
    fn test_argv_starts_with_executable() {
        let request = SpawnRequest::new(Protocol::Udp, "/bin/sh")
            .with_args(["-c", "exit 3"])
            .with_env(["A=1", "B=2"]);
        let plan = LaunchPlan::new(&request).unwrap();
        assert_eq!(strings(&plan), vec!["/bin/sh", "-c", "exit 3"]);
        assert_eq!(plan.envp().len(), 3);
        assert_eq!(plan.filename().to_bytes(), b"/bin/sh");
    }

    #[test]
    fn test_rejects_unknown_protocol() {
        let mut request = SpawnRequest::new(Protocol::Tcp, "/bin/true");
        request.protocol = b'q';
        assert_eq!(LaunchPlan::new(&request).err(), Some(Status::INVALID_INPUT));
    }

    #[test]
    fn test_rejects_bad_filename() {
        let empty = SpawnRequest::new(Protocol::Tcp, "");
        assert_eq!(LaunchPlan::new(&empty).err(), Some(Status::INVALID_INPUT));
        let nul = SpawnRequest::new(Protocol::Tcp, b"/bin/\0sh".to_vec());
        assert_eq!(LaunchPlan::new(&nul).err(), Some(Status::INVALID_INPUT));
    }

    #[test]
    fn test_rejects_out_of_range_inet_port() {
        let request = SpawnRequest::new(Protocol::Tcp, "/bin/true").with_ports([70000]);
        assert_eq!(LaunchPlan::new(&request).err(), Some(Status::INVALID_INPUT));
    }

    #[test]
    fn test_local_path_length_bound() {
        let capacity = sun_path_capacity();
        // "/" * n + "12345" + NUL must fit.
        let fits = vec![b'/'; capacity - 6];
        let request = SpawnRequest::new(Protocol::Local, "/bin/true")
            .with_socket_path(fits.clone())
            .with_ports([12345]);
        assert!(LaunchPlan::new(&request).is_ok());

        let too_long = SpawnRequest::new(Protocol::Local, "/bin/true")
            .with_socket_path([fits, b"/".to_vec()].concat())
            .with_ports([12345]);
        assert_eq!(LaunchPlan::new(&too_long).err(), Some(Status::INVALID_INPUT));

        let missing = SpawnRequest::new(Protocol::Local, "/bin/true").with_ports([1]);
        assert_eq!(LaunchPlan::new(&missing).err(), Some(Status::INVALID_INPUT));
    }

    #[test]
    fn test_request_survives_msgpack() {
        let request = SpawnRequest::new(Protocol::Local, "/bin/sh")
            .with_socket_path("/tmp/relay")
            .with_ports([1, 2])
            .with_args(["-c", "true"]);
        let bytes = rmp_serde::to_vec(&request).unwrap();
        let decoded: SpawnRequest = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, request);
    }
}
