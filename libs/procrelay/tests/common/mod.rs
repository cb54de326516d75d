// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Shared helpers for driving spawn / drain / retire against real children.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing_subscriber::fmt::MakeWriter;

use procrelay::sys::Pid;
use procrelay::{PollSet, ProcessTable, Reaped, Relay, Status, StreamKind};

/// Relay that records every chunk.
#[derive(Debug, Default)]
pub struct Collected {
    pub chunks: Vec<(Pid, StreamKind, Vec<u8>)>,
}

impl Relay for Collected {
    fn relay(&mut self, pid: Pid, stream: StreamKind, data: &[u8]) -> Result<(), Status> {
        self.chunks.push((pid, stream, data.to_vec()));
        Ok(())
    }
}

impl Collected {
    /// Everything relayed for `pid` on `stream`, concatenated.
    pub fn output(&self, pid: Pid, stream: StreamKind) -> Vec<u8> {
        self.chunks
            .iter()
            .filter(|(p, s, _)| *p == pid && *s == stream)
            .flat_map(|(_, _, data)| data.iter().copied())
            .collect()
    }
}

/// Formatted log output of everything a closure logged on this thread.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
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

impl Write for CapturedLogs {
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

/// Poll and drain until `done` holds, collecting every retirement.
pub fn drive_until(
    poll: &mut PollSet,
    table: &mut ProcessTable,
    sink: &mut Collected,
    done: impl Fn(&ProcessTable) -> bool,
) -> Vec<Reaped> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut reaped = Vec::new();
    while !done(table) {
        assert!(Instant::now() < deadline, "children did not finish in time");
        let mut budget = poll.wait(100).unwrap();
        reaped.extend(table.drain(&mut budget, poll, sink).unwrap());
        assert!(table.is_consistent_with(poll));
    }
    reaped
}

pub fn drive_until_empty(
    poll: &mut PollSet,
    table: &mut ProcessTable,
    sink: &mut Collected,
) -> Vec<Reaped> {
    drive_until(poll, table, sink, ProcessTable::is_empty)
}

/// Parse a `{pid, N}` announcement, with or without the length header.
pub fn parse_pid_message(bytes: &[u8], length_header: bool) -> Pid {
    let body = if length_header {
        let len = u32::from_be_bytes(bytes[..4].try_into().unwrap()) as usize;
        assert_eq!(bytes.len() - 4, len, "length header mismatch");
        &bytes[4..]
    } else {
        bytes
    };
    assert_eq!(&body[..9], &[131, 104, 2, 100, 0, 3, b'p', b'i', b'd']);
    match body[9] {
        97 => Pid::from(body[10]),
        98 => i32::from_be_bytes(body[10..14].try_into().unwrap()),
        tag => panic!("unexpected integer tag {tag}"),
    }
}

/// Read a length-prefixed announcement from a stream socket.
pub fn read_framed_pid(stream: &mut impl Read) -> Pid {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).unwrap();
    let mut body = vec![0u8; u32::from_be_bytes(header) as usize];
    stream.read_exact(&mut body).unwrap();
    parse_pid_message(&[header.as_slice(), &body].concat(), true)
}

pub fn sh(script: &str) -> procrelay::SpawnRequest {
    procrelay::SpawnRequest::new(procrelay::Protocol::Tcp, "/bin/sh").with_args(["-c", script])
}
