// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Binary Tests
//!
//! Runs the `procrelay` executable with its stdin/stdout as the host channel.

use std::io::{Read, Write};
use std::process::{Command, Stdio};

use procrelay::host::{FrameReader, Inbound, Outbound};
use procrelay::{Protocol, SpawnRequest, Status, StreamKind};

fn frame(request: &SpawnRequest) -> Vec<u8> {
    let body = rmp_serde::to_vec_named(&Inbound::Spawn(request.clone())).unwrap();
    let mut bytes = (body.len() as u32).to_be_bytes().to_vec();
    bytes.extend_from_slice(&body);
    bytes
}

fn decode_all(bytes: &[u8]) -> Vec<Outbound> {
    let mut reader = FrameReader::new(1 << 20);
    reader.extend(bytes);
    let mut messages = Vec::new();
    while let Some(body) = reader.next_frame().unwrap() {
        messages.push(rmp_serde::from_slice(&body).unwrap());
    }
    messages
}

fn relay() -> std::process::Child {
    Command::new(env!("CARGO_BIN_EXE_procrelay"))
        .env("RUST_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap()
}

#[test]
fn test_binary_handshakes_and_exits_zero_on_close() {
    let mut child = relay();
    drop(child.stdin.take());

    let mut out = Vec::new();
    child.stdout.take().unwrap().read_to_end(&mut out).unwrap();
    let status = child.wait().unwrap();

    assert!(status.success());
    let messages = decode_all(&out);
    assert_eq!(
        messages,
        vec![Outbound::Ready {
            version: env!("CARGO_PKG_VERSION").to_string()
        }]
    );
}

#[test]
fn test_binary_spawns_and_reports() {
    let mut child = relay();
    let mut stdin = child.stdin.take().unwrap();
    let mut stdout = child.stdout.take().unwrap();

    let echo = SpawnRequest::new(Protocol::Tcp, "/bin/sh").with_args(["-c", "echo relayed"]);
    let missing = SpawnRequest::new(Protocol::Tcp, "");
    stdin
        .write_all(&[frame(&echo), frame(&missing)].concat())
        .unwrap();
    stdin.flush().unwrap();

    // Wait for the child's output before closing the channel.
    let mut out = Vec::new();
    let mut chunk = [0u8; 4096];
    while !decode_all(&out)
        .iter()
        .any(|m| matches!(m, Outbound::Output { .. }))
    {
        let n = stdout.read(&mut chunk).unwrap();
        assert_ne!(n, 0, "relay exited early");
        out.extend_from_slice(&chunk[..n]);
    }
    drop(stdin);
    stdout.read_to_end(&mut out).unwrap();
    assert!(child.wait().unwrap().success());

    let messages = decode_all(&out);
    let Outbound::Spawned { pid } = messages[1] else {
        panic!("expected a spawn reply, got {:?}", messages[1]);
    };
    assert_eq!(
        messages[2],
        Outbound::SpawnFailed {
            status: Status::INVALID_INPUT.code(),
            name: "invalid_input".to_string(),
        }
    );
    assert!(messages.contains(&Outbound::Output {
        pid,
        stream: StreamKind::Stdout,
        data: b"relayed\n".to_vec(),
    }));
}

#[test]
fn test_binary_rejects_oversized_frame() {
    let mut child = relay();
    let mut stdin = child.stdin.take().unwrap();
    stdin.write_all(&u32::MAX.to_be_bytes()).unwrap();
    drop(stdin);

    let status = child.wait().unwrap();

    assert_eq!(status.code(), Some(Status::READ_OVERFLOW.code()));
}

#[test]
fn test_binary_rejects_stream_buffer_larger_than_frame() {
    let output = Command::new(env!("CARGO_BIN_EXE_procrelay"))
        .args(["--max-frame-bytes", "4096", "--stream-buffer-bytes", "4096"])
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .unwrap();

    assert!(!output.status.success());
    // Rejected before the handshake.
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("does not fit"));
}
