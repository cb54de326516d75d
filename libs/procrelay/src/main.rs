// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! procrelay binary
//!
//! Reads spawn requests as framed MessagePack from the input descriptor and
//! writes replies and child output to the output descriptor. The process exit
//! code is the status the event loop stopped with.

use std::os::fd::{FromRawFd, OwnedFd};
use std::process::ExitCode;

use anyhow::{Result, bail, ensure};
use clap::Parser;
use procrelay::config::{DEFAULT_MAX_FRAME_BYTES, DEFAULT_STREAM_BUFFER_BYTES};
use procrelay::host::{HEADER_LEN, OUTPUT_OVERHEAD};
use procrelay::{EventLoop, FramedHost, HostChannel, RelayConfig, Status, sys};

#[derive(Parser)]
#[command(name = "procrelay")]
#[command(author, version, about = "Launch processes and relay their output", long_about = None)]
struct Args {
    /// Descriptor spawn requests arrive on
    #[arg(long, env = "PROCRELAY_INPUT_FD", default_value_t = 0)]
    input_fd: i32,

    /// Descriptor replies and child output are written to
    #[arg(long, env = "PROCRELAY_OUTPUT_FD", default_value_t = 1)]
    output_fd: i32,

    /// Largest frame accepted or sent on the host channel
    #[arg(long, env = "PROCRELAY_MAX_FRAME_BYTES", default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    max_frame_bytes: usize,

    /// Per-stream buffer before output is relayed without a newline
    #[arg(long, env = "PROCRELAY_STREAM_BUFFER_BYTES", default_value_t = DEFAULT_STREAM_BUFFER_BYTES)]
    stream_buffer_bytes: usize,
}

impl Args {
    fn into_config(self) -> Result<RelayConfig> {
        ensure!(self.input_fd >= 0, "input descriptor must be non-negative");
        ensure!(self.output_fd >= 0, "output descriptor must be non-negative");
        ensure!(
            self.input_fd != self.output_fd,
            "input and output descriptors must differ"
        );
        ensure!(
            self.max_frame_bytes > HEADER_LEN,
            "max frame size must exceed the {HEADER_LEN}-byte header"
        );
        ensure!(self.stream_buffer_bytes > 0, "stream buffer must be non-empty");
        // A full stream buffer is relayed as one Output frame.
        ensure!(
            self.stream_buffer_bytes <= self.max_frame_bytes.saturating_sub(OUTPUT_OVERHEAD),
            "stream buffer of {} bytes does not fit a {}-byte frame ({} bytes of framing)",
            self.stream_buffer_bytes,
            self.max_frame_bytes,
            OUTPUT_OVERHEAD
        );
        for fd in [self.input_fd, self.output_fd] {
            if !sys::is_open(fd) {
                bail!("descriptor {fd} is not open");
            }
        }
        Ok(RelayConfig {
            input_fd: self.input_fd,
            output_fd: self.output_fd,
            max_frame_bytes: self.max_frame_bytes,
            stream_buffer_bytes: self.stream_buffer_bytes,
        })
    }
}

fn run(args: Args) -> Result<Status> {
    let config = args.into_config()?;

    // SAFETY: both descriptors were checked open and nothing else in this
    // process claims them.
    let (input, output) = unsafe {
        (
            OwnedFd::from_raw_fd(config.input_fd),
            OwnedFd::from_raw_fd(config.output_fd),
        )
    };
    let mut host = FramedHost::new(input, output, config.max_frame_bytes);
    if let Err(status) = host.handshake() {
        tracing::error!("[Relay] handshake failed: {}", status);
        return Ok(status);
    }

    tracing::info!(
        "[Relay] procrelay v{} ready (PID: {})",
        env!("CARGO_PKG_VERSION"),
        std::process::id()
    );
    Ok(EventLoop::new(host, config).run())
}

fn main() -> ExitCode {
    let args = Args::parse();

    // stdout may carry the host protocol, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(args) {
        Ok(status) => ExitCode::from(status.exit_code()),
        Err(e) => {
            tracing::error!("[Relay] {:#}", e);
            ExitCode::FAILURE
        }
    }
}
